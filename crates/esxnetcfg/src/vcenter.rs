//! vCenter session over the vSphere Automation REST API

use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use esxnet_common::{NetCfgError, NetCfgResult};

/// Session token header
pub const SESSION_HEADER: &str = "vmware-api-session-id";

/// Host connection state reported for usable hosts
pub const HOST_CONNECTED: &str = "CONNECTED";

/// Request timeout for management calls
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Host entry returned by `GET /api/vcenter/host`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HostSummary {
    /// Managed object identifier (e.g. "host-1042")
    pub host: String,
    /// Host name
    pub name: String,
    /// Connection state (CONNECTED, DISCONNECTED, NOT_RESPONDING)
    pub connection_state: String,
    /// Power state, absent for disconnected hosts
    #[serde(default)]
    pub power_state: Option<String>,
}

/// Authenticated session against a vCenter endpoint
pub struct VcenterSession {
    client: Client,
    base_url: String,
    user: String,
    password: String,
    token: Mutex<Option<String>>,
}

impl VcenterSession {
    /// Creates a session for `endpoint` (an FQDN or a URL).
    ///
    /// No request is made until [`login`](Self::login).
    pub fn new(
        endpoint: &str,
        user: impl Into<String>,
        password: impl Into<String>,
        insecure_tls: bool,
    ) -> NetCfgResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(insecure_tls)
            .build()
            .map_err(|e| NetCfgError::internal(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url(endpoint),
            user: user.into(),
            password: password.into(),
            token: Mutex::new(None),
        })
    }

    /// Endpoint base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns true once a session token was obtained
    pub fn is_logged_in(&self) -> bool {
        self.token.lock().is_some()
    }

    /// Opens a session with basic authentication
    #[instrument(skip(self), fields(endpoint = %self.base_url, user = %self.user))]
    pub async fn login(&self) -> NetCfgResult<()> {
        let response = self
            .client
            .post(format!("{}/api/session", self.base_url))
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await
            .map_err(|e| NetCfgError::connection(&self.base_url, e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(NetCfgError::authentication(
                &self.base_url,
                &self.user,
                format!("HTTP {}", status),
            ));
        }
        if !status.is_success() {
            return Err(NetCfgError::management(
                "session create",
                format!("unexpected HTTP {}", status),
            ));
        }

        let token: String = response
            .json()
            .await
            .map_err(|e| NetCfgError::management("session create", e.to_string()))?;
        *self.token.lock() = Some(token);

        info!("Successfully connected to {} as {}", self.base_url, self.user);
        Ok(())
    }

    /// Resolves a host by name and checks it is connected
    #[instrument(skip(self))]
    pub async fn find_host(&self, name: &str) -> NetCfgResult<HostSummary> {
        let token = self
            .token
            .lock()
            .clone()
            .ok_or_else(|| NetCfgError::internal("no vCenter session"))?;

        let response = self
            .client
            .get(format!("{}/api/vcenter/host", self.base_url))
            .header(SESSION_HEADER, token)
            .query(&[("names", name)])
            .send()
            .await
            .map_err(|e| NetCfgError::connection(&self.base_url, e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(NetCfgError::authentication(
                &self.base_url,
                &self.user,
                "session rejected",
            ));
        }
        if !status.is_success() {
            return Err(NetCfgError::management(
                "host list",
                format!("unexpected HTTP {}", status),
            ));
        }

        let hosts: Vec<HostSummary> = response
            .json()
            .await
            .map_err(|e| NetCfgError::management("host list", e.to_string()))?;

        select_host(name, hosts)
    }

    /// Closes the session; a missing session is not an error
    pub async fn logout(&self) -> NetCfgResult<()> {
        let token = self.token.lock().take();
        let Some(token) = token else {
            return Ok(());
        };

        let result = self
            .client
            .delete(format!("{}/api/session", self.base_url))
            .header(SESSION_HEADER, token)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!("Closed vCenter session");
                Ok(())
            }
            Ok(response) => {
                warn!(status = %response.status(), "vCenter logout rejected");
                Err(NetCfgError::management(
                    "session delete",
                    format!("unexpected HTTP {}", response.status()),
                ))
            }
            Err(e) => Err(NetCfgError::connection(&self.base_url, e.to_string())),
        }
    }
}

impl std::fmt::Debug for VcenterSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VcenterSession")
            .field("base_url", &self.base_url)
            .field("user", &self.user)
            .field("logged_in", &self.is_logged_in())
            .finish()
    }
}

fn base_url(endpoint: &str) -> String {
    let endpoint = endpoint.trim().trim_end_matches('/');
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("https://{}", endpoint)
    }
}

fn select_host(name: &str, hosts: Vec<HostSummary>) -> NetCfgResult<HostSummary> {
    let host = hosts
        .into_iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| NetCfgError::host_not_found(name, "not registered in vCenter"))?;

    if host.connection_state != HOST_CONNECTED {
        return Err(NetCfgError::host_not_found(
            name,
            format!("connection state {}", host.connection_state),
        ));
    }
    Ok(host)
}
