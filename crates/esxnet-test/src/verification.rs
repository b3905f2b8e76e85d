//! Assertions over the calls a simulated gateway recorded

use thiserror::Error;

use crate::simulated::{GatewayCall, SimulatedGateway};

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Expected no mutations, found {calls:?}")]
    UnexpectedMutations { calls: Vec<String> },

    #[error("Expected call '{key}' was not made")]
    CallNotMade { key: String },

    #[error("Expected {expected} calls of '{key}', found {actual}")]
    CallCountMismatch {
        key: String,
        expected: usize,
        actual: usize,
    },

    #[error("Mutation order mismatch: expected {expected:?}, got {actual:?}")]
    OrderMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Call log verification helper
pub struct CallVerifier<'a> {
    gateway: &'a SimulatedGateway,
}

impl<'a> CallVerifier<'a> {
    /// Create a new verifier
    pub fn new(gateway: &'a SimulatedGateway) -> Self {
        Self { gateway }
    }

    fn mutation_keys(&self) -> Vec<String> {
        self.gateway.mutations().iter().map(GatewayCall::key).collect()
    }

    /// Verify that nothing changed host state
    pub fn assert_no_mutations(&self) -> VerifyResult<()> {
        let calls = self.mutation_keys();
        if !calls.is_empty() {
            return Err(VerificationError::UnexpectedMutations { calls });
        }
        Ok(())
    }

    /// Verify that a call was made at least once
    pub fn assert_called(&self, key: &str) -> VerifyResult<()> {
        if !self.gateway.calls().iter().any(|c| c.key() == key) {
            return Err(VerificationError::CallNotMade {
                key: key.to_string(),
            });
        }
        Ok(())
    }

    /// Verify how often a call was made
    pub fn assert_call_count(&self, key: &str, expected: usize) -> VerifyResult<()> {
        let actual = self
            .gateway
            .calls()
            .iter()
            .filter(|c| c.key() == key)
            .count();
        if actual != expected {
            return Err(VerificationError::CallCountMismatch {
                key: key.to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Verify the exact sequence of mutations
    pub fn assert_mutation_order(&self, expected: &[&str]) -> VerifyResult<()> {
        let actual = self.mutation_keys();
        if actual != expected {
            return Err(VerificationError::OrderMismatch {
                expected: expected.iter().map(|k| k.to_string()).collect(),
                actual,
            });
        }
        Ok(())
    }
}
