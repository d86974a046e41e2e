//! Error types for the callguard crate.
//!
//! Each concern owns a focused error enum next to its code. This module ties the
//! non-generic ones together for callers that want a single error type.

use thiserror::Error;

pub use crate::config::ConfigurationError;
pub use crate::fingerprint::FingerprintError;
pub use crate::http::RequestError;

#[derive(Debug, Error)]
pub enum CallGuardError {
    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

impl CallGuardError {
    /// True when the failure was a fast rejection by an open circuit breaker
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CallGuardError::Request(RequestError::CircuitOpen { .. }))
    }
}

pub type Result<T> = std::result::Result<T, CallGuardError>;
