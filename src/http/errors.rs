//! Outbound request errors.

use std::time::Duration;
use thiserror::Error;

/// Failure of a guarded outbound call
///
/// Every variant except [`RequestError::CircuitOpen`] and [`RequestError::Build`]
/// is reported to the circuit breaker as a failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// The breaker rejected the call; nothing was sent
    #[error("Circuit breaker is open for {component}")]
    CircuitOpen { component: String },

    /// The response status was classified as bad
    #[error("Bad HTTP response code {status} from {url}")]
    BadResponse { status: u16, url: String },

    #[error("Request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("Connection to {url} failed: {message}")]
    Connection { url: String, message: String },

    /// The request could not be built (invalid URL, header or proxy)
    #[error("Invalid request: {0}")]
    Build(String),
}

impl RequestError {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, RequestError::CircuitOpen { .. })
    }

    /// Status code carried by a bad response
    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::BadResponse { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub(crate) fn from_transport(error: reqwest::Error, url: &str, timeout: Duration) -> Self {
        if error.is_timeout() {
            RequestError::Timeout {
                url: url.to_string(),
                timeout,
            }
        } else if error.is_builder() {
            RequestError::Build(error.to_string())
        } else {
            RequestError::Connection {
                url: url.to_string(),
                message: error.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = RequestError::BadResponse {
            status: 503,
            url: "http://weather/api".to_string(),
        };
        assert_eq!(err.to_string(), "Bad HTTP response code 503 from http://weather/api");
        assert_eq!(err.status(), Some(503));
        assert!(!err.is_circuit_open());

        let err = RequestError::Timeout {
            url: "http://weather/api".to_string(),
            timeout: Duration::from_secs(5),
        };
        assert_eq!(err.to_string(), "Request to http://weather/api timed out after 5s");
    }
}
