//! # Circuit Breaker Configuration
//!
//! Per-breaker parameters. System-wide settings, including per-dependency
//! overrides, live in [`crate::config::CircuitBreakerSettings`].

use crate::config::{ConfigResult, ConfigurationError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a single circuit breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: u32,

    /// Time to wait in open state before admitting a trial call
    pub timeout: Duration,
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, timeout: Duration) -> Self {
        Self {
            failure_threshold,
            timeout,
        }
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "failure_threshold".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }

        if self.timeout.is_zero() {
            return Err(ConfigurationError::InvalidValue {
                field: "timeout".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_breaker_config_validation() {
        assert!(CircuitBreakerConfig::default().validate().is_ok());

        let zero_threshold = CircuitBreakerConfig::new(0, Duration::from_secs(1));
        assert!(matches!(
            zero_threshold.validate(),
            Err(ConfigurationError::InvalidValue { ref field, .. }) if field == "failure_threshold"
        ));

        let zero_timeout = CircuitBreakerConfig::new(3, Duration::ZERO);
        assert!(matches!(
            zero_timeout.validate(),
            Err(ConfigurationError::InvalidValue { ref field, .. }) if field == "timeout"
        ));
    }

    #[test]
    fn test_defaults() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.timeout, Duration::from_secs(30));
    }
}
