//! # Circuit Breaker Manager
//!
//! Hands out one shared breaker per downstream dependency and aggregates their
//! metrics.

use crate::config::{BreakerComponentSettings, CircuitBreakerSettings, ConfigResult, ConfigurationError};
use crate::resilience::{CircuitBreaker, CircuitBreakerMetrics, SystemCircuitBreakerMetrics};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Registry of circuit breakers keyed by dependency name
#[derive(Debug, Clone)]
pub struct CircuitBreakerManager {
    circuit_breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>,
    config: CircuitBreakerSettings,
}

impl CircuitBreakerManager {
    /// Registry using `config` for every breaker it creates
    ///
    /// The defaults and every component override are validated up front, so
    /// later lookups never fail.
    pub fn from_config(config: &CircuitBreakerSettings) -> ConfigResult<Self> {
        config.to_resilience_config().validate()?;
        for (component_name, component) in &config.component_configs {
            validate_component(component_name, component)?;
        }

        info!(
            failure_threshold = config.failure_threshold,
            timeout_seconds = config.timeout_seconds,
            component_overrides = config.component_configs.len(),
            "Initializing circuit breaker manager"
        );

        Ok(Self {
            circuit_breakers: Arc::new(DashMap::new()),
            config: config.clone(),
        })
    }

    /// Get or create the breaker for a dependency
    ///
    /// Every caller asking for the same name receives the same instance.
    pub fn get_circuit_breaker(&self, component_name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.circuit_breakers.get(component_name) {
            return Arc::clone(breaker.value());
        }

        let entry = self
            .circuit_breakers
            .entry(component_name.to_string())
            .or_insert_with(|| {
                let component_config = self
                    .config
                    .config_for_component(component_name)
                    .to_resilience_config();
                info!(component = component_name, "Created new circuit breaker");
                Arc::new(CircuitBreaker::with_validated_config(component_name, component_config))
            });
        Arc::clone(entry.value())
    }

    /// Get all circuit breaker names, sorted
    pub fn list_components(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .circuit_breakers
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort_unstable();
        names
    }

    pub fn get_component_metrics(&self, component_name: &str) -> Option<CircuitBreakerMetrics> {
        self.circuit_breakers
            .get(component_name)
            .map(|breaker| breaker.metrics())
    }

    pub fn get_system_metrics(&self) -> SystemCircuitBreakerMetrics {
        let mut system_metrics = SystemCircuitBreakerMetrics::new();
        for entry in self.circuit_breakers.iter() {
            system_metrics.add_circuit_breaker(entry.key().clone(), entry.value().metrics());
        }
        system_metrics
    }

    /// Force open all circuit breakers (emergency stop)
    pub fn force_open_all(&self) {
        warn!("Forcing all circuit breakers open (emergency stop)");
        for entry in self.circuit_breakers.iter() {
            entry.value().force_open();
        }
    }

    /// Force close all circuit breakers (emergency recovery)
    pub fn force_close_all(&self) {
        warn!("Forcing all circuit breakers closed (emergency recovery)");
        for entry in self.circuit_breakers.iter() {
            entry.value().force_closed();
        }
    }

    /// Forget a dependency's breaker; holders of the old `Arc` keep using it
    pub fn remove_circuit_breaker(&self, component_name: &str) -> bool {
        let removed = self.circuit_breakers.remove(component_name).is_some();
        if removed {
            info!(
                component = component_name,
                remaining_count = self.circuit_breakers.len(),
                "Removed circuit breaker"
            );
        }
        removed
    }

    /// Set the override used for breakers created from now on
    pub fn update_component_config(
        &mut self,
        component_name: &str,
        config: BreakerComponentSettings,
    ) -> ConfigResult<()> {
        validate_component(component_name, &config)?;
        self.config
            .component_configs
            .insert(component_name.to_string(), config);
        info!(
            component = component_name,
            "Updated circuit breaker configuration (applies to new instances)"
        );
        Ok(())
    }
}

fn validate_component(component_name: &str, component: &BreakerComponentSettings) -> ConfigResult<()> {
    component
        .to_resilience_config()
        .validate()
        .map_err(|e| match e {
            ConfigurationError::InvalidValue { field, reason } => ConfigurationError::InvalidValue {
                field: format!("component_configs.{component_name}.{field}"),
                reason,
            },
            other => other,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::CircuitState;
    use std::collections::HashMap;
    use std::time::Duration;

    fn create_test_config() -> CircuitBreakerSettings {
        let mut component_configs = HashMap::new();
        component_configs.insert(
            "weather".to_string(),
            BreakerComponentSettings {
                failure_threshold: 2,
                timeout_seconds: 90,
            },
        );
        CircuitBreakerSettings {
            failure_threshold: 5,
            timeout_seconds: 30,
            component_configs,
        }
    }

    #[test]
    fn test_get_or_create_circuit_breaker() {
        let manager = CircuitBreakerManager::from_config(&create_test_config()).unwrap();
        assert!(manager.list_components().is_empty());

        let breaker1 = manager.get_circuit_breaker("calendar");
        let breaker2 = manager.get_circuit_breaker("calendar");
        assert!(Arc::ptr_eq(&breaker1, &breaker2));
        assert_eq!(breaker1.config().failure_threshold, 5);
        assert_eq!(manager.list_components(), vec!["calendar".to_string()]);
    }

    #[test]
    fn test_component_override_applies() {
        let manager = CircuitBreakerManager::from_config(&create_test_config()).unwrap();
        let weather = manager.get_circuit_breaker("weather");
        assert_eq!(weather.config().failure_threshold, 2);
        assert_eq!(weather.config().timeout, Duration::from_secs(90));
    }

    #[test]
    fn test_clones_share_registry() {
        let manager = CircuitBreakerManager::from_config(&create_test_config()).unwrap();
        let clone = manager.clone();
        let a = manager.get_circuit_breaker("weather");
        let b = clone.get_circuit_breaker("weather");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_force_all_and_system_metrics() {
        let manager = CircuitBreakerManager::from_config(&create_test_config()).unwrap();
        manager.get_circuit_breaker("weather");
        manager.get_circuit_breaker("calendar");

        manager.force_open_all();
        let system = manager.get_system_metrics();
        assert_eq!(system.count_by_state().get(&CircuitState::Open), Some(&2));
        assert_eq!(system.health_score(), 0.0);

        manager.force_close_all();
        assert_eq!(manager.get_system_metrics().health_score(), 1.0);
    }

    #[test]
    fn test_remove_and_update() {
        let mut manager = CircuitBreakerManager::from_config(&create_test_config()).unwrap();
        let old = manager.get_circuit_breaker("calendar");
        assert!(manager.remove_circuit_breaker("calendar"));
        assert!(!manager.remove_circuit_breaker("calendar"));

        manager.update_component_config(
            "calendar",
            BreakerComponentSettings {
                failure_threshold: 9,
                timeout_seconds: 10,
            },
        )
        .unwrap();
        let new = manager.get_circuit_breaker("calendar");
        assert!(!Arc::ptr_eq(&old, &new));
        assert_eq!(new.config().failure_threshold, 9);
        assert!(manager.get_component_metrics("calendar").is_some());
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        let mut config = create_test_config();
        config.failure_threshold = 0;
        assert!(CircuitBreakerManager::from_config(&config).is_err());

        let mut config = create_test_config();
        config.component_configs.insert(
            "calendar".to_string(),
            BreakerComponentSettings {
                failure_threshold: 3,
                timeout_seconds: 0,
            },
        );
        let err = CircuitBreakerManager::from_config(&config).unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::InvalidValue { ref field, .. } if field == "component_configs.calendar.timeout"
        ));

        let mut manager = CircuitBreakerManager::from_config(&create_test_config()).unwrap();
        let zero = BreakerComponentSettings {
            failure_threshold: 0,
            timeout_seconds: 10,
        };
        assert!(manager.update_component_config("weather", zero).is_err());
        assert_eq!(manager.get_circuit_breaker("weather").config().failure_threshold, 2);
    }
}
