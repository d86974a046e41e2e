//! # Resilience Module
//!
//! Circuit breakers that stop calling a dependency after repeated failures and
//! probe it again after a cooldown.
//!
//! ## Architecture
//!
//! - **Circuit Breakers**: Closed / Open / HalfOpen state machine with a single trial call
//! - **Metrics Collection**: call, failure and rejection counters per breaker
//! - **Manager**: one shared breaker per downstream dependency
//!
//! ## Usage
//!
//! ```rust
//! use callguard::resilience::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let circuit_breaker = CircuitBreaker::new(
//!     "weather_api",
//!     CircuitBreakerConfig::new(5, Duration::from_secs(30)),
//! )?;
//!
//! let result = circuit_breaker
//!     .call(|| async { Ok::<&str, std::io::Error>("sunny") })
//!     .await?;
//! assert_eq!(result, "sunny");
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod manager;
pub mod metrics;

pub use circuit_breaker::{CallPermit, CircuitBreaker, CircuitBreakerError, CircuitState};
pub use config::CircuitBreakerConfig;
pub use manager::CircuitBreakerManager;
pub use metrics::{CircuitBreakerMetrics, SystemCircuitBreakerMetrics};
