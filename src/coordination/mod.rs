//! Coordination: exchange circuit breaker and shutdown signalling

pub mod circuit_breaker;
pub mod shutdown;

pub use circuit_breaker::{
    Admission, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState, TripReason,
};
pub use shutdown::{wait_for_shutdown, ShutdownHandle, ShutdownSignal};
