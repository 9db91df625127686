// Resilience primitives — retry pacing and failure gating

pub mod backoff;
pub mod circuit_breaker;

pub use backoff::{Backoff, BackoffConfig};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitOpen, CircuitState};
