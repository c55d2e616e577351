//! Resilience patterns for groundcheck-runtime.
//!
//! A validator that keeps failing (bad hints from a misbehaving agent, a
//! panicking custom check) is short-circuited to the fallback result.

mod circuit_breaker;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
