//! # groundcheck-runtime
//!
//! Async execution layer for groundcheck validation.
//!
//! This crate provides:
//! - Parallel check execution on the tokio blocking pool with per-check timeouts
//! - A TTL cache of validation results
//! - A per-agent circuit breaker over failing validators
//! - Interception of agent calls so every response carries validation metadata
//!
//! ## Architecture
//!
//! ```text
//!                    ┌──────────────────────┐
//!  agent call ──────►│  intercept / Guarded │
//!                    └──────────┬───────────┘
//!                               │ ValidationRequest
//!                    ┌──────────▼───────────┐
//!                    │  UnifiedValidator    │──── ValidationCache (moka)
//!                    └──────────┬───────────┘
//!          ┌──────────┬─────────┼─────────┬──────────┐
//!          ▼          ▼         ▼         ▼          ▼
//!      patterns:   patterns:  receipt_  price_    date_
//!      factual     price      total     grounding grounding
//!          │          │         │         │          │
//!          └──────────┴─────────┴────┬────┴──────────┘
//!                                    ▼
//!                              Scorer (core)
//! ```
//!
//! ## Key Guarantees
//!
//! 1. **Every response gets a result**: validator failures degrade to the
//!    fallback result instead of an error
//! 2. **Bounded latency**: a slow check is abandoned after `check_timeout`
//! 3. **Same verdict as core**: parallel execution aggregates exactly like
//!    [`groundcheck_core::validate`]

pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod intercept;
pub mod resilience;
pub mod stats;

pub use cache::{CacheKey, Computed, Lookup, ValidationCache};
pub use config::{CacheConfig, RuntimeConfig};
pub use dispatcher::{UnifiedValidator, ValidationRequest};
pub use intercept::{intercept, AgentOutput, Guarded, ResponseMetadata, ResponseProducer, ValidatedResponse};
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use stats::{StatsCollector, ValidationStats};

use groundcheck_core::{ConfigError, ValidatorError};
use thiserror::Error;

/// Errors raised inside the runtime.
///
/// Check failures never reach callers of [`UnifiedValidator::validate`]; they
/// are logged and turned into the fallback result.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Check '{check}' failed: {source}")]
    Check {
        check: String,
        #[source]
        source: ValidatorError,
    },

    #[error("Check '{check}' panicked: {message}")]
    CheckPanicked { check: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl RuntimeError {
    /// True when the request was at fault rather than the validator.
    pub fn is_input_error(&self) -> bool {
        matches!(self, RuntimeError::Check { source, .. } if source.is_input_error())
    }
}
