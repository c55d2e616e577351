//! # groundcheck-core
//!
//! Deterministic hallucination detection for LLM agent output.
//!
//! Given an agent's response (and the context it was produced from), this
//! crate answers:
//! - Which statements look fabricated (prices, dates, quantities, citations)?
//! - How confident are we in the response overall?
//! - Should the caller accept it, warn, or reject it?
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: Same input always produces the same verdict
//! 2. **No model calls**: All checks are rule-based
//! 3. **Traceable**: Every finding names its rule and byte span
//! 4. **Independent checks**: A validator's checks can run in parallel
//!
//! ## Example
//!
//! ```rust,ignore
//! use groundcheck_core::{validate, PatternRegistry, ValidationInput, Recommendation};
//!
//! let registry = PatternRegistry::builtin()?;
//! let input = ValidationInput::new("receipt", "Razem 8.49 zł")
//!     .with_context("Chleb 4.50\nMleko 3.99");
//! let result = validate(&registry, &input, None);
//!
//! match result.recommendation {
//!     Recommendation::Accept => println!("OK"),
//!     Recommendation::Warn => println!("WARN: {:?}", result.matched_patterns),
//!     Recommendation::Reject => println!("REJECT ({:.2})", result.hallucination_score),
//! }
//! ```

pub mod config;
pub mod patterns;
pub mod registry;
pub mod scoring;
pub mod text;
pub mod types;
pub mod validators;

// Re-export main types at crate root
pub use config::{AgentConfigSpec, AgentValidationConfig, ConfigError, ValidationConfigFile};
pub use patterns::{PatternError, PatternRule, PatternSpec, ValueCheck};
pub use registry::{PatternRegistry, RegistryBuilder, Resolved, GENERIC_AGENT};
pub use scoring::{Scorer, FALLBACK_VALIDATOR};
pub use types::{
    HallucinationType, Hints, PatternMatch, Recommendation, Severity, ValidationInput,
    ValidationLevel, ValidationResult,
};
pub use validators::{Check, SemanticCheck, Validator, ValidatorError, ValidatorKind};

use std::time::Instant;

/// Validate a response synchronously, running checks in order.
///
/// The level defaults to the agent's configured level. A validator error
/// never escapes: it is logged and the degraded fallback result returned.
pub fn validate(
    registry: &PatternRegistry,
    input: &ValidationInput,
    level: Option<ValidationLevel>,
) -> ValidationResult {
    let started = Instant::now();
    let resolved = registry.resolve(&input.agent_type);
    let level = level.unwrap_or(resolved.config.validation_level);

    match resolved.validator.validate(input, &resolved.config, level) {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(
                agent_type = %input.agent_type,
                validator = resolved.validator.name(),
                level = %level,
                error = %e,
                "Validator failed, returning fallback result"
            );
            Scorer::fallback(started.elapsed().as_secs_f64() * 1000.0)
        }
    }
}
