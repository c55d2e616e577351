//! Parallel validation with caching and graceful degradation.
//!
//! The dispatcher implements:
//! - Fan-out of a validator's planned checks onto the blocking pool
//! - A per-check timeout; a check that runs over is a non-match
//! - Fan-in through the core [`Scorer`]
//! - The fallback result on validator errors and panics

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use groundcheck_core::{
    Hints, PatternRegistry, Resolved, Scorer, ValidationInput, ValidationLevel, ValidationResult,
    GENERIC_AGENT,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheKey, Computed, ValidationCache};
use crate::config::RuntimeConfig;
use crate::resilience::CircuitBreaker;
use crate::stats::{StatsCollector, ValidationStats};
use crate::RuntimeError;

/// One validation call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationRequest {
    pub agent_type: String,
    pub response: String,
    #[serde(default)]
    pub context: String,

    /// Overrides the agent's configured level
    #[serde(default)]
    pub level: Option<ValidationLevel>,

    #[serde(default)]
    pub hints: Hints,
}

impl ValidationRequest {
    pub fn new(agent_type: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            agent_type: agent_type.into(),
            response: response.into(),
            ..Default::default()
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_level(mut self, level: ValidationLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn with_hints(mut self, hints: Hints) -> Self {
        self.hints = hints;
        self
    }

    pub fn with_hint(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.hints.insert(key, value);
        self
    }

    pub fn into_input(self) -> ValidationInput {
        ValidationInput {
            agent_type: self.agent_type,
            response: self.response,
            context: self.context,
            hints: self.hints,
        }
    }
}

/// The single entry point for validating agent responses.
///
/// # Architecture
///
/// ```text
/// ValidationRequest
///        │
///        ▼
/// resolve agent ──► cache lookup ──hit──► cached result
///        │                │
///        │               miss
///        ▼                ▼
///   circuit open?   plan checks ──► spawn_blocking × N (timeout each)
///        │                                   │
///     fallback                         join_all ──► Scorer ──► cache insert
/// ```
pub struct UnifiedValidator {
    registry: Arc<PatternRegistry>,
    config: RuntimeConfig,
    cache: Option<ValidationCache>,
    circuit_breaker: CircuitBreaker,
    stats: StatsCollector,
}

impl UnifiedValidator {
    pub fn new(registry: Arc<PatternRegistry>, config: RuntimeConfig) -> Self {
        let cache = config
            .cache
            .enabled
            .then(|| ValidationCache::new(config.cache.max_entries));
        let circuit_breaker = CircuitBreaker::new(config.circuit_breaker.clone());

        Self {
            registry,
            config,
            cache,
            circuit_breaker,
            stats: StatsCollector::new(),
        }
    }

    /// A dispatcher over the built-in agents.
    pub fn with_builtin_agents(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        Ok(Self::new(Arc::new(PatternRegistry::builtin()?), config))
    }

    pub fn registry(&self) -> &PatternRegistry {
        &self.registry
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn cache(&self) -> Option<&ValidationCache> {
        self.cache.as_ref()
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    /// Validate one response. Never fails: validator errors, panics and open
    /// circuits produce the fallback result.
    pub async fn validate(&self, request: ValidationRequest) -> ValidationResult {
        let resolved = self.registry.resolve(&request.agent_type);
        let level = request.level.unwrap_or(resolved.config.validation_level);
        let input = Arc::new(request.into_input());

        let (result, cache_hit) = match &self.cache {
            Some(cache) => {
                let key = CacheKey::from_input(&input, level);
                let lookup = cache
                    .get_or_compute(key, resolved.config.cache_ttl, || {
                        self.run_checks(&resolved, Arc::clone(&input), level)
                    })
                    .await;
                (lookup.result, Some(lookup.hit))
            }
            None => (
                self.run_checks(&resolved, Arc::clone(&input), level)
                    .await
                    .into_result(),
                None,
            ),
        };

        self.stats
            .record(agent_key(&resolved, &input.agent_type), &result, cache_hit);
        result
    }

    pub async fn validate_text(
        &self,
        agent_type: &str,
        response: &str,
        context: &str,
    ) -> ValidationResult {
        self.validate(ValidationRequest::new(agent_type, response).with_context(context))
            .await
    }

    /// Like [`validate`](Self::validate), but gives up when `token` is
    /// cancelled. Nothing is cached for a cancelled request.
    pub async fn validate_until_cancelled(
        &self,
        request: ValidationRequest,
        token: &CancellationToken,
    ) -> Option<ValidationResult> {
        let agent_type = request.agent_type.clone();
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!(agent_type = %agent_type, "Validation cancelled");
                None
            }
            result = self.validate(request) => Some(result),
        }
    }

    /// Evict the cached result for `request`, if any.
    pub async fn invalidate(&self, request: &ValidationRequest) {
        let Some(cache) = &self.cache else {
            return;
        };
        let level = match request.level {
            Some(level) => level,
            None => self.registry.resolve(&request.agent_type).config.validation_level,
        };
        let key = CacheKey::new(
            &request.agent_type,
            &request.response,
            &request.context,
            level,
            &request.hints,
        );
        cache.invalidate(&key).await;
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }

    pub fn stats(&self) -> ValidationStats {
        self.stats.snapshot()
    }

    /// Run every planned check in parallel and score the outcome.
    async fn run_checks(
        &self,
        resolved: &Resolved,
        input: Arc<ValidationInput>,
        level: ValidationLevel,
    ) -> Computed {
        let started = Instant::now();
        let breaker_key = agent_key(resolved, &input.agent_type);
        if self.circuit_breaker.is_open(breaker_key) {
            tracing::warn!(
                agent_type = %input.agent_type,
                validator = resolved.validator.name(),
                "Circuit open, returning fallback result"
            );
            return Computed::Uncacheable(Scorer::fallback(elapsed_ms(started)));
        }

        let timeout = self.config.check_timeout;
        let runs = resolved
            .validator
            .plan(&resolved.config, level)
            .into_iter()
            .map(|check| {
                let validator = Arc::clone(&resolved.validator);
                let config = Arc::clone(&resolved.config);
                let input = Arc::clone(&input);
                async move {
                    let task = tokio::task::spawn_blocking(move || {
                        validator.run_check(check, &input, &config, level)
                    });
                    (check, tokio::time::timeout(timeout, task).await)
                }
            });
        let outcomes = join_all(runs).await;

        let mut matches = Vec::new();
        let mut timed_out = Vec::new();
        for (check, outcome) in outcomes {
            let error = match outcome {
                Ok(Ok(Ok(found))) => {
                    matches.extend(found);
                    continue;
                }
                Ok(Ok(Err(source))) => RuntimeError::Check {
                    check: check.name(),
                    source,
                },
                Ok(Err(join_error)) => RuntimeError::CheckPanicked {
                    check: check.name(),
                    message: panic_message(join_error),
                },
                Err(_) => {
                    tracing::warn!(
                        agent_type = %input.agent_type,
                        check = %check.name(),
                        timeout = ?timeout,
                        "Check timed out, treating as non-match"
                    );
                    timed_out.push(check.name());
                    continue;
                }
            };

            tracing::error!(
                agent_type = %input.agent_type,
                validator = resolved.validator.name(),
                level = %level,
                error = %error,
                "Validation failed, returning fallback result"
            );
            // Bad hints from one caller must not disable the agent for others
            if !error.is_input_error() {
                self.circuit_breaker.record_failure(breaker_key);
            }
            return Computed::Uncacheable(Scorer::fallback(elapsed_ms(started)));
        }

        self.circuit_breaker.record_success(breaker_key);
        let result = Scorer::new(&resolved.config, level).score(
            resolved.validator.name(),
            matches,
            timed_out,
            elapsed_ms(started),
        );

        // A later call may finish the checks that timed out
        if result.timed_out_checks.is_empty() {
            Computed::Cacheable(result)
        } else {
            Computed::Uncacheable(result)
        }
    }
}

/// Unregistered agent types share the generic entry in stats and the breaker.
fn agent_key<'a>(resolved: &Resolved, agent_type: &'a str) -> &'a str {
    if resolved.registered {
        agent_type
    } else {
        GENERIC_AGENT
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

fn panic_message(error: JoinError) -> String {
    match error.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string()),
        Err(error) => error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use groundcheck_core::{
        AgentValidationConfig, HallucinationType, PatternMatch, Recommendation, RegistryBuilder,
        SemanticCheck, Validator, ValidatorError, ValidatorKind, FALLBACK_VALIDATOR,
    };
    use serde_json::json;
    use std::time::Duration;

    use crate::resilience::CircuitBreakerConfig;

    /// A custom check that sleeps before finding nothing.
    struct SlowValidator {
        delay: Duration,
    }

    const SLOW_CHECKS: &[SemanticCheck] = &[SemanticCheck::Custom {
        name: "slow_lookup",
        min_level: ValidationLevel::Lenient,
    }];

    impl Validator for SlowValidator {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn semantic_checks(&self) -> &[SemanticCheck] {
            SLOW_CHECKS
        }

        fn run_semantic(
            &self,
            _check: SemanticCheck,
            _input: &ValidationInput,
            _config: &AgentValidationConfig,
        ) -> Result<Vec<PatternMatch>, ValidatorError> {
            std::thread::sleep(self.delay);
            Ok(Vec::new())
        }
    }

    struct PanickingValidator;

    const PANICKING_CHECKS: &[SemanticCheck] = &[SemanticCheck::Custom {
        name: "explodes",
        min_level: ValidationLevel::Lenient,
    }];

    impl Validator for PanickingValidator {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn semantic_checks(&self) -> &[SemanticCheck] {
            PANICKING_CHECKS
        }

        fn run_semantic(
            &self,
            _check: SemanticCheck,
            _input: &ValidationInput,
            _config: &AgentValidationConfig,
        ) -> Result<Vec<PatternMatch>, ValidatorError> {
            panic!("lookup table missing")
        }
    }

    fn builtin(config: RuntimeConfig) -> UnifiedValidator {
        UnifiedValidator::with_builtin_agents(config).unwrap()
    }

    fn with_custom(agent_type: &str, validator: Arc<dyn Validator>, config: RuntimeConfig) -> UnifiedValidator {
        let mut builder = RegistryBuilder::with_builtin_agents().unwrap();
        builder
            .register_validator(agent_type, AgentValidationConfig::bare(ValidatorKind::Generic), validator)
            .unwrap();
        UnifiedValidator::new(Arc::new(builder.build().unwrap()), config)
    }

    fn receipt_request(response: &str) -> ValidationRequest {
        ValidationRequest::new("receipt", response).with_context("Chleb 4.50\nMleko 3.99")
    }

    async fn cached_entries(validator: &UnifiedValidator) -> u64 {
        let cache = validator.cache().unwrap();
        cache.run_pending_tasks().await;
        cache.entry_count()
    }

    #[tokio::test]
    async fn test_receipt_totals() {
        let validator = builtin(RuntimeConfig::default());

        let ok = validator.validate(receipt_request("Razem 8.49 zł")).await;
        assert_eq!(ok.recommendation, Recommendation::Accept);

        let bad = validator.validate(receipt_request("Razem 20.00 zł")).await;
        assert_eq!(bad.recommendation, Recommendation::Reject);
        assert_eq!(bad.count_of(HallucinationType::FactualError), 1);
    }

    #[tokio::test]
    async fn test_cache_hit_keeps_result() {
        let validator = builtin(RuntimeConfig::default());

        let first = validator.validate(receipt_request("Razem 20.00 zł")).await;
        let second = validator.validate(receipt_request("Razem 20.00 zł")).await;

        assert_eq!(second.validator_used, "receipt");
        assert_eq!(second.validator_used, first.validator_used);
        assert_eq!(second.matched_patterns, first.matched_patterns);
        assert_eq!(second.recommendation, first.recommendation);
        assert!(second.elapsed_ms < 1.0, "cache hit took {}ms", second.elapsed_ms);

        let stats = validator.stats();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
        assert_eq!(stats.rejected, 2);
    }

    #[tokio::test]
    async fn test_deterministic_without_cache() {
        let validator = builtin(RuntimeConfig::default().without_cache());
        let request = ValidationRequest::new("search", "Polska ma 38 mln mieszkańców. Według GUS to dużo.");

        let mut first = validator.validate(request.clone()).await;
        let mut second = validator.validate(request).await;
        first.elapsed_ms = 0.0;
        second.elapsed_ms = 0.0;
        assert_eq!(first, second);

        let stats = validator.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.cache_hits + stats.cache_misses, 0);
    }

    #[tokio::test]
    async fn test_parallel_matches_sequential() {
        let validator = builtin(RuntimeConfig::default().without_cache());
        let registry = PatternRegistry::builtin().unwrap();
        let inputs = [
            ValidationInput::new("chef", "Dodaj 200g mąki i smaż 900 minut")
                .with_hint("available_ingredients", json!(["mąka", "jajka"])),
            ValidationInput::new("weather", "Wilgotność 140%, wiatr 650 km/h, 150 stopni."),
            ValidationInput::new("receipt", "Chleb 4.50 zł, razem 20.00 zł").with_context("Chleb 4.50"),
            ValidationInput::new("generic", "Sklep jest otwarty. Sklep nie jest otwarty o 25:70."),
        ];

        for input in inputs {
            let mut sequential = groundcheck_core::validate(&registry, &input, None);
            let request = ValidationRequest {
                agent_type: input.agent_type.clone(),
                response: input.response.clone(),
                context: input.context.clone(),
                level: None,
                hints: input.hints.clone(),
            };
            let mut parallel = validator.validate(request).await;
            sequential.elapsed_ms = 0.0;
            parallel.elapsed_ms = 0.0;
            assert_eq!(parallel, sequential, "agent {}", input.agent_type);
        }
    }

    #[tokio::test]
    async fn test_chef_unlisted_ingredient() {
        let validator = builtin(RuntimeConfig::default());
        let request = ValidationRequest::new("chef", "Dodaj 200g mąki i 100g boczku")
            .with_hint("available_ingredients", json!(["mąka", "jajka"]));

        let result = validator.validate(request).await;
        assert_eq!(result.count_of(HallucinationType::IngredientHallucination), 1);
        assert_eq!(result.recommendation, Recommendation::Reject);
    }

    #[tokio::test]
    async fn test_level_override_is_part_of_key() {
        let validator = builtin(RuntimeConfig::default());
        let request = ValidationRequest::new("chef", "Odstaw na 72 godziny.");

        let strict = validator.validate(request.clone()).await;
        let lenient = validator
            .validate(request.with_level(ValidationLevel::Lenient))
            .await;

        assert_eq!(strict.matched_patterns.len(), 1);
        assert!(lenient.matched_patterns.is_empty());
        assert_eq!(validator.stats().cache_hits, 0);
    }

    #[tokio::test]
    async fn test_unknown_agent_uses_generic() {
        let validator = builtin(RuntimeConfig::default());
        let result = validator.validate_text("unknown_agent", "text", "").await;

        assert_eq!(result.validator_used, "generic");
        assert_eq!(result.recommendation, Recommendation::Accept);
    }

    #[tokio::test]
    async fn test_unknown_agents_share_generic_stats() {
        let validator = builtin(RuntimeConfig::default());
        for agent_type in ["barista", "sommelier", "barista"] {
            validator.validate_text(agent_type, "Dzień dobry", "").await;
        }
        validator.validate_text("weather", "Jutro 22 stopni", "").await;

        let stats = validator.stats();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.per_agent.get("generic"), Some(&3));
        assert_eq!(stats.per_agent.get("weather"), Some(&1));
        assert!(stats.per_agent.get("barista").is_none());
        assert_eq!(stats.per_agent.len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_hint_falls_back_uncached() {
        let validator = builtin(RuntimeConfig::default());
        let request = ValidationRequest::new("chef", "Dodaj 200g mąki")
            .with_hint("available_ingredients", json!({"mąka": true}));

        let result = validator.validate(request).await;
        assert_eq!(result.validator_used, FALLBACK_VALIDATOR);
        assert_eq!(result.confidence, 0.5);
        assert_eq!(result.hallucination_score, 0.0);
        assert_eq!(result.recommendation, Recommendation::Warn);

        assert_eq!(cached_entries(&validator).await, 0);
        assert_eq!(validator.stats().fallbacks, 1);
    }

    #[tokio::test]
    async fn test_bad_hints_do_not_open_circuit() {
        let validator = builtin(RuntimeConfig::default());
        for attempt in 0..5 {
            let request = ValidationRequest::new("chef", format!("Dodaj {}g mąki", 100 + attempt))
                .with_hint("available_ingredients", json!({"bad": true}));
            let result = validator.validate(request).await;
            assert_eq!(result.validator_used, FALLBACK_VALIDATOR);
        }
        assert!(!validator.circuit_breaker().is_open("chef"));

        let request = ValidationRequest::new("chef", "Dodaj 200g mąki i smaż 900 minut")
            .with_hint("available_ingredients", json!(["mąka", "jajka"]));
        let result = validator.validate(request).await;
        assert_eq!(result.validator_used, "chef");
        assert_eq!(result.count_of(HallucinationType::FactualError), 1);
        assert_eq!(result.recommendation, Recommendation::Reject);
    }

    #[tokio::test]
    async fn test_slow_check_times_out() {
        let config = RuntimeConfig::default().with_check_timeout(Duration::from_millis(20));
        let validator = with_custom(
            "slow",
            Arc::new(SlowValidator {
                delay: Duration::from_millis(200),
            }),
            config,
        );

        let result = validator.validate_text("slow", "Cokolwiek", "").await;
        assert_eq!(result.validator_used, "slow");
        assert_eq!(result.timed_out_checks, vec!["slow_lookup".to_string()]);
        assert!(result.matched_patterns.is_empty());
        assert!((result.confidence - 0.95).abs() < 1e-9);
        assert_eq!(result.recommendation, Recommendation::Accept);

        // Incomplete results are not cached
        assert_eq!(cached_entries(&validator).await, 0);
        assert_eq!(validator.stats().timed_out_checks, 1);
    }

    #[tokio::test]
    async fn test_fast_custom_check_completes() {
        let validator = with_custom(
            "slow",
            Arc::new(SlowValidator {
                delay: Duration::from_millis(1),
            }),
            RuntimeConfig::default(),
        );

        let result = validator.validate_text("slow", "Cokolwiek", "").await;
        assert!(result.timed_out_checks.is_empty());
        assert_eq!(result.confidence, 1.0);
        assert_eq!(cached_entries(&validator).await, 1);
    }

    #[tokio::test]
    async fn test_panicking_check_falls_back() {
        let validator = with_custom("panicking", Arc::new(PanickingValidator), RuntimeConfig::default());

        let result = validator.validate_text("panicking", "Cokolwiek", "").await;
        assert_eq!(result.validator_used, FALLBACK_VALIDATOR);
        assert_eq!(result.recommendation, Recommendation::Warn);
        assert_eq!(cached_entries(&validator).await, 0);
    }

    #[tokio::test]
    async fn test_circuit_opens_after_repeated_failures() {
        let config = RuntimeConfig::default().with_circuit_breaker(CircuitBreakerConfig {
            failure_threshold: 2,
            ..Default::default()
        });
        let validator = with_custom("panicking", Arc::new(PanickingValidator), config);

        for attempt in 0..2 {
            let response = format!("odpowiedź {}", attempt);
            validator.validate_text("panicking", &response, "").await;
        }
        assert!(validator.circuit_breaker().is_open("panicking"));
        assert!(!validator.circuit_breaker().is_open("chef"));

        let result = validator.validate_text("panicking", "kolejna", "").await;
        assert_eq!(result.validator_used, FALLBACK_VALIDATOR);
        assert_eq!(validator.stats().fallbacks, 3);

        // Other agents are unaffected
        let weather = validator.validate_text("weather", "Będzie 22 stopni", "").await;
        assert_eq!(weather.recommendation, Recommendation::Accept);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let validator = builtin(RuntimeConfig::default());
        let token = CancellationToken::new();
        token.cancel();

        let result = validator
            .validate_until_cancelled(receipt_request("Razem 8.49 zł"), &token)
            .await;
        assert!(result.is_none());
        assert_eq!(cached_entries(&validator).await, 0);
        assert_eq!(validator.stats().total, 0);
    }

    #[tokio::test]
    async fn test_cancelled_mid_validation() {
        let validator = with_custom(
            "slow",
            Arc::new(SlowValidator {
                delay: Duration::from_millis(200),
            }),
            RuntimeConfig::default(),
        );
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = validator
            .validate_until_cancelled(ValidationRequest::new("slow", "Cokolwiek"), &token)
            .await;
        assert!(result.is_none());
        assert_eq!(cached_entries(&validator).await, 0);
    }

    #[tokio::test]
    async fn test_not_cancelled_returns_result() {
        let validator = builtin(RuntimeConfig::default());
        let token = CancellationToken::new();

        let result = validator
            .validate_until_cancelled(receipt_request("Razem 8.49 zł"), &token)
            .await;
        assert_eq!(result.map(|r| r.recommendation), Some(Recommendation::Accept));
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let validator = builtin(RuntimeConfig::default());
        let request = receipt_request("Razem 8.49 zł");

        validator.validate(request.clone()).await;
        validator.validate(receipt_request("Razem 20.00 zł")).await;
        assert_eq!(cached_entries(&validator).await, 2);

        validator.invalidate(&request).await;
        assert_eq!(cached_entries(&validator).await, 1);

        validator.validate(request).await;
        assert_eq!(validator.stats().cache_hits, 0);

        validator.clear_cache();
        assert_eq!(cached_entries(&validator).await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_requests() {
        let validator = Arc::new(builtin(RuntimeConfig::default()));
        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let validator = Arc::clone(&validator);
                tokio::spawn(async move {
                    let response = format!("Będzie {} stopni", 10 + i);
                    validator.validate_text("weather", &response, "").await
                })
            })
            .collect();

        for task in join_all(tasks).await {
            assert_eq!(task.unwrap().recommendation, Recommendation::Accept);
        }
        assert_eq!(validator.stats().total, 8);
    }

    #[test]
    fn test_request_into_input() {
        let input = ValidationRequest::new("chef", "tekst")
            .with_context("kontekst")
            .with_level(ValidationLevel::Lenient)
            .with_hint("available_ingredients", json!(["mąka"]))
            .into_input();

        assert_eq!(input.agent_type, "chef");
        assert_eq!(input.context, "kontekst");
        assert!(input.hints.get("available_ingredients").is_some());
    }
}
