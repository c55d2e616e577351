//! Interception of agent calls.
//!
//! Wraps whatever produces an agent's response so the response comes back
//! with validation metadata attached. Validation never turns a successful
//! call into an error; errors of the wrapped call pass through untouched.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

use groundcheck_core::{Hints, Recommendation, ValidationLevel, ValidationResult};

use crate::dispatcher::{UnifiedValidator, ValidationRequest};

/// What a wrapped agent call yields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub text: String,

    /// Material the agent worked from (receipt OCR, search results, ...)
    #[serde(default)]
    pub context: String,

    #[serde(default)]
    pub hints: Hints,
}

impl AgentOutput {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_hints(mut self, hints: Hints) -> Self {
        self.hints = hints;
        self
    }
}

impl From<String> for AgentOutput {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

impl From<&str> for AgentOutput {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

/// The fields attached to every validated response.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub confidence: f64,
    pub hallucination_score: f64,
    pub recommendation: Recommendation,

    /// True when the response was rejected
    pub flagged: bool,
}

impl From<&ValidationResult> for ResponseMetadata {
    fn from(result: &ValidationResult) -> Self {
        Self {
            confidence: result.confidence,
            hallucination_score: result.hallucination_score,
            recommendation: result.recommendation,
            flagged: result.is_rejected(),
        }
    }
}

/// An agent response together with its validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatedResponse {
    pub output: AgentOutput,
    pub metadata: ResponseMetadata,
    pub result: ValidationResult,
}

impl ValidatedResponse {
    pub fn is_flagged(&self) -> bool {
        self.metadata.flagged
    }
}

/// Await `produce`, validate what it returned as `agent_type`, and attach the
/// verdict. `level` overrides the agent's configured level.
pub async fn intercept<F, Fut, E>(
    validator: &UnifiedValidator,
    agent_type: &str,
    level: Option<ValidationLevel>,
    produce: F,
) -> Result<ValidatedResponse, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<AgentOutput, E>>,
{
    let output = produce().await?;

    let mut request = ValidationRequest::new(agent_type, output.text.as_str())
        .with_context(output.context.as_str())
        .with_hints(output.hints.clone());
    request.level = level;

    let result = validator.validate(request).await;
    let metadata = ResponseMetadata::from(&result);
    if metadata.flagged {
        tracing::warn!(
            agent_type = %agent_type,
            validator = %result.validator_used,
            hallucination_score = result.hallucination_score,
            matches = result.matched_patterns.len(),
            "Agent response flagged as hallucinated"
        );
    }

    Ok(ValidatedResponse {
        output,
        metadata,
        result,
    })
}

/// Anything that produces agent responses.
#[async_trait]
pub trait ResponseProducer: Send + Sync {
    type Error: Send;

    /// Agent type used to pick the validator.
    fn agent_type(&self) -> &str;

    async fn produce(&self, prompt: &str) -> Result<AgentOutput, Self::Error>;
}

/// Middleware validating every response of the wrapped producer.
pub struct Guarded<P> {
    producer: P,
    validator: Arc<UnifiedValidator>,
    level: Option<ValidationLevel>,
}

impl<P: ResponseProducer> Guarded<P> {
    pub fn new(producer: P, validator: Arc<UnifiedValidator>) -> Self {
        Self {
            producer,
            validator,
            level: None,
        }
    }

    pub fn with_level(mut self, level: ValidationLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn inner(&self) -> &P {
        &self.producer
    }

    pub async fn produce(&self, prompt: &str) -> Result<ValidatedResponse, P::Error> {
        intercept(&self.validator, self.producer.agent_type(), self.level, || {
            self.producer.produce(prompt)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RuntimeConfig;
    use groundcheck_core::HallucinationType;
    use serde_json::json;

    fn validator() -> Arc<UnifiedValidator> {
        Arc::new(UnifiedValidator::with_builtin_agents(RuntimeConfig::default()).unwrap())
    }

    /// Answers from a fixed script, failing on unknown prompts.
    struct ScriptedChef;

    #[async_trait]
    impl ResponseProducer for ScriptedChef {
        type Error = String;

        fn agent_type(&self) -> &str {
            "chef"
        }

        async fn produce(&self, prompt: &str) -> Result<AgentOutput, Self::Error> {
            let hints = Hints::new().with("available_ingredients", json!(["mąka", "jajka"]));
            match prompt {
                "naleśniki" => Ok(AgentOutput::new("Dodaj 200g mąki i 2 jajka.").with_hints(hints)),
                "gulasz" => Ok(AgentOutput::new("Dodaj 200g mąki i smaż 900 minut").with_hints(hints)),
                other => Err(format!("no recipe for {}", other)),
            }
        }
    }

    #[tokio::test]
    async fn test_rejected_response_is_flagged() {
        let validator = validator();
        let response = intercept(&validator, "receipt", None, || async {
            Ok::<_, String>(AgentOutput::new("Razem 20.00 zł").with_context("Chleb 4.50\nMleko 3.99"))
        })
        .await
        .unwrap();

        assert!(response.is_flagged());
        assert_eq!(response.metadata.recommendation, Recommendation::Reject);
        assert_eq!(response.metadata.confidence, response.result.confidence);
        assert_eq!(response.output.text, "Razem 20.00 zł");
        assert_eq!(response.result.count_of(HallucinationType::FactualError), 1);
    }

    #[tokio::test]
    async fn test_accepted_response_is_not_flagged() {
        let validator = validator();
        let response = intercept(&validator, "weather", None, || async {
            Ok::<_, String>(AgentOutput::from("Jutro 22 stopni i słońce."))
        })
        .await
        .unwrap();

        assert!(!response.is_flagged());
        assert_eq!(response.metadata.recommendation, Recommendation::Accept);
        assert_eq!(response.metadata.hallucination_score, 0.0);
    }

    #[tokio::test]
    async fn test_producer_error_passes_through() {
        let validator = validator();
        let outcome = intercept(&validator, "chef", None, || async { Err::<AgentOutput, _>("upstream timeout") }).await;

        assert_eq!(outcome.unwrap_err(), "upstream timeout");
        assert_eq!(validator.stats().total, 0);
    }

    #[tokio::test]
    async fn test_level_override() {
        let validator = validator();
        let produce = || async { Ok::<_, String>(AgentOutput::new("Odstaw na 72 godziny.")) };

        let strict = intercept(&validator, "chef", None, produce).await.unwrap();
        let lenient = intercept(&validator, "chef", Some(ValidationLevel::Lenient), produce)
            .await
            .unwrap();

        assert_eq!(strict.result.matched_patterns.len(), 1);
        assert!(lenient.result.matched_patterns.is_empty());
    }

    #[tokio::test]
    async fn test_guarded_producer() {
        let guarded = Guarded::new(ScriptedChef, validator());

        let good = guarded.produce("naleśniki").await.unwrap();
        assert!(!good.is_flagged());
        assert!(good.result.matched_patterns.is_empty());

        let bad = guarded.produce("gulasz").await.unwrap();
        assert!(bad.is_flagged());
        assert_eq!(bad.result.count_of(HallucinationType::FactualError), 1);

        let err = guarded.produce("sushi").await.unwrap_err();
        assert_eq!(err, "no recipe for sushi");
        assert_eq!(guarded.inner().agent_type(), "chef");
    }

    #[tokio::test]
    async fn test_metadata_serializes() {
        let validator = validator();
        let response = intercept(&validator, "generic", None, || async {
            Ok::<_, String>(AgentOutput::new("Dzień dobry"))
        })
        .await
        .unwrap();

        let json = serde_json::to_value(response.metadata).unwrap();
        assert_eq!(json["recommendation"], "ACCEPT");
        assert_eq!(json["flagged"], false);
    }
}
