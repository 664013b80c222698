use crate::prompts::{AgentSpec, DegradationMode, RELATIONSHIP_AGENT};
use crate::provider::{AgentError, FinishReason, LlmProvider};
use crate::schema::RelationshipExtraction;
use runtime::cache::{AgentCache, CacheEntry};
use runtime::cancel::{self, CancellationToken};
use runtime::limiter::{LaneLimiter, LANE_LLM};
use runtime::retry::{with_retry, RetryPolicy};
use scholia_core::hashing::agent_cache_key;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Deterministic LLM invocation: cache first, then the `llm` lane, strict
/// JSON parsing, and persistence of the parsed value.
pub struct AgentRunner {
    provider: Arc<dyn LlmProvider>,
    model: String,
    cache: Arc<AgentCache>,
    limiter: Arc<LaneLimiter>,
    retry: RetryPolicy,
}

impl AgentRunner {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        model: impl Into<String>,
        cache: Arc<AgentCache>,
        limiter: Arc<LaneLimiter>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            cache,
            limiter,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Run one agent invocation. On a cache hit the provider is not called.
    pub async fn run<T: DeserializeOwned>(
        &self,
        agent: &AgentSpec,
        system_prompt: &str,
        input: &Value,
        cancel_token: &CancellationToken,
    ) -> Result<T, AgentError> {
        cancel::check(cancel_token).map_err(|_| AgentError::Cancelled)?;

        let key = agent_cache_key(
            self.provider.name(),
            &self.model,
            agent.name,
            agent.prompt_version,
            agent.schema_version,
            input,
        );

        if let Some(entry) = self.cache.get(&key).await? {
            debug!(agent = agent.name, "agent cache hit");
            return serde_json::from_value(entry.output)
                .map_err(|err| AgentError::SchemaInvalid(format!("cached entry: {err}")));
        }

        let payload = input.to_string();
        let started = Instant::now();

        let generation = with_retry(self.retry, || {
            let payload = payload.clone();
            async move {
                cancel::check(cancel_token).map_err(|_| AgentError::Cancelled)?;
                self.limiter
                    .limit(LANE_LLM, self.provider.generate(&self.model, system_prompt, &payload))
                    .await
            }
        })
        .await?;

        match generation.finish_reason {
            FinishReason::Refused => {
                return Err(AgentError::ProviderRefused(
                    "model declined the extraction".to_string(),
                ))
            }
            FinishReason::Length => return Err(AgentError::Truncated),
            FinishReason::Stop => {}
        }

        let parsed_value = parse_json_payload(&generation.text)?;
        let parsed: T = serde_json::from_value(parsed_value.clone())
            .map_err(|err| AgentError::SchemaInvalid(err.to_string()))?;

        let entry = CacheEntry::new(
            parsed_value,
            started.elapsed().as_millis() as u64,
            Some(generation.finish_reason.as_str().to_string()),
        );
        self.cache.put(&key, &entry).await?;

        Ok(parsed)
    }

    /// Relationship extraction with the progressive-degradation ladder:
    /// normal, then compact (no evidence), then minimal (cap 8). Transport
    /// and refusal failures abort the ladder; truncation and schema
    /// failures step down.
    pub async fn run_relationships(
        &self,
        input: &Value,
        cancel_token: &CancellationToken,
    ) -> Result<RelationshipExtraction, AgentError> {
        let mut last_err = AgentError::SchemaInvalid("degradation ladder unentered".to_string());

        for mode in DegradationMode::LADDER {
            let mut mode_input = input.clone();
            if let Value::Object(map) = &mut mode_input {
                map.insert("mode".to_string(), Value::String(mode.tag().to_string()));
            }
            let prompt = crate::prompts::relationship_system_prompt(mode);

            match self
                .run::<RelationshipExtraction>(&RELATIONSHIP_AGENT, &prompt, &mode_input, cancel_token)
                .await
            {
                Ok(mut extraction) => {
                    if let Some(cap) = mode.item_cap() {
                        extraction.relationships.sort_by(|a, b| {
                            b.confidence
                                .partial_cmp(&a.confidence)
                                .unwrap_or(std::cmp::Ordering::Equal)
                        });
                        extraction.relationships.truncate(cap);
                    }
                    return Ok(extraction);
                }
                Err(err @ (AgentError::Truncated | AgentError::SchemaInvalid(_))) => {
                    warn!(mode = mode.tag(), %err, "relationship extraction degrading");
                    last_err = err;
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_err)
    }
}

/// Extract the JSON object from model text: tolerate surrounding prose and
/// markdown fences, require one well-formed object.
pub fn parse_json_payload(text: &str) -> Result<Value, AgentError> {
    let trimmed = text.trim();
    let candidate = if trimmed.starts_with('{') {
        trimmed.to_string()
    } else {
        let start = trimmed
            .find('{')
            .ok_or_else(|| AgentError::SchemaInvalid("no JSON object in output".to_string()))?;
        let end = trimmed
            .rfind('}')
            .ok_or_else(|| AgentError::SchemaInvalid("unterminated JSON object".to_string()))?;
        if end < start {
            return Err(AgentError::SchemaInvalid(
                "unterminated JSON object".to_string(),
            ));
        }
        trimmed[start..=end].to_string()
    };

    serde_json::from_str(&candidate).map_err(|err| AgentError::SchemaInvalid(err.to_string()))
}
