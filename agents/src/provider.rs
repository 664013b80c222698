use async_trait::async_trait;
use runtime::cache::CacheError;
use scholia_core::error::Retriable;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    /// Network failure, timeout, 429 or 5xx from the provider.
    #[error("transport: {0}")]
    Transport(String),
    /// Authentication, quota or policy refusal.
    #[error("provider refused: {0}")]
    ProviderRefused(String),
    /// Output did not conform to the agent's schema.
    #[error("schema invalid: {0}")]
    SchemaInvalid(String),
    /// Output was cut off before completion.
    #[error("truncated output")]
    Truncated,
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("cancelled")]
    Cancelled,
}

impl Retriable for AgentError {
    fn is_retriable(&self) -> bool {
        matches!(self, AgentError::Transport(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    Refused,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::Refused => "refused",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    pub finish_reason: FinishReason,
    pub tokens_in: u32,
    pub tokens_out: u32,
}

/// A generative model used as a deterministic extractor.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn generate(
        &self,
        model: &str,
        system_prompt: &str,
        user_payload: &str,
    ) -> Result<Generation, AgentError>;
}

/// Embedding provider; dimension is fixed per model.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;
    fn dimension(&self) -> usize;
    async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>, AgentError>;
}

/// Hash-derived embeddings, reproducible across runs. Used for offline
/// operation and tests; similarity structure is meaningless but stable.
pub struct DeterministicEmbeddingProvider {
    dims: usize,
    calls: AtomicU32,
}

impl DeterministicEmbeddingProvider {
    pub fn new(dims: usize) -> Self {
        Self {
            dims: dims.max(1),
            calls: AtomicU32::new(0),
        }
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for DeterministicEmbeddingProvider {
    fn default() -> Self {
        Self::new(3072)
    }
}

#[async_trait]
impl EmbeddingProvider for DeterministicEmbeddingProvider {
    fn name(&self) -> &str {
        "deterministic"
    }

    fn dimension(&self) -> usize {
        self.dims
    }

    async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update(text.as_bytes());
        let digest = hasher.finalize();

        let mut out = Vec::with_capacity(self.dims);
        for i in 0..self.dims {
            let byte = digest[i % digest.len()];
            out.push((byte as f32 / 127.5) - 1.0);
        }
        Ok(out)
    }
}

/// Scripted responses keyed by a substring of the user payload, with a
/// default fallback. First match wins; each scripted entry is a queue so a
/// retry can observe a different response.
pub struct ScriptedLlm {
    responses: Mutex<HashMap<String, Vec<Generation>>>,
    fallback: Generation,
    calls: AtomicU32,
}

impl ScriptedLlm {
    pub fn new(fallback_text: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            fallback: Generation {
                text: fallback_text.into(),
                finish_reason: FinishReason::Stop,
                tokens_in: 0,
                tokens_out: 0,
            },
            calls: AtomicU32::new(0),
        }
    }

    /// Queue a response for payloads containing `needle`.
    pub fn script(&self, needle: impl Into<String>, generation: Generation) {
        self.responses
            .lock()
            .unwrap()
            .entry(needle.into())
            .or_default()
            .push(generation);
    }

    pub fn script_text(&self, needle: impl Into<String>, text: impl Into<String>) {
        self.script(
            needle,
            Generation {
                text: text.into(),
                finish_reason: FinishReason::Stop,
                tokens_in: 0,
                tokens_out: 0,
            },
        );
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        _model: &str,
        _system_prompt: &str,
        user_payload: &str,
    ) -> Result<Generation, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut responses = self.responses.lock().unwrap();
        // Most specific (longest) matching needle wins, deterministically.
        let best = responses
            .iter()
            .filter(|(needle, queue)| user_payload.contains(needle.as_str()) && !queue.is_empty())
            .map(|(needle, _)| needle.clone())
            .max_by_key(|needle| (needle.len(), needle.clone()));
        if let Some(needle) = best {
            if let Some(queue) = responses.get_mut(&needle) {
                if !queue.is_empty() {
                    return Ok(queue.remove(0));
                }
            }
        }
        Ok(self.fallback.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deterministic_embeddings_are_reproducible() {
        let provider = DeterministicEmbeddingProvider::new(8);
        let a = provider.embed("m1", "hello").await.unwrap();
        let b = provider.embed("m1", "hello").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn deterministic_embeddings_vary_with_model() {
        let provider = DeterministicEmbeddingProvider::new(8);
        let a = provider.embed("m1", "hello").await.unwrap();
        let b = provider.embed("m2", "hello").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn scripted_llm_drains_queued_responses_in_order() {
        let llm = ScriptedLlm::new("{}");
        llm.script(
            "extract",
            Generation {
                text: "first".to_string(),
                finish_reason: FinishReason::Length,
                tokens_in: 1,
                tokens_out: 1,
            },
        );
        llm.script_text("extract", "second");

        let first = llm.generate("m", "s", "please extract").await.unwrap();
        assert_eq!(first.text, "first");
        assert_eq!(first.finish_reason, FinishReason::Length);

        let second = llm.generate("m", "s", "please extract").await.unwrap();
        assert_eq!(second.text, "second");

        let fallback = llm.generate("m", "s", "please extract").await.unwrap();
        assert_eq!(fallback.text, "{}");
    }
}
