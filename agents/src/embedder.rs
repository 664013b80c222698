use crate::provider::{AgentError, EmbeddingProvider};
use runtime::cache::{AgentCache, CacheEntry};
use runtime::cancel::{self, CancellationToken};
use runtime::limiter::{LaneLimiter, LANE_EMBED};
use scholia_core::hashing::agent_cache_key;
use scholia_core::metrics::MetricsCollector;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

const EMBED_AGENT_NAME: &str = "embed";
const EMBED_PROMPT_VERSION: &str = "1";
const EMBED_SCHEMA_VERSION: &str = "1";

/// Batched, cached embedding generation. Identical texts are computed once;
/// cached vectors are shared across callers through L1.
pub struct EmbeddingClient {
    provider: Arc<dyn EmbeddingProvider>,
    model: String,
    cache: Arc<AgentCache>,
    limiter: Arc<LaneLimiter>,
    metrics: MetricsCollector,
    batch_size: usize,
}

impl EmbeddingClient {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        model: impl Into<String>,
        cache: Arc<AgentCache>,
        limiter: Arc<LaneLimiter>,
        metrics: MetricsCollector,
        batch_size: usize,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            cache,
            limiter,
            metrics,
            batch_size: batch_size.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    /// Embed `texts`, preserving input order: the i-th output vector belongs
    /// to `texts[i]`. Empty input returns empty output without I/O.
    pub async fn embed(
        &self,
        texts: &[String],
        cancel_token: &CancellationToken,
    ) -> Result<Vec<Vec<f32>>, AgentError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        cancel::check(cancel_token).map_err(|_| AgentError::Cancelled)?;

        // Dedupe while remembering where each input maps.
        let mut unique: Vec<&String> = Vec::new();
        let mut position: HashMap<&String, usize> = HashMap::new();
        let mut mapping: Vec<usize> = Vec::with_capacity(texts.len());
        for text in texts {
            let idx = *position.entry(text).or_insert_with(|| {
                unique.push(text);
                unique.len() - 1
            });
            mapping.push(idx);
        }

        let mut vectors: Vec<Option<Vec<f32>>> = vec![None; unique.len()];
        let mut misses: Vec<usize> = Vec::new();

        for (idx, text) in unique.iter().enumerate() {
            let key = self.key_for(text);
            match self.cache.get(&key).await? {
                Some(entry) => {
                    let vector: Vec<f32> = serde_json::from_value(entry.output)
                        .map_err(|err| AgentError::SchemaInvalid(format!("cached vector: {err}")))?;
                    self.metrics.record_embed_cache(true);
                    vectors[idx] = Some(vector);
                }
                None => {
                    self.metrics.record_embed_cache(false);
                    misses.push(idx);
                }
            }
        }

        debug!(
            total = texts.len(),
            unique = unique.len(),
            misses = misses.len(),
            "embedding batch"
        );

        for chunk in misses.chunks(self.batch_size) {
            cancel::check(cancel_token).map_err(|_| AgentError::Cancelled)?;

            // One lane admission per batched request; a single failing text
            // fails the whole batch.
            let computed: Result<Vec<(usize, Vec<f32>)>, AgentError> = self
                .limiter
                .limit(LANE_EMBED, async {
                    let mut out = Vec::with_capacity(chunk.len());
                    for idx in chunk {
                        let vector = self.provider.embed(&self.model, unique[*idx]).await?;
                        out.push((*idx, vector));
                    }
                    Ok(out)
                })
                .await;

            for (idx, vector) in computed? {
                let key = self.key_for(unique[idx]);
                let entry = CacheEntry::new(json!(vector), 0, None);
                self.cache.put(&key, &entry).await?;
                vectors[idx] = Some(vector);
            }
        }

        let resolved: Vec<Vec<f32>> = vectors
            .into_iter()
            .map(|v| v.expect("every unique text resolved"))
            .collect();

        Ok(mapping.into_iter().map(|idx| resolved[idx].clone()).collect())
    }

    /// Convenience wrapper for one text.
    pub async fn embed_one(
        &self,
        text: &str,
        cancel_token: &CancellationToken,
    ) -> Result<Vec<f32>, AgentError> {
        let out = self.embed(&[text.to_string()], cancel_token).await?;
        Ok(out.into_iter().next().unwrap_or_default())
    }

    fn key_for(&self, text: &str) -> String {
        agent_cache_key(
            self.provider.name(),
            &self.model,
            EMBED_AGENT_NAME,
            EMBED_PROMPT_VERSION,
            EMBED_SCHEMA_VERSION,
            &Value::String(text.to_string()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::DeterministicEmbeddingProvider;
    use tempfile::tempdir;

    fn client(
        provider: Arc<DeterministicEmbeddingProvider>,
        root: &std::path::Path,
        batch_size: usize,
    ) -> EmbeddingClient {
        let metrics = MetricsCollector::new();
        EmbeddingClient::new(
            provider,
            "embed-model",
            Arc::new(AgentCache::new(root, metrics.clone())),
            Arc::new(LaneLimiter::default()),
            metrics,
            batch_size,
        )
    }

    #[tokio::test]
    async fn preserves_input_order_and_dedupes() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(DeterministicEmbeddingProvider::new(8));
        let client = client(provider.clone(), dir.path(), 32);
        let cancel_token = CancellationToken::new();

        let texts = vec![
            "alpha".to_string(),
            "beta".to_string(),
            "alpha".to_string(),
        ];
        let vectors = client.embed(&texts, &cancel_token).await.unwrap();

        assert_eq!(vectors.len(), 3);
        assert_eq!(vectors[0], vectors[2]);
        assert_ne!(vectors[0], vectors[1]);
        // "alpha" computed once despite appearing twice.
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn second_call_is_served_entirely_from_cache() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(DeterministicEmbeddingProvider::new(8));
        let client = client(provider.clone(), dir.path(), 32);
        let cancel_token = CancellationToken::new();

        let texts = vec!["alpha".to_string(), "beta".to_string()];
        let first = client.embed(&texts, &cancel_token).await.unwrap();
        assert_eq!(provider.call_count(), 2);

        let second = client.embed(&texts, &cancel_token).await.unwrap();
        assert_eq!(provider.call_count(), 2, "no provider calls on warm cache");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn empty_input_is_free() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(DeterministicEmbeddingProvider::new(8));
        let client = client(provider.clone(), dir.path(), 32);
        let cancel_token = CancellationToken::new();

        let out = client.embed(&[], &cancel_token).await.unwrap();
        assert!(out.is_empty());
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn small_batches_cover_all_misses() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(DeterministicEmbeddingProvider::new(4));
        let client = client(provider.clone(), dir.path(), 2);
        let cancel_token = CancellationToken::new();

        let texts: Vec<String> = (0..5).map(|i| format!("text-{i}")).collect();
        let vectors = client.embed(&texts, &cancel_token).await.unwrap();
        assert_eq!(vectors.len(), 5);
        assert_eq!(provider.call_count(), 5);
    }
}
