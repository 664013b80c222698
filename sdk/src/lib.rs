//! Facade wiring the runtime substrate, providers, repository and pipeline
//! stages into the three entry points callers use: corpus selection plus
//! per-paper ingestion, batch reasoning, and batch deduplication.

use agents::embedder::EmbeddingClient;
use agents::provider::{EmbeddingProvider, LlmProvider};
use agents::runner::AgentRunner;
use ingestion::dedupe::{run_dedupe, DedupeConfig, DedupeError, DedupeOutcome};
use ingestion::orchestrator::{
    PaperInput, PipelineOptions, PipelineOrchestrator, PipelineOutcome,
};
use ingestion::resolver::{EntityResolver, ResolverConfig};
use ingestion::validator::ValidatorConfig;
use reasoning::{run_reasoning_batch, ReasoningError, ReasoningOutcome};
use runtime::cache::{AgentCache, DerivedCache};
use runtime::cancel::CancellationToken;
use runtime::limiter::LaneLimiter;
use scholia_core::config::AppConfig;
use scholia_core::metrics::{MetricsCollector, MetricsSnapshot};
use selector::gating::TemporalRerank;
use selector::selector::{
    CorpusSelector, SelectionOutcome, SelectorConfig, SelectorError,
};
use selector::source::{BibliographicSource, CandidatePaper, FulltextSource};
use std::path::PathBuf;
use std::sync::Arc;
use storage::repo::GraphRepository;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Error, Debug)]
pub enum ScholiaError {
    #[error("selection failed: {0}")]
    Selection(#[from] SelectorError),
    #[error("reasoning failed: {0}")]
    Reasoning(#[from] ReasoningError),
    #[error("dedupe failed: {0}")]
    Dedupe(#[from] DedupeError),
}

/// Shared process-wide state: lanes, caches, counters, cancellation. There
/// are no hidden globals; everything flows from this object.
pub struct ScholiaRuntime {
    pub config: AppConfig,
    pub metrics: MetricsCollector,
    pub limiter: Arc<LaneLimiter>,
    pub agent_cache: Arc<AgentCache>,
    pub derived_cache: Arc<DerivedCache>,
    pub cancel: CancellationToken,
}

impl ScholiaRuntime {
    pub fn new(config: AppConfig) -> Self {
        let metrics = MetricsCollector::new();
        let limiter = Arc::new(LaneLimiter::from_config(&config.lanes));
        let cache_root = config
            .cache_root
            .clone()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let agent_cache = Arc::new(AgentCache::new(&cache_root, metrics.clone()));
        let derived_cache = Arc::new(DerivedCache::new(&cache_root, metrics.clone()));
        Self {
            config,
            metrics,
            limiter,
            agent_cache,
            derived_cache,
            cancel: CancellationToken::new(),
        }
    }
}

/// Model identifiers handed to the providers.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub llm_model: String,
    pub embed_model: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            llm_model: "extract-v1".to_string(),
            embed_model: "embed-v1".to_string(),
        }
    }
}

pub struct Scholia {
    runtime: ScholiaRuntime,
    repo: Arc<dyn GraphRepository>,
    corpus_selector: CorpusSelector,
    orchestrator: PipelineOrchestrator,
    /// Pipelines hold this shared; the deduper holds it exclusive, so no
    /// other writer mutates nodes or edges while a merge runs.
    dedupe_lock: RwLock<()>,
}

impl Scholia {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        runtime: ScholiaRuntime,
        repo: Arc<dyn GraphRepository>,
        llm: Arc<dyn LlmProvider>,
        embedding: Arc<dyn EmbeddingProvider>,
        bibliographic: Arc<dyn BibliographicSource>,
        fulltext: Arc<dyn FulltextSource>,
        models: ModelConfig,
        rerank: Option<TemporalRerank>,
    ) -> Self {
        let embedder = Arc::new(EmbeddingClient::new(
            embedding,
            models.embed_model.clone(),
            runtime.agent_cache.clone(),
            runtime.limiter.clone(),
            runtime.metrics.clone(),
            runtime.config.embed_batch_size,
        ));
        let agent_runner = Arc::new(AgentRunner::new(
            llm,
            models.llm_model.clone(),
            runtime.agent_cache.clone(),
            runtime.limiter.clone(),
        ));

        let selector_config = SelectorConfig {
            threshold: runtime.config.selection.semantic_threshold,
            max_candidates_to_embed: runtime.config.selection.max_candidates_to_embed,
            max_selected: runtime.config.selection.max_selected_papers,
            rerank,
            ..SelectorConfig::default()
        };
        let corpus_selector = CorpusSelector::new(
            bibliographic,
            fulltext,
            embedder.clone(),
            repo.clone(),
            runtime.limiter.clone(),
            selector_config,
        );

        let resolver = EntityResolver::new(repo.clone(), embedder, ResolverConfig::default());
        let orchestrator = PipelineOrchestrator::new(
            repo.clone(),
            agent_runner,
            runtime.derived_cache.clone(),
            resolver,
            ValidatorConfig::default(),
        );

        Self {
            runtime,
            repo,
            corpus_selector,
            orchestrator,
            dedupe_lock: RwLock::new(()),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.runtime.cancel.clone()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.runtime.metrics.snapshot()
    }

    /// Phase one: retrieve and gate a corpus around the seed.
    pub async fn select_corpus(
        &self,
        seed_title: &str,
        seed_authors: &[String],
    ) -> Result<SelectionOutcome, ScholiaError> {
        Ok(self
            .corpus_selector
            .select(seed_title, seed_authors, &self.runtime.cancel)
            .await?)
    }

    /// Ingest one paper through every stage.
    pub async fn run_pipeline(&self, input: PaperInput) -> PipelineOutcome {
        let _shared = self.dedupe_lock.read().await;
        let options = PipelineOptions {
            force_reingest: self.runtime.config.force_reingest,
            metric_focused: false,
        };
        let outcome = self
            .orchestrator
            .run_pipeline(input, options, &self.runtime.cancel)
            .await;
        self.runtime.metrics.record_paper(outcome.success);
        outcome
    }

    /// Ingest a selected corpus paper by paper, then reason over the
    /// successfully ingested ones. Reasoning is skipped when nothing
    /// succeeded.
    pub async fn run_corpus(
        &self,
        selected: &[CandidatePaper],
    ) -> Result<CorpusRunSummary, ScholiaError> {
        let mut outcomes = Vec::with_capacity(selected.len());
        for candidate in selected {
            let mut input = PaperInput::new(candidate.stable_id.clone(), candidate.title.clone());
            input.abstract_text = candidate.abstract_text.clone();
            input.year = candidate.year;
            input.external_ids = candidate.external_ids.clone();
            outcomes.push(self.run_pipeline(input).await);
        }

        let succeeded: Vec<String> = outcomes
            .iter()
            .filter(|o| o.success && !o.stats.skipped)
            .map(|o| o.paper_id.clone())
            .collect();
        let failed = outcomes.iter().filter(|o| !o.success).count();

        let reasoning = if succeeded.is_empty() {
            info!("no paper succeeded, skipping reasoning");
            ReasoningOutcome::default()
        } else {
            self.run_reasoning(&succeeded).await?
        };
        self.runtime
            .metrics
            .record_insights(reasoning.insights_count as u64);

        info!(
            selected = selected.len(),
            succeeded = succeeded.len(),
            failed,
            insights = reasoning.insights_count,
            "corpus run complete"
        );

        Ok(CorpusRunSummary {
            outcomes,
            insights_count: reasoning.insights_count,
        })
    }

    pub async fn run_reasoning(
        &self,
        affected_paper_ids: &[String],
    ) -> Result<ReasoningOutcome, ScholiaError> {
        let _shared = self.dedupe_lock.read().await;
        Ok(run_reasoning_batch(self.repo.as_ref(), affected_paper_ids).await?)
    }

    /// Batch merge of duplicate nodes, exclusive with every other writer.
    pub async fn run_dedupe(&self, dry_run: bool) -> Result<DedupeOutcome, ScholiaError> {
        let _exclusive = self.dedupe_lock.write().await;
        Ok(run_dedupe(self.repo.as_ref(), DedupeConfig { dry_run }).await?)
    }
}

#[derive(Debug, Clone)]
pub struct CorpusRunSummary {
    pub outcomes: Vec<PipelineOutcome>,
    pub insights_count: usize,
}
