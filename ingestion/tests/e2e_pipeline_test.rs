use agents::embedder::EmbeddingClient;
use agents::provider::{AgentError, EmbeddingProvider, ScriptedLlm};
use agents::runner::AgentRunner;
use async_trait::async_trait;
use ingestion::orchestrator::{PaperInput, PipelineOptions, PipelineOrchestrator};
use ingestion::resolver::{EntityResolver, ResolverConfig};
use ingestion::validator::ValidatorConfig;
use runtime::cache::{AgentCache, DerivedCache};
use runtime::cancel::CancellationToken;
use runtime::limiter::LaneLimiter;
use scholia_core::metrics::MetricsCollector;
use scholia_core::model::ReviewStatus;
use std::sync::Arc;
use storage::repo::{GraphRepository, MemoryRepository};
use tempfile::tempdir;

/// Orthogonal vectors per known entity keep resolution from proposing
/// spurious merges in these scenarios.
struct OrthogonalEmbedder;

#[async_trait]
impl EmbeddingProvider for OrthogonalEmbedder {
    fn name(&self) -> &str {
        "orthogonal"
    }

    fn dimension(&self) -> usize {
        4
    }

    async fn embed(&self, _model: &str, text: &str) -> Result<Vec<f32>, AgentError> {
        let vector = if text.starts_with("GridSplat") {
            vec![1.0, 0.0, 0.0, 0.0]
        } else if text.starts_with("PointRend") {
            vec![0.0, 1.0, 0.0, 0.0]
        } else if text.starts_with("CityScenes") {
            vec![0.0, 0.0, 1.0, 0.0]
        } else {
            vec![0.0, 0.0, 0.0, 1.0]
        };
        Ok(vector)
    }
}

const FULL_TEXT: &str = "GridSplat is a fast point rendering method. \
GridSplat improves on PointRend. We evaluate on the CityScenes dataset.";

fn scripted_llm() -> Arc<ScriptedLlm> {
    let llm = Arc::new(ScriptedLlm::new("{}"));

    llm.script_text(
        "full_text",
        r#"{"sections": [
            {"section_type": "abstract", "content": "GridSplat is a fast point rendering method."},
            {"section_type": "methods", "content": "GridSplat improves on PointRend. We evaluate on the CityScenes dataset."}
        ]}"#,
    );

    llm.script_text(
        "sections",
        r#"{"entities": [
            {"name": "GridSplat", "entity_type": "method", "confidence": 0.92, "section_type": "abstract"},
            {"name": "PointRend", "entity_type": "method", "confidence": 0.88, "section_type": "methods"},
            {"name": "CityScenes", "entity_type": "dataset", "confidence": 0.85, "section_type": "methods"}
        ]}"#,
    );

    llm.script_text(
        "known_entities",
        r#"{"relationships": [
            {"source_name": "GridSplat", "target_name": "PointRend", "relation": "improves_on",
             "confidence": 0.9, "evidence": "GridSplat improves on PointRend", "section_type": "methods"},
            {"source_name": "GridSplat", "target_name": "CityScenes", "relation": "evaluates",
             "confidence": 0.85, "evidence": "We evaluate on the CityScenes dataset", "section_type": "methods"}
        ]}"#,
    );

    llm
}

fn orchestrator(
    repo: Arc<MemoryRepository>,
    llm: Arc<ScriptedLlm>,
    cache_root: &std::path::Path,
) -> PipelineOrchestrator {
    let metrics = MetricsCollector::new();
    let limiter = Arc::new(LaneLimiter::default());
    let agent_cache = Arc::new(AgentCache::new(cache_root, metrics.clone()));
    let derived = Arc::new(DerivedCache::new(cache_root, metrics.clone()));

    let runner = Arc::new(AgentRunner::new(
        llm,
        "extract-model",
        agent_cache.clone(),
        limiter.clone(),
    ));
    let embedder = Arc::new(EmbeddingClient::new(
        Arc::new(OrthogonalEmbedder),
        "embed-model",
        agent_cache,
        limiter,
        metrics,
        32,
    ));
    let resolver = EntityResolver::new(repo.clone(), embedder, ResolverConfig::default());

    PipelineOrchestrator::new(repo, runner, derived, resolver, ValidatorConfig::default())
}

fn paper() -> PaperInput {
    let mut input = PaperInput::new("paper-1", "GridSplat: Fast Point Rendering");
    input.abstract_text = "GridSplat is a fast point rendering method.".to_string();
    input.full_text = Some(FULL_TEXT.to_string());
    input
}

#[tokio::test]
async fn full_pipeline_builds_nodes_edges_and_mentions() {
    let dir = tempdir().unwrap();
    let repo = Arc::new(MemoryRepository::new());
    let pipeline = orchestrator(repo.clone(), scripted_llm(), dir.path());

    let outcome = pipeline
        .run_pipeline(paper(), PipelineOptions::default(), &CancellationToken::new())
        .await;

    assert!(outcome.success, "pipeline failed: {:?}", outcome.error);
    assert_eq!(outcome.stats.sections, 2);
    assert_eq!(outcome.stats.entities_extracted, 3);
    assert_eq!(outcome.stats.entities_resolved, 3);
    assert_eq!(outcome.stats.edges_persisted, 2);

    let graph = repo.get_graph_data().await.unwrap();
    assert_eq!(graph.nodes.len(), 3);
    assert_eq!(graph.edges.len(), 2);
    assert!(graph.edges.iter().all(|e| e.review_status == ReviewStatus::Approved));
    assert!(graph
        .edges
        .iter()
        .all(|e| e.provenance.paper_id == "paper-1"));

    // GridSplat appears in both sections; its mentions say so.
    let gridsplat = graph
        .nodes
        .iter()
        .find(|n| n.canonical_name == "gridsplat")
        .unwrap();
    assert!(gridsplat.mention_count >= 2);

    let sections = repo.get_sections("paper-1").await.unwrap();
    assert_eq!(sections.len(), 2);
}

#[tokio::test]
async fn incremental_mode_skips_already_ingested_papers() {
    let dir = tempdir().unwrap();
    let repo = Arc::new(MemoryRepository::new());
    let llm = scripted_llm();
    let pipeline = orchestrator(repo.clone(), llm.clone(), dir.path());
    let cancel_token = CancellationToken::new();

    let first = pipeline
        .run_pipeline(paper(), PipelineOptions::default(), &cancel_token)
        .await;
    assert!(first.success);
    let calls_after_first = llm.call_count();

    let second = pipeline
        .run_pipeline(paper(), PipelineOptions::default(), &cancel_token)
        .await;
    assert!(second.success);
    assert!(second.stats.skipped);
    assert_eq!(llm.call_count(), calls_after_first, "skip must not call the model");

    let forced = pipeline
        .run_pipeline(
            paper(),
            PipelineOptions {
                force_reingest: true,
                ..PipelineOptions::default()
            },
            &cancel_token,
        )
        .await;
    assert!(forced.success);
    assert!(!forced.stats.skipped);
    // Re-running resolves to the same nodes instead of duplicating them.
    assert_eq!(repo.get_graph_data().await.unwrap().nodes.len(), 3);
    // And the agent outputs come from cache.
    assert_eq!(llm.call_count(), calls_after_first);
}

#[tokio::test]
async fn metadata_only_path_uses_the_abstract() {
    let dir = tempdir().unwrap();
    let repo = Arc::new(MemoryRepository::new());
    let llm = Arc::new(ScriptedLlm::new("{}"));
    llm.script_text(
        "sections",
        r#"{"entities": [
            {"name": "GridSplat", "entity_type": "method", "confidence": 0.9, "section_type": "abstract"}
        ]}"#,
    );
    llm.script_text("known_entities", r#"{"relationships": []}"#);
    let pipeline = orchestrator(repo.clone(), llm, dir.path());

    let mut input = paper();
    input.full_text = None;

    let outcome = pipeline
        .run_pipeline(input, PipelineOptions::default(), &CancellationToken::new())
        .await;

    assert!(outcome.success, "pipeline failed: {:?}", outcome.error);
    assert_eq!(outcome.stats.sections, 1);
    assert_eq!(outcome.stats.entities_resolved, 1);
    assert_eq!(outcome.stats.edges_persisted, 0);
}

#[tokio::test]
async fn cancellation_fails_the_paper_without_corrupting_state() {
    let dir = tempdir().unwrap();
    let repo = Arc::new(MemoryRepository::new());
    let pipeline = orchestrator(repo.clone(), scripted_llm(), dir.path());

    let cancel_token = CancellationToken::new();
    cancel_token.cancel();

    let outcome = pipeline
        .run_pipeline(paper(), PipelineOptions::default(), &cancel_token)
        .await;
    assert!(!outcome.success);
    assert_eq!(
        outcome.error.as_ref().map(|e| e.code),
        Some(scholia_core::error::ErrorCode::Cancelled)
    );
}
