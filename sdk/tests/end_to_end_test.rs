use agents::provider::{AgentError, EmbeddingProvider, ScriptedLlm};
use async_trait::async_trait;
use scholia_core::config::AppConfig;
use scholia_core::model::InsightType;
use scholia_sdk::{ModelConfig, Scholia, ScholiaRuntime};
use selector::source::{CandidatePaper, StaticBibliographicSource, StaticFulltextSource};
use std::sync::Arc;
use storage::repo::{GraphRepository, MemoryRepository};
use tempfile::tempdir;

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
        let vector = if text.starts_with("MethodA") {
            vec![1.0, 0.0, 0.0, 0.0]
        } else if text.starts_with("MethodB") {
            vec![0.0, 1.0, 0.0, 0.0]
        } else if text.starts_with("MethodC") {
            vec![0.0, 0.0, 1.0, 0.0]
        } else {
            vec![0.0, 0.0, 0.0, 1.0]
        };
        Ok(vector)
    }
}

fn candidate(id: &str, title: &str, abstract_text: &str) -> CandidatePaper {
    CandidatePaper {
        stable_id: id.to_string(),
        title: title.to_string(),
        abstract_text: abstract_text.to_string(),
        year: Some(2024),
        source: "semantic_scholar".to_string(),
        external_ids: Default::default(),
    }
}

fn scripted_llm() -> Arc<ScriptedLlm> {
    let llm = Arc::new(ScriptedLlm::new("{}"));

    llm.script_text(
        r#""paper_id":"paper-a","sections""#,
        r#"{"entities": [
            {"name": "MethodA", "entity_type": "method", "confidence": 0.92, "section_type": "abstract"},
            {"name": "MethodB", "entity_type": "method", "confidence": 0.9, "section_type": "abstract"}
        ]}"#,
    );
    llm.script_text(
        r#""mode":"normal","paper_id":"paper-a""#,
        r#"{"relationships": [
            {"source_name": "MethodA", "target_name": "MethodB", "relation": "improves_on",
             "confidence": 0.9, "evidence": "MethodA improves on MethodB", "section_type": "abstract"}
        ]}"#,
    );

    llm.script_text(
        r#""paper_id":"paper-b","sections""#,
        r#"{"entities": [
            {"name": "MethodB", "entity_type": "method", "confidence": 0.9, "section_type": "abstract"},
            {"name": "MethodC", "entity_type": "method", "confidence": 0.88, "section_type": "abstract"}
        ]}"#,
    );
    llm.script_text(
        r#""mode":"normal","paper_id":"paper-b""#,
        r#"{"relationships": [
            {"source_name": "MethodB", "target_name": "MethodC", "relation": "improves_on",
             "confidence": 0.7, "evidence": "MethodB improves on MethodC", "section_type": "abstract"}
        ]}"#,
    );

    llm
}

fn build_scholia(repo: Arc<MemoryRepository>, cache_root: &std::path::Path) -> Scholia {
    let mut config = AppConfig::default();
    config.cache_root = Some(cache_root.display().to_string());

    let runtime = ScholiaRuntime::new(config);
    Scholia::new(
        runtime,
        repo,
        scripted_llm(),
        Arc::new(OrthogonalEmbedder),
        Arc::new(StaticBibliographicSource::new("semantic_scholar")),
        Arc::new(StaticFulltextSource::new("arxiv")),
        ModelConfig::default(),
        None,
    )
}

#[tokio::test]
async fn corpus_run_ingests_reasons_and_dedupes() {
    let dir = tempdir().unwrap();
    let repo = Arc::new(MemoryRepository::new());
    let scholia = build_scholia(repo.clone(), dir.path());

    let papers = vec![
        candidate("paper-a", "Paper A", "MethodA improves on MethodB."),
        candidate("paper-b", "Paper B", "MethodB improves on MethodC."),
    ];

    let summary = scholia.run_corpus(&papers).await.unwrap();
    assert_eq!(summary.outcomes.len(), 2);
    assert!(summary.outcomes.iter().all(|o| o.success));

    // MethodB is shared: three method nodes total, two improvement edges.
    let graph = repo.get_graph_data().await.unwrap();
    assert_eq!(graph.nodes.len(), 3);
    assert_eq!(graph.edges.len(), 2);

    // The cross-paper chain produced one transitive insight at
    // min(0.9, 0.7) * 0.9.
    assert_eq!(summary.insights_count, 1);
    let insights = repo.get_insights().await.unwrap();
    assert_eq!(insights[0].insight_type, InsightType::TransitiveRelationship);
    assert!((insights[0].confidence - 0.63).abs() < 1e-6);

    // A clean graph dedupes to nothing.
    let dedupe = scholia.run_dedupe(false).await.unwrap();
    assert!(dedupe.merge_map.merges.is_empty());

    let metrics = scholia.metrics();
    assert_eq!(metrics.papers_succeeded, 2);
    assert_eq!(metrics.insights_emitted, 1);
}

#[tokio::test]
async fn rerunning_a_corpus_is_incremental() {
    let dir = tempdir().unwrap();
    let repo = Arc::new(MemoryRepository::new());
    let scholia = build_scholia(repo.clone(), dir.path());

    let papers = vec![candidate("paper-a", "Paper A", "MethodA improves on MethodB.")];

    let first = scholia.run_corpus(&papers).await.unwrap();
    assert!(!first.outcomes[0].stats.skipped);

    let second = scholia.run_corpus(&papers).await.unwrap();
    assert!(second.outcomes[0].stats.skipped);
    assert_eq!(second.insights_count, 0, "skipped papers trigger no reasoning");

    assert_eq!(repo.get_graph_data().await.unwrap().nodes.len(), 2);
}

#[tokio::test]
async fn cancellation_stops_the_pipeline() {
    let dir = tempdir().unwrap();
    let repo = Arc::new(MemoryRepository::new());
    let scholia = build_scholia(repo.clone(), dir.path());
    scholia.cancel_token().cancel();

    let papers = vec![candidate("paper-a", "Paper A", "MethodA improves on MethodB.")];
    let summary = scholia.run_corpus(&papers).await.unwrap();
    assert!(!summary.outcomes[0].success);
    assert_eq!(summary.insights_count, 0);
}
