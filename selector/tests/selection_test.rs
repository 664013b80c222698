use agents::embedder::EmbeddingClient;
use agents::provider::DeterministicEmbeddingProvider;
use runtime::cache::AgentCache;
use runtime::cancel::CancellationToken;
use runtime::limiter::LaneLimiter;
use runtime::retry::RetryPolicy;
use scholia_core::metrics::MetricsCollector;
use selector::selector::{CorpusSelector, SelectorConfig};
use selector::source::{
    CandidatePaper, SourceError, StaticBibliographicSource, StaticFulltextSource,
};
use std::sync::Arc;
use std::time::Duration;
use storage::repo::{GraphRepository, MemoryRepository};
use tempfile::tempdir;

fn candidate(id: &str, title: &str, source: &str) -> CandidatePaper {
    CandidatePaper {
        stable_id: id.to_string(),
        title: title.to_string(),
        abstract_text: format!("{title} abstract"),
        year: Some(2023),
        source: source.to_string(),
        external_ids: Default::default(),
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        tries: 2,
        base: Duration::from_millis(1),
        max: Duration::from_millis(2),
    }
}

fn build_selector(
    bibliographic: StaticBibliographicSource,
    fulltext: StaticFulltextSource,
    repo: Arc<MemoryRepository>,
    cache_root: &std::path::Path,
    config: SelectorConfig,
) -> CorpusSelector {
    let metrics = MetricsCollector::new();
    let limiter = Arc::new(LaneLimiter::default());
    let embedder = Arc::new(EmbeddingClient::new(
        Arc::new(DeterministicEmbeddingProvider::new(64)),
        "embed-model",
        Arc::new(AgentCache::new(cache_root, metrics.clone())),
        limiter.clone(),
        metrics,
        32,
    ));
    CorpusSelector::new(
        Arc::new(bibliographic),
        Arc::new(fulltext),
        embedder,
        repo,
        limiter,
        config,
    )
    .with_retry_policy(fast_retry())
}

#[tokio::test]
async fn partial_source_failure_does_not_abort_selection() {
    let dir = tempdir().unwrap();
    let repo = Arc::new(MemoryRepository::new());

    // Primary source resolves the seed but its citations endpoint 500s.
    let mut bibliographic = StaticBibliographicSource::new("semantic_scholar");
    let mut seed = candidate("s2-seed", "3D Gaussian Splatting", "semantic_scholar");
    seed.external_ids
        .insert("semantic_scholar".to_string(), "s2-seed".to_string());
    bibliographic.seed = Some(seed);
    bibliographic.citation_results = Err(SourceError::Status(500));
    bibliographic.reference_results = Ok(vec![]);

    // Secondary source returns a healthy result set. With deterministic
    // hash embeddings, unrelated texts rarely clear a high threshold, so
    // gate at 0 and rely on the cap for this scenario.
    let mut fulltext = StaticFulltextSource::new("arxiv");
    fulltext.search_results = Ok((0..60)
        .map(|i| candidate(&format!("arxiv:{i}"), &format!("Splatting Variant {i}"), "arxiv"))
        .collect());

    let config = SelectorConfig {
        threshold: 0.0,
        max_selected: 20,
        ..SelectorConfig::default()
    };
    let corpus = build_selector(bibliographic, fulltext, repo.clone(), dir.path(), config);

    let outcome = corpus
        .select("3D Gaussian Splatting", &[], &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.seed.stable_id, "s2-seed");
    assert_eq!(outcome.stats.per_source.get("ss_citations"), Some(&0));
    assert!(outcome.stats.per_source.get("arxiv").copied().unwrap_or(0) >= 1);
    assert!(!outcome.selected.is_empty() && outcome.selected.len() <= 20);
    assert!(outcome.selected[0].is_seed);

    // Seed paper and its embedding were persisted for reuse.
    assert!(repo
        .get_paper_embedding("s2-seed")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn seed_falls_back_to_fulltext_lookup() {
    let dir = tempdir().unwrap();
    let repo = Arc::new(MemoryRepository::new());

    let mut bibliographic = StaticBibliographicSource::new("semantic_scholar");
    bibliographic.seed = None;
    let mut fulltext = StaticFulltextSource::new("arxiv");
    fulltext.seed = Some(candidate("arxiv:seed", "3D Gaussian Splatting", "arxiv"));

    let corpus = build_selector(
        bibliographic,
        fulltext,
        repo,
        dir.path(),
        SelectorConfig::default(),
    );

    let outcome = corpus
        .select("3D Gaussian Splatting", &[], &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.seed.stable_id, "arxiv:seed");
    assert_eq!(outcome.seed.source, "arxiv");
}

#[tokio::test]
async fn selection_is_deterministic_across_runs() {
    let dir = tempdir().unwrap();

    let run = |cache_root: std::path::PathBuf| async move {
        let repo = Arc::new(MemoryRepository::new());
        let mut bibliographic = StaticBibliographicSource::new("semantic_scholar");
        let mut seed = candidate("s2-seed", "Seed Paper", "semantic_scholar");
        seed.external_ids
            .insert("semantic_scholar".to_string(), "s2-seed".to_string());
        bibliographic.seed = Some(seed);
        bibliographic.citation_results =
            Ok((0..10).map(|i| candidate(&format!("c{i}"), &format!("Cited {i}"), "semantic_scholar")).collect());

        let mut fulltext = StaticFulltextSource::new("arxiv");
        fulltext.search_results =
            Ok((0..10).map(|i| candidate(&format!("a{i}"), &format!("Arxiv {i}"), "arxiv")).collect());

        let config = SelectorConfig {
            threshold: 0.0,
            max_selected: 5,
            ..SelectorConfig::default()
        };
        let corpus = build_selector(bibliographic, fulltext, repo, &cache_root, config);
        let outcome = corpus.select("Seed Paper", &[], &CancellationToken::new()).await.unwrap();
        outcome
            .selected
            .iter()
            .map(|s| s.candidate.stable_id.clone())
            .collect::<Vec<_>>()
    };

    let first = run(dir.path().to_path_buf()).await;
    let second = run(dir.path().to_path_buf()).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn synthesized_seed_when_no_source_knows_it() {
    let dir = tempdir().unwrap();
    let repo = Arc::new(MemoryRepository::new());

    let bibliographic = StaticBibliographicSource::new("semantic_scholar");
    let fulltext = StaticFulltextSource::new("arxiv");

    let corpus = build_selector(
        bibliographic,
        fulltext,
        repo,
        dir.path(),
        SelectorConfig::default(),
    );

    let outcome = corpus
        .select("A Completely Unknown Paper", &[], &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.seed.source, "synthetic");
    assert_eq!(outcome.selected.len(), 1, "only the seed passes");
}
