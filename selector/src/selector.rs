use crate::gating::{gate, GatingConfig, RetrievalStats, ScoredCandidate, TemporalRerank};
use crate::source::{BibliographicSource, CandidatePaper, FulltextSource, SourceError};
use agents::embedder::EmbeddingClient;
use agents::provider::AgentError;
use futures::future::BoxFuture;
use runtime::cancel::{self, CancellationToken};
use runtime::limiter::{LaneLimiter, LANE_SOURCE_BIBLIOGRAPHIC, LANE_SOURCE_FULLTEXT};
use runtime::retry::{with_retry, RetryPolicy};
use scholia_core::model::Paper;
use scholia_core::vecmath::cosine_similarity;
use std::collections::HashMap;
use std::sync::Arc;
use storage::repo::{GraphRepository, RepoError};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum SelectorError {
    #[error("embedding failed: {0}")]
    Embedding(#[from] AgentError),
    #[error("repository error: {0}")]
    Repo(#[from] RepoError),
    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct SelectorConfig {
    pub threshold: f32,
    pub max_candidates_to_embed: usize,
    pub max_selected: usize,
    /// Keyword queries issued against the bibliographic source.
    pub keyword_queries: Vec<String>,
    /// Per sub-query result cap.
    pub per_query_limit: usize,
    pub rerank: Option<TemporalRerank>,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            threshold: 0.7,
            max_candidates_to_embed: 500,
            max_selected: 100,
            keyword_queries: Vec::new(),
            per_query_limit: 50,
            rerank: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SelectionOutcome {
    pub seed: CandidatePaper,
    pub selected: Vec<ScoredCandidate>,
    pub stats: RetrievalStats,
}

/// Two-phase corpus selection: high-recall best-effort retrieval, then the
/// authoritative deterministic semantic gate. The final selection is
/// invariant to which source returned which candidate.
pub struct CorpusSelector {
    bibliographic: Arc<dyn BibliographicSource>,
    fulltext: Arc<dyn FulltextSource>,
    embedder: Arc<EmbeddingClient>,
    repo: Arc<dyn GraphRepository>,
    limiter: Arc<LaneLimiter>,
    retry: RetryPolicy,
    config: SelectorConfig,
}

impl CorpusSelector {
    pub fn new(
        bibliographic: Arc<dyn BibliographicSource>,
        fulltext: Arc<dyn FulltextSource>,
        embedder: Arc<EmbeddingClient>,
        repo: Arc<dyn GraphRepository>,
        limiter: Arc<LaneLimiter>,
        config: SelectorConfig,
    ) -> Self {
        Self {
            bibliographic,
            fulltext,
            embedder,
            repo,
            limiter,
            retry: RetryPolicy::default(),
            config,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn select(
        &self,
        seed_title: &str,
        seed_authors: &[String],
        cancel_token: &CancellationToken,
    ) -> Result<SelectionOutcome, SelectorError> {
        cancel::check(cancel_token).map_err(|_| SelectorError::Cancelled)?;

        let seed = self.resolve_seed(seed_title, seed_authors).await;
        info!(seed_id = %seed.stable_id, "seed resolved");

        let mut stats = RetrievalStats::default();
        let pooled = self.retrieve(&seed, &mut stats).await;
        stats.pooled = pooled.len();
        cancel::check(cancel_token).map_err(|_| SelectorError::Cancelled)?;

        let seed_embedding = self.seed_embedding(&seed, cancel_token).await?;

        // Deterministic candidate order before the embed cap.
        let mut candidates: Vec<CandidatePaper> = pooled
            .into_iter()
            .filter(|c| c.stable_id != seed.stable_id)
            .collect();
        candidates.sort_by(|a, b| a.stable_id.cmp(&b.stable_id));
        candidates.truncate(self.config.max_candidates_to_embed);

        let texts: Vec<String> = candidates.iter().map(|c| c.embed_text()).collect();
        let vectors = self.embedder.embed(&texts, cancel_token).await?;
        stats.embedded = vectors.len();

        let scored: Vec<ScoredCandidate> = candidates
            .into_iter()
            .zip(vectors)
            .filter_map(|(candidate, vector)| {
                match cosine_similarity(&seed_embedding, &vector) {
                    Some(similarity) => Some(ScoredCandidate {
                        candidate,
                        similarity,
                        is_seed: false,
                    }),
                    None => {
                        warn!(id = %candidate.stable_id, "dimension mismatch, skipping candidate");
                        None
                    }
                }
            })
            .collect();

        let gating = GatingConfig {
            threshold: self.config.threshold,
            max_selected: self.config.max_selected,
            rerank: self.config.rerank,
        };
        let selected = gate(seed.clone(), scored, &gating, &mut stats);

        info!(
            pooled = stats.pooled,
            embedded = stats.embedded,
            passing = stats.passing,
            selected = stats.selected,
            "corpus selection complete"
        );

        Ok(SelectionOutcome {
            seed,
            selected,
            stats,
        })
    }

    /// Seed lookup: primary source, full-text fallback, else synthesized
    /// from the title so gating can still anchor on it.
    async fn resolve_seed(&self, title: &str, authors: &[String]) -> CandidatePaper {
        let primary = with_retry(self.retry, || {
            self.limiter.limit(
                LANE_SOURCE_BIBLIOGRAPHIC,
                self.bibliographic.lookup_seed(title, authors),
            )
        })
        .await;

        match primary {
            Ok(Some(seed)) => return seed,
            Ok(None) => {}
            Err(err) => warn!(%err, "primary seed lookup failed"),
        }

        let fallback = with_retry(self.retry, || {
            self.limiter
                .limit(LANE_SOURCE_FULLTEXT, self.fulltext.lookup_seed(title))
        })
        .await;

        match fallback {
            Ok(Some(seed)) => seed,
            Ok(None) | Err(_) => {
                warn!(title, "seed not found in any source, synthesizing");
                CandidatePaper {
                    stable_id: CandidatePaper::stable_id_for(None, title),
                    title: title.to_string(),
                    abstract_text: String::new(),
                    year: None,
                    source: "synthetic".to_string(),
                    external_ids: Default::default(),
                }
            }
        }
    }

    /// High-recall fan-out. Every sub-query retries independently and fails
    /// independently; a failure records a zero count and never aborts the
    /// phase.
    async fn retrieve(
        &self,
        seed: &CandidatePaper,
        stats: &mut RetrievalStats,
    ) -> Vec<CandidatePaper> {
        type QueryResult = (String, Result<Vec<CandidatePaper>, SourceError>);
        let limit = self.config.per_query_limit;
        let mut queries: Vec<BoxFuture<'_, QueryResult>> = Vec::new();

        let biblio_seed_id = seed
            .external_ids
            .get("semantic_scholar")
            .cloned()
            .or_else(|| (seed.source == self.bibliographic.name()).then(|| seed.stable_id.clone()));

        if let Some(seed_id) = biblio_seed_id {
            let citations_id = seed_id.clone();
            queries.push(Box::pin(async move {
                let out = with_retry(self.retry, || {
                    self.limiter.limit(
                        LANE_SOURCE_BIBLIOGRAPHIC,
                        self.bibliographic.citations(&citations_id, limit),
                    )
                })
                .await;
                ("ss_citations".to_string(), out)
            }));

            let references_id = seed_id;
            queries.push(Box::pin(async move {
                let out = with_retry(self.retry, || {
                    self.limiter.limit(
                        LANE_SOURCE_BIBLIOGRAPHIC,
                        self.bibliographic.references(&references_id, limit),
                    )
                })
                .await;
                ("ss_references".to_string(), out)
            }));
        } else {
            stats.per_source.insert("ss_citations".to_string(), 0);
            stats.per_source.insert("ss_references".to_string(), 0);
        }

        for (i, keyword) in self.config.keyword_queries.iter().enumerate() {
            queries.push(Box::pin(async move {
                let out = with_retry(self.retry, || {
                    self.limiter.limit(
                        LANE_SOURCE_BIBLIOGRAPHIC,
                        self.bibliographic.search(keyword, limit),
                    )
                })
                .await;
                (format!("ss_keyword_{i}"), out)
            }));
        }

        let title = seed.title.clone();
        queries.push(Box::pin(async move {
            let out = with_retry(self.retry, || {
                self.limiter
                    .limit(LANE_SOURCE_FULLTEXT, self.fulltext.search(&title, limit))
            })
            .await;
            ("arxiv".to_string(), out)
        }));

        let results = futures::future::join_all(queries).await;

        let mut pooled: HashMap<String, CandidatePaper> = HashMap::new();
        for (name, result) in results {
            match result {
                Ok(papers) => {
                    stats.per_source.insert(name, papers.len());
                    for paper in papers {
                        pooled.entry(paper.stable_id.clone()).or_insert(paper);
                    }
                }
                Err(err) => {
                    warn!(query = %name, %err, "retrieval sub-query failed");
                    stats.per_source.insert(name, 0);
                }
            }
        }

        pooled.into_values().collect()
    }

    /// Cached seed embedding: repository first, compute on miss, persist
    /// best-effort.
    async fn seed_embedding(
        &self,
        seed: &CandidatePaper,
        cancel_token: &CancellationToken,
    ) -> Result<Vec<f32>, SelectorError> {
        if let Some(existing) = self.repo.get_paper_embedding(&seed.stable_id).await? {
            return Ok(existing);
        }

        let embedding = self.embedder.embed_one(&seed.embed_text(), cancel_token).await?;

        let mut paper = Paper::new(seed.stable_id.clone(), seed.title.clone());
        paper.abstract_text = seed.abstract_text.clone();
        paper.year = seed.year;
        paper.external_ids = seed.external_ids.clone();
        if let Err(err) = self.repo.upsert_paper(paper).await {
            warn!(%err, "could not persist seed paper");
        } else if let Err(err) = self
            .repo
            .upsert_paper_embedding(&seed.stable_id, embedding.clone())
            .await
        {
            warn!(%err, "could not persist seed embedding");
        }

        Ok(embedding)
    }
}
