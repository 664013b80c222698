use async_trait::async_trait;
use scholia_core::error::Retriable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum SourceError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("source returned status {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl Retriable for SourceError {
    fn is_retriable(&self) -> bool {
        match self {
            SourceError::Transport(_) => true,
            SourceError::Status(code) => *code == 429 || *code >= 500,
            SourceError::Malformed(_) => false,
        }
    }
}

/// A paper as retrieved from a source, before selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidatePaper {
    pub stable_id: String,
    pub title: String,
    pub abstract_text: String,
    pub year: Option<i32>,
    /// Which source produced this candidate.
    pub source: String,
    pub external_ids: BTreeMap<String, String>,
}

impl CandidatePaper {
    /// Prefer the source id; otherwise derive a stable id from the
    /// normalized title.
    pub fn stable_id_for(source_id: Option<&str>, title: &str) -> String {
        match source_id {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => format!("title:{}", scholia_core::canonical::normalize_alias(title)),
        }
    }

    /// Text embedded for semantic gating.
    pub fn embed_text(&self) -> String {
        if self.abstract_text.is_empty() {
            self.title.clone()
        } else {
            format!("{}\n{}", self.title, self.abstract_text)
        }
    }
}

/// Primary, citation-bearing source.
#[async_trait]
pub trait BibliographicSource: Send + Sync {
    fn name(&self) -> &str;
    async fn lookup_seed(
        &self,
        title: &str,
        authors: &[String],
    ) -> Result<Option<CandidatePaper>, SourceError>;
    async fn citations(
        &self,
        paper_id: &str,
        limit: usize,
    ) -> Result<Vec<CandidatePaper>, SourceError>;
    async fn references(
        &self,
        paper_id: &str,
        limit: usize,
    ) -> Result<Vec<CandidatePaper>, SourceError>;
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<CandidatePaper>, SourceError>;
}

/// Secondary full-text index; also the seed fallback.
#[async_trait]
pub trait FulltextSource: Send + Sync {
    fn name(&self) -> &str;
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<CandidatePaper>, SourceError>;
    async fn lookup_seed(&self, title: &str) -> Result<Option<CandidatePaper>, SourceError>;
}

/// Fixture source with canned results; sub-queries can be scripted to fail,
/// which the selector must tolerate.
pub struct StaticBibliographicSource {
    name: String,
    pub seed: Option<CandidatePaper>,
    pub citation_results: Result<Vec<CandidatePaper>, SourceError>,
    pub reference_results: Result<Vec<CandidatePaper>, SourceError>,
    pub search_results: Result<Vec<CandidatePaper>, SourceError>,
}

impl StaticBibliographicSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            seed: None,
            citation_results: Ok(Vec::new()),
            reference_results: Ok(Vec::new()),
            search_results: Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl BibliographicSource for StaticBibliographicSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn lookup_seed(
        &self,
        _title: &str,
        _authors: &[String],
    ) -> Result<Option<CandidatePaper>, SourceError> {
        Ok(self.seed.clone())
    }

    async fn citations(
        &self,
        _paper_id: &str,
        limit: usize,
    ) -> Result<Vec<CandidatePaper>, SourceError> {
        self.citation_results
            .clone()
            .map(|mut v| {
                v.truncate(limit);
                v
            })
    }

    async fn references(
        &self,
        _paper_id: &str,
        limit: usize,
    ) -> Result<Vec<CandidatePaper>, SourceError> {
        self.reference_results.clone().map(|mut v| {
            v.truncate(limit);
            v
        })
    }

    async fn search(&self, _query: &str, limit: usize) -> Result<Vec<CandidatePaper>, SourceError> {
        self.search_results.clone().map(|mut v| {
            v.truncate(limit);
            v
        })
    }
}

pub struct StaticFulltextSource {
    name: String,
    pub seed: Option<CandidatePaper>,
    pub search_results: Result<Vec<CandidatePaper>, SourceError>,
}

impl StaticFulltextSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            seed: None,
            search_results: Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl FulltextSource for StaticFulltextSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, _query: &str, limit: usize) -> Result<Vec<CandidatePaper>, SourceError> {
        self.search_results.clone().map(|mut v| {
            v.truncate(limit);
            v
        })
    }

    async fn lookup_seed(&self, _title: &str) -> Result<Option<CandidatePaper>, SourceError> {
        Ok(self.seed.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_id_prefers_source_id() {
        assert_eq!(CandidatePaper::stable_id_for(Some("abc123"), "T"), "abc123");
        assert_eq!(
            CandidatePaper::stable_id_for(None, "  3D  Gaussian Splatting "),
            "title:3d gaussian splatting"
        );
        assert_eq!(
            CandidatePaper::stable_id_for(Some(""), "Same Title"),
            CandidatePaper::stable_id_for(None, "same  title")
        );
    }

    #[test]
    fn status_retriability_follows_http_semantics() {
        assert!(SourceError::Status(429).is_retriable());
        assert!(SourceError::Status(503).is_retriable());
        assert!(!SourceError::Status(404).is_retriable());
        assert!(!SourceError::Malformed("bad".to_string()).is_retriable());
    }
}
