use crate::source::{CandidatePaper, FulltextSource, SourceError};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

const DEFAULT_API: &str = "http://export.arxiv.org/api/query";

#[derive(Debug, Clone, Copy, Default)]
pub enum SortBy {
    #[default]
    Relevance,
    LastUpdatedDate,
    SubmittedDate,
}

impl SortBy {
    fn as_str(&self) -> &'static str {
        match self {
            SortBy::Relevance => "relevance",
            SortBy::LastUpdatedDate => "lastUpdatedDate",
            SortBy::SubmittedDate => "submittedDate",
        }
    }
}

/// arXiv Atom API client; no key required.
pub struct ArxivClient {
    client: reqwest::Client,
    base_url: String,
    sort_by: SortBy,
}

impl ArxivClient {
    pub fn new() -> Result<Self, SourceError> {
        Self::with_base_url(DEFAULT_API)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("scholia/0.1")
            .build()
            .map_err(|err| SourceError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            sort_by: SortBy::default(),
        })
    }

    pub fn sort_by(mut self, sort_by: SortBy) -> Self {
        self.sort_by = sort_by;
        self
    }

    async fn query(&self, search_query: &str, limit: usize) -> Result<Vec<CandidatePaper>, SourceError> {
        let url = format!(
            "{}?search_query={}&start=0&max_results={}&sortBy={}&sortOrder=descending",
            self.base_url,
            urlencoding::encode(search_query),
            limit,
            self.sort_by.as_str()
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| SourceError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|err| SourceError::Transport(err.to_string()))?;

        parse_atom_feed(&body)
    }
}

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    id: String,
    title: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    published: Option<String>,
}

pub fn parse_atom_feed(xml: &str) -> Result<Vec<CandidatePaper>, SourceError> {
    let feed: AtomFeed =
        quick_xml::de::from_str(xml).map_err(|err| SourceError::Malformed(err.to_string()))?;

    Ok(feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let title = normalize_whitespace(&entry.title);
            if title.is_empty() {
                return None;
            }
            let arxiv_id = arxiv_id_from_entry_id(&entry.id)?;
            let year = entry
                .published
                .as_deref()
                .and_then(|p| p.get(..4))
                .and_then(|y| y.parse::<i32>().ok());

            let mut external_ids = BTreeMap::new();
            external_ids.insert("arxiv".to_string(), arxiv_id.clone());

            Some(CandidatePaper {
                stable_id: format!("arxiv:{arxiv_id}"),
                title,
                abstract_text: entry
                    .summary
                    .as_deref()
                    .map(normalize_whitespace)
                    .unwrap_or_default(),
                year,
                source: "arxiv".to_string(),
                external_ids,
            })
        })
        .collect())
}

/// `http://arxiv.org/abs/2308.04079v1` -> `2308.04079`
fn arxiv_id_from_entry_id(entry_id: &str) -> Option<String> {
    let raw = entry_id.rsplit("/abs/").next()?;
    if raw.is_empty() || raw == entry_id {
        return None;
    }
    let without_version = match raw.rfind('v') {
        Some(pos) if raw[pos + 1..].chars().all(|c| c.is_ascii_digit()) && pos > 0 => &raw[..pos],
        _ => raw,
    };
    Some(without_version.to_string())
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[async_trait]
impl FulltextSource for ArxivClient {
    fn name(&self) -> &str {
        "arxiv"
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<CandidatePaper>, SourceError> {
        self.query(&format!("all:\"{query}\""), limit).await
    }

    async fn lookup_seed(&self, title: &str) -> Result<Option<CandidatePaper>, SourceError> {
        let results = self.query(&format!("ti:\"{title}\""), 1).await?;
        Ok(results.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>ArXiv Query Results</title>
  <entry>
    <id>http://arxiv.org/abs/2308.04079v1</id>
    <title>3D Gaussian Splatting
      for Real-Time Radiance Field Rendering</title>
    <summary>We introduce three key elements...</summary>
    <published>2023-08-08T00:00:00Z</published>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2003.08934v2</id>
    <title>NeRF: Representing Scenes as Neural Radiance Fields</title>
    <summary>We present a method...</summary>
    <published>2020-03-19T00:00:00Z</published>
  </entry>
</feed>"#;

    #[test]
    fn parses_entries_with_normalized_titles() {
        let papers = parse_atom_feed(FEED).unwrap();
        assert_eq!(papers.len(), 2);
        assert_eq!(papers[0].stable_id, "arxiv:2308.04079");
        assert_eq!(
            papers[0].title,
            "3D Gaussian Splatting for Real-Time Radiance Field Rendering"
        );
        assert_eq!(papers[0].year, Some(2023));
        assert_eq!(papers[1].external_ids.get("arxiv").unwrap(), "2003.08934");
    }

    #[test]
    fn strips_version_suffix_only_when_numeric() {
        assert_eq!(
            arxiv_id_from_entry_id("http://arxiv.org/abs/2308.04079v12"),
            Some("2308.04079".to_string())
        );
        assert_eq!(
            arxiv_id_from_entry_id("http://arxiv.org/abs/cs/0112017"),
            Some("cs/0112017".to_string())
        );
        assert_eq!(arxiv_id_from_entry_id("garbage"), None);
    }

    #[test]
    fn malformed_xml_is_reported() {
        assert!(matches!(
            parse_atom_feed("<feed><entry>"),
            Err(SourceError::Malformed(_))
        ));
    }
}
