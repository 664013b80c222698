use crate::source::{BibliographicSource, CandidatePaper, SourceError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

const DEFAULT_API: &str = "https://api.semanticscholar.org/graph/v1";
const PAPER_FIELDS: &str = "paperId,title,abstract,year,externalIds";

/// Semantic Scholar graph API client. Rate limiting and retries are the
/// caller's concern (the selector wraps every call in its lane and retry
/// policy).
pub struct ScholarClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl ScholarClient {
    pub fn new(api_key: Option<String>) -> Result<Self, SourceError> {
        Self::with_base_url(DEFAULT_API, api_key)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("scholia/0.1")
            .build()
            .map_err(|err| SourceError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key,
        })
    }

    async fn get_json(&self, url: &str) -> Result<Value, SourceError> {
        let mut request = self.client.get(url);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| SourceError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }

        response
            .json::<Value>()
            .await
            .map_err(|err| SourceError::Malformed(err.to_string()))
    }
}

fn parse_paper(value: &Value) -> Option<CandidatePaper> {
    let title = value.get("title")?.as_str()?.trim().to_string();
    if title.is_empty() {
        return None;
    }
    let paper_id = value.get("paperId").and_then(|v| v.as_str());
    let stable_id = CandidatePaper::stable_id_for(paper_id, &title);

    let mut external_ids = BTreeMap::new();
    if let Some(id) = paper_id {
        external_ids.insert("semantic_scholar".to_string(), id.to_string());
    }
    if let Some(ids) = value.get("externalIds").and_then(|v| v.as_object()) {
        if let Some(arxiv) = ids.get("ArXiv").and_then(|v| v.as_str()) {
            external_ids.insert("arxiv".to_string(), arxiv.to_string());
        }
        if let Some(doi) = ids.get("DOI").and_then(|v| v.as_str()) {
            external_ids.insert("doi".to_string(), doi.to_string());
        }
    }

    Some(CandidatePaper {
        stable_id,
        title,
        abstract_text: value
            .get("abstract")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        year: value.get("year").and_then(|v| v.as_i64()).map(|y| y as i32),
        source: "semantic_scholar".to_string(),
        external_ids,
    })
}

/// Citation and reference payloads nest the paper under `citingPaper` /
/// `citedPaper`.
fn parse_linked_papers(body: &Value, link_field: &str) -> Vec<CandidatePaper> {
    body.get("data")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get(link_field).and_then(parse_paper))
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl BibliographicSource for ScholarClient {
    fn name(&self) -> &str {
        "semantic_scholar"
    }

    async fn lookup_seed(
        &self,
        title: &str,
        _authors: &[String],
    ) -> Result<Option<CandidatePaper>, SourceError> {
        let url = format!(
            "{}/paper/search/match?query={}&fields={}",
            self.base_url,
            urlencoding::encode(title),
            PAPER_FIELDS
        );
        let body = match self.get_json(&url).await {
            Ok(body) => body,
            // The match endpoint 404s when nothing plausibly matches.
            Err(SourceError::Status(404)) => return Ok(None),
            Err(err) => return Err(err),
        };
        let first = body
            .get("data")
            .and_then(|v| v.as_array())
            .and_then(|items| items.first())
            .and_then(parse_paper);
        Ok(first)
    }

    async fn citations(
        &self,
        paper_id: &str,
        limit: usize,
    ) -> Result<Vec<CandidatePaper>, SourceError> {
        let url = format!(
            "{}/paper/{}/citations?fields={}&limit={}",
            self.base_url, paper_id, PAPER_FIELDS, limit
        );
        let body = self.get_json(&url).await?;
        Ok(parse_linked_papers(&body, "citingPaper"))
    }

    async fn references(
        &self,
        paper_id: &str,
        limit: usize,
    ) -> Result<Vec<CandidatePaper>, SourceError> {
        let url = format!(
            "{}/paper/{}/references?fields={}&limit={}",
            self.base_url, paper_id, PAPER_FIELDS, limit
        );
        let body = self.get_json(&url).await?;
        Ok(parse_linked_papers(&body, "citedPaper"))
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<CandidatePaper>, SourceError> {
        let url = format!(
            "{}/paper/search?query={}&fields={}&limit={}",
            self.base_url,
            urlencoding::encode(query),
            PAPER_FIELDS,
            limit
        );
        let body = self.get_json(&url).await?;
        Ok(body
            .get("data")
            .and_then(|v| v.as_array())
            .map(|items| items.iter().filter_map(parse_paper).collect())
            .unwrap_or_default())
    }
}
