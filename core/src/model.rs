use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Maximum characters persisted per section part.
pub const MAX_SECTION_CHARS: usize = 8_000;
/// Maximum characters of verbatim evidence carried on an edge.
pub const MAX_EVIDENCE_CHARS: usize = 300;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    pub id: String,
    pub title: String,
    pub abstract_text: String,
    pub year: Option<i32>,
    /// Source name -> source-local identifier (e.g. "arxiv" -> "2308.04079").
    pub external_ids: BTreeMap<String, String>,
    pub embedding: Option<Vec<f32>>,
}

impl Paper {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            abstract_text: String::new(),
            year: None,
            external_ids: BTreeMap::new(),
            embedding: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionType {
    Abstract,
    Methods,
    Results,
    RelatedWork,
    Conclusion,
    Other,
}

impl SectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SectionType::Abstract => "abstract",
            SectionType::Methods => "methods",
            SectionType::Results => "results",
            SectionType::RelatedWork => "related_work",
            SectionType::Conclusion => "conclusion",
            SectionType::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "abstract" => Some(SectionType::Abstract),
            "methods" => Some(SectionType::Methods),
            "results" => Some(SectionType::Results),
            "related_work" => Some(SectionType::RelatedWork),
            "conclusion" => Some(SectionType::Conclusion),
            "other" => Some(SectionType::Other),
            _ => None,
        }
    }
}

impl std::fmt::Display for SectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub paper_id: String,
    pub section_type: SectionType,
    /// Order of this part within the paper.
    pub part_index: u32,
    pub content: String,
    pub word_count: u32,
}

impl Section {
    pub fn new(
        paper_id: impl Into<String>,
        section_type: SectionType,
        part_index: u32,
        content: impl Into<String>,
    ) -> Self {
        let mut content: String = content.into();
        if content.len() > MAX_SECTION_CHARS {
            content = truncate_chars(&content, MAX_SECTION_CHARS);
        }
        let word_count = content.split_whitespace().count() as u32;
        Self {
            paper_id: paper_id.into(),
            section_type,
            part_index,
            content,
            word_count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Concept,
    Method,
    Dataset,
    Metric,
    Paper,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Concept => "concept",
            EntityType::Method => "method",
            EntityType::Dataset => "dataset",
            EntityType::Metric => "metric",
            EntityType::Paper => "paper",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "concept" | "Concept" => Some(EntityType::Concept),
            "method" | "Method" => Some(EntityType::Method),
            "dataset" | "Dataset" => Some(EntityType::Dataset),
            "metric" | "Metric" => Some(EntityType::Metric),
            "paper" | "Paper" => Some(EntityType::Paper),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Introduces,
    Uses,
    Evaluates,
    ImprovesOn,
    ComparesTo,
    Extends,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Introduces => "introduces",
            RelationType::Uses => "uses",
            RelationType::Evaluates => "evaluates",
            RelationType::ImprovesOn => "improves_on",
            RelationType::ComparesTo => "compares_to",
            RelationType::Extends => "extends",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "introduces" => Some(RelationType::Introduces),
            "uses" => Some(RelationType::Uses),
            "evaluates" => Some(RelationType::Evaluates),
            "improves_on" => Some(RelationType::ImprovesOn),
            "compares_to" => Some(RelationType::ComparesTo),
            "extends" => Some(RelationType::Extends),
            _ => None,
        }
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Approved,
    Flagged,
    Rejected,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Approved => "approved",
            ReviewStatus::Flagged => "flagged",
            ReviewStatus::Rejected => "rejected",
        }
    }
}

/// Dual embedding: the raw full-dimension vector plus the reduced vector
/// actually indexed for fast search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingPair {
    pub raw: Vec<f32>,
    pub index: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: u64,
    pub entity_type: EntityType,
    pub canonical_name: String,
    pub metadata: NodeMetadata,
    pub original_confidence: f32,
    pub adjusted_confidence: f32,
    pub review_status: ReviewStatus,
    pub embedding: Option<EmbeddingPair>,
    /// Monotonic insertion counter assigned by the repository; drives
    /// deterministic canonical selection.
    pub created_at: u64,
    pub mention_count: u32,
}

impl Node {
    pub fn new(entity_type: EntityType, canonical_name: impl Into<String>, confidence: f32) -> Self {
        let confidence = confidence.clamp(0.0, 1.0);
        Self {
            id: 0,
            entity_type,
            canonical_name: canonical_name.into(),
            metadata: NodeMetadata::default(),
            original_confidence: confidence,
            adjusted_confidence: confidence,
            review_status: ReviewStatus::Approved,
            embedding: None,
            created_at: 0,
            mention_count: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub paper_id: String,
    pub section_type: SectionType,
    /// Byte span of the evidence within the section content, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub char_span: Option<(u32, u32)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cross_paper: Option<String>,
}

impl Provenance {
    pub fn new(paper_id: impl Into<String>, section_type: SectionType) -> Self {
        Self {
            paper_id: paper_id.into(),
            section_type,
            char_span: None,
            cross_paper: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: u64,
    pub source: u64,
    pub target: u64,
    pub relation: RelationType,
    pub confidence: f32,
    pub evidence: String,
    pub provenance: Provenance,
    pub review_status: ReviewStatus,
}

impl Edge {
    pub fn new(
        source: u64,
        target: u64,
        relation: RelationType,
        confidence: f32,
        provenance: Provenance,
    ) -> Self {
        Self {
            id: 0,
            source,
            target,
            relation,
            confidence: confidence.clamp(0.0, 1.0),
            evidence: String::new(),
            provenance,
            review_status: ReviewStatus::Approved,
        }
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        let evidence: String = evidence.into();
        self.evidence = if evidence.len() > MAX_EVIDENCE_CHARS {
            truncate_chars(&evidence, MAX_EVIDENCE_CHARS)
        } else {
            evidence
        };
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMention {
    pub node_id: u64,
    pub paper_id: String,
    pub section_type: SectionType,
    pub mention_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    AliasOf,
    SameAsCandidate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Proposed,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityLink {
    pub id: u64,
    pub node_id: u64,
    pub canonical_node_id: u64,
    pub link_type: LinkType,
    pub status: LinkStatus,
    pub confidence: f32,
    pub evidence: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityAlias {
    pub canonical_node_id: u64,
    pub alias: String,
    pub normalized: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightType {
    TransitiveRelationship,
    ConceptCluster,
    Anomaly,
}

impl InsightType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsightType::TransitiveRelationship => "transitive_relationship",
            InsightType::ConceptCluster => "concept_cluster",
            InsightType::Anomaly => "anomaly",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningPath {
    pub claim: String,
    pub evidence_edge_ids: Vec<u64>,
    pub rule: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferredInsight {
    pub insight_type: InsightType,
    /// Sorted, deduplicated subject set; sorted order gives stable equality.
    pub subject_node_ids: Vec<u64>,
    pub path: ReasoningPath,
    pub confidence: f32,
}

impl InferredInsight {
    pub fn new(
        insight_type: InsightType,
        mut subject_node_ids: Vec<u64>,
        path: ReasoningPath,
        confidence: f32,
    ) -> Self {
        subject_node_ids.sort_unstable();
        subject_node_ids.dedup();
        Self {
            insight_type,
            subject_node_ids,
            path,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// Deduplication key: (insight_type, subject set).
    pub fn dedup_key(&self) -> (InsightType, Vec<u64>) {
        (self.insight_type, self.subject_node_ids.clone())
    }
}

/// Truncate on a char boundary at or below `max_bytes`.
pub fn truncate_chars(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}
