use serde::{Deserialize, Serialize};

/// Output schema of the section extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionExtraction {
    pub sections: Vec<ExtractedSection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedSection {
    /// One of the closed section-type set; unknown values fall back to
    /// "other" downstream.
    pub section_type: String,
    pub content: String,
}

/// Output schema of the entity extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityExtraction {
    pub entities: Vec<ExtractedEntity>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub name: String,
    pub entity_type: String,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    pub section_type: String,
    /// Byte span into the section content the entity was found in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub char_span: Option<(u32, u32)>,
}

/// Output schema of the relationship extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipExtraction {
    pub relationships: Vec<ExtractedRelationship>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRelationship {
    pub source_name: String,
    pub target_name: String,
    pub relation: String,
    pub confidence: f32,
    /// Verbatim quote; may be empty in degraded modes.
    #[serde(default)]
    pub evidence: String,
    pub section_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub char_span: Option<(u32, u32)>,
}
