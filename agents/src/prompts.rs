/// Identity of an agent; every field participates in the L1 cache key, so
/// bumping a version invalidates exactly that segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentSpec {
    pub name: &'static str,
    pub prompt_version: &'static str,
    pub schema_version: &'static str,
}

pub const SECTION_AGENT: AgentSpec = AgentSpec {
    name: "section_extractor",
    prompt_version: "1.1.0",
    schema_version: "1",
};

pub const ENTITY_AGENT: AgentSpec = AgentSpec {
    name: "entity_extractor",
    prompt_version: "1.3.0",
    schema_version: "1",
};

pub const RELATIONSHIP_AGENT: AgentSpec = AgentSpec {
    name: "relationship_extractor",
    prompt_version: "1.4.0",
    schema_version: "1",
};

/// Retry ladder for the relationship extractor: each step constrains the
/// payload further. The mode tag lands in the cache input so the modes share
/// a cache scope without colliding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradationMode {
    Normal,
    Compact,
    Minimal,
}

impl DegradationMode {
    pub const LADDER: [DegradationMode; 3] = [
        DegradationMode::Normal,
        DegradationMode::Compact,
        DegradationMode::Minimal,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            DegradationMode::Normal => "normal",
            DegradationMode::Compact => "compact",
            DegradationMode::Minimal => "minimal",
        }
    }

    /// Item cap applied after parsing, highest confidence first.
    pub fn item_cap(&self) -> Option<usize> {
        match self {
            DegradationMode::Minimal => Some(8),
            _ => None,
        }
    }
}

pub fn section_system_prompt() -> String {
    "You segment an academic paper's full text into structured sections. \
Return JSON: {\"sections\": [{\"section_type\", \"content\"}]}. \
section_type must be one of: abstract, methods, results, related_work, \
conclusion, other. Emit at most 12 sections, each content at most 1200 \
characters, in reading order. Exclude references, bibliographies and \
footnotes entirely. Do not paraphrase; copy text verbatim."
        .to_string()
}

pub fn entity_system_prompt() -> String {
    "You extract typed entities from paper sections. Return JSON: \
{\"entities\": [{\"name\", \"entity_type\", \"confidence\", \"definition\", \
\"evidence\", \"aliases\", \"section_type\", \"char_span\"}]}. \
entity_type must be one of: concept, method, dataset, metric. Extract at \
most 10 entities overall, at most 4 per section, and at most 2 metrics. \
Only include entities with confidence of at least 0.5. char_span must be \
the [start, end) byte offsets of the mention inside the given section \
content. evidence must be a verbatim quote."
        .to_string()
}

pub fn relationship_system_prompt(mode: DegradationMode) -> String {
    let base = "You extract relationships between known entities from paper \
sections. Return JSON: {\"relationships\": [{\"source_name\", \
\"target_name\", \"relation\", \"confidence\", \"evidence\", \
\"section_type\"}]}. relation must be one of: introduces, uses, evaluates, \
improves_on, compares_to, extends. Never relate an entity to itself. Emit \
at most 12 relationships. evidence must be a verbatim quote of at most 300 \
characters supporting the claim.";

    match mode {
        DegradationMode::Normal => base.to_string(),
        DegradationMode::Compact => format!(
            "{base} Omit the evidence field entirely; keep responses short."
        ),
        DegradationMode::Minimal => format!(
            "{base} Omit the evidence field. Return only the 8 \
relationships you are most confident in."
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_is_strictly_more_constrained() {
        assert_eq!(DegradationMode::LADDER.len(), 3);
        assert_eq!(DegradationMode::Normal.item_cap(), None);
        assert_eq!(DegradationMode::Minimal.item_cap(), Some(8));
    }

    #[test]
    fn mode_tags_are_distinct() {
        let tags: std::collections::HashSet<_> =
            DegradationMode::LADDER.iter().map(|m| m.tag()).collect();
        assert_eq!(tags.len(), 3);
    }
}
