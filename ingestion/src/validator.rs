use agents::schema::{ExtractedEntity, ExtractedRelationship};
use scholia_core::canonical::{canonicalize, is_generic_concept};
use scholia_core::model::{
    truncate_chars, EntityType, RelationType, ReviewStatus, Section, MAX_EVIDENCE_CHARS,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

const GENERIC_CONCEPT_DELTA: f32 = 0.1;
const TYPE_COLLISION_DELTA: f32 = 0.1;
const EVIDENCE_UNVERIFIED_DELTA: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    LowConfidence,
    UnknownEntityType,
    GenericConcept,
    TypeCollision,
    SectionCap,
    EntityCap,
    MetricCap,
    CharSpanInvalid,
    UnknownRelation,
    SelfEdge,
    UnknownEndpoint,
    ImprovesOnInvalidTarget,
    EvidenceMissing,
    EvidenceUnverified,
    EvidenceTruncated,
    DuplicateEdge,
}

#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub min_confidence: f32,
    pub max_entities: usize,
    pub max_entities_per_section: usize,
    pub max_metric_entities: usize,
    /// Lifts the metric cap for metric-survey style papers.
    pub metric_focused: bool,
    /// When set, an evidence quote that cannot be found verbatim in any
    /// section rejects the edge instead of flagging it.
    pub strict_evidence: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            max_entities: 10,
            max_entities_per_section: 4,
            max_metric_entities: 2,
            metric_focused: false,
            strict_evidence: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidatedEntity {
    pub entity: ExtractedEntity,
    pub entity_type: EntityType,
    pub canonical_name: String,
    pub adjusted_confidence: f32,
    pub review_status: ReviewStatus,
    pub decisions: Vec<ReasonCode>,
}

#[derive(Debug, Clone)]
pub struct ValidatedEdge {
    pub relationship: ExtractedRelationship,
    pub relation: RelationType,
    pub source_canonical: String,
    pub target_canonical: String,
    pub adjusted_confidence: f32,
    pub review_status: ReviewStatus,
    pub decisions: Vec<ReasonCode>,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    pub entities: Vec<ValidatedEntity>,
    pub edges: Vec<ValidatedEdge>,
}

impl ValidationOutcome {
    pub fn surviving_entities(&self) -> impl Iterator<Item = &ValidatedEntity> {
        self.entities
            .iter()
            .filter(|e| e.review_status != ReviewStatus::Rejected)
    }

    pub fn surviving_edges(&self) -> impl Iterator<Item = &ValidatedEdge> {
        self.edges
            .iter()
            .filter(|e| e.review_status != ReviewStatus::Rejected)
    }
}

/// Deterministic rule-based validation. Confidence only ever moves down,
/// and every decision is recorded. No model is consulted.
pub struct Validator {
    config: ValidatorConfig,
}

impl Validator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    pub fn validate(
        &self,
        entities: &[ExtractedEntity],
        relationships: &[ExtractedRelationship],
        sections: &[Section],
        known_types: &HashMap<String, EntityType>,
    ) -> ValidationOutcome {
        let validated_entities = self.validate_entities(entities, sections);

        // Endpoint typing sees both this paper's surviving entities and the
        // already-known node set.
        let mut type_map: HashMap<String, EntityType> = known_types.clone();
        for entity in validated_entities
            .iter()
            .filter(|e| e.review_status != ReviewStatus::Rejected)
        {
            type_map
                .entry(entity.canonical_name.clone())
                .or_insert(entity.entity_type);
        }

        let validated_edges = self.validate_edges(relationships, sections, &type_map);

        ValidationOutcome {
            entities: validated_entities,
            edges: validated_edges,
        }
    }

    fn validate_entities(
        &self,
        entities: &[ExtractedEntity],
        sections: &[Section],
    ) -> Vec<ValidatedEntity> {
        let mut out: Vec<ValidatedEntity> = Vec::with_capacity(entities.len());

        // First pass: name -> set of types, for collision detection.
        let mut types_by_name: HashMap<String, HashSet<EntityType>> = HashMap::new();
        for entity in entities {
            if let Some(entity_type) = EntityType::parse(&entity.entity_type) {
                types_by_name
                    .entry(canonicalize(&entity.name))
                    .or_default()
                    .insert(entity_type);
            }
        }

        for entity in entities {
            let mut decisions = Vec::new();
            let mut confidence = entity.confidence.clamp(0.0, 1.0);
            let mut status = ReviewStatus::Approved;

            let Some(entity_type) = EntityType::parse(&entity.entity_type) else {
                out.push(ValidatedEntity {
                    entity: entity.clone(),
                    entity_type: EntityType::Concept,
                    canonical_name: canonicalize(&entity.name),
                    adjusted_confidence: 0.0,
                    review_status: ReviewStatus::Rejected,
                    decisions: vec![ReasonCode::UnknownEntityType],
                });
                continue;
            };
            let canonical_name = canonicalize(&entity.name);

            if confidence < self.config.min_confidence {
                out.push(ValidatedEntity {
                    entity: entity.clone(),
                    entity_type,
                    canonical_name,
                    adjusted_confidence: confidence,
                    review_status: ReviewStatus::Rejected,
                    decisions: vec![ReasonCode::LowConfidence],
                });
                continue;
            }

            if entity_type == EntityType::Concept && is_generic_concept(&entity.name) {
                decisions.push(ReasonCode::GenericConcept);
                confidence -= GENERIC_CONCEPT_DELTA;
                status = ReviewStatus::Flagged;
            }

            if matches!(entity_type, EntityType::Method | EntityType::Dataset) {
                let collides = types_by_name
                    .get(&canonical_name)
                    .map(|types| types.len() > 1)
                    .unwrap_or(false);
                if collides {
                    decisions.push(ReasonCode::TypeCollision);
                    confidence -= TYPE_COLLISION_DELTA;
                    status = ReviewStatus::Flagged;
                }
            }

            let mut entity = entity.clone();
            if let Some((start, end)) = entity.char_span {
                let in_bounds = sections.iter().any(|s| {
                    s.section_type.as_str() == entity.section_type
                        && (end as usize) <= s.content.len()
                        && start < end
                });
                if !in_bounds {
                    decisions.push(ReasonCode::CharSpanInvalid);
                    entity.char_span = None;
                }
            }

            out.push(ValidatedEntity {
                entity,
                entity_type,
                canonical_name,
                adjusted_confidence: confidence.clamp(0.0, 1.0),
                review_status: status,
                decisions,
            });
        }

        self.apply_entity_caps(&mut out);
        out
    }

    /// Per-section, metric, and overall caps. Excess entities are rejected
    /// lowest-confidence first.
    fn apply_entity_caps(&self, entities: &mut [ValidatedEntity]) {
        let mut order: Vec<usize> = (0..entities.len())
            .filter(|i| entities[*i].review_status != ReviewStatus::Rejected)
            .collect();
        // Highest confidence first; input order breaks ties.
        order.sort_by(|a, b| {
            entities[*b]
                .adjusted_confidence
                .partial_cmp(&entities[*a].adjusted_confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(b))
        });

        let mut per_section: HashMap<String, usize> = HashMap::new();
        let mut metric_count = 0usize;
        let mut total = 0usize;

        for idx in order {
            let entity = &mut entities[idx];

            if total >= self.config.max_entities {
                entity.review_status = ReviewStatus::Rejected;
                entity.decisions.push(ReasonCode::EntityCap);
                continue;
            }

            let section_count = per_section
                .entry(entity.entity.section_type.clone())
                .or_insert(0);
            if *section_count >= self.config.max_entities_per_section {
                entity.review_status = ReviewStatus::Rejected;
                entity.decisions.push(ReasonCode::SectionCap);
                continue;
            }

            if entity.entity_type == EntityType::Metric
                && !self.config.metric_focused
                && metric_count >= self.config.max_metric_entities
            {
                entity.review_status = ReviewStatus::Rejected;
                entity.decisions.push(ReasonCode::MetricCap);
                continue;
            }

            *section_count += 1;
            total += 1;
            if entity.entity_type == EntityType::Metric {
                metric_count += 1;
            }
        }
    }

    fn validate_edges(
        &self,
        relationships: &[ExtractedRelationship],
        sections: &[Section],
        type_map: &HashMap<String, EntityType>,
    ) -> Vec<ValidatedEdge> {
        let mut out: Vec<ValidatedEdge> = Vec::with_capacity(relationships.len());

        for relationship in relationships {
            let mut decisions = Vec::new();
            let mut confidence = relationship.confidence.clamp(0.0, 1.0);
            let mut status = ReviewStatus::Approved;

            let source_canonical = canonicalize(&relationship.source_name);
            let target_canonical = canonicalize(&relationship.target_name);

            let reject = |relationship: &ExtractedRelationship,
                          relation: RelationType,
                          source_canonical: String,
                          target_canonical: String,
                          code: ReasonCode| ValidatedEdge {
                relationship: relationship.clone(),
                relation,
                source_canonical,
                target_canonical,
                adjusted_confidence: 0.0,
                review_status: ReviewStatus::Rejected,
                decisions: vec![code],
            };

            let Some(relation) = RelationType::parse(&relationship.relation) else {
                out.push(reject(
                    relationship,
                    RelationType::Uses,
                    source_canonical,
                    target_canonical,
                    ReasonCode::UnknownRelation,
                ));
                continue;
            };

            if source_canonical == target_canonical {
                out.push(reject(
                    relationship,
                    relation,
                    source_canonical,
                    target_canonical,
                    ReasonCode::SelfEdge,
                ));
                continue;
            }

            let source_type = type_map.get(&source_canonical).copied();
            let target_type = type_map.get(&target_canonical).copied();
            if source_type.is_none() || target_type.is_none() {
                out.push(reject(
                    relationship,
                    relation,
                    source_canonical,
                    target_canonical,
                    ReasonCode::UnknownEndpoint,
                ));
                continue;
            }

            if relation == RelationType::ImprovesOn
                && matches!(
                    target_type,
                    Some(EntityType::Dataset) | Some(EntityType::Metric)
                )
            {
                out.push(reject(
                    relationship,
                    relation,
                    source_canonical,
                    target_canonical,
                    ReasonCode::ImprovesOnInvalidTarget,
                ));
                continue;
            }

            let mut relationship = relationship.clone();
            if relationship.evidence.is_empty() {
                // Degraded extraction modes legitimately omit evidence.
                decisions.push(ReasonCode::EvidenceMissing);
                status = ReviewStatus::Flagged;
            } else {
                if relationship.evidence.len() > MAX_EVIDENCE_CHARS {
                    relationship.evidence =
                        truncate_chars(&relationship.evidence, MAX_EVIDENCE_CHARS);
                    decisions.push(ReasonCode::EvidenceTruncated);
                }
                let found = sections
                    .iter()
                    .any(|s| s.content.contains(&relationship.evidence));
                if !found {
                    if self.config.strict_evidence {
                        out.push(reject(
                            &relationship,
                            relation,
                            source_canonical,
                            target_canonical,
                            ReasonCode::EvidenceUnverified,
                        ));
                        continue;
                    }
                    decisions.push(ReasonCode::EvidenceUnverified);
                    confidence -= EVIDENCE_UNVERIFIED_DELTA;
                    status = ReviewStatus::Flagged;
                }
            }

            out.push(ValidatedEdge {
                relationship,
                relation,
                source_canonical,
                target_canonical,
                adjusted_confidence: confidence.clamp(0.0, 1.0),
                review_status: status,
                decisions,
            });
        }

        self.dedupe_edges(&mut out);
        out
    }

    /// Keep the highest-confidence survivor per (source, target, relation);
    /// ties keep the earliest input.
    fn dedupe_edges(&self, edges: &mut [ValidatedEdge]) {
        let mut best: HashMap<(String, String, RelationType), usize> = HashMap::new();
        for idx in 0..edges.len() {
            if edges[idx].review_status == ReviewStatus::Rejected {
                continue;
            }
            let key = (
                edges[idx].source_canonical.clone(),
                edges[idx].target_canonical.clone(),
                edges[idx].relation,
            );
            match best.get(&key) {
                None => {
                    best.insert(key, idx);
                }
                Some(&winner) => {
                    let replace =
                        edges[idx].adjusted_confidence > edges[winner].adjusted_confidence;
                    let loser = if replace { winner } else { idx };
                    if replace {
                        best.insert(key, idx);
                    }
                    edges[loser].review_status = ReviewStatus::Rejected;
                    edges[loser].decisions.push(ReasonCode::DuplicateEdge);
                }
            }
        }
    }
}
