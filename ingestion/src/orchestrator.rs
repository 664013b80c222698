use crate::resolver::{EntityResolver, ResolutionOutcome, ResolverError};
use crate::validator::{ValidationOutcome, Validator, ValidatorConfig};
use agents::provider::AgentError;
use agents::prompts::{entity_system_prompt, section_system_prompt, ENTITY_AGENT, SECTION_AGENT};
use agents::runner::AgentRunner;
use agents::schema::{EntityExtraction, RelationshipExtraction, SectionExtraction};
use runtime::cache::DerivedCache;
use runtime::cancel::{self, CancellationToken};
use scholia_core::error::ErrorCode;
use scholia_core::hashing::{derived_cache_key, sha256_hex};
use scholia_core::model::{
    truncate_chars, Edge, EntityMention, Paper, Provenance, Section, SectionType,
};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use storage::repo::{GraphRepository, RepoError};
use tracing::{info, warn};

const MAX_SECTIONS: usize = 12;
const MAX_SECTION_STAGE_CHARS: usize = 1_200;
const MAX_RELATIONSHIPS: usize = 12;

#[derive(Debug, Clone)]
pub struct PaperInput {
    pub id: String,
    pub title: String,
    pub abstract_text: String,
    pub year: Option<i32>,
    pub external_ids: BTreeMap<String, String>,
    pub full_text: Option<String>,
}

impl PaperInput {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            abstract_text: String::new(),
            year: None,
            external_ids: BTreeMap::new(),
            full_text: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineOptions {
    pub force_reingest: bool,
    pub metric_focused: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub sections: usize,
    pub entities_extracted: usize,
    pub entities_resolved: usize,
    pub edges_extracted: usize,
    pub edges_persisted: usize,
    pub skipped: bool,
}

#[derive(Debug, Clone)]
pub struct StageFailure {
    pub stage: &'static str,
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub paper_id: String,
    pub success: bool,
    pub stats: PipelineStats,
    pub error: Option<StageFailure>,
}

/// Per-paper stage composition. Stages persist as they go, so a failure in
/// a later stage leaves a valid partial state that an identical re-run
/// completes.
pub struct PipelineOrchestrator {
    repo: Arc<dyn GraphRepository>,
    runner: Arc<AgentRunner>,
    derived: Arc<DerivedCache>,
    resolver: EntityResolver,
    validator_config: ValidatorConfig,
}

impl PipelineOrchestrator {
    pub fn new(
        repo: Arc<dyn GraphRepository>,
        runner: Arc<AgentRunner>,
        derived: Arc<DerivedCache>,
        resolver: EntityResolver,
        validator_config: ValidatorConfig,
    ) -> Self {
        Self {
            repo,
            runner,
            derived,
            resolver,
            validator_config,
        }
    }

    pub async fn run_pipeline(
        &self,
        input: PaperInput,
        options: PipelineOptions,
        cancel_token: &CancellationToken,
    ) -> PipelineOutcome {
        let paper_id = input.id.clone();
        match self.run_stages(input, options, cancel_token).await {
            Ok(stats) => PipelineOutcome {
                paper_id,
                success: true,
                stats,
                error: None,
            },
            Err((failure, stats)) => {
                warn!(
                    paper_id = %paper_id,
                    stage = failure.stage,
                    code = %failure.code,
                    "paper pipeline failed"
                );
                PipelineOutcome {
                    paper_id,
                    success: false,
                    stats,
                    error: Some(failure),
                }
            }
        }
    }

    async fn run_stages(
        &self,
        input: PaperInput,
        options: PipelineOptions,
        cancel_token: &CancellationToken,
    ) -> Result<PipelineStats, (StageFailure, PipelineStats)> {
        let mut stats = PipelineStats::default();

        // Incremental skip: a paper counts as ingested once it has sections.
        let already = self
            .repo
            .get_sections(&input.id)
            .await
            .map_err(|err| (stage_repo("ingestion", err), stats.clone()))?;
        if !already.is_empty() && !options.force_reingest {
            info!(paper_id = %input.id, "incremental mode, paper already ingested");
            stats.skipped = true;
            return Ok(stats);
        }

        check(cancel_token, "ingestion", &stats)?;

        let mut paper = Paper::new(input.id.clone(), input.title.clone());
        paper.abstract_text = input.abstract_text.clone();
        paper.year = input.year;
        paper.external_ids = input.external_ids.clone();
        self.repo
            .upsert_paper(paper)
            .await
            .map_err(|err| (stage_repo("ingestion", err), stats.clone()))?;

        // Stage 1: sections.
        let sections = self
            .extract_sections(&input, cancel_token)
            .await
            .map_err(|err| (stage_agent("ingestion", err), stats.clone()))?;
        stats.sections = sections.len();

        self.repo
            .insert_sections(sections.clone())
            .await
            .map_err(|err| (stage_repo("ingestion", err), stats.clone()))?;

        if sections.is_empty() {
            info!(paper_id = %input.id, "no sections extracted, nothing further to do");
            return Ok(stats);
        }

        check(cancel_token, "entity_extraction", &stats)?;

        // Stage 2: entities.
        let section_payload: Vec<serde_json::Value> = sections
            .iter()
            .map(|s| json!({"section_type": s.section_type.as_str(), "content": s.content}))
            .collect();
        let entity_input = json!({
            "paper_id": input.id,
            "sections": section_payload,
        });
        let extraction: EntityExtraction = self
            .runner
            .run(&ENTITY_AGENT, &entity_system_prompt(), &entity_input, cancel_token)
            .await
            .map_err(|err| (stage_agent("entity_extraction", err), stats.clone()))?;
        stats.entities_extracted = extraction.entities.len();

        check(cancel_token, "relationship_extraction", &stats)?;

        // Stage 3: relationships, over sections plus the known entity set.
        let known_names: Vec<&str> = extraction.entities.iter().map(|e| e.name.as_str()).collect();
        let relationship_input = json!({
            "paper_id": input.id,
            "sections": section_payload,
            "known_entities": known_names,
        });
        let mut relationships: RelationshipExtraction = self
            .runner
            .run_relationships(&relationship_input, cancel_token)
            .await
            .map_err(|err| (stage_agent("relationship_extraction", err), stats.clone()))?;
        if relationships.relationships.len() > MAX_RELATIONSHIPS {
            relationships.relationships.sort_by(|a, b| {
                b.confidence
                    .partial_cmp(&a.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            relationships.relationships.truncate(MAX_RELATIONSHIPS);
        }
        stats.edges_extracted = relationships.relationships.len();

        // Stage 4: deterministic validation.
        let validator = Validator::new(ValidatorConfig {
            metric_focused: options.metric_focused,
            ..self.validator_config.clone()
        });
        let outcome = validator.validate(
            &extraction.entities,
            &relationships.relationships,
            &sections,
            &HashMap::new(),
        );

        check(cancel_token, "resolution", &stats)?;

        // Stage 5: canonicalize, resolve, attach mentions.
        let resolutions = self
            .resolve_entities(&outcome, &input.id, &sections, cancel_token)
            .await
            .map_err(|err| (stage_resolver("resolution", err), stats.clone()))?;
        stats.entities_resolved = resolutions.len();

        check(cancel_token, "edge_persistence", &stats)?;

        // Stage 6: persist edges through the resolved canonical ids.
        stats.edges_persisted = self
            .persist_edges(&outcome, &resolutions, &input.id)
            .await
            .map_err(|err| (stage_repo("edge_persistence", err), stats.clone()))?;

        info!(
            paper_id = %input.id,
            sections = stats.sections,
            entities = stats.entities_resolved,
            edges = stats.edges_persisted,
            "paper ingested"
        );
        Ok(stats)
    }

    async fn extract_sections(
        &self,
        input: &PaperInput,
        cancel_token: &CancellationToken,
    ) -> Result<Vec<Section>, AgentError> {
        let Some(full_text) = &input.full_text else {
            // Metadata-only path: the abstract is the single section.
            if input.abstract_text.is_empty() {
                return Ok(Vec::new());
            }
            return Ok(vec![Section::new(
                input.id.clone(),
                SectionType::Abstract,
                0,
                truncate_chars(&input.abstract_text, MAX_SECTION_STAGE_CHARS),
            )]);
        };

        let sources = json!({
            "paper_id": input.id,
            "text_hash": sha256_hex(full_text.as_bytes()),
        });
        let key = derived_cache_key(
            "sections",
            &sources,
            SECTION_AGENT.schema_version,
            SECTION_AGENT.prompt_version,
        );

        if let Ok(Some(cached)) = self.derived.get("sections", &key).await {
            if let Ok(sections) = serde_json::from_value::<Vec<Section>>(cached) {
                return Ok(sections);
            }
        }

        let agent_input = json!({"paper_id": input.id, "full_text": full_text});
        let extraction: SectionExtraction = self
            .runner
            .run(&SECTION_AGENT, &section_system_prompt(), &agent_input, cancel_token)
            .await?;

        let sections: Vec<Section> = extraction
            .sections
            .into_iter()
            .take(MAX_SECTIONS)
            .enumerate()
            .map(|(index, section)| {
                let section_type =
                    SectionType::parse(&section.section_type).unwrap_or(SectionType::Other);
                Section::new(
                    input.id.clone(),
                    section_type,
                    index as u32,
                    truncate_chars(&section.content, MAX_SECTION_STAGE_CHARS),
                )
            })
            .collect();

        if let Ok(value) = serde_json::to_value(&sections) {
            if let Err(err) = self.derived.put("sections", &key, &value).await {
                warn!(%err, "could not persist derived sections");
            }
        }
        Ok(sections)
    }

    async fn resolve_entities(
        &self,
        outcome: &ValidationOutcome,
        paper_id: &str,
        sections: &[Section],
        cancel_token: &CancellationToken,
    ) -> Result<HashMap<String, ResolutionOutcome>, ResolverError> {
        let mut resolutions: HashMap<String, ResolutionOutcome> = HashMap::new();

        for validated in outcome.surviving_entities() {
            let resolution = self.resolver.resolve(validated, cancel_token).await?;

            let mut mentions = Vec::new();
            for section in sections {
                let occurrences = count_occurrences(&section.content, &validated.entity.name);
                let is_home_section =
                    section.section_type.as_str() == validated.entity.section_type;
                let count = if occurrences > 0 {
                    occurrences
                } else if is_home_section {
                    // The extractor saw it here even if the surface form
                    // differs from the canonical spelling.
                    1
                } else {
                    continue;
                };
                mentions.push(EntityMention {
                    node_id: resolution.node_id,
                    paper_id: paper_id.to_string(),
                    section_type: section.section_type,
                    mention_count: count as u32,
                });
            }
            if !mentions.is_empty() {
                self.repo.insert_entity_mentions(mentions).await?;
            }

            resolutions.insert(validated.canonical_name.clone(), resolution);
        }

        Ok(resolutions)
    }

    async fn persist_edges(
        &self,
        outcome: &ValidationOutcome,
        resolutions: &HashMap<String, ResolutionOutcome>,
        paper_id: &str,
    ) -> Result<usize, RepoError> {
        let mut persisted = 0usize;

        for validated in outcome.surviving_edges() {
            let (Some(source), Some(target)) = (
                resolutions.get(&validated.source_canonical),
                resolutions.get(&validated.target_canonical),
            ) else {
                warn!(
                    source = %validated.source_canonical,
                    target = %validated.target_canonical,
                    "edge endpoint was not resolved, skipping"
                );
                continue;
            };

            let source_id = source.canonical_node_id;
            let target_id = target.canonical_node_id;
            if source_id == target_id {
                // Resolution collapsed both endpoints into one canonical.
                continue;
            }

            let section_type = SectionType::parse(&validated.relationship.section_type)
                .unwrap_or(SectionType::Other);
            let mut provenance = Provenance::new(paper_id, section_type);
            provenance.char_span = validated.relationship.char_span;

            let mut edge = Edge::new(
                source_id,
                target_id,
                validated.relation,
                validated.adjusted_confidence,
                provenance,
            )
            .with_evidence(validated.relationship.evidence.clone());
            edge.review_status = validated.review_status;

            match self.repo.insert_edge(edge).await {
                Ok(_) => persisted += 1,
                Err(RepoError::InvalidReference(reason)) => {
                    warn!(%reason, "skipping edge");
                }
                Err(err) => return Err(err),
            }
        }

        Ok(persisted)
    }
}

fn check(
    cancel_token: &CancellationToken,
    stage: &'static str,
    stats: &PipelineStats,
) -> Result<(), (StageFailure, PipelineStats)> {
    cancel::check(cancel_token).map_err(|_| {
        (
            StageFailure {
                stage,
                code: ErrorCode::Cancelled,
                message: "cancelled".to_string(),
            },
            stats.clone(),
        )
    })
}

fn stage_repo(stage: &'static str, err: RepoError) -> StageFailure {
    let code = match &err {
        RepoError::Integrity(_) => ErrorCode::IntegrityViolation,
        RepoError::NotFound(_) => ErrorCode::NotFound,
        RepoError::InvalidReference(_) => ErrorCode::Internal,
    };
    StageFailure {
        stage,
        code,
        message: err.to_string(),
    }
}

fn stage_agent(stage: &'static str, err: AgentError) -> StageFailure {
    let code = match &err {
        AgentError::Transport(_) => ErrorCode::Transport,
        AgentError::ProviderRefused(_) => ErrorCode::ProviderRefused,
        AgentError::SchemaInvalid(_) | AgentError::Truncated => ErrorCode::SchemaInvalid,
        AgentError::Cache(_) => ErrorCode::Internal,
        AgentError::Cancelled => ErrorCode::Cancelled,
    };
    StageFailure {
        stage,
        code,
        message: err.to_string(),
    }
}

fn stage_resolver(stage: &'static str, err: ResolverError) -> StageFailure {
    let code = match &err {
        ResolverError::Repo(RepoError::Integrity(_)) => ErrorCode::IntegrityViolation,
        ResolverError::Repo(_) => ErrorCode::Internal,
        ResolverError::Embedding(AgentError::Transport(_)) => ErrorCode::Transport,
        ResolverError::Embedding(_) => ErrorCode::Internal,
    };
    StageFailure {
        stage,
        code,
        message: err.to_string(),
    }
}

fn count_occurrences(haystack: &str, needle: &str) -> usize {
    if needle.is_empty() {
        return 0;
    }
    let haystack = haystack.to_lowercase();
    let needle = needle.to_lowercase();
    haystack.matches(&needle).count()
}
