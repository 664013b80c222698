use crate::validator::ValidatedEntity;
use agents::embedder::EmbeddingClient;
use agents::provider::AgentError;
use runtime::cancel::CancellationToken;
use scholia_core::canonical::{definition_trigrams, normalize_alias, Canonicalizer};
use scholia_core::model::{
    EmbeddingPair, EntityAlias, EntityLink, EntityType, LinkStatus, LinkType, Node, NodeMetadata,
};
use scholia_core::vecmath::{cosine_similarity, reduce_embedding};
use std::collections::HashSet;
use std::sync::Arc;
use storage::repo::{GraphRepository, LinkFilter, RepoError, SimilarNodesQuery};
use thiserror::Error;
use tracing::{debug, warn};

const INDEX_DIM: usize = 768;

#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("repository error: {0}")]
    Repo(#[from] RepoError),
    #[error("embedding failed: {0}")]
    Embedding(#[from] AgentError),
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// ANN proposal thresholds; Dataset and Metric merge more cautiously.
    pub propose_threshold: f32,
    pub propose_threshold_strict: f32,
    /// Auto-approval thresholds.
    pub auto_threshold: f32,
    pub auto_threshold_strict: f32,
    pub max_candidates: usize,
    /// Names must be strictly longer than this to auto-approve; bans
    /// acronym merges.
    pub min_auto_name_len: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            propose_threshold: 0.90,
            propose_threshold_strict: 0.92,
            auto_threshold: 0.95,
            auto_threshold_strict: 0.97,
            max_candidates: 50,
            min_auto_name_len: 5,
        }
    }
}

impl ResolverConfig {
    fn propose_for(&self, entity_type: EntityType) -> f32 {
        match entity_type {
            EntityType::Dataset | EntityType::Metric => self.propose_threshold_strict,
            _ => self.propose_threshold,
        }
    }

    fn auto_for(&self, entity_type: EntityType) -> f32 {
        match entity_type {
            EntityType::Dataset | EntityType::Metric => self.auto_threshold_strict,
            _ => self.auto_threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkDisposition {
    /// No similar node cleared the proposal threshold; the entity is its
    /// own canonical root.
    NewRoot,
    /// Tier A matched an existing node id; no new node was created.
    ExactMatch,
    AutoApproved { canonical_node_id: u64 },
    Proposed { canonical_node_id: u64 },
}

#[derive(Debug, Clone)]
pub struct ResolutionOutcome {
    /// The node carrying this entity's identity.
    pub node_id: u64,
    /// Where queries should land after following approved links.
    pub canonical_node_id: u64,
    pub disposition: LinkDisposition,
}

/// Two-tier resolution: exact canonical-key reuse, then embedding-based
/// linking with a deterministic canonical choice. Links keep node identity
/// so merges stay reversible.
pub struct EntityResolver {
    repo: Arc<dyn GraphRepository>,
    embedder: Arc<EmbeddingClient>,
    canonicalizer: Canonicalizer,
    config: ResolverConfig,
}

impl EntityResolver {
    pub fn new(
        repo: Arc<dyn GraphRepository>,
        embedder: Arc<EmbeddingClient>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            repo,
            embedder,
            canonicalizer: Canonicalizer::new(),
            config,
        }
    }

    pub async fn resolve(
        &self,
        validated: &ValidatedEntity,
        cancel_token: &CancellationToken,
    ) -> Result<ResolutionOutcome, ResolverError> {
        let canonical_key = self.canonicalizer.canonicalize(&validated.entity.name);
        let entity_type = validated.entity_type;

        // Tier A: exact canonicalization.
        let keys = vec![(canonical_key.clone(), entity_type)];
        if let Some(existing) = self
            .repo
            .find_nodes_by_canonical(&keys)
            .await?
            .get(&keys[0])
            .copied()
        {
            let root = self.resolve_root(existing).await?;
            self.insert_alias(existing, &validated.entity.name).await?;
            return Ok(ResolutionOutcome {
                node_id: existing,
                canonical_node_id: root,
                disposition: LinkDisposition::ExactMatch,
            });
        }

        // Tier B: embed, insert the node, then look for semantic kin.
        let embed_text = match &validated.entity.definition {
            Some(definition) => format!("{}: {definition}", validated.entity.name),
            None => validated.entity.name.clone(),
        };
        let raw = self.embedder.embed_one(&embed_text, cancel_token).await?;
        let index = reduce_embedding(&raw, INDEX_DIM);

        let mut node = Node::new(entity_type, canonical_key.clone(), validated.entity.confidence);
        node.adjusted_confidence = validated.adjusted_confidence;
        node.review_status = validated.review_status;
        node.metadata = NodeMetadata {
            definition: validated.entity.definition.clone(),
            evidence: validated.entity.evidence.clone(),
            aliases: validated.entity.aliases.clone(),
        };
        node.embedding = Some(EmbeddingPair {
            raw: raw.clone(),
            index: index.clone(),
        });
        let node_id = self.repo.insert_node(node).await?;
        self.insert_alias(node_id, &validated.entity.name).await?;
        for alias in &validated.entity.aliases {
            self.insert_alias(node_id, alias).await?;
        }

        let candidates = self
            .repo
            .find_similar_nodes(SimilarNodesQuery {
                index_embedding: index,
                entity_type,
                threshold: self.config.propose_for(entity_type),
                limit: self.config.max_candidates,
            })
            .await?;
        let candidate_ids: Vec<u64> = candidates
            .iter()
            .map(|(id, _)| *id)
            .filter(|id| *id != node_id)
            .collect();

        if candidate_ids.is_empty() {
            return Ok(ResolutionOutcome {
                node_id,
                canonical_node_id: node_id,
                disposition: LinkDisposition::NewRoot,
            });
        }

        // Rerank on the full-dimension embeddings.
        let candidate_nodes = self.repo.get_nodes_by_ids(&candidate_ids).await?;
        let mut reranked: Vec<(Node, f32)> = candidate_nodes
            .into_iter()
            .filter_map(|candidate| {
                let candidate_raw = candidate.embedding.as_ref()?.raw.clone();
                let similarity = cosine_similarity(&raw, &candidate_raw)?;
                Some((candidate, similarity))
            })
            .collect();
        reranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.id.cmp(&b.0.id))
        });

        let Some((best, best_similarity)) = reranked.first().cloned() else {
            return Ok(ResolutionOutcome {
                node_id,
                canonical_node_id: node_id,
                disposition: LinkDisposition::NewRoot,
            });
        };

        // Deterministic canonical choice among candidates plus self.
        let self_node = self
            .repo
            .get_nodes_by_ids(&[node_id])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RepoError::NotFound(format!("node {node_id}")))?;
        let canonical = select_canonical(&self_node, reranked.iter().map(|(n, _)| n));

        if canonical == node_id {
            // The new entity itself is the better canonical; leave existing
            // nodes untouched and let the batch deduper revisit.
            debug!(node_id, "new entity selected as canonical, no link emitted");
            return Ok(ResolutionOutcome {
                node_id,
                canonical_node_id: node_id,
                disposition: LinkDisposition::NewRoot,
            });
        }

        // Cycle avoidance: land on the current root.
        let root = self.resolve_root(canonical).await?;

        let auto = best_similarity >= self.config.auto_for(entity_type)
            && validated.entity.name.chars().count() > self.config.min_auto_name_len
            && self.shares_signal(&self_node, &best).await?;

        let status = if auto {
            LinkStatus::Approved
        } else {
            LinkStatus::Proposed
        };
        let link = EntityLink {
            id: 0,
            node_id,
            canonical_node_id: root,
            link_type: LinkType::AliasOf,
            status,
            confidence: best_similarity.clamp(0.0, 1.0),
            evidence: format!(
                "cosine {:.3} against {}",
                best_similarity, best.canonical_name
            ),
        };
        match self.repo.insert_entity_link(link).await {
            Ok(_) => {}
            Err(RepoError::Integrity(reason)) => {
                // The root moved under us; keep the node standalone rather
                // than persist a cycle.
                warn!(node_id, %reason, "skipping alias link");
                return Ok(ResolutionOutcome {
                    node_id,
                    canonical_node_id: node_id,
                    disposition: LinkDisposition::NewRoot,
                });
            }
            Err(err) => return Err(err.into()),
        }

        Ok(ResolutionOutcome {
            node_id,
            canonical_node_id: if auto { root } else { node_id },
            disposition: if auto {
                LinkDisposition::AutoApproved {
                    canonical_node_id: root,
                }
            } else {
                LinkDisposition::Proposed {
                    canonical_node_id: root,
                }
            },
        })
    }

    /// Follow approved alias links to the current root.
    pub async fn resolve_root(&self, mut node_id: u64) -> Result<u64, ResolverError> {
        let mut seen = HashSet::new();
        seen.insert(node_id);
        loop {
            let links = self
                .repo
                .get_entity_links(LinkFilter {
                    node_id: Some(node_id),
                    status: Some(LinkStatus::Approved),
                    link_type: Some(LinkType::AliasOf),
                    ..LinkFilter::default()
                })
                .await?;
            match links.first() {
                Some(link) if seen.insert(link.canonical_node_id) => {
                    node_id = link.canonical_node_id;
                }
                _ => return Ok(node_id),
            }
        }
    }

    async fn insert_alias(&self, canonical_node_id: u64, alias: &str) -> Result<(), ResolverError> {
        self.repo
            .insert_entity_alias(EntityAlias {
                canonical_node_id,
                alias: alias.to_string(),
                normalized: normalize_alias(alias),
            })
            .await?;
        Ok(())
    }

    /// Shared-signal check for auto-approval: alias intersection, a common
    /// definition 3-gram, or one definition quoted inside the other's
    /// evidence.
    async fn shares_signal(&self, a: &Node, b: &Node) -> Result<bool, ResolverError> {
        let mut a_aliases: HashSet<String> = a
            .metadata
            .aliases
            .iter()
            .map(|s| normalize_alias(s))
            .collect();
        a_aliases.insert(normalize_alias(&a.canonical_name));
        for alias in self.repo.get_entity_aliases(a.id).await? {
            a_aliases.insert(alias.normalized);
        }

        let mut b_aliases: HashSet<String> = b
            .metadata
            .aliases
            .iter()
            .map(|s| normalize_alias(s))
            .collect();
        b_aliases.insert(normalize_alias(&b.canonical_name));
        for alias in self.repo.get_entity_aliases(b.id).await? {
            b_aliases.insert(alias.normalized);
        }

        if a_aliases.intersection(&b_aliases).next().is_some() {
            return Ok(true);
        }

        if let (Some(def_a), Some(def_b)) =
            (&a.metadata.definition, &b.metadata.definition)
        {
            let grams_a = definition_trigrams(def_a);
            let grams_b = definition_trigrams(def_b);
            if grams_a.intersection(&grams_b).next().is_some() {
                return Ok(true);
            }
        }

        let quoted = |definition: &Option<String>, evidence: &Option<String>| {
            match (definition, evidence) {
                (Some(def), Some(ev)) if !def.is_empty() => ev.contains(def.as_str()),
                _ => false,
            }
        };
        Ok(quoted(&a.metadata.definition, &b.metadata.evidence)
            || quoted(&b.metadata.definition, &a.metadata.evidence))
    }
}

/// Canonical selection: mention count descending, creation order ascending,
/// lexicographically smallest canonical name. Deterministic given inputs.
fn select_canonical<'a>(self_node: &'a Node, candidates: impl Iterator<Item = &'a Node>) -> u64 {
    let mut best = self_node;
    for candidate in candidates {
        let ordering = candidate
            .mention_count
            .cmp(&best.mention_count)
            .then(best.created_at.cmp(&candidate.created_at))
            .then(best.canonical_name.cmp(&candidate.canonical_name));
        if ordering == std::cmp::Ordering::Greater {
            best = candidate;
        }
    }
    best.id
}
