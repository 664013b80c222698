use crate::index::{AdjacencyGraph, VectorIndex};
use async_trait::async_trait;
use scholia_core::model::{
    Edge, EntityAlias, EntityLink, EntityMention, EntityType, InferredInsight, LinkStatus,
    LinkType, Node, Paper, ReviewStatus, Section,
};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Error, Debug)]
pub enum RepoError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid reference: {0}")]
    InvalidReference(String),
    #[error("integrity violation: {0}")]
    Integrity(String),
}

/// Query for the fast ANN tier of entity resolution.
#[derive(Debug, Clone)]
pub struct SimilarNodesQuery {
    pub index_embedding: Vec<f32>,
    pub entity_type: EntityType,
    pub threshold: f32,
    pub limit: usize,
}

#[derive(Debug, Clone, Default)]
pub struct LinkFilter {
    pub node_id: Option<u64>,
    pub canonical_node_id: Option<u64>,
    pub status: Option<LinkStatus>,
    pub link_type: Option<LinkType>,
}

#[derive(Debug, Clone, Default)]
pub struct GraphData {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub mentions: Vec<EntityMention>,
}

/// Everything the core requires from a store. Persistent backends implement
/// this; the in-memory implementation below is the reference.
#[async_trait]
pub trait GraphRepository: Send + Sync {
    async fn upsert_paper(&self, paper: Paper) -> Result<(), RepoError>;
    async fn get_paper(&self, id: &str) -> Result<Option<Paper>, RepoError>;
    async fn get_existing_paper_ids(&self, ids: &[String]) -> Result<HashSet<String>, RepoError>;
    async fn get_paper_embedding(&self, id: &str) -> Result<Option<Vec<f32>>, RepoError>;
    async fn upsert_paper_embedding(&self, id: &str, embedding: Vec<f32>) -> Result<(), RepoError>;

    async fn insert_sections(&self, sections: Vec<Section>) -> Result<(), RepoError>;
    async fn get_sections(&self, paper_id: &str) -> Result<Vec<Section>, RepoError>;

    async fn insert_node(&self, node: Node) -> Result<u64, RepoError>;
    async fn get_nodes_by_ids(&self, ids: &[u64]) -> Result<Vec<Node>, RepoError>;
    async fn find_nodes_by_canonical(
        &self,
        keys: &[(String, EntityType)],
    ) -> Result<HashMap<(String, EntityType), u64>, RepoError>;
    async fn find_similar_nodes(
        &self,
        query: SimilarNodesQuery,
    ) -> Result<Vec<(u64, f32)>, RepoError>;
    async fn upsert_node_embeddings(
        &self,
        id: u64,
        raw: Vec<f32>,
        index: Vec<f32>,
    ) -> Result<(), RepoError>;
    async fn update_node_review(
        &self,
        id: u64,
        status: ReviewStatus,
        adjusted_confidence: f32,
    ) -> Result<(), RepoError>;
    /// Fails unless every edge and mention referring to the nodes has been
    /// rewritten or deleted first.
    async fn delete_nodes(&self, ids: &[u64]) -> Result<(), RepoError>;

    async fn insert_edge(&self, edge: Edge) -> Result<u64, RepoError>;
    async fn update_edge_endpoints(
        &self,
        id: u64,
        new_source: Option<u64>,
        new_target: Option<u64>,
    ) -> Result<(), RepoError>;
    async fn delete_edges(&self, ids: &[u64]) -> Result<(), RepoError>;

    async fn insert_entity_mentions(&self, mentions: Vec<EntityMention>) -> Result<(), RepoError>;
    async fn update_mentions_node(&self, loser: u64, winner: u64) -> Result<(), RepoError>;

    async fn insert_entity_link(&self, link: EntityLink) -> Result<u64, RepoError>;
    async fn get_entity_links(&self, filter: LinkFilter) -> Result<Vec<EntityLink>, RepoError>;
    async fn update_entity_link_status(&self, id: u64, status: LinkStatus)
        -> Result<(), RepoError>;
    /// Idempotent on (canonical_node_id, normalized alias).
    async fn insert_entity_alias(&self, alias: EntityAlias) -> Result<(), RepoError>;
    async fn get_entity_aliases(&self, canonical_node_id: u64) -> Result<Vec<EntityAlias>, RepoError>;

    async fn insert_insights(&self, insights: Vec<InferredInsight>) -> Result<(), RepoError>;
    async fn get_insights(&self) -> Result<Vec<InferredInsight>, RepoError>;

    /// Full graph, every review status. Used by the batch deduper.
    async fn get_graph_data(&self) -> Result<GraphData, RepoError>;
    /// Approved surface reachable within `depth` hops of the seed nodes,
    /// walking edges in both directions.
    async fn get_subgraph(&self, seed_node_ids: &[u64], depth: u8) -> Result<GraphData, RepoError>;
    async fn get_nodes_by_review(&self, status: ReviewStatus) -> Result<Vec<Node>, RepoError>;
    async fn get_edges_by_review(&self, status: ReviewStatus) -> Result<Vec<Edge>, RepoError>;
}

#[derive(Default)]
struct State {
    papers: HashMap<String, Paper>,
    sections: HashMap<String, Vec<Section>>,
    nodes: HashMap<u64, Node>,
    canonical_index: HashMap<(String, EntityType), u64>,
    vector_index: VectorIndex,
    edges: HashMap<u64, Edge>,
    adjacency: AdjacencyGraph,
    mentions: Vec<EntityMention>,
    links: HashMap<u64, EntityLink>,
    aliases: Vec<EntityAlias>,
    insights: Vec<InferredInsight>,
    next_node_id: u64,
    next_edge_id: u64,
    next_link_id: u64,
    created_counter: u64,
}

/// In-memory reference store. A single writer lock keeps every mutation
/// atomic with respect to readers.
pub struct MemoryRepository {
    state: RwLock<State>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    fn node_exists(&self, id: u64) -> bool {
        self.nodes.contains_key(&id)
    }

    fn referencing_edges(&self, ids: &HashSet<u64>) -> Vec<u64> {
        self.edges
            .values()
            .filter(|e| ids.contains(&e.source) || ids.contains(&e.target))
            .map(|e| e.id)
            .collect()
    }
}

#[async_trait]
impl GraphRepository for MemoryRepository {
    async fn upsert_paper(&self, paper: Paper) -> Result<(), RepoError> {
        let mut state = self.state.write().await;
        match state.papers.get_mut(&paper.id) {
            Some(existing) => {
                // Metadata-only upsert; an already stored embedding survives
                // unless the new paper carries one.
                let mut paper = paper;
                if paper.embedding.is_none() {
                    paper.embedding = existing.embedding.take();
                }
                *existing = paper;
            }
            None => {
                state.papers.insert(paper.id.clone(), paper);
            }
        }
        Ok(())
    }

    async fn get_paper(&self, id: &str) -> Result<Option<Paper>, RepoError> {
        let state = self.state.read().await;
        Ok(state.papers.get(id).cloned())
    }

    async fn get_existing_paper_ids(&self, ids: &[String]) -> Result<HashSet<String>, RepoError> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter(|id| state.papers.contains_key(*id))
            .cloned()
            .collect())
    }

    async fn get_paper_embedding(&self, id: &str) -> Result<Option<Vec<f32>>, RepoError> {
        let state = self.state.read().await;
        Ok(state.papers.get(id).and_then(|p| p.embedding.clone()))
    }

    async fn upsert_paper_embedding(&self, id: &str, embedding: Vec<f32>) -> Result<(), RepoError> {
        let mut state = self.state.write().await;
        let paper = state
            .papers
            .get_mut(id)
            .ok_or_else(|| RepoError::NotFound(format!("paper {id}")))?;
        paper.embedding = Some(embedding);
        Ok(())
    }

    async fn insert_sections(&self, sections: Vec<Section>) -> Result<(), RepoError> {
        let mut state = self.state.write().await;
        for section in sections {
            if !state.papers.contains_key(&section.paper_id) {
                return Err(RepoError::InvalidReference(format!(
                    "section refers to unknown paper {}",
                    section.paper_id
                )));
            }
            let parts = state.sections.entry(section.paper_id.clone()).or_default();
            // Re-running a stage overwrites the same part rather than
            // appending a duplicate.
            parts.retain(|p| {
                !(p.section_type == section.section_type && p.part_index == section.part_index)
            });
            parts.push(section);
        }
        for parts in state.sections.values_mut() {
            parts.sort_by_key(|p| (p.section_type.as_str(), p.part_index));
        }
        Ok(())
    }

    async fn get_sections(&self, paper_id: &str) -> Result<Vec<Section>, RepoError> {
        let state = self.state.read().await;
        Ok(state.sections.get(paper_id).cloned().unwrap_or_default())
    }

    async fn insert_node(&self, mut node: Node) -> Result<u64, RepoError> {
        let mut state = self.state.write().await;
        state.next_node_id += 1;
        state.created_counter += 1;
        node.id = state.next_node_id;
        node.created_at = state.created_counter;

        let key = (node.canonical_name.clone(), node.entity_type);
        state.canonical_index.entry(key).or_insert(node.id);
        if let Some(pair) = &node.embedding {
            state.vector_index.insert(node.id, pair.index.clone());
        }
        let id = node.id;
        state.nodes.insert(id, node);
        Ok(id)
    }

    async fn get_nodes_by_ids(&self, ids: &[u64]) -> Result<Vec<Node>, RepoError> {
        let state = self.state.read().await;
        let mut out: Vec<Node> = ids
            .iter()
            .filter_map(|id| state.nodes.get(id).cloned())
            .collect();
        out.sort_by_key(|n| n.id);
        Ok(out)
    }

    async fn find_nodes_by_canonical(
        &self,
        keys: &[(String, EntityType)],
    ) -> Result<HashMap<(String, EntityType), u64>, RepoError> {
        let state = self.state.read().await;
        Ok(keys
            .iter()
            .filter_map(|key| state.canonical_index.get(key).map(|id| (key.clone(), *id)))
            .collect())
    }

    async fn find_similar_nodes(
        &self,
        query: SimilarNodesQuery,
    ) -> Result<Vec<(u64, f32)>, RepoError> {
        let state = self.state.read().await;
        let results = state.vector_index.search(
            &query.index_embedding,
            query.limit,
            query.threshold,
            |id| {
                state
                    .nodes
                    .get(&id)
                    .map(|n| n.entity_type == query.entity_type)
                    .unwrap_or(false)
            },
        );
        Ok(results)
    }

    async fn upsert_node_embeddings(
        &self,
        id: u64,
        raw: Vec<f32>,
        index: Vec<f32>,
    ) -> Result<(), RepoError> {
        let mut state = self.state.write().await;
        if !state.node_exists(id) {
            return Err(RepoError::NotFound(format!("node {id}")));
        }
        state.vector_index.insert(id, index.clone());
        if let Some(node) = state.nodes.get_mut(&id) {
            node.embedding = Some(scholia_core::model::EmbeddingPair { raw, index });
        }
        Ok(())
    }

    async fn update_node_review(
        &self,
        id: u64,
        status: ReviewStatus,
        adjusted_confidence: f32,
    ) -> Result<(), RepoError> {
        let mut state = self.state.write().await;
        let node = state
            .nodes
            .get_mut(&id)
            .ok_or_else(|| RepoError::NotFound(format!("node {id}")))?;
        node.review_status = status;
        node.adjusted_confidence = adjusted_confidence.clamp(0.0, 1.0);
        Ok(())
    }

    async fn delete_nodes(&self, ids: &[u64]) -> Result<(), RepoError> {
        let mut state = self.state.write().await;
        let id_set: HashSet<u64> = ids.iter().copied().collect();

        let referencing = state.referencing_edges(&id_set);
        if !referencing.is_empty() {
            return Err(RepoError::Integrity(format!(
                "{} edges still reference nodes queued for deletion",
                referencing.len()
            )));
        }
        if state.mentions.iter().any(|m| id_set.contains(&m.node_id)) {
            return Err(RepoError::Integrity(
                "mentions still reference nodes queued for deletion".to_string(),
            ));
        }

        for id in ids {
            if let Some(node) = state.nodes.remove(id) {
                let key = (node.canonical_name.clone(), node.entity_type);
                if state.canonical_index.get(&key) == Some(id) {
                    state.canonical_index.remove(&key);
                }
            }
            state.vector_index.delete(*id);
            state.adjacency.remove_node(*id);
            state.links.retain(|_, l| l.node_id != *id && l.canonical_node_id != *id);
            state.aliases.retain(|a| a.canonical_node_id != *id);
        }
        Ok(())
    }

    async fn insert_edge(&self, mut edge: Edge) -> Result<u64, RepoError> {
        let mut state = self.state.write().await;
        if edge.source == edge.target {
            return Err(RepoError::InvalidReference(format!(
                "self edge on node {}",
                edge.source
            )));
        }
        if !state.node_exists(edge.source) {
            return Err(RepoError::InvalidReference(format!(
                "edge source {} does not exist",
                edge.source
            )));
        }
        if !state.node_exists(edge.target) {
            return Err(RepoError::InvalidReference(format!(
                "edge target {} does not exist",
                edge.target
            )));
        }

        // Upsert per paper: an identical re-run refreshes rather than
        // duplicates.
        let existing = state
            .edges
            .values()
            .find(|e| {
                e.source == edge.source
                    && e.target == edge.target
                    && e.relation == edge.relation
                    && e.provenance.paper_id == edge.provenance.paper_id
            })
            .map(|e| e.id);
        if let Some(id) = existing {
            if let Some(current) = state.edges.get_mut(&id) {
                if edge.confidence > current.confidence {
                    current.confidence = edge.confidence;
                    current.evidence = edge.evidence;
                    current.review_status = edge.review_status;
                }
            }
            return Ok(id);
        }

        state.next_edge_id += 1;
        edge.id = state.next_edge_id;
        state.adjacency.add_edge(edge.id, edge.source, edge.target);
        let id = edge.id;
        state.edges.insert(id, edge);
        Ok(id)
    }

    async fn update_edge_endpoints(
        &self,
        id: u64,
        new_source: Option<u64>,
        new_target: Option<u64>,
    ) -> Result<(), RepoError> {
        let mut state = self.state.write().await;
        let current = state
            .edges
            .get(&id)
            .ok_or_else(|| RepoError::NotFound(format!("edge {id}")))?
            .clone();

        let source = new_source.unwrap_or(current.source);
        let target = new_target.unwrap_or(current.target);
        if source == target {
            return Err(RepoError::InvalidReference(format!(
                "endpoint update would self-loop edge {id}"
            )));
        }
        if !state.node_exists(source) || !state.node_exists(target) {
            return Err(RepoError::InvalidReference(format!(
                "endpoint update on edge {id} references missing node"
            )));
        }

        state.adjacency.remove_edge(id, current.source, current.target);
        state.adjacency.add_edge(id, source, target);
        if let Some(edge) = state.edges.get_mut(&id) {
            edge.source = source;
            edge.target = target;
        }
        Ok(())
    }

    async fn delete_edges(&self, ids: &[u64]) -> Result<(), RepoError> {
        let mut state = self.state.write().await;
        for id in ids {
            if let Some(edge) = state.edges.remove(id) {
                state.adjacency.remove_edge(edge.id, edge.source, edge.target);
            }
        }
        Ok(())
    }

    async fn insert_entity_mentions(&self, mentions: Vec<EntityMention>) -> Result<(), RepoError> {
        let mut state = self.state.write().await;
        for mention in mentions {
            if !state.node_exists(mention.node_id) {
                return Err(RepoError::InvalidReference(format!(
                    "mention refers to unknown node {}",
                    mention.node_id
                )));
            }
            if let Some(node) = state.nodes.get_mut(&mention.node_id) {
                node.mention_count += mention.mention_count;
            }
            let existing = state.mentions.iter_mut().find(|m| {
                m.node_id == mention.node_id
                    && m.paper_id == mention.paper_id
                    && m.section_type == mention.section_type
            });
            match existing {
                Some(m) => m.mention_count += mention.mention_count,
                None => state.mentions.push(mention),
            }
        }
        Ok(())
    }

    async fn update_mentions_node(&self, loser: u64, winner: u64) -> Result<(), RepoError> {
        let mut state = self.state.write().await;
        if !state.node_exists(winner) {
            return Err(RepoError::InvalidReference(format!(
                "mention rewrite target {winner} does not exist"
            )));
        }
        let mut moved = 0u32;
        for mention in state.mentions.iter_mut() {
            if mention.node_id == loser {
                mention.node_id = winner;
                moved += mention.mention_count;
            }
        }
        if moved > 0 {
            if let Some(node) = state.nodes.get_mut(&winner) {
                node.mention_count += moved;
            }
            if let Some(node) = state.nodes.get_mut(&loser) {
                node.mention_count = node.mention_count.saturating_sub(moved);
            }
        }
        Ok(())
    }

    async fn insert_entity_link(&self, mut link: EntityLink) -> Result<u64, RepoError> {
        let mut state = self.state.write().await;
        if !state.node_exists(link.node_id) || !state.node_exists(link.canonical_node_id) {
            return Err(RepoError::InvalidReference(
                "entity link references missing node".to_string(),
            ));
        }
        if link.node_id == link.canonical_node_id {
            return Err(RepoError::InvalidReference(
                "entity link to self".to_string(),
            ));
        }
        // Acyclicity guard: an approved alias target must itself be a root.
        if link.link_type == LinkType::AliasOf && link.status == LinkStatus::Approved {
            let canonical_has_outgoing = state.links.values().any(|l| {
                l.node_id == link.canonical_node_id
                    && l.link_type == LinkType::AliasOf
                    && l.status == LinkStatus::Approved
            });
            if canonical_has_outgoing {
                return Err(RepoError::Integrity(format!(
                    "canonical node {} is itself aliased; resolve to the root first",
                    link.canonical_node_id
                )));
            }
        }

        let existing = state.links.values().find(|l| {
            l.node_id == link.node_id
                && l.canonical_node_id == link.canonical_node_id
                && l.link_type == link.link_type
        });
        if let Some(existing) = existing {
            return Ok(existing.id);
        }

        state.next_link_id += 1;
        link.id = state.next_link_id;
        let id = link.id;
        state.links.insert(id, link);
        Ok(id)
    }

    async fn get_entity_links(&self, filter: LinkFilter) -> Result<Vec<EntityLink>, RepoError> {
        let state = self.state.read().await;
        let mut out: Vec<EntityLink> = state
            .links
            .values()
            .filter(|l| filter.node_id.map_or(true, |id| l.node_id == id))
            .filter(|l| {
                filter
                    .canonical_node_id
                    .map_or(true, |id| l.canonical_node_id == id)
            })
            .filter(|l| filter.status.map_or(true, |s| l.status == s))
            .filter(|l| filter.link_type.map_or(true, |t| l.link_type == t))
            .cloned()
            .collect();
        out.sort_by_key(|l| l.id);
        Ok(out)
    }

    async fn update_entity_link_status(
        &self,
        id: u64,
        status: LinkStatus,
    ) -> Result<(), RepoError> {
        let mut state = self.state.write().await;
        let link = state
            .links
            .get_mut(&id)
            .ok_or_else(|| RepoError::NotFound(format!("entity link {id}")))?;
        link.status = status;
        Ok(())
    }

    async fn insert_entity_alias(&self, alias: EntityAlias) -> Result<(), RepoError> {
        let mut state = self.state.write().await;
        if !state.node_exists(alias.canonical_node_id) {
            return Err(RepoError::InvalidReference(format!(
                "alias refers to unknown node {}",
                alias.canonical_node_id
            )));
        }
        let duplicate = state.aliases.iter().any(|a| {
            a.canonical_node_id == alias.canonical_node_id && a.normalized == alias.normalized
        });
        if !duplicate {
            state.aliases.push(alias);
        }
        Ok(())
    }

    async fn get_entity_aliases(
        &self,
        canonical_node_id: u64,
    ) -> Result<Vec<EntityAlias>, RepoError> {
        let state = self.state.read().await;
        Ok(state
            .aliases
            .iter()
            .filter(|a| a.canonical_node_id == canonical_node_id)
            .cloned()
            .collect())
    }

    async fn insert_insights(&self, insights: Vec<InferredInsight>) -> Result<(), RepoError> {
        let mut state = self.state.write().await;
        for insight in insights {
            let key = insight.dedup_key();
            let duplicate = state.insights.iter().any(|i| i.dedup_key() == key);
            if !duplicate {
                state.insights.push(insight);
            }
        }
        Ok(())
    }

    async fn get_insights(&self) -> Result<Vec<InferredInsight>, RepoError> {
        let state = self.state.read().await;
        Ok(state.insights.clone())
    }

    async fn get_graph_data(&self) -> Result<GraphData, RepoError> {
        let state = self.state.read().await;
        let mut nodes: Vec<Node> = state.nodes.values().cloned().collect();
        nodes.sort_by_key(|n| n.id);
        let mut edges: Vec<Edge> = state.edges.values().cloned().collect();
        edges.sort_by_key(|e| e.id);
        Ok(GraphData {
            nodes,
            edges,
            mentions: state.mentions.clone(),
        })
    }

    async fn get_subgraph(&self, seed_node_ids: &[u64], depth: u8) -> Result<GraphData, RepoError> {
        let state = self.state.read().await;
        let reached: HashSet<u64> = state
            .adjacency
            .expand(seed_node_ids, depth)
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        tracing::debug!(seeds = seed_node_ids.len(), reached = reached.len(), depth, "induced subgraph");

        let mut nodes: Vec<Node> = state
            .nodes
            .values()
            .filter(|n| reached.contains(&n.id) && n.review_status == ReviewStatus::Approved)
            .cloned()
            .collect();
        nodes.sort_by_key(|n| n.id);
        let included: HashSet<u64> = nodes.iter().map(|n| n.id).collect();

        let mut edges: Vec<Edge> = state
            .edges
            .values()
            .filter(|e| {
                e.review_status == ReviewStatus::Approved
                    && included.contains(&e.source)
                    && included.contains(&e.target)
            })
            .cloned()
            .collect();
        edges.sort_by_key(|e| e.id);

        let mentions = state
            .mentions
            .iter()
            .filter(|m| included.contains(&m.node_id))
            .cloned()
            .collect();

        Ok(GraphData {
            nodes,
            edges,
            mentions,
        })
    }

    async fn get_nodes_by_review(&self, status: ReviewStatus) -> Result<Vec<Node>, RepoError> {
        let state = self.state.read().await;
        let mut out: Vec<Node> = state
            .nodes
            .values()
            .filter(|n| n.review_status == status)
            .cloned()
            .collect();
        out.sort_by_key(|n| n.id);
        Ok(out)
    }

    async fn get_edges_by_review(&self, status: ReviewStatus) -> Result<Vec<Edge>, RepoError> {
        let state = self.state.read().await;
        let mut out: Vec<Edge> = state
            .edges
            .values()
            .filter(|e| e.review_status == status)
            .cloned()
            .collect();
        out.sort_by_key(|e| e.id);
        Ok(out)
    }
}
