use scholia_core::distance::{first_divergence, levenshtein};
use scholia_core::model::{EntityType, Node, RelationType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use storage::repo::{GraphRepository, RepoError};
use thiserror::Error;
use tracing::{info, warn};

const DELETE_BATCH: usize = 100;
const FUZZY_MIN_NAME_LEN: usize = 5;
/// An edit inside the first positions usually changes the meaning
/// ("3DGS" vs "4DGS"), so fuzzy grouping ignores it.
const FUZZY_GUARD_PREFIX: usize = 3;

#[derive(Error, Debug)]
pub enum DedupeError {
    #[error("repository error: {0}")]
    Repo(#[from] RepoError),
    #[error("integrity violation: {0}")]
    Integrity(String),
}

#[derive(Debug, Clone, Copy)]
pub struct DedupeConfig {
    pub dry_run: bool,
}

impl Default for DedupeConfig {
    fn default() -> Self {
        Self { dry_run: false }
    }
}

/// Loser -> winner, serializable for the written merge map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeMap {
    pub merges: BTreeMap<u64, u64>,
    pub group_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct DedupeOutcome {
    pub merge_map: MergeMap,
    pub edges_rewritten: usize,
    pub edges_removed: usize,
    pub nodes_deleted: usize,
}

struct UnionFind {
    parent: HashMap<u64, u64>,
}

impl UnionFind {
    fn new() -> Self {
        Self {
            parent: HashMap::new(),
        }
    }

    fn find(&mut self, id: u64) -> u64 {
        let parent = *self.parent.get(&id).unwrap_or(&id);
        if parent == id {
            return id;
        }
        let root = self.find(parent);
        self.parent.insert(id, root);
        root
    }

    /// Attach `loser`'s tree under `winner`'s root.
    fn union_into(&mut self, winner: u64, loser: u64) {
        let winner_root = self.find(winner);
        let loser_root = self.find(loser);
        if winner_root != loser_root {
            self.parent.insert(loser_root, winner_root);
        }
    }
}

/// Offline batch merge of duplicate nodes. Exact groups merge on
/// (canonical_name, type); near-duplicate names merge on an edit distance
/// of exactly one outside the guarded prefix. Paper nodes only ever merge
/// on identical ids, which the exact grouping already guarantees.
pub async fn run_dedupe(
    repo: &dyn GraphRepository,
    config: DedupeConfig,
) -> Result<DedupeOutcome, DedupeError> {
    let graph = repo.get_graph_data().await?;
    let groups = build_groups(&graph.nodes);

    let mut outcome = DedupeOutcome::default();
    if groups.is_empty() {
        info!("dedupe found no duplicate groups");
        return Ok(outcome);
    }

    // Winner per group, then union-find with winners as roots.
    let mut union_find = UnionFind::new();
    let mut winners: HashSet<u64> = HashSet::new();
    let mut losers: HashSet<u64> = HashSet::new();

    for group in &groups {
        let winner = select_winner(group);
        winners.insert(winner.id);
        for node in group {
            if node.id != winner.id {
                losers.insert(node.id);
                union_find.union_into(winner.id, node.id);
            }
        }
    }

    if let Some(conflicted) = winners.intersection(&losers).next() {
        return Err(DedupeError::Integrity(format!(
            "node {conflicted} selected as both winner and loser"
        )));
    }

    for loser in &losers {
        let root = union_find.find(*loser);
        outcome.merge_map.merges.insert(*loser, root);
    }
    outcome.merge_map.group_count = groups.len();

    if config.dry_run {
        info!(
            merges = outcome.merge_map.merges.len(),
            groups = groups.len(),
            "dedupe dry run"
        );
        return Ok(outcome);
    }

    // Rewrite edges to roots; a rewrite collapsing both endpoints into the
    // same root deletes the edge instead.
    for edge in &graph.edges {
        let new_source = outcome.merge_map.merges.get(&edge.source).copied();
        let new_target = outcome.merge_map.merges.get(&edge.target).copied();
        if new_source.is_none() && new_target.is_none() {
            continue;
        }
        let source = new_source.unwrap_or(edge.source);
        let target = new_target.unwrap_or(edge.target);
        if source == target {
            repo.delete_edges(&[edge.id]).await?;
            outcome.edges_removed += 1;
        } else {
            repo.update_edge_endpoints(edge.id, new_source, new_target)
                .await?;
            outcome.edges_rewritten += 1;
        }
    }

    // Mention rewrites, one loser at a time.
    for (loser, winner) in &outcome.merge_map.merges {
        repo.update_mentions_node(*loser, *winner).await?;
    }

    // Post-rewrite edge dedupe: keep the highest confidence, lowest id.
    let rewritten = repo.get_graph_data().await?;
    let mut best: HashMap<(u64, u64, RelationType), (u64, f32)> = HashMap::new();
    let mut removable: Vec<u64> = Vec::new();
    for edge in &rewritten.edges {
        let key = (edge.source, edge.target, edge.relation);
        match best.get(&key) {
            None => {
                best.insert(key, (edge.id, edge.confidence));
            }
            Some(&(kept_id, kept_confidence)) => {
                let replace = edge.confidence > kept_confidence
                    || (edge.confidence == kept_confidence && edge.id < kept_id);
                if replace {
                    removable.push(kept_id);
                    best.insert(key, (edge.id, edge.confidence));
                } else {
                    removable.push(edge.id);
                }
            }
        }
    }
    if !removable.is_empty() {
        repo.delete_edges(&removable).await?;
        outcome.edges_removed += removable.len();
    }

    // Integrity scan before any deletion.
    let scan = repo.get_graph_data().await?;
    let dangling_edge = scan
        .edges
        .iter()
        .find(|e| losers.contains(&e.source) || losers.contains(&e.target));
    if let Some(edge) = dangling_edge {
        return Err(DedupeError::Integrity(format!(
            "edge {} still references a merged node",
            edge.id
        )));
    }
    if let Some(mention) = scan.mentions.iter().find(|m| losers.contains(&m.node_id)) {
        return Err(DedupeError::Integrity(format!(
            "mention of node {} still references a merged node",
            mention.node_id
        )));
    }

    let loser_ids: Vec<u64> = outcome.merge_map.merges.keys().copied().collect();
    for chunk in loser_ids.chunks(DELETE_BATCH) {
        repo.delete_nodes(chunk).await?;
        outcome.nodes_deleted += chunk.len();
    }

    info!(
        merges = outcome.merge_map.merges.len(),
        edges_rewritten = outcome.edges_rewritten,
        edges_removed = outcome.edges_removed,
        nodes_deleted = outcome.nodes_deleted,
        "dedupe complete"
    );
    Ok(outcome)
}

fn build_groups(nodes: &[Node]) -> Vec<Vec<Node>> {
    let mut groups: Vec<Vec<Node>> = Vec::new();

    // Exact groups on (canonical_name, type).
    let mut exact: BTreeMap<(String, String), Vec<Node>> = BTreeMap::new();
    for node in nodes {
        exact
            .entry((
                node.canonical_name.clone(),
                node.entity_type.as_str().to_string(),
            ))
            .or_default()
            .push(node.clone());
    }
    let mut grouped_ids: HashSet<u64> = HashSet::new();
    for group in exact.into_values() {
        if group.len() > 1 {
            grouped_ids.extend(group.iter().map(|n| n.id));
            groups.push(group);
        }
    }

    // Similar groups within each non-Paper type: adjacent names in sorted
    // order at edit distance exactly one, outside the guarded prefix.
    let mut by_type: BTreeMap<String, Vec<&Node>> = BTreeMap::new();
    for node in nodes {
        if node.entity_type == EntityType::Paper || grouped_ids.contains(&node.id) {
            continue;
        }
        if node.canonical_name.chars().count() > FUZZY_MIN_NAME_LEN {
            by_type
                .entry(node.entity_type.as_str().to_string())
                .or_default()
                .push(node);
        }
    }

    for members in by_type.values_mut() {
        members.sort_by(|a, b| a.canonical_name.cmp(&b.canonical_name));
        for pair in members.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if levenshtein(&a.canonical_name, &b.canonical_name) != 1 {
                continue;
            }
            match first_divergence(&a.canonical_name, &b.canonical_name) {
                Some(position) if position >= FUZZY_GUARD_PREFIX => {
                    groups.push(vec![a.clone(), b.clone()]);
                }
                _ => {
                    warn!(
                        a = %a.canonical_name,
                        b = %b.canonical_name,
                        "skipping fuzzy merge, edit falls in the guarded prefix"
                    );
                }
            }
        }
    }

    groups
}

/// Highest adjusted confidence, then highest original confidence, then
/// lowest id.
fn select_winner(group: &[Node]) -> &Node {
    group
        .iter()
        .min_by(|a, b| {
            b.adjusted_confidence
                .partial_cmp(&a.adjusted_confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    b.original_confidence
                        .partial_cmp(&a.original_confidence)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(a.id.cmp(&b.id))
        })
        .expect("groups are non-empty")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u64, name: &str, entity_type: EntityType, adjusted: f32) -> Node {
        let mut node = Node::new(entity_type, name, adjusted);
        node.id = id;
        node.adjusted_confidence = adjusted;
        node
    }

    #[test]
    fn exact_groups_require_same_name_and_type() {
        let nodes = vec![
            node(1, "nerf", EntityType::Method, 0.9),
            node(2, "nerf", EntityType::Method, 0.8),
            node(3, "nerf", EntityType::Concept, 0.7),
        ];
        let groups = build_groups(&nodes);
        assert_eq!(groups.len(), 1);
        let ids: Vec<u64> = groups[0].iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn fuzzy_groups_respect_the_prefix_guard() {
        let nodes = vec![
            node(1, "transformer", EntityType::Method, 0.9),
            node(2, "transformers", EntityType::Method, 0.8),
            node(3, "3dgs_x", EntityType::Method, 0.9),
            node(4, "4dgs_x", EntityType::Method, 0.8),
        ];
        let groups = build_groups(&nodes);
        // transformer/transformers differ at position 11; 3dgs_x/4dgs_x at
        // position 0, inside the guard.
        assert_eq!(groups.len(), 1);
        let names: Vec<&str> = groups[0].iter().map(|n| n.canonical_name.as_str()).collect();
        assert_eq!(names, vec!["transformer", "transformers"]);
    }

    #[test]
    fn short_names_never_fuzzy_merge() {
        let nodes = vec![
            node(1, "sam", EntityType::Method, 0.9),
            node(2, "slam", EntityType::Method, 0.8),
        ];
        assert!(build_groups(&nodes).is_empty());
    }

    #[test]
    fn paper_nodes_never_fuzzy_merge() {
        let nodes = vec![
            node(1, "arxiv_2308_04079", EntityType::Paper, 0.9),
            node(2, "arxiv_2308_04078", EntityType::Paper, 0.9),
        ];
        assert!(build_groups(&nodes).is_empty());
    }

    #[test]
    fn winner_selection_is_deterministic() {
        let mut a = node(5, "x_long_name", EntityType::Method, 0.8);
        a.original_confidence = 0.9;
        let mut b = node(3, "x_long_name", EntityType::Method, 0.8);
        b.original_confidence = 0.9;
        let c = node(9, "x_long_name", EntityType::Method, 0.95);

        let group = vec![a, b, c];
        assert_eq!(select_winner(&group).id, 9);

        let tied = vec![group[0].clone(), group[1].clone()];
        assert_eq!(select_winner(&tied).id, 3);
    }
}
