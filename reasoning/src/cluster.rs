use scholia_core::model::{EntityType, InferredInsight, InsightType, ReasoningPath, RelationType};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use storage::repo::GraphData;

pub const RULE_CONCEPT_CLUSTER: &str = "concept_cluster";

const MIN_CONCEPTS: usize = 2;
const MIN_SHARING_PAPERS: usize = 3;
const CONFIDENCE_CAP: f32 = 0.85;
const SMALL_CORPUS_PAPERS: usize = 10;
const SMALL_CORPUS_FACTOR: f32 = 0.8;

/// Sets of concepts repeatedly used together: every concept in the set is
/// touched by a uses/introduces edge in each of at least three papers.
/// Confidence scales with how widely the corpus shares the cluster and is
/// damped for small corpora.
pub fn find_cluster_insights(graph: &GraphData, total_papers: usize) -> Vec<InferredInsight> {
    let concepts: HashSet<u64> = graph
        .nodes
        .iter()
        .filter(|n| n.entity_type == EntityType::Concept)
        .map(|n| n.id)
        .collect();
    if concepts.len() < MIN_CONCEPTS || total_papers == 0 {
        return Vec::new();
    }

    // paper -> concepts it uses, and (paper, concept) -> supporting edges.
    let mut paper_concepts: BTreeMap<String, BTreeSet<u64>> = BTreeMap::new();
    let mut support: HashMap<(String, u64), Vec<(u64, f32)>> = HashMap::new();
    for edge in &graph.edges {
        if !matches!(edge.relation, RelationType::Uses | RelationType::Introduces) {
            continue;
        }
        let paper = edge.provenance.paper_id.clone();
        for endpoint in [edge.source, edge.target] {
            if concepts.contains(&endpoint) {
                paper_concepts
                    .entry(paper.clone())
                    .or_default()
                    .insert(endpoint);
                support
                    .entry((paper.clone(), endpoint))
                    .or_default()
                    .push((edge.id, edge.confidence));
            }
        }
    }

    let names: HashMap<u64, &str> = graph
        .nodes
        .iter()
        .map(|n| (n.id, n.canonical_name.as_str()))
        .collect();

    // Each paper's concept set is a candidate cluster; count how many
    // papers contain it entirely.
    let mut seen: HashSet<Vec<u64>> = HashSet::new();
    let mut insights = Vec::new();

    for candidate in paper_concepts.values() {
        if candidate.len() < MIN_CONCEPTS {
            continue;
        }
        let subjects: Vec<u64> = candidate.iter().copied().collect();
        if !seen.insert(subjects.clone()) {
            continue;
        }

        let sharing: Vec<&String> = paper_concepts
            .iter()
            .filter(|(_, concepts)| candidate.is_subset(concepts))
            .map(|(paper, _)| paper)
            .collect();
        if sharing.len() < MIN_SHARING_PAPERS {
            continue;
        }

        let mut edge_ids = Vec::new();
        let mut confidence_sum = 0.0f32;
        let mut confidence_count = 0usize;
        for paper in &sharing {
            for concept in candidate {
                if let Some(edges) = support.get(&((*paper).clone(), *concept)) {
                    for (edge_id, confidence) in edges {
                        edge_ids.push(*edge_id);
                        confidence_sum += confidence;
                        confidence_count += 1;
                    }
                }
            }
        }
        let avg_confidence = if confidence_count == 0 {
            0.0
        } else {
            confidence_sum / confidence_count as f32
        };

        let mut confidence =
            ((sharing.len() as f32 / total_papers as f32) * avg_confidence).min(CONFIDENCE_CAP);
        if total_papers < SMALL_CORPUS_PAPERS {
            confidence *= SMALL_CORPUS_FACTOR;
        }

        let mut concept_names: Vec<&str> = subjects
            .iter()
            .map(|id| *names.get(id).unwrap_or(&"?"))
            .collect();
        concept_names.sort_unstable();
        edge_ids.sort_unstable();
        edge_ids.dedup();

        insights.push(InferredInsight::new(
            InsightType::ConceptCluster,
            subjects,
            ReasoningPath {
                claim: format!(
                    "concepts {} are co-used by {} papers",
                    concept_names.join(", "),
                    sharing.len()
                ),
                evidence_edge_ids: edge_ids,
                rule: RULE_CONCEPT_CLUSTER.to_string(),
            },
            confidence,
        ));
    }

    insights
}

#[cfg(test)]
mod tests {
    use super::*;
    use scholia_core::model::{Edge, Node, Provenance, SectionType};

    fn concept(id: u64, name: &str) -> Node {
        let mut node = Node::new(EntityType::Concept, name, 0.9);
        node.id = id;
        node
    }

    fn method(id: u64, name: &str) -> Node {
        let mut node = Node::new(EntityType::Method, name, 0.9);
        node.id = id;
        node
    }

    fn uses(id: u64, source: u64, target: u64, paper: &str, confidence: f32) -> Edge {
        let mut edge = Edge::new(
            source,
            target,
            RelationType::Uses,
            confidence,
            Provenance::new(paper, SectionType::Methods),
        );
        edge.id = id;
        edge
    }

    fn three_paper_fixture() -> GraphData {
        // Concepts 1 and 2 co-used by papers p1, p2, p3 via methods 10-12.
        let mut edges = Vec::new();
        let mut next_edge = 100;
        for (method_id, paper) in [(10, "p1"), (11, "p2"), (12, "p3")] {
            for concept_id in [1u64, 2] {
                edges.push(uses(next_edge, method_id, concept_id, paper, 0.8));
                next_edge += 1;
            }
        }
        GraphData {
            nodes: vec![
                concept(1, "radiance_field"),
                concept(2, "volume_rendering"),
                method(10, "m1"),
                method(11, "m2"),
                method(12, "m3"),
            ],
            edges,
            mentions: Vec::new(),
        }
    }

    #[test]
    fn cluster_emerges_at_three_sharing_papers() {
        let insights = find_cluster_insights(&three_paper_fixture(), 3);
        assert_eq!(insights.len(), 1);
        let insight = &insights[0];
        assert_eq!(insight.subject_node_ids, vec![1, 2]);
        // (3/3) * 0.8 = 0.8, capped at 0.85, then * 0.8 small-corpus damp.
        assert!((insight.confidence - 0.64).abs() < 1e-6);
        assert_eq!(insight.path.evidence_edge_ids.len(), 6);
    }

    #[test]
    fn two_sharing_papers_are_not_enough() {
        let mut graph = three_paper_fixture();
        graph.edges.retain(|e| e.provenance.paper_id != "p3");
        assert!(find_cluster_insights(&graph, 3).is_empty());
    }

    #[test]
    fn large_corpus_skips_the_damping_factor() {
        let insights = find_cluster_insights(&three_paper_fixture(), 12);
        assert_eq!(insights.len(), 1);
        // (3/12) * 0.8 = 0.2, no damping.
        assert!((insights[0].confidence - 0.2).abs() < 1e-6);
    }

    #[test]
    fn single_concept_never_clusters() {
        let graph = GraphData {
            nodes: vec![concept(1, "only"), method(10, "m")],
            edges: vec![
                uses(100, 10, 1, "p1", 0.9),
                uses(101, 10, 1, "p2", 0.9),
                uses(102, 10, 1, "p3", 0.9),
            ],
            mentions: Vec::new(),
        };
        assert!(find_cluster_insights(&graph, 3).is_empty());
    }
}
