use scholia_core::model::{EntityType, InferredInsight, InsightType, ReasoningPath, RelationType};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use storage::repo::GraphData;

pub const RULE_NO_EVALUATION: &str = "anomaly:improvement_without_evaluation";
pub const RULE_NO_COMMON_DATASET: &str = "anomaly:improvement_without_common_dataset";
pub const RULE_ISOLATED_METHOD: &str = "anomaly:isolated_method";

/// Anomalies only mean something against a norm; fewer papers than this
/// and the batch stays silent.
const MIN_PAPERS_FOR_NORM: usize = 3;
const HIGH_IMPROVEMENT_CONFIDENCE: f32 = 0.8;
const COMMON_DATASET_MIN_PAPERS: usize = 2;

const NO_EVALUATION_CONFIDENCE: f32 = 0.7;
const NO_COMMON_DATASET_CONFIDENCE: f32 = 0.6;
const ISOLATED_METHOD_CONFIDENCE: f32 = 0.5;

pub fn find_anomaly_insights(graph: &GraphData, total_papers: usize) -> Vec<InferredInsight> {
    if total_papers < MIN_PAPERS_FOR_NORM {
        return Vec::new();
    }

    let datasets: HashSet<u64> = graph
        .nodes
        .iter()
        .filter(|n| n.entity_type == EntityType::Dataset)
        .map(|n| n.id)
        .collect();

    // Per paper: improvement edges, datasets evaluated, datasets used.
    let mut improves: BTreeMap<String, Vec<&scholia_core::model::Edge>> = BTreeMap::new();
    let mut evaluates_dataset: HashSet<String> = HashSet::new();
    let mut uses_datasets: HashMap<String, HashSet<u64>> = HashMap::new();
    let mut dataset_papers: HashMap<u64, HashSet<String>> = HashMap::new();

    for edge in &graph.edges {
        let paper = edge.provenance.paper_id.clone();
        match edge.relation {
            RelationType::ImprovesOn => {
                improves.entry(paper).or_default().push(edge);
            }
            RelationType::Evaluates if datasets.contains(&edge.target) => {
                evaluates_dataset.insert(paper.clone());
                dataset_papers.entry(edge.target).or_default().insert(paper);
            }
            RelationType::Uses if datasets.contains(&edge.target) => {
                uses_datasets
                    .entry(paper.clone())
                    .or_default()
                    .insert(edge.target);
                dataset_papers.entry(edge.target).or_default().insert(paper);
            }
            _ => {}
        }
    }

    let common_datasets: HashSet<u64> = dataset_papers
        .iter()
        .filter(|(_, papers)| papers.len() >= COMMON_DATASET_MIN_PAPERS)
        .map(|(dataset, _)| *dataset)
        .collect();

    let mut insights = Vec::new();

    for (paper, improvement_edges) in &improves {
        let subjects: BTreeSet<u64> = improvement_edges
            .iter()
            .flat_map(|e| [e.source, e.target])
            .collect();
        let min_confidence = improvement_edges
            .iter()
            .map(|e| e.confidence)
            .fold(f32::INFINITY, f32::min);
        let edge_ids: Vec<u64> = improvement_edges.iter().map(|e| e.id).collect();

        // (a) Claims an improvement but evaluates on no dataset.
        if !evaluates_dataset.contains(paper) {
            insights.push(InferredInsight::new(
                InsightType::Anomaly,
                subjects.iter().copied().collect(),
                ReasoningPath {
                    claim: format!("{paper} claims an improvement but evaluates no dataset"),
                    evidence_edge_ids: edge_ids.clone(),
                    rule: RULE_NO_EVALUATION.to_string(),
                },
                NO_EVALUATION_CONFIDENCE.min(min_confidence),
            ));
        }

        // (b) Confident improvement without grounding on a common dataset.
        let confident: Vec<&&scholia_core::model::Edge> = improvement_edges
            .iter()
            .filter(|e| e.confidence > HIGH_IMPROVEMENT_CONFIDENCE)
            .collect();
        if !confident.is_empty() {
            let grounded = uses_datasets
                .get(paper)
                .map(|used| used.iter().any(|d| common_datasets.contains(d)))
                .unwrap_or(false);
            if !grounded {
                let confident_min = confident
                    .iter()
                    .map(|e| e.confidence)
                    .fold(f32::INFINITY, f32::min);
                insights.push(InferredInsight::new(
                    InsightType::Anomaly,
                    confident
                        .iter()
                        .flat_map(|e| [e.source, e.target])
                        .collect(),
                    ReasoningPath {
                        claim: format!(
                            "{paper} reports a high-confidence improvement without using a common dataset"
                        ),
                        evidence_edge_ids: confident.iter().map(|e| e.id).collect(),
                        rule: RULE_NO_COMMON_DATASET.to_string(),
                    },
                    NO_COMMON_DATASET_CONFIDENCE.min(confident_min),
                ));
            }
        }
    }

    // (c) Methods with no incident edges at all.
    let mut connected: HashSet<u64> = HashSet::new();
    for edge in &graph.edges {
        connected.insert(edge.source);
        connected.insert(edge.target);
    }
    for node in &graph.nodes {
        if node.entity_type == EntityType::Method && !connected.contains(&node.id) {
            insights.push(InferredInsight::new(
                InsightType::Anomaly,
                vec![node.id],
                ReasoningPath {
                    claim: format!("method {} has no relationships", node.canonical_name),
                    evidence_edge_ids: Vec::new(),
                    rule: RULE_ISOLATED_METHOD.to_string(),
                },
                ISOLATED_METHOD_CONFIDENCE,
            ));
        }
    }

    insights
}
