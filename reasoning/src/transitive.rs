use scholia_core::model::{Edge, InferredInsight, InsightType, ReasoningPath, RelationType};
use std::collections::HashMap;
use storage::repo::GraphData;

pub const RULE_TRANSITIVE: &str = "transitive_chain";

const MIN_EDGE_CONFIDENCE: f32 = 0.6;
const TWO_HOP_FACTOR: f32 = 0.9;
const THREE_HOP_FACTOR: f32 = 0.8;

fn chainable(edge: &Edge) -> bool {
    matches!(edge.relation, RelationType::ImprovesOn | RelationType::Extends)
        && edge.confidence > MIN_EDGE_CONFIDENCE
}

/// Chains of 2 or 3 improvement/extension edges over distinct nodes.
/// Confidence: `min(edge confidences) * 0.9` for two hops, `* 0.8` for
/// three. A single edge never produces an insight.
pub fn find_transitive_insights(graph: &GraphData) -> Vec<InferredInsight> {
    let names: HashMap<u64, &str> = graph
        .nodes
        .iter()
        .map(|n| (n.id, n.canonical_name.as_str()))
        .collect();

    let mut outgoing: HashMap<u64, Vec<&Edge>> = HashMap::new();
    for edge in graph.edges.iter().filter(|e| chainable(e)) {
        outgoing.entry(edge.source).or_default().push(edge);
    }
    for edges in outgoing.values_mut() {
        edges.sort_by_key(|e| e.id);
    }

    let mut insights = Vec::new();

    for first in graph.edges.iter().filter(|e| chainable(e)) {
        let Some(seconds) = outgoing.get(&first.target) else {
            continue;
        };
        for second in seconds {
            if second.target == first.source {
                continue;
            }
            insights.push(chain_insight(&[first, second], &names, TWO_HOP_FACTOR));

            if let Some(thirds) = outgoing.get(&second.target) {
                for third in thirds {
                    let nodes = [first.source, first.target, second.target, third.target];
                    let distinct = nodes
                        .iter()
                        .collect::<std::collections::HashSet<_>>()
                        .len()
                        == nodes.len();
                    if distinct {
                        insights.push(chain_insight(
                            &[first, second, third],
                            &names,
                            THREE_HOP_FACTOR,
                        ));
                    }
                }
            }
        }
    }

    insights
}

fn chain_insight(
    edges: &[&Edge],
    names: &HashMap<u64, &str>,
    factor: f32,
) -> InferredInsight {
    let min_confidence = edges
        .iter()
        .map(|e| e.confidence)
        .fold(f32::INFINITY, f32::min);

    let mut subjects: Vec<u64> = edges.iter().map(|e| e.source).collect();
    subjects.push(edges.last().map(|e| e.target).unwrap_or_default());

    let mut claim = String::new();
    for (i, edge) in edges.iter().enumerate() {
        if i == 0 {
            claim.push_str(names.get(&edge.source).unwrap_or(&"?"));
        }
        claim.push_str(&format!(
            " {} {}",
            edge.relation,
            names.get(&edge.target).unwrap_or(&"?")
        ));
    }

    InferredInsight::new(
        InsightType::TransitiveRelationship,
        subjects,
        ReasoningPath {
            claim,
            evidence_edge_ids: edges.iter().map(|e| e.id).collect(),
            rule: RULE_TRANSITIVE.to_string(),
        },
        min_confidence * factor,
    )
}
