use crate::anomaly::find_anomaly_insights;
use crate::cluster::find_cluster_insights;
use crate::transitive::find_transitive_insights;
use scholia_core::model::{InferredInsight, InsightType};
use std::collections::{HashMap, HashSet};
use storage::repo::{GraphRepository, RepoError};
use thiserror::Error;
use tracing::info;

const MAX_INSIGHTS_PER_RUN: usize = 10;
const SUBGRAPH_DEPTH: u8 = 2;

#[derive(Error, Debug)]
pub enum ReasoningError {
    #[error("repository error: {0}")]
    Repo(#[from] RepoError),
}

#[derive(Debug, Clone, Default)]
pub struct ReasoningOutcome {
    pub insights_count: usize,
    pub subgraph_nodes: usize,
    pub subgraph_edges: usize,
}

/// Batch reasoning over the subgraph induced within two hops of the nodes
/// the affected papers mention. Rules read the persisted approved graph
/// only; no text is consulted.
pub async fn run_reasoning_batch(
    repo: &dyn GraphRepository,
    affected_paper_ids: &[String],
) -> Result<ReasoningOutcome, ReasoningError> {
    if affected_paper_ids.is_empty() {
        return Ok(ReasoningOutcome::default());
    }

    let affected: HashSet<&String> = affected_paper_ids.iter().collect();
    let full = repo.get_graph_data().await?;
    let seed_nodes: Vec<u64> = {
        let mut seeds: Vec<u64> = full
            .mentions
            .iter()
            .filter(|m| affected.contains(&m.paper_id))
            .map(|m| m.node_id)
            .collect();
        seeds.sort_unstable();
        seeds.dedup();
        seeds
    };
    if seed_nodes.is_empty() {
        info!("no nodes mentioned by the affected papers, skipping reasoning");
        return Ok(ReasoningOutcome::default());
    }

    let subgraph = repo.get_subgraph(&seed_nodes, SUBGRAPH_DEPTH).await?;
    let total_papers: usize = {
        let mut papers: HashSet<&str> = subgraph
            .mentions
            .iter()
            .map(|m| m.paper_id.as_str())
            .collect();
        papers.extend(subgraph.edges.iter().map(|e| e.provenance.paper_id.as_str()));
        papers.len()
    };

    let mut insights = Vec::new();
    insights.extend(find_transitive_insights(&subgraph));
    insights.extend(find_cluster_insights(&subgraph, total_papers));
    insights.extend(find_anomaly_insights(&subgraph, total_papers));

    // Confidence never exceeds the weakest cited evidence.
    let edge_confidences: HashMap<u64, f32> = subgraph
        .edges
        .iter()
        .map(|e| (e.id, e.confidence))
        .collect();
    for insight in &mut insights {
        let evidence_min = insight
            .path
            .evidence_edge_ids
            .iter()
            .filter_map(|id| edge_confidences.get(id))
            .fold(f32::INFINITY, |acc, c| acc.min(*c));
        if evidence_min.is_finite() {
            insight.confidence = insight.confidence.min(evidence_min);
        }
    }

    // Dedup on (type, sorted subject set), keeping the highest confidence,
    // then cap the batch.
    insights.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut seen: HashSet<(InsightType, Vec<u64>)> = HashSet::new();
    let mut unique: Vec<InferredInsight> = Vec::new();
    for insight in insights {
        if seen.insert(insight.dedup_key()) {
            unique.push(insight);
        }
    }
    unique.truncate(MAX_INSIGHTS_PER_RUN);

    let outcome = ReasoningOutcome {
        insights_count: unique.len(),
        subgraph_nodes: subgraph.nodes.len(),
        subgraph_edges: subgraph.edges.len(),
    };
    repo.insert_insights(unique).await?;

    info!(
        papers = affected_paper_ids.len(),
        nodes = outcome.subgraph_nodes,
        edges = outcome.subgraph_edges,
        insights = outcome.insights_count,
        "reasoning batch complete"
    );
    Ok(outcome)
}
