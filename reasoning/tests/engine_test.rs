use reasoning::run_reasoning_batch;
use scholia_core::model::{
    Edge, EntityMention, EntityType, Node, Provenance, RelationType, SectionType,
};
use std::sync::Arc;
use storage::repo::{GraphRepository, MemoryRepository};

async fn insert_node(repo: &MemoryRepository, entity_type: EntityType, name: &str) -> u64 {
    repo.insert_node(Node::new(entity_type, name, 0.9)).await.unwrap()
}

async fn insert_edge(
    repo: &MemoryRepository,
    source: u64,
    target: u64,
    relation: RelationType,
    confidence: f32,
    paper: &str,
) -> u64 {
    repo.insert_edge(Edge::new(
        source,
        target,
        relation,
        confidence,
        Provenance::new(paper, SectionType::Methods),
    ))
    .await
    .unwrap()
}

async fn mention(repo: &MemoryRepository, node_id: u64, paper: &str) {
    repo.insert_entity_mentions(vec![EntityMention {
        node_id,
        paper_id: paper.to_string(),
        section_type: SectionType::Methods,
        mention_count: 1,
    }])
    .await
    .unwrap();
}

#[tokio::test]
async fn transitive_chain_yields_the_expected_confidence() {
    let repo = Arc::new(MemoryRepository::new());
    let a = insert_node(&repo, EntityType::Method, "method_a").await;
    let b = insert_node(&repo, EntityType::Method, "method_b").await;
    let c = insert_node(&repo, EntityType::Method, "method_c").await;
    insert_edge(&repo, a, b, RelationType::ImprovesOn, 0.9, "p1").await;
    insert_edge(&repo, b, c, RelationType::ImprovesOn, 0.7, "p2").await;
    mention(&repo, a, "p1").await;

    let outcome = run_reasoning_batch(repo.as_ref(), &["p1".to_string()])
        .await
        .unwrap();
    assert_eq!(outcome.insights_count, 1);

    let insights = repo.get_insights().await.unwrap();
    assert_eq!(insights.len(), 1);
    assert!((insights[0].confidence - 0.63).abs() < 1e-6);
    assert_eq!(insights[0].subject_node_ids, vec![a, b, c]);
}

#[tokio::test]
async fn weak_edges_produce_no_insight() {
    let repo = Arc::new(MemoryRepository::new());
    let a = insert_node(&repo, EntityType::Method, "method_a").await;
    let b = insert_node(&repo, EntityType::Method, "method_b").await;
    let c = insert_node(&repo, EntityType::Method, "method_c").await;
    insert_edge(&repo, a, b, RelationType::ImprovesOn, 0.9, "p1").await;
    insert_edge(&repo, b, c, RelationType::ImprovesOn, 0.5, "p1").await;
    mention(&repo, a, "p1").await;

    let outcome = run_reasoning_batch(repo.as_ref(), &["p1".to_string()])
        .await
        .unwrap();
    assert_eq!(outcome.insights_count, 0);
}

#[tokio::test]
async fn reasoning_scopes_to_the_induced_subgraph() {
    let repo = Arc::new(MemoryRepository::new());
    // Chain near the affected paper.
    let a = insert_node(&repo, EntityType::Method, "near_a").await;
    let b = insert_node(&repo, EntityType::Method, "near_b").await;
    let c = insert_node(&repo, EntityType::Method, "near_c").await;
    insert_edge(&repo, a, b, RelationType::ImprovesOn, 0.9, "p1").await;
    insert_edge(&repo, b, c, RelationType::ImprovesOn, 0.8, "p1").await;
    mention(&repo, a, "p1").await;

    // A distant chain that must not be touched.
    let x = insert_node(&repo, EntityType::Method, "far_x").await;
    let y = insert_node(&repo, EntityType::Method, "far_y").await;
    let z = insert_node(&repo, EntityType::Method, "far_z").await;
    insert_edge(&repo, x, y, RelationType::ImprovesOn, 0.9, "p9").await;
    insert_edge(&repo, y, z, RelationType::ImprovesOn, 0.9, "p9").await;

    run_reasoning_batch(repo.as_ref(), &["p1".to_string()])
        .await
        .unwrap();

    let insights = repo.get_insights().await.unwrap();
    assert_eq!(insights.len(), 1);
    assert_eq!(insights[0].subject_node_ids, vec![a, b, c]);
}

#[tokio::test]
async fn duplicate_subject_sets_keep_one_insight_per_type() {
    let repo = Arc::new(MemoryRepository::new());
    let a = insert_node(&repo, EntityType::Method, "method_a").await;
    let b = insert_node(&repo, EntityType::Method, "method_b").await;
    let c = insert_node(&repo, EntityType::Method, "method_c").await;
    // Two parallel chains over the same three nodes.
    insert_edge(&repo, a, b, RelationType::ImprovesOn, 0.9, "p1").await;
    insert_edge(&repo, b, c, RelationType::ImprovesOn, 0.8, "p1").await;
    insert_edge(&repo, a, b, RelationType::Extends, 0.85, "p2").await;
    insert_edge(&repo, b, c, RelationType::Extends, 0.85, "p2").await;
    mention(&repo, a, "p1").await;

    run_reasoning_batch(repo.as_ref(), &["p1".to_string()])
        .await
        .unwrap();

    let insights = repo.get_insights().await.unwrap();
    assert_eq!(insights.len(), 1, "identical subject sets must deduplicate");
}

#[tokio::test]
async fn empty_batch_is_a_no_op() {
    let repo = Arc::new(MemoryRepository::new());
    let outcome = run_reasoning_batch(repo.as_ref(), &[]).await.unwrap();
    assert_eq!(outcome.insights_count, 0);
}

#[tokio::test]
async fn insight_confidence_never_exceeds_cited_evidence() {
    let repo = Arc::new(MemoryRepository::new());
    let m_new = insert_node(&repo, EntityType::Method, "m_new").await;
    let m_old = insert_node(&repo, EntityType::Method, "m_old").await;
    let dataset = insert_node(&repo, EntityType::Dataset, "bench").await;

    // Three papers establish a norm; p2 improves with confidence 0.65 and
    // never evaluates.
    insert_edge(&repo, m_new, m_old, RelationType::ImprovesOn, 0.9, "p1").await;
    insert_edge(&repo, m_new, dataset, RelationType::Evaluates, 0.9, "p1").await;
    insert_edge(&repo, m_old, m_new, RelationType::ImprovesOn, 0.65, "p2").await;
    insert_edge(&repo, m_old, dataset, RelationType::Uses, 0.9, "p3").await;
    mention(&repo, m_new, "p2").await;

    run_reasoning_batch(repo.as_ref(), &["p2".to_string()])
        .await
        .unwrap();

    let insights = repo.get_insights().await.unwrap();
    let anomaly = insights
        .iter()
        .find(|i| i.path.claim.contains("p2"))
        .expect("p2 anomaly expected");
    // Rule confidence 0.7 capped by the 0.65 evidence edge.
    assert!((anomaly.confidence - 0.65).abs() < 1e-6);
}
