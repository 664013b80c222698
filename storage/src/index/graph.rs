use std::collections::{HashMap, VecDeque};

/// Adjacency over persisted edges, kept in both directions so subgraph
/// induction can walk against edge orientation.
#[derive(Clone, Debug, Default)]
pub struct AdjacencyGraph {
    outgoing: HashMap<u64, Vec<(u64, u64)>>, // node -> (target, edge_id)
    incoming: HashMap<u64, Vec<(u64, u64)>>, // node -> (source, edge_id)
}

impl AdjacencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_edge(&mut self, edge_id: u64, source: u64, target: u64) {
        self.outgoing.entry(source).or_default().push((target, edge_id));
        self.incoming.entry(target).or_default().push((source, edge_id));
    }

    pub fn remove_edge(&mut self, edge_id: u64, source: u64, target: u64) {
        if let Some(edges) = self.outgoing.get_mut(&source) {
            edges.retain(|(_, id)| *id != edge_id);
        }
        if let Some(edges) = self.incoming.get_mut(&target) {
            edges.retain(|(_, id)| *id != edge_id);
        }
    }

    pub fn remove_node(&mut self, id: u64) {
        self.outgoing.remove(&id);
        self.incoming.remove(&id);
        for edges in self.outgoing.values_mut() {
            edges.retain(|(target, _)| *target != id);
        }
        for edges in self.incoming.values_mut() {
            edges.retain(|(source, _)| *source != id);
        }
    }

    pub fn outgoing(&self, id: u64) -> &[(u64, u64)] {
        self.outgoing.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn incoming(&self, id: u64) -> &[(u64, u64)] {
        self.incoming.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Nodes reachable within `max_hops` in either direction, including the
    /// start set. BFS; returns (node_id, distance) sorted by id.
    pub fn expand(&self, start: &[u64], max_hops: u8) -> Vec<(u64, u8)> {
        let mut visited: HashMap<u64, u8> = HashMap::new();
        let mut queue = VecDeque::new();

        for id in start {
            visited.insert(*id, 0);
            queue.push_back((*id, 0u8));
        }

        while let Some((current, dist)) = queue.pop_front() {
            if dist >= max_hops {
                continue;
            }
            let neighbors = self
                .outgoing(current)
                .iter()
                .chain(self.incoming(current).iter());
            for (neighbor, _) in neighbors {
                if !visited.contains_key(neighbor) {
                    visited.insert(*neighbor, dist + 1);
                    queue.push_back((*neighbor, dist + 1));
                }
            }
        }

        let mut out: Vec<(u64, u8)> = visited.into_iter().collect();
        out.sort_by_key(|(id, _)| *id);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_walks_both_directions() {
        let mut graph = AdjacencyGraph::new();
        graph.add_edge(10, 1, 2);
        graph.add_edge(11, 3, 2);

        let reached: Vec<u64> = graph.expand(&[1], 2).into_iter().map(|(id, _)| id).collect();
        assert_eq!(reached, vec![1, 2, 3]);
    }

    #[test]
    fn expand_respects_hop_limit() {
        let mut graph = AdjacencyGraph::new();
        graph.add_edge(10, 1, 2);
        graph.add_edge(11, 2, 3);
        graph.add_edge(12, 3, 4);

        let reached: Vec<u64> = graph.expand(&[1], 2).into_iter().map(|(id, _)| id).collect();
        assert_eq!(reached, vec![1, 2, 3]);
    }

    #[test]
    fn remove_node_clears_both_sides() {
        let mut graph = AdjacencyGraph::new();
        graph.add_edge(10, 1, 2);
        graph.add_edge(11, 2, 3);

        graph.remove_node(2);
        assert!(graph.outgoing(1).is_empty());
        assert!(graph.outgoing(2).is_empty());
        assert!(graph.incoming(3).is_empty());
    }

    #[test]
    fn remove_edge_is_scoped_to_edge_id() {
        let mut graph = AdjacencyGraph::new();
        graph.add_edge(10, 1, 2);
        graph.add_edge(11, 1, 2);

        graph.remove_edge(10, 1, 2);
        assert_eq!(graph.outgoing(1), &[(2, 11)]);
    }
}
