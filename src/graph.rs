//! The semantic graph layer.
//!
//! An undirected, set-semantic adjacency list over node ids, separate
//! from the HNSW's structural graph. Auto-linking at insert time is the
//! only way edges appear without an explicit [`Graph::add_edge`] call.

use crate::distance::cosine_similarity;
use rustc_hash::FxHashMap;
use std::collections::HashSet;

/// Undirected adjacency over node ids.
#[derive(Default)]
pub struct Graph {
    adjacency: FxHashMap<u64, HashSet<u64>>,
}

impl Graph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an edge between `a` and `b`. A no-op if `a == b` or the
    /// edge already exists.
    pub fn add_edge(&mut self, a: u64, b: u64) {
        if a == b {
            return;
        }
        self.adjacency.entry(a).or_default().insert(b);
        self.adjacency.entry(b).or_default().insert(a);
    }

    /// Removes an edge between `a` and `b`, if present.
    pub fn remove_edge(&mut self, a: u64, b: u64) {
        if let Some(neighbors) = self.adjacency.get_mut(&a) {
            neighbors.remove(&b);
        }
        if let Some(neighbors) = self.adjacency.get_mut(&b) {
            neighbors.remove(&a);
        }
    }

    /// Drops every edge touching `id`, used when a node is vacuumed.
    pub fn remove_node(&mut self, id: u64) {
        if let Some(neighbors) = self.adjacency.remove(&id) {
            for neighbor in neighbors {
                if let Some(other) = self.adjacency.get_mut(&neighbor) {
                    other.remove(&id);
                }
            }
        }
    }

    /// Neighbors of `id`, empty if it has none or is unknown.
    #[must_use]
    pub fn neighbors(&self, id: u64) -> Vec<u64> {
        self.adjacency
            .get(&id)
            .map(|n| n.iter().copied().collect())
            .unwrap_or_default()
    }

    /// All edges as `(a, b)` pairs with `a < b`, each reported once.
    #[must_use]
    pub fn edges(&self) -> Vec<(u64, u64)> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for (&a, neighbors) in &self.adjacency {
            for &b in neighbors {
                let pair = if a < b { (a, b) } else { (b, a) };
                if seen.insert(pair) {
                    out.push(pair);
                }
            }
        }
        out
    }

    /// Total number of distinct edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges().len()
    }

    /// Links `id` to up to `k` nodes among `candidates` whose cosine
    /// similarity to `embedding` exceeds `threshold`.
    ///
    /// `threshold = 0.0` links everything in `candidates` (up to `k`);
    /// `threshold = 1.0` effectively disables auto-linking, since exact
    /// duplicate embeddings are the only way to clear the bar.
    pub fn auto_link(
        &mut self,
        id: u64,
        embedding: &[f32],
        candidates: &[(u64, Vec<f32>)],
        k: usize,
        threshold: f32,
    ) {
        let mut scored: Vec<(f32, u64)> = candidates
            .iter()
            .filter(|(cid, _)| *cid != id)
            .map(|(cid, emb)| (cosine_similarity(embedding, emb), *cid))
            .filter(|(sim, _)| *sim >= threshold)
            .collect();

        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        for (_, neighbor) in scored.into_iter().take(k) {
            self.add_edge(id, neighbor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_edge_is_idempotent_and_undirected() {
        let mut g = Graph::new();
        g.add_edge(1, 2);
        g.add_edge(2, 1);
        assert_eq!(g.neighbors(1), vec![2]);
        assert_eq!(g.neighbors(2), vec![1]);
        assert_eq!(g.edge_count(), 1);
    }

    #[test]
    fn no_self_loops() {
        let mut g = Graph::new();
        g.add_edge(1, 1);
        assert!(g.neighbors(1).is_empty());
    }

    #[test]
    fn remove_node_drops_incident_edges() {
        let mut g = Graph::new();
        g.add_edge(1, 2);
        g.add_edge(1, 3);
        g.remove_node(1);
        assert!(g.neighbors(1).is_empty());
        assert!(g.neighbors(2).is_empty());
        assert!(g.neighbors(3).is_empty());
    }

    #[test]
    fn auto_link_threshold_zero_links_all_up_to_k() {
        let mut g = Graph::new();
        let candidates = vec![
            (1, vec![1.0, 0.0]),
            (2, vec![0.0, 1.0]),
            (3, vec![-1.0, 0.0]),
        ];
        g.auto_link(0, &[1.0, 0.0], &candidates, 2, 0.0);
        assert_eq!(g.neighbors(0).len(), 2);
    }

    #[test]
    fn auto_link_threshold_one_links_nothing_short_of_identical() {
        let mut g = Graph::new();
        let candidates = vec![(1, vec![0.9, 0.1]), (2, vec![0.0, 1.0])];
        g.auto_link(0, &[1.0, 0.0], &candidates, 8, 1.0);
        assert!(g.neighbors(0).is_empty());
    }

    #[test]
    fn auto_link_threshold_one_links_exact_duplicate() {
        let mut g = Graph::new();
        let candidates = vec![(1, vec![1.0, 0.0]), (2, vec![0.9, 0.1])];
        g.auto_link(0, &[1.0, 0.0], &candidates, 8, 1.0);
        assert_eq!(g.neighbors(0), vec![1]);
    }

    #[test]
    fn edges_reported_once_each() {
        let mut g = Graph::new();
        g.add_edge(1, 2);
        g.add_edge(3, 4);
        let mut edges = g.edges();
        edges.sort_unstable();
        assert_eq!(edges, vec![(1, 2), (3, 4)]);
    }
}
