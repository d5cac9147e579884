//! The HNSW vector index.
//!
//! Node ids are the store's ids directly — there is no separate id
//! space to reconcile. Distance is always cosine; there is no
//! configurable metric, since every caller in this engine uses one.

use super::layer::Layer;
use super::ordered_float::OrderedFloat;
use crate::distance::cosine_distance;
use crate::error::{Error, Result};
use parking_lot::RwLock;
use rustc_hash::FxHashSet;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Hard ceiling on assigned layer, regardless of how unlucky the draw.
const MAX_LEVEL: usize = 16;

/// A hierarchical navigable small-world graph over node ids supplied by
/// the caller (the [`crate::store::Store`]), not minted internally.
pub struct Hnsw {
    m: usize,
    m0: usize,
    ef_construction: usize,
    level_mult: f64,
    initial_seed: u64,
    rng_state: AtomicU64,
    dimension: RwLock<Option<usize>>,
    vectors: RwLock<Vec<Vec<f32>>>,
    alive: RwLock<Vec<bool>>,
    layers: RwLock<Vec<Layer>>,
    entry_point: RwLock<Option<u64>>,
    max_layer: AtomicUsize,
}

impl Hnsw {
    /// Creates an empty index with a fixed RNG seed so that level
    /// assignment is reproducible across a save/load cycle.
    #[must_use]
    pub fn new(m: usize, ef_construction: usize, seed: u64) -> Self {
        Self {
            m,
            m0: m * 2,
            ef_construction,
            level_mult: 1.0 / (m as f64).ln(),
            initial_seed: seed,
            rng_state: AtomicU64::new(seed),
            dimension: RwLock::new(None),
            vectors: RwLock::new(Vec::new()),
            alive: RwLock::new(Vec::new()),
            layers: RwLock::new(Vec::new()),
            entry_point: RwLock::new(None),
            max_layer: AtomicUsize::new(0),
        }
    }

    /// The seed the index was constructed with, to persist alongside a snapshot.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.initial_seed
    }

    /// Number of nodes ever inserted (live or tombstoned).
    #[must_use]
    pub fn capacity_len(&self) -> usize {
        self.vectors.read().len()
    }

    /// Whether any node has been inserted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entry_point.read().is_none()
    }

    fn next_u64(&self) -> u64 {
        let mut x = self.rng_state.load(Ordering::Relaxed);
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng_state.store(x, Ordering::Relaxed);
        x
    }

    fn random_layer(&self) -> usize {
        let r = self.next_u64();
        let u = ((r >> 11) as f64 / (1u64 << 53) as f64).max(f64::MIN_POSITIVE);
        let level = (-u.ln() * self.level_mult).floor();
        if level < 0.0 {
            0
        } else {
            (level as usize).min(MAX_LEVEL)
        }
    }

    fn get_vector(&self, id: u64) -> Vec<f32> {
        self.vectors
            .read()
            .get(id as usize)
            .cloned()
            .unwrap_or_default()
    }

    fn is_alive(&self, id: u64) -> bool {
        self.alive.read().get(id as usize).copied().unwrap_or(false)
    }

    /// Inserts a new node's embedding into the graph.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZeroVector`] if the embedding has zero norm, or
    /// [`Error::DimensionMismatch`] if it disagrees with the dimension
    /// fixed by the first insert.
    pub fn insert(&self, id: u64, embedding: Vec<f32>) -> Result<()> {
        if crate::distance::is_zero_vector(&embedding) {
            return Err(Error::ZeroVector);
        }

        {
            let mut dim = self.dimension.write();
            match *dim {
                Some(expected) if expected != embedding.len() => {
                    return Err(Error::DimensionMismatch {
                        expected,
                        actual: embedding.len(),
                    });
                }
                Some(_) => {}
                None => *dim = Some(embedding.len()),
            }
        }

        let level = self.random_layer();

        {
            let mut vectors = self.vectors.write();
            let mut alive = self.alive.write();
            let needed = id as usize + 1;
            while vectors.len() < needed {
                vectors.push(Vec::new());
                alive.push(false);
            }
            vectors[id as usize] = embedding.clone();
            alive[id as usize] = true;
        }

        {
            let mut layers = self.layers.write();
            while layers.len() <= level {
                layers.push(Layer::new(self.vectors.read().len()));
            }
            for layer in layers.iter_mut() {
                layer.ensure_capacity(id);
            }
        }

        let entry = *self.entry_point.read();
        let Some(mut cur) = entry else {
            *self.entry_point.write() = Some(id);
            self.max_layer.store(level, Ordering::Relaxed);
            tracing::debug!(node_id = id, level, "hnsw: first node inserted");
            return Ok(());
        };

        let top = self.max_layer.load(Ordering::Relaxed);
        for layer_idx in ((level + 1)..=top).rev() {
            cur = self.search_layer_single(&embedding, cur, layer_idx);
        }

        let mut entry_points = vec![cur];
        for layer_idx in (0..=level.min(top)).rev() {
            let cap = if layer_idx == 0 { self.m0 } else { self.m };
            let candidates = self.search_layer(&embedding, &entry_points, self.ef_construction, layer_idx);
            let selected = self.select_neighbors(&embedding, candidates.clone(), cap);

            {
                let layers = self.layers.read();
                layers[layer_idx].set_neighbors(id, selected.clone());
            }
            for &neighbor in &selected {
                self.add_bidirectional_connection(neighbor, id, layer_idx, cap);
            }

            entry_points = candidates.into_iter().map(|(_, nid)| nid).collect();
            if entry_points.is_empty() {
                entry_points.push(cur);
            }
        }

        if level > top {
            *self.entry_point.write() = Some(id);
            self.max_layer.store(level, Ordering::Relaxed);
        }

        tracing::debug!(node_id = id, level, "hnsw: node inserted");
        Ok(())
    }

    fn add_bidirectional_connection(&self, neighbor: u64, new_id: u64, layer_idx: usize, cap: usize) {
        let layers = self.layers.read();
        let layer = &layers[layer_idx];
        let mut current = layer.get_neighbors(neighbor);
        if current.contains(&new_id) {
            return;
        }
        current.push(new_id);

        if current.len() <= cap {
            layer.set_neighbors(neighbor, current);
            return;
        }

        let neighbor_vec = self.get_vector(neighbor);
        let candidates: Vec<(f32, u64)> = current
            .into_iter()
            .map(|nid| (cosine_distance(&neighbor_vec, &self.get_vector(nid)), nid))
            .collect();
        let pruned = self.select_neighbors(&neighbor_vec, candidates, cap);
        layer.set_neighbors(neighbor, pruned);
    }

    /// Selects up to `m` neighbors from `candidates`, preferring
    /// diversity: a candidate is admitted only if it is at least as
    /// close to the query as to every neighbor already selected,
    /// otherwise leftover quota is filled by plain closeness.
    fn select_neighbors(&self, query: &[f32], mut candidates: Vec<(f32, u64)>, m: usize) -> Vec<u64> {
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut selected: Vec<u64> = Vec::new();
        let mut selected_vecs: Vec<Vec<f32>> = Vec::new();
        let mut leftovers: Vec<u64> = Vec::new();

        for (dist_to_query, id) in candidates {
            if selected.len() >= m {
                break;
            }
            let candidate_vec = self.get_vector(id);
            let admits = selected_vecs
                .iter()
                .all(|s| cosine_distance(&candidate_vec, s) >= dist_to_query);
            if admits {
                selected.push(id);
                selected_vecs.push(candidate_vec);
            } else {
                leftovers.push(id);
            }
        }

        for id in leftovers {
            if selected.len() >= m {
                break;
            }
            selected.push(id);
        }

        selected
    }

    fn search_layer_single(&self, query: &[f32], entry: u64, layer_idx: usize) -> u64 {
        let layers = self.layers.read();
        let Some(layer) = layers.get(layer_idx) else {
            return entry;
        };

        let mut best = entry;
        let mut best_dist = cosine_distance(query, &self.get_vector(entry));
        loop {
            let mut improved = false;
            for neighbor in layer.get_neighbors(best) {
                let dist = cosine_distance(query, &self.get_vector(neighbor));
                if dist < best_dist {
                    best_dist = dist;
                    best = neighbor;
                    improved = true;
                }
            }
            if !improved {
                break;
            }
        }
        best
    }

    /// Beam search over one layer. Tombstoned nodes are still traversed
    /// (their edges keep the graph connected) but never added to the
    /// result set.
    fn search_layer(&self, query: &[f32], entry_points: &[u64], ef: usize, layer_idx: usize) -> Vec<(f32, u64)> {
        let layers = self.layers.read();
        let Some(layer) = layers.get(layer_idx) else {
            return Vec::new();
        };

        let mut visited: FxHashSet<u64> = entry_points.iter().copied().collect();
        let mut candidates: BinaryHeap<Reverse<(OrderedFloat, u64)>> = BinaryHeap::new();
        let mut results: BinaryHeap<(OrderedFloat, u64)> = BinaryHeap::new();

        for &ep in entry_points {
            let dist = cosine_distance(query, &self.get_vector(ep));
            candidates.push(Reverse((OrderedFloat(dist), ep)));
            if self.is_alive(ep) {
                results.push((OrderedFloat(dist), ep));
            }
        }

        while let Some(Reverse((OrderedFloat(cand_dist), cand_id))) = candidates.pop() {
            if results.len() >= ef {
                if let Some(&(OrderedFloat(worst), _)) = results.peek() {
                    if cand_dist > worst {
                        break;
                    }
                }
            }

            for neighbor in layer.get_neighbors(cand_id) {
                if !visited.insert(neighbor) {
                    continue;
                }
                let dist = cosine_distance(query, &self.get_vector(neighbor));
                let should_push = results.len() < ef || {
                    results.peek().is_some_and(|&(OrderedFloat(worst), _)| dist < worst)
                };
                if should_push {
                    candidates.push(Reverse((OrderedFloat(dist), neighbor)));
                    if self.is_alive(neighbor) {
                        results.push((OrderedFloat(dist), neighbor));
                        if results.len() > ef {
                            results.pop();
                        }
                    }
                }
            }
        }

        let mut out: Vec<(f32, u64)> = results.into_iter().map(|(OrderedFloat(d), id)| (d, id)).collect();
        out.sort_by(|a, b| a.0.total_cmp(&b.0));
        out
    }

    /// Finds the `k` approximate nearest live nodes to `query`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyIndex`] if nothing has been inserted yet,
    /// [`Error::ZeroVector`] if `query` has zero norm, or
    /// [`Error::DimensionMismatch`] if `query`'s length disagrees with
    /// the index's fixed dimension.
    pub fn search(&self, query: &[f32], k: usize, ef_search: usize) -> Result<Vec<(u64, f32)>> {
        if crate::distance::is_zero_vector(query) {
            return Err(Error::ZeroVector);
        }
        if let Some(expected) = *self.dimension.read() {
            if expected != query.len() {
                return Err(Error::DimensionMismatch {
                    expected,
                    actual: query.len(),
                });
            }
        }

        let Some(entry) = *self.entry_point.read() else {
            return Err(Error::EmptyIndex);
        };

        let top = self.max_layer.load(Ordering::Relaxed);
        let mut cur = entry;
        for layer_idx in (1..=top).rev() {
            cur = self.search_layer_single(query, cur, layer_idx);
        }

        let ef = ef_search.max(k);
        let mut results = self.search_layer(query, &[cur], ef, 0);
        results.truncate(k);
        Ok(results.into_iter().map(|(dist, id)| (id, dist)).collect())
    }

    /// Marks a node's vector dead. Its edges are left in place; they
    /// are pruned the next time a neighbor is re-selected or the index
    /// is rebuilt from a snapshot.
    pub fn tombstone(&self, id: u64) {
        if let Some(slot) = self.alive.write().get_mut(id as usize) {
            *slot = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_index() -> Hnsw {
        Hnsw::new(4, 32, 0x5DEE_CE66_D1A4_B5B5)
    }

    #[test]
    fn search_on_empty_index_errors() {
        let index = small_index();
        assert!(matches!(index.search(&[1.0, 0.0], 1, 10), Err(Error::EmptyIndex)));
    }

    #[test]
    fn zero_vector_rejected_on_insert_and_search() {
        let index = small_index();
        assert!(matches!(index.insert(0, vec![0.0, 0.0]), Err(Error::ZeroVector)));
        index.insert(0, vec![1.0, 0.0]).unwrap();
        assert!(matches!(index.search(&[0.0, 0.0], 1, 10), Err(Error::ZeroVector)));
    }

    #[test]
    fn finds_nearest_neighbor() {
        let index = small_index();
        index.insert(0, vec![1.0, 0.0]).unwrap();
        index.insert(1, vec![0.0, 1.0]).unwrap();
        index.insert(2, vec![0.9, 0.1]).unwrap();

        let results = index.search(&[1.0, 0.0], 1, 32).unwrap();
        assert_eq!(results[0].0, 0);
    }

    #[test]
    fn tombstoned_node_never_returned() {
        let index = small_index();
        index.insert(0, vec![1.0, 0.0]).unwrap();
        index.insert(1, vec![0.95, 0.05]).unwrap();
        index.insert(2, vec![0.0, 1.0]).unwrap();
        index.tombstone(0);

        let results = index.search(&[1.0, 0.0], 3, 32).unwrap();
        assert!(!results.iter().any(|(id, _)| *id == 0));
    }

    #[test]
    fn same_seed_gives_same_level_sequence() {
        let a = small_index();
        let b = small_index();
        for i in 0..20u64 {
            assert_eq!(a.random_layer(), b.random_layer(), "diverged at draw {i}");
        }
    }
}
