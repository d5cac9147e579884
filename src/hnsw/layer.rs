//! One level of the HNSW graph: a neighbor list per node id.

use parking_lot::RwLock;

/// A single HNSW layer. Indexed directly by node id, matching the
/// store's id space rather than a layer-local sequence.
pub struct Layer {
    neighbors: Vec<RwLock<Vec<u64>>>,
}

impl Layer {
    /// Creates a layer with room for `capacity` node ids.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            neighbors: (0..capacity).map(|_| RwLock::new(Vec::new())).collect(),
        }
    }

    /// Grows the layer so that `node_id` has a slot, if necessary.
    pub fn ensure_capacity(&mut self, node_id: u64) {
        let needed = node_id as usize + 1;
        while self.neighbors.len() < needed {
            self.neighbors.push(RwLock::new(Vec::new()));
        }
    }

    /// Returns a copy of `node_id`'s neighbor list.
    #[must_use]
    pub fn get_neighbors(&self, node_id: u64) -> Vec<u64> {
        self.neighbors
            .get(node_id as usize)
            .map(|n| n.read().clone())
            .unwrap_or_default()
    }

    /// Replaces `node_id`'s neighbor list.
    pub fn set_neighbors(&self, node_id: u64, neighbors: Vec<u64>) {
        if let Some(slot) = self.neighbors.get(node_id as usize) {
            *slot.write() = neighbors;
        }
    }

    /// Number of slots allocated in this layer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    /// Whether the layer has no slots allocated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_on_demand() {
        let mut layer = Layer::new(0);
        layer.ensure_capacity(5);
        assert_eq!(layer.len(), 6);
        assert!(layer.get_neighbors(5).is_empty());
    }

    #[test]
    fn set_then_get_round_trips() {
        let layer = Layer::new(3);
        layer.set_neighbors(1, vec![0, 2]);
        assert_eq!(layer.get_neighbors(1), vec![0, 2]);
        assert!(layer.get_neighbors(0).is_empty());
    }
}
