//! The flat node table.
//!
//! Owns node identity, content, and embeddings. Ids are minted densely
//! and monotonically and are never reused, even after [`Store::remove`]
//! tombstones a node — this keeps the HNSW graph's neighbor-list ids
//! and the semantic graph's edge endpoints valid indefinitely without a
//! remapping step.

use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

/// Sentinel stored in `cluster_id` before `build_clusters` ever runs.
const NO_CLUSTER: i64 = -1;

/// A single stored item.
///
/// `content` and `embedding` are immutable after insertion; `access_count`,
/// `last_access`, and `cluster_id` use interior atomics so that reads
/// (which reinforce, per the lifecycle engine) don't require an
/// exclusive lock over the whole node table.
pub struct Node {
    id: u64,
    content: Vec<u8>,
    embedding: Vec<f32>,
    significance: u8,
    creation_time: u64,
    access_count: AtomicU64,
    last_access: AtomicU64,
    cluster_id: AtomicI64,
    alive: AtomicBool,
}

impl Node {
    /// Node identifier.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Embedding vector (shared reference, never mutated after insert).
    #[must_use]
    pub fn embedding(&self) -> &[f32] {
        &self.embedding
    }

    /// Significance supplied at insertion, in `[0, 100]`.
    #[must_use]
    pub fn significance(&self) -> u8 {
        self.significance
    }

    /// Raw content bytes, without reinforcing access (used for
    /// previews that must not count as a read of the node).
    #[must_use]
    pub(crate) fn content(&self) -> &[u8] {
        &self.content
    }

    /// Wall-clock seconds at insertion.
    #[must_use]
    pub fn creation_time(&self) -> u64 {
        self.creation_time
    }

    /// Number of times `content` has been read.
    #[must_use]
    pub fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    /// Wall-clock seconds of the most recent read, or creation time if never read.
    #[must_use]
    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    /// Current cluster assignment, if `build_clusters` has run since the
    /// last time this node's cluster became stale.
    #[must_use]
    pub fn cluster_id(&self) -> Option<u32> {
        let raw = self.cluster_id.load(Ordering::Relaxed);
        if raw < 0 {
            None
        } else {
            Some(raw as u32)
        }
    }

    /// Whether this node has survived vacuuming.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    fn reinforce(&self, now: u64) {
        self.access_count.fetch_add(1, Ordering::Relaxed);
        self.last_access.store(now, Ordering::Relaxed);
    }
}

/// Owns the node table and the single shared embedding dimension.
#[derive(Default)]
pub struct Store {
    nodes: RwLock<Vec<Node>>,
    dimension: RwLock<Option<usize>>,
}

impl Store {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the embedding dimension fixed by the first insert, if any.
    #[must_use]
    pub fn dimension(&self) -> Option<usize> {
        *self.dimension.read()
    }

    /// Total number of ids ever minted (including tombstoned ones).
    #[must_use]
    pub fn capacity_len(&self) -> usize {
        self.nodes.read().len()
    }

    /// Number of live nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.read().iter().filter(|n| n.is_alive()).count()
    }

    /// Whether the store has no live nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts a new node, minting the next id.
    ///
    /// Validates significance range and, once the dimension is fixed by
    /// the first insert, enforces it for every later insert.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if `significance > 100`, or
    /// [`Error::DimensionMismatch`] if `embedding.len()` disagrees with
    /// the dimension fixed at first insert.
    pub fn add(
        &self,
        content: Vec<u8>,
        embedding: Vec<f32>,
        significance: u8,
        now: u64,
    ) -> Result<u64> {
        if significance > 100 {
            return Err(Error::InvalidParameter(format!(
                "significance {significance} out of range [0, 100]"
            )));
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

        let mut nodes = self.nodes.write();
        let id = nodes.len() as u64;
        nodes.push(Node {
            id,
            content,
            embedding,
            significance,
            creation_time: now,
            access_count: AtomicU64::new(0),
            last_access: AtomicU64::new(now),
            cluster_id: AtomicI64::new(NO_CLUSTER),
            alive: AtomicBool::new(true),
        });

        tracing::debug!(node_id = id, dimension = self.dimension(), "node added");
        Ok(id)
    }

    /// Reads `content`, reinforcing access count and last-access time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if `id` is unknown or dead.
    pub fn get(&self, id: u64, now: u64) -> Result<Vec<u8>> {
        let nodes = self.nodes.read();
        let node = nodes
            .get(id as usize)
            .filter(|n| n.is_alive())
            .ok_or(Error::NotFound(id))?;
        node.reinforce(now);
        Ok(node.content.clone())
    }

    /// Runs `f` over the node without reinforcing access, for internal
    /// callers (graph, lifecycle, clustering, query) that need metadata
    /// but must not count as a content read.
    pub fn with_node<R>(&self, id: u64, f: impl FnOnce(&Node) -> R) -> Option<R> {
        let nodes = self.nodes.read();
        nodes.get(id as usize).filter(|n| n.is_alive()).map(f)
    }

    /// Marks a node dead. Returns `true` if it was previously alive.
    pub fn remove(&self, id: u64) -> bool {
        let nodes = self.nodes.read();
        match nodes.get(id as usize) {
            Some(node) if node.is_alive() => {
                node.alive.store(false, Ordering::Relaxed);
                tracing::debug!(node_id = id, "node removed");
                true
            }
            _ => false,
        }
    }

    /// Whether `id` refers to a live node.
    #[must_use]
    pub fn is_alive(&self, id: u64) -> bool {
        self.nodes
            .read()
            .get(id as usize)
            .is_some_and(Node::is_alive)
    }

    /// All currently live ids, in ascending order.
    #[must_use]
    pub fn live_ids(&self) -> Vec<u64> {
        self.nodes
            .read()
            .iter()
            .filter(|n| n.is_alive())
            .map(Node::id)
            .collect()
    }

    /// Assigns a cluster id to a node. No-op if the node is dead.
    pub fn set_cluster_id(&self, id: u64, cluster_id: u32) {
        if let Some(node) = self.nodes.read().get(id as usize) {
            if node.is_alive() {
                node.cluster_id.store(i64::from(cluster_id), Ordering::Relaxed);
            }
        }
    }

    /// Clears cluster assignment for every node (used before a rebuild).
    pub fn clear_clusters(&self) {
        for node in self.nodes.read().iter() {
            node.cluster_id.store(NO_CLUSTER, Ordering::Relaxed);
        }
    }

    /// Returns `(id, embedding)` pairs for every live node, used by the
    /// HNSW rebuild on load and by the clustering engine.
    #[must_use]
    pub fn live_embeddings(&self) -> Vec<(u64, Vec<f32>)> {
        self.nodes
            .read()
            .iter()
            .filter(|n| n.is_alive())
            .map(|n| (n.id, n.embedding.clone()))
            .collect()
    }

    /// Snapshots every live node's persisted fields, in id order.
    #[must_use]
    pub fn snapshot_nodes(&self) -> Vec<NodeSnapshot> {
        self.nodes
            .read()
            .iter()
            .filter(|n| n.is_alive())
            .map(|n| NodeSnapshot {
                id: n.id,
                content: n.content.clone(),
                embedding: n.embedding.clone(),
                significance: n.significance,
                access_count: n.access_count.load(Ordering::Relaxed),
                last_access: n.last_access.load(Ordering::Relaxed),
                creation_time: n.creation_time,
                cluster_id: n.cluster_id(),
            })
            .collect()
    }

    /// Rebuilds the store from a set of node snapshots, in ascending id
    /// order with no gaps below the maximum id (gaps are filled with
    /// tombstones so ids line up with the persisted HNSW rebuild order).
    #[must_use]
    pub fn restore(snapshots: Vec<NodeSnapshot>, dimension: Option<usize>) -> Self {
        let store = Self::new();
        *store.dimension.write() = dimension;

        let max_id = snapshots.iter().map(|s| s.id).max();
        let mut by_id: std::collections::HashMap<u64, NodeSnapshot> =
            snapshots.into_iter().map(|s| (s.id, s)).collect();

        let mut nodes = store.nodes.write();
        if let Some(max_id) = max_id {
            for id in 0..=max_id {
                if let Some(s) = by_id.remove(&id) {
                    nodes.push(Node {
                        id: s.id,
                        content: s.content,
                        embedding: s.embedding,
                        significance: s.significance,
                        creation_time: s.creation_time,
                        access_count: AtomicU64::new(s.access_count),
                        last_access: AtomicU64::new(s.last_access),
                        cluster_id: AtomicI64::new(
                            s.cluster_id.map_or(NO_CLUSTER, i64::from),
                        ),
                        alive: AtomicBool::new(true),
                    });
                } else {
                    nodes.push(Node {
                        id,
                        content: Vec::new(),
                        embedding: Vec::new(),
                        significance: 0,
                        creation_time: 0,
                        access_count: AtomicU64::new(0),
                        last_access: AtomicU64::new(0),
                        cluster_id: AtomicI64::new(NO_CLUSTER),
                        alive: AtomicBool::new(false),
                    });
                }
            }
        }
        drop(nodes);
        store
    }
}

/// Node state as persisted to / loaded from a snapshot file.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    /// Node identifier.
    pub id: u64,
    /// Raw content bytes.
    pub content: Vec<u8>,
    /// Embedding vector.
    pub embedding: Vec<f32>,
    /// Significance in `[0, 100]`.
    pub significance: u8,
    /// Access count at save time.
    pub access_count: u64,
    /// Last-access timestamp at save time.
    pub last_access: u64,
    /// Creation timestamp.
    pub creation_time: u64,
    /// Cluster assignment, if any.
    pub cluster_id: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_insert_fixes_dimension() {
        let store = Store::new();
        let id = store.add(b"hello".to_vec(), vec![1.0, 0.0], 10, 1000).unwrap();
        assert_eq!(id, 0);
        assert_eq!(store.dimension(), Some(2));
    }

    #[test]
    fn dimension_mismatch_rejected() {
        let store = Store::new();
        store.add(b"a".to_vec(), vec![1.0; 384], 10, 0).unwrap();
        let err = store.add(b"b".to_vec(), vec![1.0; 128], 10, 0).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 384, actual: 128 }));
    }

    #[test]
    fn significance_out_of_range_rejected() {
        let store = Store::new();
        let err = store.add(b"a".to_vec(), vec![1.0], 101, 0).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
    }

    #[test]
    fn get_reinforces() {
        let store = Store::new();
        let id = store.add(b"hi".to_vec(), vec![1.0], 5, 1000).unwrap();
        store.get(id, 1001).unwrap();
        store.get(id, 1002).unwrap();
        let count = store.with_node(id, Node::access_count).unwrap();
        assert_eq!(count, 2);
        let last = store.with_node(id, Node::last_access).unwrap();
        assert_eq!(last, 1002);
    }

    #[test]
    fn remove_tombstones_and_not_found_after() {
        let store = Store::new();
        let id = store.add(b"x".to_vec(), vec![1.0], 1, 0).unwrap();
        assert!(store.remove(id));
        assert!(!store.remove(id));
        assert!(matches!(store.get(id, 1).unwrap_err(), Error::NotFound(_)));
        assert!(!store.is_alive(id));
    }

    #[test]
    fn ids_are_dense_and_never_reused() {
        let store = Store::new();
        let a = store.add(b"a".to_vec(), vec![1.0], 1, 0).unwrap();
        let b = store.add(b"b".to_vec(), vec![1.0], 1, 0).unwrap();
        store.remove(a);
        let c = store.add(b"c".to_vec(), vec![1.0], 1, 0).unwrap();
        assert_eq!((a, b, c), (0, 1, 2));
        assert_eq!(store.live_ids(), vec![b, c]);
    }

    #[test]
    fn cluster_round_trip() {
        let store = Store::new();
        let id = store.add(b"a".to_vec(), vec![1.0], 1, 0).unwrap();
        assert_eq!(store.with_node(id, Node::cluster_id).unwrap(), None);
        store.set_cluster_id(id, 3);
        assert_eq!(store.with_node(id, Node::cluster_id).unwrap(), Some(3));
    }
}
