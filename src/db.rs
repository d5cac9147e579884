//! The `SpiderDB` facade: wires the store, HNSW index, graph, lifecycle,
//! and clustering engine behind the single-writer/multi-reader lock
//! discipline from the engine's concurrency model.

use crate::clustering::{self, ClusterAssignment};
use crate::config::SpiderConfig;
use crate::distance::is_zero_vector;
use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::hnsw::Hnsw;
use crate::lifecycle::{life_score, should_vacuum};
use crate::persistence::{self, Snapshot};
use crate::query;
use crate::store::Store;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Candidate pool width for `knn` during auto-linking.
const AUTO_LINK_K: usize = 8;
/// Default beam width for `hybrid_search` when the caller doesn't supply one.
const DEFAULT_EF_SEARCH: usize = 50;
/// Bytes of `content` surfaced by `get_all_graph_data`'s preview field.
const PREVIEW_LEN: usize = 80;

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn fresh_seed() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    nanos ^ 0x9E37_79B9_7F4A_7C15
}

struct Engine {
    store: Store,
    index: Hnsw,
    graph: Graph,
    clusters: Option<ClusterAssignment>,
    m: usize,
    ef_construction: usize,
    ef_search: usize,
    max_capacity: usize,
    default_path: Option<PathBuf>,
}

impl Engine {
    fn rebuild_from_snapshot(snapshot: Snapshot, default_path: Option<PathBuf>) -> Result<Self> {
        let dimension = snapshot.dimension.map(|d| d as usize);

        let mut id_embeddings: Vec<(u64, Vec<f32>)> = snapshot
            .nodes
            .iter()
            .map(|n| (n.id, n.embedding.clone()))
            .collect();
        id_embeddings.sort_by_key(|(id, _)| *id);

        let store = Store::restore(snapshot.nodes, dimension);
        let index = Hnsw::new(snapshot.m as usize, snapshot.ef_construction as usize, snapshot.rng_seed);
        for (id, embedding) in id_embeddings {
            index.insert(id, embedding)?;
        }

        let mut graph = Graph::new();
        for (a, b) in &snapshot.edges {
            graph.add_edge(*a, *b);
        }

        let clusters = if snapshot.centroids.is_empty() {
            None
        } else {
            let cluster_of = store
                .live_ids()
                .into_iter()
                .filter_map(|id| store.with_node(id, |n| n.cluster_id().map(|c| (id, c))).flatten())
                .collect();
            Some(ClusterAssignment {
                cluster_of,
                centroids: snapshot.centroids,
            })
        };

        Ok(Self {
            store,
            index,
            graph,
            clusters,
            m: snapshot.m as usize,
            ef_construction: snapshot.ef_construction as usize,
            ef_search: snapshot.ef_search as usize,
            max_capacity: snapshot.max_capacity as usize,
            default_path,
        })
    }

    fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            dimension: self.store.dimension().map(|d| d as u32),
            m: self.m as u32,
            ef_construction: self.ef_construction as u32,
            ef_search: self.ef_search as u32,
            max_capacity: self.max_capacity as u64,
            rng_seed: self.index.seed(),
            nodes: self.store.snapshot_nodes(),
            edges: self.graph.edges(),
            centroids: self
                .clusters
                .as_ref()
                .map(|c| c.centroids.clone())
                .unwrap_or_default(),
        }
    }
}

/// The embeddable associative memory store.
///
/// Mutating operations (`add_node`, `add_edge`, `vacuum`,
/// `build_clusters`, `save`, `load`) take an exclusive lock over the
/// whole engine; reads (`get_node`, `hybrid_search`,
/// `calculate_life_score`, `get_all_graph_data`) run under a shared
/// lock, relying on atomic per-node counters for `get_node`'s
/// reinforcement rather than upgrading.
pub struct SpiderDB {
    engine: RwLock<Engine>,
}

impl SpiderDB {
    /// Opens the store at `path`, loading existing state if present,
    /// otherwise creating a fresh store tuned by `max_capacity`, `m`,
    /// and `ef_construction`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] or [`Error::Corrupt`] if `path` exists but
    /// fails to load.
    pub fn open<P: AsRef<Path>>(path: P, max_capacity: usize, m: usize, ef_construction: usize) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let snapshot = persistence::load_from_file(path)?;
            let engine = Engine::rebuild_from_snapshot(snapshot, Some(path.to_path_buf()))?;
            Ok(Self {
                engine: RwLock::new(engine),
            })
        } else {
            Ok(Self::fresh(Some(path.to_path_buf()), max_capacity, m, ef_construction))
        }
    }

    /// Opens (or creates) a store using an explicit configuration,
    /// falling back to an in-memory store if `path` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] or [`Error::Corrupt`] if `path` is `Some`,
    /// exists, but fails to load.
    pub fn open_with_config<P: AsRef<Path>>(path: Option<P>, config: &SpiderConfig) -> Result<Self> {
        let hnsw = &config.hnsw;
        match path {
            Some(p) if p.as_ref().exists() => Self::open(p, hnsw.max_capacity, hnsw.m, hnsw.ef_construction),
            Some(p) => Ok(Self::fresh(
                Some(p.as_ref().to_path_buf()),
                hnsw.max_capacity,
                hnsw.m,
                hnsw.ef_construction,
            )),
            None => Ok(Self::fresh(None, hnsw.max_capacity, hnsw.m, hnsw.ef_construction)),
        }
    }

    fn fresh(default_path: Option<PathBuf>, max_capacity: usize, m: usize, ef_construction: usize) -> Self {
        let seed = fresh_seed();
        Self {
            engine: RwLock::new(Engine {
                store: Store::new(),
                index: Hnsw::new(m, ef_construction, seed),
                graph: Graph::new(),
                clusters: None,
                m,
                ef_construction,
                ef_search: DEFAULT_EF_SEARCH,
                max_capacity,
                default_path,
            }),
        }
    }

    /// Inserts a node, and optionally auto-links it to its nearest
    /// existing neighbors whose similarity clears `auto_link_threshold`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZeroVector`] if `embedding` has zero norm,
    /// [`Error::DimensionMismatch`] if it disagrees with the dimension
    /// fixed by the first insert, or [`Error::InvalidParameter`] if
    /// `significance > 100`.
    pub fn add_node(
        &self,
        content: Vec<u8>,
        embedding: Vec<f32>,
        significance: u8,
        auto_link_threshold: Option<f32>,
    ) -> Result<u64> {
        if is_zero_vector(&embedding) {
            return Err(Error::ZeroVector);
        }

        let mut engine = self.engine.write();
        let timestamp = now();
        let id = engine.store.add(content, embedding.clone(), significance, timestamp)?;

        if let Err(err) = engine.index.insert(id, embedding.clone()) {
            engine.store.remove(id);
            return Err(err);
        }

        if let Some(threshold) = auto_link_threshold {
            let neighbors = engine
                .index
                .search(&embedding, AUTO_LINK_K, engine.ef_construction)
                .unwrap_or_default();
            let candidates: Vec<(u64, Vec<f32>)> = neighbors
                .iter()
                .filter(|(nid, _)| *nid != id)
                .filter_map(|(nid, _)| {
                    engine
                        .store
                        .with_node(*nid, |n| n.embedding().to_vec())
                        .map(|emb| (*nid, emb))
                })
                .collect();
            engine.graph.auto_link(id, &embedding, &candidates, AUTO_LINK_K, threshold);
        }

        tracing::debug!(node_id = id, significance, "add_node");
        Ok(id)
    }

    /// Adds an undirected edge. Idempotent; fails if either endpoint is
    /// dead or unknown, or if `a == b`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if either id is dead or unknown, or
    /// [`Error::InvalidParameter`] for a self-loop.
    pub fn add_edge(&self, a: u64, b: u64) -> Result<()> {
        if a == b {
            return Err(Error::InvalidParameter("self-loop edges are forbidden".to_string()));
        }
        let mut engine = self.engine.write();
        if !engine.store.is_alive(a) {
            return Err(Error::NotFound(a));
        }
        if !engine.store.is_alive(b) {
            return Err(Error::NotFound(b));
        }
        engine.graph.add_edge(a, b);
        Ok(())
    }

    /// Reads a node's content, reinforcing its access count and last-access time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if `id` is unknown or dead.
    pub fn get_node(&self, id: u64) -> Result<Vec<u8>> {
        let engine = self.engine.read();
        engine.store.get(id, now())
    }

    /// Reads a node's content as text, if it happens to be valid UTF-8.
    /// Reinforces exactly like [`Self::get_node`]; content is never
    /// required to be UTF-8, so this returns `None` rather than an
    /// error when it isn't.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if `id` is unknown or dead.
    pub fn get_node_str(&self, id: u64) -> Result<Option<String>> {
        Ok(String::from_utf8(self.get_node(id)?).ok())
    }

    /// Runs a hybrid search blending HNSW recall, one-hop graph
    /// expansion, and life-score/cluster-locality re-ranking.
    /// Reinforces every returned node.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyIndex`], [`Error::ZeroVector`], or
    /// [`Error::DimensionMismatch`] from the underlying HNSW search.
    pub fn hybrid_search(&self, query: &[f32], k: usize, ef_search: Option<usize>) -> Result<Vec<(u64, f32)>> {
        let engine = self.engine.read();
        let ef = ef_search.unwrap_or(engine.ef_search);
        query::hybrid_search(&engine.store, &engine.index, &engine.graph, query, k, ef, now())
    }

    /// Removes every node whose life score falls below `threshold`,
    /// returning the removed ids. Not called implicitly by any other operation.
    pub fn vacuum(&self, threshold: f32) -> Vec<u64> {
        let mut engine = self.engine.write();
        let timestamp = now();
        let dead: Vec<u64> = engine
            .store
            .live_ids()
            .into_iter()
            .filter(|&id| {
                let score = engine
                    .store
                    .with_node(id, |n| life_score(n.significance(), n.access_count(), n.last_access(), timestamp))
                    .unwrap_or(f32::MAX);
                should_vacuum(score, threshold)
            })
            .collect();

        for &id in &dead {
            engine.store.remove(id);
            engine.index.tombstone(id);
            engine.graph.remove_node(id);
        }
        tracing::debug!(removed = dead.len(), threshold, "vacuum");
        dead
    }

    /// Recomputes clusters over every live embedding.
    pub fn build_clusters(&self, k: usize) {
        let mut engine = self.engine.write();
        let live = engine.store.live_embeddings();
        let seed = engine.index.seed() ^ 0xC1C1_C1C1_C1C1_C1C1;

        match clustering::build_clusters(&live, k, seed) {
            Some(assignment) => {
                engine.store.clear_clusters();
                for (&id, &cluster_id) in &assignment.cluster_of {
                    engine.store.set_cluster_id(id, cluster_id);
                }
                engine.clusters = Some(assignment);
            }
            None => engine.clusters = None,
        }
        tracing::debug!(k, "build_clusters");
    }

    /// The life score a node would have right now.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if `id` is unknown or dead.
    pub fn calculate_life_score(&self, id: u64) -> Result<f32> {
        let engine = self.engine.read();
        let timestamp = now();
        engine
            .store
            .with_node(id, |n| life_score(n.significance(), n.access_count(), n.last_access(), timestamp))
            .ok_or(Error::NotFound(id))
    }

    /// `(num_clusters, mean_cluster_size, mean_significance)`, or
    /// `None` if `build_clusters` has never run (or produced nothing).
    #[must_use]
    pub fn get_cluster_stats(&self) -> Option<(usize, f32, f32)> {
        let engine = self.engine.read();
        let clusters = engine.clusters.as_ref()?;
        let n = clusters.num_clusters();
        if n == 0 {
            return None;
        }

        let mut total_members = 0usize;
        let mut total_significance = 0f64;
        for cluster_id in 0..n as u32 {
            for id in clusters.members_of(cluster_id) {
                total_members += 1;
                if let Some(sig) = engine.store.with_node(id, |n| n.significance()) {
                    total_significance += f64::from(sig);
                }
            }
        }

        let mean_size = total_members as f32 / n as f32;
        let mean_significance = if total_members == 0 {
            0.0
        } else {
            (total_significance / total_members as f64) as f32
        };
        Some((n, mean_size, mean_significance))
    }

    /// Snapshot of every live node's id, content preview, significance,
    /// and cluster id, plus every edge — the feed for a visualization host.
    #[must_use]
    pub fn get_all_graph_data(&self) -> (Vec<(u64, String, u8, Option<u32>)>, Vec<(u64, u64)>) {
        let engine = self.engine.read();
        let nodes = engine
            .store
            .live_ids()
            .into_iter()
            .filter_map(|id| {
                engine.store.with_node(id, |n| {
                    let content = n.content();
                    let preview_len = content.len().min(PREVIEW_LEN);
                    let preview = String::from_utf8_lossy(&content[..preview_len]).into_owned();
                    (id, preview, n.significance(), n.cluster_id())
                })
            })
            .collect();
        let edges = engine.graph.edges();
        (nodes, edges)
    }

    /// Whether the live node count exceeds the configured `max_capacity`.
    ///
    /// The engine never rejects inserts past capacity; this flag is how
    /// the host learns it should call `vacuum` or `build_clusters` soon.
    #[must_use]
    pub fn over_capacity(&self) -> bool {
        let engine = self.engine.read();
        engine.store.len() > engine.max_capacity
    }

    /// Saves a full snapshot to `path`, or to the path this store was
    /// opened/last saved with if `path` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if no path is available, or
    /// [`Error::Io`] on a filesystem failure.
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let mut engine = self.engine.write();
        let target = match path {
            Some(p) => p.to_path_buf(),
            None => engine
                .default_path
                .clone()
                .ok_or_else(|| Error::InvalidParameter("no path given and none set at construction".to_string()))?,
        };
        let snapshot = engine.to_snapshot();
        persistence::save_to_file(&target, &snapshot)?;
        engine.default_path = Some(target);
        Ok(())
    }

    /// Replaces all in-memory state with what's stored at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] or [`Error::Corrupt`] if `path` can't be
    /// read or parsed.
    pub fn load(&self, path: &Path) -> Result<()> {
        let snapshot = persistence::load_from_file(path)?;
        let mut engine = self.engine.write();
        *engine = Engine::rebuild_from_snapshot(snapshot, Some(path.to_path_buf()))?;
        Ok(())
    }
}
