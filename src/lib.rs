//! `SpiderDB`: an embeddable associative memory store.
//!
//! Fuses four subsystems behind one engine: an HNSW approximate
//! nearest-neighbor index over dense embeddings, an undirected
//! semantic graph of edges between stored items, a biological-style
//! lifecycle that scores and evicts stale memories, and a k-means
//! clustering engine for grouping live memories. The engine is
//! single-process and single-writer; see [`SpiderDB`]'s docs for the
//! concurrency model.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use spiderdb::SpiderDB;
//!
//! # fn main() -> spiderdb::Result<()> {
//! let db = SpiderDB::open("memory.spdr", 100_000, 16, 200)?;
//!
//! let id = db.add_node(b"the capital of France is Paris".to_vec(), vec![0.1, 0.2, 0.3], 80, Some(0.4))?;
//! let _content = db.get_node(id)?;
//!
//! let results = db.hybrid_search(&[0.1, 0.2, 0.3], 5, None)?;
//! for (node_id, score) in results {
//!     println!("{node_id}: {score:.3}");
//! }
//!
//! db.save(None)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod clustering;
mod db;
mod distance;
mod graph;
mod hnsw;
mod lifecycle;
mod persistence;
mod query;
mod store;

pub mod config;
pub mod error;

pub use config::SpiderConfig;
pub use db::SpiderDB;
pub use error::{Error, Result};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_surface_is_usable_end_to_end() {
        let db = SpiderDB::open_with_config(None::<&std::path::Path>, &SpiderConfig::default()).unwrap();
        let id = db.add_node(b"hello".to_vec(), vec![1.0, 0.0], 60, None).unwrap();
        assert_eq!(db.get_node(id).unwrap(), b"hello");
        let results = db.hybrid_search(&[1.0, 0.0], 1, None).unwrap();
        assert_eq!(results[0].0, id);
    }
}
