//! Hierarchical navigable small-world index.
//!
//! Adapted from a single-metric, single-writer HNSW graph: one fixed
//! cosine distance, node ids supplied by the caller instead of minted
//! internally, and a persisted RNG seed so that a rebuild from a
//! snapshot replays the same level-assignment sequence (see
//! [`Hnsw::seed`]).
//!
//! Reference: Malkov & Yashunin, "Efficient and robust approximate
//! nearest neighbor search using Hierarchical Navigable Small World
//! graphs" (arXiv:1603.09320).

mod index;
mod layer;
mod ordered_float;

pub use index::Hnsw;
pub(crate) use layer::Layer;
pub(crate) use ordered_float::OrderedFloat;
