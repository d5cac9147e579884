//! Hybrid search: HNSW recall widened with one-hop graph neighbors and
//! re-ranked by a blend of similarity, life score, and cluster locality.

use crate::error::Result;
use crate::graph::Graph;
use crate::hnsw::Hnsw;
use crate::lifecycle::{life_score, normalize_life_score};
use crate::store::Store;
use rustc_hash::FxHashMap;

/// Weight of raw cosine similarity in the blended score.
const WEIGHT_SIMILARITY: f32 = 0.7;
/// Weight of normalized life score.
const WEIGHT_LIFE: f32 = 0.2;
/// Weight of the same-cluster-as-top-1 indicator.
const WEIGHT_CLUSTER: f32 = 0.1;
/// Similarity is discounted by this factor for nodes pulled in only via
/// one-hop graph expansion, since their proximity to the query was
/// never actually measured.
const GRAPH_EXPANSION_DISCOUNT: f32 = 0.5;

struct Candidate {
    similarity: f32,
}

/// Runs a hybrid search and returns the top `k` results as
/// `(id, blended_score)`, reinforcing each returned node's content.
///
/// # Errors
///
/// Propagates [`crate::error::Error::EmptyIndex`],
/// [`crate::error::Error::ZeroVector`], and
/// [`crate::error::Error::DimensionMismatch`] from the underlying HNSW
/// search.
pub fn hybrid_search(
    store: &Store,
    index: &Hnsw,
    graph: &Graph,
    query: &[f32],
    k: usize,
    ef_search: usize,
    now: u64,
) -> Result<Vec<(u64, f32)>> {
    let oversampled = index.search(query, 2 * k, ef_search)?;

    let mut candidates: FxHashMap<u64, Candidate> = FxHashMap::default();
    for (id, distance) in &oversampled {
        candidates.insert(
            *id,
            Candidate {
                similarity: 1.0 - distance,
            },
        );
    }

    for (id, _) in &oversampled {
        for neighbor in graph.neighbors(*id) {
            if candidates.contains_key(&neighbor) || !store.is_alive(neighbor) {
                continue;
            }
            let source_similarity = candidates[id].similarity;
            candidates.insert(
                neighbor,
                Candidate {
                    similarity: source_similarity * GRAPH_EXPANSION_DISCOUNT,
                },
            );
        }
    }

    let top1_cluster = oversampled
        .first()
        .and_then(|(id, _)| store.with_node(*id, |n| n.cluster_id()))
        .flatten();

    let mut scored: Vec<(u64, f32)> = candidates
        .into_iter()
        .filter_map(|(id, candidate)| {
            store.with_node(id, |node| {
                let life = life_score(node.significance(), node.access_count(), node.last_access(), now);
                let same_cluster = match (node.cluster_id(), top1_cluster) {
                    (Some(a), Some(b)) if a == b => 1.0,
                    _ => 0.0,
                };
                let blended = WEIGHT_SIMILARITY * candidate.similarity
                    + WEIGHT_LIFE * normalize_life_score(life)
                    + WEIGHT_CLUSTER * same_cluster;
                (id, blended)
            })
        })
        .collect();

    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(k);

    for (id, _) in &scored {
        store.get(*id, now)?;
    }

    Ok(scored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hnsw::Hnsw;

    fn seed_store(store: &Store, index: &Hnsw, vectors: &[(Vec<u8>, Vec<f32>, u8)]) {
        for (content, embedding, significance) in vectors {
            let id = store.add(content.clone(), embedding.clone(), *significance, 0).unwrap();
            index.insert(id, embedding.clone()).unwrap();
        }
    }

    #[test]
    fn nearest_match_ranks_first() {
        let store = Store::new();
        let index = Hnsw::new(8, 64, 42);
        let graph = Graph::new();

        seed_store(
            &store,
            &index,
            &[
                (b"target".to_vec(), vec![1.0, 0.0], 50),
                (b"far".to_vec(), vec![0.0, 1.0], 50),
                (b"near".to_vec(), vec![0.9, 0.1], 50),
            ],
        );

        let results = hybrid_search(&store, &index, &graph, &[1.0, 0.0], 2, 32, 1000).unwrap();
        assert_eq!(results[0].0, 0);
    }

    #[test]
    fn graph_neighbor_is_pulled_in_even_off_axis() {
        let store = Store::new();
        let index = Hnsw::new(8, 64, 42);
        let mut graph = Graph::new();

        seed_store(
            &store,
            &index,
            &[
                (b"a".to_vec(), vec![1.0, 0.0], 50),
                (b"b".to_vec(), vec![0.0, 1.0], 50),
            ],
        );
        graph.add_edge(0, 1);

        let results = hybrid_search(&store, &index, &graph, &[1.0, 0.0], 2, 32, 1000).unwrap();
        assert!(results.iter().any(|(id, _)| *id == 1));
    }

    #[test]
    fn reads_reinforce_returned_nodes() {
        let store = Store::new();
        let index = Hnsw::new(8, 64, 42);
        let graph = Graph::new();
        seed_store(&store, &index, &[(b"only".to_vec(), vec![1.0, 0.0], 50)]);

        hybrid_search(&store, &index, &graph, &[1.0, 0.0], 1, 32, 1000).unwrap();
        let count = store.with_node(0, crate::store::Node::access_count).unwrap();
        assert_eq!(count, 1);
    }
}
