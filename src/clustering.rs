//! k-means clustering over live embeddings.
//!
//! Cosine similarity and Euclidean distance agree (up to monotone
//! rescaling) once every vector is normalized to unit length, so
//! ordinary Lloyd's-algorithm k-means on the normalized embeddings
//! clusters by cosine proximity without a custom distance function.

use crate::distance::{normalize, squared_euclidean};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;

const MAX_ITERATIONS: usize = 50;
const CONVERGENCE_EPS: f32 = 1e-4;

/// Result of a clustering run: which cluster each node landed in, and
/// the resulting centroids (in the same unit-normalized space used to
/// cluster, indexed by cluster id).
pub struct ClusterAssignment {
    /// Node id to cluster id.
    pub cluster_of: FxHashMap<u64, u32>,
    /// Centroid for each cluster id, in index order.
    pub centroids: Vec<Vec<f32>>,
}

impl ClusterAssignment {
    /// Number of clusters produced by the run.
    #[must_use]
    pub fn num_clusters(&self) -> usize {
        self.centroids.len()
    }

    /// Members of `cluster_id`, for mean-size and mean-significance reporting.
    #[must_use]
    pub fn members_of(&self, cluster_id: u32) -> Vec<u64> {
        self.cluster_of
            .iter()
            .filter(|(_, &c)| c == cluster_id)
            .map(|(&id, _)| id)
            .collect()
    }
}

/// Clusters `live` embeddings into at most `k` groups.
///
/// Returns `None` if `live` is empty. `k` is clamped to `live.len()` so
/// that every produced cluster is guaranteed non-empty, preserving the
/// invariant that a cluster, once it exists, has at least one member.
#[must_use]
pub fn build_clusters(live: &[(u64, Vec<f32>)], k: usize, seed: u64) -> Option<ClusterAssignment> {
    if live.is_empty() || k == 0 {
        return None;
    }
    let k = k.min(live.len());

    let normalized: Vec<Vec<f32>> = live
        .iter()
        .map(|(_, emb)| normalize(emb).unwrap_or_else(|| emb.clone()))
        .collect();

    let mut rng = SmallRng::seed_from_u64(seed);
    let mut centroids = init_plus_plus(&normalized, k, &mut rng);
    let mut assignment = vec![0usize; normalized.len()];

    for _ in 0..MAX_ITERATIONS {
        for (i, point) in normalized.iter().enumerate() {
            assignment[i] = nearest_centroid(point, &centroids);
        }

        let mut sums = vec![vec![0.0f32; centroids[0].len()]; k];
        let mut counts = vec![0usize; k];
        for (i, point) in normalized.iter().enumerate() {
            let c = assignment[i];
            counts[c] += 1;
            for (s, v) in sums[c].iter_mut().zip(point) {
                *s += v;
            }
        }

        let mut max_change = 0.0f32;
        let mut new_centroids = centroids.clone();
        for c in 0..k {
            if counts[c] == 0 {
                // Empty cluster: reseed to a random data point so the
                // next iteration has a chance to pull members into it.
                let idx = rng.gen_range(0..normalized.len());
                new_centroids[c] = normalized[idx].clone();
            } else {
                let mean: Vec<f32> = sums[c].iter().map(|s| s / counts[c] as f32).collect();
                new_centroids[c] = mean;
            }
            let change = squared_euclidean(&new_centroids[c], &centroids[c]).sqrt();
            max_change = max_change.max(change);
        }

        centroids = new_centroids;
        if max_change < CONVERGENCE_EPS {
            break;
        }
    }

    for (i, point) in normalized.iter().enumerate() {
        assignment[i] = nearest_centroid(point, &centroids);
    }

    let cluster_of = live
        .iter()
        .zip(assignment.iter())
        .map(|((id, _), &c)| (*id, c as u32))
        .collect();

    Some(ClusterAssignment {
        cluster_of,
        centroids,
    })
}

fn nearest_centroid(point: &[f32], centroids: &[Vec<f32>]) -> usize {
    centroids
        .iter()
        .enumerate()
        .map(|(i, c)| (i, squared_euclidean(point, c)))
        .min_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn init_plus_plus(points: &[Vec<f32>], k: usize, rng: &mut SmallRng) -> Vec<Vec<f32>> {
    let mut centroids = Vec::with_capacity(k);
    let first = rng.gen_range(0..points.len());
    centroids.push(points[first].clone());

    while centroids.len() < k {
        let weights: Vec<f32> = points
            .iter()
            .map(|p| {
                centroids
                    .iter()
                    .map(|c| squared_euclidean(p, c))
                    .fold(f32::INFINITY, f32::min)
            })
            .collect();

        let total: f32 = weights.iter().sum();
        if total <= 0.0 {
            let idx = rng.gen_range(0..points.len());
            centroids.push(points[idx].clone());
            continue;
        }

        let mut target = rng.gen_range(0.0..total);
        let mut chosen = points.len() - 1;
        for (i, w) in weights.iter().enumerate() {
            if target < *w {
                chosen = i;
                break;
            }
            target -= w;
        }
        centroids.push(points[chosen].clone());
    }

    centroids
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gaussian_blob(center: [f32; 2], count: usize, start_id: u64) -> Vec<(u64, Vec<f32>)> {
        (0..count)
            .map(|i| {
                let jitter = (i as f32 % 5.0 - 2.0) * 0.01;
                (
                    start_id + i as u64,
                    vec![center[0] + jitter, center[1] - jitter],
                )
            })
            .collect()
    }

    #[test]
    fn empty_input_yields_none() {
        assert!(build_clusters(&[], 3, 42).is_none());
    }

    #[test]
    fn k_is_clamped_to_live_count() {
        let live = vec![(0, vec![1.0, 0.0]), (1, vec![0.0, 1.0])];
        let assignment = build_clusters(&live, 10, 1).unwrap();
        assert_eq!(assignment.num_clusters(), 2);
    }

    #[test]
    fn separated_blobs_get_distinct_clusters() {
        let mut live = gaussian_blob([10.0, 0.0], 10, 0);
        live.extend(gaussian_blob([-10.0, 10.0], 10, 10));
        live.extend(gaussian_blob([-10.0, -10.0], 10, 20));

        let assignment = build_clusters(&live, 3, 7).unwrap();
        assert_eq!(assignment.num_clusters(), 3);

        let first_cluster = assignment.cluster_of[&0];
        for id in 0..10u64 {
            assert_eq!(assignment.cluster_of[&id], first_cluster);
        }
        let second_cluster = assignment.cluster_of[&10];
        assert_ne!(first_cluster, second_cluster);
        for id in 10..20u64 {
            assert_eq!(assignment.cluster_of[&id], second_cluster);
        }
    }

    #[test]
    fn every_cluster_is_non_empty() {
        let live = gaussian_blob([1.0, 1.0], 6, 0);
        let assignment = build_clusters(&live, 3, 5).unwrap();
        for c in 0..assignment.num_clusters() as u32 {
            assert!(!assignment.members_of(c).is_empty());
        }
    }
}
