//! Coarse k-means quantizer with probe lists.
//!
//! Descriptors are partitioned by Lloyd iterations into `branching`
//! clusters; a query ranks the centroids and scans the closest probe lists
//! until the candidate budget is met. Initialization is deterministic
//! (evenly spaced rows), so identical inputs build identical indexes.

use crate::core::Mat;
use crate::settings::DistanceKind;

use super::distance::{l1, l2_sq};

pub struct KMeansIndex {
    centroids: Mat<f32>,
    clusters: Vec<Vec<u32>>,
}

fn point_distance(distance: DistanceKind, a: &[f32], b: &[f32]) -> f32 {
    match distance {
        DistanceKind::L1 => l1(a, b),
        _ => l2_sq(a, b),
    }
}

impl KMeansIndex {
    pub fn build(
        data: &Mat<f32>,
        branching: usize,
        iterations: usize,
        distance: DistanceKind,
    ) -> Self {
        let n = data.rows();
        let dim = data.cols();
        if n == 0 {
            return Self {
                centroids: Mat::new(dim.max(1)),
                clusters: Vec::new(),
            };
        }
        let k = branching.clamp(1, n);

        // evenly spaced seeds keep construction deterministic
        let mut centroids = Mat::new(dim);
        for c in 0..k {
            centroids.push_row(data.row(c * n / k));
        }

        let mut assignments = vec![0usize; n];
        for _ in 0..iterations {
            for (i, slot) in assignments.iter_mut().enumerate() {
                let row = data.row(i);
                let mut best = 0usize;
                let mut best_dist = f32::INFINITY;
                for c in 0..k {
                    let d = point_distance(distance, row, centroids.row(c));
                    if d < best_dist {
                        best_dist = d;
                        best = c;
                    }
                }
                *slot = best;
            }

            let mut sums = vec![vec![0.0f64; dim]; k];
            let mut counts = vec![0usize; k];
            for (i, &c) in assignments.iter().enumerate() {
                counts[c] += 1;
                for (s, v) in sums[c].iter_mut().zip(data.row(i)) {
                    *s += *v as f64;
                }
            }
            let mut next = Mat::new(dim);
            for c in 0..k {
                if counts[c] == 0 {
                    // keep the old centroid for an emptied cluster
                    next.push_row(centroids.row(c));
                } else {
                    let row: Vec<f32> = sums[c]
                        .iter()
                        .map(|s| (*s / counts[c] as f64) as f32)
                        .collect();
                    next.push_row(&row);
                }
            }
            centroids = next;
        }

        let mut clusters = vec![Vec::new(); k];
        for (i, &c) in assignments.iter().enumerate() {
            clusters[c].push(i as u32);
        }
        Self {
            centroids,
            clusters,
        }
    }

    pub fn knn(
        &self,
        data: &Mat<f32>,
        query: &[f32],
        k: usize,
        checks: usize,
        distance: DistanceKind,
    ) -> Vec<(f32, u32)> {
        let mut order: Vec<(f32, usize)> = (0..self.centroids.rows())
            .map(|c| (point_distance(distance, query, self.centroids.row(c)), c))
            .collect();
        order.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(&b.1))
        });

        let budget = checks.max(k);
        let mut candidates: Vec<(f32, u32)> = Vec::new();
        for (_, c) in order {
            for &i in &self.clusters[c] {
                candidates.push((point_distance(distance, query, data.row(i as usize)), i));
            }
            if candidates.len() >= budget {
                break;
            }
        }

        candidates.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(&b.1))
        });
        candidates.truncate(k);
        candidates
    }
}
