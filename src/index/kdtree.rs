//! Randomized kd-forest over float descriptors.
//!
//! Each tree splits at the median of a dimension drawn from the highest
//! spread dimensions, so the trees decorrelate while staying deterministic
//! under a fixed seed. Search descends to the query's leaf and backtracks
//! until the per-tree check budget is spent.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::core::Mat;
use crate::settings::DistanceKind;

use super::distance::{l1, l2_sq};

const LEAF_SIZE: usize = 8;
/// Split dimension is drawn among this many top-spread dimensions.
const SPREAD_CANDIDATES: usize = 5;

enum KdNode {
    Leaf(Vec<u32>),
    Split {
        dim: usize,
        value: f32,
        left: usize,
        right: usize,
    },
}

struct KdTree {
    nodes: Vec<KdNode>,
    root: usize,
}

pub struct KdForest {
    trees: Vec<KdTree>,
}

impl KdForest {
    pub fn build(data: &Mat<f32>, trees: usize, seed: u64) -> Self {
        let trees = trees.max(1);
        let built = (0..trees)
            .map(|t| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(t as u64));
                let indices: Vec<u32> = (0..data.rows() as u32).collect();
                let mut tree = KdTree {
                    nodes: Vec::new(),
                    root: 0,
                };
                tree.root = build_node(data, &indices, &mut tree.nodes, &mut rng);
                tree
            })
            .collect();
        Self { trees: built }
    }

    /// Approximate k-NN: each tree spends `checks` point evaluations, then
    /// the per-tree candidates merge, deduplicate, and rank ascending.
    pub fn knn(
        &self,
        data: &Mat<f32>,
        query: &[f32],
        k: usize,
        checks: usize,
        distance: DistanceKind,
    ) -> Vec<(f32, u32)> {
        let budget = checks.max(k).max(LEAF_SIZE);
        let mut candidates: Vec<(f32, u32)> = Vec::new();
        for tree in &self.trees {
            let mut checked = 0usize;
            visit(
                tree,
                tree.root,
                data,
                query,
                distance,
                budget,
                &mut checked,
                &mut candidates,
            );
        }

        candidates.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(&b.1))
        });
        candidates.dedup_by_key(|c| c.1);
        candidates.truncate(k);
        candidates
    }
}

fn point_distance(distance: DistanceKind, a: &[f32], b: &[f32]) -> f32 {
    match distance {
        DistanceKind::L1 => l1(a, b),
        _ => l2_sq(a, b),
    }
}

fn build_node(
    data: &Mat<f32>,
    indices: &[u32],
    nodes: &mut Vec<KdNode>,
    rng: &mut StdRng,
) -> usize {
    if indices.len() <= LEAF_SIZE {
        nodes.push(KdNode::Leaf(indices.to_vec()));
        return nodes.len() - 1;
    }

    let dim = pick_split_dim(data, indices, rng);
    let mut values: Vec<f32> = indices.iter().map(|&i| data.row(i as usize)[dim]).collect();
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let value = values[values.len() / 2];

    let mut left: Vec<u32> = Vec::new();
    let mut right: Vec<u32> = Vec::new();
    for &i in indices.iter() {
        if data.row(i as usize)[dim] < value {
            left.push(i);
        } else {
            right.push(i);
        }
    }
    // Degenerate split (many equal values): fall back to a leaf.
    if left.is_empty() || right.is_empty() {
        nodes.push(KdNode::Leaf(indices.to_vec()));
        return nodes.len() - 1;
    }

    let left_id = build_node(data, &left, nodes, rng);
    let right_id = build_node(data, &right, nodes, rng);
    nodes.push(KdNode::Split {
        dim,
        value,
        left: left_id,
        right: right_id,
    });
    nodes.len() - 1
}

fn pick_split_dim(data: &Mat<f32>, indices: &[u32], rng: &mut StdRng) -> usize {
    let cols = data.cols();
    let mut spreads: Vec<(f32, usize)> = (0..cols)
        .map(|d| {
            let mut lo = f32::INFINITY;
            let mut hi = f32::NEG_INFINITY;
            for &i in indices {
                let v = data.row(i as usize)[d];
                lo = lo.min(v);
                hi = hi.max(v);
            }
            (hi - lo, d)
        })
        .collect();
    spreads.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.cmp(&b.1))
    });
    let top = spreads.len().min(SPREAD_CANDIDATES);
    spreads[rng.gen_range(0..top)].1
}

#[allow(clippy::too_many_arguments)]
fn visit(
    tree: &KdTree,
    id: usize,
    data: &Mat<f32>,
    query: &[f32],
    distance: DistanceKind,
    budget: usize,
    checked: &mut usize,
    out: &mut Vec<(f32, u32)>,
) {
    match &tree.nodes[id] {
        KdNode::Leaf(points) => {
            for &p in points {
                out.push((
                    point_distance(distance, query, data.row(p as usize)),
                    p,
                ));
            }
            *checked += points.len();
        }
        KdNode::Split {
            dim,
            value,
            left,
            right,
        } => {
            let (near, far) = if query[*dim] < *value {
                (*left, *right)
            } else {
                (*right, *left)
            };
            visit(tree, near, data, query, distance, budget, checked, out);
            if *checked < budget {
                visit(tree, far, data, query, distance, budget, checked, out);
            }
        }
    }
}
