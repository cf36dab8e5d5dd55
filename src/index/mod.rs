//! Approximate nearest-neighbor backend for descriptor matrices.
//!
//! [`NearestIndex`] owns an immutable snapshot of the indexed descriptors
//! plus one of four structures chosen by configuration: exact linear scan,
//! randomized kd-forest, coarse k-means quantizer, or multi-probe LSH.
//! Built indexes are read-only and safe to query from several threads.

pub mod distance;
mod kdtree;
mod kmeans;
mod linear;
mod lsh;

use tracing::warn;

use crate::core::{DescriptorMatrix, ElemType};
use crate::settings::{DistanceKind, IndexStrategy, NearestNeighborSettings};

use kdtree::KdForest;
use kmeans::KMeansIndex;
use lsh::LshIndex;

/// Exact k-NN of one query row against an unindexed matrix; used by the
/// vocabulary to match incoming rows against its pending buffer.
pub use linear::knn_row as linear_knn;

/// Seed for the randomized structures; fixed so rebuilds are bit-stable.
const INDEX_SEED: u64 = 0x9e3779b97f4a7c15;

/// Dense k-NN result block: `rows x k` neighbor indices and distances.
/// Missing neighbors hold index `-1` and an infinite distance.
#[derive(Debug, Clone)]
pub struct KnnResults {
    rows: usize,
    k: usize,
    indices: Vec<i32>,
    distances: Vec<f32>,
}

impl KnnResults {
    pub fn filled(rows: usize, k: usize) -> Self {
        Self {
            rows,
            k,
            indices: vec![-1; rows * k],
            distances: vec![f32::INFINITY; rows * k],
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Neighbor index of query `i` at rank `j`, or `-1`.
    pub fn index(&self, i: usize, j: usize) -> i32 {
        self.indices[i * self.k + j]
    }

    /// Distance of query `i` at rank `j`; infinite when missing.
    pub fn distance(&self, i: usize, j: usize) -> f32 {
        self.distances[i * self.k + j]
    }

    fn set_row(&mut self, i: usize, hits: &[(f32, u32)]) {
        for (j, (d, idx)) in hits.iter().take(self.k).enumerate() {
            self.indices[i * self.k + j] = *idx as i32;
            self.distances[i * self.k + j] = *d;
        }
    }
}

enum Backend {
    Linear,
    KdTree(KdForest),
    KMeans(KMeansIndex),
    Lsh(LshIndex),
}

/// A built nearest-neighbor index over one descriptor matrix.
pub struct NearestIndex {
    data: DescriptorMatrix,
    distance: DistanceKind,
    checks: usize,
    backend: Backend,
}

impl NearestIndex {
    /// Build an index over `data` with an already-resolved distance
    /// (see [`distance::resolve`]). Strategies that require float geometry
    /// degrade to LSH for binary input.
    pub fn build(data: &DescriptorMatrix, nn: &NearestNeighborSettings, dist: DistanceKind) -> Self {
        let strategy = effective_strategy(data.elem_type(), nn.index);
        let backend = match (strategy, data) {
            (IndexStrategy::Linear, _) => Backend::Linear,
            (IndexStrategy::KdTree { trees }, DescriptorMatrix::F32(m)) => {
                Backend::KdTree(KdForest::build(m, trees, INDEX_SEED))
            }
            (
                IndexStrategy::KMeans {
                    branching,
                    iterations,
                },
                DescriptorMatrix::F32(m),
            ) => Backend::KMeans(KMeansIndex::build(m, branching, iterations, dist)),
            (
                IndexStrategy::Lsh {
                    table_number,
                    key_size,
                    multi_probe_level,
                },
                DescriptorMatrix::U8(m),
            ) => Backend::Lsh(LshIndex::build(
                m,
                table_number,
                key_size,
                multi_probe_level,
                INDEX_SEED,
            )),
            // effective_strategy already aligned strategy and element type
            _ => Backend::Linear,
        };
        Self {
            data: data.clone(),
            distance: dist,
            checks: nn.search_checks,
            backend,
        }
    }

    pub fn len(&self) -> usize {
        self.data.rows()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// k-NN for every row of `queries`. Queries must share the indexed
    /// data's format; a mismatch is a programmer error.
    pub fn knn_search(&self, queries: &DescriptorMatrix, k: usize) -> KnnResults {
        assert!(
            self.data.same_format(queries),
            "query descriptors ({:?} x{}) do not match indexed data ({:?} x{})",
            queries.elem_type(),
            queries.cols(),
            self.data.elem_type(),
            self.data.cols()
        );

        let mut results = KnnResults::filled(queries.rows(), k);
        for i in 0..queries.rows() {
            let hits = match (&self.backend, queries) {
                (Backend::Linear, _) => {
                    linear::knn_row(&self.data, queries, i, self.distance, k)
                }
                (Backend::KdTree(forest), DescriptorMatrix::F32(q)) => {
                    if let DescriptorMatrix::F32(data) = &self.data {
                        forest.knn(data, q.row(i), k, self.checks, self.distance)
                    } else {
                        unreachable!("kd-forest is only built over float data")
                    }
                }
                (Backend::KMeans(km), DescriptorMatrix::F32(q)) => {
                    if let DescriptorMatrix::F32(data) = &self.data {
                        km.knn(data, q.row(i), k, self.checks, self.distance)
                    } else {
                        unreachable!("k-means index is only built over float data")
                    }
                }
                (Backend::Lsh(lsh), DescriptorMatrix::U8(q)) => {
                    if let DescriptorMatrix::U8(data) = &self.data {
                        lsh.knn(data, q.row(i), k, self.distance)
                    } else {
                        unreachable!("LSH is only built over binary data")
                    }
                }
                _ => unreachable!("backend/element type mismatch"),
            };
            results.set_row(i, &hits);
        }
        results
    }
}

/// Align the configured strategy with the element type.
fn effective_strategy(elem: ElemType, configured: IndexStrategy) -> IndexStrategy {
    match (elem, configured) {
        (ElemType::U8, IndexStrategy::KdTree { .. })
        | (ElemType::U8, IndexStrategy::KMeans { .. }) => {
            warn!(
                "index strategy {:?} needs float descriptors; using LSH for binary data",
                configured
            );
            IndexStrategy::Lsh {
                table_number: 12,
                key_size: 20,
                multi_probe_level: 2,
            }
        }
        (ElemType::F32, IndexStrategy::Lsh { .. }) => {
            warn!("LSH needs binary descriptors; using a kd-forest for float data");
            IndexStrategy::KdTree { trees: 4 }
        }
        _ => configured,
    }
}
