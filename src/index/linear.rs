//! Exact brute-force scan.

use crate::core::DescriptorMatrix;
use crate::settings::DistanceKind;

use super::distance::row_distance;

/// Scan every row of `data` and return the `k` nearest to `query`,
/// ascending by distance with row-index tie-break.
pub fn knn_row(
    data: &DescriptorMatrix,
    query: &DescriptorMatrix,
    query_row: usize,
    distance: DistanceKind,
    k: usize,
) -> Vec<(f32, u32)> {
    let q = query.row(query_row);
    let mut scored: Vec<(f32, u32)> = (0..data.rows())
        .map(|i| (row_distance(distance, q, data.row(i)), i as u32))
        .collect();
    scored.sort_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.cmp(&b.1))
    });
    scored.truncate(k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DescriptorMatrix, Mat};

    fn float_mat(rows: &[&[f32]]) -> DescriptorMatrix {
        DescriptorMatrix::F32(Mat::from_rows(rows))
    }

    #[test]
    fn nearest_first_with_tie_break() {
        let data = float_mat(&[&[0.0, 0.0], &[1.0, 0.0], &[0.0, 0.0]]);
        let query = float_mat(&[&[0.0, 0.0]]);

        let hits = knn_row(&data, &query, 0, DistanceKind::L2, 3);
        assert_eq!(hits.len(), 3);
        // exact duplicates rank by row index
        assert_eq!(hits[0], (0.0, 0));
        assert_eq!(hits[1], (0.0, 2));
        assert_eq!(hits[2], (1.0, 1));
    }

    #[test]
    fn truncates_to_k() {
        let data = float_mat(&[&[0.0], &[1.0], &[2.0]]);
        let query = float_mat(&[&[0.0]]);
        assert_eq!(knn_row(&data, &query, 0, DistanceKind::L2, 2).len(), 2);
    }
}
