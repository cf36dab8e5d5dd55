//! Descriptor distance metrics.
//!
//! Binary rows use Hamming variants; float rows use L1 or squared L2.
//! Integer distances are widened to `f32` so downstream acceptance tests
//! handle both families uniformly.

use crate::core::{ElemType, RowRef};
use crate::settings::DistanceKind;

/// Bit-level Hamming distance.
#[inline]
pub fn hamming(a: &[u8], b: &[u8]) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x ^ y).count_ones())
        .sum()
}

/// Hamming distance over 2-bit cells, for descriptors produced with
/// `WTA_K` 3 or 4 where each cell encodes a 4-way comparison.
#[inline]
pub fn hamming2(a: &[u8], b: &[u8]) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x ^ y;
            // mark each differing 2-bit cell once
            (((d >> 1) | d) & 0x55).count_ones()
        })
        .sum()
}

#[inline]
pub fn l1(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum()
}

#[inline]
pub fn l2_sq(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Distance between two rows of the same element type.
pub fn row_distance(kind: DistanceKind, a: RowRef<'_>, b: RowRef<'_>) -> f32 {
    match (a, b) {
        (RowRef::U8(a), RowRef::U8(b)) => match kind {
            DistanceKind::Hamming2 => hamming2(a, b) as f32,
            _ => hamming(a, b) as f32,
        },
        (RowRef::F32(a), RowRef::F32(b)) => match kind {
            DistanceKind::L1 => l1(a, b),
            _ => l2_sq(a, b),
        },
        _ => panic!("descriptor element type mismatch in distance computation"),
    }
}

/// Effective distance for an element type: binary descriptors force a
/// Hamming variant (`Hamming2` when the generator's `WTA_K` is 3 or 4).
pub fn resolve(elem: ElemType, configured: DistanceKind, orb_wta_k: u32) -> DistanceKind {
    match elem {
        ElemType::U8 => {
            if configured == DistanceKind::Hamming2 || orb_wta_k == 3 || orb_wta_k == 4 {
                DistanceKind::Hamming2
            } else {
                DistanceKind::Hamming
            }
        }
        ElemType::F32 => match configured {
            DistanceKind::L1 => DistanceKind::L1,
            _ => DistanceKind::L2,
        },
    }
}
