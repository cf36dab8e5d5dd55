//! Multi-probe locality-sensitive hashing for binary descriptors.
//!
//! Each table samples `key_size` bit positions; a query probes its own
//! bucket plus every bucket whose key differs in up to `multi_probe_level`
//! bits, then ranks the union by true Hamming distance. Bit positions are
//! drawn from a seeded generator, so construction is deterministic.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;

use crate::core::Mat;
use crate::settings::DistanceKind;

use super::distance::{hamming, hamming2};

struct LshTable {
    /// Sampled bit positions, most significant key bit first.
    bits: Vec<u32>,
    buckets: HashMap<u64, Vec<u32>>,
}

impl LshTable {
    fn key(&self, row: &[u8]) -> u64 {
        let mut key = 0u64;
        for &b in &self.bits {
            let byte = row[(b / 8) as usize];
            let bit = (byte >> (b % 8)) & 1;
            key = (key << 1) | bit as u64;
        }
        key
    }
}

pub struct LshIndex {
    tables: Vec<LshTable>,
    key_size: usize,
    multi_probe_level: usize,
}

impl LshIndex {
    pub fn build(
        data: &Mat<u8>,
        table_number: usize,
        key_size: usize,
        multi_probe_level: usize,
        seed: u64,
    ) -> Self {
        let total_bits = (data.cols() * 8) as u32;
        let key_size = key_size.clamp(1, 63).min(total_bits as usize);
        let tables = (0..table_number.max(1))
            .map(|t| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(t as u64));
                let mut bits: Vec<u32> = sample(&mut rng, total_bits as usize, key_size)
                    .into_iter()
                    .map(|b| b as u32)
                    .collect();
                bits.sort_unstable();

                let mut table = LshTable {
                    bits,
                    buckets: HashMap::new(),
                };
                for i in 0..data.rows() {
                    let key = table.key(data.row(i));
                    table.buckets.entry(key).or_default().push(i as u32);
                }
                table
            })
            .collect();
        Self {
            tables,
            key_size,
            multi_probe_level,
        }
    }

    /// Bucket-union k-NN. May return fewer than `k` hits when the probed
    /// buckets are sparse; callers pad with `-1` sentinels.
    pub fn knn(
        &self,
        data: &Mat<u8>,
        query: &[u8],
        k: usize,
        distance: DistanceKind,
    ) -> Vec<(f32, u32)> {
        let mut seen: Vec<u32> = Vec::new();
        for table in &self.tables {
            let key = table.key(query);
            probe(table, key, &mut seen);
            if self.multi_probe_level >= 1 {
                for i in 0..self.key_size {
                    let flipped = key ^ (1u64 << i);
                    probe(table, flipped, &mut seen);
                    if self.multi_probe_level >= 2 {
                        for j in (i + 1)..self.key_size {
                            probe(table, flipped ^ (1u64 << j), &mut seen);
                        }
                    }
                }
            }
        }
        seen.sort_unstable();
        seen.dedup();

        let mut candidates: Vec<(f32, u32)> = seen
            .into_iter()
            .map(|i| {
                let d = match distance {
                    DistanceKind::Hamming2 => hamming2(query, data.row(i as usize)),
                    _ => hamming(query, data.row(i as usize)),
                };
                (d as f32, i)
            })
            .collect();
        candidates.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(&b.1))
        });
        candidates.truncate(k);
        candidates
    }
}

fn probe(table: &LshTable, key: u64, out: &mut Vec<u32>) {
    if let Some(bucket) = table.buckets.get(&key) {
        out.extend_from_slice(bucket);
    }
}
