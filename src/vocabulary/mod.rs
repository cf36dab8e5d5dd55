//! Incremental visual vocabulary.
//!
//! Words are stored descriptor rows acting as cluster representatives; a
//! word's identifier is its insertion index. New rows accumulate in a
//! pending buffer and only enter the ANN index on [`Vocabulary::update`],
//! so registration can batch many objects between expensive rebuilds.
//!
//! In incremental mode a new row is first matched against both the built
//! index and the pending buffer; if the two nearest candidates pass the
//! NNDR test the row collapses onto the existing word, otherwise it
//! becomes a fresh word. This deduplicates near-identical descriptors
//! across objects.

use tracing::debug;

use crate::core::{DescriptorMatrix, MultiMap, ObjectId, WordId};
use crate::index::distance;
use crate::index::{KnnResults, NearestIndex};
use crate::settings::Settings;

/// Neighbors consulted when deduplicating an incoming row.
const DEDUP_K: usize = 2;

#[derive(Default)]
pub struct Vocabulary {
    /// Rows already inserted into the built ANN index.
    indexed: DescriptorMatrix,
    /// Rows appended since the last `update()`.
    not_indexed: DescriptorMatrix,
    /// Word id of each pending row.
    not_indexed_word_ids: Vec<WordId>,
    /// Which objects witness each word. Empty for scene-built vocabularies.
    word_to_objects: MultiMap<WordId, ObjectId>,
    index: Option<NearestIndex>,
}

impl Vocabulary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard all words and the built index.
    pub fn clear(&mut self) {
        self.indexed.clear();
        self.not_indexed.clear();
        self.not_indexed_word_ids.clear();
        self.word_to_objects.clear();
        self.index = None;
    }

    /// Total number of words, indexed and pending.
    pub fn size(&self) -> usize {
        self.indexed.rows() + self.not_indexed.rows()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn word_to_objects(&self) -> &MultiMap<WordId, ObjectId> {
        &self.word_to_objects
    }

    /// Add descriptor rows as words.
    ///
    /// Returns the mapping from word id to input row index, so the caller
    /// can build the object's word table. `object` is `None` when the rows
    /// come from a scene (direct search); those words are not recorded in
    /// `word_to_objects`.
    ///
    /// With `incremental` set, each row is matched against the existing
    /// vocabulary under the NNDR test and only unmatched rows create new
    /// words; otherwise every row becomes a word.
    pub fn add_words(
        &mut self,
        descriptors: &DescriptorMatrix,
        object: Option<ObjectId>,
        incremental: bool,
        settings: &Settings,
    ) -> MultiMap<WordId, u32> {
        let mut words = MultiMap::new();
        if descriptors.is_empty() {
            return words;
        }

        if incremental {
            self.add_words_incremental(descriptors, object, settings, &mut words);
        } else {
            let base = self.size() as WordId;
            for i in 0..descriptors.rows() as u32 {
                let word_id = base + i;
                words.insert(word_id, i);
                if let Some(obj) = object {
                    self.word_to_objects.insert(word_id, obj);
                }
                self.not_indexed_word_ids.push(word_id);
            }
            self.not_indexed.append(descriptors);
        }

        words
    }

    fn add_words_incremental(
        &mut self,
        descriptors: &DescriptorMatrix,
        object: Option<ObjectId>,
        settings: &Settings,
        words: &mut MultiMap<WordId, u32>,
    ) {
        // One batch query against the built index; rows created during
        // this call only live in the pending buffer and are reached by
        // the linear pass below.
        let global: Option<KnnResults> = match &self.index {
            Some(index) if self.indexed.rows() >= DEDUP_K => {
                Some(index.knn_search(descriptors, DEDUP_K))
            }
            _ => None,
        };

        let local_distance = distance::resolve(
            descriptors.elem_type(),
            settings.nearest_neighbor.distance,
            settings.feature2d.orb_wta_k,
        );
        let ratio = settings.nearest_neighbor.nndr_ratio;

        self.not_indexed_word_ids.reserve(descriptors.rows());
        self.not_indexed.reserve_rows(descriptors.rows());

        for i in 0..descriptors.rows() {
            // Nearest candidates ordered by distance, pending rows first.
            let mut candidates: Vec<(f32, WordId)> = Vec::new();

            if self.not_indexed.rows() > 0 {
                assert!(
                    self.not_indexed.same_format(descriptors),
                    "descriptor format changed between add_words calls"
                );
                let k = if self.not_indexed.rows() >= DEDUP_K {
                    DEDUP_K
                } else {
                    1
                };
                for (d, row) in
                    crate::index::linear_knn(&self.not_indexed, descriptors, i, local_distance, k)
                {
                    candidates.push((d, self.not_indexed_word_ids[row as usize]));
                }
            }

            if let Some(results) = &global {
                for j in 0..DEDUP_K {
                    let idx = results.index(i, j);
                    if idx >= 0 {
                        candidates.push((results.distance(i, j), idx as WordId));
                    }
                }
            }

            candidates
                .sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

            let matched = candidates.len() >= 2 && candidates[0].0 <= ratio * candidates[1].0;

            if matched {
                let word_id = candidates[0].1;
                words.insert(word_id, i as u32);
                if let Some(obj) = object {
                    self.word_to_objects.insert(word_id, obj);
                }
            } else {
                let word_id = self.size() as WordId;
                self.not_indexed_word_ids.push(word_id);
                self.not_indexed.push_row_from(descriptors, i);
                words.insert(word_id, i as u32);
                if let Some(obj) = object {
                    self.word_to_objects.insert(word_id, obj);
                }
            }
        }
    }

    /// Fold pending rows into the indexed set and rebuild the ANN index.
    /// After this call `search` is legal.
    pub fn update(&mut self, settings: &Settings) {
        if !self.not_indexed.is_empty() {
            self.indexed.append(&self.not_indexed);
            self.not_indexed.clear();
            self.not_indexed_word_ids.clear();
        }

        if !self.indexed.is_empty() {
            let dist = distance::resolve(
                self.indexed.elem_type(),
                settings.nearest_neighbor.distance,
                settings.feature2d.orb_wta_k,
            );
            self.index = Some(NearestIndex::build(
                &self.indexed,
                &settings.nearest_neighbor,
                dist,
            ));
            debug!(words = self.indexed.rows(), "vocabulary index rebuilt");
        }
    }

    /// k-NN over the indexed words. Requires all pending rows folded in;
    /// searching with pending rows is a programmer error.
    pub fn search(&self, queries: &DescriptorMatrix, k: usize) -> KnnResults {
        assert!(
            self.not_indexed.is_empty() && self.not_indexed_word_ids.is_empty(),
            "vocabulary has pending words; call update() before search()"
        );
        match &self.index {
            Some(index) => index.knn_search(queries, k),
            None => KnnResults::filled(queries.rows(), k),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Mat, MultiMap};
    use crate::settings::{IndexStrategy, Settings};

    fn linear_settings() -> Settings {
        let mut s = Settings::default();
        s.nearest_neighbor.index = IndexStrategy::Linear;
        s
    }

    fn float_mat(rows: &[&[f32]]) -> DescriptorMatrix {
        DescriptorMatrix::F32(Mat::from_rows(rows))
    }

    fn orthogonal_rows(n: usize, dim: usize) -> DescriptorMatrix {
        assert!(n <= dim);
        let mut m = Mat::new(dim);
        for i in 0..n {
            let mut row = vec![0.0f32; dim];
            row[i] = 10.0;
            m.push_row(&row);
        }
        DescriptorMatrix::F32(m)
    }

    #[test]
    fn bulk_add_assigns_dense_ids() {
        let settings = linear_settings();
        let mut voc = Vocabulary::new();
        let x = float_mat(&[&[0.0, 0.0], &[1.0, 0.0], &[2.0, 0.0]]);

        let words = voc.add_words(&x, Some(7), false, &settings);
        assert_eq!(voc.size(), 3);
        let ids: Vec<u32> = words.keys().copied().collect();
        assert_eq!(ids, vec![0, 1, 2]);
        for (word, row) in words.iter() {
            assert!((*word as usize) < voc.size());
            assert_eq!(*word, *row); // first batch: id == row
        }

        // a second batch continues the id sequence
        let words2 = voc.add_words(&x, Some(8), false, &settings);
        assert_eq!(voc.size(), 6);
        assert_eq!(words2.keys().copied().collect::<Vec<_>>(), vec![3, 4, 5]);
    }

    #[test]
    fn word_to_objects_records_creator() {
        let settings = linear_settings();
        let mut voc = Vocabulary::new();
        let x = float_mat(&[&[0.0, 1.0], &[5.0, 5.0]]);
        voc.add_words(&x, Some(3), false, &settings);
        assert_eq!(voc.word_to_objects().get(&0), &[3]);
        assert_eq!(voc.word_to_objects().get(&1), &[3]);
    }

    #[test]
    fn scene_words_leave_object_table_empty() {
        let settings = linear_settings();
        let mut voc = Vocabulary::new();
        let x = float_mat(&[&[0.0, 1.0], &[5.0, 5.0]]);
        voc.add_words(&x, None, false, &settings);
        assert!(voc.word_to_objects().is_empty());
        assert_eq!(voc.size(), 2);
    }

    #[test]
    fn update_then_self_search_is_exact() {
        let settings = linear_settings();
        let mut voc = Vocabulary::new();
        let x = orthogonal_rows(6, 8);
        voc.add_words(&x, Some(1), false, &settings);
        voc.update(&settings);

        let results = voc.search(&x, 1);
        for i in 0..x.rows() {
            assert_eq!(results.index(i, 0), i as i32);
            assert_eq!(results.distance(i, 0), 0.0);
        }
    }

    #[test]
    #[should_panic(expected = "pending words")]
    fn search_with_pending_rows_panics() {
        let settings = linear_settings();
        let mut voc = Vocabulary::new();
        let x = float_mat(&[&[0.0, 1.0]]);
        voc.add_words(&x, Some(1), false, &settings);
        voc.search(&x, 1);
    }

    #[test]
    fn oversized_k_pads_with_sentinels() {
        let settings = linear_settings();
        let mut voc = Vocabulary::new();
        let x = float_mat(&[&[0.0, 1.0], &[9.0, 9.0]]);
        voc.add_words(&x, Some(1), false, &settings);
        voc.update(&settings);

        let results = voc.search(&x, 5);
        for j in 2..5 {
            assert_eq!(results.index(0, j), -1);
            assert!(results.distance(0, j).is_infinite());
        }
    }

    #[test]
    fn incremental_readd_does_not_grow() {
        let mut settings = linear_settings();
        settings.nearest_neighbor.nndr_ratio = 0.8;
        let mut voc = Vocabulary::new();
        let x = orthogonal_rows(8, 8);

        voc.add_words(&x, Some(1), true, &settings);
        let first = voc.size();
        assert_eq!(first, 8);

        voc.add_words(&x, Some(2), true, &settings);
        assert_eq!(voc.size(), first);

        // the duplicate batch re-witnessed every word for object 2
        for w in 0..first as u32 {
            assert_eq!(voc.word_to_objects().count_pair(&w, &2), 1);
        }
    }

    #[test]
    fn incremental_dedup_spans_update() {
        let mut settings = linear_settings();
        settings.nearest_neighbor.nndr_ratio = 0.8;
        let mut voc = Vocabulary::new();
        let x = orthogonal_rows(8, 8);

        voc.add_words(&x, Some(1), true, &settings);
        voc.update(&settings);
        // now the duplicates are found through the built index
        voc.add_words(&x, Some(2), true, &settings);
        assert_eq!(voc.size(), 8);
    }

    #[test]
    fn incremental_orthogonal_batches_all_become_words() {
        let mut settings = linear_settings();
        settings.nearest_neighbor.nndr_ratio = 0.8;
        let mut voc = Vocabulary::new();

        let a = orthogonal_rows(8, 16);
        let mut b = Mat::new(16);
        for i in 0..8 {
            let mut row = vec![0.0f32; 16];
            row[8 + i] = 50.0;
            b.push_row(&row);
        }
        let b = DescriptorMatrix::F32(b);

        voc.add_words(&a, Some(1), true, &settings);
        voc.update(&settings);
        voc.add_words(&b, Some(2), true, &settings);
        assert_eq!(voc.size(), 16);
    }

    #[test]
    fn size_invariant_holds_across_operations() {
        let settings = linear_settings();
        let mut voc = Vocabulary::new();
        let x = orthogonal_rows(5, 8);

        voc.add_words(&x, Some(1), false, &settings);
        assert_eq!(voc.size(), 5);
        voc.update(&settings);
        assert_eq!(voc.size(), 5);

        let returned: MultiMap<u32, u32> = voc.add_words(&x, Some(2), false, &settings);
        assert_eq!(voc.size(), 10);
        for (word, _) in returned.iter() {
            assert!((*word as usize) < voc.size());
        }

        voc.clear();
        assert_eq!(voc.size(), 0);
        assert!(voc.word_to_objects().is_empty());
    }
}
