//! Registered object collection and its derived matching structures.
//!
//! Besides the signatures themselves the registry owns what the matcher
//! needs: either one concatenated descriptor matrix (keyed by 0) together
//! with `data_range` for translating global rows back to objects, or one
//! matrix per object for wave-parallel direct search.

use std::collections::BTreeMap;
use std::time::Instant;

use tracing::{error, info, warn};

use crate::core::{DescriptorMatrix, ObjectId};
use crate::features::{limit_keypoints, DescriptorExtractor, KeypointDetector};
use crate::objects::{ObjSignature, ObjectError};
use crate::settings::Settings;
use crate::vocabulary::Vocabulary;
use crate::workers::run_waves;

/// Key of the concatenated descriptor matrix; never a valid object id.
pub const CONCATENATED_KEY: ObjectId = 0;

#[derive(Default)]
pub struct ObjectRegistry {
    objects: BTreeMap<ObjectId, ObjSignature>,
    /// Concatenated matrix under [`CONCATENATED_KEY`], or per-object
    /// matrices, depending on the search mode and thread count.
    objects_descriptors: BTreeMap<ObjectId, DescriptorMatrix>,
    /// Last global descriptor row of each object, ascending. Lower-bound
    /// lookup recovers the owning object of a global row.
    data_range: BTreeMap<usize, ObjectId>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a signature with an already-resolved id.
    pub fn insert(&mut self, signature: ObjSignature) -> Result<(), ObjectError> {
        let id = signature.id();
        if id == 0 {
            return Err(ObjectError::InvalidId(id));
        }
        if self.objects.contains_key(&id) {
            return Err(ObjectError::DuplicateId(id));
        }
        self.objects.insert(id, signature);
        Ok(())
    }

    pub fn remove(&mut self, id: ObjectId) -> Option<ObjSignature> {
        self.objects.remove(&id)
    }

    pub fn clear(&mut self) {
        self.objects.clear();
        self.clear_derived();
    }

    /// Drop the derived matrices; called whenever the object set or the
    /// vocabulary becomes stale.
    pub fn clear_derived(&mut self) {
        self.objects_descriptors.clear();
        self.data_range.clear();
    }

    pub fn get(&self, id: ObjectId) -> Option<&ObjSignature> {
        self.objects.get(&id)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Signatures in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &ObjSignature> {
        self.objects.values()
    }

    pub fn ids(&self) -> Vec<ObjectId> {
        self.objects.keys().copied().collect()
    }

    pub fn descriptor_matrices(&self) -> &BTreeMap<ObjectId, DescriptorMatrix> {
        &self.objects_descriptors
    }

    /// The concatenated matrix, when `update_vocabulary` built one.
    pub fn concatenated_descriptors(&self) -> Option<&DescriptorMatrix> {
        self.objects_descriptors.get(&CONCATENATED_KEY)
    }

    /// Translate a global descriptor row to `(object_id, local_row)`.
    pub fn object_for_row(&self, row: usize) -> Option<(ObjectId, usize)> {
        let (&last_row, &object_id) = self.data_range.range(row..).next()?;
        let first_row = self
            .data_range
            .range(..last_row)
            .next_back()
            .map(|(&prev, _)| prev + 1)
            .unwrap_or(0);
        Some((object_id, row - first_row))
    }

    /// Extract keypoints and descriptors for every registered object,
    /// one worker per object per wave.
    pub fn update_objects(
        &mut self,
        detector: &dyn KeypointDetector,
        extractor: &dyn DescriptorExtractor,
        settings: &Settings,
    ) {
        if self.objects.is_empty() {
            info!("no objects to update");
            return;
        }

        let start = Instant::now();
        info!("extracting features from {} objects", self.objects.len());

        let max_features = settings.feature2d.max_features;
        let extracted = {
            let tasks: Vec<(ObjectId, &image::GrayImage)> = self
                .objects
                .iter()
                .map(|(id, sig)| (*id, sig.image()))
                .collect();
            run_waves(tasks, settings.general.threads, |(id, img)| {
                let local = Instant::now();
                let mut keypoints = detector.detect(img);
                if keypoints.is_empty() {
                    warn!("no features detected in object {id}");
                    return (id, Vec::new(), DescriptorMatrix::empty());
                }
                let before = keypoints.len();
                keypoints = limit_keypoints(keypoints, max_features);
                if keypoints.len() < before {
                    info!(
                        "object {id}: {} keypoints removed, kept {}",
                        before - keypoints.len(),
                        keypoints.len()
                    );
                }
                let (keypoints, descriptors) = extractor.compute(img, keypoints);
                if keypoints.len() != descriptors.rows() {
                    error!(
                        "object {id}: {} keypoints vs {} descriptors",
                        keypoints.len(),
                        descriptors.rows()
                    );
                }
                info!(
                    "object {id}: {} descriptors extracted in {:?}",
                    descriptors.rows(),
                    local.elapsed()
                );
                (id, keypoints, descriptors)
            })
        };

        for (id, keypoints, descriptors) in extracted {
            if let Some(sig) = self.objects.get_mut(&id) {
                sig.set_data(keypoints, descriptors);
            }
        }
        info!(
            "feature extraction done for {} objects in {:?}",
            self.objects.len(),
            start.elapsed()
        );
    }

    /// Rebuild the derived descriptor matrices and, in inverted mode,
    /// repopulate the vocabulary and each signature's word table.
    pub fn update_vocabulary(&mut self, vocabulary: &mut Vocabulary, settings: &Settings) {
        self.clear_derived();
        vocabulary.clear();

        // verify uniform descriptor format across all objects
        let mut format: Option<&DescriptorMatrix> = None;
        let mut count = 0usize;
        for sig in self.objects.values() {
            if sig.descriptors().is_empty() {
                continue;
            }
            if let Some(reference) = format {
                if !reference.same_format(sig.descriptors()) {
                    error!(
                        "objects do not share one descriptor format; all objects \
                         must come from the same descriptor extractor"
                    );
                    return;
                }
            }
            format = Some(sig.descriptors());
            count += sig.descriptors().rows();
        }
        if count == 0 {
            return;
        }

        info!(
            "updating global descriptor matrix: objects={}, descriptors={}, dim={}",
            self.objects.len(),
            count,
            format.map(|f| f.cols()).unwrap_or(0)
        );

        if settings.general.inverted_search || settings.general.threads == 1 {
            let mut concatenated = DescriptorMatrix::empty();
            concatenated.reserve_rows(count);
            let mut row = 0usize;
            for (id, sig) in &self.objects {
                if sig.descriptors().rows() == 0 {
                    continue;
                }
                concatenated.append(sig.descriptors());
                row += sig.descriptors().rows();
                self.data_range.insert(row - 1, *id);
            }
            self.objects_descriptors
                .insert(CONCATENATED_KEY, concatenated);

            if settings.general.inverted_search {
                self.populate_vocabulary(vocabulary, settings);
            }
        } else {
            for (id, sig) in &self.objects {
                self.objects_descriptors.insert(*id, sig.descriptors().clone());
            }
        }
    }

    fn populate_vocabulary(&mut self, vocabulary: &mut Vocabulary, settings: &Settings) {
        let start = Instant::now();
        let incremental = settings.general.vocabulary_incremental;
        info!(incremental, "creating vocabulary");

        let min_words = settings.general.vocabulary_update_min_words;
        let mut added_words = 0usize;
        let ids = self.ids();
        for id in ids {
            let Some(sig) = self.objects.get_mut(&id) else {
                continue;
            };
            let words = vocabulary.add_words(sig.descriptors(), Some(id), incremental, settings);
            added_words += words.num_keys();
            let descriptor_count = sig.descriptors().rows();
            let word_count = words.num_keys();
            sig.set_words(words);

            let mut updated = false;
            if incremental && added_words > 0 && added_words >= min_words {
                vocabulary.update(settings);
                added_words = 0;
                updated = true;
            }
            info!(
                "object {id}: {word_count} words from {descriptor_count} descriptors \
                 (vocabulary={}{})",
                vocabulary.size(),
                if updated { ", updated" } else { "" }
            );
        }
        if added_words > 0 {
            vocabulary.update(settings);
        }

        info!(
            "vocabulary created: size={} in {:?}",
            vocabulary.size(),
            start.elapsed()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Mat;
    use crate::settings::IndexStrategy;
    use image::GrayImage;

    fn sig_with_descriptors(id: ObjectId, rows: usize, offset: f32) -> ObjSignature {
        let mut sig = ObjSignature::new(id, GrayImage::new(8, 8), format!("{id}.png"));
        let mut m = Mat::new(4);
        for r in 0..rows {
            m.push_row(&[offset + r as f32 * 100.0, 0.0, 0.0, 0.0]);
        }
        sig.set_data(
            vec![crate::core::KeyPoint::new(0.0, 0.0, 1.0, 1.0); rows],
            DescriptorMatrix::F32(m),
        );
        sig
    }

    fn linear_settings() -> Settings {
        let mut s = Settings::default();
        s.nearest_neighbor.index = IndexStrategy::Linear;
        s
    }

    #[test]
    fn duplicate_and_zero_ids_rejected() {
        let mut reg = ObjectRegistry::new();
        reg.insert(ObjSignature::new(5, GrayImage::new(4, 4), "5.png"))
            .unwrap();
        assert!(matches!(
            reg.insert(ObjSignature::new(5, GrayImage::new(4, 4), "dup.png")),
            Err(ObjectError::DuplicateId(5))
        ));
        assert!(matches!(
            reg.insert(ObjSignature::new(0, GrayImage::new(4, 4), "zero.png")),
            Err(ObjectError::InvalidId(0))
        ));
    }

    #[test]
    fn data_range_lower_bound_recovers_objects() {
        let mut reg = ObjectRegistry::new();
        reg.insert(sig_with_descriptors(2, 3, 0.0)).unwrap();
        reg.insert(sig_with_descriptors(7, 2, 1000.0)).unwrap();

        let mut voc = Vocabulary::new();
        let settings = linear_settings();
        reg.update_vocabulary(&mut voc, &settings);

        // rows 0..3 belong to object 2, rows 3..5 to object 7
        assert_eq!(reg.object_for_row(0), Some((2, 0)));
        assert_eq!(reg.object_for_row(2), Some((2, 2)));
        assert_eq!(reg.object_for_row(3), Some((7, 0)));
        assert_eq!(reg.object_for_row(4), Some((7, 1)));
        assert_eq!(reg.object_for_row(5), None);
    }

    #[test]
    fn inverted_mode_populates_vocabulary_and_word_tables() {
        let mut reg = ObjectRegistry::new();
        reg.insert(sig_with_descriptors(1, 2, 0.0)).unwrap();
        reg.insert(sig_with_descriptors(3, 2, 1000.0)).unwrap();

        let mut voc = Vocabulary::new();
        let settings = linear_settings();
        reg.update_vocabulary(&mut voc, &settings);

        assert_eq!(voc.size(), 4);
        assert_eq!(reg.get(1).unwrap().words().len(), 2);
        assert_eq!(reg.get(3).unwrap().words().len(), 2);
        // each object's words point at that object
        assert_eq!(voc.word_to_objects().get(&0), &[1]);
        assert_eq!(voc.word_to_objects().get(&2), &[3]);
        assert!(reg.concatenated_descriptors().is_some());
    }

    #[test]
    fn direct_multithread_keeps_per_object_matrices() {
        let mut reg = ObjectRegistry::new();
        reg.insert(sig_with_descriptors(1, 2, 0.0)).unwrap();
        reg.insert(sig_with_descriptors(3, 1, 1000.0)).unwrap();

        let mut voc = Vocabulary::new();
        let mut settings = linear_settings();
        settings.general.inverted_search = false;
        settings.general.threads = 4;
        reg.update_vocabulary(&mut voc, &settings);

        assert!(voc.is_empty());
        assert!(reg.concatenated_descriptors().is_none());
        assert_eq!(reg.descriptor_matrices().len(), 2);
        assert_eq!(reg.descriptor_matrices()[&1].rows(), 2);
        assert_eq!(reg.descriptor_matrices()[&3].rows(), 1);
    }

    #[test]
    fn mixed_formats_leave_registry_unusable() {
        let mut reg = ObjectRegistry::new();
        reg.insert(sig_with_descriptors(1, 2, 0.0)).unwrap();

        let mut binary = ObjSignature::new(2, GrayImage::new(8, 8), "2.png");
        let mut m = Mat::new(4);
        m.push_row(&[1u8, 2, 3, 4]);
        binary.set_data(
            vec![crate::core::KeyPoint::new(0.0, 0.0, 1.0, 1.0)],
            DescriptorMatrix::U8(m),
        );
        reg.insert(binary).unwrap();

        let mut voc = Vocabulary::new();
        let settings = linear_settings();
        reg.update_vocabulary(&mut voc, &settings);

        assert!(voc.is_empty());
        assert!(reg.descriptor_matrices().is_empty());
    }
}
