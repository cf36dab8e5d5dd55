//! Detection engine: object registration, vocabulary lifecycle, and the
//! detect pipeline.
//!
//! [`FindObject`] owns the injected detector/extractor pair, the object
//! registry, and the vocabulary. Registration invalidates the vocabulary;
//! callers rebuild it with [`FindObject::update_objects`] followed by
//! [`FindObject::update_vocabulary`] before detecting. The vocabulary
//! sits behind a `RwLock` because direct-mode detection rebuilds it per
//! frame while the engine is otherwise shared read-only.

mod homography_stage;

use std::path::Path;
use std::time::Instant;

use crossbeam_channel::{unbounded, Receiver, Sender};
use image::{DynamicImage, GrayImage};
use parking_lot::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::core::ObjectId;
use crate::detection::{DetectionInfo, MatchTable};
use crate::features::{limit_keypoints, DescriptorExtractor, KeypointDetector};
use crate::matching::{self, SceneWords};
use crate::objects::{ObjSignature, ObjectError, ObjectRegistry};
use crate::settings::Settings;
use crate::vocabulary::Vocabulary;

pub struct FindObject {
    settings: Settings,
    detector: Box<dyn KeypointDetector>,
    extractor: Box<dyn DescriptorExtractor>,
    registry: ObjectRegistry,
    vocabulary: RwLock<Vocabulary>,
    sinks: Mutex<Vec<Sender<DetectionInfo>>>,
}

impl FindObject {
    pub fn new(
        settings: Settings,
        detector: Box<dyn KeypointDetector>,
        extractor: Box<dyn DescriptorExtractor>,
    ) -> Self {
        Self {
            settings,
            detector,
            extractor,
            registry: ObjectRegistry::new(),
            vocabulary: RwLock::new(Vocabulary::new()),
            sinks: Mutex::new(Vec::new()),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Replace the settings bundle. Derived matching state becomes stale
    /// and is dropped.
    pub fn set_settings(&mut self, settings: Settings) {
        self.settings = settings;
        self.clear_vocabulary_state();
    }

    /// Swap the feature operators; extracted data and the vocabulary are
    /// dropped with them.
    pub fn set_operators(
        &mut self,
        detector: Box<dyn KeypointDetector>,
        extractor: Box<dyn DescriptorExtractor>,
    ) {
        self.detector = detector;
        self.extractor = extractor;
        self.clear_vocabulary_state();
    }

    pub fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    pub fn object(&self, id: ObjectId) -> Option<&ObjSignature> {
        self.registry.get(id)
    }

    /// Register a reference image.
    ///
    /// With `id == 0` the monotonic generator assigns the next free id;
    /// an explicit id must be unused. Registration invalidates the
    /// vocabulary.
    pub fn add_object(
        &mut self,
        image: GrayImage,
        id: ObjectId,
        filename: impl Into<String>,
    ) -> Result<ObjectId, ObjectError> {
        if id != 0 && self.registry.contains(id) {
            error!("object with id {id} already added");
            return Err(ObjectError::DuplicateId(id));
        }
        let resolved = if id == 0 {
            let mut next = self.settings.general.next_obj_id.max(1);
            while self.registry.contains(next) {
                next += 1;
            }
            next
        } else {
            id
        };

        self.registry
            .insert(ObjSignature::new(resolved, image, filename))?;
        self.settings.general.next_obj_id = resolved + 1;
        self.clear_vocabulary_state();
        Ok(resolved)
    }

    /// Load a reference image from disk, taking the object id from the
    /// numeric filename prefix when it is parseable and free.
    pub fn add_object_from_file(&mut self, path: &Path) -> Result<ObjectId, ObjectError> {
        info!("loading object file {}", path.display());
        let image = image::open(path)
            .map_err(|e| ObjectError::InvalidImage(format!("{}: {e}", path.display())))?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();

        let mut id = 0;
        if let Some(prefix) = filename.split('.').next() {
            if let Ok(parsed) = prefix.parse::<ObjectId>() {
                if parsed > 0 {
                    if self.registry.contains(parsed) {
                        warn!(
                            "object {parsed} already added, a new id will be generated \
                             (next id: {})",
                            self.settings.general.next_obj_id
                        );
                    } else {
                        id = parsed;
                    }
                }
            }
        }
        self.add_object(image.to_luma8(), id, filename)
    }

    pub fn remove_object(&mut self, id: ObjectId) -> Option<ObjSignature> {
        let removed = self.registry.remove(id);
        if removed.is_some() {
            self.clear_vocabulary_state();
        }
        removed
    }

    pub fn remove_all_objects(&mut self) {
        self.registry.clear();
        self.clear_vocabulary_state();
    }

    /// Extract keypoints and descriptors for every registered object.
    pub fn update_objects(&mut self) {
        self.registry
            .update_objects(self.detector.as_ref(), self.extractor.as_ref(), &self.settings);
    }

    /// Rebuild the descriptor matrices and, in inverted mode, the
    /// vocabulary and word tables.
    pub fn update_vocabulary(&mut self) {
        let mut vocabulary = self.vocabulary.write();
        self.registry.update_vocabulary(&mut vocabulary, &self.settings);
    }

    fn clear_vocabulary_state(&mut self) {
        self.registry.clear_derived();
        self.vocabulary.write().clear();
    }

    /// Receive a copy of every emitted detection result.
    pub fn subscribe(&self) -> Receiver<DetectionInfo> {
        let (sender, receiver) = unbounded();
        self.sinks.lock().push(sender);
        receiver
    }

    /// Detect and publish the result to subscribers when something was
    /// found, or unconditionally under `send_no_obj_detected_events`.
    pub fn detect_and_emit(&self, image: &DynamicImage) -> DetectionInfo {
        let info = self.detect(image);

        match info.detections.len() {
            0 => {
                if self.settings.general.send_no_obj_detected_events {
                    info!("no objects detected ({:?})", info.timings.total);
                }
            }
            1 => info!(
                "object {} detected ({:?})",
                info.detections[0].object_id, info.timings.total
            ),
            n => info!("{n} objects detected ({:?})", info.timings.total),
        }

        if !info.detections.is_empty() || self.settings.general.send_no_obj_detected_events {
            self.sinks
                .lock()
                .retain(|sink| sink.send(info.clone()).is_ok());
        }
        info
    }

    /// Detect registered objects in a scene image.
    pub fn detect(&self, image: &DynamicImage) -> DetectionInfo {
        self.detect_gray(&image.to_luma8())
    }

    /// The detection pipeline over an 8-bit luminance image.
    pub fn detect_gray(&self, image: &GrayImage) -> DetectionInfo {
        let total = Instant::now();
        let mut info = DetectionInfo::default();
        let scene_size = (image.width(), image.height());

        let stage = Instant::now();
        let keypoints = self.detector.detect(image);
        info.timings.keypoint_detection = stage.elapsed();

        let empty_scene = keypoints.is_empty();
        let stage = Instant::now();
        if !empty_scene {
            let keypoints = limit_keypoints(keypoints, self.settings.feature2d.max_features);
            let (keypoints, descriptors) = self.extractor.compute(image, keypoints);
            if keypoints.len() != descriptors.rows() {
                error!(
                    "scene: {} keypoints vs {} descriptors",
                    keypoints.len(),
                    descriptors.rows()
                );
            }
            info.scene_keypoints = keypoints;
            info.scene_descriptors = descriptors;
        }
        info.timings.descriptor_extraction = stage.elapsed();

        let inverted = self.settings.general.inverted_search;
        let mut vocabulary = self.vocabulary.write();

        // the vocabulary must have been populated for the active mode
        let consistent = (vocabulary.size() != 0
            && !vocabulary.word_to_objects().is_empty()
            && inverted)
            || ((vocabulary.size() == 0 || vocabulary.word_to_objects().is_empty()) && !inverted);

        let objects_descriptors = self.registry.descriptor_matrices();
        let formats_agree = objects_descriptors
            .values()
            .next()
            .map(|m| m.same_format(&info.scene_descriptors))
            .unwrap_or(false);

        if !objects_descriptors.is_empty()
            && !info.scene_keypoints.is_empty()
            && consistent
            && formats_agree
        {
            info.success = true;
            let scene_descriptors = std::mem::take(&mut info.scene_descriptors);

            let mut scene_words = SceneWords::new();
            if !inverted {
                let stage = Instant::now();
                vocabulary.clear();
                scene_words = vocabulary.add_words(
                    &scene_descriptors,
                    None,
                    self.settings.general.vocabulary_incremental,
                    &self.settings,
                );
                vocabulary.update(&self.settings);
                info.timings.indexing = stage.elapsed();
            }

            for id in self.registry.ids() {
                info.matches.insert(id, MatchTable::new());
            }

            let stage = Instant::now();
            if inverted || self.settings.general.threads == 1 {
                matching::serial_search(
                    &vocabulary,
                    &self.registry,
                    &scene_descriptors,
                    &scene_words,
                    &self.settings,
                    &mut info,
                );
            } else {
                matching::parallel_direct_search(
                    &vocabulary,
                    &self.registry,
                    &scene_words,
                    &self.settings,
                    &mut info,
                );
            }
            info.scene_descriptors = scene_descriptors;
            info.timings.matching = stage.elapsed();

            if self.settings.homography.computed {
                let stage = Instant::now();
                let scene_keypoints = std::mem::take(&mut info.scene_keypoints);
                homography_stage::run(
                    &self.registry,
                    &scene_keypoints,
                    scene_size,
                    &self.settings,
                    &mut info,
                );
                info.scene_keypoints = scene_keypoints;
                info.timings.homography = stage.elapsed();
            }
        } else if !objects_descriptors.is_empty() && !info.scene_keypoints.is_empty() {
            warn!("cannot search: objects must be updated for the current settings");
        } else if empty_scene {
            warn!("no features detected in the scene");
            info.success = true;
        } else if self.registry.is_empty() {
            // an empty library is not a failure
            info.success = true;
        } else {
            warn!("objects registered but not updated; call update_objects() and update_vocabulary()");
        }

        info.timings.total = total.elapsed();
        info
    }
}
