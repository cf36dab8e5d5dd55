//! Detection results.
//!
//! One [`DetectionInfo`] is produced per `detect` call: the scene
//! features, raw match tables, accepted detections (several per object
//! under multi-detection), rejected candidates with their reason, and the
//! per-stage timing breakdown.

use std::collections::BTreeMap;
use std::time::Duration;

use nalgebra::Matrix3;

use crate::core::{DescriptorMatrix, KeyPoint, MultiMap, ObjectId};

/// Why a candidate homography was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectedCode {
    /// Not rejected.
    Undef,
    /// Fewer raw matches than the inlier floor; no fit attempted.
    LowMatches,
    /// Fit survived but with fewer inliers than the floor.
    LowInliers,
    /// Every match was an inlier and the configuration treats that as
    /// degenerate, or the estimated matrix was all zeros.
    AllInliers,
    /// A transformed corner fell far outside the scene.
    NotValid,
    /// The transformed quadrilateral has a degenerate interior angle.
    ByAngle,
    /// Too close to a previously accepted instance of the same object.
    Superposed,
    /// A corner fell outside the scene while all corners were required
    /// to be visible.
    CornersOutside,
}

/// Object keypoint index to scene keypoint index pairs.
pub type MatchTable = MultiMap<u32, u32>;

/// An accepted object instance.
#[derive(Debug, Clone)]
pub struct Detection {
    pub object_id: ObjectId,
    /// Maps object-plane points to scene points.
    pub homography: Matrix3<f64>,
    /// Width and height of the reference image.
    pub object_size: (u32, u32),
    pub filename: String,
    pub inliers: MatchTable,
    pub outliers: MatchTable,
}

/// A rejected candidate with its inlier/outlier bookkeeping.
#[derive(Debug, Clone)]
pub struct Rejection {
    pub object_id: ObjectId,
    pub code: RejectedCode,
    pub inliers: MatchTable,
    pub outliers: MatchTable,
}

/// Wall-clock spent in each pipeline stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageTimings {
    pub keypoint_detection: Duration,
    pub descriptor_extraction: Duration,
    pub indexing: Duration,
    pub matching: Duration,
    pub homography: Duration,
    pub total: Duration,
}

/// Everything observed during one detection call.
#[derive(Debug, Clone)]
pub struct DetectionInfo {
    /// False when the pipeline could not run (inconsistent vocabulary,
    /// descriptor format mismatch). An empty scene is still a success.
    pub success: bool,
    pub scene_keypoints: Vec<KeyPoint>,
    pub scene_descriptors: DescriptorMatrix,
    /// Raw matches per registered object, before geometric verification.
    pub matches: BTreeMap<ObjectId, MatchTable>,
    /// Smallest nearest-neighbor distance seen over all scene queries;
    /// -1 until a first query ran.
    pub min_matched_distance: f32,
    pub max_matched_distance: f32,
    pub detections: Vec<Detection>,
    pub rejections: Vec<Rejection>,
    pub timings: StageTimings,
}

impl Default for DetectionInfo {
    fn default() -> Self {
        Self {
            success: false,
            scene_keypoints: Vec::new(),
            scene_descriptors: DescriptorMatrix::empty(),
            matches: BTreeMap::new(),
            min_matched_distance: -1.0,
            max_matched_distance: -1.0,
            detections: Vec::new(),
            rejections: Vec::new(),
            timings: StageTimings::default(),
        }
    }
}

impl DetectionInfo {
    /// Accepted homographies of one object, in acceptance order.
    pub fn transforms_of(&self, object_id: ObjectId) -> Vec<&Matrix3<f64>> {
        self.detections
            .iter()
            .filter(|d| d.object_id == object_id)
            .map(|d| &d.homography)
            .collect()
    }

    /// Ids with at least one accepted instance, ascending and distinct.
    pub fn detected_objects(&self) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = self.detections.iter().map(|d| d.object_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    pub fn fold_matched_distance(&mut self, d: f32) {
        if self.min_matched_distance == -1.0 || self.min_matched_distance > d {
            self.min_matched_distance = d;
        }
        if self.max_matched_distance == -1.0 || self.max_matched_distance < d {
            self.max_matched_distance = d;
        }
    }
}
