//! Tunable parameters consumed by the detection pipeline.
//!
//! The bundle is grouped into sections mirroring the stages that read them:
//! general orchestration, feature extraction, nearest-neighbor acceptance,
//! and homography validation. Each section has defaults matching common
//! usage; the whole bundle round-trips through JSON for persistence.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// ANN index construction strategy.
///
/// `KdTree` and `KMeans` only apply to float descriptors; binary
/// descriptors are served by `Lsh` or `Linear`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexStrategy {
    /// Exact brute-force scan.
    Linear,
    /// Randomized kd-tree over float descriptors.
    KdTree { trees: usize },
    /// Coarse k-means quantizer with probe lists.
    KMeans { branching: usize, iterations: usize },
    /// Multi-probe locality-sensitive hashing over binary descriptors.
    Lsh {
        table_number: usize,
        key_size: usize,
        multi_probe_level: usize,
    },
}

/// Distance used by the ANN backend. Binary descriptors force a Hamming
/// variant regardless of this setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceKind {
    L1,
    /// Squared Euclidean.
    L2,
    Hamming,
    /// Hamming over 2-bit cells, for descriptors built with `WTA_K` 3 or 4.
    Hamming2,
}

/// Robust homography estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HomographyMethod {
    Ransac,
    LeastMedian,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralSettings {
    /// Scene queries an object vocabulary (true) or objects query a
    /// per-frame scene index (false).
    pub inverted_search: bool,
    /// Deduplicate new words through the NNDR test while adding.
    pub vocabulary_incremental: bool,
    /// During incremental registration, rebuild the index once this many
    /// new words accumulated.
    pub vocabulary_update_min_words: usize,
    /// Worker pool size per wave; 0 means one worker per task.
    pub threads: usize,
    /// Accept further instances of an already-detected object.
    pub multi_detection: bool,
    /// Minimum translation (pixels) between two accepted instances.
    pub multi_detection_radius: f64,
    /// Emit a detection event even when nothing was found.
    pub send_no_obj_detected_events: bool,
    /// Seed of the monotonic object-id generator.
    pub next_obj_id: u32,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            inverted_search: true,
            vocabulary_incremental: false,
            vocabulary_update_min_words: 2000,
            threads: 1,
            multi_detection: false,
            multi_detection_radius: 30.0,
            send_no_obj_detected_events: false,
            next_obj_id: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature2dSettings {
    /// Keypoint cap; keep the top-N by |response|. 0 disables the cap.
    pub max_features: usize,
    /// WTA_K of the ORB descriptor generator; 3 or 4 selects Hamming2.
    pub orb_wta_k: u32,
}

impl Default for Feature2dSettings {
    fn default() -> Self {
        Self {
            max_features: 0,
            orb_wta_k: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearestNeighborSettings {
    pub index: IndexStrategy,
    pub distance: DistanceKind,
    /// Leaf visits / candidate budget during approximate search.
    pub search_checks: usize,
    /// Apply Lowe's ratio test.
    pub nndr_ratio_used: bool,
    pub nndr_ratio: f32,
    /// Apply the absolute-distance acceptance test.
    pub min_distance_used: bool,
    pub min_distance: f32,
}

impl Default for NearestNeighborSettings {
    fn default() -> Self {
        Self {
            index: IndexStrategy::KdTree { trees: 4 },
            distance: DistanceKind::L2,
            search_checks: 32,
            nndr_ratio_used: true,
            nndr_ratio: 0.8,
            min_distance_used: false,
            min_distance: 1.6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HomographySettings {
    /// Run the homography stage at all.
    pub computed: bool,
    pub method: HomographyMethod,
    /// Reprojection threshold in pixels.
    pub ransac_reproj_thr: f64,
    /// Floor on both raw matches and surviving inliers.
    pub min_inliers: usize,
    /// Reject fits where every match is an inlier.
    pub ignore_when_all_inliers: bool,
    /// Quadrilateral interior-angle floor in degrees; 0 disables the test.
    pub min_angle: f64,
    /// Require all transformed corners inside the scene rectangle.
    pub all_corners_visible: bool,
}

impl Default for HomographySettings {
    fn default() -> Self {
        Self {
            computed: true,
            method: HomographyMethod::Ransac,
            ransac_reproj_thr: 3.0,
            min_inliers: 10,
            ignore_when_all_inliers: false,
            min_angle: 0.0,
            all_corners_visible: false,
        }
    }
}

/// The full settings bundle injected into the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    pub general: GeneralSettings,
    pub feature2d: Feature2dSettings,
    pub nearest_neighbor: NearestNeighborSettings,
    pub homography: HomographySettings,
}

impl Settings {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Neighbors requested per query: 2 under the ratio test, else 1.
    pub fn knn_k(&self) -> usize {
        if self.nearest_neighbor.nndr_ratio_used {
            2
        } else {
            1
        }
    }
}
