//! Wave-parallel homography estimation and sequential validation.
//!
//! Workers fit one candidate object each: gather matched point pairs,
//! run the robust estimator, partition inliers, and apply the two checks
//! that need no shared state (match floor, all-inlier degeneracy). The
//! orchestrator thread then validates each fit in join order, because
//! superposition and multi-detection re-queuing depend on previously
//! accepted transforms.
//!
//! Multi-detection feeds a validated candidate's outliers back into the
//! queue as a fresh candidate for the same object. The re-queued set is
//! always strictly smaller than its parent, so the loop terminates.

use nalgebra::Point2;

use crate::core::{KeyPoint, MultiMap, ObjectId};
use crate::detection::{Detection, DetectionInfo, MatchTable, Rejection, RejectedCode};
use crate::geometry::{find_homography, validate_transform, RobustConfig};
use crate::objects::ObjectRegistry;
use crate::settings::Settings;
use crate::workers::run_waves;

struct FitOutcome {
    object_id: ObjectId,
    h: Option<nalgebra::Matrix3<f64>>,
    code: RejectedCode,
    inliers: MatchTable,
    outliers: MatchTable,
}

/// Run the homography stage over every per-object match table.
pub(crate) fn run(
    registry: &ObjectRegistry,
    scene_keypoints: &[KeyPoint],
    scene_size: (u32, u32),
    settings: &Settings,
    info: &mut DetectionInfo,
) {
    let mut queue: Vec<(ObjectId, MatchTable)> = info
        .matches
        .iter()
        .map(|(id, m)| (*id, m.clone()))
        .collect();

    let threads = settings.general.threads;
    let mut next = 0usize;
    while next < queue.len() {
        let wave_len = if threads == 0 {
            queue.len() - next
        } else {
            threads.min(queue.len() - next)
        };
        let batch: Vec<(ObjectId, MatchTable)> = queue[next..next + wave_len].to_vec();
        let outcomes = run_waves(batch, 0, |(object_id, matches)| {
            fit_candidate(object_id, &matches, registry, scene_keypoints, settings)
        });
        for outcome in outcomes {
            validate_outcome(outcome, registry, scene_size, settings, info, &mut queue);
        }
        next += wave_len;
    }
}

/// Worker half: point assembly, robust fit, inlier partition.
fn fit_candidate(
    object_id: ObjectId,
    matches: &MatchTable,
    registry: &ObjectRegistry,
    scene_keypoints: &[KeyPoint],
    settings: &Settings,
) -> FitOutcome {
    let mut outcome = FitOutcome {
        object_id,
        h: None,
        code: RejectedCode::Undef,
        inliers: MultiMap::new(),
        outliers: MultiMap::new(),
    };

    if matches.len() < settings.homography.min_inliers {
        outcome.code = RejectedCode::LowMatches;
        return outcome;
    }
    let Some(sig) = registry.get(object_id) else {
        outcome.code = RejectedCode::LowMatches;
        return outcome;
    };

    let mut src = Vec::with_capacity(matches.len());
    let mut dst = Vec::with_capacity(matches.len());
    let mut pairs = Vec::with_capacity(matches.len());
    for (&obj_idx, &scene_idx) in matches.iter() {
        let okpt = &sig.keypoints()[obj_idx as usize];
        let skpt = &scene_keypoints[scene_idx as usize];
        src.push(Point2::new(okpt.pt.x as f64, okpt.pt.y as f64));
        dst.push(Point2::new(skpt.pt.x as f64, skpt.pt.y as f64));
        pairs.push((obj_idx, scene_idx));
    }

    let config = RobustConfig {
        method: settings.homography.method,
        reproj_threshold: settings.homography.ransac_reproj_thr,
        ..Default::default()
    };
    // a failed fit leaves the inlier set empty; the orchestrator maps
    // that to LowInliers
    if let Some(result) = find_homography(&src, &dst, &config) {
        for (k, (obj_idx, scene_idx)) in pairs.iter().enumerate() {
            if result.inlier_mask[k] {
                outcome.inliers.insert(*obj_idx, *scene_idx);
            } else {
                outcome.outliers.insert(*obj_idx, *scene_idx);
            }
        }

        let all_inliers = result.num_inliers() == pairs.len();
        let degenerate = result.h.iter().filter(|v| **v != 0.0).count() < 1;
        if all_inliers && (settings.homography.ignore_when_all_inliers || degenerate) {
            outcome.code = RejectedCode::AllInliers;
        } else {
            outcome.h = Some(result.h);
        }
    }
    outcome
}

/// Orchestrator half: inlier floor, geometric validation, multi-detection
/// re-queuing, result recording.
fn validate_outcome(
    outcome: FitOutcome,
    registry: &ObjectRegistry,
    scene_size: (u32, u32),
    settings: &Settings,
    info: &mut DetectionInfo,
    queue: &mut Vec<(ObjectId, MatchTable)>,
) {
    let mut code = outcome.code;
    if code == RejectedCode::Undef
        && (outcome.h.is_none() || outcome.inliers.len() < settings.homography.min_inliers)
    {
        code = RejectedCode::LowInliers;
    }

    if code == RejectedCode::Undef {
        if let Some(h) = &outcome.h {
            let object_size = registry
                .get(outcome.object_id)
                .map(|s| s.size())
                .unwrap_or((0, 0));
            let prior = info.transforms_of(outcome.object_id);
            code = validate_transform(h, object_size, scene_size, &prior, settings);

            // outliers become a fresh candidate whenever the transform
            // reached the multi-detection step, accepted or superposed
            if settings.general.multi_detection
                && !matches!(code, RejectedCode::NotValid | RejectedCode::ByAngle)
            {
                queue.push((outcome.object_id, outcome.outliers.clone()));
            }
        }
    }

    if code == RejectedCode::Undef {
        if let (Some(h), Some(sig)) = (outcome.h, registry.get(outcome.object_id)) {
            info.detections.push(Detection {
                object_id: outcome.object_id,
                homography: h,
                object_size: sig.size(),
                filename: sig.filename().to_string(),
                inliers: outcome.inliers,
                outliers: outcome.outliers,
            });
        }
    } else {
        info.rejections.push(Rejection {
            object_id: outcome.object_id,
            code,
            inliers: outcome.inliers,
            outliers: outcome.outliers,
        });
    }
}
