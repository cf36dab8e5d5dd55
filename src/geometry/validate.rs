//! Geometric plausibility checks for a candidate homography.
//!
//! Predicates run in a fixed order; the first failure decides the
//! rejection code. `Undef` means the transform passed everything the
//! caller enabled.

use nalgebra::{Matrix3, Point2};

use crate::detection::RejectedCode;
use crate::settings::Settings;

use super::homography::apply_homography;

/// Object rectangle corners mapped into the scene, or `None` when a
/// corner degenerates under the transform.
pub fn project_corners(h: &Matrix3<f64>, object_size: (u32, u32)) -> Option<[Point2<f64>; 4]> {
    let (w, h_px) = (object_size.0 as f64, object_size.1 as f64);
    let corners = [
        Point2::new(0.0, 0.0),
        Point2::new(w, 0.0),
        Point2::new(w, h_px),
        Point2::new(0.0, h_px),
    ];
    let mut mapped = [Point2::origin(); 4];
    for (slot, c) in mapped.iter_mut().zip(&corners) {
        *slot = apply_homography(h, c)?;
    }
    Some(mapped)
}

/// Translation components of the transform.
pub fn translation(h: &Matrix3<f64>) -> (f64, f64) {
    (h[(0, 2)], h[(1, 2)])
}

/// Check the transformed quadrilateral against the scene.
///
/// Evaluates, in order: corners wildly outside the scene (`NotValid`),
/// degenerate interior angles (`ByAngle`), superposition with previously
/// accepted same-object transforms (`Superposed`), and full corner
/// visibility (`CornersOutside`). The caller handles match-count and
/// all-inlier predicates before invoking this.
pub fn validate_transform(
    h: &Matrix3<f64>,
    object_size: (u32, u32),
    scene_size: (u32, u32),
    prior_transforms: &[&Matrix3<f64>],
    settings: &Settings,
) -> RejectedCode {
    let (scene_w, scene_h) = (scene_size.0 as f64, scene_size.1 as f64);

    let Some(corners) = project_corners(h, object_size) else {
        return RejectedCode::NotValid;
    };

    // a corner outside twice the scene surface means the fit is nonsense
    for c in &corners {
        if c.x < -scene_w || c.x > scene_w * 2.0 || c.y < -scene_h || c.y > scene_h * 2.0 {
            return RejectedCode::NotValid;
        }
    }

    let min_angle = settings.homography.min_angle;
    if min_angle > 0.0 {
        for a in 0..4 {
            let angle = edge_angle(&corners, a);
            if angle < min_angle || angle > 180.0 - min_angle {
                return RejectedCode::ByAngle;
            }
        }
    }

    if settings.general.multi_detection {
        let radius = settings.general.multi_detection_radius;
        let (tx, ty) = translation(h);
        let mut distance = radius;
        for prior in prior_transforms {
            let (px, py) = translation(prior);
            let d = ((px - tx).powi(2) + (py - ty).powi(2)).sqrt();
            if d < distance {
                distance = d;
            }
        }
        if distance < radius {
            return RejectedCode::Superposed;
        }
    }

    if settings.homography.all_corners_visible {
        for c in &corners {
            if c.x < 0.0 || c.x > scene_w || c.y < 0.0 || c.y > scene_h {
                return RejectedCode::CornersOutside;
            }
        }
    }

    RejectedCode::Undef
}

/// Angle in degrees between edge `a -> a+1` and edge `a+1 -> a+2`.
fn edge_angle(corners: &[Point2<f64>; 4], a: usize) -> f64 {
    let ab = corners[(a + 1) % 4] - corners[a];
    let cb = corners[(a + 2) % 4] - corners[(a + 1) % 4];
    let denom = ab.norm() * cb.norm();
    if denom < 1e-12 {
        return 0.0;
    }
    let cos = (ab.dot(&cb) / denom).clamp(-1.0, 1.0);
    cos.acos().to_degrees()
}
