//! Collaborator contracts for feature extraction.
//!
//! Keypoint detection and descriptor computation are injected; the
//! pipeline only relies on these two traits. Implementations must be
//! shareable across extraction workers.

use image::GrayImage;

use crate::core::{DescriptorMatrix, KeyPoint};

/// Finds interest points in an 8-bit grayscale image.
pub trait KeypointDetector: Send + Sync {
    fn detect(&self, image: &GrayImage) -> Vec<KeyPoint>;
}

/// Computes one descriptor row per keypoint.
///
/// The returned keypoint list may be a filtered version of the input
/// (extractors drop points they cannot describe); its length must equal
/// the returned matrix's row count.
pub trait DescriptorExtractor: Send + Sync {
    fn compute(&self, image: &GrayImage, keypoints: Vec<KeyPoint>)
        -> (Vec<KeyPoint>, DescriptorMatrix);
}

/// Keep the `max` strongest keypoints by response magnitude.
///
/// The kept set is exactly the top-`max` by `|response|`; ties keep their
/// original order. With `max == 0` or fewer keypoints than the cap, the
/// input passes through unchanged.
pub fn limit_keypoints(keypoints: Vec<KeyPoint>, max: usize) -> Vec<KeyPoint> {
    if max == 0 || keypoints.len() <= max {
        return keypoints;
    }
    let mut order: Vec<usize> = (0..keypoints.len()).collect();
    // stable sort: equal responses stay in original order
    order.sort_by(|&a, &b| {
        keypoints[b]
            .response
            .abs()
            .partial_cmp(&keypoints[a].response.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order.truncate(max);
    order.into_iter().map(|i| keypoints[i]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kp(response: f32) -> KeyPoint {
        KeyPoint::new(0.0, 0.0, 1.0, response)
    }

    #[test]
    fn keeps_top_by_response_magnitude() {
        let kpts = vec![kp(0.1), kp(-0.9), kp(0.5), kp(0.3)];
        let kept = limit_keypoints(kpts, 2);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].response, -0.9);
        assert_eq!(kept[1].response, 0.5);
    }

    #[test]
    fn ties_keep_original_order() {
        let mut kpts = vec![kp(0.5), kp(0.5), kp(0.5), kp(0.1)];
        kpts[0].pt.x = 10.0;
        kpts[1].pt.x = 20.0;
        kpts[2].pt.x = 30.0;
        let kept = limit_keypoints(kpts, 2);
        assert_eq!(kept[0].pt.x, 10.0);
        assert_eq!(kept[1].pt.x, 20.0);
    }

    #[test]
    fn cap_zero_or_large_is_identity() {
        let kpts = vec![kp(0.1), kp(0.2)];
        assert_eq!(limit_keypoints(kpts.clone(), 0).len(), 2);
        assert_eq!(limit_keypoints(kpts, 10).len(), 2);
    }
}
