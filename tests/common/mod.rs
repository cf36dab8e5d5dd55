//! Synthetic feature operators for the end-to-end scenarios.
//!
//! Marker pixels (value >= 200) are keypoints; the descriptor of a
//! keypoint is its raw 5x5 neighborhood. Pasting an object patch into a
//! scene therefore reproduces its descriptors exactly at the translated
//! positions, which makes detection outcomes easy to predict.

use std::sync::Once;

use image::GrayImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use find_object::core::{DescriptorMatrix, KeyPoint, Mat};
use find_object::settings::IndexStrategy;
use find_object::{DescriptorExtractor, FindObject, KeypointDetector, Settings};

static INIT: Once = Once::new();

fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

const MARKER_THRESHOLD: u8 = 200;
/// Neighborhood half-width; descriptors are (2R+1)^2 bytes.
const R: u32 = 2;

pub struct MarkerDetector;

impl KeypointDetector for MarkerDetector {
    fn detect(&self, image: &GrayImage) -> Vec<KeyPoint> {
        let mut keypoints = Vec::new();
        if image.width() <= 2 * R || image.height() <= 2 * R {
            return keypoints;
        }
        for y in R..image.height() - R {
            for x in R..image.width() - R {
                let value = image.get_pixel(x, y).0[0];
                if value >= MARKER_THRESHOLD {
                    keypoints.push(KeyPoint::new(x as f32, y as f32, 3.0, value as f32));
                }
            }
        }
        keypoints
    }
}

/// Neighborhood-patch extractor. When `float_above_width` is set, images
/// at least that wide get `f32` descriptors instead of `u8` ones; the
/// mismatch scenarios use this to give scene and objects different
/// element types.
pub struct MarkerExtractor {
    pub float_above_width: Option<u32>,
}

impl MarkerExtractor {
    pub fn binary() -> Self {
        Self {
            float_above_width: None,
        }
    }
}

impl DescriptorExtractor for MarkerExtractor {
    fn compute(
        &self,
        image: &GrayImage,
        keypoints: Vec<KeyPoint>,
    ) -> (Vec<KeyPoint>, DescriptorMatrix) {
        let cols = ((2 * R + 1) * (2 * R + 1)) as usize;
        let as_float = self
            .float_above_width
            .map(|w| image.width() >= w)
            .unwrap_or(false);

        let mut patch = Vec::with_capacity(cols);
        if as_float {
            let mut m = Mat::<f32>::new(cols);
            for kp in &keypoints {
                patch.clear();
                fill_patch(image, kp, &mut patch);
                let row: Vec<f32> = patch.iter().map(|&v| v as f32).collect();
                m.push_row(&row);
            }
            (keypoints, DescriptorMatrix::F32(m))
        } else {
            let mut m = Mat::<u8>::new(cols);
            for kp in &keypoints {
                patch.clear();
                fill_patch(image, kp, &mut patch);
                m.push_row(&patch);
            }
            (keypoints, DescriptorMatrix::U8(m))
        }
    }
}

fn fill_patch(image: &GrayImage, kp: &KeyPoint, out: &mut Vec<u8>) {
    let (cx, cy) = (kp.pt.x as u32, kp.pt.y as u32);
    for dy in 0..=2 * R {
        for dx in 0..=2 * R {
            out.push(image.get_pixel(cx + dx - R, cy + dy - R).0[0]);
        }
    }
}

/// A reference patch: textured background below the marker threshold,
/// `markers` bright pixels at least 3 px from the border.
pub fn object_image(seed: u64, width: u32, height: u32, markers: usize) -> GrayImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut image = GrayImage::new(width, height);
    for pixel in image.pixels_mut() {
        pixel.0[0] = rng.gen_range(0..150);
    }
    let mut placed = std::collections::HashSet::new();
    while placed.len() < markers {
        let x = rng.gen_range(3..width - 3);
        let y = rng.gen_range(3..height - 3);
        if placed.insert((x, y)) {
            image.put_pixel(x, y, image::Luma([rng.gen_range(MARKER_THRESHOLD..=255)]));
        }
    }
    image
}

/// Copy `patch` into `scene` with its top-left corner at `(x, y)`.
pub fn paste(scene: &mut GrayImage, patch: &GrayImage, x: u32, y: u32) {
    for py in 0..patch.height() {
        for px in 0..patch.width() {
            scene.put_pixel(x + px, y + py, *patch.get_pixel(px, py));
        }
    }
}

/// Settings used by the scenarios: exact index, otherwise defaults.
pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.nearest_neighbor.index = IndexStrategy::Linear;
    settings
}

pub fn engine(settings: Settings) -> FindObject {
    init_tracing();
    FindObject::new(
        settings,
        Box::new(MarkerDetector),
        Box::new(MarkerExtractor::binary()),
    )
}
