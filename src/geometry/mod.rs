//! Geometry: robust homography estimation and transform validation.

pub mod homography;
pub mod validate;

pub use homography::{apply_homography, find_homography, HomographyResult, RobustConfig};
pub use validate::{project_corners, translation, validate_transform};
