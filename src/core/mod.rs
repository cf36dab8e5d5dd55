//! Core data types shared by the detection pipeline.
//!
//! - [`KeyPoint`]: detected image feature with location and response
//! - [`DescriptorMatrix`]: dense row-major descriptor storage, `u8` or `f32`
//! - [`MultiMap`]: ordered multi-map used for word and match tables

pub mod matrix;
pub mod multimap;

use nalgebra::Point2;

pub use matrix::{DescriptorMatrix, ElemType, Mat, RowRef};
pub use multimap::MultiMap;

/// Identifier of a registered object. Always positive once assigned.
pub type ObjectId = u32;

/// Identifier of a vocabulary word: its insertion index.
pub type WordId = u32;

/// A detected image feature.
///
/// Mirrors the fields produced by the usual keypoint detectors: location,
/// diameter of the meaningful neighborhood, orientation in degrees (-1 when
/// not applicable), detector response, and pyramid octave.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyPoint {
    pub pt: Point2<f32>,
    pub size: f32,
    pub angle: f32,
    pub response: f32,
    pub octave: i32,
}

impl KeyPoint {
    pub fn new(x: f32, y: f32, size: f32, response: f32) -> Self {
        Self {
            pt: Point2::new(x, y),
            size,
            angle: -1.0,
            response,
            octave: 0,
        }
    }
}
