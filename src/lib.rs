//! Planar object recognition by local-feature matching.
//!
//! Known objects are registered as reference images; a query image is
//! matched against them through a visual vocabulary of descriptor words,
//! and every candidate is verified with a robust homography fit plus a
//! chain of geometric plausibility checks. Multi-instance detection
//! re-queues the outliers of each accepted fit.
//!
//! Keypoint detection and descriptor extraction are injected through the
//! [`features::KeypointDetector`] and [`features::DescriptorExtractor`]
//! traits; the crate itself is detector-agnostic and handles binary and
//! float descriptors alike.
//!
//! # Usage
//!
//! ```ignore
//! let mut engine = FindObject::new(Settings::default(), detector, extractor);
//! engine.add_object_from_file(Path::new("objects/1.png"))?;
//! engine.update_objects();
//! engine.update_vocabulary();
//! let info = engine.detect(&scene);
//! for d in &info.detections {
//!     println!("object {} at {:?}", d.object_id, d.homography);
//! }
//! ```

pub mod core;
pub mod detection;
pub mod engine;
pub mod features;
pub mod geometry;
pub mod index;
pub mod matching;
pub mod objects;
pub mod settings;
pub mod vocabulary;
pub mod workers;

pub use crate::core::{DescriptorMatrix, KeyPoint, MultiMap, ObjectId, WordId};
pub use crate::detection::{Detection, DetectionInfo, RejectedCode};
pub use crate::engine::FindObject;
pub use crate::features::{DescriptorExtractor, KeypointDetector};
pub use crate::objects::{ObjSignature, ObjectError, ObjectRegistry};
pub use crate::settings::Settings;
pub use crate::vocabulary::Vocabulary;
