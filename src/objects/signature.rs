//! Reference object signature.

use image::GrayImage;

use crate::core::{DescriptorMatrix, KeyPoint, MultiMap, ObjectId, WordId};

/// One registered object: its reference image, extracted features, and the
/// word table linking vocabulary words to local keypoint indices.
///
/// Signatures hold word ids, never references into the vocabulary, so
/// removing objects cannot leave dangling links.
#[derive(Debug, Clone)]
pub struct ObjSignature {
    id: ObjectId,
    image: GrayImage,
    filename: String,
    keypoints: Vec<KeyPoint>,
    descriptors: DescriptorMatrix,
    words: MultiMap<WordId, u32>,
}

impl ObjSignature {
    pub fn new(id: ObjectId, image: GrayImage, filename: impl Into<String>) -> Self {
        Self {
            id,
            image,
            filename: filename.into(),
            keypoints: Vec::new(),
            descriptors: DescriptorMatrix::empty(),
            words: MultiMap::new(),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn keypoints(&self) -> &[KeyPoint] {
        &self.keypoints
    }

    pub fn descriptors(&self) -> &DescriptorMatrix {
        &self.descriptors
    }

    /// Word id to local keypoint indices, filled by vocabulary population.
    pub fn words(&self) -> &MultiMap<WordId, u32> {
        &self.words
    }

    /// Width and height of the reference image in pixels.
    pub fn size(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }

    pub(crate) fn set_data(&mut self, keypoints: Vec<KeyPoint>, descriptors: DescriptorMatrix) {
        self.keypoints = keypoints;
        self.descriptors = descriptors;
        self.words.clear();
    }

    pub(crate) fn set_words(&mut self, words: MultiMap<WordId, u32>) {
        self.words = words;
    }
}
