//! Object signatures and the registered-object collection.

mod registry;
mod signature;

pub use registry::{ObjectRegistry, CONCATENATED_KEY};
pub use signature::ObjSignature;

use crate::core::ObjectId;

/// Errors raised while registering objects.
#[derive(Debug)]
pub enum ObjectError {
    /// An object with this id is already registered.
    DuplicateId(ObjectId),
    /// Object ids must be positive.
    InvalidId(ObjectId),
    /// The reference image could not be loaded or decoded.
    InvalidImage(String),
}

impl std::fmt::Display for ObjectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectError::DuplicateId(id) => write!(f, "object with id {id} already added"),
            ObjectError::InvalidId(id) => write!(f, "invalid object id {id}"),
            ObjectError::InvalidImage(msg) => write!(f, "invalid object image: {msg}"),
        }
    }
}

impl std::error::Error for ObjectError {}
