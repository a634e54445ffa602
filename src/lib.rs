//! An asynchronous, extensible loader that materializes glTF-style documents
//! into an engine-neutral scene graph.
//!
//! The pipeline: raw bytes are unpacked by [`lodestar_gltf::glb`] into JSON
//! plus an optional binary body, the JSON becomes an indexed [`document::DocumentGraph`],
//! and [`session::Loader::load`] resolves every referenced entity exactly once
//! through memoized async resolution, with every stage interceptable by
//! [`extensions::Extension`] implementations.

use thiserror::Error;

/// The loader's error taxonomy. Variants carry owned strings so the type stays
/// `Clone`: a failed resolution is stored in its memo slot and every pending
/// consumer of the same entity receives the same error.
#[derive(Error, Debug, Clone)]
pub enum LoaderError {
    #[error("Invalid document: {0}")]
    Format(String),

    #[error("{path}: {detail}")]
    Reference { path: String, detail: String },

    #[error("{path}: unsupported {what}")]
    Unsupported { path: String, what: String },

    #[error("Required extension '{0}' is not registered")]
    MissingExtension(String),

    #[error("Extension '{name}' failed: {detail}")]
    Extension { name: String, detail: String },

    #[error("{path}: node appears as its own ancestor")]
    CircularHierarchy { path: String },

    #[error("Fetching '{url}' failed: {detail}")]
    Fetch { url: String, detail: String },

    #[error("The loader session was disposed")]
    Disposed,
}

impl From<lodestar_gltf::FormatError> for LoaderError {
    fn from(value: lodestar_gltf::FormatError) -> Self {
        LoaderError::Format(value.to_string())
    }
}

impl LoaderError {
    /// Reference error with a structural document path such as `/nodes/3/mesh`.
    pub fn reference(path: impl Into<String>, detail: impl Into<String>) -> Self {
        LoaderError::Reference {
            path: path.into(),
            detail: detail.into(),
        }
    }

    pub fn unsupported(path: impl Into<String>, what: impl Into<String>) -> Self {
        LoaderError::Unsupported {
            path: path.into(),
            what: what.into(),
        }
    }
}

pub mod document;
pub mod engine;
pub mod extensions;
pub mod io;
pub mod resolve;
pub mod scene;
pub mod session;
