//! Library error type
//!
//! Transient lock contention is never an error (callers skip a step instead),
//! and a cache key collision on `add` is a defined outcome, not a failure.
//! Everything that *is* a failure ends up here.

use std::path::PathBuf;

/// Errors produced by scene loading, GPU object creation and the detector.
#[derive(Debug, thiserror::Error)]
pub enum MaskError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Scene '{scene}': {reason}")]
    Scene { scene: String, reason: String },

    #[error("GPU error: {0}")]
    Gpu(String),

    #[error("Detector error: {0}")]
    Detector(String),

    #[error("Invalid config: {0}")]
    Config(String),

    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

impl MaskError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MaskError::Io { path: path.into(), source }
    }

    pub fn scene(scene: impl Into<String>, reason: impl Into<String>) -> Self {
        MaskError::Scene { scene: scene.into(), reason: reason.into() }
    }
}

pub type Result<T> = std::result::Result<T, MaskError>;
