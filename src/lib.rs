//! FACEMASK - real-time tracked overlay pipeline library
//!
//! Re-exports all modules for use by the host binary.

// Core pipeline (cache, slot, ring, workers, filter)
pub mod core;

// Collaborators
pub mod detect;
pub mod gfx;
pub mod scene;

// App modules
pub mod cli;
pub mod config;
pub mod error;
pub mod paths;

// Re-export commonly used types from core
pub use core::filter::FaceMaskFilter;
pub use core::resource_cache::{CacheableKind, ResourceCache};
pub use core::stats::StatsSnapshot;

pub use config::{AlertConfig, DetectorConfig, FilterConfig, LoaderConfig};
pub use error::{MaskError, Result};
