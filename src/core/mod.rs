//! Core pipeline - resource cache, frame slot, result ring, workers, filter
//!
//! These modules form the real-time engine, independent of any host.

pub mod alert;
pub mod detection_worker;
pub mod filter;
pub mod frame_slot;
pub mod lifecycle;
pub mod locks;
pub mod morph_gate;
pub mod resource_cache;
pub mod result_ring;
pub mod scene_loader;
pub mod stats;

// Re-exports for convenience
pub use alert::{AlertFrame, AlertTimeline};
pub use filter::FaceMaskFilter;
pub use frame_slot::{FrameSlot, Timestamp};
pub use lifecycle::{ShutdownReport, WorkerFlags, WorkerHandle};
pub use resource_cache::{CacheStats, CacheableKind, ResourceCache, ResourceHandle};
pub use result_ring::{ResultRing, BUFFER_SIZE};
pub use stats::{PipelineStats, StatsSnapshot};
