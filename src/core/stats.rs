//! Pipeline counters shared by the render thread and both workers

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct PipelineStats {
    frames_published: AtomicU64,
    frames_dropped: AtomicU64,
    detections: AtomicU64,
    duplicate_frames: AtomicU64,
    detector_errors: AtomicU64,
    results_published: AtomicU64,
    results_applied: AtomicU64,
    stale_ticks: AtomicU64,
    scenes_loaded: AtomicU64,
    scene_failures: AtomicU64,
    worker_panics: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_published: u64,
    pub frames_dropped: u64,
    pub detections: u64,
    pub duplicate_frames: u64,
    pub detector_errors: u64,
    pub results_published: u64,
    pub results_applied: u64,
    pub stale_ticks: u64,
    pub scenes_loaded: u64,
    pub scene_failures: u64,
    pub worker_panics: u64,
}

macro_rules! counter {
    ($record:ident, $field:ident) => {
        pub fn $record(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    counter!(record_frame_published, frames_published);
    counter!(record_frame_dropped, frames_dropped);
    counter!(record_detection, detections);
    counter!(record_duplicate_frame, duplicate_frames);
    counter!(record_detector_error, detector_errors);
    counter!(record_result_published, results_published);
    counter!(record_result_applied, results_applied);
    counter!(record_stale_tick, stale_ticks);
    counter!(record_scene_loaded, scenes_loaded);
    counter!(record_scene_failure, scene_failures);
    counter!(record_worker_panic, worker_panics);

    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            frames_published: get(&self.frames_published),
            frames_dropped: get(&self.frames_dropped),
            detections: get(&self.detections),
            duplicate_frames: get(&self.duplicate_frames),
            detector_errors: get(&self.detector_errors),
            results_published: get(&self.results_published),
            results_applied: get(&self.results_applied),
            stale_ticks: get(&self.stale_ticks),
            scenes_loaded: get(&self.scenes_loaded),
            scene_failures: get(&self.scene_failures),
            worker_panics: get(&self.worker_panics),
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "frames:     {} published, {} dropped", self.frames_published, self.frames_dropped)?;
        writeln!(
            f,
            "detection:  {} runs, {} duplicate frames, {} errors",
            self.detections, self.duplicate_frames, self.detector_errors
        )?;
        writeln!(
            f,
            "results:    {} published, {} applied, {} stale ticks",
            self.results_published, self.results_applied, self.stale_ticks
        )?;
        write!(
            f,
            "scenes:     {} loaded, {} failed; worker panics: {}",
            self.scenes_loaded, self.scene_failures, self.worker_panics
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = PipelineStats::new();
        stats.record_frame_published();
        stats.record_frame_published();
        stats.record_frame_dropped();
        stats.record_scene_failure();

        let snap = stats.snapshot();
        assert_eq!(snap.frames_published, 2);
        assert_eq!(snap.frames_dropped, 1);
        assert_eq!(snap.scene_failures, 1);
        assert_eq!(snap.detections, 0);
    }

    #[test]
    fn test_display_mentions_every_group() {
        let text = PipelineStats::new().snapshot().to_string();
        for word in ["frames", "detection", "results", "scenes"] {
            assert!(text.contains(word), "{}", text);
        }
    }
}
