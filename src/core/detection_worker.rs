//! Detection worker
//!
//! Per iteration: wait for a frame, detect, landmarks and pose, triangulate
//! under the morph gate, release the frame slot, publish into the result
//! ring, then sleep whatever is left of the speed-limit budget.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use super::frame_slot::{DetectionInput, FrameSlot, SlotRead};
use super::lifecycle::{catch_iteration, WorkerFlags, WorkerHandle};
use super::morph_gate::MorphGate;
use super::result_ring::ResultRing;
use super::stats::PipelineStats;
use crate::config::DetectorConfig;
use crate::detect::{DetectionResults, FaceDetector, Triangulation};
use crate::error::Result;
use crate::gfx::{GraphicsContext, GraphicsDevice};

/// Requests from the filter to its running detection worker.
#[derive(Debug, Default)]
pub struct DetectionControl {
    reset_requested: AtomicBool,
    build_lines: AtomicBool,
}

impl DetectionControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the worker to drop detector tracking state before its next frame.
    pub fn request_reset(&self) {
        self.reset_requested.store(true, Ordering::Release);
    }

    fn take_reset(&self) -> bool {
        self.reset_requested.swap(false, Ordering::AcqRel)
    }

    pub fn set_build_lines(&self, on: bool) {
        self.build_lines.store(on, Ordering::Release);
    }

    fn build_lines(&self) -> bool {
        self.build_lines.load(Ordering::Acquire)
    }
}

/// Shared pipeline pieces the worker reads from and writes to.
#[derive(Clone)]
pub struct DetectionPipeline {
    pub slot: Arc<FrameSlot>,
    pub ring: Arc<ResultRing>,
    pub morph_gate: Arc<MorphGate>,
    pub stats: Arc<PipelineStats>,
    pub control: Arc<DetectionControl>,
    pub gpu: Arc<GraphicsContext>,
    pub device: Arc<dyn GraphicsDevice>,
}

/// Start the detection worker thread.
///
/// `config` is copied into the worker; later edits do not reach it.
pub fn spawn_detection_worker(
    config: DetectorConfig,
    detector: Box<dyn FaceDetector>,
    pipeline: DetectionPipeline,
) -> Result<WorkerHandle> {
    let worker = DetectionWorker { config, detector, pipeline };
    WorkerHandle::spawn("detect", move |flags| worker.run(flags))
}

struct DetectionWorker {
    config: DetectorConfig,
    detector: Box<dyn FaceDetector>,
    pipeline: DetectionPipeline,
}

impl DetectionWorker {
    fn run(mut self, flags: &WorkerFlags) {
        info!(
            "Detection worker running (detect width {}, speed limit {} ms)",
            self.config.detect_width, self.config.speed_limit_ms
        );
        let idle = Duration::from_millis(self.config.idle_sleep_ms);

        while flags.is_running() {
            let started = Instant::now();
            let pause = match catch_iteration("detect", || self.iteration(started)) {
                Some(pause) => pause,
                None => {
                    self.pipeline.stats.record_worker_panic();
                    self.pipeline.slot.release();
                    idle
                }
            };
            if !pause.is_zero() {
                thread::sleep(pause);
            }
        }
        debug!("Detection worker leaving loop");
    }

    /// One pass of the state machine. Returns how long to sleep.
    fn iteration(&mut self, started: Instant) -> Duration {
        let idle = Duration::from_millis(self.config.idle_sleep_ms);
        let short = Duration::from_millis(self.config.duplicate_sleep_ms);
        let p = self.pipeline.clone();

        if p.control.take_reset() {
            debug!("Detection worker: detector reset");
            self.detector.reset();
        }
        if p.morph_gate.is_loading() {
            return short;
        }

        let input = match p.slot.consume(&p.gpu, p.device.as_ref()) {
            Ok(SlotRead::Ready(input)) => input,
            Ok(SlotRead::Empty) => return idle,
            Ok(SlotRead::Duplicate) => {
                trace!("Detection worker: duplicate frame skipped");
                p.stats.record_duplicate_frame();
                return short;
            }
            Err(e) => {
                warn!("Detection worker: {}", e);
                p.stats.record_detector_error();
                return idle;
            }
        };

        let processed = self.process(&input, &p);
        p.slot.release();
        match processed {
            Ok((faces, triangulation)) => {
                p.ring.publish(&faces, triangulation, input.timestamp);
                p.stats.record_result_published();
            }
            Err(e) => {
                warn!("Detection worker: detector failed: {}", e);
                p.stats.record_detector_error();
            }
        }

        Duration::from_millis(self.config.speed_limit_ms).saturating_sub(started.elapsed())
    }

    fn process(
        &mut self,
        input: &DetectionInput,
        p: &DetectionPipeline,
    ) -> Result<(DetectionResults, Triangulation)> {
        let mut faces = self.detector.detect(&input.image)?;
        p.stats.record_detection();
        faces.truncate(self.config.max_faces);

        self.detector.landmarks(&input.image, &mut faces)?;
        self.detector.pose(&mut faces)?;

        let triangulation = {
            let _gate = p.morph_gate.enter();
            self.detector
                .triangulate(&input.morph, &faces, p.control.build_lines())?
        };
        Ok((faces, triangulation))
    }
}
