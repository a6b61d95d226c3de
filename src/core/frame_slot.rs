//! Single-slot frame hand-off from the render thread to the detection worker
//!
//! The render thread publishes at most one frame per video tick, and only
//! while the slot is idle. The worker stages the captured frame into a small
//! luma image, runs the detector on it, then releases the slot. While a frame
//! is "active" the render thread drops new frames instead of waiting.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use log::{debug, trace, warn};
use once_cell::sync::Lazy;

use super::locks::{lock, try_lock};
use crate::detect::{DetectImage, MorphData};
use crate::error::{MaskError, Result};
use crate::gfx::{ColorFormat, GraphicsContext, GraphicsDevice, GraphicsGuard, RawHandle};

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);
static LAST_TIMESTAMP: AtomicU64 = AtomicU64::new(0);

/// Frame timestamp in nanoseconds on a process-wide monotonic clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Strictly greater than every timestamp previously returned.
    pub fn now() -> Self {
        let t = EPOCH.elapsed().as_nanos() as u64;
        let prev = match LAST_TIMESTAMP.fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
            Some(t.max(last + 1))
        }) {
            Ok(prev) | Err(prev) => prev,
        };
        Self(t.max(prev + 1))
    }

    pub fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub fn as_nanos(self) -> u64 {
        self.0
    }
}

/// What to do with the slot's morph snapshot on publish.
#[derive(Debug, Clone, Copy)]
pub enum MorphHint<'a> {
    /// Scene state unavailable this tick: leave the snapshot as is
    Keep,
    /// No morphable scene is active
    Invalidate,
    /// Morph data of the active scene
    Update(&'a MorphData),
}

/// Everything the detector needs for one frame.
#[derive(Debug, Clone)]
pub struct DetectionInput {
    pub image: DetectImage,
    pub morph: MorphData,
    pub timestamp: Timestamp,
}

/// Outcome of [`FrameSlot::consume`].
#[derive(Debug)]
pub enum SlotRead {
    Ready(DetectionInput),
    /// Nothing published (or slot busy)
    Empty,
    /// Same timestamp as the last consumed frame; slot was released
    Duplicate,
}

#[derive(Debug, Default)]
struct SlotState {
    capture: Option<RawHandle>,
    width: u32,
    height: u32,
    resize_width: u32,
    resize_height: u32,
    morph: MorphData,
    timestamp: Option<Timestamp>,
    last_consumed: Option<Timestamp>,
    active: bool,
}

#[derive(Debug, Default)]
pub struct FrameSlot {
    state: Mutex<SlotState>,
    ticked: AtomicBool,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called from the video tick: allows one publication attempt.
    pub fn mark_ticked(&self) {
        self.ticked.store(true, Ordering::Release);
    }

    pub fn is_ticked(&self) -> bool {
        self.ticked.load(Ordering::Acquire)
    }

    /// Copy `source` into the slot for the detection worker.
    ///
    /// Returns false when the frame is not published: no tick since the last
    /// attempt, slot locked or still active, or the copy failed. Never blocks.
    pub fn publish(
        &self,
        _gpu: &GraphicsGuard<'_>,
        device: &dyn GraphicsDevice,
        source: RawHandle,
        morph: MorphHint<'_>,
        timestamp: Timestamp,
        detect_width: u32,
    ) -> bool {
        if !self.ticked.swap(false, Ordering::AcqRel) {
            return false;
        }
        let Some(mut state) = try_lock(&self.state) else {
            trace!("FrameSlot: busy, frame dropped");
            return false;
        };
        if state.active {
            trace!("FrameSlot: still active, frame dropped");
            return false;
        }
        let Some((width, height)) = device.texture_size(source) else {
            warn!("FrameSlot: source {:?} is not a texture", source);
            return false;
        };
        if width == 0 || height == 0 {
            warn!("FrameSlot: source {:?} is empty ({}x{})", source, width, height);
            return false;
        }

        if state.capture.is_none() || state.width != width || state.height != height {
            if let Some(old) = state.capture.take() {
                device.destroy(old);
            }
            match device.create_texture(width, height, ColorFormat::Rgba8) {
                Ok(capture) => {
                    debug!("FrameSlot: capture texture {}x{} -> {:?}", width, height, capture);
                    state.capture = Some(capture);
                    state.width = width;
                    state.height = height;
                }
                Err(e) => {
                    warn!("FrameSlot: cannot create capture texture: {}", e);
                    return false;
                }
            }
        }

        let Some(capture) = state.capture else {
            return false;
        };
        if let Err(e) = device.copy_texture(capture, source) {
            warn!("FrameSlot: copy failed: {}", e);
            return false;
        }

        state.resize_width = detect_width.min(width).max(1);
        state.resize_height =
            ((height as u64 * state.resize_width as u64) / width as u64).max(1) as u32;

        match morph {
            MorphHint::Keep => {}
            MorphHint::Invalidate => state.morph.invalidate(),
            MorphHint::Update(data) => {
                // Versions are unique per build, so any mismatch means a rebuild
                // or a switch to another scene (demo cycling goes back to older ones)
                if data.version() != state.morph.version() || !state.morph.is_valid() {
                    state.morph = data.clone();
                }
            }
        }

        state.timestamp = Some(timestamp);
        state.active = true;
        true
    }

    /// Take the active frame for detection (worker side).
    ///
    /// Enters the GPU context to stage the capture. The slot stays active
    /// until [`release`](Self::release) so the render thread cannot overwrite
    /// the frame while the detector works on it.
    pub fn consume(&self, gpu: &GraphicsContext, device: &dyn GraphicsDevice) -> Result<SlotRead> {
        let Some(mut state) = try_lock(&self.state) else {
            return Ok(SlotRead::Empty);
        };
        if !state.active {
            return Ok(SlotRead::Empty);
        }
        let Some(timestamp) = state.timestamp else {
            state.active = false;
            return Ok(SlotRead::Empty);
        };
        if state.last_consumed == Some(timestamp) {
            state.active = false;
            return Ok(SlotRead::Duplicate);
        }
        let Some(capture) = state.capture else {
            state.active = false;
            return Ok(SlotRead::Empty);
        };

        let (w, h) = (state.resize_width, state.resize_height);
        let staged = {
            let _gpu = gpu.enter();
            device.downscale_to_luma(capture, w, h)
        };
        let pixels = match staged {
            Ok(pixels) => pixels,
            Err(e) => {
                state.active = false;
                return Err(MaskError::Gpu(format!("staging frame failed: {}", e)));
            }
        };

        state.last_consumed = Some(timestamp);
        Ok(SlotRead::Ready(DetectionInput {
            image: DetectImage::new(w, h, pixels),
            morph: state.morph.clone(),
            timestamp,
        }))
    }

    /// Mark the consumed frame done; the render thread may publish again.
    pub fn release(&self) {
        lock(&self.state).active = false;
    }

    /// Forget the pending frame (filter hidden or deactivated).
    ///
    /// If the worker holds the slot right now it releases it itself.
    pub fn reset(&self) {
        if let Some(mut state) = try_lock(&self.state) {
            state.active = false;
            state.timestamp = None;
        }
        self.ticked.store(false, Ordering::Release);
    }

    /// Capture whose timestamp matches `timestamp`, if still in the slot.
    pub fn capture_for(&self, timestamp: Timestamp) -> Option<RawHandle> {
        let state = try_lock(&self.state)?;
        if state.timestamp == Some(timestamp) { state.capture } else { None }
    }

    pub fn is_active(&self) -> bool {
        lock(&self.state).active
    }

    /// Destroy the capture texture (instance teardown).
    ///
    /// Returns false if a worker still holds the slot; its texture is left
    /// behind rather than waiting while inside the GPU context.
    pub fn destroy_capture(&self, _gpu: &GraphicsGuard<'_>, device: &dyn GraphicsDevice) -> bool {
        let Some(mut state) = try_lock(&self.state) else {
            return false;
        };
        if let Some(capture) = state.capture.take() {
            device.destroy(capture);
        }
        true
    }
}
