//! Offscreen render target with a scoped render pass

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{ColorFormat, DrawCall, GraphicsDevice, GraphicsGuard, RawHandle};
use crate::error::Result;

/// Offscreen target owned directly by a filter instance (not cached).
pub struct RenderTarget {
    raw: RawHandle,
    device: Arc<dyn GraphicsDevice>,
    rendering: AtomicBool,
}

impl std::fmt::Debug for RenderTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderTarget")
            .field("raw", &self.raw)
            .field("rendering", &self.rendering.load(Ordering::Relaxed))
            .finish()
    }
}

impl RenderTarget {
    pub fn new(
        format: ColorFormat,
        _gpu: &GraphicsGuard<'_>,
        device: &Arc<dyn GraphicsDevice>,
    ) -> Result<Self> {
        let raw = device.create_render_target(format)?;
        Ok(Self { raw, device: Arc::clone(device), rendering: AtomicBool::new(false) })
    }

    pub fn raw(&self) -> RawHandle {
        self.raw
    }

    pub fn is_rendering(&self) -> bool {
        self.rendering.load(Ordering::Acquire)
    }

    /// Start a pass into this target.
    ///
    /// Returns None if the device refused the pass.
    ///
    /// # Panics
    /// If a pass on this target is already open.
    pub fn begin(&self, width: u32, height: u32) -> Option<RenderTargetOp<'_>> {
        if self.rendering.swap(true, Ordering::AcqRel) {
            panic!("RenderTarget {:?}: begin while a pass is already open", self.raw);
        }
        if !self.device.begin_render(self.raw, width, height) {
            self.rendering.store(false, Ordering::Release);
            return None;
        }
        Some(RenderTargetOp { target: self })
    }

    /// Destroy the underlying GPU object. Must be inside the GPU context.
    pub fn destroy(self, _gpu: &GraphicsGuard<'_>) {
        self.device.destroy(self.raw);
    }
}

/// Open render pass; ends when dropped.
pub struct RenderTargetOp<'a> {
    target: &'a RenderTarget,
}

impl RenderTargetOp<'_> {
    pub fn draw(&self, call: &DrawCall) {
        self.target.device.draw(call);
    }
}

impl Drop for RenderTargetOp<'_> {
    fn drop(&mut self) {
        self.target.device.end_render(self.target.raw);
        self.target.rendering.store(false, Ordering::Release);
    }
}
