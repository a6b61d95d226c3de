//! In-memory graphics device
//!
//! Keeps textures as CPU pixel buffers and counts everything else. Used by the
//! host binary and by tests to observe what the pipeline does with the GPU:
//! live handles, draw calls, and calls made outside the GPU context.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::{trace, warn};

use super::context::GraphicsContext;
use super::device::{ColorFormat, DrawCall, GraphicsDevice, RawHandle};
use crate::error::{MaskError, Result};

#[derive(Debug)]
enum Object {
    Texture {
        width: u32,
        height: u32,
        format: ColorFormat,
        pixels: Vec<u8>,
    },
    Effect {
        name: String,
    },
    RenderTarget {
        rendering: bool,
    },
}

/// Headless [`GraphicsDevice`] backed by CPU memory.
#[derive(Debug)]
pub struct HeadlessDevice {
    ctx: Arc<GraphicsContext>,
    next_id: AtomicU64,
    objects: Mutex<HashMap<RawHandle, Object>>,
    draw_calls: AtomicU64,
    destroyed: AtomicU64,
    double_destroys: AtomicU64,
    context_violations: AtomicU64,
}

impl HeadlessDevice {
    pub fn new(ctx: Arc<GraphicsContext>) -> Self {
        Self {
            ctx,
            next_id: AtomicU64::new(1),
            objects: Mutex::new(HashMap::new()),
            draw_calls: AtomicU64::new(0),
            destroyed: AtomicU64::new(0),
            double_destroys: AtomicU64::new(0),
            context_violations: AtomicU64::new(0),
        }
    }

    /// Upload an RGBA8 frame (the host's "source texture").
    pub fn upload_rgba(&self, width: u32, height: u32, pixels: Vec<u8>) -> Result<RawHandle> {
        self.create_texture_with_data(width, height, ColorFormat::Rgba8, &pixels)
    }

    /// Replace the pixels of an existing RGBA8 texture in place.
    pub fn write_rgba(&self, texture: RawHandle, pixels: &[u8]) -> Result<()> {
        let mut objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        match objects.get_mut(&texture) {
            Some(Object::Texture { pixels: dst, .. }) if dst.len() == pixels.len() => {
                dst.copy_from_slice(pixels);
                Ok(())
            }
            _ => Err(MaskError::Gpu(format!("write to invalid texture {:?}", texture))),
        }
    }

    /// Number of objects currently alive.
    pub fn live_objects(&self) -> usize {
        self.objects.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_live(&self, handle: RawHandle) -> bool {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&handle)
    }

    /// Name an effect was compiled with.
    pub fn effect_name(&self, handle: RawHandle) -> Option<String> {
        match self.objects.lock().unwrap_or_else(|e| e.into_inner()).get(&handle) {
            Some(Object::Effect { name }) => Some(name.clone()),
            _ => None,
        }
    }

    pub fn draw_calls(&self) -> u64 {
        self.draw_calls.load(Ordering::Relaxed)
    }

    pub fn destroyed(&self) -> u64 {
        self.destroyed.load(Ordering::Relaxed)
    }

    pub fn double_destroys(&self) -> u64 {
        self.double_destroys.load(Ordering::Relaxed)
    }

    /// Creation/destruction calls made without holding the GPU context.
    pub fn context_violations(&self) -> u64 {
        self.context_violations.load(Ordering::Relaxed)
    }

    fn insert(&self, object: Object) -> RawHandle {
        let handle = RawHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        trace!("HeadlessDevice: create {:?} {:?}", handle, object_kind(&object));
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(handle, object);
        handle
    }

    fn check_context(&self, op: &str) {
        if !self.ctx.is_held_by_current_thread() {
            warn!("HeadlessDevice: {} called outside the GPU context", op);
            self.context_violations.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn object_kind(object: &Object) -> &'static str {
    match object {
        Object::Texture { .. } => "texture",
        Object::Effect { .. } => "effect",
        Object::RenderTarget { .. } => "render target",
    }
}

impl GraphicsDevice for HeadlessDevice {
    fn create_texture(&self, width: u32, height: u32, format: ColorFormat) -> Result<RawHandle> {
        if width == 0 || height == 0 {
            return Err(MaskError::Gpu(format!("invalid texture size {}x{}", width, height)));
        }
        self.check_context("create_texture");
        let len = width as usize * height as usize * format.bytes_per_pixel();
        Ok(self.insert(Object::Texture {
            width,
            height,
            format,
            pixels: vec![0u8; len],
        }))
    }

    fn create_texture_with_data(
        &self,
        width: u32,
        height: u32,
        format: ColorFormat,
        pixels: &[u8],
    ) -> Result<RawHandle> {
        let expected = width as usize * height as usize * format.bytes_per_pixel();
        if width == 0 || height == 0 || pixels.len() != expected {
            return Err(MaskError::Gpu(format!(
                "upload size mismatch: {} bytes for {}x{} {:?}",
                pixels.len(),
                width,
                height,
                format
            )));
        }
        self.check_context("create_texture_with_data");
        Ok(self.insert(Object::Texture {
            width,
            height,
            format,
            pixels: pixels.to_vec(),
        }))
    }

    fn create_texture_from_file(&self, path: &Path) -> Result<RawHandle> {
        self.check_context("create_texture_from_file");
        let bytes = std::fs::read(path).map_err(|e| MaskError::io(path, e))?;
        // No decoder here: the file becomes a 1x1 texture tinted by its first bytes
        let mut pixel = [255u8; 4];
        for (dst, src) in pixel.iter_mut().zip(bytes.iter()) {
            *dst = *src;
        }
        Ok(self.insert(Object::Texture {
            width: 1,
            height: 1,
            format: ColorFormat::Rgba8,
            pixels: pixel.to_vec(),
        }))
    }

    fn create_effect(&self, name: &str, source: &str) -> Result<RawHandle> {
        self.check_context("create_effect");
        if source.trim().is_empty() {
            return Err(MaskError::Gpu(format!("effect '{}' has no source", name)));
        }
        Ok(self.insert(Object::Effect { name: name.to_string() }))
    }

    fn texture_size(&self, texture: RawHandle) -> Option<(u32, u32)> {
        match self.objects.lock().unwrap_or_else(|e| e.into_inner()).get(&texture) {
            Some(Object::Texture { width, height, .. }) => Some((*width, *height)),
            _ => None,
        }
    }

    fn copy_texture(&self, dst: RawHandle, src: RawHandle) -> Result<()> {
        let mut objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        let (src_w, src_h, src_pixels) = match objects.get(&src) {
            Some(Object::Texture { width, height, pixels, .. }) => (*width, *height, pixels.clone()),
            _ => return Err(MaskError::Gpu(format!("copy from invalid texture {:?}", src))),
        };
        match objects.get_mut(&dst) {
            Some(Object::Texture { width, height, pixels, .. })
                if *width == src_w && *height == src_h && pixels.len() == src_pixels.len() =>
            {
                pixels.copy_from_slice(&src_pixels);
                Ok(())
            }
            _ => Err(MaskError::Gpu(format!("copy into incompatible texture {:?}", dst))),
        }
    }

    fn downscale_to_luma(&self, src: RawHandle, width: u32, height: u32) -> Result<Vec<u8>> {
        if width == 0 || height == 0 {
            return Err(MaskError::Gpu(format!("invalid staging size {}x{}", width, height)));
        }
        let objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        let Some(Object::Texture { width: sw, height: sh, format, pixels }) = objects.get(&src) else {
            return Err(MaskError::Gpu(format!("stage from invalid texture {:?}", src)));
        };
        let bpp = format.bytes_per_pixel();
        let mut out = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            let sy = (y as u64 * *sh as u64 / height as u64) as usize;
            for x in 0..width {
                let sx = (x as u64 * *sw as u64 / width as u64) as usize;
                let i = (sy * *sw as usize + sx) * bpp;
                let luma = match format {
                    ColorFormat::R8 => pixels[i],
                    ColorFormat::Rgba8 => {
                        let (r, g, b) = (pixels[i] as u32, pixels[i + 1] as u32, pixels[i + 2] as u32);
                        ((r * 77 + g * 150 + b * 29) >> 8) as u8
                    }
                };
                out.push(luma);
            }
        }
        Ok(out)
    }

    fn create_render_target(&self, _format: ColorFormat) -> Result<RawHandle> {
        self.check_context("create_render_target");
        Ok(self.insert(Object::RenderTarget { rendering: false }))
    }

    fn begin_render(&self, target: RawHandle, width: u32, height: u32) -> bool {
        if width == 0 || height == 0 {
            return false;
        }
        let mut objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        match objects.get_mut(&target) {
            Some(Object::RenderTarget { rendering }) if !*rendering => {
                *rendering = true;
                true
            }
            _ => false,
        }
    }

    fn end_render(&self, target: RawHandle) {
        let mut objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(Object::RenderTarget { rendering }) = objects.get_mut(&target) {
            *rendering = false;
        }
    }

    fn draw(&self, call: &DrawCall) {
        trace!(
            "HeadlessDevice: draw effect={:?} texture={:?} verts={} alpha={:.2}",
            call.effect,
            call.texture,
            call.vertex_count,
            call.alpha
        );
        self.draw_calls.fetch_add(1, Ordering::Relaxed);
    }

    fn destroy(&self, handle: RawHandle) {
        self.check_context("destroy");
        let removed = self
            .objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&handle);
        match removed {
            Some(object) => {
                trace!("HeadlessDevice: destroy {:?} {}", handle, object_kind(&object));
                self.destroyed.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                warn!("HeadlessDevice: double destroy of {:?}", handle);
                self.double_destroys.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
