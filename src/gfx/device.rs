//! Graphics device interface
//!
//! The drawing itself lives outside this crate. The pipeline only needs to
//! create, copy, stage and destroy a handful of GPU objects, and to hand draw
//! calls to the device. All methods that create or destroy objects must be
//! called inside the [`GraphicsContext`](super::GraphicsContext).

use std::path::Path;

use glam::Mat4;

use crate::error::Result;

/// Opaque GPU object id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawHandle(pub u64);

/// Texture / render target color format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorFormat {
    Rgba8,
    R8,
}

impl ColorFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            ColorFormat::Rgba8 => 4,
            ColorFormat::R8 => 1,
        }
    }
}

/// One textured draw of overlay geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawCall {
    pub effect: RawHandle,
    pub texture: Option<RawHandle>,
    pub transform: Mat4,
    pub vertex_count: usize,
    pub alpha: f32,
}

/// GPU collaborator used by the pipeline.
pub trait GraphicsDevice: Send + Sync {
    /// Create an uninitialised texture.
    fn create_texture(&self, width: u32, height: u32, format: ColorFormat) -> Result<RawHandle>;

    /// Create a texture initialised with `pixels` (tightly packed rows).
    fn create_texture_with_data(
        &self,
        width: u32,
        height: u32,
        format: ColorFormat,
        pixels: &[u8],
    ) -> Result<RawHandle>;

    /// Create a texture from an image file on disk.
    fn create_texture_from_file(&self, path: &Path) -> Result<RawHandle>;

    /// Compile an effect (shader program) from source.
    fn create_effect(&self, name: &str, source: &str) -> Result<RawHandle>;

    /// Dimensions of a live texture.
    fn texture_size(&self, texture: RawHandle) -> Option<(u32, u32)>;

    /// Copy `src` into `dst`. Both must have the same dimensions.
    fn copy_texture(&self, dst: RawHandle, src: RawHandle) -> Result<()>;

    /// Render `src` scaled to `width`x`height`, stage it and map it back as
    /// 8-bit luma rows (stride == width).
    fn downscale_to_luma(&self, src: RawHandle, width: u32, height: u32) -> Result<Vec<u8>>;

    /// Create an offscreen render target.
    fn create_render_target(&self, format: ColorFormat) -> Result<RawHandle>;

    /// Begin a pass into `target`. Returns false if the device refused.
    fn begin_render(&self, target: RawHandle, width: u32, height: u32) -> bool;

    /// End the pass started by `begin_render`.
    fn end_render(&self, target: RawHandle);

    /// Submit one draw call into the current pass.
    fn draw(&self, call: &DrawCall);

    /// Destroy any object created by this device.
    fn destroy(&self, handle: RawHandle);
}
