//! Cache-backed texture wrapper

use std::path::Path;
use std::sync::Arc;

use super::{cached_or_create, ColorFormat, GraphicsDevice, GraphicsGuard, RawHandle};
use crate::core::resource_cache::{CacheableKind, ResourceCache, ResourceHandle};
use crate::error::Result;

/// Name of the permanent 1x1 white texture registered by the filter.
pub const FALLBACK_TEXTURE: &str = "__fallback_white";

/// Texture shared through the [`ResourceCache`].
///
/// Dropping releases one cache reference. Drop it inside the GPU context.
#[derive(Debug)]
pub struct Texture {
    name: String,
    handle: ResourceHandle,
    cache: Arc<ResourceCache>,
}

impl Texture {
    /// Load from an image file; the path is the cache key.
    pub fn from_file(
        path: &Path,
        _gpu: &GraphicsGuard<'_>,
        device: &Arc<dyn GraphicsDevice>,
        cache: &Arc<ResourceCache>,
    ) -> Result<Self> {
        let name = path.to_string_lossy().into_owned();
        let handle = cached_or_create(CacheableKind::Texture, &name, device, cache, || {
            device.create_texture_from_file(path)
        })?;
        Ok(Self { name, handle, cache: Arc::clone(cache) })
    }

    /// Create (or reuse) a named blank texture.
    pub fn named(
        name: &str,
        width: u32,
        height: u32,
        format: ColorFormat,
        _gpu: &GraphicsGuard<'_>,
        device: &Arc<dyn GraphicsDevice>,
        cache: &Arc<ResourceCache>,
    ) -> Result<Self> {
        let handle = cached_or_create(CacheableKind::Texture, name, device, cache, || {
            device.create_texture(width, height, format)
        })?;
        Ok(Self { name: name.to_string(), handle, cache: Arc::clone(cache) })
    }

    /// Take a reference on the permanent fallback texture, if registered.
    pub fn fallback(cache: &Arc<ResourceCache>) -> Option<Self> {
        cache
            .load(CacheableKind::Texture, FALLBACK_TEXTURE)
            .map(|handle| Self { name: FALLBACK_TEXTURE.to_string(), handle, cache: Arc::clone(cache) })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn raw(&self) -> RawHandle {
        self.handle.raw()
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        self.cache
            .try_destroy_resource(&self.name, &self.handle, CacheableKind::Texture);
    }
}
