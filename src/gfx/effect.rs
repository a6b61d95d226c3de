//! Cache-backed effect (compiled shader program) wrapper

use std::path::Path;
use std::sync::Arc;

use super::{cached_or_create, GraphicsDevice, GraphicsGuard, RawHandle};
use crate::core::resource_cache::{CacheableKind, ResourceCache, ResourceHandle};
use crate::error::{MaskError, Result};

/// Name of the permanent default effect registered by the filter.
pub const DEFAULT_EFFECT: &str = "__default";

/// Source of the built-in default effect.
pub const DEFAULT_EFFECT_SOURCE: &str = "technique Draw { pass { vertex_shader = VSDefault(); pixel_shader = PSDrawBare(); } }";

/// Effect shared through the [`ResourceCache`].
#[derive(Debug)]
pub struct Effect {
    name: String,
    handle: ResourceHandle,
    cache: Arc<ResourceCache>,
}

impl Effect {
    /// Compile from an effect file; the path is the cache key.
    pub fn from_file(
        path: &Path,
        gpu: &GraphicsGuard<'_>,
        device: &Arc<dyn GraphicsDevice>,
        cache: &Arc<ResourceCache>,
    ) -> Result<Self> {
        let name = path.to_string_lossy().into_owned();
        if let Some(handle) = cache.load(CacheableKind::Effect, &name) {
            return Ok(Self { name, handle, cache: Arc::clone(cache) });
        }
        let source = std::fs::read_to_string(path).map_err(|e| MaskError::io(path, e))?;
        Self::from_source(&name, &source, gpu, device, cache)
    }

    /// Compile from in-memory source under `name`.
    pub fn from_source(
        name: &str,
        source: &str,
        _gpu: &GraphicsGuard<'_>,
        device: &Arc<dyn GraphicsDevice>,
        cache: &Arc<ResourceCache>,
    ) -> Result<Self> {
        let handle = cached_or_create(CacheableKind::Effect, name, device, cache, || {
            device.create_effect(name, source)
        })?;
        Ok(Self { name: name.to_string(), handle, cache: Arc::clone(cache) })
    }

    /// Take a reference on the permanent default effect, if registered.
    pub fn default_effect(cache: &Arc<ResourceCache>) -> Option<Self> {
        cache
            .load(CacheableKind::Effect, DEFAULT_EFFECT)
            .map(|handle| Self { name: DEFAULT_EFFECT.to_string(), handle, cache: Arc::clone(cache) })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn raw(&self) -> RawHandle {
        self.handle.raw()
    }
}

impl Drop for Effect {
    fn drop(&mut self) {
        self.cache
            .try_destroy_resource(&self.name, &self.handle, CacheableKind::Effect);
    }
}
