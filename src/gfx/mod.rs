//! Graphics collaborator: scoped GPU context, device interface and the
//! cache-aware wrappers scenes build their GPU objects with.

pub mod context;
pub mod device;
pub mod effect;
pub mod headless;
pub mod render_target;
pub mod texture;

pub use context::{GraphicsContext, GraphicsGuard};
pub use device::{ColorFormat, DrawCall, GraphicsDevice, RawHandle};
pub use effect::Effect;
pub use headless::HeadlessDevice;
pub use render_target::{RenderTarget, RenderTargetOp};
pub use texture::Texture;

use std::sync::Arc;

use log::warn;

use crate::core::resource_cache::{CacheableKind, ResourceCache, ResourceHandle};
use crate::error::Result;

/// Resolve `name` through the cache, building it with `create` on a miss.
///
/// A lost `add()` race is logged and the freshly built handle is kept: it
/// stays valid and is destroyed independently when its wrapper drops.
pub(crate) fn cached_or_create(
    kind: CacheableKind,
    name: &str,
    device: &Arc<dyn GraphicsDevice>,
    cache: &ResourceCache,
    create: impl FnOnce() -> Result<RawHandle>,
) -> Result<ResourceHandle> {
    if let Some(handle) = cache.load(kind, name) {
        return Ok(handle);
    }
    let handle = ResourceHandle::from_device(create()?, device);
    if !cache.add(kind, name, handle.clone()) {
        warn!("Caching {:?} '{}' failed, keeping own copy", kind, name);
    }
    Ok(handle)
}
