//! Reference-counted GPU resource cache shared by all loaded scenes
//!
//! Key: `(CacheableKind, name)` -> type-erased handle + destructor.
//!
//! - `load()` is a lookup that bumps the refcount on hit
//! - `add()` registers a freshly built resource; losing a race is not an error,
//!   the loser keeps (and later destroys) its own handle
//! - `try_destroy_resource()` drops one reference, destroying at zero unless
//!   the entry is permanent
//! - `destroy()` flushes everything at instance teardown
//!
//! All mutation happens under one internal lock. Destructors run after the
//! lock is released so a device call never nests inside the cache lock.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use log::{debug, trace, warn};

use crate::gfx::{GraphicsDevice, RawHandle};

/// Resource families sharing the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheableKind {
    Effect,
    Texture,
}

/// Destroys a raw handle on the device that created it.
pub type Destructor = Arc<dyn Fn(RawHandle) + Send + Sync>;

/// GPU handle plus the capability to destroy it.
#[derive(Clone)]
pub struct ResourceHandle {
    raw: RawHandle,
    destructor: Destructor,
}

impl ResourceHandle {
    pub fn new(raw: RawHandle, destructor: Destructor) -> Self {
        Self { raw, destructor }
    }

    /// Handle whose destructor calls `device.destroy()`.
    pub fn from_device(raw: RawHandle, device: &Arc<dyn GraphicsDevice>) -> Self {
        let device = Arc::clone(device);
        Self::new(raw, Arc::new(move |handle| device.destroy(handle)))
    }

    pub fn raw(&self) -> RawHandle {
        self.raw
    }

    fn destroy(&self) {
        (self.destructor)(self.raw);
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle").field("raw", &self.raw).finish_non_exhaustive()
    }
}

/// Cache statistics for monitoring reuse
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    collisions: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_collision(&self) {
        self.collisions.fetch_add(1, Ordering::Relaxed);
    }

    fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// `add()` calls that lost to an existing entry
    pub fn collisions(&self) -> u64 {
        self.collisions.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 { 0.0 } else { self.hits() as f64 / total as f64 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    kind: CacheableKind,
    name: String,
}

impl CacheKey {
    fn new(kind: CacheableKind, name: &str) -> Self {
        Self { kind, name: name.to_string() }
    }
}

#[derive(Debug)]
struct CacheEntry {
    handle: ResourceHandle,
    refcount: usize,
    permanent: bool,
}

#[derive(Debug, Default)]
struct CacheInner {
    /// Insertion order kept so `destroy()` can tear down newest-first
    entries: IndexMap<CacheKey, CacheEntry>,
    /// Raw handles already destroyed by `destroy()`; every late wrapper drop skips them
    retired: HashSet<RawHandle>,
}

/// Resource cache shared by every scene of one filter instance.
#[derive(Debug, Default)]
pub struct ResourceCache {
    inner: Mutex<CacheInner>,
    stats: CacheStats,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a resource, taking a reference on hit.
    pub fn load(&self, kind: CacheableKind, name: &str) -> Option<ResourceHandle> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.entries.get_mut(&CacheKey::new(kind, name)) {
            Some(entry) => {
                entry.refcount += 1;
                self.stats.record_hit();
                trace!("Cache hit {:?} '{}' (refcount {})", kind, name, entry.refcount);
                Some(entry.handle.clone())
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    /// Register a freshly constructed resource with one reference.
    ///
    /// Returns false if the key is already present. The existing entry is kept
    /// and the caller still owns (and must eventually destroy) `handle`.
    pub fn add(&self, kind: CacheableKind, name: &str, handle: ResourceHandle) -> bool {
        self.insert(kind, name, handle, false)
    }

    /// Register a resource that survives refcount zero until `destroy()`.
    pub fn add_permanent(&self, kind: CacheableKind, name: &str, handle: ResourceHandle) -> bool {
        self.insert(kind, name, handle, true)
    }

    fn insert(&self, kind: CacheableKind, name: &str, handle: ResourceHandle, permanent: bool) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let key = CacheKey::new(kind, name);
        if inner.entries.contains_key(&key) {
            self.stats.record_collision();
            debug!("Cache add lost race for {:?} '{}', caller keeps {:?}", kind, name, handle.raw());
            return false;
        }
        inner.retired.remove(&handle.raw());
        let refcount = if permanent { 0 } else { 1 };
        debug!(
            "Cached {:?} '{}' -> {:?}{}",
            kind,
            name,
            handle.raw(),
            if permanent { " (permanent)" } else { "" }
        );
        inner.entries.insert(key, CacheEntry { handle, refcount, permanent });
        true
    }

    /// Release one reference held by an owning wrapper.
    ///
    /// - Cached handle: refcount drops; at zero a non-permanent entry is
    ///   removed and destroyed
    /// - Handle that lost the `add()` race: destroyed directly, the cached
    ///   entry is untouched
    /// - Handle already flushed by `destroy()`: nothing to do
    pub fn try_destroy_resource(&self, name: &str, handle: &ResourceHandle, kind: CacheableKind) {
        let to_destroy = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let key = CacheKey::new(kind, name);
            let cached_raw = inner.entries.get(&key).map(|e| e.handle.raw());

            if cached_raw == Some(handle.raw()) {
                let Some(entry) = inner.entries.get_mut(&key) else {
                    return;
                };
                entry.refcount = entry.refcount.saturating_sub(1);
                trace!("Cache release {:?} '{}' (refcount {})", kind, name, entry.refcount);
                if entry.refcount == 0 && !entry.permanent {
                    self.stats.record_eviction();
                    inner.entries.shift_remove(&key).map(|e| e.handle)
                } else {
                    None
                }
            } else if inner.retired.contains(&handle.raw()) {
                None
            } else {
                Some(handle.clone())
            }
        };

        if let Some(handle) = to_destroy {
            debug!("Destroying {:?} '{}' ({:?})", kind, name, handle.raw());
            handle.destroy();
        }
    }

    /// Flush every entry regardless of refcount or permanence.
    ///
    /// Call once at instance teardown while holding the GPU context.
    /// A second call finds nothing and returns 0.
    pub fn destroy(&self) -> usize {
        let drained: Vec<(CacheKey, CacheEntry)> = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let drained: Vec<_> = inner.entries.drain(..).collect();
            for (_, entry) in &drained {
                inner.retired.insert(entry.handle.raw());
            }
            drained
        };

        if drained.is_empty() {
            return 0;
        }

        for (key, entry) in drained.iter().rev() {
            if entry.refcount > 0 {
                warn!(
                    "Flushing {:?} '{}' with {} live reference(s)",
                    key.kind, key.name, entry.refcount
                );
            }
            entry.handle.destroy();
        }
        debug!("Resource cache flushed: {} entries", drained.len());
        drained.len()
    }

    /// Current refcount of an entry (None if not cached).
    pub fn refcount(&self, kind: CacheableKind, name: &str) -> Option<usize> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entries.get(&CacheKey::new(kind, name)).map(|e| e.refcount)
    }

    pub fn is_permanent(&self, kind: CacheableKind, name: &str) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .entries
            .get(&CacheKey::new(kind, name))
            .map(|e| e.permanent)
            .unwrap_or(false)
    }

    pub fn contains(&self, kind: CacheableKind, name: &str) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entries.contains_key(&CacheKey::new(kind, name))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    /// Handle whose destructor records what it destroyed
    fn tracked(raw: u64, log: &Arc<Mutex<Vec<RawHandle>>>) -> ResourceHandle {
        let log = Arc::clone(log);
        ResourceHandle::new(
            RawHandle(raw),
            Arc::new(move |h| log.lock().unwrap().push(h)),
        )
    }

    fn destroyed(log: &Arc<Mutex<Vec<RawHandle>>>) -> Vec<RawHandle> {
        log.lock().unwrap().clone()
    }

    #[test]
    fn test_add_then_load_bumps_refcount_by_one() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let cache = ResourceCache::new();

        assert!(cache.add(CacheableKind::Effect, "phong", tracked(7, &log)));
        assert_eq!(cache.refcount(CacheableKind::Effect, "phong"), Some(1));

        let hit = cache.load(CacheableKind::Effect, "phong").unwrap();
        assert_eq!(hit.raw(), RawHandle(7));
        assert_eq!(cache.refcount(CacheableKind::Effect, "phong"), Some(2));
        assert_eq!(cache.stats().hits(), 1);
    }

    #[test]
    fn test_load_miss_does_not_create() {
        let cache = ResourceCache::new();
        assert!(cache.load(CacheableKind::Texture, "skin").is_none());
        assert!(cache.is_empty());
        assert_eq!(cache.stats().misses(), 1);
    }

    #[test]
    fn test_kinds_are_separate_keys() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let cache = ResourceCache::new();
        assert!(cache.add(CacheableKind::Effect, "default", tracked(1, &log)));
        assert!(cache.add(CacheableKind::Texture, "default", tracked(2, &log)));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_destroyed_exactly_at_zero() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let cache = ResourceCache::new();
        let h = tracked(3, &log);

        cache.add(CacheableKind::Texture, "skin", h.clone());
        let again = cache.load(CacheableKind::Texture, "skin").unwrap();

        cache.try_destroy_resource("skin", &again, CacheableKind::Texture);
        assert!(destroyed(&log).is_empty());
        assert_eq!(cache.refcount(CacheableKind::Texture, "skin"), Some(1));

        cache.try_destroy_resource("skin", &h, CacheableKind::Texture);
        assert_eq!(destroyed(&log), vec![RawHandle(3)]);
        assert!(!cache.contains(CacheableKind::Texture, "skin"));
        assert_eq!(cache.stats().evictions(), 1);
    }

    #[test]
    fn test_permanent_entry_survives_zero() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let cache = ResourceCache::new();
        cache.add_permanent(CacheableKind::Texture, "fallback", tracked(9, &log));
        assert!(cache.is_permanent(CacheableKind::Texture, "fallback"));

        let h = cache.load(CacheableKind::Texture, "fallback").unwrap();
        cache.try_destroy_resource("fallback", &h, CacheableKind::Texture);
        // Extra releases never push refcount below zero or destroy it
        cache.try_destroy_resource("fallback", &h, CacheableKind::Texture);
        cache.try_destroy_resource("fallback", &h, CacheableKind::Texture);

        assert_eq!(cache.refcount(CacheableKind::Texture, "fallback"), Some(0));
        assert!(destroyed(&log).is_empty());
    }

    #[test]
    fn test_losing_add_keeps_caller_handle_independent() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let cache = ResourceCache::new();
        let winner = tracked(10, &log);
        let loser = tracked(11, &log);

        assert!(cache.add(CacheableKind::Effect, "phong", winner.clone()));
        assert!(!cache.add(CacheableKind::Effect, "phong", loser.clone()));
        assert_eq!(cache.stats().collisions(), 1);

        // Loser teardown destroys only its own handle
        cache.try_destroy_resource("phong", &loser, CacheableKind::Effect);
        assert_eq!(destroyed(&log), vec![RawHandle(11)]);
        assert_eq!(cache.refcount(CacheableKind::Effect, "phong"), Some(1));
        assert_eq!(cache.load(CacheableKind::Effect, "phong").unwrap().raw(), RawHandle(10));
    }

    #[test]
    fn test_concurrent_add_exactly_one_wins() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let cache = Arc::new(ResourceCache::new());
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = [100u64, 200u64]
            .into_iter()
            .map(|raw| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                let handle = tracked(raw, &log);
                thread::spawn(move || {
                    barrier.wait();
                    (raw, cache.add(CacheableKind::Effect, "phong", handle))
                })
            })
            .collect();

        let results: Vec<(u64, bool)> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners: Vec<u64> = results.iter().filter(|(_, ok)| *ok).map(|(raw, _)| *raw).collect();
        assert_eq!(winners.len(), 1);

        let resolved = cache.load(CacheableKind::Effect, "phong").unwrap();
        assert_eq!(resolved.raw(), RawHandle(winners[0]));

        let loser_raw = results.iter().find(|(_, ok)| !*ok).map(|(raw, _)| *raw).unwrap();
        let loser = tracked(loser_raw, &log);
        cache.try_destroy_resource("phong", &loser, CacheableKind::Effect);
        assert_eq!(destroyed(&log), vec![RawHandle(loser_raw)]);
    }

    #[test]
    fn test_destroy_flushes_everything_and_is_idempotent() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let cache = ResourceCache::new();
        cache.add(CacheableKind::Effect, "phong", tracked(1, &log));
        cache.add_permanent(CacheableKind::Texture, "fallback", tracked(2, &log));

        assert_eq!(cache.destroy(), 2);
        assert!(cache.is_empty());
        // Newest first
        assert_eq!(destroyed(&log), vec![RawHandle(2), RawHandle(1)]);

        assert_eq!(cache.destroy(), 0);
        assert_eq!(destroyed(&log).len(), 2);
    }

    #[test]
    fn test_release_after_flush_is_noop() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let cache = ResourceCache::new();
        let h = tracked(5, &log);
        cache.add(CacheableKind::Texture, "skin", h.clone());
        cache.destroy();

        cache.try_destroy_resource("skin", &h, CacheableKind::Texture);
        assert_eq!(destroyed(&log), vec![RawHandle(5)]);
    }

    #[test]
    fn test_many_releases_after_flush_destroy_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let cache = ResourceCache::new();
        let h = tracked(5, &log);
        cache.add(CacheableKind::Texture, "skin", h.clone());
        let second = cache.load(CacheableKind::Texture, "skin").unwrap();
        let third = cache.load(CacheableKind::Texture, "skin").unwrap();
        cache.destroy();

        cache.try_destroy_resource("skin", &h, CacheableKind::Texture);
        cache.try_destroy_resource("skin", &second, CacheableKind::Texture);
        cache.try_destroy_resource("skin", &third, CacheableKind::Texture);
        assert_eq!(destroyed(&log), vec![RawHandle(5)]);
    }

    #[test]
    fn test_permanent_wrappers_released_after_flush_destroy_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let cache = ResourceCache::new();
        cache.add_permanent(CacheableKind::Texture, "fallback", tracked(9, &log));
        let a = cache.load(CacheableKind::Texture, "fallback").unwrap();
        let b = cache.load(CacheableKind::Texture, "fallback").unwrap();
        cache.destroy();

        cache.try_destroy_resource("fallback", &a, CacheableKind::Texture);
        cache.try_destroy_resource("fallback", &b, CacheableKind::Texture);
        assert_eq!(destroyed(&log), vec![RawHandle(9)]);
    }
}
