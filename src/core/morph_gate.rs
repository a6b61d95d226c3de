//! Exclusion between applying detection results and (re)building morph data
//!
//! The loader holds the gate for a whole scene load and raises `loading` so
//! the detection worker backs off early instead of queueing on the lock.
//! The render thread only ever try-locks it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::locks::{lock, try_lock};

#[derive(Debug, Default)]
pub struct MorphGate {
    lock: Mutex<()>,
    loading: AtomicBool,
}

/// Held by the loader while a scene is being built.
#[derive(Debug)]
pub struct LoadingGuard<'a> {
    gate: &'a MorphGate,
    _lock: MutexGuard<'a, ()>,
}

impl MorphGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the loading flag, then take the gate (blocking).
    pub fn begin_loading(&self) -> LoadingGuard<'_> {
        self.loading.store(true, Ordering::Release);
        LoadingGuard { gate: self, _lock: lock(&self.lock) }
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    /// Blocking acquisition for the detection worker.
    pub fn enter(&self) -> MutexGuard<'_, ()> {
        lock(&self.lock)
    }

    /// Non-blocking acquisition for the render thread.
    pub fn try_enter(&self) -> Option<MutexGuard<'_, ()>> {
        try_lock(&self.lock)
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.gate.loading.store(false, Ordering::Release);
    }
}
