//! Scoped, globally exclusive GPU context
//!
//! Every GPU object creation and destruction happens between `enter()` and the
//! drop of the returned guard. Only one thread can be inside at a time.
//! The context is not reentrant: a thread that already holds a guard must pass
//! it down instead of entering again.

use std::sync::{Mutex, MutexGuard, TryLockError};
use std::thread::{self, ThreadId};

/// Globally exclusive graphics context.
#[derive(Debug, Default)]
pub struct GraphicsContext {
    lock: Mutex<()>,
    owner: Mutex<Option<ThreadId>>,
}

/// Proof that the current thread is inside the GPU context.
///
/// Leaving the context = dropping the guard.
#[derive(Debug)]
pub struct GraphicsGuard<'a> {
    ctx: &'a GraphicsContext,
    _lock: MutexGuard<'a, ()>,
}

impl GraphicsContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the context, blocking until it is free.
    pub fn enter(&self) -> GraphicsGuard<'_> {
        let lock = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.set_owner(Some(thread::current().id()));
        GraphicsGuard { ctx: self, _lock: lock }
    }

    /// Enter the context only if nobody else holds it.
    pub fn try_enter(&self) -> Option<GraphicsGuard<'_>> {
        let lock = match self.lock.try_lock() {
            Ok(lock) => lock,
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
            Err(TryLockError::WouldBlock) => return None,
        };
        self.set_owner(Some(thread::current().id()));
        Some(GraphicsGuard { ctx: self, _lock: lock })
    }

    /// True if the calling thread currently holds a guard.
    pub fn is_held_by_current_thread(&self) -> bool {
        *self.owner.lock().unwrap_or_else(|e| e.into_inner()) == Some(thread::current().id())
    }

    /// True if any thread holds a guard.
    pub fn is_held(&self) -> bool {
        self.owner.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    fn set_owner(&self, owner: Option<ThreadId>) {
        *self.owner.lock().unwrap_or_else(|e| e.into_inner()) = owner;
    }
}

impl GraphicsGuard<'_> {
    /// Context this guard belongs to.
    pub fn context(&self) -> &GraphicsContext {
        self.ctx
    }
}

impl Drop for GraphicsGuard<'_> {
    fn drop(&mut self) {
        // Owner cleared before the lock field is released
        self.ctx.set_owner(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_enter_marks_owner() {
        let ctx = GraphicsContext::new();
        assert!(!ctx.is_held());
        {
            let _guard = ctx.enter();
            assert!(ctx.is_held());
            assert!(ctx.is_held_by_current_thread());
        }
        assert!(!ctx.is_held());
        assert!(!ctx.is_held_by_current_thread());
    }

    #[test]
    fn test_try_enter_fails_while_held_elsewhere() {
        let ctx = Arc::new(GraphicsContext::new());
        let guard = ctx.enter();

        let other = Arc::clone(&ctx);
        let entered = thread::spawn(move || {
            let attempt = other.try_enter();
            let held_here = other.is_held_by_current_thread();
            (attempt.is_some(), held_here)
        })
        .join()
        .unwrap();
        assert_eq!(entered, (false, false));

        drop(guard);
        assert!(ctx.try_enter().is_some());
    }
}
