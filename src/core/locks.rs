//! Mutex helpers that recover from poisoning
//!
//! A panic caught inside a worker loop may leave a mutex poisoned. The data
//! behind every pipeline lock stays consistent at each statement boundary, so
//! the guard is simply taken over.

use std::sync::{Mutex, MutexGuard, TryLockError};

/// Blocking lock. Only for threads that are allowed to wait.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Non-blocking lock. None means "busy, skip this step".
pub fn try_lock<T>(mutex: &Mutex<T>) -> Option<MutexGuard<'_, T>> {
    match mutex.try_lock() {
        Ok(guard) => Some(guard),
        Err(TryLockError::Poisoned(e)) => Some(e.into_inner()),
        Err(TryLockError::WouldBlock) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_try_lock_reports_contention() {
        let m = Mutex::new(1);
        let held = lock(&m);
        assert!(try_lock(&m).is_none());
        drop(held);
        assert_eq!(*try_lock(&m).unwrap(), 1);
    }

    #[test]
    fn test_poisoned_mutex_is_recovered() {
        let m = Arc::new(Mutex::new(5));
        let m2 = Arc::clone(&m);
        let _ = thread::spawn(move || {
            let _g = m2.lock().unwrap();
            panic!("poison it");
        })
        .join();
        assert!(m.is_poisoned());
        assert_eq!(*lock(&m), 5);
        assert_eq!(*try_lock(&m).unwrap(), 5);
    }
}
