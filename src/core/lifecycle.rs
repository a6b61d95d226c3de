//! Worker threads with cooperative cancellation and a safe-to-join handshake
//!
//! Each worker owns a pair of flags:
//! - `running`: cleared by the owner to request a stop
//! - `destructing`: cleared by the worker as its very last act
//!
//! The owner joins only after observing `destructing == false`, so a join
//! never blocks on a thread that is itself waiting for the GPU context.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, trace, warn};

use crate::error::{MaskError, Result};
use crate::gfx::GraphicsGuard;

/// Request-stop / ack-stopped flag pair.
#[derive(Debug)]
pub struct WorkerFlags {
    running: AtomicBool,
    destructing: AtomicBool,
}

impl Default for WorkerFlags {
    fn default() -> Self {
        Self {
            running: AtomicBool::new(true),
            destructing: AtomicBool::new(true),
        }
    }
}

impl WorkerFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checked by the worker at the top of every loop iteration.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn request_stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// True once the worker acknowledged and left its loop.
    pub fn has_stopped(&self) -> bool {
        !self.destructing.load(Ordering::Acquire)
    }

    fn mark_stopped(&self) {
        self.destructing.store(false, Ordering::Release);
    }
}

/// Clears `destructing` however the worker body exits, unwinding included.
struct StopAck(Arc<WorkerFlags>);

impl Drop for StopAck {
    fn drop(&mut self) {
        self.0.mark_stopped();
    }
}

/// Owned handle to one worker thread.
#[derive(Debug)]
pub struct WorkerHandle {
    name: String,
    flags: Arc<WorkerFlags>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawn a named worker. `body` runs until it sees `!flags.is_running()`.
    pub fn spawn<F>(name: &str, body: F) -> Result<Self>
    where
        F: FnOnce(&WorkerFlags) + Send + 'static,
    {
        let flags = Arc::new(WorkerFlags::new());
        let thread_flags = Arc::clone(&flags);
        let thread_name = name.to_string();

        let handle = thread::Builder::new()
            .name(format!("facemask-{}", name))
            .spawn(move || {
                let _ack = StopAck(Arc::clone(&thread_flags));
                trace!("Worker {} started", thread_name);
                body(&thread_flags);
                trace!("Worker {} stopped", thread_name);
            })
            .map_err(|source| MaskError::Spawn { name: name.to_string(), source })?;

        debug!("Spawned {} worker", name);
        Ok(Self { name: name.to_string(), flags, handle: Some(handle) })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> &WorkerFlags {
        &self.flags
    }

    pub fn request_stop(&self) {
        self.flags.request_stop();
    }

    pub fn has_stopped(&self) -> bool {
        self.flags.has_stopped()
    }

    /// Join if the worker acknowledged the stop. Returns true once joined.
    fn join_if_stopped(&mut self) -> bool {
        if !self.flags.has_stopped() {
            return false;
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Worker {} panicked outside its loop", self.name);
            }
        }
        true
    }
}

/// Result of [`shutdown_workers`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub joined: usize,
    /// Time spent waiting for stop acknowledgements
    pub waited: Duration,
}

/// Stop and join workers.
///
/// (a) clear every `running` flag, (b) leave the GPU context if the caller
/// was inside it, (c) poll until every `destructing` flag clears, (d) join.
/// No deadline: GPU objects are freed only once every worker has stopped.
/// A warning is logged every `warn_every` while waiting.
pub fn shutdown_workers(
    workers: &mut [WorkerHandle],
    held: Option<GraphicsGuard<'_>>,
    warn_every: Duration,
) -> ShutdownReport {
    for worker in workers.iter() {
        worker.request_stop();
    }

    if held.is_some() {
        debug!("Leaving GPU context so workers can finish");
    }
    drop(held);

    let started = Instant::now();
    let mut next_warning = started + warn_every;
    loop {
        let pending: Vec<&str> = workers
            .iter()
            .filter(|w| w.handle.is_some() && !w.has_stopped())
            .map(|w| w.name())
            .collect();
        if pending.is_empty() {
            break;
        }
        let now = Instant::now();
        if now >= next_warning {
            warn!(
                "Still waiting for worker(s) {} to stop ({:?})",
                pending.join(", "),
                now - started
            );
            next_warning = now + warn_every;
        }
        thread::sleep(Duration::from_millis(1));
    }

    let mut report = ShutdownReport { joined: 0, waited: started.elapsed() };
    for worker in workers.iter_mut() {
        if worker.handle.is_some() && worker.join_if_stopped() {
            report.joined += 1;
        }
    }
    info!("Workers stopped: {} joined in {:?}", report.joined, report.waited);
    report
}

/// Run one loop iteration, catching a panic so the loop can continue.
///
/// Returns None if the iteration panicked.
pub fn catch_iteration<T>(worker: &str, f: impl FnOnce() -> T) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            error!("Worker {} iteration panicked: {}", worker, panic_message(payload.as_ref()));
            None
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::GraphicsContext;
    use std::sync::atomic::AtomicUsize;

    fn looping_worker(name: &str, iterations: Arc<AtomicUsize>) -> WorkerHandle {
        WorkerHandle::spawn(name, move |flags| {
            while flags.is_running() {
                iterations.fetch_add(1, Ordering::Relaxed);
                thread::sleep(Duration::from_millis(5));
            }
        })
        .unwrap()
    }

    #[test]
    fn test_stop_is_acknowledged_within_one_interval() {
        let iterations = Arc::new(AtomicUsize::new(0));
        let worker = looping_worker("ack", Arc::clone(&iterations));
        assert!(!worker.has_stopped());

        worker.request_stop();
        let deadline = Instant::now() + Duration::from_millis(500);
        while !worker.has_stopped() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(worker.has_stopped());
    }

    #[test]
    fn test_shutdown_joins_all_workers() {
        let iterations = Arc::new(AtomicUsize::new(0));
        let mut workers = vec![
            looping_worker("a", Arc::clone(&iterations)),
            looping_worker("b", Arc::clone(&iterations)),
        ];
        let report = shutdown_workers(&mut workers, None, Duration::from_secs(2));
        assert_eq!(report.joined, 2);

        // Second shutdown finds nothing left to join
        let again = shutdown_workers(&mut workers, None, Duration::from_millis(10));
        assert_eq!(again.joined, 0);
    }

    #[test]
    fn test_shutdown_releases_held_context_first() {
        let ctx = Arc::new(GraphicsContext::new());
        let worker_ctx = Arc::clone(&ctx);
        let mut workers = vec![
            WorkerHandle::spawn("gpu-user", move |flags| {
                while flags.is_running() {
                    thread::sleep(Duration::from_millis(2));
                }
                // Teardown path that needs the GPU context
                let _gpu = worker_ctx.enter();
            })
            .unwrap(),
        ];

        let held = ctx.enter();
        let report = shutdown_workers(&mut workers, Some(held), Duration::from_secs(2));
        assert_eq!(report.joined, 1);
        assert!(!ctx.is_held());
    }

    #[test]
    fn test_slow_worker_is_waited_for_not_abandoned() {
        let exited = Arc::new(AtomicBool::new(false));
        let worker_exited = Arc::clone(&exited);
        let mut workers = vec![
            WorkerHandle::spawn("slow", move |_flags| {
                // Ignores the stop request for a while
                thread::sleep(Duration::from_millis(60));
                worker_exited.store(true, Ordering::Release);
            })
            .unwrap(),
        ];
        let report = shutdown_workers(&mut workers, None, Duration::from_millis(10));
        assert_eq!(report.joined, 1);
        assert!(exited.load(Ordering::Acquire));
        assert!(report.waited >= Duration::from_millis(40));
    }

    #[test]
    fn test_panicking_body_still_acknowledges() {
        let mut workers = vec![WorkerHandle::spawn("boom", |_flags| panic!("body failed")).unwrap()];
        let report = shutdown_workers(&mut workers, None, Duration::from_secs(2));
        assert_eq!(report.joined, 1);
    }

    #[test]
    fn test_catch_iteration_swallows_panic() {
        assert_eq!(catch_iteration("t", || 7), Some(7));
        assert_eq!(catch_iteration("t", || -> i32 { panic!("bad frame") }), None);
    }
}
