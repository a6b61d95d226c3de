//! Fixed-size ring carrying detection results back to the render thread
//!
//! The worker fills slot `write_index`, releases that slot's lock, and only
//! then advances the index under the ring lock. The reader takes the slot
//! right behind the write index with try-locks only. Slot locks and the ring
//! lock are never held together.

use std::sync::Mutex;

use log::trace;

use super::frame_slot::Timestamp;
use super::locks::{lock, try_lock};
use crate::detect::{DetectionResults, Triangulation};

/// Number of result slots.
pub const BUFFER_SIZE: usize = 8;

#[derive(Debug, Default)]
struct ResultSlot {
    detections: DetectionResults,
    triangulation: Option<Triangulation>,
    timestamp: Option<Timestamp>,
}

/// Most recent completed result, as seen by the render thread.
#[derive(Debug)]
pub struct LatestResults {
    pub detections: DetectionResults,
    /// None if an earlier read already took this slot's mesh
    pub triangulation: Option<Triangulation>,
    pub timestamp: Timestamp,
}

/// Outcome of [`ResultRing::try_read_latest`].
#[derive(Debug)]
pub enum RingRead {
    Fresh(LatestResults),
    /// Latest slot carries the timestamp the caller already has
    Unchanged,
    /// Nothing published since start or the last reset
    Empty,
    /// Lock contention; reuse last tick's results
    Busy,
}

#[derive(Debug)]
pub struct ResultRing {
    slots: Vec<Mutex<ResultSlot>>,
    /// Next slot to write; None until the first publish
    write_index: Mutex<Option<usize>>,
}

impl Default for ResultRing {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultRing {
    pub fn new() -> Self {
        Self {
            slots: (0..BUFFER_SIZE).map(|_| Mutex::new(ResultSlot::default())).collect(),
            write_index: Mutex::new(None),
        }
    }

    /// Store one frame's results and advance the write index (worker side).
    pub fn publish(
        &self,
        detections: &DetectionResults,
        triangulation: Triangulation,
        timestamp: Timestamp,
    ) {
        let index = lock(&self.write_index).unwrap_or(0);
        {
            let mut slot = lock(&self.slots[index]);
            slot.detections.clone_from(detections);
            slot.triangulation = Some(triangulation);
            slot.timestamp = Some(timestamp);
        }
        *lock(&self.write_index) = Some((index + 1) % BUFFER_SIZE);
        trace!("ResultRing: slot {} <- {} face(s)", index, detections.len());
    }

    /// Most recently completed slot, never blocking.
    ///
    /// `since` is the timestamp of the results the caller already applied.
    pub fn try_read_latest(&self, since: Option<Timestamp>) -> RingRead {
        let write_index = match try_lock(&self.write_index) {
            Some(guard) => *guard,
            None => return RingRead::Busy,
        };
        let Some(write_index) = write_index else {
            return RingRead::Empty;
        };
        let latest = (write_index + BUFFER_SIZE - 1) % BUFFER_SIZE;

        let Some(mut slot) = try_lock(&self.slots[latest]) else {
            return RingRead::Busy;
        };
        let Some(timestamp) = slot.timestamp else {
            return RingRead::Empty;
        };
        if since == Some(timestamp) {
            return RingRead::Unchanged;
        }
        RingRead::Fresh(LatestResults {
            detections: slot.detections.clone(),
            triangulation: slot.triangulation.take(),
            timestamp,
        })
    }

    pub fn write_index(&self) -> Option<usize> {
        *lock(&self.write_index)
    }

    /// Index the reader would resolve as "most recent".
    pub fn latest_index(&self) -> Option<usize> {
        self.write_index().map(|w| (w + BUFFER_SIZE - 1) % BUFFER_SIZE)
    }

    /// Back to "nothing published" (filter hidden or deactivated).
    pub fn reset(&self) {
        if let Some(mut index) = try_lock(&self.write_index) {
            *index = None;
        }
        for slot in &self.slots {
            if let Some(mut slot) = try_lock(slot) {
                slot.detections.clear();
                slot.triangulation = None;
                slot.timestamp = None;
            }
        }
    }
}
