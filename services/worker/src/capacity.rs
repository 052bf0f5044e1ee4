//! Concurrency gate for inference requests
//!
//! The check, the increment, and the release are atomic with respect to
//! concurrent requests: acquisition is a compare-and-swap loop and release
//! happens in `Drop`, so every exit path (success and failure alike) gives
//! the slot back. Requests over the ceiling fail fast; there is no queue.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use infermesh_core::{Error, Result};

/// Counting gate with a fixed ceiling
#[derive(Debug)]
pub struct CapacityGate {
    max_concurrent: u32,
    current: AtomicU32,
}

impl CapacityGate {
    pub fn new(max_concurrent: u32) -> Arc<Self> {
        Arc::new(Self {
            max_concurrent,
            current: AtomicU32::new(0),
        })
    }

    /// Claim one slot, or fail fast when the gate is full
    pub fn try_acquire(self: &Arc<Self>) -> Result<CapacityPermit> {
        let mut observed = self.current.load(Ordering::Acquire);
        loop {
            if observed >= self.max_concurrent {
                return Err(Error::CapacityExceeded(format!(
                    "at {}/{} concurrent inferences",
                    observed, self.max_concurrent
                )));
            }
            match self.current.compare_exchange_weak(
                observed,
                observed + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Ok(CapacityPermit {
                        gate: Arc::clone(self),
                    })
                }
                Err(actual) => observed = actual,
            }
        }
    }

    /// Slots currently held
    pub fn current_load(&self) -> u32 {
        self.current.load(Ordering::Acquire)
    }

    /// Configured ceiling
    pub fn max_concurrent(&self) -> u32 {
        self.max_concurrent
    }

    /// Slots still free
    pub fn available(&self) -> u32 {
        self.max_concurrent
            .saturating_sub(self.current.load(Ordering::Acquire))
    }
}

/// One held slot; released on drop
#[derive(Debug)]
pub struct CapacityPermit {
    gate: Arc<CapacityGate>,
}

impl Drop for CapacityPermit {
    fn drop(&mut self) {
        self.gate.current.fetch_sub(1, Ordering::AcqRel);
    }
}
