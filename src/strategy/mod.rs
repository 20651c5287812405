//! Processing strategies.
//!
//! A strategy bounds how many messages a listener may have in flight.
//! `admit` hands out a `Permit`; dropping the permit releases the slot, so a
//! slot is released exactly once on every path, panics included.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Token for one concurrency slot. Released on drop.
#[derive(Debug)]
#[must_use = "dropping a permit releases its slot immediately"]
pub struct Permit {
    _slot: Option<OwnedSemaphorePermit>,
}

impl Permit {
    /// A permit that holds no slot (unbounded admission).
    pub fn unbounded() -> Self {
        Self { _slot: None }
    }

    fn bounded(slot: OwnedSemaphorePermit) -> Self {
        Self { _slot: Some(slot) }
    }
}

/// Admission control for a listener's dispatches.
#[async_trait]
pub trait ProcessingStrategy: Send + Sync {
    /// Wait for a free slot.
    async fn admit(&self) -> Permit;

    /// Slots free right now. Used to size receive batches.
    fn available_workers(&self) -> usize;

    /// Total slots. `usize::MAX` when unbounded.
    fn max_workers(&self) -> usize;
}

/// No backpressure: every admission succeeds immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unbounded;

#[async_trait]
impl ProcessingStrategy for Unbounded {
    async fn admit(&self) -> Permit {
        Permit::unbounded()
    }

    fn available_workers(&self) -> usize {
        usize::MAX
    }

    fn max_workers(&self) -> usize {
        usize::MAX
    }
}

/// A throttled strategy was asked for zero slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("max_in_flight must be greater than zero")]
pub struct ZeroCapacity;

/// At most `max_in_flight` outstanding permits.
#[derive(Debug, Clone)]
pub struct Throttled {
    slots: Arc<Semaphore>,
    max_in_flight: usize,
}

impl Throttled {
    /// Fails with `ZeroCapacity` when `max_in_flight` is zero.
    pub fn new(max_in_flight: usize) -> Result<Self, ZeroCapacity> {
        if max_in_flight == 0 {
            return Err(ZeroCapacity);
        }
        Ok(Self {
            slots: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
        })
    }

    /// Permits currently held.
    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.slots.available_permits()
    }
}

#[async_trait]
impl ProcessingStrategy for Throttled {
    async fn admit(&self) -> Permit {
        // The semaphore is never closed, so acquisition only fails if that
        // invariant is broken.
        match Arc::clone(&self.slots).acquire_owned().await {
            Ok(slot) => Permit::bounded(slot),
            Err(_) => unreachable!("throttling semaphore closed"),
        }
    }

    fn available_workers(&self) -> usize {
        self.slots.available_permits()
    }

    fn max_workers(&self) -> usize {
        self.max_in_flight
    }
}
