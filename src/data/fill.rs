//! Accumulation state machine shared by line, surface and volume containers.
//!
//! ```text
//! Empty (cursor None) ──append/ingest──> Filling ──last slot──> Full
//!   ▲                                                             │
//!   └──────────────────────────── reset ──────────────────────────┘
//! ```
//!
//! Only `append`/`ingest_*` move forward and only `reset` moves back to `Empty`.
//! A slice that a linked consumer has already ingested stays ingested: the
//! consumer holds a copy, so resetting and refilling the source only produces
//! the next slice.

use super::events::{ContainerEvent, SubscriptionId};
use crate::error::{AppResult, DaqError};
use ndarray::ArrayViewD;

/// Fill state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillState {
    /// Nothing written yet.
    Empty,
    /// Some but not all slots written.
    Filling,
    /// Every slot written; further writes fail until `reset`.
    Full,
}

/// Cursor over the accumulation dimension.
#[derive(Debug, Clone)]
pub(crate) struct FillCursor {
    last: Option<usize>,
    capacity: usize,
}

impl FillCursor {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            last: None,
            capacity,
        }
    }

    pub(crate) fn cursor(&self) -> Option<usize> {
        self.last
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn state(&self) -> FillState {
        match self.last {
            None => FillState::Empty,
            Some(idx) if idx + 1 >= self.capacity => FillState::Full,
            Some(_) => FillState::Filling,
        }
    }

    /// Slot the next write goes to, without moving the cursor.
    pub(crate) fn next_slot(&self, container: &str) -> AppResult<usize> {
        if self.state() == FillState::Full {
            return Err(DaqError::ContainerFull {
                name: container.to_string(),
            });
        }
        Ok(self.last.map_or(0, |idx| idx + 1))
    }

    /// Record a completed write to `slot`. Returns true if it filled the container.
    pub(crate) fn commit(&mut self, slot: usize) -> bool {
        self.last = Some(slot);
        self.state() == FillState::Full
    }

    /// Mark every slot as written.
    pub(crate) fn fill_all(&mut self) -> usize {
        let last = self.capacity - 1;
        self.last = Some(last);
        last
    }

    pub(crate) fn reset(&mut self) {
        self.last = None;
    }
}

/// Common surface of every accumulating container.
pub trait Accumulator {
    /// Container name, also the base name of its storage group.
    fn name(&self) -> &str;

    /// Last written slot along the accumulation dimension, `None` before any write.
    fn cursor(&self) -> Option<usize>;

    /// Number of slots along the accumulation dimension.
    fn capacity(&self) -> usize;

    /// Current fill state.
    fn state(&self) -> FillState;

    /// Whether every slot has been written.
    fn is_full(&self) -> bool {
        self.state() == FillState::Full
    }

    /// The full dependent buffer (1-D for lines, 2-D surfaces, 3-D volumes).
    fn data(&self) -> ArrayViewD<'_, f64>;

    /// Back to `Empty`: NaN-fills the dependent buffer, keeps shape and axes.
    fn reset(&mut self);

    /// Subscribe to `changed` notifications.
    fn on_changed<F>(&mut self, callback: F) -> SubscriptionId
    where
        Self: Sized,
        F: FnMut(&ContainerEvent<'_>) -> AppResult<()> + 'static;

    /// Subscribe to `completed` notifications.
    fn on_completed<F>(&mut self, callback: F) -> SubscriptionId
    where
        Self: Sized,
        F: FnMut(&ContainerEvent<'_>) -> AppResult<()> + 'static;

    /// Remove a subscription.
    fn unsubscribe(&mut self, id: SubscriptionId) -> bool;
}
