//! Persistence intents for the external flash driver.
//!
//! This module never touches storage. It only records what the flash driver
//! should do next and whether a flash operation is currently running, which
//! is also what commands report as "device busy".
//!
//! # Example
//!
//! ```
//! use hart_slave::persistence::{PersistenceIntent, PersistenceScheduler};
//!
//! let mut scheduler = PersistenceScheduler::new();
//! scheduler.request_flush();
//!
//! let intent = scheduler.take_intent();
//! assert_eq!(intent, Some(PersistenceIntent::Flush));
//! assert!(scheduler.is_busy());
//!
//! scheduler.complete(PersistenceIntent::Flush, true);
//! assert!(!scheduler.is_busy());
//! assert!(!scheduler.is_dirty());
//! ```

use log::{debug, warn};

/// Work the flash driver should perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceIntent {
    /// Write the RAM identity image to non-volatile storage.
    Flush,
    /// Reload the RAM identity image from non-volatile storage.
    Refresh,
}

/// Raises and clears persistence intents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistenceScheduler {
    flush: bool,
    refresh: bool,
    dirty: bool,
    busy: bool,
}

impl PersistenceScheduler {
    /// Creates a scheduler with no pending intent.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a flush; cancels a pending refresh.
    pub fn request_flush(&mut self) {
        self.flush = true;
        self.refresh = false;
        self.dirty = true;
    }

    /// Requests a refresh; cancels a pending flush.
    pub fn request_refresh(&mut self) {
        self.refresh = true;
        self.flush = false;
    }

    /// Records a RAM mutation without asking for an immediate flush.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Whether a flush is pending.
    pub fn flush_requested(&self) -> bool {
        self.flush
    }

    /// Whether a refresh is pending.
    pub fn refresh_requested(&self) -> bool {
        self.refresh
    }

    /// Whether RAM holds changes that have not been flushed.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Whether a flash operation is in progress.
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Hands the pending intent to the flash driver and marks the scheduler
    /// busy. Returns `None` while busy or when nothing is pending.
    pub fn take_intent(&mut self) -> Option<PersistenceIntent> {
        if self.busy {
            return None;
        }
        let intent = if self.refresh {
            self.refresh = false;
            PersistenceIntent::Refresh
        } else if self.flush {
            self.flush = false;
            PersistenceIntent::Flush
        } else {
            return None;
        };
        self.busy = true;
        debug!("Persistence intent {:?} taken", intent);
        Some(intent)
    }

    /// Reports the outcome of an intent returned by [`take_intent`](Self::take_intent).
    ///
    /// A failed flush raises the flush intent again.
    pub fn complete(&mut self, intent: PersistenceIntent, ok: bool) {
        self.busy = false;
        match (intent, ok) {
            (PersistenceIntent::Flush, true) => {
                // a flush requested while this one ran keeps the state dirty
                if !self.flush {
                    self.dirty = false;
                }
            }
            (PersistenceIntent::Flush, false) => {
                warn!("Flash write failed, flush re-requested");
                if !self.refresh {
                    self.flush = true;
                }
            }
            (PersistenceIntent::Refresh, true) => self.dirty = false,
            (PersistenceIntent::Refresh, false) => warn!("Flash read failed"),
        }
    }
}
