//! # Timeout Scheduler
//!
//! Deadlines on a logical tick clock.
//!
//! The scheduler never looks at wall time. Whoever owns it decides what
//! "now" is and calls [`TimeoutScheduler::expire`]; tests drive it by
//! hand, the station host drives it once per tick.
//!
//! Each [`TimerHandle`] fires at most once. A disarmed handle never fires.

use alembic_shared::{StationId, Tick};
use std::collections::{BTreeMap, HashMap};

/// Identifies one armed deadline.
///
/// Handles are never reused, so a stale handle can always be told apart
/// from the one currently armed for a station.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerHandle(u64);

impl TimerHandle {
    /// Returns the raw sequence number.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// A deadline that has elapsed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Expired {
    /// The handle that fired.
    pub handle: TimerHandle,
    /// Station it was armed for.
    pub station: StationId,
    /// Tick at which it became due.
    pub deadline: Tick,
}

/// Logical-clock timer wheel for station sessions.
#[derive(Debug, Default)]
pub struct TimeoutScheduler {
    next_handle: u64,
    /// Ordered by deadline, then by arm order.
    queue: BTreeMap<(Tick, TimerHandle), StationId>,
    armed: HashMap<TimerHandle, Tick>,
}

impl TimeoutScheduler {
    /// Creates an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a deadline `duration` ticks after `now`.
    pub fn arm(&mut self, station: StationId, now: Tick, duration: Tick) -> TimerHandle {
        let handle = TimerHandle(self.next_handle);
        self.next_handle += 1;

        let deadline = now.saturating_add(duration);
        tracing::trace!(%station, handle = handle.0, deadline, "timer armed");
        self.queue.insert((deadline, handle), station);
        self.armed.insert(handle, deadline);
        handle
    }

    /// Disarms a handle. Returns false if it already fired or was disarmed.
    pub fn disarm(&mut self, handle: TimerHandle) -> bool {
        match self.armed.remove(&handle) {
            Some(deadline) => {
                self.queue.remove(&(deadline, handle));
                tracing::trace!(handle = handle.0, "timer disarmed");
                true
            }
            None => false,
        }
    }

    /// Removes and returns every deadline at or before `now`.
    ///
    /// Results are in deadline order, ties in arm order.
    pub fn expire(&mut self, now: Tick) -> Vec<Expired> {
        let mut fired = Vec::new();
        while let Some(entry) = self.queue.first_entry() {
            let (deadline, handle) = *entry.key();
            if deadline > now {
                break;
            }
            let station = entry.remove();
            self.armed.remove(&handle);
            fired.push(Expired {
                handle,
                station,
                deadline,
            });
        }
        fired
    }

    /// Returns true if `handle` is still pending.
    #[must_use]
    pub fn is_armed(&self, handle: TimerHandle) -> bool {
        self.armed.contains_key(&handle)
    }

    /// Deadline of a pending handle.
    #[must_use]
    pub fn deadline(&self, handle: TimerHandle) -> Option<Tick> {
        self.armed.get(&handle).copied()
    }

    /// Earliest pending deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Tick> {
        self.queue.keys().next().map(|&(deadline, _)| deadline)
    }

    /// Number of pending deadlines.
    #[must_use]
    pub fn armed_count(&self) -> usize {
        self.armed.len()
    }
}
