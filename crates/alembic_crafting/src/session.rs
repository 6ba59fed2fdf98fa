//! # Station Sessions
//!
//! One session per station coordinate. A session is either empty or
//! holding exactly one pending input together with its deadline; the two
//! are stored as a single value so one can never exist without the other.

use alembic_shared::{ActorId, StationId, Tick, Token};
use std::collections::HashMap;

use crate::timer::TimerHandle;

/// Where a station is in its two-input cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    /// Nothing deposited.
    Empty,
    /// One token deposited, waiting for the second.
    AwaitingSecond,
}

/// The first token of a pair, waiting at a station.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingInput {
    /// The deposited unit.
    pub token: Token,
    /// Who deposited it (refunds go here).
    pub owner: ActorId,
    /// Tick it was deposited.
    pub deposited_at: Tick,
    /// Tick after which it is refunded.
    pub deadline: Tick,
    /// Timer armed for `deadline`.
    pub timer: TimerHandle,
}

/// Mutable state of one station.
#[derive(Clone, Debug)]
pub struct StationSession {
    station: StationId,
    pending: Option<PendingInput>,
    created_at: Tick,
    completed_cycles: u64,
}

impl StationSession {
    /// Creates an empty session.
    #[must_use]
    pub fn new(station: StationId, now: Tick) -> Self {
        Self {
            station,
            pending: None,
            created_at: now,
            completed_cycles: 0,
        }
    }

    /// Station this session belongs to.
    #[must_use]
    pub fn station(&self) -> &StationId {
        &self.station
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        if self.pending.is_some() {
            SessionPhase::AwaitingSecond
        } else {
            SessionPhase::Empty
        }
    }

    /// The pending input, if any.
    #[must_use]
    pub fn pending(&self) -> Option<&PendingInput> {
        self.pending.as_ref()
    }

    /// Tick the session was created.
    #[must_use]
    pub fn created_at(&self) -> Tick {
        self.created_at
    }

    /// Number of cycles that ended (resolved, timed out or cancelled).
    #[must_use]
    pub fn completed_cycles(&self) -> u64 {
        self.completed_cycles
    }

    /// Returns true if `handle` is the timer guarding the pending input.
    #[must_use]
    pub fn is_current_timer(&self, handle: TimerHandle) -> bool {
        self.pending.as_ref().is_some_and(|p| p.timer == handle)
    }

    /// `Empty -> AwaitingSecond`.
    ///
    /// # Errors
    ///
    /// Hands `input` back if a token is already pending.
    pub fn deposit(&mut self, input: PendingInput) -> Result<(), PendingInput> {
        if self.pending.is_some() {
            return Err(input);
        }
        self.pending = Some(input);
        Ok(())
    }

    /// `AwaitingSecond -> Empty`, returning the pending input.
    pub fn take_pending(&mut self) -> Option<PendingInput> {
        let taken = self.pending.take();
        if taken.is_some() {
            self.completed_cycles += 1;
        }
        taken
    }
}

/// Owned map of station -> session.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<StationId, StationSession>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a station. Returns false if it was already known.
    pub fn register(&mut self, station: StationId, now: Tick) -> bool {
        if self.sessions.contains_key(&station) {
            return false;
        }
        self.sessions
            .insert(station.clone(), StationSession::new(station, now));
        true
    }

    /// Returns the session for `station`, creating it lazily.
    pub fn get_or_create(&mut self, station: &StationId, now: Tick) -> &mut StationSession {
        self.sessions
            .entry(station.clone())
            .or_insert_with(|| StationSession::new(station.clone(), now))
    }

    /// Looks up a session.
    #[must_use]
    pub fn get(&self, station: &StationId) -> Option<&StationSession> {
        self.sessions.get(station)
    }

    /// Looks up a session for mutation.
    pub fn get_mut(&mut self, station: &StationId) -> Option<&mut StationSession> {
        self.sessions.get_mut(station)
    }

    /// Forgets a station entirely.
    pub fn remove(&mut self, station: &StationId) -> Option<StationSession> {
        self.sessions.remove(station)
    }

    /// Phase of a station; unknown stations are empty.
    #[must_use]
    pub fn phase(&self, station: &StationId) -> SessionPhase {
        self.sessions
            .get(station)
            .map_or(SessionPhase::Empty, StationSession::phase)
    }

    /// Number of known stations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true if no station is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Number of stations holding a pending token.
    #[must_use]
    pub fn awaiting_count(&self) -> usize {
        self.sessions
            .values()
            .filter(|s| s.phase() == SessionPhase::AwaitingSecond)
            .count()
    }

    /// Stations whose world matches `world`.
    pub fn stations_in<'a>(&'a self, world: &'a str) -> impl Iterator<Item = &'a StationId> {
        self.sessions.keys().filter(move |s| s.world == world)
    }
}
