//! # Station Effects
//!
//! Outcome notifications for whatever presents them (particles, sounds,
//! chat lines). Sinks are fire-and-forget: they cannot fail and cannot
//! influence a resolution.

use alembic_shared::{ActorId, StationId};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::engine::CombinationOutcome;

/// Receives every outcome the engine produces.
pub trait EffectsSink {
    /// Called once per outcome, after balances and tokens have settled.
    fn notify(&self, station: &StationId, actor: ActorId, outcome: &CombinationOutcome);
}

impl<E: EffectsSink + ?Sized> EffectsSink for Arc<E> {
    fn notify(&self, station: &StationId, actor: ActorId, outcome: &CombinationOutcome) {
        (**self).notify(station, actor, outcome);
    }
}

/// A recorded outcome, ready for the presentation layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StationEffect {
    /// Where it happened.
    pub station: StationId,
    /// Actor the notification is addressed to.
    pub actor: ActorId,
    /// What happened.
    pub outcome: CombinationOutcome,
}

/// Buffers outcomes until the presentation layer drains them each frame.
#[derive(Debug)]
pub struct BufferedEffects {
    event_buffer: Mutex<Vec<StationEffect>>,
}

impl BufferedEffects {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            event_buffer: Mutex::new(Vec::with_capacity(256)),
        }
    }

    /// Takes every buffered effect, oldest first.
    pub fn drain_events(&self) -> Vec<StationEffect> {
        let mut events = self.event_buffer.lock();
        std::mem::take(&mut *events)
    }

    /// Peeks at pending event count.
    #[must_use]
    pub fn pending_event_count(&self) -> usize {
        self.event_buffer.lock().len()
    }
}

impl Default for BufferedEffects {
    fn default() -> Self {
        Self::new()
    }
}

impl EffectsSink for BufferedEffects {
    fn notify(&self, station: &StationId, actor: ActorId, outcome: &CombinationOutcome) {
        self.event_buffer.lock().push(StationEffect {
            station: station.clone(),
            actor,
            outcome: outcome.clone(),
        });
    }
}

/// Writes outcomes to the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogEffects;

impl EffectsSink for LogEffects {
    fn notify(&self, station: &StationId, actor: ActorId, outcome: &CombinationOutcome) {
        match outcome {
            CombinationOutcome::Success {
                recipe,
                result,
                charged,
            } => tracing::info!(
                %station,
                %actor,
                recipe,
                result = %result.kind,
                quantity = result.quantity,
                primary = charged.primary,
                reserve = charged.reserve,
                "combination succeeded"
            ),
            CombinationOutcome::LedgerError { refunds } => tracing::warn!(
                %station,
                %actor,
                refunds = refunds.len(),
                "combination aborted by ledger"
            ),
            other => tracing::info!(
                %station,
                %actor,
                outcome = other.label(),
                refunds = other.refunds().len(),
                "combination ended"
            ),
        }
    }
}

/// Discards outcomes.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullEffects;

impl EffectsSink for NullEffects {
    fn notify(&self, _station: &StationId, _actor: ActorId, _outcome: &CombinationOutcome) {}
}
