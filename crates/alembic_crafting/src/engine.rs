//! # Combination Engine
//!
//! **Two Tokens In, One Outcome Out**
//!
//! The engine owns every station session and the deadline clock. All
//! transitions enter through [`CombinationEngine::handle`] or
//! [`CombinationEngine::advance_to`], both of which take `&mut self`, so a
//! resolve-and-debit sequence can never interleave with another event.
//!
//! ## Station Cycle
//!
//! ```text
//!            submit                       submit (resolve)
//!   EMPTY ───────────────> AWAITING ─────────────────────────> EMPTY
//!     ▲                        │
//!     └────────────────────────┘
//!        deadline / removal (refund)
//! ```
//!
//! ## Resolution
//!
//! 1. Look up the pair with the second submitter's rank
//! 2. No recipe: refund both tokens
//! 3. Not enough primary + reserve: refund both tokens, charge nothing
//! 4. Debit primary first, then reserve; a failed reserve debit re-credits
//!    primary and refunds both tokens
//! 5. Grant the result to the second submitter

use alembic_shared::{ActorId, Rank, StationId, Tick, Token, MAX_TOKEN_NAME_LEN};
use std::sync::Arc;

use crate::catalog::{CatalogHandle, CatalogWarning, RecipeCatalog, RecipeId};
use crate::config::{CatalogSource, EngineConfig};
use crate::effects::EffectsSink;
use crate::error::{CraftingError, CraftingResult};
use crate::ledger::{Charge, CostLedger, LedgerError};
use crate::session::{PendingInput, SessionPhase, SessionRegistry, StationSession};
use crate::timer::{TimeoutScheduler, TimerHandle};
use crate::vault::TokenVault;

/// A token handed back to the actor who submitted it.
pub type Refund = (ActorId, Token);

/// Result of one station cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CombinationOutcome {
    /// Both tokens consumed, cost charged, result granted.
    Success {
        /// Recipe that matched.
        recipe: RecipeId,
        /// Token granted to the second submitter.
        result: Token,
        /// Split actually debited.
        charged: Charge,
    },
    /// No recipe for the pair at this rank.
    NoMatch {
        /// Tokens returned.
        refunds: Vec<Refund>,
    },
    /// Both pools together fall short of the cost.
    InsufficientFunds {
        /// Tokens returned.
        refunds: Vec<Refund>,
        /// Recipe cost.
        required: u64,
        /// Primary plus reserve at the time of the check.
        available: u64,
    },
    /// The first token waited too long, or the station went away.
    Timeout {
        /// Tokens returned.
        refunds: Vec<Refund>,
        /// True when caused by station removal rather than the deadline.
        cancelled: bool,
    },
    /// The ledger failed mid-charge; nothing remains charged.
    LedgerError {
        /// Tokens returned.
        refunds: Vec<Refund>,
    },
}

impl CombinationOutcome {
    /// Tokens this outcome returned to their owners.
    #[must_use]
    pub fn refunds(&self) -> &[Refund] {
        match self {
            Self::Success { .. } => &[],
            Self::NoMatch { refunds }
            | Self::InsufficientFunds { refunds, .. }
            | Self::Timeout { refunds, .. }
            | Self::LedgerError { refunds } => refunds,
        }
    }

    /// Returns true for [`CombinationOutcome::Success`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Short name for logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::NoMatch { .. } => "no_match",
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::Timeout {
                cancelled: false, ..
            } => "timeout",
            Self::Timeout {
                cancelled: true, ..
            } => "cancelled",
            Self::LedgerError { .. } => "ledger_error",
        }
    }
}

/// Everything that can happen to a station.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StationEvent {
    /// A station block was placed or loaded.
    StationCreated {
        /// Station coordinate.
        station: StationId,
    },
    /// An actor put one token into a station.
    TokenSubmitted {
        /// Station coordinate.
        station: StationId,
        /// Submitting actor.
        actor: ActorId,
        /// Actor's rank, resolved by the host.
        rank: Rank,
        /// Token offered; one unit is taken.
        token: Token,
    },
    /// An external timer fired for a station.
    TimeoutFired {
        /// Station coordinate.
        station: StationId,
        /// Handle that fired.
        handle: TimerHandle,
    },
    /// A station block was broken or its region unloaded.
    StationRemoved {
        /// Station coordinate.
        station: StationId,
    },
}

/// Why new sessions are currently refused.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Degraded {
    ledger: Option<String>,
    catalog: Option<String>,
}

impl Degraded {
    fn reason(&self) -> Option<String> {
        match (&self.ledger, &self.catalog) {
            (None, None) => None,
            (Some(l), None) => Some(format!("ledger: {l}")),
            (None, Some(c)) => Some(format!("catalog: {c}")),
            (Some(l), Some(c)) => Some(format!("ledger: {l}; catalog: {c}")),
        }
    }
}

/// Engine counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Tokens accepted.
    pub submissions: u64,
    /// Submissions refused while degraded.
    pub refused: u64,
    /// Successful combinations.
    pub successes: u64,
    /// Pairs with no recipe.
    pub no_matches: u64,
    /// Pairs the actor could not afford.
    pub insufficient_funds: u64,
    /// Charges aborted by the ledger.
    pub ledger_errors: u64,
    /// Deadlines reached.
    pub timeouts: u64,
    /// Sessions cancelled by station removal.
    pub cancellations: u64,
    /// Timer events that no longer matched a session.
    pub stale_timers: u64,
}

/// How a charge attempt failed.
enum ChargeFailure {
    Insufficient { required: u64, available: u64 },
    Ledger,
}

/// Station state machine controller.
pub struct CombinationEngine<L, V, E> {
    catalog: Arc<CatalogHandle>,
    ledger: L,
    vault: V,
    effects: E,
    sessions: SessionRegistry,
    timers: TimeoutScheduler,
    session_timeout: Tick,
    now: Tick,
    degraded: Degraded,
    stats: EngineStats,
}

impl<L, V, E> CombinationEngine<L, V, E>
where
    L: CostLedger,
    V: TokenVault,
    E: EffectsSink,
{
    /// Creates an engine at tick 0.
    #[must_use]
    pub fn new(
        config: &EngineConfig,
        catalog: Arc<CatalogHandle>,
        ledger: L,
        vault: V,
        effects: E,
    ) -> Self {
        tracing::info!(
            timeout_ticks = config.session_timeout_ticks,
            recipes = catalog.snapshot().recipe_count(),
            "combination engine ready"
        );
        Self {
            catalog,
            ledger,
            vault,
            effects,
            sessions: SessionRegistry::new(),
            timers: TimeoutScheduler::new(),
            session_timeout: config.session_timeout_ticks.max(1),
            now: 0,
            degraded: Degraded::default(),
            stats: EngineStats::default(),
        }
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Applies one event.
    ///
    /// Returns the outcome if the event ended a cycle.
    ///
    /// # Errors
    ///
    /// A submission is refused (and the token stays with the caller) with
    /// `ServiceUnavailable` while degraded, `EmptyToken` for a zero-quantity
    /// token, or `InvalidToken` for a blank or oversized type name.
    pub fn handle(&mut self, event: StationEvent) -> CraftingResult<Option<CombinationOutcome>> {
        match event {
            StationEvent::StationCreated { station } => {
                if self.sessions.register(station.clone(), self.now) {
                    tracing::debug!(%station, "station registered");
                }
                Ok(None)
            }
            StationEvent::TokenSubmitted {
                station,
                actor,
                rank,
                token,
            } => self.submit(station, actor, rank, &token),
            StationEvent::TimeoutFired { station, handle } => {
                Ok(self.expire_session(&station, handle))
            }
            StationEvent::StationRemoved { station } => Ok(self.remove_station(&station)),
        }
    }

    /// Moves the clock forward and expires every due session.
    ///
    /// The clock never moves backwards; an older `tick` only re-checks
    /// deadlines at the current time.
    pub fn advance_to(&mut self, tick: Tick) -> Vec<(StationId, CombinationOutcome)> {
        self.now = self.now.max(tick);
        let mut outcomes = Vec::new();
        for expired in self.timers.expire(self.now) {
            if let Some(outcome) = self.expire_session(&expired.station, expired.handle) {
                outcomes.push((expired.station, outcome));
            }
        }
        outcomes
    }

    /// Advances the clock by one tick.
    pub fn tick(&mut self) -> Vec<(StationId, CombinationOutcome)> {
        self.advance_to(self.now + 1)
    }

    /// Cancels every station in `world` (region unload).
    pub fn unload_world(&mut self, world: &str) -> Vec<(StationId, CombinationOutcome)> {
        let stations: Vec<StationId> = self.sessions.stations_in(world).cloned().collect();
        let mut outcomes = Vec::new();
        for station in stations {
            if let Some(outcome) = self.remove_station(&station) {
                outcomes.push((station, outcome));
            }
        }
        tracing::info!(world, cancelled = outcomes.len(), "world unloaded");
        outcomes
    }

    fn submit(
        &mut self,
        station: StationId,
        actor: ActorId,
        rank: Rank,
        offered: &Token,
    ) -> CraftingResult<Option<CombinationOutcome>> {
        if offered.quantity == 0 {
            return Err(CraftingError::EmptyToken(offered.kind.to_string()));
        }
        if offered.kind.is_empty() || offered.kind.as_str().len() > MAX_TOKEN_NAME_LEN {
            return Err(CraftingError::InvalidToken(offered.kind.to_string()));
        }
        let token = offered.unit();

        let first = match self.sessions.get_mut(&station) {
            Some(session) if session.phase() == SessionPhase::AwaitingSecond => {
                session.take_pending()
            }
            _ => None,
        };

        let Some(first) = first else {
            self.open_session(station, actor, token)?;
            return Ok(None);
        };

        // Disarmed before any resolution work so the deadline cannot race it.
        self.timers.disarm(first.timer);
        self.stats.submissions += 1;

        let outcome = self.resolve(&station, first, actor, rank, token);
        self.effects.notify(&station, actor, &outcome);
        Ok(Some(outcome))
    }

    fn open_session(&mut self, station: StationId, actor: ActorId, token: Token) -> CraftingResult<()> {
        if let Some(reason) = self.degraded.reason() {
            self.stats.refused += 1;
            tracing::debug!(%station, %actor, %reason, "submission refused");
            return Err(CraftingError::ServiceUnavailable { reason });
        }

        let deadline = self.now.saturating_add(self.session_timeout);
        let timer = self
            .timers
            .arm(station.clone(), self.now, self.session_timeout);
        let input = PendingInput {
            token,
            owner: actor,
            deposited_at: self.now,
            deadline,
            timer,
        };

        let session = self.sessions.get_or_create(&station, self.now);
        if let Err(rejected) = session.deposit(input) {
            self.timers.disarm(rejected.timer);
            tracing::warn!(%station, %actor, "station already holds a pending token");
            return Err(CraftingError::StationBusy(station.to_string()));
        }
        self.stats.submissions += 1;
        tracing::debug!(%station, %actor, deadline, "first token deposited");
        Ok(())
    }

    fn resolve(
        &mut self,
        station: &StationId,
        first: PendingInput,
        actor: ActorId,
        rank: Rank,
        second: Token,
    ) -> CombinationOutcome {
        let catalog = self.catalog.snapshot();
        let refunds = vec![(first.owner, first.token), (actor, second)];

        let Some(recipe) = catalog.find(rank, &refunds[0].1.kind, &refunds[1].1.kind) else {
            tracing::debug!(%station, %actor, rank, "no recipe for pair");
            self.stats.no_matches += 1;
            self.return_tokens(&refunds);
            return CombinationOutcome::NoMatch { refunds };
        };

        let charged = if recipe.cost == 0 {
            Charge::default()
        } else {
            match self.charge(actor, recipe.cost) {
                Ok(charged) => charged,
                Err(ChargeFailure::Insufficient {
                    required,
                    available,
                }) => {
                    tracing::debug!(%station, %actor, required, available, "insufficient funds");
                    self.stats.insufficient_funds += 1;
                    self.return_tokens(&refunds);
                    return CombinationOutcome::InsufficientFunds {
                        refunds,
                        required,
                        available,
                    };
                }
                Err(ChargeFailure::Ledger) => {
                    self.stats.ledger_errors += 1;
                    self.return_tokens(&refunds);
                    return CombinationOutcome::LedgerError { refunds };
                }
            }
        };

        self.vault.grant_token(actor, recipe.result.clone());
        self.stats.successes += 1;
        tracing::info!(
            %station,
            %actor,
            recipe = recipe.id,
            result = %recipe.result.kind,
            charged = charged.total(),
            "combination resolved"
        );
        CombinationOutcome::Success {
            recipe: recipe.id,
            result: recipe.result.clone(),
            charged,
        }
    }

    /// Debits `cost` primary-first. Leaves balances untouched on failure.
    fn charge(&mut self, actor: ActorId, cost: u64) -> Result<Charge, ChargeFailure> {
        let primary = match self.ledger.primary_balance(actor) {
            Ok(balance) => balance,
            Err(e) => return Err(self.ledger_failed(actor, &e)),
        };
        let reserve = match self.ledger.reserve_balance(actor) {
            Ok(balance) => balance,
            Err(e) => return Err(self.ledger_failed(actor, &e)),
        };

        let Some(plan) = Charge::plan(cost, primary, reserve) else {
            return Err(ChargeFailure::Insufficient {
                required: cost,
                available: primary.saturating_add(reserve),
            });
        };

        if plan.primary > 0 {
            if let Err(e) = self.ledger.debit_primary(actor, plan.primary) {
                return Err(self.ledger_failed(actor, &e));
            }
        }

        if plan.reserve > 0 {
            if let Err(e) = self.ledger.debit_reserve(actor, plan.reserve) {
                tracing::error!(
                    %actor,
                    primary = plan.primary,
                    reserve = plan.reserve,
                    error = %e,
                    "reserve debit failed after primary debit, rolling back"
                );
                if plan.primary > 0 {
                    if let Err(credit) = self.ledger.credit_primary(actor, plan.primary) {
                        tracing::error!(
                            %actor,
                            amount = plan.primary,
                            error = %credit,
                            "primary rollback failed, balance is short"
                        );
                        self.degraded.ledger = Some(format!("rollback failed for {actor}: {credit}"));
                    }
                }
                return Err(self.ledger_failed(actor, &e));
            }
        }

        Ok(plan)
    }

    fn ledger_failed(&mut self, actor: ActorId, error: &LedgerError) -> ChargeFailure {
        match error {
            LedgerError::Unavailable(reason) => {
                tracing::error!(%actor, %reason, "ledger unavailable, refusing new sessions");
                self.degraded.ledger = Some(reason.clone());
            }
            LedgerError::Insufficient { .. } => {
                tracing::warn!(%actor, %error, "ledger rejected a planned debit");
            }
        }
        ChargeFailure::Ledger
    }

    fn expire_session(&mut self, station: &StationId, handle: TimerHandle) -> Option<CombinationOutcome> {
        let deadline = match self.sessions.get(station) {
            Some(session) if session.is_current_timer(handle) => {
                session.pending().map(|pending| pending.deadline)
            }
            _ => None,
        };
        let Some(deadline) = deadline else {
            self.stats.stale_timers += 1;
            tracing::debug!(%station, handle = handle.raw(), "stale timer ignored");
            return None;
        };
        if self.now < deadline {
            tracing::debug!(%station, now = self.now, deadline, "early timeout ignored");
            return None;
        }
        let pending = self
            .sessions
            .get_mut(station)
            .and_then(StationSession::take_pending)?;

        self.timers.disarm(handle);
        self.stats.timeouts += 1;
        tracing::debug!(%station, owner = %pending.owner, "session timed out");

        let refunds = vec![(pending.owner, pending.token)];
        self.return_tokens(&refunds);
        let outcome = CombinationOutcome::Timeout {
            refunds,
            cancelled: false,
        };
        self.effects.notify(station, pending.owner, &outcome);
        Some(outcome)
    }

    fn remove_station(&mut self, station: &StationId) -> Option<CombinationOutcome> {
        let mut session = self.sessions.remove(station)?;
        let pending = session.take_pending()?;

        self.timers.disarm(pending.timer);
        self.stats.cancellations += 1;
        tracing::debug!(%station, owner = %pending.owner, "session cancelled");

        let refunds = vec![(pending.owner, pending.token)];
        self.return_tokens(&refunds);
        let outcome = CombinationOutcome::Timeout {
            refunds,
            cancelled: true,
        };
        self.effects.notify(station, pending.owner, &outcome);
        Some(outcome)
    }

    fn return_tokens(&self, refunds: &[Refund]) {
        for (owner, token) in refunds {
            self.vault.return_token(*owner, token.clone());
        }
    }

    // ========================================================================
    // Catalog & Service State
    // ========================================================================

    /// Swaps in a new catalog. Clears a catalog-caused outage.
    pub fn reload_catalog(&mut self, catalog: RecipeCatalog) -> u64 {
        self.degraded.catalog = None;
        self.catalog.replace(catalog)
    }

    /// Parses a catalog source and swaps it in.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the text cannot be parsed; the old catalog stays
    /// active and new sessions are refused until a reload succeeds.
    pub fn reload_catalog_from_str(&mut self, text: &str) -> CraftingResult<Vec<CatalogWarning>> {
        match CatalogSource::from_toml_str(text) {
            Ok(source) => {
                let (catalog, warnings) = source.build();
                self.reload_catalog(catalog);
                Ok(warnings)
            }
            Err(e) => {
                tracing::error!(error = %e, "catalog reload failed, refusing new sessions");
                self.degraded.catalog = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Clears every outage cause.
    pub fn restore_service(&mut self) {
        if self.degraded.reason().is_some() {
            tracing::info!("station service restored");
        }
        self.degraded = Degraded::default();
    }

    /// Returns true if new sessions are accepted.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.degraded.reason().is_none()
    }

    /// Why new sessions are refused, if they are.
    #[must_use]
    pub fn unavailable_reason(&self) -> Option<String> {
        self.degraded.reason()
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Current logical tick.
    #[must_use]
    pub fn now(&self) -> Tick {
        self.now
    }

    /// Phase of a station.
    #[must_use]
    pub fn phase(&self, station: &StationId) -> SessionPhase {
        self.sessions.phase(station)
    }

    /// The token waiting at a station.
    #[must_use]
    pub fn pending(&self, station: &StationId) -> Option<&PendingInput> {
        self.sessions.get(station).and_then(|s| s.pending())
    }

    /// Stations holding a pending token.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.sessions.awaiting_count()
    }

    /// Known stations.
    #[must_use]
    pub fn station_count(&self) -> usize {
        self.sessions.len()
    }

    /// Earliest pending deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Tick> {
        self.timers.next_deadline()
    }

    /// Engine counters.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    /// Shared catalog handle.
    #[must_use]
    pub fn catalog(&self) -> &Arc<CatalogHandle> {
        &self.catalog
    }

    /// The cost ledger.
    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// The token vault.
    pub fn vault(&self) -> &V {
        &self.vault
    }

    /// The effects sink.
    pub fn effects(&self) -> &E {
        &self.effects
    }
}
