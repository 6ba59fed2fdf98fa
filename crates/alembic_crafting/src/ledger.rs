//! # Cost Ledger
//!
//! The engine only ever talks to balances through [`CostLedger`].
//! Persistence and connectivity are the ledger's business; the engine
//! needs synchronous answers from its control thread.
//!
//! [`MemoryLedger`] is the in-process reference implementation. It keeps
//! balances behind a lock and, when a [`BalanceJournal`] is attached,
//! appends every mutation to it without waiting for disk.

use alembic_shared::ActorId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::config::EngineConfig;
use crate::error::CraftingResult;
use crate::journal::{BalanceJournal, JournalOp, JournalOpKind, JournalStats};

/// One of the two currency pools.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum BalancePool {
    /// Spent first, regenerates.
    Primary = 1,
    /// Stored funds, spent only after primary is exhausted.
    Reserve = 2,
}

impl BalancePool {
    /// Converts from the on-disk tag.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Primary),
            2 => Some(Self::Reserve),
            _ => None,
        }
    }
}

/// Ledger failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The pool holds less than requested.
    #[error("insufficient {pool:?} balance: requested {requested}, available {available}")]
    Insufficient {
        /// Pool that was short.
        pool: BalancePool,
        /// Amount requested.
        requested: u64,
        /// Amount available.
        available: u64,
    },

    /// The backing store cannot be reached.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Balance queries and ordered debit across two pools.
///
/// Called only from the engine's control thread.
pub trait CostLedger {
    /// Returns the actor's primary balance.
    ///
    /// # Errors
    ///
    /// `Unavailable` if the ledger cannot answer.
    fn primary_balance(&self, actor: ActorId) -> Result<u64, LedgerError>;

    /// Returns the actor's reserve balance.
    ///
    /// # Errors
    ///
    /// `Unavailable` if the ledger cannot answer.
    fn reserve_balance(&self, actor: ActorId) -> Result<u64, LedgerError>;

    /// Removes `amount` from the primary pool.
    ///
    /// # Errors
    ///
    /// `Insufficient` or `Unavailable`; nothing is removed on error.
    fn debit_primary(&self, actor: ActorId, amount: u64) -> Result<(), LedgerError>;

    /// Removes `amount` from the reserve pool.
    ///
    /// # Errors
    ///
    /// `Insufficient` or `Unavailable`; nothing is removed on error.
    fn debit_reserve(&self, actor: ActorId, amount: u64) -> Result<(), LedgerError>;

    /// Adds `amount` to the primary pool.
    ///
    /// # Errors
    ///
    /// `Unavailable` if the ledger cannot be written.
    fn credit_primary(&self, actor: ActorId, amount: u64) -> Result<(), LedgerError>;

    /// Adds `amount` to the reserve pool.
    ///
    /// # Errors
    ///
    /// `Unavailable` if the ledger cannot be written.
    fn credit_reserve(&self, actor: ActorId, amount: u64) -> Result<(), LedgerError>;
}

impl<L: CostLedger + ?Sized> CostLedger for Arc<L> {
    fn primary_balance(&self, actor: ActorId) -> Result<u64, LedgerError> {
        (**self).primary_balance(actor)
    }

    fn reserve_balance(&self, actor: ActorId) -> Result<u64, LedgerError> {
        (**self).reserve_balance(actor)
    }

    fn debit_primary(&self, actor: ActorId, amount: u64) -> Result<(), LedgerError> {
        (**self).debit_primary(actor, amount)
    }

    fn debit_reserve(&self, actor: ActorId, amount: u64) -> Result<(), LedgerError> {
        (**self).debit_reserve(actor, amount)
    }

    fn credit_primary(&self, actor: ActorId, amount: u64) -> Result<(), LedgerError> {
        (**self).credit_primary(actor, amount)
    }

    fn credit_reserve(&self, actor: ActorId, amount: u64) -> Result<(), LedgerError> {
        (**self).credit_reserve(actor, amount)
    }
}

/// How a cost is split across the two pools.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Charge {
    /// Taken from primary.
    pub primary: u64,
    /// Taken from reserve.
    pub reserve: u64,
}

impl Charge {
    /// Splits `cost` primary-first. `None` if both pools together fall short.
    #[must_use]
    pub fn plan(cost: u64, primary: u64, reserve: u64) -> Option<Self> {
        let from_primary = primary.min(cost);
        let remainder = cost - from_primary;
        (remainder <= reserve).then_some(Self {
            primary: from_primary,
            reserve: remainder,
        })
    }

    /// Total charged.
    #[inline]
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.primary + self.reserve
    }
}

/// An actor's pair of pools.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Primary pool.
    pub primary: u64,
    /// Reserve pool.
    pub reserve: u64,
}

impl Balance {
    /// Creates a balance.
    #[must_use]
    pub const fn new(primary: u64, reserve: u64) -> Self {
        Self { primary, reserve }
    }

    /// Both pools together.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.primary.saturating_add(self.reserve)
    }

    fn pool_mut(&mut self, pool: BalancePool) -> &mut u64 {
        match pool {
            BalancePool::Primary => &mut self.primary,
            BalancePool::Reserve => &mut self.reserve,
        }
    }
}

/// In-memory ledger with optional journaling.
#[derive(Default)]
pub struct MemoryLedger {
    balances: Mutex<HashMap<ActorId, Balance>>,
    journal: Option<Arc<BalanceJournal>>,
}

impl MemoryLedger {
    /// Creates an empty ledger without persistence.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty ledger that journals every mutation.
    #[must_use]
    pub fn with_journal(journal: Arc<BalanceJournal>) -> Self {
        Self {
            balances: Mutex::new(HashMap::new()),
            journal: Some(journal),
        }
    }

    /// Creates a ledger, journaling to `config.journal` when it is set.
    ///
    /// # Errors
    ///
    /// `Journal` if the journal cannot be opened.
    pub fn from_config(config: &EngineConfig) -> CraftingResult<Self> {
        match &config.journal {
            Some(journal) => Ok(Self::with_journal(Arc::new(BalanceJournal::open(journal)?))),
            None => Ok(Self::new()),
        }
    }

    /// Overwrites an actor's balance.
    pub fn set_balance(&self, actor: ActorId, balance: Balance) {
        self.balances.lock().insert(actor, balance);
        self.record(JournalOpKind::Set, actor, BalancePool::Primary, balance.primary, balance.primary);
        self.record(JournalOpKind::Set, actor, BalancePool::Reserve, balance.reserve, balance.reserve);
    }

    /// Returns an actor's balance (zero if unknown).
    #[must_use]
    pub fn balance(&self, actor: ActorId) -> Balance {
        self.balances.lock().get(&actor).copied().unwrap_or_default()
    }

    /// Writer statistics of the attached journal, if any.
    #[must_use]
    pub fn journal_stats(&self) -> Option<JournalStats> {
        self.journal.as_ref().map(|journal| journal.stats())
    }

    fn debit(&self, actor: ActorId, pool: BalancePool, amount: u64) -> Result<(), LedgerError> {
        let after = {
            let mut balances = self.balances.lock();
            let slot = balances.entry(actor).or_default().pool_mut(pool);
            if *slot < amount {
                return Err(LedgerError::Insufficient {
                    pool,
                    requested: amount,
                    available: *slot,
                });
            }
            *slot -= amount;
            *slot
        };
        self.record(JournalOpKind::Debit, actor, pool, amount, after);
        Ok(())
    }

    fn credit(&self, actor: ActorId, pool: BalancePool, amount: u64) -> Result<(), LedgerError> {
        let after = {
            let mut balances = self.balances.lock();
            let slot = balances.entry(actor).or_default().pool_mut(pool);
            *slot = slot.saturating_add(amount);
            *slot
        };
        self.record(JournalOpKind::Credit, actor, pool, amount, after);
        Ok(())
    }

    /// Fire-and-forget append; the in-memory change is authoritative.
    fn record(&self, kind: JournalOpKind, actor: ActorId, pool: BalancePool, amount: u64, after: u64) {
        let Some(journal) = &self.journal else {
            return;
        };
        let op = JournalOp {
            kind,
            actor,
            pool,
            amount,
            balance_after: after,
        };
        if let Err(e) = journal.append(op) {
            tracing::warn!(%actor, ?pool, error = %e, "balance journal append dropped");
        }
    }
}

impl CostLedger for MemoryLedger {
    fn primary_balance(&self, actor: ActorId) -> Result<u64, LedgerError> {
        Ok(self.balance(actor).primary)
    }

    fn reserve_balance(&self, actor: ActorId) -> Result<u64, LedgerError> {
        Ok(self.balance(actor).reserve)
    }

    fn debit_primary(&self, actor: ActorId, amount: u64) -> Result<(), LedgerError> {
        self.debit(actor, BalancePool::Primary, amount)
    }

    fn debit_reserve(&self, actor: ActorId, amount: u64) -> Result<(), LedgerError> {
        self.debit(actor, BalancePool::Reserve, amount)
    }

    fn credit_primary(&self, actor: ActorId, amount: u64) -> Result<(), LedgerError> {
        self.credit(actor, BalancePool::Primary, amount)
    }

    fn credit_reserve(&self, actor: ActorId, amount: u64) -> Result<(), LedgerError> {
        self.credit(actor, BalancePool::Reserve, amount)
    }
}
