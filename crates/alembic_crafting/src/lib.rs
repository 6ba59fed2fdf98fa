//! # ALEMBIC Combination Stations
//!
//! Actors drop two tokens into a station, one after the other. The station
//! looks the pair up in a rank-gated recipe catalog, charges the cost
//! against two balance pools and hands out the result.
//!
//! ## Design Principles
//!
//! 1. **One control thread** - every session transition goes through `&mut CombinationEngine`
//! 2. **Nothing is lost** - every token that does not become a result is refunded to its owner
//! 3. **All-or-nothing charging** - a partial debit is rolled back before the outcome is reported
//! 4. **External configuration** - engine settings and recipes live in TOML files
//!
//! ## Example
//!
//! ```rust,ignore
//! use alembic_crafting::{CatalogSource, CombinationEngine, EngineConfig, StationEvent};
//!
//! let config = EngineConfig::from_file("data/engine.toml")?;
//! let (catalog, _warnings) = CatalogSource::from_file("data/recipes.toml")?.build();
//!
//! let mut engine = CombinationEngine::new(
//!     &config,
//!     Arc::new(CatalogHandle::new(catalog)),
//!     ledger,
//!     vault,
//!     LogEffects,
//! );
//!
//! engine.handle(StationEvent::TokenSubmitted { station, actor, rank, token })?;
//! let expired = engine.advance_to(tick);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod catalog;
pub mod config;
pub mod effects;
pub mod engine;
pub mod error;
pub mod host;
pub mod journal;
pub mod ledger;
pub mod session;
pub mod timer;
pub mod vault;

pub use catalog::{CatalogHandle, CatalogWarning, Recipe, RecipeCatalog, RecipeEntry, RecipeId};
pub use config::{CatalogSource, EngineConfig};
pub use effects::{BufferedEffects, EffectsSink, LogEffects, NullEffects, StationEffect};
pub use engine::{CombinationEngine, CombinationOutcome, EngineStats, Refund, StationEvent};
pub use error::{CraftingError, CraftingResult};
pub use host::{HostCommand, StationHost};
pub use journal::{read_journal, BalanceJournal, JournalConfig, JournalHandle, JournalStats};
pub use ledger::{Balance, BalancePool, Charge, CostLedger, LedgerError, MemoryLedger};
pub use session::{PendingInput, SessionPhase, SessionRegistry, StationSession};
pub use timer::{Expired, TimeoutScheduler, TimerHandle};
pub use vault::{MemoryVault, TokenVault};
