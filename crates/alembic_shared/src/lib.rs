//! # ALEMBIC Shared
//!
//! Common identifiers used by the combination engine and its hosts.
//!
//! ## CRITICAL RULE
//!
//! This crate holds plain data only. Engine state, ledgers and timers
//! live in `alembic_crafting`.

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod constants;
pub mod types;

pub use constants::{
    DEFAULT_SESSION_TIMEOUT_TICKS, MAX_TOKEN_NAME_LEN, SESSION_TIMEOUT_SECS, TICK_RATE,
};
pub use types::{ActorId, Rank, StationId, Tick, Token, TokenType};
