//! # Crafting Error Types
//!
//! Faults that stop an operation. Expected results such as "no recipe"
//! or "not enough funds" are outcomes, not errors.

use thiserror::Error;

/// Errors that can occur in the combination engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CraftingError {
    /// Invalid configuration file or catalog source.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// New sessions are refused until service is restored.
    #[error("station service unavailable: {reason}")]
    ServiceUnavailable {
        /// Why new sessions are disabled.
        reason: String,
    },

    /// A submitted token carried no units.
    #[error("token {0} has zero quantity")]
    EmptyToken(String),

    /// A submitted token's type name is blank or too long.
    #[error("invalid token type {0:?}")]
    InvalidToken(String),

    /// The station already holds a first token.
    #[error("station {0} already holds a pending token")]
    StationBusy(String),

    /// Balance journal I/O failure.
    #[error("journal failure: {0}")]
    Journal(String),

    /// The station host thread is gone.
    #[error("station host stopped")]
    HostStopped,
}

/// Result type for crafting operations.
pub type CraftingResult<T> = Result<T, CraftingError>;
