//! # Station Timing Constants
//!
//! Default timing for combination stations.
//! Hosts may override the timeout through `EngineConfig`.

/// Logical ticks per second driven by the station host.
pub const TICK_RATE: u32 = 20;

/// Seconds a station waits for the second token before refunding the first.
pub const SESSION_TIMEOUT_SECS: u64 = 6;

/// Default session timeout expressed in logical ticks.
pub const DEFAULT_SESSION_TIMEOUT_TICKS: u64 = SESSION_TIMEOUT_SECS * TICK_RATE as u64;

/// Upper bound on a token type name (bytes).
pub const MAX_TOKEN_NAME_LEN: usize = 64;
