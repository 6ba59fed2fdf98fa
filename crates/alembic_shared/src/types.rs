//! # Shared Identifiers
//!
//! Actors, stations and tokens as seen by every unit of the engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Logical time, in ticks.
pub type Tick = u64;

/// Progression level gating recipe access.
pub type Rank = u32;

/// Unique identifier for an actor (player, NPC, automation).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActorId(pub u64);

impl ActorId {
    /// Returns the raw id.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor#{}", self.0)
    }
}

/// Coordinate key of a combination station.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StationId {
    /// World (dimension) the station lives in.
    pub world: String,
    /// Block X coordinate.
    pub x: i32,
    /// Block Y coordinate.
    pub y: i32,
    /// Block Z coordinate.
    pub z: i32,
}

impl StationId {
    /// Creates a station id from a world name and block coordinate.
    #[must_use]
    pub fn new(world: impl Into<String>, x: i32, y: i32, z: i32) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
        }
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{},{},{}", self.world, self.x, self.y, self.z)
    }
}

/// Type tag of a token.
///
/// Names are trimmed and lowercased on construction so that
/// `"Iron_Ingot"` and `"iron_ingot"` are the same type.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct TokenType(Arc<str>);

impl TokenType {
    /// Creates a normalised token type.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name.trim().to_ascii_lowercase()))
    }

    /// Returns the normalised name.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the name is empty after normalisation.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenType({})", self.0)
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TokenType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for TokenType {
    fn from(name: String) -> Self {
        Self::new(&name)
    }
}

impl From<TokenType> for String {
    fn from(kind: TokenType) -> Self {
        kind.0.to_string()
    }
}

/// A typed resource unit held by an actor.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token {
    /// Token type.
    pub kind: TokenType,
    /// Number of units.
    pub quantity: u32,
}

impl Token {
    /// Creates a token stack.
    #[must_use]
    pub fn new(kind: impl Into<TokenType>, quantity: u32) -> Self {
        Self {
            kind: kind.into(),
            quantity,
        }
    }

    /// Creates a single unit of `kind`.
    #[must_use]
    pub fn single(kind: impl Into<TokenType>) -> Self {
        Self::new(kind, 1)
    }

    /// Returns one unit of this token's type.
    #[must_use]
    pub fn unit(&self) -> Self {
        Self {
            kind: self.kind.clone(),
            quantity: 1,
        }
    }
}
