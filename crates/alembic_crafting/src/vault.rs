//! # Token Vault
//!
//! Where refunded and granted tokens go. Slot placement belongs to the
//! host's inventory system; the engine only hands tokens back.

use alembic_shared::{ActorId, Token, TokenType};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Receives tokens leaving a station.
///
/// Must not fail: a token that cannot be placed is the host's problem
/// (drop it in the world, mail it, etc.).
pub trait TokenVault {
    /// Gives a previously submitted token back to its owner.
    fn return_token(&self, actor: ActorId, token: Token);

    /// Gives a newly created token to an actor.
    fn grant_token(&self, actor: ActorId, token: Token);
}

impl<V: TokenVault + ?Sized> TokenVault for Arc<V> {
    fn return_token(&self, actor: ActorId, token: Token) {
        (**self).return_token(actor, token);
    }

    fn grant_token(&self, actor: ActorId, token: Token) {
        (**self).grant_token(actor, token);
    }
}

/// Per-actor token counts kept in memory.
#[derive(Debug, Default)]
pub struct MemoryVault {
    holdings: Mutex<HashMap<ActorId, HashMap<TokenType, u32>>>,
}

impl MemoryVault {
    /// Creates an empty vault.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds tokens to an actor.
    pub fn deposit(&self, actor: ActorId, token: &Token) {
        let mut holdings = self.holdings.lock();
        let count = holdings
            .entry(actor)
            .or_default()
            .entry(token.kind.clone())
            .or_insert(0);
        *count = count.saturating_add(token.quantity);
    }

    /// Takes one unit of `kind` from an actor, ready for submission.
    ///
    /// Returns `None` if the actor holds none.
    pub fn withdraw(&self, actor: ActorId, kind: &TokenType) -> Option<Token> {
        let mut holdings = self.holdings.lock();
        let tokens = holdings.get_mut(&actor)?;
        let count = tokens.get_mut(kind)?;
        if *count == 0 {
            return None;
        }
        *count -= 1;
        if *count == 0 {
            tokens.remove(kind);
        }
        Some(Token::single(kind.clone()))
    }

    /// Counts the units of `kind` an actor holds.
    #[must_use]
    pub fn count(&self, actor: ActorId, kind: &TokenType) -> u32 {
        self.holdings
            .lock()
            .get(&actor)
            .and_then(|tokens| tokens.get(kind))
            .copied()
            .unwrap_or(0)
    }

    /// Total units an actor holds across all types.
    #[must_use]
    pub fn total(&self, actor: ActorId) -> u64 {
        self.holdings
            .lock()
            .get(&actor)
            .map_or(0, |tokens| tokens.values().map(|&c| u64::from(c)).sum())
    }
}

impl TokenVault for MemoryVault {
    fn return_token(&self, actor: ActorId, token: Token) {
        self.deposit(actor, &token);
    }

    fn grant_token(&self, actor: ActorId, token: Token) {
        self.deposit(actor, &token);
    }
}
