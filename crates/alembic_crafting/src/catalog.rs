//! # Recipe Catalog
//!
//! **Rank-Gated Pair Resolution with Atomic Reload**
//!
//! This module implements the recipe index with the following guarantees:
//!
//! 1. **Symmetric**: `(A, B)` and `(B, A)` resolve to the same recipe
//! 2. **Rank Gated**: a recipe is only visible at or above its minimum rank
//! 3. **Best Tier Wins**: among eligible recipes for one pair, the highest
//!    minimum rank is returned; equal ranks fall back to registration order
//! 4. **Immutable Snapshots**: a reload swaps the whole catalog at once
//!
//! ## Example
//!
//! ```rust,ignore
//! let mut catalog = RecipeCatalog::new();
//! catalog.add_recipe(
//!     Recipe::new(1, "iron_ore", "coal", Token::single("iron_ingot"))
//!         .with_cost(5)
//!         .with_rank(2),
//! )?;
//!
//! let recipe = catalog.find(3, &"coal".into(), &"iron_ore".into());
//! assert_eq!(recipe.map(|r| r.id), Some(1));
//! ```

use alembic_shared::{Rank, Token, TokenType, MAX_TOKEN_NAME_LEN};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::error::{CraftingError, CraftingResult};

/// Unique identifier for a recipe.
pub type RecipeId = u32;

/// Order-independent key for an input pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct PairKey(TokenType, TokenType);

impl PairKey {
    fn new(a: &TokenType, b: &TokenType) -> Self {
        if a <= b {
            Self(a.clone(), b.clone())
        } else {
            Self(b.clone(), a.clone())
        }
    }
}

/// A combination recipe.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    /// Unique recipe identifier.
    pub id: RecipeId,
    /// Human-readable name.
    pub name: String,
    /// Minimum actor rank required.
    pub min_rank: Rank,
    /// First input type (order does not matter).
    pub input_a: TokenType,
    /// Second input type (order does not matter).
    pub input_b: TokenType,
    /// Currency charged on success.
    pub cost: u64,
    /// Token granted on success.
    pub result: Token,
}

impl Recipe {
    /// Creates a free, rank-0 recipe named after its result.
    #[must_use]
    pub fn new(
        id: RecipeId,
        input_a: impl Into<TokenType>,
        input_b: impl Into<TokenType>,
        result: Token,
    ) -> Self {
        Self {
            id,
            name: result.kind.to_string(),
            min_rank: 0,
            input_a: input_a.into(),
            input_b: input_b.into(),
            cost: 0,
            result,
        }
    }

    /// Sets the minimum rank.
    #[must_use]
    pub fn with_rank(mut self, rank: Rank) -> Self {
        self.min_rank = rank;
        self
    }

    /// Sets the cost.
    #[must_use]
    pub fn with_cost(mut self, cost: u64) -> Self {
        self.cost = cost;
        self
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Returns true if this recipe consumes the unordered pair `(a, b)`.
    #[must_use]
    pub fn matches(&self, a: &TokenType, b: &TokenType) -> bool {
        (self.input_a == *a && self.input_b == *b) || (self.input_a == *b && self.input_b == *a)
    }

    /// Returns true if `kind` is one of the inputs.
    #[must_use]
    pub fn uses(&self, kind: &TokenType) -> bool {
        self.input_a == *kind || self.input_b == *kind
    }
}

/// One row of a catalog source, as read from configuration.
///
/// Numeric fields are signed so that bad values reach validation
/// instead of failing the whole file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeEntry {
    /// Recipe id.
    pub id: i64,
    /// Optional display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Minimum rank.
    #[serde(default)]
    pub min_rank: i64,
    /// Exactly two input token types.
    pub inputs: Vec<String>,
    /// Cost charged on success.
    #[serde(default)]
    pub cost: i64,
    /// Result token type.
    pub result: String,
    /// Result quantity.
    #[serde(default = "default_result_quantity")]
    pub result_quantity: i64,
}

const fn default_result_quantity() -> i64 {
    1
}

/// A recipe entry that was dropped or demoted during load.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogWarning {
    /// Id outside the valid range.
    #[error("recipe entry #{index}: id {id} out of range")]
    InvalidId {
        /// Position in the source list.
        index: usize,
        /// Offending id.
        id: i64,
    },
    /// Id already used by an earlier entry.
    #[error("recipe {id}: duplicate id, entry dropped")]
    DuplicateId {
        /// Duplicate id.
        id: RecipeId,
    },
    /// Cost below zero.
    #[error("recipe {id}: negative cost {cost}, entry dropped")]
    NegativeCost {
        /// Recipe id.
        id: RecipeId,
        /// Offending cost.
        cost: i64,
    },
    /// Rank outside `0..=u32::MAX`.
    #[error("recipe {id}: invalid minimum rank {rank}, entry dropped")]
    InvalidRank {
        /// Recipe id.
        id: RecipeId,
        /// Offending rank.
        rank: i64,
    },
    /// Not exactly two inputs.
    #[error("recipe {id}: expected 2 inputs, found {found}, entry dropped")]
    InputArity {
        /// Recipe id.
        id: RecipeId,
        /// Number of inputs found.
        found: usize,
    },
    /// Blank token name.
    #[error("recipe {id}: empty token name, entry dropped")]
    EmptyToken {
        /// Recipe id.
        id: RecipeId,
    },
    /// Token type not in the known list.
    #[error("recipe {id}: unknown token type {token}, entry dropped")]
    UnknownToken {
        /// Recipe id.
        id: RecipeId,
        /// Unknown token name.
        token: String,
    },
    /// Result quantity outside `1..=u32::MAX`.
    #[error("recipe {id}: invalid result quantity {quantity}, entry dropped")]
    InvalidQuantity {
        /// Recipe id.
        id: RecipeId,
        /// Offending quantity.
        quantity: i64,
    },
    /// Token name longer than the submission limit.
    #[error("recipe {id}: token name {token:?} too long, entry dropped")]
    TokenNameTooLong {
        /// Recipe id.
        id: RecipeId,
        /// Offending token name.
        token: String,
    },
    /// Row that does not have the shape of a recipe entry.
    #[error("recipe entry #{index}: {reason}, entry dropped")]
    Malformed {
        /// Position in the source list.
        index: usize,
        /// Deserializer message.
        reason: String,
    },
    /// Same pair and rank as an earlier recipe; the earlier one always wins.
    #[error("recipe {id}: shadowed by recipe {by} (same pair and rank)")]
    Shadowed {
        /// Shadowed recipe id.
        id: RecipeId,
        /// Recipe that wins.
        by: RecipeId,
    },
}

/// Immutable recipe index.
#[derive(Debug, Default, Clone)]
pub struct RecipeCatalog {
    /// Recipes in registration order.
    recipes: Vec<Recipe>,
    /// Pair -> indices into `recipes`, in registration order.
    by_pair: HashMap<PairKey, Vec<usize>>,
    /// Id -> index into `recipes`.
    by_id: HashMap<RecipeId, usize>,
}

impl RecipeCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a recipe.
    ///
    /// # Errors
    ///
    /// Returns error if the recipe ID already exists.
    pub fn add_recipe(&mut self, recipe: Recipe) -> CraftingResult<()> {
        if self.by_id.contains_key(&recipe.id) {
            return Err(CraftingError::InvalidConfig(format!(
                "Recipe ID {} already exists",
                recipe.id
            )));
        }

        let index = self.recipes.len();
        self.by_pair
            .entry(PairKey::new(&recipe.input_a, &recipe.input_b))
            .or_default()
            .push(index);
        self.by_id.insert(recipe.id, index);
        self.recipes.push(recipe);

        Ok(())
    }

    /// Builds a catalog from source entries.
    ///
    /// Malformed entries are skipped and reported; loading never fails.
    /// When `known_tokens` is given, entries naming any other type are dropped.
    #[must_use]
    pub fn from_entries(
        entries: &[RecipeEntry],
        known_tokens: Option<&HashSet<TokenType>>,
    ) -> (Self, Vec<CatalogWarning>) {
        Self::from_rows(
            entries.iter().cloned().enumerate().map(|(i, e)| (i, Ok(e))),
            known_tokens,
        )
    }

    /// Builds a catalog from rows that may already have failed to parse.
    ///
    /// Each row carries its position in the source list.
    pub(crate) fn from_rows(
        rows: impl IntoIterator<Item = (usize, Result<RecipeEntry, CatalogWarning>)>,
        known_tokens: Option<&HashSet<TokenType>>,
    ) -> (Self, Vec<CatalogWarning>) {
        let mut catalog = Self::new();
        let mut warnings = Vec::new();

        for (index, row) in rows {
            match row.and_then(|entry| validate_entry(index, &entry, known_tokens)) {
                Ok(recipe) => {
                    if catalog.by_id.contains_key(&recipe.id) {
                        warnings.push(CatalogWarning::DuplicateId { id: recipe.id });
                        continue;
                    }
                    if let Some(winner) = catalog.shadowing(&recipe) {
                        warnings.push(CatalogWarning::Shadowed {
                            id: recipe.id,
                            by: winner,
                        });
                    }
                    // Id uniqueness checked above.
                    let _ = catalog.add_recipe(recipe);
                }
                Err(warning) => warnings.push(warning),
            }
        }

        for warning in &warnings {
            tracing::warn!(%warning, "catalog entry rejected");
        }

        (catalog, warnings)
    }

    /// Returns the id of an earlier recipe with the same pair and rank.
    fn shadowing(&self, recipe: &Recipe) -> Option<RecipeId> {
        self.by_pair
            .get(&PairKey::new(&recipe.input_a, &recipe.input_b))?
            .iter()
            .map(|&idx| &self.recipes[idx])
            .find(|existing| existing.min_rank == recipe.min_rank)
            .map(|existing| existing.id)
    }

    /// Resolves an input pair for an actor of `actor_rank`.
    ///
    /// Symmetric in `a` and `b`. Returns the eligible recipe with the
    /// highest minimum rank; equal ranks resolve to the first registered.
    #[must_use]
    pub fn find(&self, actor_rank: Rank, a: &TokenType, b: &TokenType) -> Option<&Recipe> {
        let candidates = self.by_pair.get(&PairKey::new(a, b))?;

        let mut best: Option<&Recipe> = None;
        for &idx in candidates {
            let recipe = &self.recipes[idx];
            if recipe.min_rank > actor_rank {
                continue;
            }
            match best {
                Some(current) if current.min_rank >= recipe.min_rank => {}
                _ => best = Some(recipe),
            }
        }
        best
    }

    /// Gets a recipe by ID.
    #[must_use]
    pub fn get_recipe(&self, id: RecipeId) -> Option<&Recipe> {
        self.by_id.get(&id).map(|&idx| &self.recipes[idx])
    }

    /// Returns all recipes in registration order.
    pub fn all_recipes(&self) -> impl Iterator<Item = &Recipe> {
        self.recipes.iter()
    }

    /// Returns recipes that take `kind` as one of their inputs.
    pub fn recipes_using<'a>(&'a self, kind: &'a TokenType) -> impl Iterator<Item = &'a Recipe> {
        self.recipes.iter().filter(move |recipe| recipe.uses(kind))
    }

    /// Returns the number of recipes.
    #[must_use]
    pub fn recipe_count(&self) -> usize {
        self.recipes.len()
    }

    /// Same as [`Self::recipe_count`].
    #[must_use]
    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    /// Returns true if the catalog holds no recipes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }
}

fn validate_entry(
    index: usize,
    entry: &RecipeEntry,
    known_tokens: Option<&HashSet<TokenType>>,
) -> Result<Recipe, CatalogWarning> {
    let id = RecipeId::try_from(entry.id)
        .map_err(|_| CatalogWarning::InvalidId { index, id: entry.id })?;

    if entry.cost < 0 {
        return Err(CatalogWarning::NegativeCost {
            id,
            cost: entry.cost,
        });
    }
    let min_rank = Rank::try_from(entry.min_rank).map_err(|_| CatalogWarning::InvalidRank {
        id,
        rank: entry.min_rank,
    })?;
    let quantity = u32::try_from(entry.result_quantity)
        .ok()
        .filter(|&q| q > 0)
        .ok_or(CatalogWarning::InvalidQuantity {
            id,
            quantity: entry.result_quantity,
        })?;

    let [first, second] = entry.inputs.as_slice() else {
        return Err(CatalogWarning::InputArity {
            id,
            found: entry.inputs.len(),
        });
    };

    let input_a = TokenType::new(first);
    let input_b = TokenType::new(second);
    let result = TokenType::new(&entry.result);

    for kind in [&input_a, &input_b, &result] {
        if kind.is_empty() {
            return Err(CatalogWarning::EmptyToken { id });
        }
        if kind.as_str().len() > MAX_TOKEN_NAME_LEN {
            return Err(CatalogWarning::TokenNameTooLong {
                id,
                token: kind.to_string(),
            });
        }
        if let Some(known) = known_tokens {
            if !known.contains(kind) {
                return Err(CatalogWarning::UnknownToken {
                    id,
                    token: kind.to_string(),
                });
            }
        }
    }

    let cost = entry.cost.unsigned_abs();
    let mut recipe = Recipe::new(id, input_a, input_b, Token::new(result, quantity))
        .with_rank(min_rank)
        .with_cost(cost);
    if let Some(name) = entry.name.as_deref().filter(|n| !n.trim().is_empty()) {
        recipe = recipe.with_name(name);
    }
    Ok(recipe)
}

/// Shared handle to the active catalog snapshot.
///
/// Readers clone the inner `Arc` once per resolution, so a reload never
/// tears a lookup that is already in progress.
#[derive(Debug)]
pub struct CatalogHandle {
    current: RwLock<Arc<RecipeCatalog>>,
    generation: AtomicU64,
}

impl CatalogHandle {
    /// Creates a handle around an initial catalog.
    #[must_use]
    pub fn new(catalog: RecipeCatalog) -> Self {
        Self {
            current: RwLock::new(Arc::new(catalog)),
            generation: AtomicU64::new(0),
        }
    }

    /// Returns the active snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<RecipeCatalog> {
        Arc::clone(&self.current.read())
    }

    /// Atomically replaces the active catalog. Returns the new generation.
    pub fn replace(&self, catalog: RecipeCatalog) -> u64 {
        let recipes = catalog.recipe_count();
        *self.current.write() = Arc::new(catalog);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(generation, recipes, "recipe catalog replaced");
        generation
    }

    /// Number of reloads since creation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

impl Default for CatalogHandle {
    fn default() -> Self {
        Self::new(RecipeCatalog::new())
    }
}
