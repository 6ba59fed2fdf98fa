//! # Configuration
//!
//! Engine settings and recipe catalogs are loaded from external TOML files.
//!
//! ```toml
//! # engine.toml
//! session_timeout_ticks = 120
//! tick_rate = 20
//!
//! [journal]
//! path = "data/balances.journal"
//! max_batch_size = 100
//! ```
//!
//! ```toml
//! # recipes.toml
//! known_tokens = ["iron_ore", "coal", "iron_ingot"]
//!
//! [[recipe]]
//! id = 1
//! inputs = ["iron_ore", "coal"]
//! cost = 5
//! min_rank = 2
//! result = "iron_ingot"
//! ```

use alembic_shared::{TokenType, DEFAULT_SESSION_TIMEOUT_TICKS, TICK_RATE};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::catalog::{CatalogWarning, RecipeCatalog, RecipeEntry};
use crate::error::{CraftingError, CraftingResult};
use crate::journal::JournalConfig;

/// Engine settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Ticks a first token may wait for its partner.
    pub session_timeout_ticks: u64,
    /// Logical ticks per second driven by the station host.
    pub tick_rate: u32,
    /// Balance journal; `None` keeps balances in memory only.
    pub journal: Option<JournalConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            session_timeout_ticks: DEFAULT_SESSION_TIMEOUT_TICKS,
            tick_rate: TICK_RATE,
            journal: None,
        }
    }
}

impl EngineConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the text is not valid TOML or a value is out of range.
    pub fn from_toml_str(text: &str) -> CraftingResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| CraftingError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a TOML file.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> CraftingResult<Self> {
        Self::from_toml_str(&read_config(path.as_ref())?)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` naming the offending field.
    pub fn validate(&self) -> CraftingResult<()> {
        if self.session_timeout_ticks == 0 {
            return Err(CraftingError::InvalidConfig(
                "session_timeout_ticks must be at least 1".into(),
            ));
        }
        if self.tick_rate == 0 {
            return Err(CraftingError::InvalidConfig(
                "tick_rate must be at least 1".into(),
            ));
        }
        if let Some(journal) = &self.journal {
            if journal.max_batch_size == 0 || journal.queue_capacity == 0 {
                return Err(CraftingError::InvalidConfig(
                    "journal batch size and queue capacity must be non-zero".into(),
                ));
            }
        }
        Ok(())
    }

    /// Wall-clock length of one tick.
    #[must_use]
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs(1) / self.tick_rate.max(1)
    }
}

/// A recipe catalog as written on disk.
///
/// Rows stay untyped until [`CatalogSource::build`] so that one bad row
/// cannot fail the whole document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogSource {
    /// Allowed token types. Empty means any type is accepted.
    #[serde(default)]
    pub known_tokens: Vec<String>,
    /// Recipe rows in registration order.
    #[serde(default)]
    pub recipe: Vec<toml::Value>,
}

impl CatalogSource {
    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the document as a whole is malformed. Individual
    /// bad rows are not errors; they surface as warnings from [`Self::build`].
    pub fn from_toml_str(text: &str) -> CraftingResult<Self> {
        toml::from_str(text).map_err(|e| CraftingError::InvalidConfig(e.to_string()))
    }

    /// Reads a TOML file.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> CraftingResult<Self> {
        Self::from_toml_str(&read_config(path.as_ref())?)
    }

    /// Builds the catalog, dropping malformed rows.
    ///
    /// Rows that are not shaped like a [`RecipeEntry`] are reported as
    /// [`CatalogWarning::Malformed`]; the rest go through normal validation.
    #[must_use]
    pub fn build(&self) -> (RecipeCatalog, Vec<CatalogWarning>) {
        let rows = self.recipe.iter().enumerate().map(|(index, value)| {
            let row = value
                .clone()
                .try_into::<RecipeEntry>()
                .map_err(|e| CatalogWarning::Malformed {
                    index,
                    reason: e.message().to_string(),
                });
            (index, row)
        });

        if self.known_tokens.is_empty() {
            return RecipeCatalog::from_rows(rows, None);
        }
        let known: HashSet<TokenType> = self
            .known_tokens
            .iter()
            .map(|name| TokenType::new(name))
            .collect();
        RecipeCatalog::from_rows(rows, Some(&known))
    }
}

fn read_config(path: &Path) -> CraftingResult<String> {
    std::fs::read_to_string(path)
        .map_err(|e| CraftingError::InvalidConfig(format!("{}: {e}", path.display())))
}
