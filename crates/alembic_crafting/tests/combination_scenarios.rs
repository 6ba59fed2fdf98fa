//! Integration tests for station resolution, charging and refunds.

use alembic_crafting::{
    Balance, BufferedEffects, CatalogHandle, CatalogWarning, Charge, CombinationEngine, CombinationOutcome,
    CostLedger, CraftingError, EngineConfig, LedgerError, MemoryLedger, MemoryVault, Recipe,
    RecipeCatalog, SessionPhase, StationEvent,
};
use alembic_shared::{ActorId, Rank, StationId, Token, TokenType};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const TIMEOUT: u64 = 120;

/// Memory ledger with switchable faults.
#[derive(Default)]
struct FlakyLedger {
    inner: MemoryLedger,
    fail_primary_debit: AtomicBool,
    fail_reserve_debit: AtomicBool,
    fail_credit: AtomicBool,
    offline: AtomicBool,
}

impl FlakyLedger {
    fn check_online(&self) -> Result<(), LedgerError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("connection refused".into()));
        }
        Ok(())
    }
}

impl CostLedger for FlakyLedger {
    fn primary_balance(&self, actor: ActorId) -> Result<u64, LedgerError> {
        self.check_online()?;
        self.inner.primary_balance(actor)
    }

    fn reserve_balance(&self, actor: ActorId) -> Result<u64, LedgerError> {
        self.check_online()?;
        self.inner.reserve_balance(actor)
    }

    fn debit_primary(&self, actor: ActorId, amount: u64) -> Result<(), LedgerError> {
        if self.fail_primary_debit.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("primary pool write failed".into()));
        }
        self.inner.debit_primary(actor, amount)
    }

    fn debit_reserve(&self, actor: ActorId, amount: u64) -> Result<(), LedgerError> {
        if self.fail_reserve_debit.load(Ordering::SeqCst) {
            return Err(LedgerError::Insufficient {
                pool: alembic_crafting::BalancePool::Reserve,
                requested: amount,
                available: 0,
            });
        }
        self.inner.debit_reserve(actor, amount)
    }

    fn credit_primary(&self, actor: ActorId, amount: u64) -> Result<(), LedgerError> {
        if self.fail_credit.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("credit rejected".into()));
        }
        self.inner.credit_primary(actor, amount)
    }

    fn credit_reserve(&self, actor: ActorId, amount: u64) -> Result<(), LedgerError> {
        self.inner.credit_reserve(actor, amount)
    }
}

type Engine = CombinationEngine<Arc<FlakyLedger>, Arc<MemoryVault>, Arc<BufferedEffects>>;

struct Harness {
    engine: Engine,
    ledger: Arc<FlakyLedger>,
    vault: Arc<MemoryVault>,
    effects: Arc<BufferedEffects>,
    catalog: Arc<CatalogHandle>,
}

impl Harness {
    fn new(recipes: Vec<Recipe>) -> Self {
        let mut catalog = RecipeCatalog::new();
        for recipe in recipes {
            catalog.add_recipe(recipe).unwrap();
        }
        let catalog = Arc::new(CatalogHandle::new(catalog));
        let ledger = Arc::new(FlakyLedger::default());
        let vault = Arc::new(MemoryVault::new());
        let effects = Arc::new(BufferedEffects::new());
        let config = EngineConfig {
            session_timeout_ticks: TIMEOUT,
            ..EngineConfig::default()
        };
        let engine = CombinationEngine::new(
            &config,
            Arc::clone(&catalog),
            Arc::clone(&ledger),
            Arc::clone(&vault),
            Arc::clone(&effects),
        );
        Self {
            engine,
            ledger,
            vault,
            effects,
            catalog,
        }
    }

    fn fund(&self, actor: u64, primary: u64, reserve: u64) {
        self.ledger
            .inner
            .set_balance(ActorId(actor), Balance::new(primary, reserve));
    }

    fn balance(&self, actor: u64) -> Balance {
        self.ledger.inner.balance(ActorId(actor))
    }

    fn holds(&self, actor: u64, kind: &str) -> u32 {
        self.vault.count(ActorId(actor), &TokenType::new(kind))
    }

    fn try_submit(
        &mut self,
        at: &StationId,
        actor: u64,
        rank: Rank,
        kind: &str,
    ) -> Result<Option<CombinationOutcome>, CraftingError> {
        self.engine.handle(StationEvent::TokenSubmitted {
            station: at.clone(),
            actor: ActorId(actor),
            rank,
            token: Token::single(kind),
        })
    }

    fn submit(&mut self, at: &StationId, actor: u64, rank: Rank, kind: &str) -> Option<CombinationOutcome> {
        self.try_submit(at, actor, rank, kind).unwrap()
    }

    fn pair(&mut self, actor: u64, rank: Rank, a: &str, b: &str) -> CombinationOutcome {
        let at = station(0);
        assert!(self.submit(&at, actor, rank, a).is_none());
        self.submit(&at, actor, rank, b).unwrap()
    }
}

fn station(x: i32) -> StationId {
    StationId::new("overworld", x, 64, 0)
}

fn refunded(refunds: &[(ActorId, Token)]) -> Vec<(u64, &str)> {
    let mut list: Vec<(u64, &str)> = refunds
        .iter()
        .map(|(actor, token)| (actor.raw(), token.kind.as_str()))
        .collect();
    list.sort();
    list
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn scenario_a_cost_split_across_pools() {
    let mut h = Harness::new(vec![
        Recipe::new(0, "a", "b", Token::single("c")).with_cost(5),
    ]);
    h.fund(1, 3, 10);

    let outcome = h.pair(1, 0, "a", "b");

    assert_eq!(
        outcome,
        CombinationOutcome::Success {
            recipe: 0,
            result: Token::single("c"),
            charged: Charge {
                primary: 3,
                reserve: 2
            },
        }
    );
    assert_eq!(h.balance(1), Balance::new(0, 8));
    assert_eq!(h.holds(1, "c"), 1);
    assert_eq!(h.holds(1, "a"), 0);
    assert_eq!(h.holds(1, "b"), 0);
}

#[test]
fn scenario_b_insufficient_funds_refunds_both() {
    let mut h = Harness::new(vec![
        Recipe::new(0, "a", "b", Token::single("c")).with_cost(5),
    ]);
    h.fund(1, 0, 0);

    let outcome = h.pair(1, 0, "a", "b");

    match &outcome {
        CombinationOutcome::InsufficientFunds {
            refunds,
            required,
            available,
        } => {
            assert_eq!(*required, 5);
            assert_eq!(*available, 0);
            assert_eq!(refunded(refunds), vec![(1, "a"), (1, "b")]);
        }
        other => panic!("expected InsufficientFunds, got {other:?}"),
    }
    assert_eq!(h.balance(1), Balance::new(0, 0));
    assert_eq!(h.holds(1, "a"), 1);
    assert_eq!(h.holds(1, "b"), 1);
    assert_eq!(h.holds(1, "c"), 0);
}

#[test]
fn scenario_c_timeout_returns_first_token() {
    let mut h = Harness::new(Vec::new());
    let at = station(0);
    h.submit(&at, 1, 0, "a");

    assert!(h.engine.advance_to(TIMEOUT - 1).is_empty());
    let fired = h.engine.advance_to(TIMEOUT + 1);

    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].0, at);
    assert_eq!(
        fired[0].1,
        CombinationOutcome::Timeout {
            refunds: vec![(ActorId(1), Token::single("a"))],
            cancelled: false,
        }
    );
    assert_eq!(h.holds(1, "a"), 1);
    assert_eq!(h.engine.phase(&at), SessionPhase::Empty);
}

#[test]
fn scenario_d_unmatched_pair_refunds_both() {
    let mut h = Harness::new(vec![Recipe::new(0, "a", "b", Token::single("c"))]);

    let outcome = h.pair(1, 0, "a", "z");

    assert_eq!(
        refunded(outcome.refunds()),
        vec![(1, "a"), (1, "z")]
    );
    assert!(matches!(outcome, CombinationOutcome::NoMatch { .. }));
    assert_eq!(h.holds(1, "a"), 1);
    assert_eq!(h.holds(1, "z"), 1);
}

#[test]
fn scenario_e_highest_eligible_tier_wins() {
    let mut h = Harness::new(vec![
        Recipe::new(1, "a", "b", Token::single("copper")).with_rank(0),
        Recipe::new(2, "a", "b", Token::single("gold")).with_rank(5),
    ]);

    let outcome = h.pair(1, 5, "a", "b");
    assert!(matches!(outcome, CombinationOutcome::Success { recipe: 2, .. }));
    assert_eq!(h.holds(1, "gold"), 1);

    let outcome = h.pair(1, 4, "a", "b");
    assert!(matches!(outcome, CombinationOutcome::Success { recipe: 1, .. }));
}

// ============================================================================
// Properties
// ============================================================================

#[test]
fn resolution_is_symmetric() {
    let mut h = Harness::new(vec![
        Recipe::new(7, "iron_ore", "coal", Token::single("iron_ingot")).with_cost(1),
    ]);
    h.fund(1, 10, 0);

    let forward = h.pair(1, 0, "iron_ore", "coal");
    let backward = h.pair(1, 0, "coal", "iron_ore");

    assert_eq!(forward, backward);
    assert_eq!(h.holds(1, "iron_ingot"), 2);
}

#[test]
fn success_charges_exactly_the_cost() {
    let mut h = Harness::new(vec![
        Recipe::new(0, "a", "b", Token::single("c")).with_cost(7),
    ]);

    for (primary, reserve) in [(7, 0), (0, 7), (3, 4), (100, 100), (6, 1)] {
        h.fund(1, primary, reserve);
        let before = h.balance(1).total();
        let outcome = h.pair(1, 0, "a", "b");
        assert!(outcome.is_success());
        assert_eq!(before - h.balance(1).total(), 7);
        assert!(h.balance(1).primary == 0 || h.balance(1).reserve == reserve);
    }
}

#[test]
fn failures_charge_nothing_and_lose_nothing() {
    let mut h = Harness::new(vec![
        Recipe::new(0, "a", "b", Token::single("c")).with_cost(10),
        Recipe::new(1, "a", "d", Token::single("e")).with_rank(3),
    ]);
    h.fund(1, 4, 5);

    let outcomes = [
        h.pair(1, 0, "a", "b"),
        h.pair(1, 0, "a", "d"),
        h.pair(1, 0, "a", "x"),
    ];

    for outcome in &outcomes {
        assert!(!outcome.is_success());
        assert_eq!(outcome.refunds().len(), 2);
    }
    assert_eq!(h.balance(1), Balance::new(4, 5));
    assert_eq!(h.holds(1, "a"), 3);
    assert_eq!(h.vault.total(ActorId(1)), 6);
}

#[test]
fn rank_below_minimum_never_matches() {
    let mut h = Harness::new(vec![
        Recipe::new(0, "a", "b", Token::single("c")).with_rank(3),
    ]);

    assert!(matches!(h.pair(1, 2, "a", "b"), CombinationOutcome::NoMatch { .. }));
    assert!(h.pair(1, 3, "a", "b").is_success());
}

#[test]
fn timeout_fires_once_and_never_after_resolution() {
    let mut h = Harness::new(vec![Recipe::new(0, "a", "b", Token::single("c"))]);
    let at = station(0);

    h.submit(&at, 1, 0, "a");
    assert_eq!(h.engine.advance_to(TIMEOUT).len(), 1);
    assert!(h.engine.advance_to(TIMEOUT * 2).is_empty());
    assert_eq!(h.holds(1, "a"), 1);

    h.submit(&at, 1, 0, "a");
    h.submit(&at, 1, 0, "b");
    assert!(h.engine.advance_to(TIMEOUT * 10).is_empty());
    assert_eq!(h.engine.stats().timeouts, 1);
}

#[test]
fn self_pairing_resolves_like_any_pair() {
    let mut h = Harness::new(vec![
        Recipe::new(0, "slime", "slime", Token::new("slime_block", 1)),
    ]);

    assert!(h.pair(1, 0, "slime", "slime").is_success());
    assert!(matches!(
        h.pair(1, 0, "slime", "gel"),
        CombinationOutcome::NoMatch { .. }
    ));
    assert_eq!(h.holds(1, "slime_block"), 1);
}

#[test]
fn zero_cost_skips_the_ledger() {
    let mut h = Harness::new(vec![Recipe::new(0, "a", "b", Token::single("c"))]);
    h.ledger.offline.store(true, Ordering::SeqCst);

    let outcome = h.pair(1, 0, "a", "b");

    assert!(outcome.is_success());
    assert!(h.engine.is_accepting());
}

// ============================================================================
// Ownership
// ============================================================================

#[test]
fn second_submitter_pays_and_receives() {
    let mut h = Harness::new(vec![
        Recipe::new(0, "a", "b", Token::single("c"))
            .with_cost(4)
            .with_rank(2),
    ]);
    h.fund(1, 100, 0);
    h.fund(2, 4, 0);
    let at = station(3);

    h.submit(&at, 1, 0, "a");
    let outcome = h.submit(&at, 2, 2, "b").unwrap();

    assert!(outcome.is_success());
    assert_eq!(h.balance(1), Balance::new(100, 0));
    assert_eq!(h.balance(2), Balance::new(0, 0));
    assert_eq!(h.holds(2, "c"), 1);
    assert_eq!(h.holds(1, "c"), 0);
}

#[test]
fn refunds_go_to_each_original_owner() {
    let mut h = Harness::new(Vec::new());
    let at = station(3);

    h.submit(&at, 1, 0, "a");
    let outcome = h.submit(&at, 2, 0, "b").unwrap();

    assert_eq!(refunded(outcome.refunds()), vec![(1, "a"), (2, "b")]);
    assert_eq!(h.holds(1, "a"), 1);
    assert_eq!(h.holds(2, "b"), 1);
    assert_eq!(h.holds(1, "b"), 0);
}

// ============================================================================
// Ledger Faults
// ============================================================================

#[test]
fn failed_reserve_debit_rolls_back_primary() {
    let mut h = Harness::new(vec![
        Recipe::new(0, "a", "b", Token::single("c")).with_cost(5),
    ]);
    h.fund(1, 3, 10);
    h.ledger.fail_reserve_debit.store(true, Ordering::SeqCst);

    let outcome = h.pair(1, 0, "a", "b");

    assert!(matches!(outcome, CombinationOutcome::LedgerError { .. }));
    assert_eq!(outcome.refunds().len(), 2);
    assert_eq!(h.balance(1), Balance::new(3, 10));
    assert_eq!(h.holds(1, "c"), 0);
    assert_eq!(h.holds(1, "a"), 1);
    assert!(h.engine.is_accepting());
}

#[test]
fn failed_rollback_degrades_service() {
    let mut h = Harness::new(vec![
        Recipe::new(0, "a", "b", Token::single("c")).with_cost(5),
    ]);
    h.fund(1, 3, 10);
    h.ledger.fail_reserve_debit.store(true, Ordering::SeqCst);
    h.ledger.fail_credit.store(true, Ordering::SeqCst);

    let outcome = h.pair(1, 0, "a", "b");

    assert!(matches!(outcome, CombinationOutcome::LedgerError { .. }));
    assert!(!h.engine.is_accepting());
}

#[test]
fn failed_primary_debit_charges_nothing() {
    let mut h = Harness::new(vec![
        Recipe::new(0, "a", "b", Token::single("c")).with_cost(5),
    ]);
    h.fund(1, 9, 9);
    h.ledger.fail_primary_debit.store(true, Ordering::SeqCst);

    let outcome = h.pair(1, 0, "a", "b");

    assert!(matches!(outcome, CombinationOutcome::LedgerError { .. }));
    assert_eq!(h.balance(1), Balance::new(9, 9));
}

#[test]
fn unavailable_ledger_refuses_new_sessions_until_restored() {
    let mut h = Harness::new(vec![
        Recipe::new(0, "a", "b", Token::single("c")).with_cost(1),
    ]);
    h.fund(1, 5, 0);
    let busy = station(1);
    let idle = station(2);

    h.submit(&busy, 1, 0, "a");
    h.ledger.offline.store(true, Ordering::SeqCst);
    h.submit(&idle, 1, 0, "a");
    let outcome = h.submit(&idle, 1, 0, "b").unwrap();
    assert!(matches!(outcome, CombinationOutcome::LedgerError { .. }));
    assert!(!h.engine.is_accepting());

    let refused = h.try_submit(&idle, 1, 0, "a");
    assert!(matches!(refused, Err(CraftingError::ServiceUnavailable { .. })));
    assert_eq!(h.engine.phase(&idle), SessionPhase::Empty);

    // Awaiting sessions still finish.
    h.ledger.offline.store(false, Ordering::SeqCst);
    assert!(h.submit(&busy, 1, 0, "b").unwrap().is_success());

    h.engine.restore_service();
    assert!(h.try_submit(&idle, 1, 0, "a").unwrap().is_none());
}

// ============================================================================
// Lifecycle & Catalog
// ============================================================================

#[test]
fn removing_a_station_cancels_and_refunds() {
    let mut h = Harness::new(Vec::new());
    let at = station(5);

    h.engine
        .handle(StationEvent::StationCreated { station: at.clone() })
        .unwrap();
    let nothing = h
        .engine
        .handle(StationEvent::StationRemoved { station: at.clone() })
        .unwrap();
    assert!(nothing.is_none());

    h.submit(&at, 9, 0, "a");
    let outcome = h
        .engine
        .handle(StationEvent::StationRemoved { station: at.clone() })
        .unwrap();

    assert_eq!(
        outcome,
        Some(CombinationOutcome::Timeout {
            refunds: vec![(ActorId(9), Token::single("a"))],
            cancelled: true,
        })
    );
    assert_eq!(h.holds(9, "a"), 1);
    assert!(h.engine.advance_to(TIMEOUT * 2).is_empty());
    assert_eq!(h.engine.station_count(), 0);
}

#[test]
fn stations_are_independent() {
    let mut h = Harness::new(vec![Recipe::new(0, "a", "b", Token::single("c"))]);

    for x in 0..10 {
        h.submit(&station(x), x as u64, 0, "a");
    }
    h.engine.advance_to(10);
    for x in 0..5 {
        assert!(h.submit(&station(x), x as u64, 0, "b").unwrap().is_success());
    }

    let fired = h.engine.advance_to(TIMEOUT);
    assert_eq!(fired.len(), 5);
    assert_eq!(h.engine.active_sessions(), 0);
    assert_eq!(h.effects.drain_events().len(), 10);
}

#[test]
fn reload_applies_to_the_next_resolution() {
    let mut h = Harness::new(vec![Recipe::new(0, "a", "b", Token::single("c"))]);
    let at = station(0);
    h.submit(&at, 1, 0, "a");

    let mut replacement = RecipeCatalog::new();
    replacement
        .add_recipe(Recipe::new(9, "a", "b", Token::single("d")))
        .unwrap();
    h.catalog.replace(replacement);

    let outcome = h.submit(&at, 1, 0, "b").unwrap();
    assert!(matches!(outcome, CombinationOutcome::Success { recipe: 9, .. }));
    assert_eq!(h.holds(1, "d"), 1);
}

#[test]
fn bad_catalog_reload_keeps_old_catalog_and_degrades() {
    let mut h = Harness::new(vec![Recipe::new(0, "a", "b", Token::single("c"))]);
    let at = station(0);

    let result = h.engine.reload_catalog_from_str("[[recipe]\nid = ");
    assert!(matches!(result, Err(CraftingError::InvalidConfig(_))));
    assert!(h.engine.unavailable_reason().is_some());
    assert!(h.try_submit(&at, 1, 0, "a").is_err());

    let warnings = h
        .engine
        .reload_catalog_from_str(
            r#"
            [[recipe]]
            id = 4
            inputs = ["a", "b"]
            result = "glass"

            [[recipe]]
            id = 5
            inputs = ["a", "b"]
            result = "sand"
            "#,
        )
        .unwrap();
    assert_eq!(warnings.len(), 1);
    assert!(h.engine.is_accepting());

    let outcome = h.pair(1, 0, "a", "b");
    assert!(matches!(outcome, CombinationOutcome::Success { recipe: 4, .. }));
}

#[test]
fn one_bad_catalog_row_does_not_block_the_rest() {
    let mut h = Harness::new(vec![Recipe::new(0, "a", "b", Token::single("c"))]);

    let warnings = h
        .engine
        .reload_catalog_from_str(
            r#"
            [[recipe]]
            id = 4
            inputs = ["a", "b"]
            cost = 1
            result = "glass"

            [[recipe]]
            id = 5
            inputs = ["a", "c"]
            "#,
        )
        .unwrap();

    assert!(matches!(
        warnings.as_slice(),
        [CatalogWarning::Malformed { index: 1, .. }]
    ));
    assert!(h.engine.is_accepting());
    assert_eq!(h.catalog.snapshot().recipe_count(), 1);

    h.fund(1, 1, 0);
    let outcome = h.pair(1, 0, "a", "b");
    assert!(matches!(outcome, CombinationOutcome::Success { recipe: 4, .. }));
    assert_eq!(h.holds(1, "glass"), 1);
}
