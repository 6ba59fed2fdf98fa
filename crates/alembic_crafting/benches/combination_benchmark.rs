//! Benchmark for recipe lookup and station cycles.
//!
//! Run with: cargo bench --package alembic_crafting --bench combination_benchmark

// criterion_group! expands to an undocumented pub fn.
#![allow(missing_docs)]

use alembic_crafting::{
    Balance, CatalogHandle, CombinationEngine, EngineConfig, MemoryLedger, MemoryVault,
    NullEffects, Recipe, RecipeCatalog, StationEvent,
};
use alembic_shared::{ActorId, StationId, Token, TokenType};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;

fn create_test_catalog() -> RecipeCatalog {
    let mut catalog = RecipeCatalog::new();

    // 1000 recipes over 100 pairs, 10 rank tiers each
    for i in 0..1000u32 {
        let pair = i % 100;
        let recipe = Recipe::new(
            i,
            format!("ore_{pair}"),
            format!("flux_{pair}"),
            Token::single(format!("ingot_{i}").as_str()),
        )
        .with_rank(i / 100)
        .with_cost(u64::from(i % 7));

        catalog.add_recipe(recipe).unwrap();
    }

    catalog
}

fn benchmark_find(c: &mut Criterion) {
    let catalog = create_test_catalog();
    let ore = TokenType::new("ore_42");
    let flux = TokenType::new("flux_42");

    c.bench_function("find_1000_recipes", |b| {
        let mut rank = 0u32;
        b.iter(|| {
            rank = (rank + 1) % 12;
            black_box(catalog.find(rank, &flux, &ore))
        });
    });
}

fn benchmark_station_cycle(c: &mut Criterion) {
    let ledger = Arc::new(MemoryLedger::new());
    let mut engine = CombinationEngine::new(
        &EngineConfig::default(),
        Arc::new(CatalogHandle::new(create_test_catalog())),
        Arc::clone(&ledger),
        MemoryVault::new(),
        NullEffects,
    );
    let station = StationId::new("overworld", 0, 64, 0);
    let actor = ActorId(1);
    ledger.set_balance(actor, Balance::new(u64::MAX / 2, u64::MAX / 2));

    c.bench_function("submit_pair_and_resolve", |b| {
        b.iter(|| {
            for kind in ["ore_7", "flux_7"] {
                let outcome = engine.handle(StationEvent::TokenSubmitted {
                    station: station.clone(),
                    actor,
                    rank: 9,
                    token: Token::single(kind),
                });
                black_box(outcome).ok();
            }
        });
    });
}

fn benchmark_expire(c: &mut Criterion) {
    let mut engine = CombinationEngine::new(
        &EngineConfig::default(),
        Arc::new(CatalogHandle::default()),
        MemoryLedger::new(),
        MemoryVault::new(),
        NullEffects,
    );

    c.bench_function("expire_100_sessions", |b| {
        b.iter(|| {
            for x in 0..100 {
                engine
                    .handle(StationEvent::TokenSubmitted {
                        station: StationId::new("overworld", x, 64, 0),
                        actor: ActorId(2),
                        rank: 0,
                        token: Token::single("ore_1"),
                    })
                    .ok();
            }
            let target = engine.now() + EngineConfig::default().session_timeout_ticks;
            black_box(engine.advance_to(target))
        });
    });
}

criterion_group!(benches, benchmark_find, benchmark_station_cycle, benchmark_expire);
criterion_main!(benches);
