// Valuation and sizing benchmarks for the Folio vault engine.
//
// Covers basket valuation at increasing basket sizes, pro-rata withdrawal
// amounts, collateral sizing for flash-loan unwinds, and exclusion claims
// across many removal snapshots.

use chrono::Utc;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use folio_contracts::calculations::{
    collateral_to_sell, flash_loan_sizing_for_unwind, value_basket, withdrawal_amounts, CollateralSource,
};
use folio_contracts::exclusion::TokenExclusionLedger;
use folio_contracts::resolver::{BasketSnapshot, Liability, ResolvedPosition};
use folio_protocol::address::label;
use folio_protocol::math::wad;
use folio_protocol::oracle::StaticPriceOracle;
use folio_protocol::U256;

fn token(i: usize) -> folio_protocol::Address {
    label(&format!("token-{i}"))
}

fn oracle(size: usize) -> StaticPriceOracle {
    let mut oracle = StaticPriceOracle::new();
    for i in 0..size {
        oracle.set_price(token(i), 18, wad() * U256::from(i as u64 + 1));
    }
    oracle
}

fn snapshot(size: usize) -> BasketSnapshot {
    BasketSnapshot {
        vault: label("vault"),
        taken_at: Utc::now(),
        holdings: (0..size)
            .map(|i| ResolvedPosition {
                token: token(i),
                amount: wad() * U256::from(1_000u64),
                underlying: vec![(token(i), wad() * U256::from(1_000u64))],
            })
            .collect(),
        liabilities: vec![Liability {
            pool: label("pool"),
            token: token(0),
            amount: wad() * U256::from(100u64),
        }],
    }
}

fn bench_value_basket(c: &mut Criterion) {
    let mut group = c.benchmark_group("valuation/value_basket");

    for size in [1, 5, 10, 15] {
        let oracle = oracle(size);
        let snap = snapshot(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &snap, |b, snap| {
            b.iter(|| value_basket(&oracle, snap).unwrap());
        });
    }

    group.finish();
}

fn bench_withdrawal_amounts(c: &mut Criterion) {
    let snap = snapshot(15);
    let supply = wad() * U256::from(1_000_000u64);
    let shares = wad() * U256::from(1_234u64);

    c.bench_function("valuation/withdrawal_amounts_15", |b| {
        b.iter(|| withdrawal_amounts(&snap, shares, supply).unwrap());
    });
}

fn bench_unwind_sizing(c: &mut Criterion) {
    let oracle = oracle(4);
    let sources: Vec<CollateralSource> = (1..4)
        .map(|i| CollateralSource {
            lending_token: label(&format!("a-token-{i}")),
            underlying: token(i),
            available: wad() * U256::from(500u64),
        })
        .collect();
    let debt = wad() * U256::from(2_500u64);

    c.bench_function("valuation/unwind_sizing", |b| {
        b.iter(|| {
            let sizing =
                flash_loan_sizing_for_unwind(debt, U256::from(25u64), U256::from(100u64), 5, 1_000, 10).unwrap();
            collateral_to_sell(&oracle, &sources, sizing.amount_owed, sizing.collateral_buffer_unit).unwrap()
        });
    });
}

fn bench_exclusion_claims(c: &mut Criterion) {
    let mut group = c.benchmark_group("exclusion/claim");

    for removals in [1, 10, 100] {
        let mut ledger = TokenExclusionLedger::new(label("escrow"));
        let supply = wad() * U256::from(1_000u64);
        for i in 0..removals {
            ledger.record_removal(token(i), wad() * U256::from(7u64), supply, Utc::now());
        }
        group.throughput(Throughput::Elements(removals as u64));
        group.bench_with_input(BenchmarkId::from_parameter(removals), &ledger, |b, ledger| {
            b.iter(|| {
                let mut ledger = ledger.clone();
                ledger.claim(label("holder"), wad() * U256::from(10u64)).unwrap()
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_value_basket,
    bench_withdrawal_amounts,
    bench_unwind_sizing,
    bench_exclusion_claims,
);
criterion_main!(benches);
