//! Integration tests for fee accrual against moving prices.

mod common;

use chrono::Duration;
use common::{admin, deposit, treasury, usd, withdraw, Market};
use folio_contracts::fees::FeeSchedule;
use folio_contracts::{Portfolio, VaultError};
use folio_protocol::address::label;
use folio_protocol::U256;

/// Helper: a LINK-only vault where `alice` holds all 1000e18 shares ($100).
fn link_vault(fees: FeeSchedule) -> (Market, Portfolio) {
    let mut m = Market::new();
    let mut vault = m.vault("vault", vec![m.link], fees);
    let alice = label("alice");
    m.fund(m.link, alice, usd(100));
    vault
        .deposit(&mut m.ledger, &m.ctx, alice, &deposit(&[(m.link, usd(10))]))
        .unwrap();
    (m, vault)
}

fn performance(bps: u32) -> FeeSchedule {
    FeeSchedule {
        performance_fee_bps: bps,
        ..FeeSchedule::default()
    }
}

// ---------------------------------------------------------------------------
// Performance fee
// ---------------------------------------------------------------------------

#[test]
fn performance_fee_charged_on_gain_above_mark() {
    let (mut m, mut vault) = link_vault(performance(2_000));
    // $100 over 1000 shares.
    assert_eq!(vault.fee_state().high_water_mark, U256::from(100_000_000_000_000_000u128));

    m.set_price(m.link, usd(20));
    let charge = vault.charge_fees(&mut m.ledger, &m.ctx).unwrap();
    // 20% of a 1e17 gain per share, paid in shares at the new value.
    assert_eq!(charge.performance.total().unwrap(), usd(100));
    assert_eq!(vault.balance_of(&treasury()), usd(100));
    assert_eq!(vault.fee_state().high_water_mark, U256::from(200_000_000_000_000_000u128));

    // Dilution pushed the share value below the mark: no second charge.
    let charge = vault.charge_fees(&mut m.ledger, &m.ctx).unwrap();
    assert!(charge.is_empty());
}

#[test]
fn high_water_mark_never_decreases() {
    let (mut m, mut vault) = link_vault(performance(1_000));
    let alice = label("alice");
    let mut marks = vec![vault.fee_state().high_water_mark];

    for price in [15u64, 5, 12, 30, 8] {
        m.set_price(m.link, usd(price));
        vault.charge_fees(&mut m.ledger, &m.ctx).unwrap();
        marks.push(vault.fee_state().high_water_mark);
        vault
            .deposit(&mut m.ledger, &m.ctx, alice, &deposit(&[(m.link, usd(1))]))
            .unwrap();
        marks.push(vault.fee_state().high_water_mark);
        let quarter = vault.balance_of(&alice) / U256::from(4u8);
        vault
            .withdraw(&mut m.ledger, &m.ctx, alice, &withdraw(quarter, alice))
            .unwrap();
        marks.push(vault.fee_state().high_water_mark);
    }
    assert!(marks.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn price_drop_charges_nothing() {
    let (mut m, mut vault) = link_vault(performance(5_000));
    m.set_price(m.link, usd(5));
    let charge = vault.charge_fees(&mut m.ledger, &m.ctx).unwrap();
    assert!(charge.is_empty());
    assert_eq!(vault.balance_of(&treasury()), U256::ZERO);
}

// ---------------------------------------------------------------------------
// Fee schedule changes
// ---------------------------------------------------------------------------

#[test]
fn applying_schedule_settles_old_rate_first() {
    let fees = FeeSchedule {
        management_fee_bps: 100,
        ..FeeSchedule::default()
    };
    let (mut m, mut vault) = link_vault(fees);

    vault
        .propose_fee_schedule(&mut m.ledger, admin(), FeeSchedule::default())
        .unwrap();
    m.ledger.advance(Duration::days(3));
    assert!(matches!(
        vault.apply_fee_schedule(&mut m.ledger, &m.ctx, admin()).unwrap_err(),
        VaultError::FeeUpdateTimelocked { .. }
    ));

    m.ledger.advance(Duration::days(4));
    let applied = vault.apply_fee_schedule(&mut m.ledger, &m.ctx, admin()).unwrap();
    assert_eq!(applied, FeeSchedule::default());
    let accrued = vault.balance_of(&treasury());
    assert!(accrued > U256::ZERO);

    // The new schedule charges no management fee.
    m.ledger.advance(Duration::days(30));
    assert!(vault.charge_fees(&mut m.ledger, &m.ctx).unwrap().is_empty());
    assert_eq!(vault.balance_of(&treasury()), accrued);
}
