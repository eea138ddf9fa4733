//! End-to-end tests for the collaborators a vault runs against.
//!
//! These drive the token ledger, a lending pool and a router together the
//! way a leveraged basket would: supply, enable collateral, borrow, swap,
//! flash-borrow and settle. Each test builds its own ledger.

use chrono::{TimeZone, Utc};

use folio_protocol::address::label;
use folio_protocol::lending::{LendingError, LendingPool, LendingProtocol};
use folio_protocol::math::{pow10, wad};
use folio_protocol::oracle::StaticPriceOracle;
use folio_protocol::solver::{RouteInstruction, RouterHandler, SolverHandler};
use folio_protocol::{Address, Ledger, U256};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

struct World {
    ledger: Ledger,
    oracle: StaticPriceOracle,
    router: RouterHandler,
    weth: Address,
    usdc: Address,
    aweth: Address,
    pool: Address,
}

fn units(amount: u64, decimals: u8) -> U256 {
    U256::from(amount) * pow10(decimals).unwrap()
}

/// Helper: WETH at $2000 and USDC at $1, an Aave-style pool lending USDC
/// against aWETH at 80%, and a zero-fee router between the two.
fn setup() -> World {
    let mut ledger = Ledger::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
    let (weth, usdc) = (label("WETH"), label("USDC"));
    ledger.tokens.register(weth, "WETH", 18).unwrap();
    ledger.tokens.register(usdc, "USDC", 6).unwrap();

    let pool = label("aave-pool");
    let aweth = label("aWETH");
    let mut lending = LendingPool::new(pool, LendingProtocol::AaveV3).with_flash_loan_premium_bps(5);
    lending
        .list_reserve(&mut ledger.tokens, weth, aweth, "aWETH", Some(8_000))
        .unwrap();
    lending
        .list_reserve(&mut ledger.tokens, usdc, label("aUSDC"), "aUSDC", Some(8_000))
        .unwrap();
    ledger.add_lending_pool(lending).unwrap();
    ledger.tokens.mint(&usdc, &pool, units(1_000_000, 6)).unwrap();

    let router = RouterHandler::new(label("router"), 0)
        .with_rate(weth, usdc, units(2_000, 6), wad())
        .with_rate(usdc, weth, wad(), units(2_000, 6));
    ledger.tokens.mint(&weth, &router.reserve(), units(1_000, 18)).unwrap();
    ledger.tokens.mint(&usdc, &router.reserve(), units(1_000_000, 6)).unwrap();

    let oracle = StaticPriceOracle::new()
        .with_price(weth, 18, units(2_000, 18))
        .with_price(usdc, 6, wad());

    World {
        ledger,
        oracle,
        router,
        weth,
        usdc,
        aweth,
        pool,
    }
}

/// Helper: sends `amount` of `sell` from `from` to the router and swaps it
/// into `buy` for `from`.
fn swap(world: &mut World, from: Address, sell: Address, buy: Address, amount: U256) {
    let router = world.router.address();
    world.ledger.tokens.transfer(&sell, &from, &router, amount).unwrap();
    let call_data = RouteInstruction::sell_all(sell, buy).encode().unwrap();
    world.router.execute(&mut world.ledger.tokens, from, &call_data).unwrap();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn borrow_is_bounded_by_collateral_and_repay_releases_it() {
    let mut w = setup();
    let account = label("vault");
    w.ledger.tokens.mint(&w.weth, &account, units(10, 18)).unwrap();

    let oracle = w.oracle.clone();
    let (pool, tokens) = w.ledger.pool_and_tokens(&w.pool).unwrap();
    pool.supply(tokens, account, w.weth, units(10, 18), account).unwrap();
    assert!(pool.set_collateral(tokens, &oracle, account, w.aweth, true).unwrap());
    // Enabling twice changes nothing.
    assert!(!pool.set_collateral(tokens, &oracle, account, w.aweth, true).unwrap());

    // $20k of collateral at 80% supports $16k of debt.
    pool.borrow(tokens, &oracle, account, w.usdc, units(10_000, 6), account)
        .unwrap();
    let err = pool
        .borrow(tokens, &oracle, account, w.usdc, units(7_000, 6), account)
        .unwrap_err();
    assert!(matches!(err, LendingError::InsufficientCollateral { .. }));

    // Collateral backing the debt cannot be redeemed.
    let err = pool
        .redeem(tokens, &oracle, account, w.aweth, units(10, 18), account)
        .unwrap_err();
    assert!(matches!(err, LendingError::InsufficientCollateral { .. }));

    pool.repay(tokens, account, w.usdc, units(10_000, 6), account).unwrap();
    assert!(!pool.has_debt(&account));
    pool.redeem(tokens, &oracle, account, w.aweth, units(10, 18), account)
        .unwrap();

    assert_eq!(w.ledger.tokens.balance_of(&w.weth, &account), units(10, 18));
    assert_eq!(w.ledger.tokens.balance_of(&w.aweth, &account), U256::ZERO);
}

#[test]
fn flash_loan_must_return_premium() {
    let mut w = setup();
    let account = label("vault");
    let amount = units(1_000, 6);

    let (pool, tokens) = w.ledger.pool_and_tokens(&w.pool).unwrap();
    let loan = pool.begin_flash_loan(tokens, account, w.usdc, amount).unwrap();
    let premium = loan.premium;
    assert_eq!(premium, U256::from(500_000u64));

    // Only the principal is on hand.
    let err = pool.settle_flash_loan(tokens, loan).unwrap_err();
    assert!(matches!(err, LendingError::FlashLoanShortfall { .. }));

    // With the premium on hand a second loan settles, leaving the first
    // principal with the receiver.
    tokens.mint(&w.usdc, &account, premium).unwrap();
    let loan = pool.begin_flash_loan(tokens, account, w.usdc, amount).unwrap();
    pool.settle_flash_loan(tokens, loan).unwrap();
    assert_eq!(w.ledger.tokens.balance_of(&w.usdc, &account), amount);
    assert_eq!(
        w.ledger.tokens.balance_of(&w.usdc, &w.pool),
        units(1_000_000, 6) - amount + premium
    );
}

#[test]
fn flash_loan_funded_swap_round_trip() {
    let mut w = setup();
    let account = label("vault");
    let flash = units(2_000, 6);
    let (weth, usdc) = (w.weth, w.usdc);

    let (pool, tokens) = w.ledger.pool_and_tokens(&w.pool).unwrap();
    let loan = pool.begin_flash_loan(tokens, account, w.usdc, flash).unwrap();

    // USDC -> WETH -> USDC at a fixed rate returns the principal exactly.
    swap(&mut w, account, usdc, weth, flash);
    assert_eq!(w.ledger.tokens.balance_of(&w.weth, &account), units(1, 18));
    swap(&mut w, account, weth, usdc, units(1, 18));
    assert_eq!(w.ledger.tokens.balance_of(&w.usdc, &account), flash);

    w.ledger.tokens.mint(&w.usdc, &account, loan.premium).unwrap();
    let (pool, tokens) = w.ledger.pool_and_tokens(&w.pool).unwrap();
    pool.settle_flash_loan(tokens, loan).unwrap();
    assert_eq!(w.ledger.tokens.balance_of(&w.usdc, &account), U256::ZERO);
}
