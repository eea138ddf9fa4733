//! Shared market fixture for the integration tests.
//!
//! One ledger with four tokens, an Aave-style pool listing WETH and USDC, a
//! DAI/LINK concentrated-liquidity pool with one wrapped position, and a
//! zero-fee router whose rates agree with the oracle.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use folio_contracts::config::{PortfolioConfig, Roles, WhitelistPolicy};
use folio_contracts::fees::FeeSchedule;
use folio_contracts::intent::{DepositRequest, WithdrawRequest};
use folio_contracts::position::Position;
use folio_contracts::{ExecutionContext, Portfolio};
use folio_protocol::address::label;
use folio_protocol::lending::{LendingPool, LendingProtocol};
use folio_protocol::liquidity::{ConcentratedPool, PoolDialect, PositionWrapper, TickRange};
use folio_protocol::math::{pow10, wad};
use folio_protocol::oracle::StaticPriceOracle;
use folio_protocol::solver::{CallData, RouteInstruction, RouterHandler};
use folio_protocol::{Address, Ledger, U256};

/// `amount` whole tokens with `decimals`.
pub fn units(amount: u64, decimals: u8) -> U256 {
    U256::from(amount) * pow10(decimals).unwrap()
}

/// `amount` in USD18 (or any 18-decimal token).
pub fn usd(amount: u64) -> U256 {
    units(amount, 18)
}

/// Tick of the DAI/LINK pool: one DAI buys about 0.1 LINK.
pub const LP_TICK: i32 = -23_028;

/// Liquidity of the wrapped DAI/LINK position.
pub const LP_LIQUIDITY: u128 = 1_000_000_000_000_000_000_000;

pub fn lp_range() -> TickRange {
    TickRange::new(-23_628, -22_428).unwrap()
}

pub fn admin() -> Address {
    label("admin")
}

pub fn manager() -> Address {
    label("manager")
}

pub fn treasury() -> Address {
    label("treasury")
}

/// Vault configuration with 1000e18 initial shares and no cooldown.
pub fn config(fees: FeeSchedule) -> PortfolioConfig {
    PortfolioConfig {
        name: "Folio Blue Chip".into(),
        symbol: "FBC".into(),
        initial_portfolio_amount: usd(1_000),
        min_portfolio_token_holding: U256::ZERO,
        cooldown_period_secs: 0,
        fees,
        roles: Roles {
            admin: admin(),
            asset_manager: manager(),
            treasury: treasury(),
        },
        whitelist: WhitelistPolicy::default(),
    }
}

pub fn deposit(amounts: &[(Address, U256)]) -> DepositRequest {
    DepositRequest {
        amounts: amounts.to_vec(),
        min_mint_amount: U256::ZERO,
    }
}

pub fn withdraw(shares: U256, receiver: Address) -> WithdrawRequest {
    WithdrawRequest {
        shares,
        receiver,
        min_amounts_out: Vec::new(),
        unwind: None,
    }
}

/// Router call data selling everything the router holds of `sell`.
pub fn route(sell: Address, buy: Address) -> CallData {
    RouteInstruction::sell_all(sell, buy).encode().unwrap()
}

pub struct Market {
    pub ledger: Ledger,
    pub oracle: StaticPriceOracle,
    pub ctx: ExecutionContext,
    pub dai: Address,
    pub link: Address,
    pub weth: Address,
    pub usdc: Address,
    pub aweth: Address,
    pub pool: Address,
    pub router: Address,
    /// DAI/LINK position wrapper.
    pub lp: Address,
    pub lp_pool: Address,
}

impl Market {
    /// DAI $1, LINK $10, WETH $2000, USDC $1 (6 decimals). The pool charges
    /// a 5 bps flash-loan premium and lends against aWETH at 80%. The LP
    /// wrapper is in range at [`LP_TICK`] and has no supply yet.
    pub fn new() -> Self {
        let mut ledger = Ledger::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        let (dai, link, weth, usdc) = (label("DAI"), label("LINK"), label("WETH"), label("USDC"));
        for (token, symbol, decimals) in [(dai, "DAI", 18), (link, "LINK", 18), (weth, "WETH", 18), (usdc, "USDC", 6)] {
            ledger.tokens.register(token, symbol, decimals).unwrap();
        }

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

        let (lp_pool, lp) = (label("DAI/LINK"), label("LP-DAI-LINK"));
        ledger
            .liquidity
            .add_pool(ConcentratedPool {
                address: lp_pool,
                token0: dai,
                token1: link,
                tick: LP_TICK,
                dialect: PoolDialect::UniswapV3,
            })
            .unwrap();
        ledger
            .liquidity
            .add_wrapper(
                &mut ledger.tokens,
                PositionWrapper {
                    address: lp,
                    pool: lp_pool,
                    range: lp_range(),
                    liquidity: LP_LIQUIDITY,
                },
                "LP-DAI-LINK",
            )
            .unwrap();

        let router = RouterHandler::new(label("router"), 0)
            .with_rate(weth, usdc, units(2_000, 6), wad())
            .with_rate(usdc, weth, wad(), units(2_000, 6))
            .with_rate(dai, link, U256::from(1u8), U256::from(10u8))
            .with_rate(link, dai, U256::from(10u8), U256::from(1u8))
            .with_rate(dai, weth, U256::from(1u8), U256::from(2_000u16));
        let reserve = router.reserve();
        for (token, amount) in [
            (dai, usd(10_000_000)),
            (link, usd(1_000_000)),
            (weth, usd(10_000)),
            (usdc, units(10_000_000, 6)),
        ] {
            ledger.tokens.mint(&token, &reserve, amount).unwrap();
        }

        let oracle = StaticPriceOracle::new()
            .with_price(dai, 18, usd(1))
            .with_price(link, 18, usd(10))
            .with_price(weth, 18, usd(2_000))
            .with_price(usdc, 6, usd(1));
        let mut ctx = ExecutionContext::new(Arc::new(oracle.clone())).with_solver(Arc::new(router));
        for token in [dai, link, weth, usdc] {
            ctx.assets.register(&ledger, Position::PlainToken { token }).unwrap();
        }
        ctx.assets
            .register(&ledger, Position::LendingToken { token: aweth, pool })
            .unwrap();
        ctx.assets
            .register(
                &ledger,
                Position::ExternalLp {
                    wrapper: lp,
                    dialect: PoolDialect::UniswapV3,
                    range: lp_range(),
                },
            )
            .unwrap();

        Self {
            ledger,
            oracle,
            ctx,
            dai,
            link,
            weth,
            usdc,
            aweth,
            pool,
            router: label("router"),
            lp,
            lp_pool,
        }
    }

    /// A vault over `tokens` at the address labelled `name`.
    pub fn vault(&self, name: &str, tokens: Vec<Address>, fees: FeeSchedule) -> Portfolio {
        Portfolio::new(label(name), config(fees), tokens, &self.ledger, &self.ctx).unwrap()
    }

    /// Reprices `token` and swaps the new feed into the context.
    pub fn set_price(&mut self, token: Address, price_usd18: U256) {
        let decimals = self.ledger.tokens.decimals(&token).unwrap();
        self.oracle.set_price(token, decimals, price_usd18);
        self.ctx.oracle = Arc::new(self.oracle.clone());
    }

    pub fn fund(&mut self, token: Address, who: Address, amount: U256) {
        self.ledger.tokens.mint(&token, &who, amount).unwrap();
    }

    /// Mints WETH to `who` and supplies it, leaving `who` holding aWETH.
    pub fn supply_weth(&mut self, who: Address, amount: U256) {
        self.fund(self.weth, who, amount);
        let (pool, tokens) = self.ledger.pool_and_tokens(&self.pool).unwrap();
        pool.supply(tokens, who, self.weth, amount, who).unwrap();
    }

    pub fn balance(&self, token: Address, who: Address) -> U256 {
        self.ledger.tokens.balance_of(&token, &who)
    }

    pub fn debt(&self, vault: Address, token: Address) -> U256 {
        self.ledger.pool(&self.pool).unwrap().debt_of(&vault, &token)
    }
}
