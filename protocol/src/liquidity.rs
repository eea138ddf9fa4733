//! # Concentrated Liquidity
//!
//! Uniswap V3 and Algebra pools, and the fungible wrapper tokens that hold a
//! single ranged position in them. The vault never holds a raw position; it
//! holds wrapper shares, and a share decomposes into token0/token1 amounts at
//! the pool's current tick.
//!
//! Prices are evaluated in `rust_decimal` from the tick:
//! `sqrtP(tick) = 1.0001^(tick / 2)`. Results are floored to whole units.

use std::collections::BTreeMap;
use std::fmt;

use alloy_primitives::{Address, U256};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{MAX_TICK, MIN_TICK};
use crate::math::{mul_div, MathError};
use crate::token::{TokenError, TokenLedger};

/// `sqrt(1.0001)`, the per-tick step of the square-root price.
const SQRT_TICK_BASE: Decimal = dec!(1.000049998750062496094023416);

/// Decimals of every wrapper token.
pub const WRAPPER_DECIMALS: u8 = 18;

/// Errors that can occur in concentrated-liquidity bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LiquidityError {
    /// No pool at this address.
    #[error("unknown pool: {0}")]
    UnknownPool(Address),

    /// A pool already exists at this address.
    #[error("pool already registered: {0}")]
    DuplicatePool(Address),

    /// No wrapper at this address.
    #[error("unknown position wrapper: {0}")]
    UnknownWrapper(Address),

    /// `lower >= upper`, or a bound lies outside the tick domain.
    #[error("invalid tick range [{lower}, {upper})")]
    InvalidRange {
        /// Lower tick.
        lower: i32,
        /// Upper tick.
        upper: i32,
    },

    /// Tick outside `MIN_TICK..=MAX_TICK`.
    #[error("tick {0} out of bounds")]
    TickOutOfBounds(i32),

    /// Decimal evaluation overflowed.
    #[error("liquidity math overflow")]
    Overflow,

    /// Token ledger failure.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Checked arithmetic failure.
    #[error(transparent)]
    Math(#[from] MathError),
}

/// Which AMM a pool belongs to. Positions must name the dialect of their pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolDialect {
    /// Uniswap V3: state read from `slot0`.
    UniswapV3,
    /// Algebra: state read from `globalState`.
    Algebra,
}

impl fmt::Display for PoolDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolDialect::UniswapV3 => write!(f, "Uniswap V3"),
            PoolDialect::Algebra => write!(f, "Algebra"),
        }
    }
}

/// Half-open tick range `[lower, upper)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TickRange {
    /// Inclusive lower tick.
    pub lower: i32,
    /// Exclusive upper tick.
    pub upper: i32,
}

impl TickRange {
    /// Validates and builds a range.
    pub fn new(lower: i32, upper: i32) -> Result<Self, LiquidityError> {
        if lower >= upper || lower < MIN_TICK || upper > MAX_TICK {
            return Err(LiquidityError::InvalidRange { lower, upper });
        }
        Ok(Self { lower, upper })
    }

    /// Returns `true` if `tick` is inside the range.
    pub fn contains(&self, tick: i32) -> bool {
        tick >= self.lower && tick < self.upper
    }
}

impl fmt::Display for TickRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.lower, self.upper)
    }
}

/// A concentrated-liquidity pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcentratedPool {
    /// Pool address.
    pub address: Address,
    /// First token of the pair.
    pub token0: Address,
    /// Second token of the pair.
    pub token1: Address,
    /// Current tick.
    pub tick: i32,
    /// AMM family.
    pub dialect: PoolDialect,
}

/// A fungible wrapper around one ranged position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionWrapper {
    /// Wrapper token address.
    pub address: Address,
    /// Pool the position lives in.
    pub pool: Address,
    /// Position range.
    pub range: TickRange,
    /// Position liquidity.
    pub liquidity: u128,
}

/// All concentrated-liquidity pools and wrappers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LiquidityBook {
    pools: BTreeMap<Address, ConcentratedPool>,
    wrappers: BTreeMap<Address, PositionWrapper>,
}

impl LiquidityBook {
    /// Creates an empty book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pool.
    pub fn add_pool(&mut self, pool: ConcentratedPool) -> Result<(), LiquidityError> {
        check_tick(pool.tick)?;
        if self.pools.contains_key(&pool.address) {
            return Err(LiquidityError::DuplicatePool(pool.address));
        }
        self.pools.insert(pool.address, pool);
        Ok(())
    }

    /// Looks up a pool.
    pub fn pool(&self, address: &Address) -> Result<&ConcentratedPool, LiquidityError> {
        self.pools
            .get(address)
            .ok_or(LiquidityError::UnknownPool(*address))
    }

    /// Moves a pool's price.
    pub fn set_tick(&mut self, pool: &Address, tick: i32) -> Result<(), LiquidityError> {
        check_tick(tick)?;
        let pool = self
            .pools
            .get_mut(pool)
            .ok_or(LiquidityError::UnknownPool(*pool))?;
        pool.tick = tick;
        Ok(())
    }

    /// Creates a wrapper for a position and registers its token.
    pub fn add_wrapper(
        &mut self,
        tokens: &mut TokenLedger,
        wrapper: PositionWrapper,
        symbol: impl Into<String>,
    ) -> Result<(), LiquidityError> {
        self.pool(&wrapper.pool)?;
        TickRange::new(wrapper.range.lower, wrapper.range.upper)?;
        tokens.register(wrapper.address, symbol, WRAPPER_DECIMALS)?;
        self.wrappers.insert(wrapper.address, wrapper);
        Ok(())
    }

    /// Looks up a wrapper.
    pub fn wrapper(&self, address: &Address) -> Result<&PositionWrapper, LiquidityError> {
        self.wrappers
            .get(address)
            .ok_or(LiquidityError::UnknownWrapper(*address))
    }

    /// Total `(amount0, amount1)` held by the wrapper's position.
    pub fn position_amounts(&self, wrapper: &Address) -> Result<(U256, U256), LiquidityError> {
        let wrapper = self.wrapper(wrapper)?;
        let pool = self.pool(&wrapper.pool)?;
        amounts_for_liquidity(pool.tick, wrapper.range, wrapper.liquidity)
    }

    /// Underlying `[(token0, a0), (token1, a1)]` for `shares` wrapper shares.
    pub fn amounts_for_shares(
        &self,
        tokens: &TokenLedger,
        wrapper: &Address,
        shares: U256,
    ) -> Result<[(Address, U256); 2], LiquidityError> {
        let position = self.wrapper(wrapper)?;
        let pool = self.pool(&position.pool)?;
        let supply = tokens.total_supply(wrapper);
        if supply.is_zero() || shares.is_zero() {
            return Ok([(pool.token0, U256::ZERO), (pool.token1, U256::ZERO)]);
        }
        let (amount0, amount1) = self.position_amounts(wrapper)?;
        Ok([
            (pool.token0, mul_div(amount0, shares, supply)?),
            (pool.token1, mul_div(amount1, shares, supply)?),
        ])
    }

    /// Underlying amounts attributable to `holder`'s wrapper balance.
    pub fn holder_amounts(
        &self,
        tokens: &TokenLedger,
        wrapper: &Address,
        holder: &Address,
    ) -> Result<[(Address, U256); 2], LiquidityError> {
        let shares = tokens.balance_of(wrapper, holder);
        self.amounts_for_shares(tokens, wrapper, shares)
    }
}

fn check_tick(tick: i32) -> Result<(), LiquidityError> {
    if !(MIN_TICK..=MAX_TICK).contains(&tick) {
        return Err(LiquidityError::TickOutOfBounds(tick));
    }
    Ok(())
}

/// `1.0001^(tick / 2)` by repeated squaring of `sqrt(1.0001)`.
pub fn sqrt_price_at_tick(tick: i32) -> Result<Decimal, LiquidityError> {
    check_tick(tick)?;
    let mut exp = tick.unsigned_abs();
    let mut base = SQRT_TICK_BASE;
    let mut acc = Decimal::ONE;
    while exp > 0 {
        if exp & 1 == 1 {
            acc = acc.checked_mul(base).ok_or(LiquidityError::Overflow)?;
        }
        exp >>= 1;
        if exp > 0 {
            base = base.checked_mul(base).ok_or(LiquidityError::Overflow)?;
        }
    }
    if tick < 0 {
        acc = Decimal::ONE.checked_div(acc).ok_or(LiquidityError::Overflow)?;
    }
    Ok(acc)
}

/// Token amounts represented by `liquidity` over `range` at `tick`, floored.
pub fn amounts_for_liquidity(
    tick: i32,
    range: TickRange,
    liquidity: u128,
) -> Result<(U256, U256), LiquidityError> {
    let l = Decimal::from_u128(liquidity).ok_or(LiquidityError::Overflow)?;
    let sa = sqrt_price_at_tick(range.lower)?;
    let sb = sqrt_price_at_tick(range.upper)?;

    let (amount0, amount1) = if tick < range.lower {
        (amount0_between(l, sa, sb)?, Decimal::ZERO)
    } else if tick >= range.upper {
        (Decimal::ZERO, amount1_between(l, sa, sb)?)
    } else {
        let sp = sqrt_price_at_tick(tick)?;
        (amount0_between(l, sp, sb)?, amount1_between(l, sa, sp)?)
    };
    Ok((to_units(amount0)?, to_units(amount1)?))
}

/// `L * (sb - sa) / (sa * sb)`.
fn amount0_between(l: Decimal, sa: Decimal, sb: Decimal) -> Result<Decimal, LiquidityError> {
    let denominator = sa.checked_mul(sb).ok_or(LiquidityError::Overflow)?;
    let ratio = (sb - sa)
        .checked_div(denominator)
        .ok_or(LiquidityError::Overflow)?;
    l.checked_mul(ratio).ok_or(LiquidityError::Overflow)
}

/// `L * (sb - sa)`.
fn amount1_between(l: Decimal, sa: Decimal, sb: Decimal) -> Result<Decimal, LiquidityError> {
    l.checked_mul(sb - sa).ok_or(LiquidityError::Overflow)
}

fn to_units(amount: Decimal) -> Result<U256, LiquidityError> {
    let floored = amount.floor().to_u128().ok_or(LiquidityError::Overflow)?;
    Ok(U256::from(floored))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::label;

    const LIQUIDITY: u128 = 1_000_000_000_000_000_000;

    fn book() -> (LiquidityBook, TokenLedger, Address) {
        let mut tokens = TokenLedger::new();
        let mut book = LiquidityBook::new();
        let pool = label("USDC/USDT");
        book.add_pool(ConcentratedPool {
            address: pool,
            token0: label("USDC"),
            token1: label("USDT"),
            tick: 0,
            dialect: PoolDialect::UniswapV3,
        })
        .unwrap();
        let wrapper = label("LP-USDC-USDT");
        book.add_wrapper(
            &mut tokens,
            PositionWrapper {
                address: wrapper,
                pool,
                range: TickRange::new(-100, 100).unwrap(),
                liquidity: LIQUIDITY,
            },
            "LP-USDC-USDT",
        )
        .unwrap();
        (book, tokens, wrapper)
    }

    #[test]
    fn sqrt_price_basics() {
        assert_eq!(sqrt_price_at_tick(0).unwrap(), Decimal::ONE);
        assert_eq!(sqrt_price_at_tick(1).unwrap(), SQRT_TICK_BASE);
        let up = sqrt_price_at_tick(200).unwrap();
        let down = sqrt_price_at_tick(-200).unwrap();
        let product = up * down;
        assert!((product - Decimal::ONE).abs() < dec!(0.000000000001));
        // 1.0001^100 ~= 1.01005
        assert!((up - dec!(1.01005)).abs() < dec!(0.00001));
        assert!(sqrt_price_at_tick(MAX_TICK).is_ok());
        assert!(sqrt_price_at_tick(MAX_TICK + 1).is_err());
    }

    #[test]
    fn in_range_position_holds_both_tokens() {
        let (book, _, wrapper) = book();
        let (a0, a1) = book.position_amounts(&wrapper).unwrap();
        assert!(!a0.is_zero() && !a1.is_zero());
        // Symmetric range around tick 0: amounts agree to within 1%.
        let (hi, lo) = if a0 > a1 { (a0, a1) } else { (a1, a0) };
        assert!((hi - lo) * U256::from(100u64) < hi);
    }

    #[test]
    fn out_of_range_position_is_single_sided() {
        let (mut book, _, wrapper) = book();
        let pool = book.wrapper(&wrapper).unwrap().pool;

        book.set_tick(&pool, -500).unwrap();
        let (a0, a1) = book.position_amounts(&wrapper).unwrap();
        assert!(!a0.is_zero());
        assert_eq!(a1, U256::ZERO);

        book.set_tick(&pool, 100).unwrap();
        let (a0, a1) = book.position_amounts(&wrapper).unwrap();
        assert_eq!(a0, U256::ZERO);
        assert!(!a1.is_zero());
    }

    #[test]
    fn holder_amounts_scale_with_share() {
        let (book, mut tokens, wrapper) = book();
        let (alice, bob) = (label("alice"), label("bob"));
        tokens.mint(&wrapper, &alice, U256::from(3u64)).unwrap();
        tokens.mint(&wrapper, &bob, U256::from(1u64)).unwrap();
        let (a0, a1) = book.position_amounts(&wrapper).unwrap();
        let alice_amounts = book.holder_amounts(&tokens, &wrapper, &alice).unwrap();
        assert_eq!(alice_amounts[0].1, a0 * U256::from(3u64) / U256::from(4u64));
        assert_eq!(alice_amounts[1].1, a1 * U256::from(3u64) / U256::from(4u64));
    }

    #[test]
    fn invalid_range_rejected() {
        assert!(TickRange::new(10, 10).is_err());
        assert!(TickRange::new(MIN_TICK - 1, 0).is_err());
        assert!(TickRange::new(-10, 10).unwrap().contains(0));
    }
}
