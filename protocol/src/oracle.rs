//! # Price Oracle Contract
//!
//! The vault never prices anything itself. It asks an oracle to convert a
//! token amount into 18-decimal USD and, when sizing flash loans, to convert
//! USD back into token units.
//!
//! The contract is strict: a zero amount, a missing feed or a stale feed is
//! an error. Callers that might hold a zero balance skip the call instead of
//! relying on the oracle to say "zero".

use std::collections::HashMap;
use std::fmt;

use alloy_primitives::{Address, U256};
use thiserror::Error;

use crate::math::{mul_div, mul_div_up, pow10, MathError};

/// Errors returned by a price oracle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    /// No feed is configured for the token.
    #[error("no price feed for token {0}")]
    MissingFeed(Address),

    /// The feed exists but its last answer is unusable.
    #[error("price feed for token {0} is stale")]
    StaleFeed(Address),

    /// Zero amounts are rejected rather than priced at zero.
    #[error("cannot price a zero amount of {0}")]
    ZeroAmount(Address),

    /// A zero or otherwise invalid price was configured.
    #[error("invalid price for token {0}")]
    InvalidPrice(Address),

    /// Checked arithmetic failed.
    #[error(transparent)]
    Math(#[from] MathError),
}

/// Read-only USD pricing used by every valuation in the vault.
pub trait PriceOracle: Send + Sync + fmt::Debug {
    /// Converts `amount` smallest units of `token` into USD with 18 decimals,
    /// rounding down.
    fn convert_to_usd18(&self, token: Address, amount: U256) -> Result<U256, OracleError>;

    /// Converts an 18-decimal USD value into units of `token`, rounding up.
    fn usd18_to_token(&self, token: Address, usd: U256) -> Result<U256, OracleError>;
}

/// A single configured feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceFeed {
    /// Price of one whole token in USD18.
    pub price_usd18: U256,
    /// Decimals of the priced token.
    pub decimals: u8,
    /// When `true`, every read reverts.
    pub stale: bool,
}

/// Table-backed oracle with manually set prices.
#[derive(Debug, Clone, Default)]
pub struct StaticPriceOracle {
    feeds: HashMap<Address, PriceFeed>,
}

impl StaticPriceOracle {
    /// Creates an oracle with no feeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the price of one whole `token` (with `decimals`) in USD18.
    pub fn set_price(&mut self, token: Address, decimals: u8, price_usd18: U256) {
        self.feeds.insert(
            token,
            PriceFeed {
                price_usd18,
                decimals,
                stale: false,
            },
        );
    }

    /// Builder-style variant of [`set_price`](Self::set_price).
    pub fn with_price(mut self, token: Address, decimals: u8, price_usd18: U256) -> Self {
        self.set_price(token, decimals, price_usd18);
        self
    }

    /// Marks a feed stale (or live again).
    pub fn mark_stale(&mut self, token: Address, stale: bool) {
        if let Some(feed) = self.feeds.get_mut(&token) {
            feed.stale = stale;
        }
    }

    /// Returns the configured feed, if any.
    pub fn feed(&self, token: &Address) -> Option<&PriceFeed> {
        self.feeds.get(token)
    }

    fn live_feed(&self, token: Address) -> Result<&PriceFeed, OracleError> {
        let feed = self
            .feeds
            .get(&token)
            .ok_or(OracleError::MissingFeed(token))?;
        if feed.stale {
            return Err(OracleError::StaleFeed(token));
        }
        if feed.price_usd18.is_zero() {
            return Err(OracleError::InvalidPrice(token));
        }
        Ok(feed)
    }
}

impl PriceOracle for StaticPriceOracle {
    fn convert_to_usd18(&self, token: Address, amount: U256) -> Result<U256, OracleError> {
        if amount.is_zero() {
            return Err(OracleError::ZeroAmount(token));
        }
        let feed = self.live_feed(token)?;
        let unit = pow10(feed.decimals)?;
        Ok(mul_div(amount, feed.price_usd18, unit)?)
    }

    fn usd18_to_token(&self, token: Address, usd: U256) -> Result<U256, OracleError> {
        if usd.is_zero() {
            return Err(OracleError::ZeroAmount(token));
        }
        let feed = self.live_feed(token)?;
        let unit = pow10(feed.decimals)?;
        Ok(mul_div_up(usd, unit, feed.price_usd18)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::label;
    use crate::math::wad;

    fn oracle() -> (StaticPriceOracle, Address, Address) {
        let usdc = label("USDC");
        let weth = label("WETH");
        let oracle = StaticPriceOracle::new()
            .with_price(usdc, 6, wad())
            .with_price(weth, 18, wad() * U256::from(2_000u64));
        (oracle, usdc, weth)
    }

    #[test]
    fn converts_across_decimals() {
        let (oracle, usdc, weth) = oracle();
        // 1,500 USDC -> $1,500.
        let usd = oracle
            .convert_to_usd18(usdc, U256::from(1_500_000_000u64))
            .unwrap();
        assert_eq!(usd, wad() * U256::from(1_500u64));
        // 0.5 WETH -> $1,000.
        let usd = oracle.convert_to_usd18(weth, wad() / U256::from(2u64)).unwrap();
        assert_eq!(usd, wad() * U256::from(1_000u64));
    }

    #[test]
    fn inverse_rounds_up() {
        let (oracle, _, weth) = oracle();
        // $1 of WETH at $2,000 is 0.0005 WETH exactly.
        let amount = oracle.usd18_to_token(weth, wad()).unwrap();
        assert_eq!(amount, U256::from(500_000_000_000_000u64));
        // $3 wei-denominated: 3 * 1e18 / 2000e18 rounds up to 1 unit.
        assert_eq!(oracle.usd18_to_token(weth, U256::from(3u64)).unwrap(), U256::from(1u64));
    }

    #[test]
    fn zero_amount_reverts() {
        let (oracle, usdc, _) = oracle();
        assert_eq!(
            oracle.convert_to_usd18(usdc, U256::ZERO),
            Err(OracleError::ZeroAmount(usdc))
        );
    }

    #[test]
    fn missing_and_stale_feeds_revert() {
        let (mut oracle, usdc, _) = oracle();
        let unknown = label("UNKNOWN");
        assert_eq!(
            oracle.convert_to_usd18(unknown, U256::from(1u64)),
            Err(OracleError::MissingFeed(unknown))
        );
        oracle.mark_stale(usdc, true);
        assert_eq!(
            oracle.convert_to_usd18(usdc, U256::from(1u64)),
            Err(OracleError::StaleFeed(usdc))
        );
    }
}
