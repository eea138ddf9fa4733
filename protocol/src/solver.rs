//! # Solver Handlers
//!
//! A solver handler executes swap call data produced off-chain by an
//! aggregator. The vault treats call data as opaque bytes: it transfers the
//! sell amount to the handler, hands over the bytes, and afterwards checks
//! only that its buy-token balance grew by the promised minimum.
//!
//! [`RouterHandler`] is the one concrete handler shipped here. Its call data
//! is a JSON [`RouteInstruction`], and it fills orders from a reserve
//! account at fixed rates.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::address::router_reserve;
use crate::math::{self, bps_of, mul_div, MathError};
use crate::token::{TokenError, TokenLedger};

/// Opaque swap payload.
pub type CallData = Vec<u8>;

/// Errors raised by solver handlers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SolverError {
    /// No enabled handler at this address.
    #[error("unknown or disabled solver handler: {0}")]
    UnknownHandler(Address),

    /// The call data could not be decoded.
    #[error("malformed call data: {0}")]
    MalformedCallData(String),

    /// The handler has no rate for this pair.
    #[error("no route from {sell} to {buy}")]
    NoRoute {
        /// Token being sold.
        sell: Address,
        /// Token being bought.
        buy: Address,
    },

    /// The instruction asks to sell more than the handler was given.
    #[error("handler holds {held} of {token}, instruction sells {requested}")]
    InsufficientInput {
        /// Sell token.
        token: Address,
        /// Handler balance.
        held: U256,
        /// Requested input.
        requested: U256,
    },

    /// Nothing to sell.
    #[error("swap input is zero")]
    ZeroInput,

    /// Token ledger failure, including an exhausted router reserve.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Arithmetic failure.
    #[error(transparent)]
    Math(#[from] MathError),
}

/// Executes aggregator call data against the token ledger.
pub trait SolverHandler: Send + Sync + fmt::Debug {
    /// Address the vault sends sell tokens to before executing.
    fn address(&self) -> Address;

    /// Runs `call_data`, delivering any output to `beneficiary`.
    fn execute(&self, tokens: &mut TokenLedger, beneficiary: Address, call_data: &[u8]) -> Result<(), SolverError>;
}

/// Call data understood by [`RouterHandler`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteInstruction {
    /// Token to sell.
    pub sell_token: Address,
    /// Token to buy.
    pub buy_token: Address,
    /// Amount to sell; `None` sells everything the handler holds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_in: Option<U256>,
}

impl RouteInstruction {
    /// Sells the handler's whole balance of `sell_token`.
    pub fn sell_all(sell_token: Address, buy_token: Address) -> Self {
        Self {
            sell_token,
            buy_token,
            amount_in: None,
        }
    }

    /// Sells exactly `amount_in`.
    pub fn exact_in(sell_token: Address, buy_token: Address, amount_in: U256) -> Self {
        Self {
            sell_token,
            buy_token,
            amount_in: Some(amount_in),
        }
    }

    /// JSON-encodes the instruction.
    pub fn encode(&self) -> Result<CallData, SolverError> {
        serde_json::to_vec(self).map_err(|e| SolverError::MalformedCallData(e.to_string()))
    }

    /// Decodes an instruction from call data.
    pub fn decode(call_data: &[u8]) -> Result<Self, SolverError> {
        serde_json::from_slice(call_data).map_err(|e| SolverError::MalformedCallData(e.to_string()))
    }
}

/// Exchange rate: `out = in * numerator / denominator`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rate {
    /// Multiplier.
    pub numerator: U256,
    /// Divisor.
    pub denominator: U256,
}

/// A fixed-rate router filling orders from a reserve account.
#[derive(Debug, Clone)]
pub struct RouterHandler {
    address: Address,
    reserve: Address,
    fee_bps: u32,
    rates: BTreeMap<(Address, Address), Rate>,
}

impl RouterHandler {
    /// Creates a router whose reserve is derived from its address.
    pub fn new(address: Address, fee_bps: u32) -> Self {
        Self {
            address,
            reserve: router_reserve(address),
            fee_bps,
            rates: BTreeMap::new(),
        }
    }

    /// Sets the `sell -> buy` rate.
    pub fn set_rate(&mut self, sell: Address, buy: Address, numerator: U256, denominator: U256) {
        self.rates.insert(
            (sell, buy),
            Rate {
                numerator,
                denominator,
            },
        );
    }

    /// Builder-style variant of [`set_rate`](Self::set_rate).
    pub fn with_rate(mut self, sell: Address, buy: Address, numerator: U256, denominator: U256) -> Self {
        self.set_rate(sell, buy, numerator, denominator);
        self
    }

    /// Account the router pays outputs from.
    pub fn reserve(&self) -> Address {
        self.reserve
    }

    /// Router fee in bps, taken from the output.
    pub fn fee_bps(&self) -> u32 {
        self.fee_bps
    }

    /// Output for selling `amount_in` of `sell` into `buy`, after the fee.
    pub fn quote(&self, sell: Address, buy: Address, amount_in: U256) -> Result<U256, SolverError> {
        let rate = self
            .rates
            .get(&(sell, buy))
            .ok_or(SolverError::NoRoute { sell, buy })?;
        let gross = mul_div(amount_in, rate.numerator, rate.denominator)?;
        let fee = bps_of(gross, self.fee_bps)?;
        Ok(math::sub(gross, fee)?)
    }
}

impl SolverHandler for RouterHandler {
    fn address(&self) -> Address {
        self.address
    }

    fn execute(&self, tokens: &mut TokenLedger, beneficiary: Address, call_data: &[u8]) -> Result<(), SolverError> {
        let route = RouteInstruction::decode(call_data)?;
        let held = tokens.balance_of(&route.sell_token, &self.address);
        let amount_in = route.amount_in.unwrap_or(held);
        if amount_in.is_zero() {
            return Err(SolverError::ZeroInput);
        }
        if amount_in > held {
            return Err(SolverError::InsufficientInput {
                token: route.sell_token,
                held,
                requested: amount_in,
            });
        }

        let amount_out = self.quote(route.sell_token, route.buy_token, amount_in)?;
        tokens.transfer(&route.sell_token, &self.address, &self.reserve, amount_in)?;
        tokens.transfer(&route.buy_token, &self.reserve, &beneficiary, amount_out)?;

        // Sweep whatever the instruction left unsold.
        let leftover = tokens.balance_of(&route.sell_token, &self.address);
        tokens.transfer(&route.sell_token, &self.address, &beneficiary, leftover)?;

        debug!(
            router = %self.address,
            sell = %route.sell_token,
            buy = %route.buy_token,
            %amount_in,
            %amount_out,
            "route executed"
        );
        Ok(())
    }
}

/// Enabled solver handlers, keyed by address.
#[derive(Debug, Clone, Default)]
pub struct SolverRegistry {
    handlers: BTreeMap<Address, Arc<dyn SolverHandler>>,
}

impl SolverRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables a handler, replacing any previous one at the same address.
    pub fn register(&mut self, handler: Arc<dyn SolverHandler>) {
        self.handlers.insert(handler.address(), handler);
    }

    /// Disables a handler. Returns `true` if it was enabled.
    pub fn disable(&mut self, address: &Address) -> bool {
        self.handlers.remove(address).is_some()
    }

    /// Returns `true` if a handler is enabled at `address`.
    pub fn is_enabled(&self, address: &Address) -> bool {
        self.handlers.contains_key(address)
    }

    /// Looks up an enabled handler.
    pub fn get(&self, address: &Address) -> Result<Arc<dyn SolverHandler>, SolverError> {
        self.handlers
            .get(address)
            .cloned()
            .ok_or(SolverError::UnknownHandler(*address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::label;

    struct Fixture {
        tokens: TokenLedger,
        router: RouterHandler,
        weth: Address,
        usdc: Address,
        vault: Address,
    }

    fn fixture() -> Fixture {
        let (weth, usdc, vault) = (label("WETH"), label("USDC"), label("vault"));
        let mut tokens = TokenLedger::new();
        tokens.register(weth, "WETH", 18).unwrap();
        tokens.register(usdc, "USDC", 6).unwrap();
        // 1 WETH (1e18) -> 2,000 USDC (2e9).
        let router = RouterHandler::new(label("router"), 0).with_rate(
            weth,
            usdc,
            U256::from(2_000u64),
            U256::from(1_000_000_000_000u64),
        );
        tokens
            .mint(&usdc, &router.reserve(), U256::from(1_000_000_000_000u64))
            .unwrap();
        Fixture {
            tokens,
            router,
            weth,
            usdc,
            vault,
        }
    }

    #[test]
    fn instruction_survives_json() {
        let route = RouteInstruction::exact_in(label("A"), label("B"), U256::from(7u64));
        let decoded = RouteInstruction::decode(&route.encode().unwrap()).unwrap();
        assert_eq!(decoded, route);
    }

    #[test]
    fn garbage_call_data_rejected() {
        assert!(matches!(
            RouteInstruction::decode(b"not json"),
            Err(SolverError::MalformedCallData(_))
        ));
    }

    #[test]
    fn sell_all_pays_beneficiary() {
        let mut f = fixture();
        let one_weth = U256::from(1_000_000_000_000_000_000u128);
        f.tokens.mint(&f.weth, &f.router.address(), one_weth).unwrap();
        let data = RouteInstruction::sell_all(f.weth, f.usdc).encode().unwrap();
        f.router.execute(&mut f.tokens, f.vault, &data).unwrap();
        assert_eq!(f.tokens.balance_of(&f.usdc, &f.vault), U256::from(2_000_000_000u64));
        assert_eq!(f.tokens.balance_of(&f.weth, &f.router.address()), U256::ZERO);
    }

    #[test]
    fn exact_in_sweeps_leftover() {
        let mut f = fixture();
        let half = U256::from(500_000_000_000_000_000u128);
        f.tokens
            .mint(&f.weth, &f.router.address(), half * U256::from(2u64))
            .unwrap();
        let data = RouteInstruction::exact_in(f.weth, f.usdc, half).encode().unwrap();
        f.router.execute(&mut f.tokens, f.vault, &data).unwrap();
        assert_eq!(f.tokens.balance_of(&f.usdc, &f.vault), U256::from(1_000_000_000u64));
        assert_eq!(f.tokens.balance_of(&f.weth, &f.vault), half);
    }

    #[test]
    fn fee_reduces_output() {
        let f = fixture();
        let router = f.router.clone();
        let router = RouterHandler { fee_bps: 30, ..router };
        let out = router
            .quote(f.weth, f.usdc, U256::from(1_000_000_000_000_000_000u128))
            .unwrap();
        assert_eq!(out, U256::from(1_994_000_000u64));
    }

    #[test]
    fn missing_route_rejected() {
        let mut f = fixture();
        f.tokens.mint(&f.usdc, &f.router.address(), U256::from(1u64)).unwrap();
        let data = RouteInstruction::sell_all(f.usdc, f.weth).encode().unwrap();
        assert!(matches!(
            f.router.execute(&mut f.tokens, f.vault, &data),
            Err(SolverError::NoRoute { .. })
        ));
    }

    #[test]
    fn registry_lookup() {
        let f = fixture();
        let mut registry = SolverRegistry::new();
        let address = f.router.address();
        registry.register(Arc::new(f.router));
        assert!(registry.get(&address).is_ok());
        assert!(registry.disable(&address));
        assert!(matches!(
            registry.get(&address),
            Err(SolverError::UnknownHandler(_))
        ));
    }
}
