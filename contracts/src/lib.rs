//! # Folio Vault Engine
//!
//! Accounting and rebalancing core for tokenized multi-asset vaults. A vault
//! holds a basket of positions (plain tokens, lending-protocol deposits,
//! concentrated-liquidity LP wrappers), issues fungible shares against it,
//! accrues fees, and lets an asset manager rebalance, borrow and repay.
//!
//! - **position**: How each basket token decomposes into underlying tokens.
//! - **resolver**: Turns a basket into a [`resolver::BasketSnapshot`].
//! - **calculations**: Valuation, mint, payout and flash-loan sizing maths.
//! - **fees**: Management, performance, entry and exit fees.
//! - **exclusion**: Claims of past holders on tokens removed from the basket.
//! - **rebalance**: Swaps, borrow and flash-loan repay state machines.
//! - **portfolio**: The vault itself: deposits, withdrawals, shares, admin.
//!
//! ## Design Principles
//!
//! 1. Every operation fully commits or fully reverts. The ledger and the
//!    vault are restored together on error.
//! 2. Rounding favours the vault: mints and payouts floor, sizing ceils.
//! 3. Prices come from the oracle on every call. Nothing is cached.
//! 4. Errors carry a [`error::ErrorKind`] so callers can tell a bad request
//!    from a failed swap from an insolvent unwind from a denied caller.

pub mod calculations;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod exclusion;
pub mod fees;
mod flash;
pub mod intent;
pub mod portfolio;
pub mod position;
pub mod rebalance;
pub mod resolver;

pub use context::ExecutionContext;
pub use error::{ErrorKind, VaultError};
pub use portfolio::Portfolio;
pub use rebalance::RebalancingEngine;
