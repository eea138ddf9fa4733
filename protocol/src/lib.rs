// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Folio Protocol: Ledger Primitives & Collaborators
//!
//! Everything the vault engine in `folio-contracts` reads from or pushes
//! value through lives here: the token ledger, the price oracle contract,
//! lending pools, concentrated-liquidity pools, and the swap routers that
//! solver handlers expose.
//!
//! None of these modules know what a vault share is. They model the outside
//! world the vault is a tenant of, and they model it strictly: balances never
//! go negative, every multiplication is checked, and every failure is a typed
//! error rather than a silent zero.
//!
//! ## Architecture
//!
//! - **address**: Deterministic synthetic addresses for escrows and labels.
//! - **config**: Protocol constants: denominators, caps, delays.
//! - **math**: Checked 256-bit `mul_div` helpers and basis-point maths.
//! - **token**: ERC-20 style balances and supplies.
//! - **oracle**: The read-only USD price contract.
//! - **lending**: Aave/Venus-style pools: supply, borrow, repay, flash loans.
//! - **liquidity**: Uniswap-V3/Algebra-style pools and LP position wrappers.
//! - **solver**: Swap handlers executing opaque aggregator call data.
//! - **ledger**: The single mutable world state passed to every operation.
//!
//! ## Design Philosophy
//!
//! 1. All amounts are `U256` in the token's smallest unit.
//! 2. Rounding direction is always explicit (`mul_div` floors, `mul_div_up`
//!    ceils).
//! 3. Nothing reads the wall clock. Time is part of the [`ledger::Ledger`].

pub mod address;
pub mod config;
pub mod ledger;
pub mod lending;
pub mod liquidity;
pub mod math;
pub mod oracle;
pub mod solver;
pub mod token;

pub use alloy_primitives::{Address, U256};
pub use ledger::Ledger;
