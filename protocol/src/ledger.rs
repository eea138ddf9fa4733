//! # Ledger
//!
//! The single linear world state. Every vault operation receives it by
//! `&mut` reference, reads what it needs, and mutates it in place. Callers
//! that need all-or-nothing semantics clone it before an operation and put
//! the clone back on failure.

use std::collections::BTreeMap;

use alloy_primitives::Address;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::lending::{LendingError, LendingPool};
use crate::liquidity::LiquidityBook;
use crate::token::TokenLedger;

/// Token balances, lending pools, liquidity pools and the clock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ledger {
    /// ERC-20 style balances.
    pub tokens: TokenLedger,
    /// Lending pools by address.
    pub lending: BTreeMap<Address, LendingPool>,
    /// Concentrated-liquidity pools and wrappers.
    pub liquidity: LiquidityBook,
    now: DateTime<Utc>,
}

impl Ledger {
    /// Creates an empty ledger whose clock starts at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            tokens: TokenLedger::new(),
            lending: BTreeMap::new(),
            liquidity: LiquidityBook::new(),
            now: start,
        }
    }

    /// Current ledger time.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Moves the clock forward. Negative durations are ignored.
    pub fn advance(&mut self, by: Duration) {
        if by > Duration::zero() {
            self.now += by;
        }
    }

    /// Moves the clock to `at` if that is later than now.
    pub fn advance_to(&mut self, at: DateTime<Utc>) {
        if at > self.now {
            self.now = at;
        }
    }

    /// Adds a lending pool.
    pub fn add_lending_pool(&mut self, pool: LendingPool) -> Result<(), LendingError> {
        if self.lending.contains_key(&pool.address()) {
            return Err(LendingError::DuplicatePool(pool.address()));
        }
        self.lending.insert(pool.address(), pool);
        Ok(())
    }

    /// Looks up a lending pool.
    pub fn pool(&self, address: &Address) -> Result<&LendingPool, LendingError> {
        self.lending
            .get(address)
            .ok_or(LendingError::UnknownPool(*address))
    }

    /// A lending pool together with the token ledger it moves balances in.
    pub fn pool_and_tokens(
        &mut self,
        address: &Address,
    ) -> Result<(&mut LendingPool, &mut TokenLedger), LendingError> {
        let pool = self
            .lending
            .get_mut(address)
            .ok_or(LendingError::UnknownPool(*address))?;
        Ok((pool, &mut self.tokens))
    }
}
