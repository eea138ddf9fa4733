//! # Token Balance Resolver
//!
//! Turns a vault's basket into one [`BasketSnapshot`]: what the vault holds
//! of each basket token, what those holdings decompose into, and what it
//! owes. Lending supply and debt are read through the pool's account data;
//! borrowed amounts are liabilities, never summed as assets.
//!
//! A token with no registered position fails the whole resolution with
//! `UnsupportedAsset`. There is no partial snapshot.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use folio_protocol::ledger::Ledger;
use folio_protocol::{Address, U256};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::VaultError;
use crate::position::{AssetRegistry, Position};

/// One basket token as resolved at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPosition {
    /// Basket token.
    pub token: Address,
    /// Vault balance of the basket token.
    pub amount: U256,
    /// What `amount` decomposes into.
    pub underlying: Vec<(Address, U256)>,
}

/// A debt owed to a lending pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Liability {
    /// Lending pool.
    pub pool: Address,
    /// Borrowed token.
    pub token: Address,
    /// Outstanding amount.
    pub amount: U256,
}

/// Normalized view of a vault's basket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasketSnapshot {
    /// Vault the snapshot belongs to.
    pub vault: Address,
    /// Ledger time of the snapshot.
    pub taken_at: DateTime<Utc>,
    /// Holdings in basket order.
    pub holdings: Vec<ResolvedPosition>,
    /// Outstanding debts.
    pub liabilities: Vec<Liability>,
}

impl BasketSnapshot {
    /// Vault balance of a basket token, or zero.
    pub fn amount_of(&self, token: &Address) -> U256 {
        self.holdings
            .iter()
            .find(|h| h.token == *token)
            .map(|h| h.amount)
            .unwrap_or(U256::ZERO)
    }

    /// Returns `true` if the vault owes anything.
    pub fn has_debt(&self) -> bool {
        !self.liabilities.is_empty()
    }

    /// Outstanding debt in `token` at `pool`, or zero.
    pub fn debt(&self, pool: &Address, token: &Address) -> U256 {
        self.liabilities
            .iter()
            .find(|l| l.pool == *pool && l.token == *token)
            .map(|l| l.amount)
            .unwrap_or(U256::ZERO)
    }
}

/// Reads basket balances through the registered positions.
#[derive(Debug, Clone, Copy)]
pub struct TokenBalanceResolver<'a> {
    ledger: &'a Ledger,
    assets: &'a AssetRegistry,
}

impl<'a> TokenBalanceResolver<'a> {
    /// Creates a resolver over the ledger and registry.
    pub fn new(ledger: &'a Ledger, assets: &'a AssetRegistry) -> Self {
        Self { ledger, assets }
    }

    /// Resolves `basket` for `vault`. `debt_pools` lists pools the vault has
    /// borrowed from, in addition to those its lending tokens point at.
    pub fn resolve_basket(
        &self,
        vault: Address,
        basket: &[Address],
        debt_pools: &BTreeSet<Address>,
    ) -> Result<BasketSnapshot, VaultError> {
        let mut pools = debt_pools.clone();
        let mut positions = Vec::with_capacity(basket.len());
        for token in basket {
            let position = self.assets.position(token)?;
            if let Some(pool) = position.lending_pool() {
                pools.insert(pool);
            }
            positions.push(*position);
        }

        let mut supplied = Vec::new();
        let mut liabilities = Vec::new();
        for pool_address in &pools {
            let pool = self.ledger.pool(pool_address)?;
            let data = pool.account_data(&self.ledger.tokens, &vault, basket);
            supplied.extend(data.supplied.into_iter().map(|(t, a)| (*pool_address, t, a)));
            liabilities.extend(data.borrowed.into_iter().map(|(token, amount)| Liability {
                pool: *pool_address,
                token,
                amount,
            }));
        }

        let mut holdings = Vec::with_capacity(positions.len());
        for position in positions {
            let token = position.token();
            let amount = match position {
                Position::LendingToken { pool, .. } => supplied
                    .iter()
                    .find(|(p, t, _)| *p == pool && *t == token)
                    .map(|(_, _, a)| *a)
                    .unwrap_or(U256::ZERO),
                _ => self.ledger.tokens.balance_of(&token, &vault),
            };
            let underlying = if amount.is_zero() {
                Vec::new()
            } else {
                position.underlying_for_amount(self.ledger, amount)?
            };
            holdings.push(ResolvedPosition {
                token,
                amount,
                underlying,
            });
        }

        debug!(
            %vault,
            holdings = holdings.len(),
            liabilities = liabilities.len(),
            "basket resolved"
        );
        Ok(BasketSnapshot {
            vault,
            taken_at: self.ledger.now(),
            holdings,
            liabilities,
        })
    }
}
