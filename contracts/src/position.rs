//! # Positions & Asset Registry
//!
//! A basket member is one of three closed variants. Each variant knows how to
//! turn a token amount into underlying token amounts, which is all the
//! valuation layer needs; there is no open-ended adapter trait.
//!
//! | Variant        | Held token      | Underlying                        |
//! |----------------|-----------------|-----------------------------------|
//! | `PlainToken`   | ERC-20          | itself                            |
//! | `LendingToken` | aToken / vToken | the reserve's underlying, 1:1     |
//! | `ExternalLp`   | wrapper share   | token0 + token1 at the pool tick  |

use std::collections::BTreeMap;

use folio_protocol::ledger::Ledger;
use folio_protocol::liquidity::{PoolDialect, TickRange};
use folio_protocol::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::error::VaultError;

/// A basket member and how to value it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Position {
    /// A plain ERC-20 held directly.
    PlainToken {
        /// Token address.
        token: Address,
    },
    /// A lending receipt token.
    LendingToken {
        /// aToken / vToken address.
        token: Address,
        /// Pool that issued it.
        pool: Address,
    },
    /// Shares of a wrapped concentrated-liquidity position.
    ExternalLp {
        /// Wrapper token address.
        wrapper: Address,
        /// AMM family of the underlying pool.
        dialect: PoolDialect,
        /// Position range.
        range: TickRange,
    },
}

impl Position {
    /// The token the vault actually holds.
    pub fn token(&self) -> Address {
        match self {
            Position::PlainToken { token } | Position::LendingToken { token, .. } => *token,
            Position::ExternalLp { wrapper, .. } => *wrapper,
        }
    }

    /// Lending pool for lending positions.
    pub fn lending_pool(&self) -> Option<Address> {
        match self {
            Position::LendingToken { pool, .. } => Some(*pool),
            _ => None,
        }
    }

    /// Underlying token amounts represented by `amount` of this position.
    pub fn underlying_for_amount(
        &self,
        ledger: &Ledger,
        amount: U256,
    ) -> Result<Vec<(Address, U256)>, VaultError> {
        match self {
            Position::PlainToken { token } => Ok(vec![(*token, amount)]),
            Position::LendingToken { token, pool } => {
                let reserve = ledger.pool(pool)?.reserve_for_lending_token(token)?;
                Ok(vec![(reserve.underlying, amount)])
            }
            Position::ExternalLp { wrapper, .. } => {
                let amounts = ledger
                    .liquidity
                    .amounts_for_shares(&ledger.tokens, wrapper, amount)?;
                Ok(amounts.to_vec())
            }
        }
    }

    /// Underlying balances attributable to `holder`.
    pub fn resolve_balances(
        &self,
        ledger: &Ledger,
        holder: &Address,
    ) -> Result<Vec<(Address, U256)>, VaultError> {
        let held = ledger.tokens.balance_of(&self.token(), holder);
        self.underlying_for_amount(ledger, held)
    }

    /// Can be enabled as lending collateral.
    pub fn supports_collateral(&self) -> bool {
        matches!(self, Position::LendingToken { .. })
    }

    /// Can be borrowed from a lending pool.
    pub fn supports_borrow(&self) -> bool {
        matches!(self, Position::PlainToken { .. })
    }
}

/// Protocol-wide map from basket token to its [`Position`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetRegistry {
    positions: BTreeMap<Address, Position>,
}

impl AssetRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a position after checking it against the ledger.
    pub fn register(&mut self, ledger: &Ledger, position: Position) -> Result<(), VaultError> {
        let token = position.token();
        if self.positions.contains_key(&token) {
            return Err(VaultError::DuplicateToken(token));
        }
        if !ledger.tokens.is_registered(&token) {
            return Err(VaultError::InvalidPosition {
                token,
                reason: "token is not registered in the ledger".into(),
            });
        }
        match position {
            Position::PlainToken { .. } => {}
            Position::LendingToken { token, pool } => {
                ledger.pool(&pool)?.reserve_for_lending_token(&token)?;
            }
            Position::ExternalLp {
                wrapper,
                dialect,
                range,
            } => {
                let position = ledger.liquidity.wrapper(&wrapper)?;
                if position.range != range {
                    return Err(VaultError::InvalidPosition {
                        token,
                        reason: format!("wrapper range is {}, registration says {range}", position.range),
                    });
                }
                let pool = ledger.liquidity.pool(&position.pool)?;
                if pool.dialect != dialect {
                    return Err(VaultError::InvalidPosition {
                        token,
                        reason: format!("pool dialect is {}, registration says {dialect}", pool.dialect),
                    });
                }
            }
        }
        self.positions.insert(token, position);
        Ok(())
    }

    /// Looks up a token's position.
    pub fn position(&self, token: &Address) -> Result<&Position, VaultError> {
        self.positions
            .get(token)
            .ok_or(VaultError::UnsupportedAsset(*token))
    }

    /// Returns `true` if the token is registered.
    pub fn contains(&self, token: &Address) -> bool {
        self.positions.contains_key(token)
    }

    /// Iterates registered positions.
    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }
}
