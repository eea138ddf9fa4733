//! # Token Ledger
//!
//! ERC-20 style bookkeeping for every token the vault touches: plain
//! tokens, lending receipt tokens (aTokens/vTokens) and LP position
//! wrappers. Tokens are registered once with their symbol and decimals,
//! then minted, burned and transferred between addresses.
//!
//! ## Invariants
//!
//! - `total_supply(token) == Σ balance_of(token, *)` at all times.
//! - Balances never go negative; a short transfer fails before touching
//!   either side.
//! - Overflow is checked on every credit.

use std::collections::{BTreeMap, HashMap};

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::math::{pow10, MathError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during token ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// The referenced token has never been registered.
    #[error("unknown token: {0}")]
    UnknownToken(Address),

    /// A token with this address is already registered.
    #[error("token already registered: {0}")]
    DuplicateToken(Address),

    /// The debited account does not hold enough of the token.
    #[error("insufficient {token} balance for {account}: has {balance}, needs {requested}")]
    InsufficientBalance {
        /// Token being debited.
        token: Address,
        /// Account being debited.
        account: Address,
        /// Current balance.
        balance: U256,
        /// Amount requested.
        requested: U256,
    },

    /// Supply or a balance would exceed `U256::MAX`.
    #[error("supply overflow for token {0}")]
    SupplyOverflow(Address),
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Display metadata for a registered token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMeta {
    /// Ticker symbol, e.g. `"USDC"`.
    pub symbol: String,
    /// Decimal places of the smallest unit.
    pub decimals: u8,
}

/// Balances and supplies for every registered token.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenLedger {
    tokens: BTreeMap<Address, TokenMeta>,
    balances: HashMap<Address, HashMap<Address, U256>>,
    supplies: HashMap<Address, U256>,
}

impl TokenLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a token with zero supply.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::DuplicateToken`] if the address is taken.
    pub fn register(
        &mut self,
        token: Address,
        symbol: impl Into<String>,
        decimals: u8,
    ) -> Result<(), TokenError> {
        if self.tokens.contains_key(&token) {
            return Err(TokenError::DuplicateToken(token));
        }
        self.tokens.insert(
            token,
            TokenMeta {
                symbol: symbol.into(),
                decimals,
            },
        );
        self.supplies.insert(token, U256::ZERO);
        self.balances.insert(token, HashMap::new());
        Ok(())
    }

    /// Returns `true` if the token has been registered.
    pub fn is_registered(&self, token: &Address) -> bool {
        self.tokens.contains_key(token)
    }

    /// Returns the token's metadata.
    pub fn meta(&self, token: &Address) -> Result<&TokenMeta, TokenError> {
        self.tokens.get(token).ok_or(TokenError::UnknownToken(*token))
    }

    /// Returns the token's decimals.
    pub fn decimals(&self, token: &Address) -> Result<u8, TokenError> {
        self.meta(token).map(|m| m.decimals)
    }

    /// Returns the token's symbol, or the hex address for unknown tokens.
    pub fn symbol(&self, token: &Address) -> String {
        self.tokens
            .get(token)
            .map(|m| m.symbol.clone())
            .unwrap_or_else(|| token.to_string())
    }

    /// One whole token in smallest units (`10^decimals`).
    pub fn one_unit(&self, token: &Address) -> Result<U256, TokenError> {
        let decimals = self.decimals(token)?;
        pow10(decimals).map_err(|_: MathError| TokenError::SupplyOverflow(*token))
    }

    /// Iterates registered tokens in address order.
    pub fn tokens(&self) -> impl Iterator<Item = (&Address, &TokenMeta)> {
        self.tokens.iter()
    }

    /// Returns `account`'s balance, or zero.
    pub fn balance_of(&self, token: &Address, account: &Address) -> U256 {
        self.balances
            .get(token)
            .and_then(|b| b.get(account))
            .copied()
            .unwrap_or(U256::ZERO)
    }

    /// Returns the total supply, or zero for unknown tokens.
    pub fn total_supply(&self, token: &Address) -> U256 {
        self.supplies.get(token).copied().unwrap_or(U256::ZERO)
    }

    /// Creates `amount` new units in `to`'s balance.
    pub fn mint(&mut self, token: &Address, to: &Address, amount: U256) -> Result<(), TokenError> {
        if !self.is_registered(token) {
            return Err(TokenError::UnknownToken(*token));
        }
        let supply = self.total_supply(token);
        let new_supply = supply
            .checked_add(amount)
            .ok_or(TokenError::SupplyOverflow(*token))?;
        let balances = self
            .balances
            .get_mut(token)
            .ok_or(TokenError::UnknownToken(*token))?;
        let balance = balances.entry(*to).or_insert(U256::ZERO);
        // Cannot overflow once the supply check passed.
        *balance += amount;
        self.supplies.insert(*token, new_supply);
        Ok(())
    }

    /// Destroys `amount` units from `from`'s balance.
    pub fn burn(
        &mut self,
        token: &Address,
        from: &Address,
        amount: U256,
    ) -> Result<(), TokenError> {
        self.debit(token, from, amount)?;
        let supply = self.total_supply(token);
        self.supplies.insert(*token, supply.saturating_sub(amount));
        Ok(())
    }

    /// Moves `amount` from `from` to `to`. A zero-amount transfer is a no-op.
    pub fn transfer(
        &mut self,
        token: &Address,
        from: &Address,
        to: &Address,
        amount: U256,
    ) -> Result<(), TokenError> {
        if amount.is_zero() {
            return if self.is_registered(token) {
                Ok(())
            } else {
                Err(TokenError::UnknownToken(*token))
            };
        }
        self.debit(token, from, amount)?;
        let balances = self
            .balances
            .get_mut(token)
            .ok_or(TokenError::UnknownToken(*token))?;
        let balance = balances.entry(*to).or_insert(U256::ZERO);
        // Total supply bounds every balance, so this cannot overflow.
        *balance += amount;
        Ok(())
    }

    fn debit(&mut self, token: &Address, from: &Address, amount: U256) -> Result<(), TokenError> {
        let balances = self
            .balances
            .get_mut(token)
            .ok_or(TokenError::UnknownToken(*token))?;
        let balance = balances.entry(*from).or_insert(U256::ZERO);
        if *balance < amount {
            return Err(TokenError::InsufficientBalance {
                token: *token,
                account: *from,
                balance: *balance,
                requested: amount,
            });
        }
        *balance -= amount;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
