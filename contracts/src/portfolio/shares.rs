//! Share balances and holder-to-holder transfers.

use std::collections::BTreeMap;

use folio_protocol::math;
use folio_protocol::{Address, Ledger, U256};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::Portfolio;
use crate::error::VaultError;
use crate::events::VaultEvent;

/// Vault share balances and supply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareLedger {
    balances: BTreeMap<Address, U256>,
    supply: U256,
}

impl ShareLedger {
    /// Shares held by `holder`.
    pub fn balance_of(&self, holder: &Address) -> U256 {
        self.balances.get(holder).copied().unwrap_or(U256::ZERO)
    }

    /// Total shares outstanding.
    pub fn total_supply(&self) -> U256 {
        self.supply
    }

    /// Every holder with a non-zero balance.
    pub fn holders(&self) -> impl Iterator<Item = (&Address, &U256)> {
        self.balances.iter()
    }

    pub(crate) fn mint(&mut self, to: Address, amount: U256) -> Result<(), VaultError> {
        self.supply = math::add(self.supply, amount)?;
        let balance = math::add(self.balance_of(&to), amount)?;
        self.balances.insert(to, balance);
        Ok(())
    }

    pub(crate) fn burn(&mut self, from: Address, amount: U256) -> Result<(), VaultError> {
        let balance = self.checked_debit(from, amount)?;
        self.supply = math::sub(self.supply, amount)?;
        self.store(from, balance);
        Ok(())
    }

    pub(crate) fn transfer(&mut self, from: Address, to: Address, amount: U256) -> Result<(), VaultError> {
        if from == to {
            self.checked_debit(from, amount)?;
            return Ok(());
        }
        let remaining = self.checked_debit(from, amount)?;
        self.store(from, remaining);
        let credited = math::add(self.balance_of(&to), amount)?;
        self.store(to, credited);
        Ok(())
    }

    fn checked_debit(&self, holder: Address, amount: U256) -> Result<U256, VaultError> {
        let balance = self.balance_of(&holder);
        if balance < amount {
            return Err(VaultError::InsufficientShares {
                holder,
                balance,
                requested: amount,
            });
        }
        Ok(balance - amount)
    }

    fn store(&mut self, holder: Address, balance: U256) {
        if balance.is_zero() {
            self.balances.remove(&holder);
        } else {
            self.balances.insert(holder, balance);
        }
    }
}

impl Portfolio {
    /// Moves `amount` shares from `from` to `to`.
    ///
    /// The sender's cooldown applies and both remaining balances must
    /// respect the minimum holding. Both sides are checkpointed in the
    /// exclusion ledger before balances move.
    pub fn transfer_shares(
        &mut self,
        ledger: &mut Ledger,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), VaultError> {
        self.transact(ledger, "transfer_shares", |vault, ledger| {
            if amount.is_zero() {
                return Err(VaultError::ZeroAmount);
            }
            vault.ensure_cooldown_elapsed(ledger, &from)?;
            vault.move_shares(from, to, amount)?;
            vault.ensure_minimum_holding(&from)?;
            vault.ensure_minimum_holding(&to)?;
            vault.emit(ledger, VaultEvent::SharesTransferred { from, to, amount });
            info!(vault = %vault.address, %from, %to, %amount, "shares transferred");
            Ok(())
        })
    }
}
