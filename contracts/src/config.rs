//! Vault configuration.
//!
//! A [`PortfolioConfig`] is fixed at creation except for the parts admins
//! may change later (cooldown, whitelists, fee schedule via the time lock).

use std::collections::BTreeSet;

use folio_protocol::config::MAX_COOLDOWN_PERIOD;
use folio_protocol::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::error::VaultError;
use crate::fees::FeeSchedule;

/// Who may do what.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roles {
    /// Manages whitelists, cooldown and fee schedule.
    pub admin: Address,
    /// Rebalances the basket, borrows and repays.
    pub asset_manager: Address,
    /// Receives the vault's share of fees.
    pub treasury: Address,
}

/// Optional depositor and token whitelists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhitelistPolicy {
    /// When set, only listed addresses may deposit.
    pub depositor_whitelist_enabled: bool,
    /// Allowed depositors.
    pub depositors: BTreeSet<Address>,
    /// When set, only listed tokens may enter the basket.
    pub token_whitelist_enabled: bool,
    /// Allowed basket tokens.
    pub tokens: BTreeSet<Address>,
}

impl WhitelistPolicy {
    /// Returns `true` if `depositor` may deposit.
    pub fn allows_depositor(&self, depositor: &Address) -> bool {
        !self.depositor_whitelist_enabled || self.depositors.contains(depositor)
    }

    /// Returns `true` if `token` may enter the basket.
    pub fn allows_token(&self, token: &Address) -> bool {
        !self.token_whitelist_enabled || self.tokens.contains(token)
    }
}

/// Everything needed to create a vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioConfig {
    /// Display name.
    pub name: String,
    /// Share ticker.
    pub symbol: String,
    /// Shares minted by the first deposit.
    pub initial_portfolio_amount: U256,
    /// After any withdrawal or transfer a balance must be zero or at least this.
    pub min_portfolio_token_holding: U256,
    /// Seconds a depositor must wait before withdrawing or transferring.
    pub cooldown_period_secs: u64,
    /// Fee rates.
    pub fees: FeeSchedule,
    /// Privileged accounts.
    pub roles: Roles,
    /// Access policy.
    pub whitelist: WhitelistPolicy,
}

impl PortfolioConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), VaultError> {
        if self.name.trim().is_empty() || self.symbol.trim().is_empty() {
            return Err(VaultError::InvalidConfig("name and symbol must be set".into()));
        }
        if self.initial_portfolio_amount.is_zero() {
            return Err(VaultError::InvalidConfig(
                "initial portfolio amount must be greater than zero".into(),
            ));
        }
        validate_cooldown(self.cooldown_period_secs)?;
        self.fees.validate()?;
        let roles = [
            ("admin", self.roles.admin),
            ("asset manager", self.roles.asset_manager),
            ("treasury", self.roles.treasury),
        ];
        for (role, address) in roles {
            if address == Address::ZERO {
                return Err(VaultError::InvalidConfig(format!("{role} address is zero")));
            }
        }
        Ok(())
    }
}

/// Checks a cooldown against [`MAX_COOLDOWN_PERIOD`].
pub fn validate_cooldown(secs: u64) -> Result<(), VaultError> {
    if secs > MAX_COOLDOWN_PERIOD.as_secs() {
        return Err(VaultError::InvalidConfig(format!(
            "cooldown of {secs}s exceeds maximum of {}s",
            MAX_COOLDOWN_PERIOD.as_secs()
        )));
    }
    Ok(())
}
