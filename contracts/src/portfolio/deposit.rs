//! Deposits: value the incoming tokens, mint shares, take the entry fee.

use std::collections::BTreeSet;

use folio_protocol::math;
use folio_protocol::{Address, Ledger, U256};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{FeeCharge, Portfolio};
use crate::calculations;
use crate::context::ExecutionContext;
use crate::error::VaultError;
use crate::events::VaultEvent;
use crate::fees::{apply_flat_fee, FeeSplit};
use crate::intent::DepositRequest;

/// What a deposit produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositReceipt {
    /// Net shares credited to the depositor.
    pub shares_minted: U256,
    /// Entry fee shares sent to the treasuries.
    pub entry_fee: FeeSplit,
    /// USD18 value of the deposited tokens.
    pub value_usd: U256,
    /// Management and performance fees charged before minting.
    pub fees: FeeCharge,
}

impl Portfolio {
    /// Pulls `request.amounts` from `depositor` and mints shares against them.
    ///
    /// # Errors
    ///
    /// - Policy: depositor not whitelisted.
    /// - Validation: empty, duplicate, zero or non-basket amounts.
    /// - Slippage: net shares below `min_mint_amount`.
    /// - Solvency: depositor balance too low.
    pub fn deposit(
        &mut self,
        ledger: &mut Ledger,
        ctx: &ExecutionContext,
        depositor: Address,
        request: &DepositRequest,
    ) -> Result<DepositReceipt, VaultError> {
        self.transact(ledger, "deposit", |vault, ledger| {
            vault.execute_deposit(ledger, ctx, depositor, request)
        })
    }

    fn execute_deposit(
        &mut self,
        ledger: &mut Ledger,
        ctx: &ExecutionContext,
        depositor: Address,
        request: &DepositRequest,
    ) -> Result<DepositReceipt, VaultError> {
        if !self.config.whitelist.allows_depositor(&depositor) {
            return Err(VaultError::DepositorNotWhitelisted(depositor));
        }
        self.validate_deposit_amounts(&request.amounts)?;

        let valuation = self.valuation(ledger, ctx)?;
        let fees = self.accrue_fees(ledger, &ctx.protocol_fees, valuation.net_usd)?;

        let mut value_usd = U256::ZERO;
        for (token, amount) in &request.amounts {
            let underlying = ctx.assets.position(token)?.underlying_for_amount(ledger, *amount)?;
            value_usd = math::add(value_usd, calculations::value_of(ctx.oracle(), &underlying)?)?;
        }

        let supply = self.shares.total_supply();
        let minted = calculations::mint_amount(
            value_usd,
            valuation.net_usd,
            supply,
            self.config.initial_portfolio_amount,
        )?;

        for (token, amount) in &request.amounts {
            ledger.tokens.transfer(token, &depositor, &self.address, *amount)?;
        }

        let (net, fee) = apply_flat_fee(minted, self.config.fees.entry_fee_bps)?;
        if net.is_zero() || net < request.min_mint_amount {
            return Err(VaultError::MintBelowMinimum {
                minted: net,
                minimum: request.min_mint_amount.max(U256::from(1u8)),
            });
        }
        let entry_fee = self.mint_fee(&ctx.protocol_fees, fee)?;
        self.mint_shares(depositor, net)?;

        if supply.is_zero() {
            let total = math::add(valuation.net_usd, value_usd)?;
            let initial_value = calculations::share_value(total, self.shares.total_supply())?;
            self.fee_state.ratchet(initial_value);
            self.fee_state.last_charge = ledger.now();
        }

        self.ensure_minimum_holding(&depositor)?;
        self.last_deposit.insert(depositor, ledger.now());
        self.emit(
            ledger,
            VaultEvent::Deposited {
                depositor,
                value_usd,
                shares_minted: net,
                entry_fee,
            },
        );
        info!(
            vault = %self.address,
            %depositor,
            %value_usd,
            shares = %net,
            fee = %fee,
            "deposit"
        );
        Ok(DepositReceipt {
            shares_minted: net,
            entry_fee,
            value_usd,
            fees,
        })
    }

    fn validate_deposit_amounts(&self, amounts: &[(Address, U256)]) -> Result<(), VaultError> {
        if amounts.is_empty() {
            return Err(VaultError::ZeroAmount);
        }
        let mut seen = BTreeSet::new();
        for (token, amount) in amounts {
            if !seen.insert(*token) {
                return Err(VaultError::DuplicateToken(*token));
            }
            if !self.tokens.contains(token) {
                return Err(VaultError::NotInBasket(*token));
            }
            if amount.is_zero() {
                return Err(VaultError::ZeroAmount);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PortfolioConfig, Roles, WhitelistPolicy};
    use crate::fees::FeeSchedule;
    use crate::position::Position;
    use chrono::{TimeZone, Utc};
    use folio_protocol::address::label;
    use folio_protocol::math::wad;
    use folio_protocol::oracle::StaticPriceOracle;
    use std::sync::Arc;

    fn setup(entry_fee_bps: u32) -> (Ledger, ExecutionContext, Portfolio) {
        let mut ledger = Ledger::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        let token_a = label("A");
        ledger.tokens.register(token_a, "A", 0).unwrap();
        for who in ["alice", "bob"] {
            ledger.tokens.mint(&token_a, &label(who), U256::from(1_000u64)).unwrap();
        }
        let oracle = StaticPriceOracle::new().with_price(token_a, 0, wad());
        let mut ctx = ExecutionContext::new(Arc::new(oracle));
        ctx.assets
            .register(&ledger, Position::PlainToken { token: token_a })
            .unwrap();
        let config = PortfolioConfig {
            name: "Basket".into(),
            symbol: "BSK".into(),
            initial_portfolio_amount: U256::from(100u64),
            min_portfolio_token_holding: U256::ZERO,
            cooldown_period_secs: 0,
            fees: FeeSchedule {
                entry_fee_bps,
                ..FeeSchedule::default()
            },
            roles: Roles {
                admin: label("admin"),
                asset_manager: label("manager"),
                treasury: label("treasury"),
            },
            whitelist: WhitelistPolicy::default(),
        };
        let vault = Portfolio::new(label("vault"), config, vec![token_a], &ledger, &ctx).unwrap();
        (ledger, ctx, vault)
    }

    fn request(amount: u64, min: u64) -> DepositRequest {
        DepositRequest {
            amounts: vec![(label("A"), U256::from(amount))],
            min_mint_amount: U256::from(min),
        }
    }

    #[test]
    fn first_deposit_mints_initial_amount() {
        let (mut ledger, ctx, mut vault) = setup(0);
        let receipt = vault.deposit(&mut ledger, &ctx, label("alice"), &request(250, 0)).unwrap();
        assert_eq!(receipt.shares_minted, U256::from(100u64));
        assert_eq!(vault.total_supply(), U256::from(100u64));
        // 250 USD over 100 shares, scaled by 1e18.
        assert_eq!(
            vault.fee_state().high_water_mark,
            U256::from(25u64) * wad() / U256::from(10u64) * wad()
        );
    }

    #[test]
    fn entry_fee_is_taken_from_minted_shares() {
        let (mut ledger, ctx, mut vault) = setup(100);
        vault.deposit(&mut ledger, &ctx, label("alice"), &request(100, 0)).unwrap();
        let receipt = vault.deposit(&mut ledger, &ctx, label("bob"), &request(10, 0)).unwrap();
        // 10 shares before the fee; 1% of that floors the net to 9.
        assert_eq!(receipt.shares_minted, U256::from(9u64));
        assert_eq!(receipt.entry_fee.total().unwrap(), U256::from(1u64));
    }

    #[test]
    fn min_mint_is_enforced_and_reverts() {
        let (mut ledger, ctx, mut vault) = setup(0);
        vault.deposit(&mut ledger, &ctx, label("alice"), &request(100, 0)).unwrap();
        let err = vault
            .deposit(&mut ledger, &ctx, label("bob"), &request(10, 11))
            .unwrap_err();
        assert!(matches!(err, VaultError::MintBelowMinimum { .. }));
        assert_eq!(ledger.tokens.balance_of(&label("A"), &label("bob")), U256::from(1_000u64));
        assert_eq!(vault.balance_of(&label("bob")), U256::ZERO);
    }

    #[test]
    fn rejects_non_basket_and_zero_amounts() {
        let (mut ledger, ctx, mut vault) = setup(0);
        let bad = DepositRequest {
            amounts: vec![(label("B"), U256::from(1u64))],
            min_mint_amount: U256::ZERO,
        };
        assert!(matches!(
            vault.deposit(&mut ledger, &ctx, label("alice"), &bad).unwrap_err(),
            VaultError::NotInBasket(_)
        ));
        assert!(matches!(
            vault.deposit(&mut ledger, &ctx, label("alice"), &request(0, 0)).unwrap_err(),
            VaultError::ZeroAmount
        ));
    }
}
