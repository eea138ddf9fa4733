//! # VaultCore
//!
//! A [`Portfolio`] is one tokenized basket vault. It owns share accounting,
//! fee state, exclusion checkpoints and the event log, and it moves tokens
//! through the [`Ledger`] it is handed on every call.
//!
//! ## Atomicity
//!
//! Every state-changing operation runs inside [`Portfolio::transact`]: the
//! ledger and the vault are cloned up front and both are restored if the
//! operation returns an error. Callers therefore observe either the complete
//! effect of an operation or none of it, including its events.
//!
//! ## Operations
//!
//! | Operation | Who | Module |
//! |-----------|-----|--------|
//! | `deposit` | anyone (whitelist) | `deposit.rs` |
//! | `withdraw` | holder | `withdraw.rs` |
//! | `transfer_shares` | holder | `shares.rs` |
//! | `charge_fees` | anyone | here |
//! | `claim_exclusions` | holder | here |
//! | cooldown, whitelists, fee schedule | admin | here |
//! | rebalance, borrow, repay, collateral | asset manager | [`crate::rebalance`] |

mod deposit;
mod shares;
mod withdraw;

pub use deposit::DepositReceipt;
pub use shares::ShareLedger;
pub use withdraw::WithdrawReceipt;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use folio_protocol::address::exclusion_escrow;
use folio_protocol::config::{FEE_UPDATE_DELAY, MAX_BASKET_SIZE};
use folio_protocol::lending::LendingError;
use folio_protocol::{Address, Ledger, U256};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::calculations::{self, Valuation};
use crate::config::{validate_cooldown, PortfolioConfig, WhitelistPolicy};
use crate::context::ExecutionContext;
use crate::error::{Role, VaultError};
use crate::events::{EventRecord, VaultEvent};
use crate::exclusion::{ExclusionClaim, SnapshotId, TokenExclusionLedger};
use crate::fees::{FeeSchedule, FeeSplit, FeeState, ProtocolFeeConfig};
use crate::resolver::{BasketSnapshot, TokenBalanceResolver};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A fee schedule waiting out the time lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingFeeSchedule {
    /// Proposed rates.
    pub schedule: FeeSchedule,
    /// Earliest time it can be applied.
    pub eta: DateTime<Utc>,
}

/// Fee shares minted by one charge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeCharge {
    /// Management fee.
    pub management: FeeSplit,
    /// Performance fee.
    pub performance: FeeSplit,
}

impl FeeCharge {
    /// Returns `true` if nothing was minted.
    pub fn is_empty(&self) -> bool {
        self.management == FeeSplit::default() && self.performance == FeeSplit::default()
    }
}

/// Which whitelist an admin call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhitelistKind {
    /// Who may deposit.
    Depositor,
    /// What may enter the basket.
    Token,
}

impl WhitelistKind {
    fn as_str(self) -> &'static str {
        match self {
            WhitelistKind::Depositor => "depositor",
            WhitelistKind::Token => "token",
        }
    }
}

/// Outcome of taking one token out of the basket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRemoval {
    /// Removed token.
    pub token: Address,
    /// Vault balance at removal.
    pub proceeds: U256,
    /// Exclusion snapshot; `None` when no shares were outstanding or the
    /// balance was zero.
    pub snapshot: Option<SnapshotId>,
}

/// One tokenized basket vault.
#[derive(Debug, Clone)]
pub struct Portfolio {
    address: Address,
    config: PortfolioConfig,
    tokens: Vec<Address>,
    shares: ShareLedger,
    fee_state: FeeState,
    pending_fees: Option<PendingFeeSchedule>,
    last_deposit: BTreeMap<Address, DateTime<Utc>>,
    exclusions: TokenExclusionLedger,
    debt_pools: BTreeSet<Address>,
    created_at: DateTime<Utc>,
    events: Vec<EventRecord>,
}

impl Portfolio {
    /// Creates a vault at `address` holding `tokens`.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the configuration is invalid or any
    /// token is duplicated, unregistered or not whitelisted, or if the
    /// basket exceeds [`MAX_BASKET_SIZE`].
    pub fn new(
        address: Address,
        config: PortfolioConfig,
        tokens: Vec<Address>,
        ledger: &Ledger,
        ctx: &ExecutionContext,
    ) -> Result<Self, VaultError> {
        config.validate()?;
        validate_basket(&tokens, ctx, &config.whitelist)?;
        let now = ledger.now();
        info!(
            vault = %address,
            name = %config.name,
            symbol = %config.symbol,
            tokens = tokens.len(),
            "portfolio created"
        );
        Ok(Self {
            address,
            config,
            tokens,
            shares: ShareLedger::default(),
            fee_state: FeeState::new(now),
            pending_fees: None,
            last_deposit: BTreeMap::new(),
            exclusions: TokenExclusionLedger::new(exclusion_escrow(address)),
            debt_pools: BTreeSet::new(),
            created_at: now,
            events: Vec::new(),
        })
    }

    // -----------------------------------------------------------------------
    // Views
    // -----------------------------------------------------------------------

    /// Vault address; also the account holding basket tokens.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Current configuration.
    pub fn config(&self) -> &PortfolioConfig {
        &self.config
    }

    /// Basket tokens in order.
    pub fn tokens(&self) -> &[Address] {
        &self.tokens
    }

    /// Share balances.
    pub fn shares(&self) -> &ShareLedger {
        &self.shares
    }

    /// Shares held by `holder`.
    pub fn balance_of(&self, holder: &Address) -> U256 {
        self.shares.balance_of(holder)
    }

    /// Total shares outstanding.
    pub fn total_supply(&self) -> U256 {
        self.shares.total_supply()
    }

    /// Fee bookkeeping.
    pub fn fee_state(&self) -> &FeeState {
        &self.fee_state
    }

    /// Fee schedule waiting out the time lock.
    pub fn pending_fee_schedule(&self) -> Option<&PendingFeeSchedule> {
        self.pending_fees.as_ref()
    }

    /// Last deposit time of `holder`.
    pub fn last_deposit(&self, holder: &Address) -> Option<DateTime<Utc>> {
        self.last_deposit.get(holder).copied()
    }

    /// Exclusion snapshots and checkpoints.
    pub fn exclusions(&self) -> &TokenExclusionLedger {
        &self.exclusions
    }

    /// Lending pools the vault has borrowed from.
    pub fn debt_pools(&self) -> &BTreeSet<Address> {
        &self.debt_pools
    }

    /// Creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Committed events, oldest first.
    pub fn events(&self) -> &[EventRecord] {
        &self.events
    }

    /// Resolves the basket through the registered positions.
    pub fn snapshot(&self, ledger: &Ledger, ctx: &ExecutionContext) -> Result<BasketSnapshot, VaultError> {
        TokenBalanceResolver::new(ledger, &ctx.assets).resolve_basket(self.address, &self.tokens, &self.debt_pools)
    }

    /// Gross and net USD18 value of the basket.
    pub fn valuation(&self, ledger: &Ledger, ctx: &ExecutionContext) -> Result<Valuation, VaultError> {
        calculations::value_basket(ctx.oracle(), &self.snapshot(ledger, ctx)?)
    }

    /// Net value per share, scaled by 1e18. Zero with no shares outstanding.
    pub fn share_value(&self, ledger: &Ledger, ctx: &ExecutionContext) -> Result<U256, VaultError> {
        let supply = self.shares.total_supply();
        if supply.is_zero() {
            return Ok(U256::ZERO);
        }
        calculations::share_value(self.valuation(ledger, ctx)?.net_usd, supply)
    }

    /// Exclusion proceeds `holder` could claim right now.
    pub fn pending_exclusions(&self, holder: &Address) -> Result<Vec<ExclusionClaim>, VaultError> {
        Ok(self.exclusions.pending(holder, self.shares.balance_of(holder))?)
    }

    // -----------------------------------------------------------------------
    // Open operations
    // -----------------------------------------------------------------------

    /// Charges management and performance fees. Callable by anyone.
    pub fn charge_fees(&mut self, ledger: &mut Ledger, ctx: &ExecutionContext) -> Result<FeeCharge, VaultError> {
        self.transact(ledger, "charge_fees", |vault, ledger| {
            let valuation = vault.valuation(ledger, ctx)?;
            vault.accrue_fees(ledger, &ctx.protocol_fees, valuation.net_usd)
        })
    }

    /// Pays `holder`'s unclaimed exclusion proceeds to `receiver`.
    pub fn claim_exclusions(
        &mut self,
        ledger: &mut Ledger,
        holder: Address,
        receiver: Address,
    ) -> Result<Vec<ExclusionClaim>, VaultError> {
        self.transact(ledger, "claim_exclusions", |vault, ledger| {
            vault.pay_exclusions(ledger, holder, receiver)
        })
    }

    // -----------------------------------------------------------------------
    // Admin operations
    // -----------------------------------------------------------------------

    /// Sets the post-deposit cooldown.
    pub fn set_cooldown_period(&mut self, ledger: &mut Ledger, caller: Address, secs: u64) -> Result<(), VaultError> {
        self.transact(ledger, "set_cooldown_period", |vault, ledger| {
            vault.require_role(caller, Role::Admin)?;
            validate_cooldown(secs)?;
            vault.config.cooldown_period_secs = secs;
            vault.emit(ledger, VaultEvent::CooldownUpdated { cooldown_period_secs: secs });
            info!(vault = %vault.address, secs, "cooldown updated");
            Ok(())
        })
    }

    /// Turns a whitelist on or off.
    pub fn set_whitelist_enabled(
        &mut self,
        ledger: &mut Ledger,
        caller: Address,
        list: WhitelistKind,
        enabled: bool,
    ) -> Result<(), VaultError> {
        self.transact(ledger, "set_whitelist_enabled", |vault, _| {
            vault.require_role(caller, Role::Admin)?;
            match list {
                WhitelistKind::Depositor => vault.config.whitelist.depositor_whitelist_enabled = enabled,
                WhitelistKind::Token => vault.config.whitelist.token_whitelist_enabled = enabled,
            }
            info!(vault = %vault.address, list = list.as_str(), enabled, "whitelist toggled");
            Ok(())
        })
    }

    /// Adds and removes whitelist entries.
    pub fn update_whitelist(
        &mut self,
        ledger: &mut Ledger,
        caller: Address,
        list: WhitelistKind,
        add: &[Address],
        remove: &[Address],
    ) -> Result<(), VaultError> {
        self.transact(ledger, "update_whitelist", |vault, ledger| {
            vault.require_role(caller, Role::Admin)?;
            let entries = match list {
                WhitelistKind::Depositor => &mut vault.config.whitelist.depositors,
                WhitelistKind::Token => &mut vault.config.whitelist.tokens,
            };
            entries.extend(add.iter().copied());
            for address in remove {
                entries.remove(address);
            }
            vault.emit(
                ledger,
                VaultEvent::WhitelistUpdated {
                    list: list.as_str().to_string(),
                    added: add.to_vec(),
                    removed: remove.to_vec(),
                },
            );
            info!(
                vault = %vault.address,
                list = list.as_str(),
                added = add.len(),
                removed = remove.len(),
                "whitelist updated"
            );
            Ok(())
        })
    }

    /// Starts the time lock for a new fee schedule. Replaces any pending one.
    pub fn propose_fee_schedule(
        &mut self,
        ledger: &mut Ledger,
        caller: Address,
        schedule: FeeSchedule,
    ) -> Result<DateTime<Utc>, VaultError> {
        self.transact(ledger, "propose_fee_schedule", |vault, ledger| {
            vault.require_role(caller, Role::Admin)?;
            schedule.validate()?;
            let eta = ledger.now() + Duration::seconds(FEE_UPDATE_DELAY.as_secs() as i64);
            vault.pending_fees = Some(PendingFeeSchedule { schedule, eta });
            vault.emit(ledger, VaultEvent::FeeScheduleProposed { schedule, eta });
            info!(vault = %vault.address, %eta, "fee schedule proposed");
            Ok(eta)
        })
    }

    /// Applies the pending fee schedule once its time lock has expired.
    /// Fees accrued so far are charged at the old rates first.
    pub fn apply_fee_schedule(
        &mut self,
        ledger: &mut Ledger,
        ctx: &ExecutionContext,
        caller: Address,
    ) -> Result<FeeSchedule, VaultError> {
        self.transact(ledger, "apply_fee_schedule", |vault, ledger| {
            vault.require_role(caller, Role::Admin)?;
            let pending = vault.pending_fees.ok_or(VaultError::NoPendingFeeSchedule)?;
            if ledger.now() < pending.eta {
                return Err(VaultError::FeeUpdateTimelocked { eta: pending.eta });
            }
            let valuation = vault.valuation(ledger, ctx)?;
            vault.accrue_fees(ledger, &ctx.protocol_fees, valuation.net_usd)?;
            vault.config.fees = pending.schedule;
            vault.pending_fees = None;
            vault.emit(ledger, VaultEvent::FeeScheduleApplied { schedule: pending.schedule });
            info!(vault = %vault.address, "fee schedule applied");
            Ok(pending.schedule)
        })
    }

    // -----------------------------------------------------------------------
    // Transactional boundary
    // -----------------------------------------------------------------------

    /// Runs `op` against the vault and ledger, restoring both on error.
    pub(crate) fn transact<T, F>(&mut self, ledger: &mut Ledger, operation: &'static str, op: F) -> Result<T, VaultError>
    where
        F: FnOnce(&mut Self, &mut Ledger) -> Result<T, VaultError>,
    {
        let ledger_before = ledger.clone();
        let vault_before = self.clone();
        match op(self, ledger) {
            Ok(value) => Ok(value),
            Err(err) => {
                *ledger = ledger_before;
                *self = vault_before;
                warn!(
                    vault = %self.address,
                    operation,
                    kind = %err.kind(),
                    error = %err,
                    "operation reverted"
                );
                Err(err)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Policy
    // -----------------------------------------------------------------------

    pub(crate) fn require_role(&self, caller: Address, role: Role) -> Result<(), VaultError> {
        let holder = match role {
            Role::Admin => self.config.roles.admin,
            Role::AssetManager => self.config.roles.asset_manager,
        };
        if caller != holder {
            return Err(VaultError::Unauthorized { caller, role });
        }
        Ok(())
    }

    pub(crate) fn ensure_cooldown_elapsed(&self, ledger: &Ledger, holder: &Address) -> Result<(), VaultError> {
        if let Some(deposited_at) = self.last_deposit.get(holder) {
            let until = *deposited_at + Duration::seconds(self.config.cooldown_period_secs as i64);
            if ledger.now() < until {
                return Err(VaultError::CooldownActive { holder: *holder, until });
            }
        }
        Ok(())
    }

    pub(crate) fn ensure_minimum_holding(&self, holder: &Address) -> Result<(), VaultError> {
        let balance = self.shares.balance_of(holder);
        let minimum = self.config.min_portfolio_token_holding;
        if !balance.is_zero() && balance < minimum {
            return Err(VaultError::BelowMinimumHolding {
                holder: *holder,
                balance,
                minimum,
            });
        }
        Ok(())
    }

    pub(crate) fn ensure_token_allowed(&self, token: &Address) -> Result<(), VaultError> {
        if !self.config.whitelist.allows_token(token) {
            return Err(VaultError::TokenNotWhitelisted(*token));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Shares and fees
    // -----------------------------------------------------------------------

    fn sync_exclusions(&mut self, holder: Address) {
        let balance = self.shares.balance_of(&holder);
        self.exclusions.sync_holder(holder, balance);
    }

    pub(crate) fn mint_shares(&mut self, to: Address, amount: U256) -> Result<(), VaultError> {
        if amount.is_zero() {
            return Ok(());
        }
        self.sync_exclusions(to);
        self.shares.mint(to, amount)
    }

    pub(crate) fn burn_shares(&mut self, from: Address, amount: U256) -> Result<(), VaultError> {
        if amount.is_zero() {
            return Ok(());
        }
        self.sync_exclusions(from);
        self.shares.burn(from, amount)
    }

    pub(crate) fn move_shares(&mut self, from: Address, to: Address, amount: U256) -> Result<(), VaultError> {
        if amount.is_zero() {
            return Ok(());
        }
        self.sync_exclusions(from);
        self.sync_exclusions(to);
        self.shares.transfer(from, to, amount)
    }

    /// Mints `shares` of fee to the two treasuries.
    fn mint_fee(&mut self, protocol: &ProtocolFeeConfig, shares: U256) -> Result<FeeSplit, VaultError> {
        let split = protocol.split(shares)?;
        self.mint_shares(protocol.treasury, split.protocol)?;
        self.mint_shares(self.config.roles.treasury, split.vault)?;
        Ok(split)
    }

    /// Moves `shares` of `holder`'s balance to the two treasuries.
    fn collect_fee(&mut self, protocol: &ProtocolFeeConfig, holder: Address, shares: U256) -> Result<FeeSplit, VaultError> {
        let split = protocol.split(shares)?;
        self.move_shares(holder, protocol.treasury, split.protocol)?;
        self.move_shares(holder, self.config.roles.treasury, split.vault)?;
        Ok(split)
    }

    /// Charges management then performance fees against `net_value`.
    pub(crate) fn accrue_fees(
        &mut self,
        ledger: &Ledger,
        protocol: &ProtocolFeeConfig,
        net_value: U256,
    ) -> Result<FeeCharge, VaultError> {
        let rates = self.config.fees;
        let supply = self.shares.total_supply();
        let management_shares = self
            .fee_state
            .accrue_management(ledger.now(), supply, rates.management_fee_bps)?;
        let management = self.mint_fee(protocol, management_shares)?;

        let supply = self.shares.total_supply();
        let performance = if supply.is_zero() {
            FeeSplit::default()
        } else {
            let value = calculations::share_value(net_value, supply)?;
            let shares = self
                .fee_state
                .accrue_performance(value, supply, rates.performance_fee_bps)?;
            self.mint_fee(protocol, shares)?
        };

        let charge = FeeCharge { management, performance };
        if !charge.is_empty() {
            self.emit(
                ledger,
                VaultEvent::FeesCharged {
                    management,
                    performance,
                    high_water_mark: self.fee_state.high_water_mark,
                },
            );
            info!(
                vault = %self.address,
                management = %management.total()?,
                performance = %performance.total()?,
                "fees charged"
            );
        }
        Ok(charge)
    }

    // -----------------------------------------------------------------------
    // Basket bookkeeping (used by the rebalancing engine)
    // -----------------------------------------------------------------------

    pub(crate) fn set_tokens(&mut self, ledger: &Ledger, tokens: Vec<Address>) {
        if tokens == self.tokens {
            return;
        }
        let previous = std::mem::replace(&mut self.tokens, tokens);
        let current = self.tokens.clone();
        self.emit(ledger, VaultEvent::TokensUpdated { previous, current });
    }

    /// Appends `token` to the basket if absent. Returns `true` if added.
    pub(crate) fn add_token(&mut self, ledger: &Ledger, token: Address) -> Result<bool, VaultError> {
        if self.tokens.contains(&token) {
            return Ok(false);
        }
        if self.tokens.len() >= MAX_BASKET_SIZE {
            return Err(VaultError::BasketTooLarge {
                size: self.tokens.len() + 1,
                max: MAX_BASKET_SIZE,
            });
        }
        let mut tokens = self.tokens.clone();
        tokens.push(token);
        self.set_tokens(ledger, tokens);
        Ok(true)
    }

    /// Moves the vault's `token` balance to escrow and snapshots the supply.
    ///
    /// With no shares outstanding nobody has a claim, so the balance stays in
    /// the vault as non-basket dust.
    pub(crate) fn exclude_token(&mut self, ledger: &mut Ledger, token: Address) -> Result<TokenRemoval, VaultError> {
        let proceeds = ledger.tokens.balance_of(&token, &self.address);
        let supply = self.shares.total_supply();
        let snapshot = if proceeds.is_zero() || supply.is_zero() {
            None
        } else {
            let escrow = self.exclusions.escrow();
            ledger.tokens.transfer(&token, &self.address, &escrow, proceeds)?;
            Some(self.exclusions.record_removal(token, proceeds, supply, ledger.now()))
        };
        self.emit(ledger, VaultEvent::TokenRemoved { token, proceeds, snapshot });
        info!(vault = %self.address, %token, %proceeds, ?snapshot, "token excluded");
        Ok(TokenRemoval { token, proceeds, snapshot })
    }

    /// Returns `true` if `token` is an open debt or enabled collateral in a
    /// pool where the vault owes something.
    pub(crate) fn backs_debt(&self, ledger: &Ledger, token: &Address) -> Result<bool, VaultError> {
        for pool_address in &self.debt_pools {
            let pool = ledger.pool(pool_address)?;
            if !pool.debt_of(&self.address, token).is_zero() {
                return Ok(true);
            }
            if pool.has_debt(&self.address) && pool.is_collateral_enabled(&self.address, token) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub(crate) fn track_debt_pool(&mut self, pool: Address) {
        self.debt_pools.insert(pool);
    }

    /// Forgets pools the vault no longer owes anything to.
    pub(crate) fn refresh_debt_pools(&mut self, ledger: &Ledger) {
        let vault = self.address;
        self.debt_pools
            .retain(|pool| ledger.pool(pool).map(|p| p.has_debt(&vault)).unwrap_or(false));
    }

    /// Fails if any pool the vault borrowed from considers it unhealthy.
    pub(crate) fn ensure_debt_healthy(&self, ledger: &Ledger, ctx: &ExecutionContext) -> Result<(), VaultError> {
        for pool_address in &self.debt_pools {
            let health = ledger
                .pool(pool_address)?
                .health(&ledger.tokens, ctx.oracle(), &self.address)?;
            if !health.is_healthy() {
                return Err(LendingError::InsufficientCollateral {
                    debt_usd: health.debt_usd,
                    borrowing_power_usd: health.borrowing_power_usd,
                }
                .into());
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Exclusions and events
    // -----------------------------------------------------------------------

    /// Claims everything `holder` is owed and pays it from escrow.
    pub(crate) fn pay_exclusions(
        &mut self,
        ledger: &mut Ledger,
        holder: Address,
        receiver: Address,
    ) -> Result<Vec<ExclusionClaim>, VaultError> {
        let balance = self.shares.balance_of(&holder);
        let claims = self.exclusions.claim(holder, balance)?;
        let escrow = self.exclusions.escrow();
        for claim in &claims {
            ledger.tokens.transfer(&claim.token, &escrow, &receiver, claim.amount)?;
            self.emit(
                ledger,
                VaultEvent::ExclusionClaimed {
                    holder,
                    receiver,
                    token: claim.token,
                    amount: claim.amount,
                    snapshot: claim.snapshot,
                },
            );
        }
        if !claims.is_empty() {
            info!(vault = %self.address, %holder, %receiver, claims = claims.len(), "exclusion proceeds paid");
        }
        Ok(claims)
    }

    pub(crate) fn emit(&mut self, ledger: &Ledger, event: VaultEvent) {
        let sequence = self.events.len() as u64;
        self.events.push(EventRecord {
            sequence,
            at: ledger.now(),
            event,
        });
    }
}

/// Checks a basket for size, duplicates and registry coverage.
pub(crate) fn validate_basket_shape(tokens: &[Address], ctx: &ExecutionContext) -> Result<(), VaultError> {
    if tokens.len() > MAX_BASKET_SIZE {
        return Err(VaultError::BasketTooLarge {
            size: tokens.len(),
            max: MAX_BASKET_SIZE,
        });
    }
    let mut seen = BTreeSet::new();
    for token in tokens {
        if !seen.insert(*token) {
            return Err(VaultError::DuplicateToken(*token));
        }
        ctx.assets.position(token)?;
    }
    Ok(())
}

fn validate_basket(tokens: &[Address], ctx: &ExecutionContext, whitelist: &WhitelistPolicy) -> Result<(), VaultError> {
    validate_basket_shape(tokens, ctx)?;
    match tokens.iter().find(|t| !whitelist.allows_token(t)) {
        Some(token) => Err(VaultError::TokenNotWhitelisted(*token)),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Roles;
    use crate::position::Position;
    use chrono::TimeZone;
    use folio_protocol::address::label;
    use folio_protocol::math::wad;
    use folio_protocol::oracle::StaticPriceOracle;
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    fn setup() -> (Ledger, ExecutionContext, Portfolio) {
        let mut ledger = Ledger::new(t0());
        let dai = label("DAI");
        ledger.tokens.register(dai, "DAI", 18).unwrap();
        let oracle = StaticPriceOracle::new().with_price(dai, 18, wad());
        let mut ctx = ExecutionContext::new(Arc::new(oracle));
        ctx.assets.register(&ledger, Position::PlainToken { token: dai }).unwrap();
        let config = PortfolioConfig {
            name: "Test".into(),
            symbol: "TST".into(),
            initial_portfolio_amount: U256::from(100u64),
            min_portfolio_token_holding: U256::ZERO,
            cooldown_period_secs: 0,
            fees: FeeSchedule::default(),
            roles: Roles {
                admin: label("admin"),
                asset_manager: label("manager"),
                treasury: label("treasury"),
            },
            whitelist: WhitelistPolicy::default(),
        };
        let vault = Portfolio::new(label("vault"), config, vec![dai], &ledger, &ctx).unwrap();
        (ledger, ctx, vault)
    }

    #[test]
    fn rejects_duplicate_basket_tokens() {
        let (ledger, ctx, vault) = setup();
        let dai = label("DAI");
        let err = Portfolio::new(label("v2"), vault.config().clone(), vec![dai, dai], &ledger, &ctx).unwrap_err();
        assert!(matches!(err, VaultError::DuplicateToken(t) if t == dai));
    }

    #[test]
    fn rejects_unregistered_basket_token() {
        let (ledger, ctx, vault) = setup();
        let err = Portfolio::new(label("v2"), vault.config().clone(), vec![label("LINK")], &ledger, &ctx)
            .unwrap_err();
        assert!(matches!(err, VaultError::UnsupportedAsset(_)));
    }

    #[test]
    fn admin_ops_require_admin() {
        let (mut ledger, _ctx, mut vault) = setup();
        let err = vault
            .set_cooldown_period(&mut ledger, label("manager"), 60)
            .unwrap_err();
        assert!(matches!(err, VaultError::Unauthorized { role: Role::Admin, .. }));
        vault.set_cooldown_period(&mut ledger, label("admin"), 60).unwrap();
        assert_eq!(vault.config().cooldown_period_secs, 60);
    }

    #[test]
    fn fee_schedule_is_time_locked() {
        let (mut ledger, ctx, mut vault) = setup();
        let admin = label("admin");
        let schedule = FeeSchedule {
            management_fee_bps: 100,
            ..FeeSchedule::default()
        };
        assert!(matches!(
            vault.apply_fee_schedule(&mut ledger, &ctx, admin).unwrap_err(),
            VaultError::NoPendingFeeSchedule
        ));
        let eta = vault.propose_fee_schedule(&mut ledger, admin, schedule).unwrap();
        assert_eq!(eta, t0() + Duration::days(7));

        ledger.advance(Duration::days(6));
        assert!(matches!(
            vault.apply_fee_schedule(&mut ledger, &ctx, admin).unwrap_err(),
            VaultError::FeeUpdateTimelocked { .. }
        ));
        // The failed attempt left the proposal in place.
        assert!(vault.pending_fee_schedule().is_some());

        ledger.advance(Duration::days(1));
        vault.apply_fee_schedule(&mut ledger, &ctx, admin).unwrap();
        assert_eq!(vault.config().fees.management_fee_bps, 100);
        assert!(vault.pending_fee_schedule().is_none());
    }

    #[test]
    fn reverted_operation_leaves_no_events() {
        let (mut ledger, _ctx, mut vault) = setup();
        let before = vault.events().len();
        let _ = vault.set_cooldown_period(&mut ledger, label("admin"), u64::MAX);
        assert_eq!(vault.events().len(), before);
        assert_eq!(vault.config().cooldown_period_secs, 0);
    }

    #[test]
    fn whitelist_updates_apply() {
        let (mut ledger, _ctx, mut vault) = setup();
        let admin = label("admin");
        let alice = label("alice");
        vault
            .set_whitelist_enabled(&mut ledger, admin, WhitelistKind::Depositor, true)
            .unwrap();
        assert!(!vault.config().whitelist.allows_depositor(&alice));
        vault
            .update_whitelist(&mut ledger, admin, WhitelistKind::Depositor, &[alice], &[])
            .unwrap();
        assert!(vault.config().whitelist.allows_depositor(&alice));
        vault
            .update_whitelist(&mut ledger, admin, WhitelistKind::Depositor, &[], &[alice])
            .unwrap();
        assert!(!vault.config().whitelist.allows_depositor(&alice));
    }
}
