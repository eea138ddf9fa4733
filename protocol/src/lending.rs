//! # Lending Pool
//!
//! An Aave V3 / Venus style money market. Suppliers deposit an underlying
//! token and receive a 1:1 lending token (aToken/vToken) in the
//! [`TokenLedger`]. Accounts that enable those lending tokens as collateral
//! may borrow other reserves up to their borrowing power.
//!
//! The pool also offers flash loans. A flash loan is a value that must be
//! handed back to [`LendingPool::settle_flash_loan`]; callers run the whole
//! borrow/use/repay sequence inside one transactional boundary, so a
//! shortfall at settlement unwinds everything that happened in between.
//!
//! ## Health
//!
//! An account is healthy while
//! `Σ debt_usd <= Σ enabled_collateral_usd * collateral_factor_bps / 10_000`.
//! Every operation that could reduce that margin (redeem, borrow, disabling
//! collateral) checks it against the post-operation position before any
//! balance moves.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::{BPS_DENOMINATOR, DEFAULT_COLLATERAL_FACTOR_BPS, DEFAULT_FLASH_LOAN_PREMIUM_BPS};
use crate::math::{self, bps_of_up, mul_div, MathError};
use crate::oracle::{OracleError, PriceOracle};
use crate::token::{TokenError, TokenLedger};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during lending pool operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LendingError {
    /// No lending pool exists at this address.
    #[error("unknown lending pool: {0}")]
    UnknownPool(Address),

    /// A pool with this address is already registered.
    #[error("lending pool already registered: {0}")]
    DuplicatePool(Address),

    /// The underlying token has no listed reserve.
    #[error("no reserve listed for {0}")]
    UnknownReserve(Address),

    /// The underlying token already has a reserve.
    #[error("reserve already listed for {0}")]
    DuplicateReserve(Address),

    /// The token is not a lending token of this pool.
    #[error("{0} is not a lending token of this pool")]
    NotALendingToken(Address),

    /// Collateral factor outside `1..=10_000`.
    #[error("invalid collateral factor: {0} bps")]
    InvalidCollateralFactor(u32),

    /// Zero-amount supply, borrow or flash loan.
    #[error("amount must be greater than zero")]
    ZeroAmount,

    /// The pool does not hold enough of the token.
    #[error("insufficient pool liquidity for {token}: available {available}, requested {requested}")]
    InsufficientLiquidity {
        /// Token requested.
        token: Address,
        /// Pool balance of the token.
        available: U256,
        /// Amount requested.
        requested: U256,
    },

    /// The operation would leave the account's debt above its borrowing power.
    #[error("insufficient collateral: debt ${debt_usd} exceeds borrowing power ${borrowing_power_usd} (USD18)")]
    InsufficientCollateral {
        /// Post-operation debt value.
        debt_usd: U256,
        /// Post-operation borrowing power.
        borrowing_power_usd: U256,
    },

    /// Repayment larger than the outstanding debt.
    #[error("repay of {requested} {token} exceeds outstanding debt {debt}")]
    RepayExceedsDebt {
        /// Debt token.
        token: Address,
        /// Outstanding debt.
        debt: U256,
        /// Amount the caller tried to repay.
        requested: U256,
    },

    /// The flash-loan receiver cannot return principal plus premium.
    #[error("flash loan shortfall for {token}: owed {owed}, available {available}")]
    FlashLoanShortfall {
        /// Flash-loaned token.
        token: Address,
        /// Principal plus premium.
        owed: U256,
        /// Receiver balance at settlement.
        available: U256,
    },

    /// The flash loan was issued by a different pool.
    #[error("flash loan was issued by pool {0}")]
    ForeignFlashLoan(Address),

    /// Token ledger failure.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Oracle failure while checking health.
    #[error(transparent)]
    Oracle(#[from] OracleError),

    /// Arithmetic failure.
    #[error(transparent)]
    Math(#[from] MathError),
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Which money market a pool imitates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LendingProtocol {
    /// Aave V3: aTokens, flash loans via `flashLoanSimple`.
    AaveV3,
    /// Venus: vTokens, flash loans via the comptroller.
    Venus,
}

impl fmt::Display for LendingProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LendingProtocol::AaveV3 => write!(f, "Aave V3"),
            LendingProtocol::Venus => write!(f, "Venus"),
        }
    }
}

/// A listed market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reserve {
    /// The token being lent.
    pub underlying: Address,
    /// The 1:1 receipt token minted to suppliers.
    pub lending_token: Address,
    /// Share of supplied value that counts toward borrowing power.
    pub collateral_factor_bps: u32,
}

/// What an account holds in a pool, restricted to the tokens a caller tracks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountData {
    /// `(lending_token, balance)` for tracked lending tokens with a balance.
    pub supplied: Vec<(Address, U256)>,
    /// `(underlying, debt)` for every outstanding debt of the account.
    pub borrowed: Vec<(Address, U256)>,
}

impl AccountData {
    /// Returns `true` if the account owes anything.
    pub fn has_debt(&self) -> bool {
        !self.borrowed.is_empty()
    }
}

/// USD18 snapshot of an account's position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccountHealth {
    /// Value of enabled collateral.
    pub collateral_usd: U256,
    /// Collateral value weighted by collateral factors.
    pub borrowing_power_usd: U256,
    /// Value of all debts.
    pub debt_usd: U256,
}

impl AccountHealth {
    /// Returns `true` if debt is within borrowing power.
    pub fn is_healthy(&self) -> bool {
        self.debt_usd <= self.borrowing_power_usd
    }
}

/// An outstanding flash loan. Must be passed back to
/// [`LendingPool::settle_flash_loan`].
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a flash loan must be settled"]
pub struct FlashLoan {
    /// Issuing pool.
    pub pool: Address,
    /// Account that received the funds and must repay.
    pub receiver: Address,
    /// Borrowed token.
    pub token: Address,
    /// Principal.
    pub amount: U256,
    /// Fee on top of the principal.
    pub premium: U256,
}

impl FlashLoan {
    /// Principal plus premium.
    pub fn amount_owed(&self) -> Result<U256, MathError> {
        math::add(self.amount, self.premium)
    }
}

/// Hypothetical change applied before a health check.
#[derive(Debug, Clone, Copy, Default)]
struct HealthDelta {
    redeemed: Option<(Address, U256)>,
    borrowed: Option<(Address, U256)>,
    disabled: Option<Address>,
}

/// An Aave/Venus style lending pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LendingPool {
    address: Address,
    protocol: LendingProtocol,
    flash_loan_premium_bps: u32,
    /// Keyed by underlying token.
    reserves: BTreeMap<Address, Reserve>,
    /// account -> underlying -> debt.
    debts: BTreeMap<Address, BTreeMap<Address, U256>>,
    /// account -> enabled lending tokens.
    collateral: BTreeMap<Address, BTreeSet<Address>>,
}

impl LendingPool {
    /// Creates an empty pool with the default flash-loan premium.
    pub fn new(address: Address, protocol: LendingProtocol) -> Self {
        Self {
            address,
            protocol,
            flash_loan_premium_bps: DEFAULT_FLASH_LOAN_PREMIUM_BPS,
            reserves: BTreeMap::new(),
            debts: BTreeMap::new(),
            collateral: BTreeMap::new(),
        }
    }

    /// Overrides the flash-loan premium.
    pub fn with_flash_loan_premium_bps(mut self, bps: u32) -> Self {
        self.flash_loan_premium_bps = bps;
        self
    }

    /// The pool's address; it holds the pool's liquidity.
    pub fn address(&self) -> Address {
        self.address
    }

    /// The money market this pool imitates.
    pub fn protocol(&self) -> LendingProtocol {
        self.protocol
    }

    /// Flash-loan premium in bps.
    pub fn flash_loan_premium_bps(&self) -> u32 {
        self.flash_loan_premium_bps
    }

    /// Premium charged on a flash loan of `amount`, rounded up.
    pub fn flash_loan_premium(&self, amount: U256) -> Result<U256, MathError> {
        bps_of_up(amount, self.flash_loan_premium_bps)
    }

    // -----------------------------------------------------------------------
    // Reserves
    // -----------------------------------------------------------------------

    /// Lists `underlying` and registers its lending token in the ledger with
    /// the underlying's decimals.
    pub fn list_reserve(
        &mut self,
        tokens: &mut TokenLedger,
        underlying: Address,
        lending_token: Address,
        symbol: impl Into<String>,
        collateral_factor_bps: Option<u32>,
    ) -> Result<(), LendingError> {
        let collateral_factor_bps = collateral_factor_bps.unwrap_or(DEFAULT_COLLATERAL_FACTOR_BPS);
        if collateral_factor_bps == 0 || collateral_factor_bps as u64 > BPS_DENOMINATOR {
            return Err(LendingError::InvalidCollateralFactor(collateral_factor_bps));
        }
        if self.reserves.contains_key(&underlying) {
            return Err(LendingError::DuplicateReserve(underlying));
        }
        let decimals = tokens.decimals(&underlying)?;
        tokens.register(lending_token, symbol, decimals)?;
        self.reserves.insert(
            underlying,
            Reserve {
                underlying,
                lending_token,
                collateral_factor_bps,
            },
        );
        Ok(())
    }

    /// Reserve for an underlying token.
    pub fn reserve(&self, underlying: &Address) -> Result<&Reserve, LendingError> {
        self.reserves
            .get(underlying)
            .ok_or(LendingError::UnknownReserve(*underlying))
    }

    /// Reserve whose lending token is `lending_token`.
    pub fn reserve_for_lending_token(&self, lending_token: &Address) -> Result<&Reserve, LendingError> {
        self.reserves
            .values()
            .find(|r| r.lending_token == *lending_token)
            .ok_or(LendingError::NotALendingToken(*lending_token))
    }

    /// Returns `true` if `token` is one of this pool's lending tokens.
    pub fn is_lending_token(&self, token: &Address) -> bool {
        self.reserves.values().any(|r| r.lending_token == *token)
    }

    /// Iterates listed reserves in underlying-address order.
    pub fn reserves(&self) -> impl Iterator<Item = &Reserve> {
        self.reserves.values()
    }

    // -----------------------------------------------------------------------
    // Supply side
    // -----------------------------------------------------------------------

    /// Moves `amount` of `underlying` from `from` into the pool and mints the
    /// lending token to `on_behalf_of`.
    pub fn supply(
        &mut self,
        tokens: &mut TokenLedger,
        from: Address,
        underlying: Address,
        amount: U256,
        on_behalf_of: Address,
    ) -> Result<(), LendingError> {
        if amount.is_zero() {
            return Err(LendingError::ZeroAmount);
        }
        let lending_token = self.reserve(&underlying)?.lending_token;
        tokens.transfer(&underlying, &from, &self.address, amount)?;
        tokens.mint(&lending_token, &on_behalf_of, amount)?;
        debug!(pool = %self.address, token = %underlying, %amount, "supplied");
        Ok(())
    }

    /// Burns `amount` of `account`'s lending token and pays the underlying to
    /// `to`. Fails if the account would become unhealthy.
    pub fn redeem(
        &mut self,
        tokens: &mut TokenLedger,
        oracle: &dyn PriceOracle,
        account: Address,
        lending_token: Address,
        amount: U256,
        to: Address,
    ) -> Result<(), LendingError> {
        if amount.is_zero() {
            return Err(LendingError::ZeroAmount);
        }
        let underlying = self.reserve_for_lending_token(&lending_token)?.underlying;
        self.ensure_liquidity(tokens, underlying, amount)?;
        let held = tokens.balance_of(&lending_token, &account);
        if held < amount {
            return Err(TokenError::InsufficientBalance {
                token: lending_token,
                account,
                balance: held,
                requested: amount,
            }
            .into());
        }
        self.ensure_healthy(
            tokens,
            oracle,
            account,
            HealthDelta {
                redeemed: Some((lending_token, amount)),
                ..HealthDelta::default()
            },
        )?;
        tokens.burn(&lending_token, &account, amount)?;
        tokens.transfer(&underlying, &self.address, &to, amount)?;
        debug!(pool = %self.address, token = %underlying, %amount, "redeemed");
        Ok(())
    }

    /// Enables or disables a lending token as collateral for `account`.
    ///
    /// Idempotent: returns `Ok(false)` when nothing changed. Disabling is
    /// health-checked.
    pub fn set_collateral(
        &mut self,
        tokens: &TokenLedger,
        oracle: &dyn PriceOracle,
        account: Address,
        lending_token: Address,
        enabled: bool,
    ) -> Result<bool, LendingError> {
        self.reserve_for_lending_token(&lending_token)?;
        let currently = self.is_collateral_enabled(&account, &lending_token);
        if currently == enabled {
            return Ok(false);
        }
        if !enabled {
            self.ensure_healthy(
                tokens,
                oracle,
                account,
                HealthDelta {
                    disabled: Some(lending_token),
                    ..HealthDelta::default()
                },
            )?;
            if let Some(set) = self.collateral.get_mut(&account) {
                set.remove(&lending_token);
                if set.is_empty() {
                    self.collateral.remove(&account);
                }
            }
        } else {
            self.collateral.entry(account).or_default().insert(lending_token);
        }
        Ok(true)
    }

    /// Returns `true` if `lending_token` counts as `account`'s collateral.
    pub fn is_collateral_enabled(&self, account: &Address, lending_token: &Address) -> bool {
        self.collateral
            .get(account)
            .is_some_and(|set| set.contains(lending_token))
    }

    /// Lending tokens `account` has enabled as collateral.
    pub fn enabled_collateral(&self, account: &Address) -> Vec<Address> {
        self.collateral
            .get(account)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Borrow side
    // -----------------------------------------------------------------------

    /// Opens `amount` of debt in `underlying` for `account` and pays it to `to`.
    pub fn borrow(
        &mut self,
        tokens: &mut TokenLedger,
        oracle: &dyn PriceOracle,
        account: Address,
        underlying: Address,
        amount: U256,
        to: Address,
    ) -> Result<(), LendingError> {
        if amount.is_zero() {
            return Err(LendingError::ZeroAmount);
        }
        self.reserve(&underlying)?;
        self.ensure_liquidity(tokens, underlying, amount)?;
        self.ensure_healthy(
            tokens,
            oracle,
            account,
            HealthDelta {
                borrowed: Some((underlying, amount)),
                ..HealthDelta::default()
            },
        )?;
        let debt = self.debt_of(&account, &underlying);
        let new_debt = math::add(debt, amount)?;
        tokens.transfer(&underlying, &self.address, &to, amount)?;
        self.debts.entry(account).or_default().insert(underlying, new_debt);
        debug!(pool = %self.address, token = %underlying, %amount, "borrowed");
        Ok(())
    }

    /// Repays `amount` of `on_behalf_of`'s debt in `underlying`, pulling the
    /// tokens from `payer`.
    pub fn repay(
        &mut self,
        tokens: &mut TokenLedger,
        payer: Address,
        underlying: Address,
        amount: U256,
        on_behalf_of: Address,
    ) -> Result<(), LendingError> {
        if amount.is_zero() {
            return Err(LendingError::ZeroAmount);
        }
        let debt = self.debt_of(&on_behalf_of, &underlying);
        if amount > debt {
            return Err(LendingError::RepayExceedsDebt {
                token: underlying,
                debt,
                requested: amount,
            });
        }
        tokens.transfer(&underlying, &payer, &self.address, amount)?;
        let remaining = math::sub(debt, amount)?;
        if let Some(account_debts) = self.debts.get_mut(&on_behalf_of) {
            if remaining.is_zero() {
                account_debts.remove(&underlying);
            } else {
                account_debts.insert(underlying, remaining);
            }
            if account_debts.is_empty() {
                self.debts.remove(&on_behalf_of);
            }
        }
        debug!(pool = %self.address, token = %underlying, %amount, "repaid");
        Ok(())
    }

    /// Outstanding debt of `account` in `underlying`.
    pub fn debt_of(&self, account: &Address, underlying: &Address) -> U256 {
        self.debts
            .get(account)
            .and_then(|d| d.get(underlying))
            .copied()
            .unwrap_or(U256::ZERO)
    }

    /// Every outstanding `(underlying, debt)` of `account`.
    pub fn debts_of(&self, account: &Address) -> Vec<(Address, U256)> {
        self.debts
            .get(account)
            .map(|d| d.iter().map(|(t, a)| (*t, *a)).collect())
            .unwrap_or_default()
    }

    /// Returns `true` if `account` owes anything to this pool.
    pub fn has_debt(&self, account: &Address) -> bool {
        self.debts.get(account).is_some_and(|d| !d.is_empty())
    }

    /// Grows every debt in `underlying` by `bps`, rounding up.
    pub fn accrue_interest(&mut self, underlying: Address, bps: u32) -> Result<(), LendingError> {
        self.reserve(&underlying)?;
        for account_debts in self.debts.values_mut() {
            if let Some(debt) = account_debts.get_mut(&underlying) {
                *debt = math::inflate_up(*debt, bps as u64, BPS_DENOMINATOR)?;
            }
        }
        Ok(())
    }

    /// Supplied balances for the tracked lending tokens plus every debt.
    pub fn account_data(&self, tokens: &TokenLedger, account: &Address, tracked: &[Address]) -> AccountData {
        let supplied = tracked
            .iter()
            .filter(|t| self.is_lending_token(t))
            .map(|t| (*t, tokens.balance_of(t, account)))
            .filter(|(_, amount)| !amount.is_zero())
            .collect();
        AccountData {
            supplied,
            borrowed: self.debts_of(account),
        }
    }

    /// Current USD18 position of `account`.
    pub fn health(
        &self,
        tokens: &TokenLedger,
        oracle: &dyn PriceOracle,
        account: &Address,
    ) -> Result<AccountHealth, LendingError> {
        self.health_with(tokens, oracle, account, HealthDelta::default())
    }

    // -----------------------------------------------------------------------
    // Flash loans
    // -----------------------------------------------------------------------

    /// Sends `amount` of `token` to `receiver` and returns the loan to settle.
    pub fn begin_flash_loan(
        &mut self,
        tokens: &mut TokenLedger,
        receiver: Address,
        token: Address,
        amount: U256,
    ) -> Result<FlashLoan, LendingError> {
        if amount.is_zero() {
            return Err(LendingError::ZeroAmount);
        }
        self.reserve(&token)?;
        self.ensure_liquidity(tokens, token, amount)?;
        let premium = self.flash_loan_premium(amount)?;
        tokens.transfer(&token, &self.address, &receiver, amount)?;
        debug!(pool = %self.address, %token, %amount, %premium, "flash loan issued");
        Ok(FlashLoan {
            pool: self.address,
            receiver,
            token,
            amount,
            premium,
        })
    }

    /// Pulls principal plus premium back from the receiver.
    pub fn settle_flash_loan(&mut self, tokens: &mut TokenLedger, loan: FlashLoan) -> Result<(), LendingError> {
        if loan.pool != self.address {
            return Err(LendingError::ForeignFlashLoan(loan.pool));
        }
        let owed = loan.amount_owed()?;
        let available = tokens.balance_of(&loan.token, &loan.receiver);
        if available < owed {
            return Err(LendingError::FlashLoanShortfall {
                token: loan.token,
                owed,
                available,
            });
        }
        tokens.transfer(&loan.token, &loan.receiver, &self.address, owed)?;
        debug!(pool = %self.address, token = %loan.token, %owed, "flash loan settled");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn ensure_liquidity(&self, tokens: &TokenLedger, token: Address, amount: U256) -> Result<(), LendingError> {
        let available = tokens.balance_of(&token, &self.address);
        if available < amount {
            return Err(LendingError::InsufficientLiquidity {
                token,
                available,
                requested: amount,
            });
        }
        Ok(())
    }

    fn ensure_healthy(
        &self,
        tokens: &TokenLedger,
        oracle: &dyn PriceOracle,
        account: Address,
        delta: HealthDelta,
    ) -> Result<(), LendingError> {
        let health = self.health_with(tokens, oracle, &account, delta)?;
        if !health.is_healthy() {
            return Err(LendingError::InsufficientCollateral {
                debt_usd: health.debt_usd,
                borrowing_power_usd: health.borrowing_power_usd,
            });
        }
        Ok(())
    }

    fn health_with(
        &self,
        tokens: &TokenLedger,
        oracle: &dyn PriceOracle,
        account: &Address,
        delta: HealthDelta,
    ) -> Result<AccountHealth, LendingError> {
        let mut health = AccountHealth::default();

        for lending_token in self.collateral.get(account).into_iter().flatten() {
            if delta.disabled == Some(*lending_token) {
                continue;
            }
            let mut balance = tokens.balance_of(lending_token, account);
            if let Some((redeemed, amount)) = delta.redeemed {
                if redeemed == *lending_token {
                    balance = balance.saturating_sub(amount);
                }
            }
            if balance.is_zero() {
                continue;
            }
            let reserve = self.reserve_for_lending_token(lending_token)?;
            let value = oracle.convert_to_usd18(reserve.underlying, balance)?;
            let weighted = mul_div(
                value,
                U256::from(reserve.collateral_factor_bps),
                U256::from(BPS_DENOMINATOR),
            )?;
            health.collateral_usd = math::add(health.collateral_usd, value)?;
            health.borrowing_power_usd = math::add(health.borrowing_power_usd, weighted)?;
        }

        let mut debts = self.debts_of(account);
        if let Some((token, amount)) = delta.borrowed {
            match debts.iter_mut().find(|(t, _)| *t == token) {
                Some((_, debt)) => *debt = math::add(*debt, amount)?,
                None => debts.push((token, amount)),
            }
        }
        for (token, debt) in debts {
            if debt.is_zero() {
                continue;
            }
            let value = oracle.convert_to_usd18(token, debt)?;
            health.debt_usd = math::add(health.debt_usd, value)?;
        }

        Ok(health)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
