//! # Vault Errors
//!
//! One error type for the whole engine. Every variant belongs to exactly one
//! [`ErrorKind`], which is what batching front-ends branch on: validation
//! and policy failures mean "fix the request", slippage means "re-quote",
//! solvency means "the position cannot support this".
//!
//! Whatever the kind, a failed operation leaves the ledger and the vault
//! exactly as they were before the call.

use std::fmt;

use chrono::{DateTime, Utc};
use folio_protocol::lending::LendingError;
use folio_protocol::liquidity::LiquidityError;
use folio_protocol::math::MathError;
use folio_protocol::oracle::OracleError;
use folio_protocol::solver::SolverError;
use folio_protocol::token::TokenError;
use folio_protocol::{Address, U256};
use thiserror::Error;

/// Coarse classification of a [`VaultError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed request, unsupported asset, length mismatch.
    Validation,
    /// Output or payout below the caller's minimum.
    Slippage,
    /// Flash-loan shortfall, insufficient collateral, over-repayment.
    Solvency,
    /// Cooldown, whitelist or role violation.
    Policy,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::Slippage => write!(f, "slippage"),
            ErrorKind::Solvency => write!(f, "solvency"),
            ErrorKind::Policy => write!(f, "policy"),
        }
    }
}

/// Privileged roles a caller can be checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Manages whitelists, cooldown and fee schedule.
    Admin,
    /// Rebalances, borrows and repays.
    AssetManager,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::AssetManager => write!(f, "asset manager"),
        }
    }
}

/// Errors returned by vault operations.
#[derive(Debug, Error)]
pub enum VaultError {
    // -- Validation ---------------------------------------------------------
    /// No adapter is registered for the token.
    #[error("unsupported asset: {0}")]
    UnsupportedAsset(Address),

    /// Parallel lists in a request disagree in length.
    #[error("length mismatch in {field}: expected {expected}, got {actual}")]
    LengthMismatch {
        /// Which list.
        field: &'static str,
        /// Required length.
        expected: usize,
        /// Supplied length.
        actual: usize,
    },

    /// A token appears twice where uniqueness is required.
    #[error("duplicate token: {0}")]
    DuplicateToken(Address),

    /// The basket would exceed the size cap.
    #[error("basket of {size} tokens exceeds the maximum of {max}")]
    BasketTooLarge {
        /// Requested size.
        size: usize,
        /// Cap.
        max: usize,
    },

    /// The token is not a member of the basket.
    #[error("token {0} is not in the basket")]
    NotInBasket(Address),

    /// A sell amount exceeds what the vault holds.
    #[error("vault holds {held} of {token}, cannot sell {requested}")]
    InsufficientHolding {
        /// Token being sold.
        token: Address,
        /// Resolved holding.
        held: U256,
        /// Requested sell amount.
        requested: U256,
    },

    /// A required amount is zero.
    #[error("amount must be greater than zero")]
    ZeroAmount,

    /// Deposited tokens are worth nothing.
    #[error("deposit has zero USD value")]
    ZeroDepositValue,

    /// The holder does not have that many shares.
    #[error("holder {holder} has {balance} shares, requested {requested}")]
    InsufficientShares {
        /// Share holder.
        holder: Address,
        /// Current balance.
        balance: U256,
        /// Requested amount.
        requested: U256,
    },

    /// A holding would end up between zero and the configured minimum.
    #[error("remaining balance {balance} of {holder} is below the minimum holding {minimum}")]
    BelowMinimumHolding {
        /// Share holder.
        holder: Address,
        /// Balance after the operation.
        balance: U256,
        /// Configured minimum.
        minimum: U256,
    },

    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A buffer unit exceeds its cap.
    #[error("{which} buffer unit {value} exceeds the maximum of {max}")]
    BufferTooLarge {
        /// `"collateral"` or `"flash loan"`.
        which: &'static str,
        /// Requested buffer.
        value: u64,
        /// Cap.
        max: u64,
    },

    /// A swap buys a token that will not be in the new basket.
    #[error("swap output {0} is not part of the new basket")]
    BuyTokenNotInBasket(Address),

    /// A rebalance both sells and buys the same token.
    #[error("token {0} is both sold and bought")]
    SellAndBuySameToken(Address),

    /// The token backs an outstanding debt and cannot leave the basket.
    #[error("token {0} backs outstanding debt")]
    TokenBacksDebt(Address),

    /// Swap data is missing for a leg that needs it.
    #[error("missing swap data for {0}")]
    MissingSwapData(Address),

    /// Swap data was supplied for a leg that must not swap.
    #[error("unexpected swap data for {0}")]
    UnexpectedSwapData(Address),

    /// The vault has debt, so a withdrawal must carry unwind parameters.
    #[error("vault carries debt: withdrawal requires unwind parameters")]
    UnwindRequired,

    /// The position is not usable for this operation.
    #[error("invalid position {token}: {reason}")]
    InvalidPosition {
        /// Basket token.
        token: Address,
        /// Why it was rejected.
        reason: String,
    },

    /// The flash loan in a repay intent cannot cover the repayment.
    #[error("flash loan of ${flash_usd} cannot cover repayment of ${required_usd} (USD18)")]
    FlashLoanUndersized {
        /// Flash-loan value (or amount, when denominated in the same token).
        flash_usd: U256,
        /// Required value including the premium.
        required_usd: U256,
    },

    /// The vault holds no debt in this token.
    #[error("no outstanding debt in {token} at pool {pool}")]
    NoDebt {
        /// Lending pool.
        pool: Address,
        /// Debt token.
        token: Address,
    },

    /// No fee schedule has been proposed.
    #[error("no pending fee schedule")]
    NoPendingFeeSchedule,

    // -- Slippage -----------------------------------------------------------
    /// A swap leg produced less than its minimum.
    #[error("insufficient output of {token}: expected at least {expected}, received {received}")]
    InsufficientOutput {
        /// Buy token.
        token: Address,
        /// Caller's minimum.
        expected: U256,
        /// Actual balance increase.
        received: U256,
    },

    /// Minted shares below the caller's minimum.
    #[error("minted {minted} shares, minimum was {minimum}")]
    MintBelowMinimum {
        /// Shares the depositor would receive.
        minted: U256,
        /// Caller's minimum.
        minimum: U256,
    },

    /// A withdrawal payout below the caller's minimum.
    #[error("payout of {amount} {token} is below the minimum {minimum}")]
    PayoutBelowMinimum {
        /// Payout token.
        token: Address,
        /// Actual payout.
        amount: U256,
        /// Caller's minimum.
        minimum: U256,
    },

    // -- Solvency -----------------------------------------------------------
    /// After both swap legs the vault cannot return the flash loan.
    #[error("flash loan repayment shortfall in {token}: required {required}, available {available}")]
    FlashLoanRepaymentShortfall {
        /// Flash-loaned token.
        token: Address,
        /// Principal plus premium.
        required: U256,
        /// What the vault gained from the sequence.
        available: U256,
    },

    /// The lending adapter refused to borrow.
    #[error("collateral insufficient: {0}")]
    CollateralInsufficient(#[source] LendingError),

    /// Repay amount above the outstanding debt.
    #[error("repay of {requested} {token} exceeds outstanding debt {debt}")]
    RepayExceedsDebt {
        /// Debt token.
        token: Address,
        /// Outstanding debt.
        debt: U256,
        /// Requested repayment.
        requested: U256,
    },

    /// Liabilities are worth more than assets.
    #[error("liabilities (${liabilities_usd}) exceed assets (${assets_usd}) (USD18)")]
    LiabilitiesExceedAssets {
        /// Gross asset value.
        assets_usd: U256,
        /// Debt value.
        liabilities_usd: U256,
    },

    /// Shares are outstanding but the basket is worth nothing.
    #[error("vault has outstanding shares but zero value")]
    ZeroVaultValue,

    /// An unwind needs more collateral than the withdrawing share owns.
    #[error("unwind needs {required} of {token}, withdrawing share owns {available}")]
    UnwindExceedsCollateralShare {
        /// Collateral lending token.
        token: Address,
        /// Collateral redeemed for the unwind.
        required: U256,
        /// Holder's pro-rata collateral.
        available: U256,
    },

    // -- Policy -------------------------------------------------------------
    /// The caller lacks the role.
    #[error("{caller} is not the {role}")]
    Unauthorized {
        /// Caller.
        caller: Address,
        /// Required role.
        role: Role,
    },

    /// The holder deposited too recently.
    #[error("cooldown active for {holder} until {until}")]
    CooldownActive {
        /// Share holder.
        holder: Address,
        /// End of the cooldown.
        until: DateTime<Utc>,
    },

    /// Depositor whitelist is enabled and the depositor is not on it.
    #[error("depositor {0} is not whitelisted")]
    DepositorNotWhitelisted(Address),

    /// Token whitelist is enabled and the token is not on it.
    #[error("token {0} is not whitelisted")]
    TokenNotWhitelisted(Address),

    /// The fee schedule time lock has not expired.
    #[error("fee schedule change is time-locked until {eta}")]
    FeeUpdateTimelocked {
        /// When the change becomes applicable.
        eta: DateTime<Utc>,
    },

    // -- Collaborators ------------------------------------------------------
    /// Token ledger failure.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Oracle failure.
    #[error(transparent)]
    Oracle(#[from] OracleError),

    /// Lending pool failure.
    #[error(transparent)]
    Lending(#[from] LendingError),

    /// Liquidity pool failure.
    #[error(transparent)]
    Liquidity(#[from] LiquidityError),

    /// Solver handler failure.
    #[error(transparent)]
    Solver(#[from] SolverError),

    /// Arithmetic failure.
    #[error(transparent)]
    Math(#[from] MathError),
}

impl VaultError {
    /// Returns the error's taxonomy class.
    pub fn kind(&self) -> ErrorKind {
        use VaultError::*;
        match self {
            UnsupportedAsset(_)
            | LengthMismatch { .. }
            | DuplicateToken(_)
            | BasketTooLarge { .. }
            | NotInBasket(_)
            | InsufficientHolding { .. }
            | ZeroAmount
            | ZeroDepositValue
            | InsufficientShares { .. }
            | BelowMinimumHolding { .. }
            | InvalidConfig(_)
            | BufferTooLarge { .. }
            | BuyTokenNotInBasket(_)
            | SellAndBuySameToken(_)
            | TokenBacksDebt(_)
            | MissingSwapData(_)
            | UnexpectedSwapData(_)
            | UnwindRequired
            | InvalidPosition { .. }
            | FlashLoanUndersized { .. }
            | NoDebt { .. }
            | NoPendingFeeSchedule => ErrorKind::Validation,

            InsufficientOutput { .. } | MintBelowMinimum { .. } | PayoutBelowMinimum { .. } => {
                ErrorKind::Slippage
            }

            FlashLoanRepaymentShortfall { .. }
            | CollateralInsufficient(_)
            | RepayExceedsDebt { .. }
            | LiabilitiesExceedAssets { .. }
            | ZeroVaultValue
            | UnwindExceedsCollateralShare { .. } => ErrorKind::Solvency,

            Unauthorized { .. }
            | CooldownActive { .. }
            | DepositorNotWhitelisted(_)
            | TokenNotWhitelisted(_)
            | FeeUpdateTimelocked { .. } => ErrorKind::Policy,

            Token(TokenError::InsufficientBalance { .. }) => ErrorKind::Solvency,
            Token(_) => ErrorKind::Validation,

            Lending(
                LendingError::InsufficientCollateral { .. }
                | LendingError::InsufficientLiquidity { .. }
                | LendingError::RepayExceedsDebt { .. }
                | LendingError::FlashLoanShortfall { .. }
                | LendingError::Token(TokenError::InsufficientBalance { .. }),
            ) => ErrorKind::Solvency,
            Lending(_) => ErrorKind::Validation,

            Solver(SolverError::UnknownHandler(_) | SolverError::MalformedCallData(_)) => {
                ErrorKind::Validation
            }
            Solver(_) => ErrorKind::Slippage,

            Oracle(_) | Liquidity(_) | Math(_) => ErrorKind::Validation,
        }
    }
}
