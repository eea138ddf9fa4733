//! Vault event log.
//!
//! Every committed operation appends one or more records. Reverted
//! operations leave nothing behind because the log is part of the vault
//! state that gets rolled back.

use chrono::{DateTime, Utc};
use folio_protocol::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::exclusion::SnapshotId;
use crate::fees::{FeeSchedule, FeeSplit};

/// Something that happened to a vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VaultEvent {
    /// Shares minted against a deposit.
    Deposited {
        /// Depositor.
        depositor: Address,
        /// USD18 value of the deposit.
        value_usd: U256,
        /// Net shares received by the depositor.
        shares_minted: U256,
        /// Entry fee shares.
        entry_fee: FeeSplit,
    },
    /// Shares burned against a payout.
    Withdrawn {
        /// Share holder.
        holder: Address,
        /// Payout receiver.
        receiver: Address,
        /// Shares burned.
        shares_burned: U256,
        /// Exit fee shares.
        exit_fee: FeeSplit,
        /// Tokens paid out, including unwind surplus.
        payouts: Vec<(Address, U256)>,
    },
    /// Management and/or performance fee shares minted.
    FeesCharged {
        /// Management fee shares.
        management: FeeSplit,
        /// Performance fee shares.
        performance: FeeSplit,
        /// High-water mark after the charge.
        high_water_mark: U256,
    },
    /// Shares moved between holders.
    SharesTransferred {
        /// Sender.
        from: Address,
        /// Receiver.
        to: Address,
        /// Amount.
        amount: U256,
    },
    /// Basket composition changed.
    TokensUpdated {
        /// Basket before.
        previous: Vec<Address>,
        /// Basket after.
        current: Vec<Address>,
    },
    /// A token left the basket.
    TokenRemoved {
        /// Removed token.
        token: Address,
        /// Balance at removal.
        proceeds: U256,
        /// Exclusion snapshot, if holders gained a claim.
        snapshot: Option<SnapshotId>,
    },
    /// Debt opened.
    Borrowed {
        /// Lending pool.
        pool: Address,
        /// Borrowed token.
        token: Address,
        /// Amount.
        amount: U256,
    },
    /// Debt repaid.
    DebtRepaid {
        /// Lending pool.
        pool: Address,
        /// Debt token.
        token: Address,
        /// Amount.
        amount: U256,
    },
    /// Collateral flag flipped.
    CollateralToggled {
        /// Lending pool.
        pool: Address,
        /// Lending token.
        token: Address,
        /// New state.
        enabled: bool,
    },
    /// Exclusion proceeds paid from escrow.
    ExclusionClaimed {
        /// Share holder.
        holder: Address,
        /// Payout receiver.
        receiver: Address,
        /// Token paid.
        token: Address,
        /// Amount paid.
        amount: U256,
        /// Snapshot claimed.
        snapshot: SnapshotId,
    },
    /// A new fee schedule entered the time lock.
    FeeScheduleProposed {
        /// Proposed rates.
        schedule: FeeSchedule,
        /// Earliest application time.
        eta: DateTime<Utc>,
    },
    /// The pending fee schedule took effect.
    FeeScheduleApplied {
        /// New rates.
        schedule: FeeSchedule,
    },
    /// Cooldown changed.
    CooldownUpdated {
        /// New cooldown.
        cooldown_period_secs: u64,
    },
    /// Depositor or token whitelist changed.
    WhitelistUpdated {
        /// `"depositor"` or `"token"`.
        list: String,
        /// Added addresses.
        added: Vec<Address>,
        /// Removed addresses.
        removed: Vec<Address>,
    },
}

/// A logged event with its position and time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Zero-based position in the log.
    pub sequence: u64,
    /// Ledger time.
    pub at: DateTime<Utc>,
    /// The event.
    pub event: VaultEvent,
}
