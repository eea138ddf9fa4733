//! # Token Exclusion Ledger
//!
//! When a token leaves the basket while shares are outstanding, whatever the
//! vault still holds of it moves to an escrow account and a snapshot records
//! the share supply at that moment. Every holder at that moment owns
//! `proceeds * holder_shares / supply` of it; anyone who acquires shares
//! later owns nothing.
//!
//! ## Lazy checkpoints
//!
//! Writing a checkpoint for every holder at removal time would iterate the
//! whole holder set. Instead each holder carries a sync cursor into the
//! snapshot arena. Right before a holder's share balance changes, the vault
//! calls [`TokenExclusionLedger::sync_holder`] with the balance the holder
//! had *since the last sync*, and checkpoints are materialized for every
//! snapshot taken in between. Because balances only change through synced
//! paths, that balance is exactly the holder's balance at each removal.
//!
//! Checkpoints are keyed by `(holder, snapshot)` and are claimed exactly once.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use folio_protocol::math::{self, mul_div, MathError};
use folio_protocol::{Address, U256};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Index into the snapshot arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SnapshotId(pub u64);

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One removal event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionSnapshot {
    /// Arena index.
    pub id: SnapshotId,
    /// Removed token.
    pub token: Address,
    /// Amount moved to escrow.
    pub proceeds: U256,
    /// Share supply at removal.
    pub total_supply: U256,
    /// Amount already paid to holders.
    pub paid_out: U256,
    /// Ledger time of removal.
    pub removed_at: DateTime<Utc>,
}

/// A holder's claim on one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Snapshot this claim is on.
    pub snapshot: SnapshotId,
    /// Removed token.
    pub token: Address,
    /// Holder's shares at removal.
    pub holder_shares: U256,
    /// Share supply at removal.
    pub total_supply: U256,
    /// Set once paid.
    pub claimed: bool,
}

/// A payout owed (or made) from escrow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionClaim {
    /// Snapshot being claimed.
    pub snapshot: SnapshotId,
    /// Token paid.
    pub token: Address,
    /// Amount paid.
    pub amount: U256,
}

/// Per-vault exclusion bookkeeping.
#[derive(Debug, Clone)]
pub struct TokenExclusionLedger {
    escrow: Address,
    snapshots: Vec<ExclusionSnapshot>,
    checkpoints: BTreeMap<(Address, SnapshotId), Checkpoint>,
    synced: BTreeMap<Address, usize>,
}

impl TokenExclusionLedger {
    /// Creates an empty ledger whose proceeds live at `escrow`.
    pub fn new(escrow: Address) -> Self {
        Self {
            escrow,
            snapshots: Vec::new(),
            checkpoints: BTreeMap::new(),
            synced: BTreeMap::new(),
        }
    }

    /// Account holding removed-token proceeds.
    pub fn escrow(&self) -> Address {
        self.escrow
    }

    /// All snapshots, oldest first.
    pub fn snapshots(&self) -> &[ExclusionSnapshot] {
        &self.snapshots
    }

    /// Looks up a snapshot.
    pub fn snapshot(&self, id: SnapshotId) -> Option<&ExclusionSnapshot> {
        usize::try_from(id.0).ok().and_then(|i| self.snapshots.get(i))
    }

    /// A materialized checkpoint, if any.
    pub fn checkpoint(&self, holder: &Address, id: SnapshotId) -> Option<&Checkpoint> {
        self.checkpoints.get(&(*holder, id))
    }

    /// Records a removal. The caller has already moved `proceeds` to escrow.
    pub fn record_removal(
        &mut self,
        token: Address,
        proceeds: U256,
        total_supply: U256,
        removed_at: DateTime<Utc>,
    ) -> SnapshotId {
        let id = SnapshotId(self.snapshots.len() as u64);
        self.snapshots.push(ExclusionSnapshot {
            id,
            token,
            proceeds,
            total_supply,
            paid_out: U256::ZERO,
            removed_at,
        });
        id
    }

    /// Materializes checkpoints for every snapshot since `holder`'s last
    /// sync. Call with the balance the holder had before the pending change.
    pub fn sync_holder(&mut self, holder: Address, balance: U256) {
        let from = self.synced.get(&holder).copied().unwrap_or(0);
        if !balance.is_zero() {
            for snapshot in &self.snapshots[from..] {
                self.checkpoints.insert(
                    (holder, snapshot.id),
                    Checkpoint {
                        snapshot: snapshot.id,
                        token: snapshot.token,
                        holder_shares: balance,
                        total_supply: snapshot.total_supply,
                        claimed: false,
                    },
                );
            }
        }
        self.synced.insert(holder, self.snapshots.len());
    }

    /// What `holder` could claim now, given their current balance.
    pub fn pending(&self, holder: &Address, balance: U256) -> Result<Vec<ExclusionClaim>, MathError> {
        let mut claims = Vec::new();
        for checkpoint in self.unclaimed(holder) {
            let amount = self.payout(checkpoint.snapshot, checkpoint.holder_shares)?;
            if !amount.is_zero() {
                claims.push(ExclusionClaim {
                    snapshot: checkpoint.snapshot,
                    token: checkpoint.token,
                    amount,
                });
            }
        }
        if !balance.is_zero() {
            let from = self.synced.get(holder).copied().unwrap_or(0);
            for snapshot in &self.snapshots[from..] {
                let amount = self.payout(snapshot.id, balance)?;
                if !amount.is_zero() {
                    claims.push(ExclusionClaim {
                        snapshot: snapshot.id,
                        token: snapshot.token,
                        amount,
                    });
                }
            }
        }
        Ok(claims)
    }

    /// Syncs `holder`, marks every unclaimed checkpoint claimed and returns
    /// the non-zero payouts. The caller transfers them from escrow.
    pub fn claim(&mut self, holder: Address, balance: U256) -> Result<Vec<ExclusionClaim>, MathError> {
        self.sync_holder(holder, balance);
        let due: Vec<(SnapshotId, U256)> = self
            .unclaimed(&holder)
            .map(|c| (c.snapshot, c.holder_shares))
            .collect();

        let mut claims = Vec::new();
        for (id, shares) in due {
            let amount = self.payout(id, shares)?;
            if let Some(checkpoint) = self.checkpoints.get_mut(&(holder, id)) {
                checkpoint.claimed = true;
            }
            if amount.is_zero() {
                continue;
            }
            if let Some(snapshot) = usize::try_from(id.0).ok().and_then(|i| self.snapshots.get_mut(i)) {
                snapshot.paid_out = math::add(snapshot.paid_out, amount)?;
                claims.push(ExclusionClaim {
                    snapshot: id,
                    token: snapshot.token,
                    amount,
                });
            }
        }
        Ok(claims)
    }

    fn unclaimed<'a>(&'a self, holder: &'a Address) -> impl Iterator<Item = &'a Checkpoint> + 'a {
        self.checkpoints
            .range((*holder, SnapshotId(0))..=(*holder, SnapshotId(u64::MAX)))
            .map(|(_, c)| c)
            .filter(|c| !c.claimed)
    }

    fn payout(&self, id: SnapshotId, shares: U256) -> Result<U256, MathError> {
        match self.snapshot(id) {
            Some(s) if !s.total_supply.is_zero() => mul_div(s.proceeds, shares, s.total_supply),
            _ => Ok(U256::ZERO),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use folio_protocol::address::label;

    fn u(v: u64) -> U256 {
        U256::from(v)
    }

    #[test]
    fn holder_present_at_removal_gets_pro_rata_share() {
        let mut ledger = TokenExclusionLedger::new(label("escrow"));
        let (h, g) = (label("h"), label("g"));
        ledger.sync_holder(h, U256::ZERO);
        ledger.sync_holder(g, U256::ZERO);
        // h and g each hold 50 of 100 shares when X is removed.
        ledger.record_removal(label("X"), u(1_000), u(100), Utc::now());

        let claims = ledger.claim(h, u(50)).unwrap();
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].amount, u(500));
        // Exactly once.
        assert!(ledger.claim(h, u(50)).unwrap().is_empty());
    }

    #[test]
    fn later_holder_has_no_claim() {
        let mut ledger = TokenExclusionLedger::new(label("escrow"));
        ledger.record_removal(label("X"), u(1_000), u(100), Utc::now());
        let newcomer = label("n");
        // Newcomer syncs with zero balance before receiving shares.
        ledger.sync_holder(newcomer, U256::ZERO);
        assert!(ledger.pending(&newcomer, u(100)).unwrap().is_empty());
        assert!(ledger.claim(newcomer, u(100)).unwrap().is_empty());
    }

    #[test]
    fn balance_change_after_removal_keeps_removal_balance() {
        let mut ledger = TokenExclusionLedger::new(label("escrow"));
        let h = label("h");
        ledger.sync_holder(h, U256::ZERO);
        ledger.record_removal(label("X"), u(900), u(90), Utc::now());
        // h held 30 at removal; now deposits more. Sync with pre-change balance.
        ledger.sync_holder(h, u(30));
        let checkpoint = ledger.checkpoint(&h, SnapshotId(0)).unwrap();
        assert_eq!(checkpoint.holder_shares, u(30));
        // Claim later with a larger balance still pays on 30 shares.
        let claims = ledger.claim(h, u(80)).unwrap();
        assert_eq!(claims[0].amount, u(300));
    }

    #[test]
    fn pending_includes_unsynced_snapshots() {
        let mut ledger = TokenExclusionLedger::new(label("escrow"));
        let h = label("h");
        ledger.sync_holder(h, U256::ZERO);
        ledger.record_removal(label("X"), u(10), u(3), Utc::now());
        ledger.record_removal(label("Y"), u(7), u(3), Utc::now());
        let pending = ledger.pending(&h, u(1)).unwrap();
        assert_eq!(
            pending.iter().map(|c| c.amount).collect::<Vec<_>>(),
            vec![u(3), u(2)]
        );
    }

    #[test]
    fn payouts_never_exceed_proceeds() {
        let mut ledger = TokenExclusionLedger::new(label("escrow"));
        let holders: Vec<Address> = (0..3).map(|i| label(&format!("h{i}"))).collect();
        for h in &holders {
            ledger.sync_holder(*h, U256::ZERO);
        }
        ledger.record_removal(label("X"), u(100), u(3), Utc::now());
        for h in &holders {
            ledger.claim(*h, u(1)).unwrap();
        }
        let snapshot = ledger.snapshot(SnapshotId(0)).unwrap();
        assert_eq!(snapshot.paid_out, u(99));
        assert!(snapshot.paid_out <= snapshot.proceeds);
    }
}
