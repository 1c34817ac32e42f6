use crate::amount::Amount;
use crate::hash::NameHash;
use crate::outpoint::Outpoint;
use crate::params::NetworkParams;
use serde::{Deserialize, Serialize};

/// Derived state of a name at a given chain height (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuctionState {
    Bidding,
    Reveal,
    Closed,
    Revoked,
    /// CLAIM-minted name, not yet past `lockupPeriod`.
    Locked,
}

/// A name currently or historically in auction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameState {
    pub name_hash: NameHash,
    pub name: Vec<u8>,

    /// Auction-open height. Set once by OPEN; spec.md P3 forbids any later
    /// mutation short of a full expiry + re-OPEN cycle.
    pub height: u32,
    pub renewal: u32,
    pub transfer: Option<u32>,
    pub revoked: Option<u32>,
    pub claimed: bool,

    pub owner: Option<Outpoint>,
    pub value: Amount,
    /// Second-highest bid — the amount the owner keeps locked.
    pub highest: Amount,
    pub data: Option<Vec<u8>>,

    pub weak: bool,
    pub dirty: bool,

    /// Count of BID outputs seen so far this auction (for tie-break bookkeeping).
    pub bids: u32,
}

impl NameState {
    pub fn new_open(name_hash: NameHash, name: Vec<u8>, height: u32) -> Self {
        NameState {
            name_hash,
            name,
            height,
            renewal: height,
            transfer: None,
            revoked: None,
            claimed: false,
            owner: None,
            value: Amount::ZERO,
            highest: Amount::ZERO,
            data: None,
            weak: false,
            dirty: false,
            bids: 0,
        }
    }

    /// `state(ns, height)` per spec.md §4.A.
    pub fn state(&self, height: u32, params: &NetworkParams) -> AuctionState {
        if let Some(revoked) = self.revoked {
            let _ = revoked;
            return AuctionState::Revoked;
        }
        if self.claimed && height < self.height + params.lockup_period {
            return AuctionState::Locked;
        }
        if height < self.height + params.bidding_period {
            return AuctionState::Bidding;
        }
        if height < self.height + params.bidding_period + params.reveal_period {
            return AuctionState::Reveal;
        }
        AuctionState::Closed
    }

    /// True once `renewalWindow` has elapsed since the last renewal with no
    /// further renewal — the name becomes eligible for a fresh OPEN cycle.
    pub fn is_expired(&self, height: u32, params: &NetworkParams) -> bool {
        if let Some(revoked) = self.revoked {
            return height >= revoked + params.auction_maturity;
        }
        height >= self.renewal + params.renewal_window
    }
}

/// Reversible record of a `NameState` mutation: previous values of every
/// touched field. Reverting applies the delta backwards (spec.md §3 invariant 4).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NameDelta {
    pub height: Option<u32>,
    pub renewal: Option<u32>,
    pub transfer: Option<Option<u32>>,
    pub revoked: Option<Option<u32>>,
    pub claimed: Option<bool>,
    pub owner: Option<Option<Outpoint>>,
    pub value: Option<Amount>,
    pub highest: Option<Amount>,
    pub data: Option<Option<Vec<u8>>>,
    pub weak: Option<bool>,
    pub dirty: Option<bool>,
    pub bids: Option<u32>,
    /// Set when this delta represents the name's very first creation —
    /// undoing it removes the `NameState` entirely rather than resetting fields.
    pub created: bool,
}

impl NameDelta {
    pub fn created() -> Self {
        NameDelta {
            created: true,
            ..Default::default()
        }
    }

    /// Captures `before` into a delta only for the fields that differ from
    /// `after`, so undo restores exactly what was touched.
    pub fn capture(before: &NameState, after: &NameState) -> NameDelta {
        let mut delta = NameDelta::default();
        if before.height != after.height {
            delta.height = Some(before.height);
        }
        if before.renewal != after.renewal {
            delta.renewal = Some(before.renewal);
        }
        if before.transfer != after.transfer {
            delta.transfer = Some(before.transfer);
        }
        if before.revoked != after.revoked {
            delta.revoked = Some(before.revoked);
        }
        if before.claimed != after.claimed {
            delta.claimed = Some(before.claimed);
        }
        if before.owner != after.owner {
            delta.owner = Some(before.owner);
        }
        if before.value != after.value {
            delta.value = Some(before.value);
        }
        if before.highest != after.highest {
            delta.highest = Some(before.highest);
        }
        if before.data != after.data {
            delta.data = Some(before.data.clone());
        }
        if before.weak != after.weak {
            delta.weak = Some(before.weak);
        }
        if before.dirty != after.dirty {
            delta.dirty = Some(before.dirty);
        }
        if before.bids != after.bids {
            delta.bids = Some(before.bids);
        }
        delta
    }

    /// Applies this delta backward onto `state`, restoring prior field values.
    pub fn undo(&self, state: &mut NameState) {
        if let Some(v) = self.height {
            state.height = v;
        }
        if let Some(v) = self.renewal {
            state.renewal = v;
        }
        if let Some(v) = self.transfer {
            state.transfer = v;
        }
        if let Some(v) = self.revoked {
            state.revoked = v;
        }
        if let Some(v) = self.claimed {
            state.claimed = v;
        }
        if let Some(v) = self.owner {
            state.owner = v;
        }
        if let Some(v) = self.value {
            state.value = v;
        }
        if let Some(v) = self.highest {
            state.highest = v;
        }
        if let Some(v) = self.data.clone() {
            state.data = v;
        }
        if let Some(v) = self.weak {
            state.weak = v;
        }
        if let Some(v) = self.dirty {
            state.dirty = v;
        }
        if let Some(v) = self.bids {
            state.bids = v;
        }
    }
}
