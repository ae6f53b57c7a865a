//! Structured event log. Every committed state change appends one or more
//! events; indexers drain them as JSON.

use crate::commitment::Commitment;
use crate::dispute::BondKind;
use crate::market::{MarketState, TradeSide};
use crate::oracle::ArbitrationTicket;
use crate::types::{BondId, HolderId, MarketId, Outcome, Payout, ReportId, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    MarketCreated {
        creator: HolderId,
        liquidity: Decimal,
        funding: Decimal,
        trading_deadline: Timestamp,
    },
    StateChanged {
        from: MarketState,
        to: MarketState,
    },
    Split {
        holder: HolderId,
        amount: Decimal,
    },
    Merged {
        holder: HolderId,
        amount: Decimal,
    },
    Redeemed {
        holder: HolderId,
        pass: Decimal,
        fail: Decimal,
        value: Decimal,
    },
    Traded {
        holder: HolderId,
        side: TradeSide,
        outcome: Outcome,
        amount: Decimal,
        collateral: Decimal,
        fee: Decimal,
    },
    BondPosted {
        bond: BondId,
        kind: BondKind,
        poster: HolderId,
        amount: Decimal,
    },
    BondReturned {
        bond: BondId,
        to: HolderId,
        amount: Decimal,
    },
    BondSlashed {
        bond: BondId,
        to: HolderId,
        amount: Decimal,
        protocol_fee: Decimal,
    },
    ReportSubmitted {
        report: ReportId,
        reporter: HolderId,
        payout: Payout,
        evidence_ref: String,
    },
    Challenged {
        report: ReportId,
        challenger: HolderId,
        counter_evidence_ref: String,
    },
    Escalated {
        report: ReportId,
        ticket: ArbitrationTicket,
    },
    VerdictApplied {
        report: ReportId,
        upheld: bool,
        payout: Payout,
    },
    Resolved {
        payout: Payout,
    },
    CommitmentQueued {
        commitment: Commitment,
        epoch: u64,
        key_generation: u64,
    },
    CommitmentApplied {
        commitment: Commitment,
        epoch: u64,
    },
    CommitmentDropped {
        commitment: Commitment,
        epoch: u64,
        reason: String,
    },
    EpochAdvanced {
        epoch: u64,
    },
    KeyRegistered {
        holder: HolderId,
    },
    KeyRotated {
        holder: HolderId,
        generation: u64,
    },
}

/// One entry of the event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineEvent {
    /// Position in the log, starting at zero
    pub seq: u64,
    pub market: Option<MarketId>,
    pub at: Timestamp,
    pub actor: HolderId,
    pub kind: EventKind,
}

impl EngineEvent {
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Append-only log with a monotonic sequence number
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    next_seq: u64,
    events: Vec<EngineEvent>,
}

impl EventLog {
    pub fn push(&mut self, market: Option<MarketId>, at: Timestamp, actor: &HolderId, kind: EventKind) {
        self.events.push(EngineEvent {
            seq: self.next_seq,
            market,
            at,
            actor: actor.clone(),
            kind,
        });
        self.next_seq += 1;
    }

    /// Sequence number the next event will get
    pub fn mark(&self) -> u64 {
        self.next_seq
    }

    /// Drop every event appended since `mark`
    pub fn rollback(&mut self, mark: u64) {
        let discarded = self.next_seq.saturating_sub(mark);
        let kept = self
            .events
            .len()
            .saturating_sub(usize::try_from(discarded).unwrap_or(usize::MAX));
        self.events.truncate(kept);
        self.next_seq = self.next_seq.min(mark);
    }

    /// Events not yet drained
    pub fn pending(&self) -> &[EngineEvent] {
        &self.events
    }

    /// Remove and return pending events; sequence numbers keep counting
    pub fn drain(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }
}
