//! # Market Lifecycle
//!
//! The market record shared by every component and the state machine that
//! gates them.
//!
//! ```text
//! Created ──> Trading ──> AwaitingReport ──> Challenge ──> Escalated
//!    │           │                               │             │
//!    └─────┬─────┘                               └──> Finalized <┘
//!          v                                            │
//!      Cancelled ──> Refunded               Executed <──┴──> Rejected
//! ```
//!
//! No transition is reversible. Clock-driven transitions (deadline expiry and
//! challenge-window elapse) are computed by [`Market::due_transition`] and
//! applied by the engine before any operation runs.

use crate::config::MarketParams;
use crate::types::{BetKind, BondId, HolderId, MarketId, Outcome, Payout, ReportId, Timestamp};
use crate::utils::{checked_add, format_timestamp};
use crate::{error::Result, EngineError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketState {
    /// Waiting for the participation threshold
    Created,
    /// Open for splits and LMSR trades
    Trading,
    /// Trading deadline passed; waiting for an oracle report
    AwaitingReport,
    /// Report submitted; challenge window open
    Challenge,
    /// Report challenged; waiting for the arbitration verdict
    Escalated,
    /// Payout vector fixed; waiting for execution
    Finalized,
    /// Resolved with the pass side ahead
    Executed,
    /// Resolved with the fail side ahead or level
    Rejected,
    /// Participation threshold not met by the deadline
    Cancelled,
    /// Cancelled market settled at an even payout
    Refunded,
}

impl MarketState {
    /// Whether the state is terminal
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            MarketState::Executed | MarketState::Rejected | MarketState::Refunded
        )
    }

    /// Finalized or terminal: the payout vector can no longer change
    pub const fn is_settled(self) -> bool {
        matches!(self, MarketState::Finalized) || self.is_terminal()
    }

    /// States in which positions may still be opened
    pub const fn accepts_positions(self) -> bool {
        matches!(self, MarketState::Created | MarketState::Trading)
    }

    /// The transition table
    pub const fn can_transition_to(self, next: MarketState) -> bool {
        use MarketState::*;
        matches!(
            (self, next),
            (Created, Trading)
                | (Created, Cancelled)
                | (Trading, AwaitingReport)
                | (Trading, Cancelled)
                | (AwaitingReport, Challenge)
                | (Challenge, Escalated)
                | (Challenge, Finalized)
                | (Escalated, Finalized)
                | (Finalized, Executed)
                | (Finalized, Rejected)
                | (Cancelled, Refunded)
        )
    }
}

impl fmt::Display for MarketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Inventory counters of the automated market maker.
///
/// `sold_*` are the LMSR quantities: tokens handed to traders net of tokens
/// bought back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmmState {
    pub sold_pass: Decimal,
    pub sold_fail: Decimal,
    /// Collateral the creator deposited to seed the maker
    pub funding: Decimal,
}

impl AmmState {
    pub fn sold(&self, outcome: Outcome) -> Decimal {
        match outcome {
            Outcome::Pass => self.sold_pass,
            Outcome::Fail => self.sold_fail,
        }
    }

    pub(crate) fn record(&mut self, outcome: Outcome, delta: Decimal) -> Result<()> {
        let sold = match outcome {
            Outcome::Pass => &mut self.sold_pass,
            Outcome::Fail => &mut self.sold_fail,
        };
        *sold = checked_add(*sold, delta)?;
        Ok(())
    }
}

/// Direction of an LMSR trade, from the trader's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

/// Priced LMSR trade.
///
/// `collateral` is the rounded LMSR amount, `total` is what the trader pays
/// (buy: collateral + fee) or receives (sell: collateral - fee).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeQuote {
    pub side: TradeSide,
    pub outcome: Outcome,
    pub amount: Decimal,
    pub collateral: Decimal,
    pub fee: Decimal,
    pub total: Decimal,
}

/// A conditional-outcome market
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    pub id: MarketId,
    pub kind: BetKind,
    pub question: String,
    pub creator: HolderId,
    pub collateral_asset: String,

    /// Outstanding pass tokens across all holders, market maker included
    pub outcome_supply_pass: Decimal,
    /// Outstanding fail tokens across all holders, market maker included
    pub outcome_supply_fail: Decimal,
    /// Collateral held in escrow for this market
    pub collateral_locked: Decimal,

    /// LMSR liquidity parameter `b`
    pub liquidity: Decimal,
    pub amm: AmmState,

    pub trading_deadline: Timestamp,
    pub state: MarketState,
    /// Set once at execution or refund, immutable afterwards
    pub resolution_payout: Option<Payout>,

    /// Net collateral staked by traders
    pub participation: Decimal,
    pub min_participation: Decimal,

    pub designated_reporter: Option<HolderId>,
    pub condition_ref: Option<String>,
    pub privacy: bool,

    pub active_report: Option<ReportId>,
    /// Reports overturned by arbitration, oldest first
    pub archived_reports: Vec<ReportId>,
    pub challenge_deadline: Option<Timestamp>,
    /// Payout fixed at finalization, applied by `execute`
    pub pending_payout: Option<Payout>,
    pub proposal_bond: Option<BondId>,

    pub created_at: Timestamp,
}

impl Market {
    /// A fresh market in `Created`, with empty supplies
    pub fn new(id: MarketId, creator: HolderId, params: MarketParams, now: Timestamp) -> Self {
        Self {
            id,
            kind: params.kind,
            question: params.question,
            creator,
            collateral_asset: params.collateral_asset,
            outcome_supply_pass: Decimal::ZERO,
            outcome_supply_fail: Decimal::ZERO,
            collateral_locked: Decimal::ZERO,
            liquidity: params.liquidity,
            amm: AmmState::default(),
            trading_deadline: params.trading_deadline,
            state: MarketState::Created,
            resolution_payout: None,
            participation: Decimal::ZERO,
            min_participation: params.min_participation,
            designated_reporter: params.designated_reporter,
            condition_ref: params.condition_ref,
            privacy: params.privacy,
            active_report: None,
            archived_reports: Vec::new(),
            challenge_deadline: None,
            pending_payout: None,
            proposal_bond: None,
            created_at: now,
        }
    }

    /// Identity of this market's automated market maker
    pub fn market_maker(&self) -> HolderId {
        HolderId::market_maker(self.id)
    }

    pub fn participation_met(&self) -> bool {
        self.participation >= self.min_participation
    }

    /// Positions may be opened and the maker trades
    pub fn trading_open(&self, now: Timestamp) -> bool {
        self.state.accepts_positions() && now < self.trading_deadline
    }

    /// Move to `next`, returning the previous state
    pub fn transition(&mut self, next: MarketState) -> Result<MarketState> {
        if !self.state.can_transition_to(next) {
            if self.state.is_settled() {
                return Err(EngineError::AlreadyFinalized(self.id));
            }
            return Err(EngineError::InvalidState {
                market: self.id,
                state: self.state,
                action: "transition",
            });
        }
        let previous = self.state;
        self.state = next;
        Ok(previous)
    }

    /// The clock-driven transition due at `now`, if any
    pub fn due_transition(&self, now: Timestamp) -> Option<MarketState> {
        match self.state {
            MarketState::Created if now >= self.trading_deadline => Some(MarketState::Cancelled),
            MarketState::Trading if now >= self.trading_deadline => {
                if self.participation_met() {
                    Some(MarketState::AwaitingReport)
                } else {
                    Some(MarketState::Cancelled)
                }
            }
            MarketState::Challenge => match self.challenge_deadline {
                Some(deadline) if now >= deadline => Some(MarketState::Finalized),
                _ => None,
            },
            _ => None,
        }
    }

    /// Add staked collateral; opens trading once the threshold is met.
    ///
    /// Returns the state change, if one happened.
    pub(crate) fn add_participation(&mut self, amount: Decimal) -> Result<Option<(MarketState, MarketState)>> {
        self.participation = checked_add(self.participation, amount)?;
        if self.state == MarketState::Created && self.participation_met() {
            self.state = MarketState::Trading;
            return Ok(Some((MarketState::Created, MarketState::Trading)));
        }
        Ok(None)
    }

    /// Withdraw staked collateral, saturating at zero
    pub(crate) fn remove_participation(&mut self, amount: Decimal) {
        self.participation = (self.participation - amount).max(Decimal::ZERO);
    }

    /// Fix the payout vector. Fails if one is already set.
    pub(crate) fn resolve(&mut self, payout: Payout) -> Result<()> {
        if self.resolution_payout.is_some() {
            return Err(EngineError::AlreadyFinalized(self.id));
        }
        self.resolution_payout = Some(payout);
        Ok(())
    }

    /// Human-readable status line
    pub fn status(&self) -> String {
        let (positive, negative) = self.kind.labels();
        match self.state {
            MarketState::Created => format!(
                "Created - {} of {} staked",
                self.participation, self.min_participation
            ),
            MarketState::Trading => format!(
                "Trading until {}",
                format_timestamp(self.trading_deadline)
            ),
            MarketState::AwaitingReport => "Awaiting oracle report".to_string(),
            MarketState::Challenge => match self.challenge_deadline {
                Some(deadline) => format!("Challengeable until {}", format_timestamp(deadline)),
                None => "Challengeable".to_string(),
            },
            MarketState::Escalated => "Escalated to arbitration".to_string(),
            MarketState::Finalized => "Finalized - awaiting execution".to_string(),
            MarketState::Executed => format!("Executed - {positive} won"),
            MarketState::Rejected => format!("Rejected - {negative} won"),
            MarketState::Cancelled => "Cancelled - awaiting refund".to_string(),
            MarketState::Refunded => "Refunded".to_string(),
        }
    }
}
