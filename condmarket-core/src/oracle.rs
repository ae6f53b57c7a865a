//! External resolution collaborators: the arbitration oracle that settles
//! escalated disputes, and the condition feed used for auto-pegged reports.

use crate::error::ArbitrationError;
use crate::types::{HolderId, MarketId, Payout};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One side's case in an escalated dispute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceBundle {
    pub party: HolderId,
    /// Payout the party claims; `None` when the party only disputes the report
    pub claimed_payout: Option<Payout>,
    pub evidence_ref: String,
    pub bond: Decimal,
}

/// Everything the arbitration oracle receives for one dispute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrationRequest {
    pub market: MarketId,
    pub question: String,
    pub report: EvidenceBundle,
    pub challenge: EvidenceBundle,
}

/// Handle identifying a pending arbitration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArbitrationTicket(pub String);

impl fmt::Display for ArbitrationTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Decision delivered by the arbitrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    /// The report stands; the challenger loses
    UpholdReport,
    /// The report is wrong; resolve with this payout instead
    Overturn(Payout),
}

/// Arbitration service that eventually answers with [`Verdict`]s.
///
/// The call only registers the dispute; the verdict comes back later through
/// the engine's `deliver_verdict`.
pub trait ArbitrationOracle {
    fn escalate(&mut self, request: &ArbitrationRequest) -> Result<ArbitrationTicket, ArbitrationError>;
}

/// Resolution of an external condition as a ratio over a common denominator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionOutcome {
    pub pass_numerator: u64,
    pub fail_numerator: u64,
    pub denominator: u64,
}

impl ConditionOutcome {
    pub fn payout(&self) -> crate::Result<Payout> {
        Payout::from_ratio(self.pass_numerator, self.fail_numerator, self.denominator)
    }
}

/// External feed of resolved conditions
pub trait ConditionFeed {
    fn is_resolved(&self, condition_ref: &str) -> bool;
    fn get_outcome(&self, condition_ref: &str) -> Option<ConditionOutcome>;
}

/// Arbitrator that records requests and hands out sequential tickets
#[derive(Debug, Clone, Default)]
pub struct QueuedArbitrator {
    requests: Vec<(ArbitrationTicket, ArbitrationRequest)>,
    offline: bool,
}

impl QueuedArbitrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse new escalations until brought back online
    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
    }

    /// Disputes received so far, oldest first
    pub fn requests(&self) -> &[(ArbitrationTicket, ArbitrationRequest)] {
        &self.requests
    }

    pub fn ticket_for(&self, market: MarketId) -> Option<&ArbitrationTicket> {
        self.requests
            .iter()
            .rev()
            .find(|(_, request)| request.market == market)
            .map(|(ticket, _)| ticket)
    }
}

impl ArbitrationOracle for QueuedArbitrator {
    fn escalate(&mut self, request: &ArbitrationRequest) -> Result<ArbitrationTicket, ArbitrationError> {
        if self.offline {
            return Err(ArbitrationError::Unavailable("arbitrator offline".to_string()));
        }
        let ticket = ArbitrationTicket(format!("arb-{}-{}", request.market.0, self.requests.len()));
        self.requests.push((ticket.clone(), request.clone()));
        Ok(ticket)
    }
}

/// Condition feed backed by a map
#[derive(Debug, Clone, Default)]
pub struct StaticConditionFeed {
    outcomes: BTreeMap<String, ConditionOutcome>,
}

impl StaticConditionFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&mut self, condition_ref: impl Into<String>, outcome: ConditionOutcome) {
        self.outcomes.insert(condition_ref.into(), outcome);
    }
}

impl ConditionFeed for StaticConditionFeed {
    fn is_resolved(&self, condition_ref: &str) -> bool {
        self.outcomes.contains_key(condition_ref)
    }

    fn get_outcome(&self, condition_ref: &str) -> Option<ConditionOutcome> {
        self.outcomes.get(condition_ref).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request(market: u64) -> ArbitrationRequest {
        let bundle = |party: &str| EvidenceBundle {
            party: HolderId::from(party),
            claimed_payout: None,
            evidence_ref: format!("ipfs://{party}"),
            bond: dec!(100),
        };
        ArbitrationRequest {
            market: MarketId(market),
            question: "Did it rain?".to_string(),
            report: bundle("reporter"),
            challenge: bundle("challenger"),
        }
    }

    #[test]
    fn test_queued_arbitrator_tickets() {
        let mut arbitrator = QueuedArbitrator::new();
        let first = arbitrator.escalate(&request(1)).unwrap();
        let second = arbitrator.escalate(&request(2)).unwrap();
        assert_ne!(first, second);
        assert_eq!(arbitrator.ticket_for(MarketId(1)), Some(&first));
        assert_eq!(arbitrator.requests().len(), 2);

        arbitrator.set_offline(true);
        assert!(arbitrator.escalate(&request(3)).is_err());
    }

    #[test]
    fn test_condition_feed_outcome() {
        let mut feed = StaticConditionFeed::new();
        assert!(!feed.is_resolved("eth-above-5k"));
        feed.resolve(
            "eth-above-5k",
            ConditionOutcome {
                pass_numerator: 0,
                fail_numerator: 1,
                denominator: 1,
            },
        );
        let outcome = feed.get_outcome("eth-above-5k").unwrap();
        assert_eq!(outcome.payout().unwrap(), Payout::FAIL);
    }
}
