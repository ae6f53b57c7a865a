//! # Dispute Records
//!
//! Bonds, oracle reports and challenges, plus the slashing arithmetic.
//! The engine drives the report -> challenge -> escalation flow over these
//! records.

use crate::oracle::ArbitrationTicket;
use crate::types::{BondId, HolderId, MarketId, Payout, ReportId, Timestamp};
use crate::utils::bps_of;
use crate::{error::Result, EngineError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// What a bond secures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BondKind {
    Proposal,
    OracleReport,
    Challenge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BondStatus {
    Locked,
    Returned,
    Slashed,
}

/// Collateral locked behind a claim, settled exactly once
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bond {
    pub id: BondId,
    pub market: MarketId,
    pub poster: HolderId,
    pub kind: BondKind,
    pub amount: Decimal,
    pub status: BondStatus,
}

impl Bond {
    pub fn new(id: BondId, market: MarketId, poster: HolderId, kind: BondKind, amount: Decimal) -> Self {
        Self {
            id,
            market,
            poster,
            kind,
            amount,
            status: BondStatus::Locked,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.status == BondStatus::Locked
    }

    pub fn mark_returned(&mut self) -> Result<()> {
        self.settle(BondStatus::Returned)
    }

    pub fn mark_slashed(&mut self) -> Result<()> {
        self.settle(BondStatus::Slashed)
    }

    fn settle(&mut self, status: BondStatus) -> Result<()> {
        if !self.is_locked() {
            return Err(EngineError::BondAlreadySettled(self.id));
        }
        self.status = status;
        Ok(())
    }
}

/// A reporter's claim about the resolution of a market
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleReport {
    pub id: ReportId,
    pub market: MarketId,
    pub reporter: HolderId,
    pub payout: Payout,
    pub evidence_ref: String,
    pub submitted_at: Timestamp,
    pub bond: BondId,
}

/// A bonded dispute of an oracle report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    pub report: ReportId,
    pub challenger: HolderId,
    pub counter_evidence_ref: String,
    pub bond: BondId,
    pub filed_at: Timestamp,
    pub escalated: bool,
    pub ticket: Option<ArbitrationTicket>,
}

/// Distribution of a slashed bond
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlashSplit {
    pub to_winner: Decimal,
    pub protocol_fee: Decimal,
}

/// Split a slashed `amount` between the winner and the protocol
pub fn slash_split(amount: Decimal, protocol_fee_bps: u32) -> Result<SlashSplit> {
    let protocol_fee = bps_of(amount, protocol_fee_bps)?;
    Ok(SlashSplit {
        to_winner: amount - protocol_fee,
        protocol_fee,
    })
}

/// Check a reported payout vector against the fractional-payout policy
pub fn check_payout(payout: &Payout, allow_fractional: bool) -> Result<()> {
    // verdict and deserialized vectors never went through Payout::new
    Payout::new(payout.pass, payout.fail)?;
    if !allow_fractional && !payout.is_binary() {
        return Err(EngineError::InvalidPayout(format!(
            "fractional payout {payout} not enabled"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn bond() -> Bond {
        Bond::new(
            BondId(1),
            MarketId(1),
            HolderId::from("reporter"),
            BondKind::OracleReport,
            dec!(100),
        )
    }

    #[test]
    fn test_bond_settles_once() {
        let mut bond = bond();
        bond.mark_returned().unwrap();
        assert_eq!(
            bond.mark_slashed().unwrap_err(),
            EngineError::BondAlreadySettled(BondId(1))
        );
        assert_eq!(bond.status, BondStatus::Returned);
    }

    #[test]
    fn test_slash_split() {
        let split = slash_split(dec!(150), 500).unwrap();
        assert_eq!(split.protocol_fee, dec!(7.5));
        assert_eq!(split.to_winner, dec!(142.5));

        let split = slash_split(dec!(150), 0).unwrap();
        assert_eq!(split.to_winner, dec!(150));
    }

    #[test]
    fn test_fractional_payouts_are_opt_in() {
        let fractional = Payout::new(dec!(0.4), dec!(0.6)).unwrap();
        assert!(check_payout(&Payout::PASS, false).is_ok());
        assert!(matches!(
            check_payout(&fractional, false),
            Err(EngineError::InvalidPayout(_))
        ));
        assert!(check_payout(&fractional, true).is_ok());

        let unchecked = Payout {
            pass: Decimal::MAX,
            fail: Decimal::MAX,
        };
        assert!(matches!(
            check_payout(&unchecked, true),
            Err(EngineError::InvalidPayout(_))
        ));
    }
}
