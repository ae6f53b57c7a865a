//! # Engine Configuration
//!
//! Protocol-wide parameters, loadable from JSON. Every field has a default so
//! partial documents are accepted.

use crate::types::{BetKind, HolderId, Timestamp};
use crate::utils::BPS_DENOMINATOR;
use crate::{error::Result, EngineError};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Protocol-wide parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seconds a report stays open to challenge
    pub challenge_window: u64,
    /// Minimum bond a reporter must lock
    pub min_report_bond: Decimal,
    /// Bond a market creator locks at creation (zero disables it)
    pub proposal_bond: Decimal,
    /// Share of a slashed bond kept by the protocol, in basis points
    pub protocol_fee_bps: u32,
    /// Fee on LMSR trades, in basis points
    pub trade_fee_bps: u32,
    /// Receives protocol fees and slashed proposal bonds
    pub treasury: HolderId,
    /// Only identity allowed to deliver arbitration verdicts
    pub arbitrator: HolderId,
    /// Only identity allowed to process commitment batches
    pub batch_coordinator: HolderId,
    /// Accept non-binary payout vectors in reports and verdicts
    pub allow_fractional_payouts: bool,
    /// Upper bound on the LMSR liquidity parameter
    pub max_liquidity: Decimal,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            challenge_window: 86_400,
            min_report_bond: dec!(100),
            proposal_bond: Decimal::ZERO,
            protocol_fee_bps: 500,
            trade_fee_bps: 0,
            treasury: HolderId::new("treasury"),
            arbitrator: HolderId::new("arbitrator"),
            batch_coordinator: HolderId::new("batch-coordinator"),
            allow_fractional_payouts: false,
            max_liquidity: dec!(1000000000),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| EngineError::InvalidConfig(format!("JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.challenge_window == 0 {
            return Err(EngineError::InvalidConfig(
                "challenge_window must be positive".to_string(),
            ));
        }
        if self.min_report_bond <= Decimal::ZERO {
            return Err(EngineError::InvalidConfig(
                "min_report_bond must be positive".to_string(),
            ));
        }
        if self.proposal_bond.is_sign_negative() {
            return Err(EngineError::InvalidConfig(
                "proposal_bond must not be negative".to_string(),
            ));
        }
        if self.protocol_fee_bps > BPS_DENOMINATOR || self.trade_fee_bps > BPS_DENOMINATOR {
            return Err(EngineError::InvalidConfig(format!(
                "fees must not exceed {BPS_DENOMINATOR} bps"
            )));
        }
        if self.max_liquidity <= Decimal::ZERO {
            return Err(EngineError::InvalidConfig(
                "max_liquidity must be positive".to_string(),
            ));
        }
        for identity in [&self.treasury, &self.arbitrator, &self.batch_coordinator] {
            if identity.is_market_maker() {
                return Err(EngineError::InvalidConfig(format!(
                    "{identity} uses the reserved market-maker prefix"
                )));
            }
        }
        Ok(())
    }
}

/// Parameters of a new market
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketParams {
    pub kind: BetKind,
    pub question: String,
    /// Opaque reference to the collateral asset held by the bank
    pub collateral_asset: String,
    /// LMSR liquidity parameter `b`
    pub liquidity: Decimal,
    pub trading_deadline: Timestamp,
    /// Collateral that must be staked before the deadline; zero opens trading at once
    pub min_participation: Decimal,
    /// When set, only this identity may submit the first report
    pub designated_reporter: Option<HolderId>,
    /// Reference understood by the external condition feed
    pub condition_ref: Option<String>,
    /// Route positions through the commitment gate
    pub privacy: bool,
}

impl MarketParams {
    /// Binary market with no participation threshold and no privacy layer
    pub fn new(question: impl Into<String>, liquidity: Decimal, trading_deadline: Timestamp) -> Self {
        Self {
            kind: BetKind::PassFail,
            question: question.into(),
            collateral_asset: "collateral".to_string(),
            liquidity,
            trading_deadline,
            min_participation: Decimal::ZERO,
            designated_reporter: None,
            condition_ref: None,
            privacy: false,
        }
    }

    pub fn with_kind(mut self, kind: BetKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_min_participation(mut self, min_participation: Decimal) -> Self {
        self.min_participation = min_participation;
        self
    }

    pub fn with_designated_reporter(mut self, reporter: impl Into<HolderId>) -> Self {
        self.designated_reporter = Some(reporter.into());
        self
    }

    pub fn with_condition_ref(mut self, condition_ref: impl Into<String>) -> Self {
        self.condition_ref = Some(condition_ref.into());
        self
    }

    pub fn with_privacy(mut self) -> Self {
        self.privacy = true;
        self
    }
}
