//! # Shared Types
//!
//! Identifiers, outcome sides, payout vectors and the transaction context
//! supplied by the execution environment.

use crate::{error::Result, EngineError};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical time in seconds, supplied by the execution environment
pub type Timestamp = u64;

/// Prefix reserved for per-market market-maker identities
pub const MARKET_MAKER_PREFIX: &str = "amm/";

/// Market identifier, assigned sequentially by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MarketId(pub u64);

impl fmt::Display for MarketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "M{}", self.0)
    }
}

/// Bond identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BondId(pub u64);

impl fmt::Display for BondId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// Oracle report identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReportId(pub u64);

impl fmt::Display for ReportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

/// Opaque caller identity, as authenticated by the execution environment
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HolderId(String);

impl HolderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identity of the automated market maker of `market`
    pub fn market_maker(market: MarketId) -> Self {
        Self(format!("{MARKET_MAKER_PREFIX}{}", market.0))
    }

    pub fn is_market_maker(&self) -> bool {
        self.0.starts_with(MARKET_MAKER_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HolderId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Context of one transaction: who is calling and when
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tx {
    pub caller: HolderId,
    pub now: Timestamp,
}

impl Tx {
    pub fn new(caller: impl Into<HolderId>, now: Timestamp) -> Self {
        Self {
            caller: caller.into(),
            now,
        }
    }
}

/// One side of a binary proposition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Pass,
    Fail,
}

/// Product flavour of a market.
///
/// Only the labels differ; every kind settles through the same pass/fail
/// token pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BetKind {
    YesNo,
    PassFail,
    AboveBelow,
    OverUnder,
    WinLose,
    HigherLower,
}

impl BetKind {
    /// `(positive, negative)` display labels
    pub const fn labels(self) -> (&'static str, &'static str) {
        match self {
            BetKind::YesNo => ("Yes", "No"),
            BetKind::PassFail => ("Pass", "Fail"),
            BetKind::AboveBelow => ("Above", "Below"),
            BetKind::OverUnder => ("Over", "Under"),
            BetKind::WinLose => ("Win", "Lose"),
            BetKind::HigherLower => ("Higher", "Lower"),
        }
    }

    pub const fn label(self, outcome: Outcome) -> &'static str {
        let (positive, negative) = self.labels();
        match outcome {
            Outcome::Pass => positive,
            Outcome::Fail => negative,
        }
    }
}

/// Collateral paid per pass and per fail token at resolution.
///
/// Components lie in `[0, 1]` and sum to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    pub pass: Decimal,
    pub fail: Decimal,
}

impl Payout {
    pub const PASS: Payout = Payout {
        pass: Decimal::ONE,
        fail: Decimal::ZERO,
    };

    pub const FAIL: Payout = Payout {
        pass: Decimal::ZERO,
        fail: Decimal::ONE,
    };

    /// Used when a market is cancelled: every token pair is worth its collateral
    pub const EVEN: Payout = Payout {
        pass: dec!(0.5),
        fail: dec!(0.5),
    };

    /// Validate a `(pass, fail)` vector
    pub fn new(pass: Decimal, fail: Decimal) -> Result<Self> {
        if pass.is_sign_negative() || fail.is_sign_negative() {
            return Err(EngineError::InvalidPayout(format!(
                "negative component ({pass}, {fail})"
            )));
        }
        if pass > Decimal::ONE || fail > Decimal::ONE {
            return Err(EngineError::InvalidPayout(format!(
                "component above 1 in ({pass}, {fail})"
            )));
        }
        if pass.checked_add(fail) != Some(Decimal::ONE) {
            return Err(EngineError::InvalidPayout(format!(
                "components ({pass}, {fail}) do not sum to 1"
            )));
        }
        Ok(Self { pass, fail })
    }

    /// Build a payout from feed numerators over a common denominator
    pub fn from_ratio(pass_numerator: u64, fail_numerator: u64, denominator: u64) -> Result<Self> {
        if denominator == 0 || pass_numerator.checked_add(fail_numerator) != Some(denominator) {
            return Err(EngineError::InvalidPayout(format!(
                "{pass_numerator}/{denominator} + {fail_numerator}/{denominator} != 1"
            )));
        }
        let denominator = Decimal::from(denominator);
        let pass = Decimal::from(pass_numerator)
            .checked_div(denominator)
            .ok_or(EngineError::Overflow)?;
        Self::new(pass, Decimal::ONE - pass)
    }

    pub fn is_binary(&self) -> bool {
        *self == Self::PASS || *self == Self::FAIL
    }

    pub fn for_outcome(&self, outcome: Outcome) -> Decimal {
        match outcome {
            Outcome::Pass => self.pass,
            Outcome::Fail => self.fail,
        }
    }
}

impl fmt::Display for Payout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.pass, self.fail)
    }
}
