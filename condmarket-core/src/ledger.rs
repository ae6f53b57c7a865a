//! # Conditional-Token Ledger
//!
//! Per-holder pass/fail balances and the split/merge/redeem conservation
//! rules. The ledger tracks escrowed collateral on the [`Market`] record;
//! actual collateral movement is staged by the engine.

use crate::market::Market;
use crate::types::{HolderId, MarketId, Outcome};
use crate::utils::{checked_add, round_down, validate_amount};
use crate::{error::Result, EngineError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A holder's outcome-token balances in one market
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub market: MarketId,
    pub holder: HolderId,
    pub pass: Decimal,
    pub fail: Decimal,
}

impl Position {
    pub fn empty(market: MarketId, holder: HolderId) -> Self {
        Self {
            market,
            holder,
            pass: Decimal::ZERO,
            fail: Decimal::ZERO,
        }
    }

    pub fn balance(&self, outcome: Outcome) -> Decimal {
        match outcome {
            Outcome::Pass => self.pass,
            Outcome::Fail => self.fail,
        }
    }

    fn balance_mut(&mut self, outcome: Outcome) -> &mut Decimal {
        match outcome {
            Outcome::Pass => &mut self.pass,
            Outcome::Fail => &mut self.fail,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pass.is_zero() && self.fail.is_zero()
    }
}

/// Result of recomputing a market's token sums
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowAudit {
    pub market: MarketId,
    pub holders: usize,
    pub sum_pass: Decimal,
    pub sum_fail: Decimal,
    pub supply_pass: Decimal,
    pub supply_fail: Decimal,
    pub collateral_locked: Decimal,
    /// Collateral owed to holders at the resolution payout, if resolved
    pub owed: Option<Decimal>,
}

impl EscrowAudit {
    /// Balances sum to supplies, and escrow covers every claim.
    ///
    /// Before resolution escrow must equal both supplies exactly; afterwards
    /// rounding residue may remain, so escrow must only cover what is owed.
    pub fn is_consistent(&self) -> bool {
        if self.sum_pass != self.supply_pass || self.sum_fail != self.supply_fail {
            return false;
        }
        match self.owed {
            None => {
                self.collateral_locked == self.supply_pass
                    && self.collateral_locked == self.supply_fail
            }
            Some(owed) => self.collateral_locked >= owed,
        }
    }
}

/// Outcome-token balances of every holder in every market
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    positions: BTreeMap<(MarketId, HolderId), Position>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Balances of `holder` in `market`; zero if it never held anything
    pub fn position(&self, market: MarketId, holder: &HolderId) -> Position {
        self.positions
            .get(&(market, holder.clone()))
            .cloned()
            .unwrap_or_else(|| Position::empty(market, holder.clone()))
    }

    /// Every non-empty position in `market`, ordered by holder
    pub fn positions(&self, market: MarketId) -> impl Iterator<Item = &Position> {
        self.positions
            .iter()
            .filter(move |((id, _), _)| *id == market)
            .map(|(_, position)| position)
    }

    fn entry(&mut self, market: MarketId, holder: &HolderId) -> &mut Position {
        self.positions
            .entry((market, holder.clone()))
            .or_insert_with(|| Position::empty(market, holder.clone()))
    }

    fn prune(&mut self, market: MarketId, holder: &HolderId) {
        let key = (market, holder.clone());
        if self.positions.get(&key).is_some_and(Position::is_empty) {
            self.positions.remove(&key);
        }
    }

    /// Lock `amount` collateral and credit `amount` pass and `amount` fail
    pub fn split(&mut self, market: &mut Market, holder: &HolderId, amount: Decimal) -> Result<()> {
        validate_amount(amount)?;
        if !market.state.accepts_positions() {
            return Err(EngineError::AlreadySplitPastDeadline(market.id));
        }

        let current = self.position(market.id, holder);
        let pass = checked_add(current.pass, amount)?;
        let fail = checked_add(current.fail, amount)?;
        let supply_pass = checked_add(market.outcome_supply_pass, amount)?;
        let supply_fail = checked_add(market.outcome_supply_fail, amount)?;
        let locked = checked_add(market.collateral_locked, amount)?;

        let position = self.entry(market.id, holder);
        position.pass = pass;
        position.fail = fail;
        market.outcome_supply_pass = supply_pass;
        market.outcome_supply_fail = supply_fail;
        market.collateral_locked = locked;

        tracing::debug!(market = %market.id, holder = %holder, %amount, "split");
        Ok(())
    }

    /// Burn `amount` of both sides and release `amount` collateral
    pub fn merge(&mut self, market: &mut Market, holder: &HolderId, amount: Decimal) -> Result<Decimal> {
        validate_amount(amount)?;
        if market.resolution_payout.is_some() {
            return Err(EngineError::InvalidState {
                market: market.id,
                state: market.state,
                action: "merge",
            });
        }

        let position = self.entry(market.id, holder);
        let available = position.pass.min(position.fail);
        if available < amount {
            self.prune(market.id, holder);
            return Err(EngineError::InsufficientBalance {
                needed: amount,
                available,
            });
        }
        position.pass -= amount;
        position.fail -= amount;
        market.outcome_supply_pass -= amount;
        market.outcome_supply_fail -= amount;
        market.collateral_locked -= amount;
        self.prune(market.id, holder);

        tracing::debug!(market = %market.id, holder = %holder, %amount, "merge");
        Ok(amount)
    }

    /// Burn every token `holder` owns and return their value at the
    /// resolution payout, rounded down. Residue stays in escrow.
    pub fn redeem(&mut self, market: &mut Market, holder: &HolderId) -> Result<Decimal> {
        let payout = market
            .resolution_payout
            .ok_or(EngineError::MarketNotResolved(market.id))?;

        let Some(position) = self.positions.remove(&(market.id, holder.clone())) else {
            return Ok(Decimal::ZERO);
        };
        let value = position
            .pass
            .checked_mul(payout.pass)
            .and_then(|pass| {
                position
                    .fail
                    .checked_mul(payout.fail)
                    .and_then(|fail| pass.checked_add(fail))
            })
            .ok_or(EngineError::Overflow)?;
        let value = round_down(value);

        market.outcome_supply_pass -= position.pass;
        market.outcome_supply_fail -= position.fail;
        market.collateral_locked -= value;

        tracing::debug!(
            market = %market.id,
            holder = %holder,
            pass = %position.pass,
            fail = %position.fail,
            %value,
            "redeem"
        );
        Ok(value)
    }

    /// Move `amount` tokens of `outcome` between two holders of the same market
    pub fn move_tokens(
        &mut self,
        market: MarketId,
        from: &HolderId,
        to: &HolderId,
        outcome: Outcome,
        amount: Decimal,
    ) -> Result<()> {
        validate_amount(amount)?;
        let available = self.position(market, from).balance(outcome);
        if available < amount {
            return Err(EngineError::InsufficientBalance {
                needed: amount,
                available,
            });
        }

        *self.entry(market, from).balance_mut(outcome) -= amount;
        self.prune(market, from);
        let balance = self.entry(market, to).balance_mut(outcome);
        *balance = checked_add(*balance, amount)?;
        Ok(())
    }

    /// Recompute token sums and compare them with the market record
    pub fn audit(&self, market: &Market) -> Result<EscrowAudit> {
        let mut holders = 0;
        let mut sum_pass = Decimal::ZERO;
        let mut sum_fail = Decimal::ZERO;
        for position in self.positions(market.id) {
            holders += 1;
            sum_pass = checked_add(sum_pass, position.pass)?;
            sum_fail = checked_add(sum_fail, position.fail)?;
        }

        let owed = match market.resolution_payout {
            Some(payout) => Some(
                sum_pass
                    .checked_mul(payout.pass)
                    .and_then(|pass| sum_fail.checked_mul(payout.fail).and_then(|fail| pass.checked_add(fail)))
                    .ok_or(EngineError::Overflow)?,
            ),
            None => None,
        };

        Ok(EscrowAudit {
            market: market.id,
            holders,
            sum_pass,
            sum_fail,
            supply_pass: market.outcome_supply_pass,
            supply_fail: market.outcome_supply_fail,
            collateral_locked: market.collateral_locked,
            owed,
        })
    }
}
