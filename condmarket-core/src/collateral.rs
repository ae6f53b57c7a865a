//! # Collateral Transfers
//!
//! The engine never moves value itself. Operations stage [`Transfer`]s while
//! they run; the staged list is checked against the bank and settled only
//! once the operation has succeeded. A settlement that fails part way is
//! unwound with the opposite transfers, so the bank ends where it started.

use crate::error::BankError;
use crate::types::HolderId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::error;

/// Escrowed value-transfer primitive supplied by the execution environment.
///
/// Each call must either move the full amount or fail without effect.
pub trait CollateralBank {
    /// Collateral `holder` can currently deposit
    fn available(&self, holder: &HolderId) -> Decimal;

    /// Move `amount` from `holder` into engine escrow
    fn deposit(&mut self, holder: &HolderId, amount: Decimal) -> Result<(), BankError>;

    /// Release `amount` from engine escrow to `holder`
    fn payout(&mut self, holder: &HolderId, amount: Decimal) -> Result<(), BankError>;
}

/// A single staged collateral movement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transfer {
    Deposit { holder: HolderId, amount: Decimal },
    Payout { holder: HolderId, amount: Decimal },
}

impl Transfer {
    /// The movement that cancels this one
    fn reversed(&self) -> Self {
        match self {
            Transfer::Deposit { holder, amount } => Transfer::Payout {
                holder: holder.clone(),
                amount: *amount,
            },
            Transfer::Payout { holder, amount } => Transfer::Deposit {
                holder: holder.clone(),
                amount: *amount,
            },
        }
    }

    fn apply(&self, bank: &mut impl CollateralBank) -> Result<(), BankError> {
        match self {
            Transfer::Deposit { holder, amount } => bank.deposit(holder, *amount),
            Transfer::Payout { holder, amount } => bank.payout(holder, *amount),
        }
    }
}

/// Transfers staged by one operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transfers {
    staged: Vec<Transfer>,
}

impl Transfers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deposit(&mut self, holder: &HolderId, amount: Decimal) {
        if amount > Decimal::ZERO {
            self.staged.push(Transfer::Deposit {
                holder: holder.clone(),
                amount,
            });
        }
    }

    pub fn payout(&mut self, holder: &HolderId, amount: Decimal) {
        if amount > Decimal::ZERO {
            self.staged.push(Transfer::Payout {
                holder: holder.clone(),
                amount,
            });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transfer> {
        self.staged.iter()
    }

    /// Total deposit required from each holder
    pub fn deposits_by_holder(&self) -> Result<BTreeMap<&HolderId, Decimal>, BankError> {
        let mut totals = BTreeMap::new();
        for transfer in self.iter() {
            if let Transfer::Deposit { holder, amount } = transfer {
                let total = totals.entry(holder).or_insert(Decimal::ZERO);
                *total = total
                    .checked_add(*amount)
                    .ok_or_else(|| BankError::Rejected(format!("deposits of {holder} overflow")))?;
            }
        }
        Ok(totals)
    }

    /// Check every depositor can cover their total before anything moves
    pub fn preflight(&self, bank: &impl CollateralBank) -> Result<(), BankError> {
        for (holder, needed) in self.deposits_by_holder()? {
            let available = bank.available(holder);
            if available < needed {
                return Err(BankError::InsufficientFunds {
                    holder: holder.to_string(),
                    needed,
                    available,
                });
            }
        }
        Ok(())
    }

    /// Execute deposits first, then payouts. On failure every transfer
    /// already made is reversed, newest first.
    pub fn settle(self, bank: &mut impl CollateralBank) -> Result<(), BankError> {
        let (deposits, payouts): (Vec<_>, Vec<_>) = self
            .staged
            .into_iter()
            .partition(|transfer| matches!(transfer, Transfer::Deposit { .. }));

        let mut applied = Vec::new();
        for transfer in deposits.into_iter().chain(payouts) {
            if let Err(err) = transfer.apply(bank) {
                unwind(bank, applied)?;
                return Err(err);
            }
            applied.push(transfer);
        }
        Ok(())
    }
}

fn unwind(bank: &mut impl CollateralBank, applied: Vec<Transfer>) -> Result<(), BankError> {
    for transfer in applied.into_iter().rev() {
        transfer.reversed().apply(bank).map_err(|err| {
            error!(?transfer, error = %err, "settlement could not be unwound");
            BankError::Rejected(format!("settlement could not be unwound: {err}"))
        })?;
    }
    Ok(())
}

/// Reference bank keeping balances in memory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InMemoryBank {
    balances: BTreeMap<HolderId, Decimal>,
    escrow: Decimal,
}

impl InMemoryBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit `holder` with external collateral
    pub fn fund(&mut self, holder: impl Into<HolderId>, amount: Decimal) {
        *self.balances.entry(holder.into()).or_insert(Decimal::ZERO) += amount;
    }

    pub fn balance(&self, holder: &HolderId) -> Decimal {
        self.balances.get(holder).copied().unwrap_or(Decimal::ZERO)
    }

    /// Collateral currently held for the engine
    pub fn escrow(&self) -> Decimal {
        self.escrow
    }

    /// Sum of every balance plus escrow
    pub fn total_supply(&self) -> Decimal {
        self.balances.values().copied().sum::<Decimal>() + self.escrow
    }
}

impl CollateralBank for InMemoryBank {
    fn available(&self, holder: &HolderId) -> Decimal {
        self.balance(holder)
    }

    fn deposit(&mut self, holder: &HolderId, amount: Decimal) -> Result<(), BankError> {
        let balance = self.balance(holder);
        if balance < amount {
            return Err(BankError::InsufficientFunds {
                holder: holder.to_string(),
                needed: amount,
                available: balance,
            });
        }
        self.balances.insert(holder.clone(), balance - amount);
        self.escrow += amount;
        Ok(())
    }

    fn payout(&mut self, holder: &HolderId, amount: Decimal) -> Result<(), BankError> {
        if self.escrow < amount {
            return Err(BankError::Rejected(format!(
                "escrow {} cannot cover payout of {amount}",
                self.escrow
            )));
        }
        self.escrow -= amount;
        *self.balances.entry(holder.clone()).or_insert(Decimal::ZERO) += amount;
        Ok(())
    }
}
