//! LMSR (Logarithmic Market Scoring Rule) pricing.
//!
//! Reference: https://gnosis-pm-js.readthedocs.io/en/v1.3.0/lmsr-primer.html
//!
//! All calculations use `rust_decimal` (96-bit mantissa, 28 significant
//! digits), so every replica computes identical costs.
//!
//! Formulas:
//! - Cost function: C(q) = b * ln(e^(qPass/b) + e^(qFail/b))
//! - Price: P(pass) = e^(qPass/b) / (e^(qPass/b) + e^(qFail/b))
//! - Buy cost: C(q_new) - C(q_old)
//!
//! The cost is evaluated in log-sum-exp form,
//! `C = max(qPass, qFail) + b * ln(1 + e^(-|qPass - qFail| / b))`,
//! so the only exponent ever taken is non-positive.

use crate::types::Outcome;
use crate::{error::Result, EngineError};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;

/// Gaps of `|qPass - qFail| / b` beyond this contribute nothing at collateral precision.
const EXP_CUTOFF: Decimal = dec!(40);

/// Series tolerance for `exp`, well below the 8-decimal collateral grid.
const EXP_TOLERANCE: Decimal = dec!(0.0000000000000000000001);

/// ln(2) to 28 decimal places
pub const LN_2: Decimal = dec!(0.6931471805599453094172321215);

/// e^(-x) for x >= 0.
///
/// The integer part goes through `E^n`, the series only ever sees `[0, 1)`.
fn exp_neg(x: Decimal) -> Result<Decimal> {
    if x >= EXP_CUTOFF {
        return Ok(Decimal::ZERO);
    }
    let whole = x.trunc();
    let steps = whole.to_i64().ok_or(EngineError::Overflow)?;
    let integral = Decimal::E
        .checked_powi(steps)
        .ok_or(EngineError::Overflow)?;
    let fractional = (x - whole)
        .checked_exp_with_tolerance(EXP_TOLERANCE)
        .ok_or(EngineError::Overflow)?;
    let grown = integral
        .checked_mul(fractional)
        .ok_or(EngineError::Overflow)?;
    Decimal::ONE.checked_div(grown).ok_or(EngineError::Overflow)
}

/// ln(1 + y) for y in [0, 1]
fn ln_1p(y: Decimal) -> Result<Decimal> {
    let value = Decimal::ONE
        .checked_add(y)
        .ok_or(EngineError::Overflow)?
        .checked_ln()
        .ok_or(EngineError::Overflow)?;
    // ln of a value >= 1 is never negative; clamp series noise.
    Ok(value.max(Decimal::ZERO))
}

fn check_inputs(q_pass: Decimal, q_fail: Decimal, b: Decimal) -> Result<()> {
    if b <= Decimal::ZERO {
        return Err(EngineError::InvalidLiquidity(b));
    }
    if q_pass.is_sign_negative() {
        return Err(EngineError::InvalidAmount(q_pass));
    }
    if q_fail.is_sign_negative() {
        return Err(EngineError::InvalidAmount(q_fail));
    }
    Ok(())
}

/// `e^(-|qPass - qFail| / b)`
fn gap_weight(q_pass: Decimal, q_fail: Decimal, b: Decimal) -> Result<Decimal> {
    let gap = q_pass
        .checked_sub(q_fail)
        .ok_or(EngineError::Overflow)?
        .abs()
        .checked_div(b)
        .ok_or(EngineError::Overflow)?;
    exp_neg(gap)
}

/// Calculate the LMSR cost function: C(q) = b * ln(e^(qPass/b) + e^(qFail/b))
pub fn cost(q_pass: Decimal, q_fail: Decimal, b: Decimal) -> Result<Decimal> {
    check_inputs(q_pass, q_fail, b)?;

    let ln_term = ln_1p(gap_weight(q_pass, q_fail, b)?)?;
    let tail = b.checked_mul(ln_term).ok_or(EngineError::Overflow)?;
    q_pass
        .max(q_fail)
        .checked_add(tail)
        .ok_or(EngineError::Overflow)
}

fn shifted(q_pass: Decimal, q_fail: Decimal, outcome: Outcome, delta: Decimal) -> Result<(Decimal, Decimal)> {
    Ok(match outcome {
        Outcome::Pass => (
            q_pass.checked_add(delta).ok_or(EngineError::Overflow)?,
            q_fail,
        ),
        Outcome::Fail => (
            q_pass,
            q_fail.checked_add(delta).ok_or(EngineError::Overflow)?,
        ),
    })
}

/// Exact cost of buying `amount` tokens of `outcome`
pub fn buy_cost(
    q_pass: Decimal,
    q_fail: Decimal,
    outcome: Outcome,
    amount: Decimal,
    b: Decimal,
) -> Result<Decimal> {
    if amount <= Decimal::ZERO {
        return Err(EngineError::InvalidAmount(amount));
    }

    let cost_before = cost(q_pass, q_fail, b)?;
    let (next_pass, next_fail) = shifted(q_pass, q_fail, outcome, amount)?;
    let cost_after = cost(next_pass, next_fail, b)?;

    cost_after
        .checked_sub(cost_before)
        .ok_or(EngineError::Overflow)
}

/// Exact collateral returned for selling `amount` tokens of `outcome` back to the maker
pub fn sell_return(
    q_pass: Decimal,
    q_fail: Decimal,
    outcome: Outcome,
    amount: Decimal,
    b: Decimal,
) -> Result<Decimal> {
    if amount <= Decimal::ZERO {
        return Err(EngineError::InvalidAmount(amount));
    }

    let sold = match outcome {
        Outcome::Pass => q_pass,
        Outcome::Fail => q_fail,
    };
    if sold < amount {
        return Err(EngineError::InsufficientBalance {
            needed: amount,
            available: sold,
        });
    }

    let cost_before = cost(q_pass, q_fail, b)?;
    let (next_pass, next_fail) = shifted(q_pass, q_fail, outcome, -amount)?;
    let cost_after = cost(next_pass, next_fail, b)?;

    cost_before
        .checked_sub(cost_after)
        .ok_or(EngineError::Overflow)
}

/// Instantaneous `(P(pass), P(fail))`.
///
/// Both are derived from the same weight, so they sum to one up to the last
/// digit of a single division.
pub fn prices(q_pass: Decimal, q_fail: Decimal, b: Decimal) -> Result<(Decimal, Decimal)> {
    check_inputs(q_pass, q_fail, b)?;

    let weight = gap_weight(q_pass, q_fail, b)?;
    let denominator = Decimal::ONE
        .checked_add(weight)
        .ok_or(EngineError::Overflow)?;
    let leading = Decimal::ONE
        .checked_div(denominator)
        .ok_or(EngineError::Overflow)?;
    let trailing = weight
        .checked_div(denominator)
        .ok_or(EngineError::Overflow)?;

    if q_pass >= q_fail {
        Ok((leading, trailing))
    } else {
        Ok((trailing, leading))
    }
}

/// Instantaneous price (probability) of `outcome`
pub fn price(q_pass: Decimal, q_fail: Decimal, outcome: Outcome, b: Decimal) -> Result<Decimal> {
    let (pass, fail) = prices(q_pass, q_fail, b)?;
    Ok(match outcome {
        Outcome::Pass => pass,
        Outcome::Fail => fail,
    })
}

/// Worst-case market-maker loss, `C(0, 0) = b * ln(2)`.
///
/// Funding the maker with at least this much keeps its inventory
/// non-negative for any sequence of trades.
pub fn max_loss(b: Decimal) -> Result<Decimal> {
    cost(Decimal::ZERO, Decimal::ZERO, b)
}
