//! # Utility Functions
//!
//! Amount validation, rounding to collateral precision, basis-point fees and
//! domain-separated hashing.

use crate::{error::Result, EngineError};
use rust_decimal::{Decimal, RoundingStrategy};
use sha2::{Digest, Sha256};

/// Decimal places of collateral and outcome-token amounts
pub const COLLATERAL_DECIMALS: u32 = 8;

/// Basis points denominator (100% = 10000 bp)
pub const BPS_DENOMINATOR: u32 = 10_000;

/// Check that `amount` is strictly positive and representable at collateral precision
pub fn validate_amount(amount: Decimal) -> Result<Decimal> {
    if amount <= Decimal::ZERO || amount.normalize().scale() > COLLATERAL_DECIMALS {
        return Err(EngineError::InvalidAmount(amount));
    }
    Ok(amount)
}

/// `a + b`, reporting overflow instead of panicking
pub fn checked_add(a: Decimal, b: Decimal) -> Result<Decimal> {
    a.checked_add(b).ok_or(EngineError::Overflow)
}

/// Round towards positive infinity at collateral precision
pub fn round_up(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(COLLATERAL_DECIMALS, RoundingStrategy::ToPositiveInfinity)
}

/// Round towards negative infinity at collateral precision
pub fn round_down(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(COLLATERAL_DECIMALS, RoundingStrategy::ToNegativeInfinity)
}

/// `amount * bps / 10000`, rounded down
pub fn bps_of(amount: Decimal, bps: u32) -> Result<Decimal> {
    let fee = amount
        .checked_mul(Decimal::from(bps))
        .ok_or(EngineError::Overflow)?
        .checked_div(Decimal::from(BPS_DENOMINATOR))
        .ok_or(EngineError::Overflow)?;
    Ok(round_down(fee))
}

/// SHA256 over a domain tag followed by length-prefixed parts
pub fn tagged_hash(tag: &str, parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update((tag.len() as u32).to_be_bytes());
    hasher.update(tag.as_bytes());
    for part in parts {
        hasher.update((part.len() as u32).to_be_bytes());
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Canonical byte encoding of a decimal amount (normalized string form)
pub fn amount_bytes(amount: Decimal) -> Vec<u8> {
    amount.normalize().to_string().into_bytes()
}

/// Format logical time as human-readable string
pub fn format_timestamp(timestamp: u64) -> String {
    use chrono::DateTime;
    let dt = DateTime::from_timestamp(timestamp as i64, 0).unwrap_or_default();
    dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_validate_amount() {
        assert!(validate_amount(dec!(1)).is_ok());
        assert!(validate_amount(dec!(0.00000001)).is_ok());
        assert!(validate_amount(dec!(1.50000000000)).is_ok());
        assert!(validate_amount(dec!(0)).is_err());
        assert!(validate_amount(dec!(-3)).is_err());
        assert!(validate_amount(dec!(0.000000001)).is_err());
    }

    #[test]
    fn test_rounding_directions() {
        assert_eq!(round_up(dec!(1.000000001)), dec!(1.00000001));
        assert_eq!(round_down(dec!(1.000000019)), dec!(1.00000001));
        assert_eq!(round_up(dec!(2)), dec!(2));
    }

    #[test]
    fn test_bps_of() {
        assert_eq!(bps_of(dec!(150), 500).unwrap(), dec!(7.5));
        assert_eq!(bps_of(dec!(150), 0).unwrap(), dec!(0));
        assert_eq!(bps_of(dec!(0.00000001), 500).unwrap(), dec!(0));
    }

    #[test]
    fn test_tagged_hash_is_domain_separated() {
        let a = tagged_hash("condmarket/a", &[b"xy", b"z"]);
        let b = tagged_hash("condmarket/a", &[b"x", b"yz"]);
        let c = tagged_hash("condmarket/b", &[b"xy", b"z"]);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, tagged_hash("condmarket/a", &[b"xy", b"z"]));
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(1735689600), "2025-01-01 00:00:00 UTC");
    }
}
