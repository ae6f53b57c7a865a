//! Error types for condmarket-core

use crate::market::MarketState;
use crate::types::{BondId, MarketId};
use rust_decimal::Decimal;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Coarse classification of a rejected operation.
///
/// Every category leaves the engine state untouched; the category only tells
/// the caller how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad input shape. Retry with corrected input.
    Validation,
    /// Wrong caller or role for the action.
    Authorization,
    /// Operation illegal in the current lifecycle state.
    State,
    /// Insufficient bond, balance or liquidity.
    Economic,
}

/// Failure reported by the collateral transfer collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BankError {
    #[error("insufficient funds for {holder}: needed {needed}, available {available}")]
    InsufficientFunds {
        holder: String,
        needed: Decimal,
        available: Decimal,
    },

    #[error("transfer rejected: {0}")]
    Rejected(String),
}

/// Failure reported by a proof verifier
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProofError {
    #[error("malformed proof: {0}")]
    Malformed(String),

    #[error("attestation signature does not verify under the holder's current key")]
    BadSignature,
}

/// Failure reported by the arbitration oracle
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArbitrationError {
    #[error("arbitration unavailable: {0}")]
    Unavailable(String),
}

/// Error types for engine operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    // --- Validation ---
    /// Amount not strictly positive or finer than the collateral precision
    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    #[error("Unknown market: {0}")]
    UnknownMarket(MarketId),

    #[error("Unknown bond: {0}")]
    UnknownBond(BondId),

    /// Liquidity parameter must be positive and within the configured cap
    #[error("Invalid liquidity parameter: {0}")]
    InvalidLiquidity(Decimal),

    #[error("Invalid market: {0}")]
    InvalidMarket(String),

    #[error("Invalid payout vector: {0}")]
    InvalidPayout(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Invalid proof: {0}")]
    InvalidProof(#[from] ProofError),

    #[error("Commitment {0} already queued")]
    DuplicateCommitment(String),

    #[error("Epoch mismatch: current epoch is {current}, got {requested}")]
    EpochMismatch { current: u64, requested: u64 },

    #[error("Arbitration ticket mismatch on market {0}")]
    TicketMismatch(MarketId),

    #[error("Arithmetic overflow")]
    Overflow,

    #[error("JSON serialization error: {0}")]
    Json(String),

    // --- Authorization ---
    #[error("Unauthorized: {caller} may not {action}")]
    Unauthorized { caller: String, action: &'static str },

    // --- State ---
    #[error("Market {market} is {state:?}; cannot {action}")]
    InvalidState {
        market: MarketId,
        state: MarketState,
        action: &'static str,
    },

    #[error("Market {0} already finalized")]
    AlreadyFinalized(MarketId),

    #[error("Market {0} not resolved")]
    MarketNotResolved(MarketId),

    #[error("Market {0} is past its trading deadline; split rejected")]
    AlreadySplitPastDeadline(MarketId),

    #[error("Trading closed on market {0}")]
    TradingClosed(MarketId),

    #[error("Challenge window expired on market {0}")]
    ChallengeWindowExpired(MarketId),

    #[error("Challenge window still open on market {0}")]
    ChallengeWindowOpen(MarketId),

    #[error("No active report on market {0}")]
    NoActiveReport(MarketId),

    #[error("Report on market {0} already challenged")]
    AlreadyChallenged(MarketId),

    #[error("Arbitration pending on market {0}")]
    ArbitrationPending(MarketId),

    #[error("Bond {0} already settled")]
    BondAlreadySettled(BondId),

    #[error("Key already registered for {0}")]
    KeyAlreadyRegistered(String),

    #[error("No key registered for {0}")]
    KeyNotRegistered(String),

    #[error("Privacy layer disabled on market {0}")]
    PrivacyDisabled(MarketId),

    #[error("Request already in flight for {0}")]
    RequestInFlight(String),

    #[error("Condition {0} not resolved by the feed")]
    ConditionUnresolved(String),

    // --- Economic ---
    #[error("Insufficient balance: needed {needed}, available {available}")]
    InsufficientBalance { needed: Decimal, available: Decimal },

    #[error("Bond too low: required {required}, offered {offered}")]
    BondTooLow { required: Decimal, offered: Decimal },

    #[error("Slippage exceeded: cost {cost} above limit {limit}")]
    SlippageExceeded { cost: Decimal, limit: Decimal },

    #[error("Return too low: {received} below limit {limit}")]
    ReturnTooLow { received: Decimal, limit: Decimal },

    #[error("Market maker inventory exhausted on market {0}")]
    InsufficientLiquidity(MarketId),

    #[error("Collateral transfer failed: {0}")]
    Bank(#[from] BankError),

    #[error("Arbitration failed: {0}")]
    Arbitration(#[from] ArbitrationError),
}

impl EngineError {
    /// Category of this error
    pub fn category(&self) -> ErrorCategory {
        use EngineError::*;
        match self {
            InvalidAmount(_)
            | UnknownMarket(_)
            | UnknownBond(_)
            | InvalidLiquidity(_)
            | InvalidMarket(_)
            | InvalidPayout(_)
            | InvalidConfig(_)
            | InvalidKey(_)
            | InvalidSignature(_)
            | InvalidProof(_)
            | DuplicateCommitment(_)
            | EpochMismatch { .. }
            | TicketMismatch(_)
            | Overflow
            | Json(_) => ErrorCategory::Validation,
            Unauthorized { .. } => ErrorCategory::Authorization,
            InvalidState { .. }
            | AlreadyFinalized(_)
            | MarketNotResolved(_)
            | AlreadySplitPastDeadline(_)
            | TradingClosed(_)
            | ChallengeWindowExpired(_)
            | ChallengeWindowOpen(_)
            | NoActiveReport(_)
            | AlreadyChallenged(_)
            | ArbitrationPending(_)
            | BondAlreadySettled(_)
            | KeyAlreadyRegistered(_)
            | KeyNotRegistered(_)
            | PrivacyDisabled(_)
            | RequestInFlight(_)
            | ConditionUnresolved(_) => ErrorCategory::State,
            InsufficientBalance { .. }
            | BondTooLow { .. }
            | SlippageExceeded { .. }
            | ReturnTooLow { .. }
            | InsufficientLiquidity(_)
            | Bank(_)
            | Arbitration(_) => ErrorCategory::Economic,
        }
    }

    pub(crate) fn unauthorized(caller: &impl ToString, action: &'static str) -> Self {
        Self::Unauthorized {
            caller: caller.to_string(),
            action,
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_categories() {
        assert_eq!(
            EngineError::InvalidAmount(dec!(0)).category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            EngineError::unauthorized(&"mallory", "finalize").category(),
            ErrorCategory::Authorization
        );
        assert_eq!(
            EngineError::AlreadyFinalized(MarketId(1)).category(),
            ErrorCategory::State
        );
        assert_eq!(
            EngineError::BondTooLow {
                required: dec!(100),
                offered: dec!(100)
            }
            .category(),
            ErrorCategory::Economic
        );
    }

    #[test]
    fn test_collaborator_errors_convert() {
        let err: EngineError = BankError::Rejected("frozen".to_string()).into();
        assert_eq!(err.category(), ErrorCategory::Economic);
        assert!(err.to_string().contains("frozen"));

        let err: EngineError = ProofError::BadSignature.into();
        assert_eq!(err.category(), ErrorCategory::Validation);
    }
}
