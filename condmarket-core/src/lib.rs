//! # Condmarket Core
//!
//! Engine for conditional-outcome markets: markets whose two outcome tokens pay
//! out according to whether a proposal passes or fails.
//!
//! This library provides:
//! - Conditional-token accounting where one unit of collateral splits into one
//!   pass and one fail token, and merges back
//! - An LMSR automated market maker per market, with loss bounded by `b * ln 2`
//! - A market lifecycle from creation through reporting, disputes and execution
//! - Bonded oracle reports with challenges escalated to an external arbitrator
//! - Private markets where positions arrive as sealed, proof-backed commitments
//!   that are opened and applied in epoch batches
//!
//! ## Collaborators
//!
//! The engine never moves collateral itself. Transfers go through a
//! [`CollateralBank`], disputes through an [`ArbitrationOracle`], commitment
//! proofs through a [`ProofVerifier`]. [`InMemoryBank`], [`QueuedArbitrator`]
//! and [`SchnorrAttestationVerifier`] are the reference implementations.
//!
//! ## Examples
//!
//! ```rust
//! use condmarket_core::{
//!     Engine, EngineConfig, InMemoryBank, MarketParams, Outcome, QueuedArbitrator, Tx,
//! };
//! use rust_decimal_macros::dec;
//!
//! let mut bank = InMemoryBank::new();
//! bank.fund("creator", dec!(1000));
//! bank.fund("alice", dec!(1000));
//! let mut engine = Engine::new(EngineConfig::default(), bank, QueuedArbitrator::new())?;
//!
//! let params = MarketParams::new("Will the proposal raise revenue?", dec!(100), 86_400);
//! let market = engine.create_market(&Tx::new("creator", 0), params)?;
//!
//! let quote = engine.buy(&Tx::new("alice", 60), market, Outcome::Pass, dec!(10), dec!(10))?;
//! println!("paid {} for 10 pass tokens", quote.total);
//! # Ok::<(), condmarket_core::EngineError>(())
//! ```

pub mod collateral;
pub mod commitment;
pub mod config;
pub mod dispute;
pub mod engine;
pub mod error;
pub mod events;
pub mod keys;
pub mod ledger;
pub mod lmsr;
pub mod market;
pub mod oracle;
pub mod types;
pub mod utils;

#[cfg(test)]
pub mod test_utils;

pub use collateral::{CollateralBank, InMemoryBank, Transfers};
pub use commitment::{
    BatchReport, Commitment, Direction, DropReason, EncryptedPosition, Openings, PositionOpening, PositionProof,
    ProofVerifier, SchnorrAttestationVerifier,
};
pub use config::{EngineConfig, MarketParams};
pub use dispute::{Bond, BondKind, BondStatus, Challenge, OracleReport};
pub use engine::Engine;
pub use error::{ArbitrationError, BankError, EngineError, ErrorCategory, ProofError, Result};
pub use events::{EngineEvent, EventKind};
pub use keys::KeyRecord;
pub use ledger::{EscrowAudit, Position};
pub use market::{Market, MarketState, TradeQuote, TradeSide};
pub use oracle::{
    ArbitrationOracle, ArbitrationRequest, ArbitrationTicket, ConditionFeed, ConditionOutcome, QueuedArbitrator,
    StaticConditionFeed, Verdict,
};
pub use types::{BetKind, BondId, HolderId, MarketId, Outcome, Payout, ReportId, Timestamp, Tx};
