//! Common test utilities for condmarket-core tests.
//!
//! Funded engines, deterministic keys and a standard market, shared by the
//! unit tests of every module.

use crate::collateral::InMemoryBank;
use crate::config::{EngineConfig, MarketParams};
use crate::engine::Engine;
use crate::oracle::QueuedArbitrator;
use crate::types::{MarketId, Tx};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secp256k1::{Keypair, Secp256k1, SecretKey};

pub type TestEngine = Engine<InMemoryBank, QueuedArbitrator>;

pub const CREATOR: &str = "creator";
pub const ALICE: &str = "alice";
pub const BOB: &str = "bob";
pub const CAROL: &str = "carol";
pub const REPORTER: &str = "reporter";
pub const CHALLENGER: &str = "challenger";
/// Default identities of [`EngineConfig`]
pub const ARBITRATOR: &str = "arbitrator";
pub const TREASURY: &str = "treasury";
pub const COORDINATOR: &str = "batch-coordinator";

/// Trading deadline of [`create_test_market`]
pub const DEADLINE: u64 = 1_000;
pub const STARTING_BALANCE: Decimal = dec!(10000);

/// Route engine logs to the test output. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Deterministic keypair for `index` (must be non-zero)
pub fn test_keypair(index: u8) -> Keypair {
    let secp = Secp256k1::new();
    let mut secret_bytes = [0u8; 32];
    secret_bytes[0] = index;
    secret_bytes[31] = index;
    let secret_key = SecretKey::from_slice(&secret_bytes).unwrap();
    Keypair::from_secret_key(&secp, &secret_key)
}

/// Engine with default configuration and every named participant funded
pub fn test_engine() -> TestEngine {
    test_engine_with(EngineConfig::default())
}

pub fn test_engine_with(config: EngineConfig) -> TestEngine {
    let mut bank = InMemoryBank::new();
    for holder in [CREATOR, ALICE, BOB, CAROL, REPORTER, CHALLENGER] {
        bank.fund(holder, STARTING_BALANCE);
    }
    Engine::new(config, bank, QueuedArbitrator::new()).unwrap()
}

/// Market created by [`CREATOR`] at time zero, trading until [`DEADLINE`]
pub fn create_test_market(engine: &mut TestEngine, liquidity: Decimal) -> MarketId {
    let params = MarketParams::new("Will the proposal raise revenue?", liquidity, DEADLINE);
    engine.create_market(&Tx::new(CREATOR, 0), params).unwrap()
}
