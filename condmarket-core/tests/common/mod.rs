// Shared fixtures for the integration tests

#![allow(dead_code)]

use condmarket_core::{Engine, EngineConfig, HolderId, InMemoryBank, MarketId, MarketParams, QueuedArbitrator, Tx};
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
pub const ARBITRATOR: &str = "arbitrator";
pub const TREASURY: &str = "treasury";
pub const COORDINATOR: &str = "batch-coordinator";

pub const FUNDED: [&str; 6] = [CREATOR, ALICE, BOB, CAROL, REPORTER, CHALLENGER];
pub const TRADERS: [&str; 3] = [ALICE, BOB, CAROL];

pub const DEADLINE: u64 = 1_000;
pub const STARTING_BALANCE: Decimal = dec!(10000);

pub fn engine() -> TestEngine {
    engine_with(EngineConfig::default())
}

pub fn engine_with(config: EngineConfig) -> TestEngine {
    let mut bank = InMemoryBank::new();
    for holder in FUNDED {
        bank.fund(holder, STARTING_BALANCE);
    }
    Engine::new(config, bank, QueuedArbitrator::new()).expect("default config is valid")
}

pub fn market(engine: &mut TestEngine, liquidity: Decimal) -> anyhow::Result<MarketId> {
    let params = MarketParams::new("Will the proposal raise revenue?", liquidity, DEADLINE);
    Ok(engine.create_market(&Tx::new(CREATOR, 0), params)?)
}

pub fn balance(engine: &TestEngine, holder: &str) -> Decimal {
    engine.bank().balance(&HolderId::from(holder))
}

pub fn keypair(index: u8) -> Keypair {
    let secp = Secp256k1::new();
    let mut secret_bytes = [0u8; 32];
    secret_bytes[0] = index;
    secret_bytes[31] = index;
    let secret_key = SecretKey::from_slice(&secret_bytes).expect("non-zero test key");
    Keypair::from_secret_key(&secp, &secret_key)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
