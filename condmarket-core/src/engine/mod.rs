//! # Engine
//!
//! The facade every request enters through. The engine owns a flat store of
//! markets, positions, bonds, reports, challenges, keys and queued
//! commitments; records reference each other by id only.
//!
//! Each mutating operation runs in two committed steps:
//!
//! 1. clock-driven transitions due at `tx.now` (deadline expiry, challenge
//!    window elapse), together with the transfers they release;
//! 2. the requested operation itself.
//!
//! A step either commits entirely or leaves the store as it was: the store is
//! snapshotted before the step and restored on error, events it emitted are
//! discarded, and collateral transfers staged during the step reach the bank
//! only after it succeeded.
//!
//! The event log and the commitment queue only grow, so they live outside
//! the snapshot. Events roll back by truncation; the queue is only touched
//! once nothing else in the step can fail.

mod privacy;
mod resolution;
mod trading;

use crate::collateral::{CollateralBank, Transfers};
use crate::commitment::{CommitmentQueue, EncryptedPosition, EpochParams, ProofVerifier, SchnorrAttestationVerifier};
use crate::config::{EngineConfig, MarketParams};
use crate::dispute::{slash_split, Bond, BondKind, Challenge, OracleReport};
use crate::events::{EngineEvent, EventKind, EventLog};
use crate::keys::KeyRecord;
use crate::ledger::{EscrowAudit, Ledger, Position};
use crate::market::{Market, MarketState};
use crate::oracle::ArbitrationOracle;
use crate::types::{BondId, HolderId, MarketId, Outcome, ReportId, Tx};
use crate::utils::{format_timestamp, round_up, validate_amount};
use crate::{error::Result, lmsr, EngineError};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Market, ledger, dispute and key records restored when a step fails
#[derive(Debug, Clone, Default)]
struct Store {
    markets: BTreeMap<MarketId, Market>,
    ledger: Ledger,
    bonds: BTreeMap<BondId, Bond>,
    reports: BTreeMap<ReportId, OracleReport>,
    /// Keyed by the challenged report
    challenges: BTreeMap<ReportId, Challenge>,
    keys: BTreeMap<HolderId, KeyRecord>,
    last_market: u64,
    last_bond: u64,
    last_report: u64,
}

/// Conditional-outcome market engine
pub struct Engine<B, A, V = SchnorrAttestationVerifier> {
    config: EngineConfig,
    store: Store,
    queue: CommitmentQueue,
    events: EventLog,
    bank: B,
    arbitrator: A,
    verifier: V,
}

impl<B: CollateralBank, A: ArbitrationOracle> Engine<B, A> {
    /// Engine with the reference commitment verifier
    pub fn new(config: EngineConfig, bank: B, arbitrator: A) -> Result<Self> {
        Self::with_verifier(config, bank, arbitrator, SchnorrAttestationVerifier)
    }
}

impl<B: CollateralBank, A: ArbitrationOracle, V: ProofVerifier> Engine<B, A, V> {
    pub fn with_verifier(config: EngineConfig, bank: B, arbitrator: A, verifier: V) -> Result<Self> {
        config.validate()?;
        info!(
            challenge_window = config.challenge_window,
            min_report_bond = %config.min_report_bond,
            protocol_fee_bps = config.protocol_fee_bps,
            "engine initialized"
        );
        Ok(Self {
            config,
            store: Store::default(),
            queue: CommitmentQueue::default(),
            events: EventLog::default(),
            bank,
            arbitrator,
            verifier,
        })
    }

    // --- Transactions ---

    /// Run `op` as one all-or-nothing step
    fn atomically<T>(&mut self, op: impl FnOnce(&mut Self, &mut Transfers) -> Result<T>) -> Result<T> {
        let snapshot = self.store.clone();
        let mark = self.events.mark();
        let mut transfers = Transfers::new();
        let result = op(self, &mut transfers).and_then(|value| {
            transfers.preflight(&self.bank)?;
            transfers.settle(&mut self.bank)?;
            Ok(value)
        });
        if result.is_err() {
            self.store = snapshot;
            self.events.rollback(mark);
        }
        result
    }

    /// Apply due clock transitions, then run `op` against the market
    fn transact<T>(
        &mut self,
        tx: &Tx,
        id: MarketId,
        op: impl FnOnce(&mut Self, &mut Transfers) -> Result<T>,
    ) -> Result<T> {
        authenticate(tx)?;
        self.advance(tx, id)?;
        let result = self.atomically(op);
        if let Err(err) = &result {
            debug!(market = %id, caller = %tx.caller, error = %err, "operation rejected");
        }
        result
    }

    /// Commit every clock-driven transition due at `tx.now`
    fn advance(&mut self, tx: &Tx, id: MarketId) -> Result<MarketState> {
        self.atomically(|engine, transfers| loop {
            let market = engine.market(id)?;
            let state = market.state;
            let Some(next) = market.due_transition(tx.now) else {
                return Ok(state);
            };
            if next == MarketState::Finalized {
                engine.finalize_unchallenged(tx, id, transfers)?;
            } else {
                engine.set_state(tx, id, next)?;
            }
        })
    }

    /// Apply clock-driven transitions only
    pub fn tick(&mut self, tx: &Tx, id: MarketId) -> Result<MarketState> {
        authenticate(tx)?;
        self.advance(tx, id)
    }

    // --- Markets ---

    /// Open a market. The caller deposits the market-maker funding
    /// `ceil(b * ln 2)` and, if configured, the proposal bond.
    pub fn create_market(&mut self, tx: &Tx, params: MarketParams) -> Result<MarketId> {
        authenticate(tx)?;
        self.check_params(tx, &params)?;

        self.atomically(|engine, transfers| {
            engine.store.last_market += 1;
            let id = MarketId(engine.store.last_market);
            let funding = round_up(lmsr::max_loss(params.liquidity)?);

            let mut market = Market::new(id, tx.caller.clone(), params, tx.now);
            market.amm.funding = funding;
            let maker = market.market_maker();
            engine.store.ledger.split(&mut market, &maker, funding)?;
            transfers.deposit(&tx.caller, funding);

            let liquidity = market.liquidity;
            let trading_deadline = market.trading_deadline;
            let opens_at_once = market.participation_met();
            engine.store.markets.insert(id, market);
            engine.emit(
                tx,
                Some(id),
                EventKind::MarketCreated {
                    creator: tx.caller.clone(),
                    liquidity,
                    funding,
                    trading_deadline,
                },
            );
            info!(
                market = %id,
                creator = %tx.caller,
                %liquidity,
                %funding,
                deadline = %format_timestamp(trading_deadline),
                "market created"
            );

            let proposal_bond = engine.config.proposal_bond;
            if proposal_bond > Decimal::ZERO {
                let bond = engine.post_bond(tx, id, BondKind::Proposal, proposal_bond, transfers)?;
                engine.market_mut(id)?.proposal_bond = Some(bond);
            }
            if opens_at_once {
                engine.set_state(tx, id, MarketState::Trading)?;
            }
            Ok(id)
        })
    }

    fn check_params(&self, tx: &Tx, params: &MarketParams) -> Result<()> {
        if params.question.trim().is_empty() {
            return Err(EngineError::InvalidMarket("question must not be empty".to_string()));
        }
        if params.collateral_asset.trim().is_empty() {
            return Err(EngineError::InvalidMarket(
                "collateral asset must not be empty".to_string(),
            ));
        }
        validate_amount(params.liquidity).map_err(|_| EngineError::InvalidLiquidity(params.liquidity))?;
        if params.liquidity > self.config.max_liquidity {
            return Err(EngineError::InvalidLiquidity(params.liquidity));
        }
        if params.trading_deadline <= tx.now {
            return Err(EngineError::InvalidMarket(format!(
                "trading deadline {} is not after {}",
                format_timestamp(params.trading_deadline),
                format_timestamp(tx.now)
            )));
        }
        if params.min_participation.is_sign_negative() {
            return Err(EngineError::InvalidAmount(params.min_participation));
        }
        if params
            .designated_reporter
            .as_ref()
            .is_some_and(HolderId::is_market_maker)
        {
            return Err(EngineError::InvalidMarket(
                "designated reporter uses the reserved market-maker prefix".to_string(),
            ));
        }
        Ok(())
    }

    // --- Store helpers ---

    fn market_mut(&mut self, id: MarketId) -> Result<&mut Market> {
        self.store
            .markets
            .get_mut(&id)
            .ok_or(EngineError::UnknownMarket(id))
    }

    fn market_and_ledger(&mut self, id: MarketId) -> Result<(&mut Market, &mut Ledger)> {
        let store = &mut self.store;
        let market = store
            .markets
            .get_mut(&id)
            .ok_or(EngineError::UnknownMarket(id))?;
        Ok((market, &mut store.ledger))
    }

    fn bond_mut(&mut self, id: BondId) -> Result<&mut Bond> {
        self.store.bonds.get_mut(&id).ok_or(EngineError::UnknownBond(id))
    }

    fn emit(&mut self, tx: &Tx, market: Option<MarketId>, kind: EventKind) {
        self.events.push(market, tx.now, &tx.caller, kind);
    }

    fn set_state(&mut self, tx: &Tx, id: MarketId, next: MarketState) -> Result<()> {
        let from = self.market_mut(id)?.transition(next)?;
        self.note_state_change(tx, id, from, next);
        Ok(())
    }

    fn note_state_change(&mut self, tx: &Tx, id: MarketId, from: MarketState, to: MarketState) {
        info!(
            market = %id,
            %from,
            %to,
            at = %format_timestamp(tx.now),
            "market state changed"
        );
        self.emit(tx, Some(id), EventKind::StateChanged { from, to });
    }

    // --- Bonds ---

    fn post_bond(
        &mut self,
        tx: &Tx,
        market: MarketId,
        kind: BondKind,
        amount: Decimal,
        transfers: &mut Transfers,
    ) -> Result<BondId> {
        validate_amount(amount)?;
        self.store.last_bond += 1;
        let id = BondId(self.store.last_bond);
        self.store
            .bonds
            .insert(id, Bond::new(id, market, tx.caller.clone(), kind, amount));
        transfers.deposit(&tx.caller, amount);

        self.emit(
            tx,
            Some(market),
            EventKind::BondPosted {
                bond: id,
                kind,
                poster: tx.caller.clone(),
                amount,
            },
        );
        debug!(market = %market, bond = %id, ?kind, %amount, "bond posted");
        Ok(id)
    }

    fn return_bond(&mut self, tx: &Tx, id: BondId, transfers: &mut Transfers) -> Result<()> {
        let bond = self.bond_mut(id)?;
        bond.mark_returned()?;
        let (market, poster, amount) = (bond.market, bond.poster.clone(), bond.amount);
        transfers.payout(&poster, amount);

        self.emit(
            tx,
            Some(market),
            EventKind::BondReturned {
                bond: id,
                to: poster,
                amount,
            },
        );
        Ok(())
    }

    /// Slash a bond to `winner`, keeping `fee_bps` for the treasury
    fn slash_bond(
        &mut self,
        tx: &Tx,
        id: BondId,
        winner: &HolderId,
        fee_bps: u32,
        transfers: &mut Transfers,
    ) -> Result<()> {
        let bond = self.bond_mut(id)?;
        bond.mark_slashed()?;
        let (market, amount) = (bond.market, bond.amount);
        let split = slash_split(amount, fee_bps)?;
        transfers.payout(winner, split.to_winner);
        transfers.payout(&self.config.treasury, split.protocol_fee);

        info!(
            market = %market,
            bond = %id,
            %amount,
            winner = %winner,
            protocol_fee = %split.protocol_fee,
            "bond slashed"
        );
        self.emit(
            tx,
            Some(market),
            EventKind::BondSlashed {
                bond: id,
                to: winner.clone(),
                amount: split.to_winner,
                protocol_fee: split.protocol_fee,
            },
        );
        Ok(())
    }

    // --- Queries ---

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn bank(&self) -> &B {
        &self.bank
    }

    pub fn bank_mut(&mut self) -> &mut B {
        &mut self.bank
    }

    pub fn arbitrator(&self) -> &A {
        &self.arbitrator
    }

    pub fn arbitrator_mut(&mut self) -> &mut A {
        &mut self.arbitrator
    }

    pub fn market(&self, id: MarketId) -> Result<&Market> {
        self.store.markets.get(&id).ok_or(EngineError::UnknownMarket(id))
    }

    pub fn markets(&self) -> impl Iterator<Item = &Market> {
        self.store.markets.values()
    }

    pub fn position(&self, id: MarketId, holder: &HolderId) -> Result<Position> {
        self.market(id)?;
        Ok(self.store.ledger.position(id, holder))
    }

    pub fn positions(&self, id: MarketId) -> Result<Vec<Position>> {
        self.market(id)?;
        Ok(self.store.ledger.positions(id).cloned().collect())
    }

    /// Instantaneous `(P(pass), P(fail))` quoted by the market maker
    pub fn prices(&self, id: MarketId) -> Result<(Decimal, Decimal)> {
        let market = self.market(id)?;
        lmsr::prices(market.amm.sold_pass, market.amm.sold_fail, market.liquidity)
    }

    pub fn price(&self, id: MarketId, outcome: Outcome) -> Result<Decimal> {
        let market = self.market(id)?;
        lmsr::price(
            market.amm.sold_pass,
            market.amm.sold_fail,
            outcome,
            market.liquidity,
        )
    }

    pub fn bond(&self, id: BondId) -> Result<&Bond> {
        self.store.bonds.get(&id).ok_or(EngineError::UnknownBond(id))
    }

    pub fn report(&self, id: ReportId) -> Option<&OracleReport> {
        self.store.reports.get(&id)
    }

    pub fn active_report(&self, id: MarketId) -> Result<Option<&OracleReport>> {
        Ok(self
            .market(id)?
            .active_report
            .and_then(|report| self.store.reports.get(&report)))
    }

    /// Challenge against `report`, if any
    pub fn challenge(&self, report: ReportId) -> Option<&Challenge> {
        self.store.challenges.get(&report)
    }

    pub fn key_record(&self, holder: &HolderId) -> Option<&KeyRecord> {
        self.store.keys.get(holder)
    }

    pub fn current_epoch(&self) -> u64 {
        self.queue.current_epoch()
    }

    pub fn epoch_params(&self) -> EpochParams {
        self.queue.epoch_params()
    }

    pub fn pending_batch_size(&self) -> usize {
        self.queue.len()
    }

    /// Queued commitments; openings are only revealed at batch time
    pub fn pending_commitments(&self) -> &[EncryptedPosition] {
        self.queue.pending()
    }

    /// Recompute the conservation sums of `id`
    pub fn audit(&self, id: MarketId) -> Result<EscrowAudit> {
        self.store.ledger.audit(self.market(id)?)
    }

    pub fn events(&self) -> &[EngineEvent] {
        self.events.pending()
    }

    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        self.events.drain()
    }
}

/// Reject callers that cannot act on their own behalf
fn authenticate(tx: &Tx) -> Result<()> {
    if tx.caller.as_str().trim().is_empty() {
        return Err(EngineError::unauthorized(&tx.caller, "act anonymously"));
    }
    if tx.caller.is_market_maker() {
        return Err(EngineError::unauthorized(&tx.caller, "act as a market maker"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use crate::types::Payout;
    use rust_decimal_macros::dec;

    #[test]
    fn test_create_market_funds_the_maker() {
        init_tracing();
        let mut engine = test_engine();
        let id = create_test_market(&mut engine, dec!(100));

        let market = engine.market(id).unwrap();
        assert_eq!(market.state, MarketState::Trading);
        // ceil(100 * ln 2) at 8 places
        assert_eq!(market.amm.funding, dec!(69.31471806));
        let maker = engine.position(id, &market.market_maker()).unwrap();
        assert_eq!(maker.pass, dec!(69.31471806));
        assert_eq!(maker.fail, dec!(69.31471806));
        assert_eq!(
            engine.bank().balance(&HolderId::from(CREATOR)),
            STARTING_BALANCE - dec!(69.31471806)
        );
        assert!(engine.audit(id).unwrap().is_consistent());
        assert_eq!(engine.prices(id).unwrap(), (dec!(0.5), dec!(0.5)));
    }

    #[test]
    fn test_create_market_validation() {
        let mut engine = test_engine();
        let tx = Tx::new(CREATOR, 100);

        let err = engine
            .create_market(&tx, MarketParams::new("Q?", dec!(0), 1_000))
            .unwrap_err();
        assert_eq!(err, EngineError::InvalidLiquidity(dec!(0)));

        let err = engine
            .create_market(&tx, MarketParams::new("Q?", dec!(10), 100))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidMarket(_)));

        let err = engine
            .create_market(&tx, MarketParams::new("  ", dec!(10), 1_000))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidMarket(_)));

        let err = engine
            .create_market(&tx, MarketParams::new("Q?", dec!(2000000000), 1_000))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidLiquidity(_)));
        assert_eq!(engine.markets().count(), 0);
    }

    #[test]
    fn test_market_maker_cannot_call() {
        let mut engine = test_engine();
        let id = create_test_market(&mut engine, dec!(100));
        let tx = Tx::new(HolderId::market_maker(id), 10);
        let err = engine.split(&tx, id, dec!(1)).unwrap_err();
        assert!(matches!(err, EngineError::Unauthorized { .. }));
    }

    #[test]
    fn test_unfunded_creator_leaves_no_trace() {
        let mut engine = test_engine();
        let tx = Tx::new("pauper", 0);
        let err = engine
            .create_market(&tx, MarketParams::new("Q?", dec!(100), 1_000))
            .unwrap_err();
        assert!(matches!(err, EngineError::Bank(_)));
        assert_eq!(engine.markets().count(), 0);
        assert!(engine.events().is_empty());

        // the id is not burnt either
        let id = create_test_market(&mut engine, dec!(100));
        assert_eq!(id, MarketId(1));
    }

    #[test]
    fn test_proposal_bond_locked_at_creation() {
        let config = EngineConfig {
            proposal_bond: dec!(25),
            ..EngineConfig::default()
        };
        let mut engine = test_engine_with(config);
        let id = create_test_market(&mut engine, dec!(10));
        let bond_id = engine.market(id).unwrap().proposal_bond.unwrap();
        let bond = engine.bond(bond_id).unwrap();
        assert_eq!(bond.amount, dec!(25));
        assert_eq!(bond.kind, BondKind::Proposal);
        assert!(bond.is_locked());
    }

    #[test]
    fn test_min_participation_gates_trading() {
        let mut engine = test_engine();
        let tx = Tx::new(CREATOR, 0);
        let params = MarketParams::new("Q?", dec!(50), DEADLINE).with_min_participation(dec!(30));
        let id = engine.create_market(&tx, params).unwrap();
        assert_eq!(engine.market(id).unwrap().state, MarketState::Created);

        engine.split(&Tx::new(ALICE, 10), id, dec!(20)).unwrap();
        assert_eq!(engine.market(id).unwrap().state, MarketState::Created);
        engine.split(&Tx::new(BOB, 20), id, dec!(10)).unwrap();
        assert_eq!(engine.market(id).unwrap().state, MarketState::Trading);
    }

    #[test]
    fn test_deadline_cancels_underfunded_market() {
        let mut engine = test_engine();
        let params = MarketParams::new("Q?", dec!(50), DEADLINE).with_min_participation(dec!(30));
        let id = engine.create_market(&Tx::new(CREATOR, 0), params).unwrap();
        engine.split(&Tx::new(ALICE, 10), id, dec!(5)).unwrap();

        assert_eq!(engine.tick(&Tx::new(ALICE, DEADLINE), id).unwrap(), MarketState::Cancelled);
        let err = engine.split(&Tx::new(ALICE, DEADLINE + 1), id, dec!(5)).unwrap_err();
        assert_eq!(err, EngineError::AlreadySplitPastDeadline(id));

        // merging out is still possible before the refund
        engine.merge(&Tx::new(ALICE, DEADLINE + 2), id, dec!(5)).unwrap();
        assert_eq!(engine.bank().balance(&HolderId::from(ALICE)), STARTING_BALANCE);
    }

    #[test]
    fn test_stale_trade_keeps_expiry_transition() {
        let mut engine = test_engine();
        let id = create_test_market(&mut engine, dec!(100));
        engine.split(&Tx::new(ALICE, 10), id, dec!(10)).unwrap();

        let err = engine
            .buy(&Tx::new(BOB, DEADLINE), id, Outcome::Pass, dec!(5), dec!(100))
            .unwrap_err();
        assert_eq!(err, EngineError::TradingClosed(id));
        assert_eq!(engine.market(id).unwrap().state, MarketState::AwaitingReport);
    }

    #[test]
    fn test_failed_operation_rolls_back_events() {
        let mut engine = test_engine();
        let id = create_test_market(&mut engine, dec!(100));
        let before = engine.events().len();
        assert!(engine.merge(&Tx::new(ALICE, 10), id, dec!(1)).is_err());
        assert_eq!(engine.events().len(), before);

        // the split event is emitted before settlement fails
        let err = engine.split(&Tx::new("pauper", 11), id, dec!(5)).unwrap_err();
        assert!(matches!(err, EngineError::Bank(_)));
        assert_eq!(engine.events().len(), before);

        engine.split(&Tx::new(ALICE, 12), id, dec!(5)).unwrap();
        let last = engine.events().last().unwrap();
        assert_eq!(last.seq, before as u64);
        assert_eq!(
            last.kind,
            EventKind::Split {
                holder: HolderId::from(ALICE),
                amount: dec!(5)
            }
        );
    }

    #[test]
    fn test_events_drain_as_json() {
        let mut engine = test_engine();
        let id = create_test_market(&mut engine, dec!(100));
        let events = engine.drain_events();
        assert!(engine.events().is_empty());
        assert!(matches!(events[0].kind, EventKind::MarketCreated { .. }));
        assert!(events
            .iter()
            .any(|e| e.kind == EventKind::StateChanged {
                from: MarketState::Created,
                to: MarketState::Trading
            }));
        for event in &events {
            assert_eq!(event.market, Some(id));
            assert!(event.to_json().unwrap().contains("\"seq\""));
        }
    }

    #[test]
    fn test_unknown_market() {
        let mut engine = test_engine();
        let err = engine.tick(&Tx::new(ALICE, 0), MarketId(42)).unwrap_err();
        assert_eq!(err, EngineError::UnknownMarket(MarketId(42)));
        assert!(engine.prices(MarketId(42)).is_err());
    }

    #[test]
    fn test_full_lifecycle_reaches_executed() {
        let mut engine = test_engine();
        let id = create_test_market(&mut engine, dec!(100));
        engine.split(&Tx::new(ALICE, 10), id, dec!(40)).unwrap();

        engine
            .submit_report(&Tx::new(REPORTER, DEADLINE), id, dec!(1), dec!(0), "ipfs://report", dec!(100))
            .unwrap();
        let window_end = DEADLINE + engine.config().challenge_window;
        assert_eq!(
            engine.finalize(&Tx::new(ALICE, window_end - 1), id).unwrap_err(),
            EngineError::ChallengeWindowOpen(id)
        );
        engine.finalize(&Tx::new(ALICE, window_end), id).unwrap();
        assert_eq!(engine.market(id).unwrap().pending_payout, Some(Payout::PASS));

        assert_eq!(engine.execute(&Tx::new(ALICE, window_end), id).unwrap(), MarketState::Executed);
        assert_eq!(engine.redeem(&Tx::new(ALICE, window_end), id).unwrap(), dec!(40));
    }
}
