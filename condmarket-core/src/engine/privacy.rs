//! Holder keys and the commitment gate of private markets.

use super::{authenticate, Engine};
use crate::collateral::CollateralBank;
use crate::commitment::{
    BatchReport, Commitment, Direction, DropReason, EncryptedPosition, Openings, PositionProof, ProofContext,
    ProofVerifier,
};
use crate::events::EventKind;
use crate::keys::KeyRecord;
use crate::oracle::ArbitrationOracle;
use crate::types::{MarketId, Tx};
use crate::{error::Result, EngineError};
use secp256k1::XOnlyPublicKey;
use tracing::{debug, info, warn};

impl<B: CollateralBank, A: ArbitrationOracle, V: ProofVerifier> Engine<B, A, V> {
    /// Register the caller's attestation key at generation zero
    pub fn register_key(&mut self, tx: &Tx, public_key: XOnlyPublicKey) -> Result<()> {
        authenticate(tx)?;
        self.atomically(|engine, _| {
            if engine.store.keys.contains_key(&tx.caller) {
                return Err(EngineError::KeyAlreadyRegistered(tx.caller.to_string()));
            }
            let record = KeyRecord::new(tx.caller.clone(), public_key);
            info!(holder = %tx.caller, key = %record.public_key_hex(), "key registered");
            engine.store.keys.insert(tx.caller.clone(), record);
            engine.emit(
                tx,
                None,
                EventKind::KeyRegistered {
                    holder: tx.caller.clone(),
                },
            );
            Ok(())
        })
    }

    /// Replace the caller's key. `signature` is made with the current key
    /// over the rotation digest of the next generation.
    pub fn rotate_key(&mut self, tx: &Tx, new_key: XOnlyPublicKey, signature: &[u8]) -> Result<u64> {
        authenticate(tx)?;
        self.atomically(|engine, _| {
            let record = engine
                .store
                .keys
                .get_mut(&tx.caller)
                .ok_or_else(|| EngineError::KeyNotRegistered(tx.caller.to_string()))?;
            let (generation, key) = {
                let mut guard = record.acquire()?;
                let generation = guard.rotate(new_key, signature)?;
                (generation, guard.public_key_hex())
            };
            engine.emit(
                tx,
                None,
                EventKind::KeyRotated {
                    holder: tx.caller.clone(),
                    generation,
                },
            );
            info!(holder = %tx.caller, generation, %key, "key rotated");
            Ok(generation)
        })
    }

    /// Queue a commitment to a split or merge on a private market. The proof
    /// is checked against the current epoch and the caller's current key;
    /// the commitment itself stays sealed until its batch.
    pub fn submit_encrypted_position(
        &mut self,
        tx: &Tx,
        id: MarketId,
        commitment: Commitment,
        proof: PositionProof,
    ) -> Result<()> {
        let position = self.transact(tx, id, |engine, _| {
            if !engine.market(id)?.privacy {
                return Err(EngineError::PrivacyDisabled(id));
            }
            if engine.queue.contains(&commitment) {
                return Err(EngineError::DuplicateCommitment(commitment.to_string()));
            }
            let epoch = engine.queue.epoch_params();

            let record = engine
                .store
                .keys
                .get_mut(&tx.caller)
                .ok_or_else(|| EngineError::KeyNotRegistered(tx.caller.to_string()))?;
            let guard = record.acquire()?;
            let context = ProofContext {
                market: id,
                holder: &tx.caller,
                public_key: &guard.public_key,
                generation: guard.generation,
                epoch: &epoch,
            };
            engine
                .verifier
                .verify(&context, &commitment, &proof)
                .map_err(|err| {
                    debug!(market = %id, holder = %tx.caller, %commitment, error = %err, "proof rejected");
                    EngineError::InvalidProof(err)
                })?;

            Ok(EncryptedPosition {
                commitment,
                proof,
                epoch: epoch.epoch,
                holder: tx.caller.clone(),
                market: id,
                key_generation: guard.generation,
            })
        })?;

        let (epoch, key_generation) = (position.epoch, position.key_generation);
        self.queue.push(position)?;
        self.emit(
            tx,
            Some(id),
            EventKind::CommitmentQueued {
                commitment,
                epoch,
                key_generation,
            },
        );
        debug!(market = %id, holder = %tx.caller, %commitment, epoch, "commitment queued");
        Ok(())
    }

    /// Apply every commitment queued in `epoch` using the openings the
    /// coordinator collected, then open the next epoch.
    ///
    /// Each commitment is its own all-or-nothing step; one that fails is
    /// dropped with its reason and the rest of the batch carries on.
    pub fn process_batch(&mut self, tx: &Tx, epoch: u64, openings: &Openings) -> Result<BatchReport> {
        authenticate(tx)?;
        if tx.caller != self.config.batch_coordinator {
            return Err(EngineError::unauthorized(&tx.caller, "process commitment batches"));
        }

        let (batch, next) = self.queue.close_epoch(epoch)?;
        let mut report = BatchReport {
            epoch,
            ..BatchReport::default()
        };
        for position in batch {
            match self.apply_commitment(tx, &position, openings) {
                Ok(()) => report.applied.push(position.commitment),
                Err(reason) => {
                    warn!(
                        market = %position.market,
                        holder = %position.holder,
                        commitment = %position.commitment,
                        %reason,
                        "commitment dropped"
                    );
                    self.emit(
                        tx,
                        Some(position.market),
                        EventKind::CommitmentDropped {
                            commitment: position.commitment,
                            epoch,
                            reason: reason.to_string(),
                        },
                    );
                    report.dropped.push((position.commitment, reason));
                }
            }
        }

        self.emit(tx, None, EventKind::EpochAdvanced { epoch: next });
        info!(
            epoch,
            next_epoch = next,
            applied = report.applied.len(),
            dropped = report.dropped.len(),
            "batch processed"
        );
        Ok(report)
    }

    fn apply_commitment(
        &mut self,
        tx: &Tx,
        position: &EncryptedPosition,
        openings: &Openings,
    ) -> std::result::Result<(), DropReason> {
        let current = self
            .store
            .keys
            .get(&position.holder)
            .map(|record| record.generation)
            .ok_or_else(|| DropReason::Rejected(EngineError::KeyNotRegistered(position.holder.to_string())))?;
        if current != position.key_generation {
            return Err(DropReason::StaleKeyGeneration {
                committed: position.key_generation,
                current,
            });
        }
        let opening = openings
            .get(&position.commitment)
            .ok_or(DropReason::MissingOpening)?;
        if !position.opens_with(opening) {
            return Err(DropReason::OpeningMismatch);
        }

        self.advance(tx, position.market).map_err(DropReason::Rejected)?;
        self.atomically(|engine, transfers| {
            let (market, holder, amount) = (position.market, &position.holder, opening.amount);
            match opening.direction {
                Direction::Split => engine.open_position(tx, market, holder, amount, transfers)?,
                Direction::Merge => engine.close_position(tx, market, holder, amount, transfers)?,
            }
            engine.emit(
                tx,
                Some(market),
                EventKind::CommitmentApplied {
                    commitment: position.commitment,
                    epoch: position.epoch,
                },
            );
            Ok(())
        })
        .map_err(DropReason::Rejected)
    }
}

#[cfg(test)]
mod tests {
    use crate::commitment::{Commitment, Direction, DropReason, Openings, PositionOpening, PositionProof};
    use crate::config::MarketParams;
    use crate::events::EventKind;
    use crate::keys::sign_rotation;
    use crate::test_utils::*;
    use crate::types::{HolderId, MarketId, Tx};
    use crate::{EngineError, ProofError};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn private_market(engine: &mut TestEngine) -> MarketId {
        let params = MarketParams::new("Private?", dec!(100), DEADLINE).with_privacy();
        engine.create_market(&Tx::new(CREATOR, 0), params).unwrap()
    }

    fn register(engine: &mut TestEngine, holder: &str, key_index: u8) {
        let (public_key, _) = test_keypair(key_index).x_only_public_key();
        engine.register_key(&Tx::new(holder, 1), public_key).unwrap();
    }

    /// Commitment, proof and opening signed with key `key_index` under the
    /// holder's current generation and the engine's current epoch
    fn attest(
        engine: &TestEngine,
        id: MarketId,
        holder: &str,
        key_index: u8,
        direction: Direction,
        amount: Decimal,
        blinding: u8,
    ) -> (Commitment, PositionProof, PositionOpening) {
        let holder = HolderId::from(holder);
        let generation = engine.key_record(&holder).map_or(0, |record| record.generation);
        let opening = PositionOpening {
            direction,
            amount,
            blinding: [blinding; 32],
        };
        let (commitment, proof) =
            PositionProof::attest(&test_keypair(key_index), id, &holder, generation, &engine.epoch_params(), &opening);
        (commitment, proof, opening)
    }

    fn openings<const N: usize>(entries: [(Commitment, PositionOpening); N]) -> Openings {
        entries.into_iter().collect()
    }

    #[test]
    fn test_register_key_once() {
        let mut engine = test_engine();
        register(&mut engine, ALICE, 1);
        let (other, _) = test_keypair(2).x_only_public_key();
        let err = engine.register_key(&Tx::new(ALICE, 2), other).unwrap_err();
        assert_eq!(err, EngineError::KeyAlreadyRegistered(ALICE.to_string()));
        assert_eq!(engine.key_record(&HolderId::from(ALICE)).unwrap().generation, 0);
    }

    #[test]
    fn test_rotation_signed_by_other_key_fails() {
        let mut engine = test_engine();
        register(&mut engine, ALICE, 1);
        let (new_key, _) = test_keypair(2).x_only_public_key();
        let forged = sign_rotation(&test_keypair(9), &HolderId::from(ALICE), &new_key, 1);

        let err = engine.rotate_key(&Tx::new(ALICE, 5), new_key, &forged).unwrap_err();
        assert!(matches!(err, EngineError::InvalidSignature(_)));
        let record = engine.key_record(&HolderId::from(ALICE)).unwrap();
        assert_eq!(record.generation, 0);
        assert!(!record.is_in_flight());
    }

    #[test]
    fn test_commitment_applied_at_batch_time() {
        init_tracing();
        let mut engine = test_engine();
        let id = private_market(&mut engine);
        register(&mut engine, ALICE, 1);

        let (commitment, proof, opening) = attest(&engine, id, ALICE, 1, Direction::Split, dec!(25), 7);
        engine
            .submit_encrypted_position(&Tx::new(ALICE, 10), id, commitment, proof)
            .unwrap();
        assert_eq!(engine.pending_batch_size(), 1);
        // nothing reaches the ledger before the batch
        assert!(engine.position(id, &HolderId::from(ALICE)).unwrap().is_empty());
        assert_eq!(engine.bank().balance(&HolderId::from(ALICE)), STARTING_BALANCE);

        let report = engine
            .process_batch(&Tx::new(COORDINATOR, 20), 0, &openings([(commitment, opening)]))
            .unwrap();
        assert_eq!(report.applied, vec![commitment]);
        assert!(report.dropped.is_empty());
        assert_eq!(engine.current_epoch(), 1);
        assert_eq!(engine.pending_batch_size(), 0);

        let position = engine.position(id, &HolderId::from(ALICE)).unwrap();
        assert_eq!((position.pass, position.fail), (dec!(25), dec!(25)));
        assert_eq!(
            engine.bank().balance(&HolderId::from(ALICE)),
            STARTING_BALANCE - dec!(25)
        );
        assert!(engine
            .events()
            .iter()
            .any(|e| e.kind == EventKind::EpochAdvanced { epoch: 1 }));

        // merge part of it back out in the next epoch
        let (commitment, proof, opening) = attest(&engine, id, ALICE, 1, Direction::Merge, dec!(10), 8);
        engine
            .submit_encrypted_position(&Tx::new(ALICE, 30), id, commitment, proof)
            .unwrap();
        engine
            .process_batch(&Tx::new(COORDINATOR, 40), 1, &openings([(commitment, opening)]))
            .unwrap();
        let position = engine.position(id, &HolderId::from(ALICE)).unwrap();
        assert_eq!(position.pass, dec!(15));
        assert!(engine.audit(id).unwrap().is_consistent());
    }

    #[test]
    fn test_queued_commitments_stay_sealed() {
        let mut engine = test_engine();
        let id = private_market(&mut engine);
        register(&mut engine, ALICE, 1);

        let (commitment, proof, _) = attest(&engine, id, ALICE, 1, Direction::Merge, dec!(987.65), 3);
        engine
            .submit_encrypted_position(&Tx::new(ALICE, 10), id, commitment, proof)
            .unwrap();

        let pending = serde_json::to_string(engine.pending_commitments()).unwrap();
        let events = serde_json::to_string(engine.events()).unwrap();
        for exposed in [pending, events] {
            assert!(!exposed.contains("987.65"));
            assert!(!exposed.contains("Merge"));
            assert!(!exposed.contains("blinding"));
        }
    }

    #[test]
    fn test_missing_or_wrong_opening_dropped() {
        let mut engine = test_engine();
        let id = private_market(&mut engine);
        register(&mut engine, ALICE, 1);
        register(&mut engine, BOB, 2);

        let (unopened, proof, _) = attest(&engine, id, ALICE, 1, Direction::Split, dec!(5), 1);
        engine
            .submit_encrypted_position(&Tx::new(ALICE, 10), id, unopened, proof)
            .unwrap();
        let (inflated, proof, mut opening) = attest(&engine, id, BOB, 2, Direction::Split, dec!(5), 2);
        engine
            .submit_encrypted_position(&Tx::new(BOB, 11), id, inflated, proof)
            .unwrap();
        opening.amount = dec!(500);

        let report = engine
            .process_batch(&Tx::new(COORDINATOR, 20), 0, &openings([(inflated, opening)]))
            .unwrap();
        assert!(report.applied.is_empty());
        assert_eq!(
            report.dropped,
            vec![
                (unopened, DropReason::MissingOpening),
                (inflated, DropReason::OpeningMismatch)
            ]
        );
        assert!(engine.positions(id).unwrap().iter().all(|p| p.holder.is_market_maker()));
        assert_eq!(engine.bank().balance(&HolderId::from(BOB)), STARTING_BALANCE);
    }

    #[test]
    fn test_submission_checks() {
        let mut engine = test_engine();
        let id = private_market(&mut engine);
        let public = create_test_market(&mut engine, dec!(100));
        let tx = Tx::new(ALICE, 10);

        let (commitment, proof, _) = attest(&engine, id, ALICE, 1, Direction::Split, dec!(5), 1);
        let err = engine
            .submit_encrypted_position(&tx, id, commitment, proof.clone())
            .unwrap_err();
        assert_eq!(err, EngineError::KeyNotRegistered(ALICE.to_string()));

        register(&mut engine, ALICE, 1);
        let err = engine
            .submit_encrypted_position(&tx, public, commitment, proof.clone())
            .unwrap_err();
        assert_eq!(err, EngineError::PrivacyDisabled(public));

        engine
            .submit_encrypted_position(&tx, id, commitment, proof.clone())
            .unwrap();
        let err = engine
            .submit_encrypted_position(&tx, id, commitment, proof)
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateCommitment(_)));
        assert_eq!(engine.pending_batch_size(), 1);
    }

    #[test]
    fn test_invalid_proof_is_discarded() {
        let mut engine = test_engine();
        let id = private_market(&mut engine);
        register(&mut engine, ALICE, 1);
        let events_before = engine.events().len();

        // signed with a key Alice never registered
        let (commitment, proof, _) = attest(&engine, id, ALICE, 5, Direction::Split, dec!(5), 1);
        let err = engine
            .submit_encrypted_position(&Tx::new(ALICE, 10), id, commitment, proof)
            .unwrap_err();
        assert_eq!(err, EngineError::InvalidProof(ProofError::BadSignature));

        // signature lifted onto another commitment
        let (_, proof, _) = attest(&engine, id, ALICE, 1, Direction::Split, dec!(5), 2);
        let (other, _, _) = attest(&engine, id, ALICE, 1, Direction::Split, dec!(6), 2);
        let err = engine
            .submit_encrypted_position(&Tx::new(ALICE, 11), id, other, proof)
            .unwrap_err();
        assert_eq!(err, EngineError::InvalidProof(ProofError::BadSignature));

        assert_eq!(engine.pending_batch_size(), 0);
        assert_eq!(engine.events().len(), events_before);
        assert!(!engine.key_record(&HolderId::from(ALICE)).unwrap().is_in_flight());
    }

    #[test]
    fn test_batch_coordinator_and_epoch() {
        let mut engine = test_engine();
        let none = Openings::new();
        let err = engine.process_batch(&Tx::new(ALICE, 10), 0, &none).unwrap_err();
        assert!(matches!(err, EngineError::Unauthorized { .. }));
        let err = engine.process_batch(&Tx::new(COORDINATOR, 10), 3, &none).unwrap_err();
        assert_eq!(err, EngineError::EpochMismatch { current: 0, requested: 3 });

        // an empty batch still advances the epoch
        let report = engine.process_batch(&Tx::new(COORDINATOR, 10), 0, &none).unwrap();
        assert!(report.applied.is_empty());
        assert_eq!(engine.current_epoch(), 1);
    }

    #[test]
    fn test_unfunded_commitment_dropped_alone() {
        let mut engine = test_engine();
        let id = private_market(&mut engine);
        register(&mut engine, "pauper", 3);
        register(&mut engine, BOB, 4);

        let (poor, proof, poor_opening) = attest(&engine, id, "pauper", 3, Direction::Split, dec!(5), 1);
        engine
            .submit_encrypted_position(&Tx::new("pauper", 10), id, poor, proof)
            .unwrap();
        let (funded, proof, funded_opening) = attest(&engine, id, BOB, 4, Direction::Split, dec!(5), 1);
        engine
            .submit_encrypted_position(&Tx::new(BOB, 11), id, funded, proof)
            .unwrap();

        let report = engine
            .process_batch(
                &Tx::new(COORDINATOR, 20),
                0,
                &openings([(poor, poor_opening), (funded, funded_opening)]),
            )
            .unwrap();
        assert_eq!(report.applied, vec![funded]);
        assert_eq!(report.dropped.len(), 1);
        assert!(matches!(
            report.dropped[0],
            (c, DropReason::Rejected(EngineError::Bank(_))) if c == poor
        ));
        assert!(engine.position(id, &HolderId::from("pauper")).unwrap().is_empty());
        assert!(engine.audit(id).unwrap().is_consistent());
    }

    #[test]
    fn test_split_commitment_after_deadline_dropped() {
        let mut engine = test_engine();
        let id = private_market(&mut engine);
        register(&mut engine, ALICE, 1);
        let (commitment, proof, opening) = attest(&engine, id, ALICE, 1, Direction::Split, dec!(5), 1);
        engine
            .submit_encrypted_position(&Tx::new(ALICE, 10), id, commitment, proof)
            .unwrap();

        let report = engine
            .process_batch(&Tx::new(COORDINATOR, DEADLINE), 0, &openings([(commitment, opening)]))
            .unwrap();
        assert_eq!(
            report.dropped,
            vec![(
                commitment,
                DropReason::Rejected(EngineError::AlreadySplitPastDeadline(id))
            )]
        );
    }
}
