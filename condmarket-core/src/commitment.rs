//! # Position Commitments
//!
//! Private markets accept position changes as opaque commitments backed by a
//! validity proof. The engine never sees what a queued commitment contains:
//! the batch coordinator collects openings from holders and hands them over
//! with the batch, and only then is each opening checked against its
//! commitment and applied to the ledger.
//!
//! The proof system sits behind [`ProofVerifier`]. The shipped
//! [`SchnorrAttestationVerifier`] checks that the holder's current key signed
//! the commitment for this market, key generation and epoch:
//!
//! ```text
//! commitment = H("condmarket/position", market | holder | generation | direction | amount | blinding)
//! signature  = schnorr(key, H("condmarket/attest", epoch_seed | market | holder | generation | commitment))
//! epoch_seed = H("condmarket/epoch", epoch)
//! ```

use crate::keys::{sign_digest, verify_schnorr};
use crate::types::{HolderId, MarketId};
use crate::utils::{amount_bytes, tagged_hash};
use crate::{error::Result, EngineError, ProofError};
use rust_decimal::Decimal;
use secp256k1::{Keypair, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

pub const POSITION_TAG: &str = "condmarket/position";
pub const ATTESTATION_TAG: &str = "condmarket/attest";
pub const EPOCH_TAG: &str = "condmarket/epoch";

/// 32-byte commitment to a position change
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Commitment(pub [u8; 32]);

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Ledger operation a commitment requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Split,
    Merge,
}

impl Direction {
    fn tag(self) -> u8 {
        match self {
            Direction::Split => 0,
            Direction::Merge => 1,
        }
    }
}

/// Secret contents of a commitment, revealed to the engine at batch time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionOpening {
    pub direction: Direction,
    pub amount: Decimal,
    pub blinding: [u8; 32],
}

/// Openings for a batch, keyed by the commitment they open
pub type Openings = BTreeMap<Commitment, PositionOpening>;

/// Validity proof accompanying a commitment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionProof {
    /// 64-byte BIP-340 signature over the epoch-bound commitment
    pub signature: Vec<u8>,
}

/// Public parameters of one batching epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochParams {
    pub epoch: u64,
    pub seed: [u8; 32],
}

impl EpochParams {
    pub fn for_epoch(epoch: u64) -> Self {
        Self {
            epoch,
            seed: tagged_hash(EPOCH_TAG, &[&epoch.to_be_bytes()]),
        }
    }
}

/// Everything a verifier may bind a proof to
#[derive(Debug, Clone, Copy)]
pub struct ProofContext<'a> {
    pub market: MarketId,
    pub holder: &'a HolderId,
    pub public_key: &'a XOnlyPublicKey,
    pub generation: u64,
    pub epoch: &'a EpochParams,
}

/// Checks a commitment's validity proof without opening it
pub trait ProofVerifier {
    fn verify(
        &self,
        context: &ProofContext<'_>,
        commitment: &Commitment,
        proof: &PositionProof,
    ) -> std::result::Result<(), ProofError>;
}

/// Commitment to `opening` for `holder` at key `generation`
pub fn commit(market: MarketId, holder: &HolderId, generation: u64, opening: &PositionOpening) -> Commitment {
    Commitment(tagged_hash(
        POSITION_TAG,
        &[
            &market.0.to_be_bytes(),
            holder.as_str().as_bytes(),
            &generation.to_be_bytes(),
            &[opening.direction.tag()],
            &amount_bytes(opening.amount),
            &opening.blinding,
        ],
    ))
}

/// Digest the holder signs to attest `commitment` in `context`
pub fn attestation_digest(context: &ProofContext<'_>, commitment: &Commitment) -> [u8; 32] {
    tagged_hash(
        ATTESTATION_TAG,
        &[
            &context.epoch.seed,
            &context.market.0.to_be_bytes(),
            context.holder.as_str().as_bytes(),
            &context.generation.to_be_bytes(),
            &commitment.0,
        ],
    )
}

impl PositionProof {
    /// Commit to `opening` and sign the commitment for the current epoch.
    /// The opening stays with the holder until the batch runs.
    pub fn attest(
        keypair: &Keypair,
        market: MarketId,
        holder: &HolderId,
        generation: u64,
        epoch: &EpochParams,
        opening: &PositionOpening,
    ) -> (Commitment, Self) {
        let commitment = commit(market, holder, generation, opening);
        let (public_key, _) = keypair.x_only_public_key();
        let context = ProofContext {
            market,
            holder,
            public_key: &public_key,
            generation,
            epoch,
        };
        let signature = sign_digest(keypair, attestation_digest(&context, &commitment));
        (commitment, Self { signature })
    }
}

/// Reference verifier for signed commitments
#[derive(Debug, Clone, Copy, Default)]
pub struct SchnorrAttestationVerifier;

impl ProofVerifier for SchnorrAttestationVerifier {
    fn verify(
        &self,
        context: &ProofContext<'_>,
        commitment: &Commitment,
        proof: &PositionProof,
    ) -> std::result::Result<(), ProofError> {
        let digest = attestation_digest(context, commitment);
        verify_schnorr(context.public_key, digest, &proof.signature).map_err(|e| match e {
            EngineError::InvalidSignature(reason) if proof.signature.len() != 64 => {
                ProofError::Malformed(reason)
            }
            _ => ProofError::BadSignature,
        })
    }
}

/// A verified commitment awaiting its batch. Holds nothing that reveals the
/// direction or amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPosition {
    pub commitment: Commitment,
    pub proof: PositionProof,
    pub epoch: u64,
    pub holder: HolderId,
    pub market: MarketId,
    pub key_generation: u64,
}

impl EncryptedPosition {
    /// Whether `opening` is what this commitment hides
    pub fn opens_with(&self, opening: &PositionOpening) -> bool {
        commit(self.market, &self.holder, self.key_generation, opening) == self.commitment
    }
}

/// Why a queued commitment did not reach the ledger
#[derive(Debug, Clone, PartialEq)]
pub enum DropReason {
    /// The holder rotated their key after committing
    StaleKeyGeneration { committed: u64, current: u64 },
    /// The coordinator supplied no opening
    MissingOpening,
    /// The supplied opening does not hash to the commitment
    OpeningMismatch,
    /// The ledger rejected the opened operation
    Rejected(EngineError),
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::StaleKeyGeneration { committed, current } => write!(
                f,
                "stale key generation {committed} (current {current})"
            ),
            DropReason::MissingOpening => f.write_str("no opening supplied"),
            DropReason::OpeningMismatch => f.write_str("opening does not match the commitment"),
            DropReason::Rejected(err) => write!(f, "{err}"),
        }
    }
}

/// Outcome of processing one epoch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub epoch: u64,
    pub applied: Vec<Commitment>,
    pub dropped: Vec<(Commitment, DropReason)>,
}

/// Commitments waiting for the current epoch's batch
#[derive(Debug, Clone, Default)]
pub struct CommitmentQueue {
    epoch: u64,
    pending: Vec<EncryptedPosition>,
    seen: BTreeSet<Commitment>,
}

impl CommitmentQueue {
    pub fn current_epoch(&self) -> u64 {
        self.epoch
    }

    pub fn epoch_params(&self) -> EpochParams {
        EpochParams::for_epoch(self.epoch)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending(&self) -> &[EncryptedPosition] {
        &self.pending
    }

    /// Commitments are accepted once, across all epochs
    pub fn contains(&self, commitment: &Commitment) -> bool {
        self.seen.contains(commitment)
    }

    pub fn push(&mut self, position: EncryptedPosition) -> Result<()> {
        if !self.seen.insert(position.commitment) {
            return Err(EngineError::DuplicateCommitment(position.commitment.to_string()));
        }
        self.pending.push(position);
        Ok(())
    }

    /// Take every pending commitment of `epoch`, in submission order, and
    /// open the next epoch. Returns the batch and the new epoch number.
    pub fn close_epoch(&mut self, epoch: u64) -> Result<(Vec<EncryptedPosition>, u64)> {
        if epoch != self.epoch {
            return Err(EngineError::EpochMismatch {
                current: self.epoch,
                requested: epoch,
            });
        }
        let next = self.epoch.checked_add(1).ok_or(EngineError::Overflow)?;
        let (batch, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|position| position.epoch == epoch);
        self.pending = rest;
        self.epoch = next;
        Ok((batch, next))
    }
}
