//! # Holder Keys
//!
//! BIP-340 x-only keys used to attest position commitments. A holder can
//! rotate their key with a message signed under the current one; every
//! rotation bumps the generation, which invalidates commitments made under
//! the previous key.
//!
//! Each record carries an in-flight marker. Operations on a holder's key
//! take an [`InFlight`] guard; the marker clears when the guard drops.
//! Engine operations take `&mut self` and drop the guard before returning,
//! so a second acquisition never happens through the engine itself. The
//! marker matters to hosts that hold a [`KeyRecord`] across their own
//! asynchronous steps, such as waiting on an external prover.

use crate::types::HolderId;
use crate::utils::tagged_hash;
use crate::{error::Result, EngineError};
use secp256k1::{schnorr, Keypair, Message, Secp256k1, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};

/// Domain tag of rotation messages
pub const ROTATION_TAG: &str = "condmarket/rotate";

/// A holder's current attestation key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub holder: HolderId,
    pub public_key: XOnlyPublicKey,
    /// Zero at registration, incremented by every rotation
    pub generation: u64,
    in_flight: bool,
}

impl KeyRecord {
    pub fn new(holder: HolderId, public_key: XOnlyPublicKey) -> Self {
        Self {
            holder,
            public_key,
            generation: 0,
            in_flight: false,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Mark a request in flight for this holder. Fails with
    /// `RequestInFlight` while another guard on this record is alive.
    pub fn acquire(&mut self) -> Result<InFlight<'_>> {
        if self.in_flight {
            return Err(EngineError::RequestInFlight(self.holder.to_string()));
        }
        self.in_flight = true;
        Ok(InFlight { record: self })
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key.serialize())
    }

    /// Check `signature` authorizes rotating to `new_key` and apply it
    pub fn rotate(&mut self, new_key: XOnlyPublicKey, signature: &[u8]) -> Result<u64> {
        if new_key == self.public_key {
            return Err(EngineError::InvalidKey(
                "new key equals the current key".to_string(),
            ));
        }
        let next_generation = self
            .generation
            .checked_add(1)
            .ok_or(EngineError::Overflow)?;
        let digest = rotation_digest(&self.holder, &new_key, next_generation);
        verify_schnorr(&self.public_key, digest, signature)?;

        self.public_key = new_key;
        self.generation = next_generation;
        Ok(next_generation)
    }
}

/// Scoped in-flight marker; dereferences to the guarded record
#[derive(Debug)]
pub struct InFlight<'a> {
    record: &'a mut KeyRecord,
}

impl Deref for InFlight<'_> {
    type Target = KeyRecord;

    fn deref(&self) -> &KeyRecord {
        &*self.record
    }
}

impl DerefMut for InFlight<'_> {
    fn deref_mut(&mut self) -> &mut KeyRecord {
        &mut *self.record
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.record.in_flight = false;
    }
}

/// Digest a rotation signature commits to
pub fn rotation_digest(holder: &HolderId, new_key: &XOnlyPublicKey, next_generation: u64) -> [u8; 32] {
    tagged_hash(
        ROTATION_TAG,
        &[
            holder.as_str().as_bytes(),
            &new_key.serialize(),
            &next_generation.to_be_bytes(),
        ],
    )
}

/// Verify a 64-byte BIP-340 signature over `digest`
pub fn verify_schnorr(public_key: &XOnlyPublicKey, digest: [u8; 32], signature: &[u8]) -> Result<()> {
    if signature.len() != 64 {
        return Err(EngineError::InvalidSignature(format!(
            "Invalid signature length: expected 64 bytes, got {}",
            signature.len()
        )));
    }
    let signature = schnorr::Signature::from_slice(signature)
        .map_err(|e| EngineError::InvalidSignature(format!("Invalid signature format: {e}")))?;
    let message = Message::from_digest(digest);

    Secp256k1::verification_only()
        .verify_schnorr(&signature, &message, public_key)
        .map_err(|_| EngineError::InvalidSignature("verification failed".to_string()))
}

/// Sign `digest` with `keypair` (deterministic nonce)
pub fn sign_digest(keypair: &Keypair, digest: [u8; 32]) -> Vec<u8> {
    let secp = Secp256k1::signing_only();
    let message = Message::from_digest(digest);
    secp.sign_schnorr_no_aux_rand(&message, keypair)
        .serialize()
        .to_vec()
}

/// Signature authorizing `holder` to rotate to `new_key`
pub fn sign_rotation(
    current: &Keypair,
    holder: &HolderId,
    new_key: &XOnlyPublicKey,
    next_generation: u64,
) -> Vec<u8> {
    sign_digest(current, rotation_digest(holder, new_key, next_generation))
}
