// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Read;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BeaconError {
    #[error("truncated beacon encoding")]
    Truncated,
    #[error("trailing bytes after beacon encoding")]
    TrailingBytes,
    #[error("beacon signature does not verify: {0}")]
    InvalidSignature(String),
}

/// One round of the randomness chain: the round number, the signature of the
/// previous round and the threshold signature over both.
///
/// Round 0 is the genesis sentinel and has no predecessor. For every other
/// round the `previous_sig` field equals the `signature` of round - 1.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beacon {
    round: u64,
    #[serde(with = "serde_bytes")]
    previous_sig: Vec<u8>,
    #[serde(with = "serde_bytes")]
    signature: Vec<u8>,
}

impl Beacon {
    pub fn new(round: u64, previous_sig: Vec<u8>, signature: Vec<u8>) -> Self {
        Self {
            round,
            previous_sig,
            signature,
        }
    }

    /// Returns the round number of this beacon.
    pub fn round(&self) -> u64 {
        self.round
    }

    /// The signature of the round before this one.
    pub fn previous_sig(&self) -> &[u8] {
        &self.previous_sig
    }

    /// The threshold signature over [`digest_message`] of this round.
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// The publicly consumable random value of this round: the SHA-256 digest
    /// of the signature. It is recomputed locally, never trusted from a peer.
    pub fn randomness(&self) -> Vec<u8> {
        Sha256::digest(&self.signature).to_vec()
    }

    pub fn is_genesis(&self) -> bool {
        self.round == 0
    }

    /// Stable binary form: round as big-endian u64, then both byte fields
    /// with a big-endian u32 length prefix.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf =
            Vec::with_capacity(8 + 4 + self.previous_sig.len() + 4 + self.signature.len());
        buf.write_u64::<BigEndian>(self.round)
            .expect("writing to a Vec cannot fail");
        write_field(&mut buf, &self.previous_sig);
        write_field(&mut buf, &self.signature);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, BeaconError> {
        let mut cursor = std::io::Cursor::new(bytes);
        let round = cursor
            .read_u64::<BigEndian>()
            .map_err(|_| BeaconError::Truncated)?;
        let previous_sig = read_field(&mut cursor)?;
        let signature = read_field(&mut cursor)?;
        if cursor.position() != bytes.len() as u64 {
            return Err(BeaconError::TrailingBytes);
        }
        Ok(Self {
            round,
            previous_sig,
            signature,
        })
    }
}

fn write_field(buf: &mut Vec<u8>, field: &[u8]) {
    buf.write_u32::<BigEndian>(field.len() as u32)
        .expect("writing to a Vec cannot fail");
    buf.extend_from_slice(field);
}

fn read_field(cursor: &mut std::io::Cursor<&[u8]>) -> Result<Vec<u8>, BeaconError> {
    let len = cursor
        .read_u32::<BigEndian>()
        .map_err(|_| BeaconError::Truncated)? as usize;
    let mut field = vec![0u8; len];
    cursor
        .read_exact(&mut field)
        .map_err(|_| BeaconError::Truncated)?;
    Ok(field)
}

/// The message a round's signature covers in the chained scheme:
/// `SHA-256(previous_sig ‖ round_be)`.
pub fn digest_message(round: u64, previous_sig: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(previous_sig);
    hasher.update(round.to_be_bytes());
    hasher.finalize().into()
}

/// Verifies a beacon against the group public key: the signature must cover
/// the chained message of its round.
pub fn verify_beacon(
    public_key: &blstrs::G1Projective,
    beacon: &Beacon,
) -> Result<(), BeaconError> {
    let msg = digest_message(beacon.round(), beacon.previous_sig());
    pharos_key::scheme::verify(public_key, &msg, beacon.signature())
        .map_err(|e| BeaconError::InvalidSignature(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use blstrs::{G1Projective, Scalar};
    use ff::Field;
    use group::Group as _;
    use quickcheck_macros::quickcheck;
    use rand::rngs::OsRng;

    #[test]
    fn randomness_is_digest_of_signature() {
        let b = Beacon::new(145, b"prev".to_vec(), b"some signature".to_vec());
        assert_eq!(
            hex::encode(b.randomness()),
            hex::encode(Sha256::digest(b"some signature"))
        );
    }

    #[test]
    fn equality_is_field_wise() {
        let b1 = Beacon::new(1, b"a".to_vec(), b"b".to_vec());
        let b2 = Beacon::new(1, b"a".to_vec(), b"b".to_vec());
        let b3 = Beacon::new(1, b"a".to_vec(), b"c".to_vec());
        assert_eq!(b1, b2);
        assert_ne!(b1, b3);
    }

    #[test]
    fn decode_rejects_truncated_and_trailing() {
        let encoded = Beacon::new(7, b"prev".to_vec(), b"sig".to_vec()).encode();
        assert_eq!(
            Beacon::decode(&encoded[..encoded.len() - 1]),
            Err(BeaconError::Truncated)
        );
        let mut trailing = encoded;
        trailing.push(0);
        assert_eq!(Beacon::decode(&trailing), Err(BeaconError::TrailingBytes));
    }

    #[quickcheck]
    fn encoding_roundtrips(round: u64, previous_sig: Vec<u8>, signature: Vec<u8>) -> bool {
        let beacon = Beacon::new(round, previous_sig, signature);
        Beacon::decode(&beacon.encode()) == Ok(beacon)
    }

    #[test]
    fn signed_beacon_verifies() {
        let private = Scalar::random(&mut OsRng);
        let public = G1Projective::generator() * private;

        let prev_sig = pharos_key::scheme::sign(&private, &digest_message(1, &[]));
        let msg = digest_message(2, &prev_sig);
        let beacon = Beacon::new(2, prev_sig, pharos_key::scheme::sign(&private, &msg));

        verify_beacon(&public, &beacon).unwrap();

        let tampered = Beacon::new(3, beacon.previous_sig().to_vec(), beacon.signature().to_vec());
        assert!(verify_beacon(&public, &tampered).is_err());
    }
}
