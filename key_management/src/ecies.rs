// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Minimal ECIES over G1 for sealing dealt shares: an ephemeral
//! Diffie-Hellman exchange derives a SHA-256 pad for the 32-byte plaintext.
//! There is no authentication tag; a tampered share is caught by the
//! commitment check on the receiving side.

use crate::bytes::encode_g1;
use crate::Error;
use blstrs::{G1Projective, Scalar};
use ff::Field;
use group::Group as _;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const PLAINTEXT_LEN: usize = 32;

/// An encrypted 32-byte payload together with the ephemeral public key the
/// recipient needs to derive the pad.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EciesCipher {
    #[serde(with = "crate::bytes::g1")]
    pub ephemeral: G1Projective,
    #[serde(with = "serde_bytes")]
    pub ciphertext: Vec<u8>,
}

fn pad(dh: &G1Projective) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"pharos-ecies-v1");
    hasher.update(encode_g1(dh));
    hasher.finalize().into()
}

/// Seals a 32-byte payload to the holder of the private key matching
/// `public`.
pub fn encrypt<R: RngCore>(
    public: &G1Projective,
    plaintext: &[u8; PLAINTEXT_LEN],
    rng: &mut R,
) -> EciesCipher {
    let eph = Scalar::random(rng);
    let ephemeral = G1Projective::generator() * eph;
    let key = pad(&(public * eph));
    let ciphertext = plaintext.iter().zip(key.iter()).map(|(p, k)| p ^ k).collect();
    EciesCipher {
        ephemeral,
        ciphertext,
    }
}

/// Opens a sealed payload with the recipient's private scalar.
pub fn decrypt(private: &Scalar, cipher: &EciesCipher) -> Result<[u8; PLAINTEXT_LEN], Error> {
    if cipher.ciphertext.len() != PLAINTEXT_LEN {
        return Err(Error::InvalidCiphertext(cipher.ciphertext.len()));
    }
    let key = pad(&(cipher.ephemeral * private));
    let mut plaintext = [0u8; PLAINTEXT_LEN];
    for (i, (c, k)) in cipher.ciphertext.iter().zip(key.iter()).enumerate() {
        plaintext[i] = c ^ k;
    }
    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn roundtrip() {
        let private = Scalar::random(&mut OsRng);
        let public = G1Projective::generator() * private;
        let msg = [7u8; 32];
        let cipher = encrypt(&public, &msg, &mut OsRng);
        assert_eq!(decrypt(&private, &cipher).unwrap(), msg);
    }

    #[test]
    fn wrong_key_scrambles() {
        let private = Scalar::random(&mut OsRng);
        let public = G1Projective::generator() * private;
        let other = Scalar::random(&mut OsRng);
        let msg = [7u8; 32];
        let cipher = encrypt(&public, &msg, &mut OsRng);
        assert_ne!(decrypt(&other, &cipher).unwrap(), msg);
    }

    #[test]
    fn rejects_bad_length() {
        let private = Scalar::random(&mut OsRng);
        let cipher = EciesCipher {
            ephemeral: G1Projective::generator(),
            ciphertext: vec![0; 16],
        };
        assert!(decrypt(&private, &cipher).is_err());
    }
}
