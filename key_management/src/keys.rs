// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::bytes::{self, encode_g1};
use crate::scheme;
use crate::Error;
use blstrs::{G1Projective, Scalar};
use ff::Field;
use group::Group as _;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Information about a participant of a beacon network: where it can be
/// dialed, whether the endpoint serves TLS, its public key and the proof of
/// possession binding that key to the address.
#[derive(Clone, Serialize, Deserialize)]
pub struct Identity {
    pub address: String,
    pub tls: bool,
    #[serde(with = "bytes::g1")]
    pub key: G1Projective,
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
}

impl Identity {
    /// Verifies the proof of possession carried by this identity. A valid
    /// proof prevents rogue-key attacks when keys are aggregated.
    pub fn verify_pop(&self) -> Result<(), Error> {
        let digest = pop_digest(&self.key, &self.address);
        scheme::verify(&self.key, &digest, &self.signature)
            .map_err(|_| Error::InvalidPop(self.address.clone()))
    }
}

// Participant identity is the (address, key) tuple. The proof of possession
// and the TLS flag are attributes of the endpoint, not of the identity.
impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.key == other.key
    }
}

impl Eq for Identity {}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Identity{{{} -> {}}}",
            self.address,
            hex::encode(&encode_g1(&self.key)[..8])
        )
    }
}

/// A longterm BLS keypair. The private scalar never leaves this struct except
/// through the key file store.
#[derive(Clone, Serialize, Deserialize)]
pub struct Pair {
    #[serde(with = "bytes::scalar")]
    private: Scalar,
    public: Identity,
}

impl Pair {
    /// Generates a fresh keypair bound to the given address, including its
    /// proof of possession.
    pub fn generate(address: &str, tls: bool) -> Self {
        let private = Scalar::random(&mut OsRng);
        Self::from_scalar(private, address, tls)
    }

    pub fn from_scalar(private: Scalar, address: &str, tls: bool) -> Self {
        let key = G1Projective::generator() * private;
        let digest = pop_digest(&key, address);
        let signature = scheme::sign(&private, &digest);
        Self {
            private,
            public: Identity {
                address: address.to_owned(),
                tls,
                key,
                signature,
            },
        }
    }

    pub fn private(&self) -> &Scalar {
        &self.private
    }

    pub fn public(&self) -> &Identity {
        &self.public
    }
}

impl fmt::Debug for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // never prints the private scalar
        write!(f, "Pair{{{:?}}}", self.public)
    }
}

/// A node's private share of the distributed key, paired with the index the
/// share was dealt at.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Share {
    pub index: u32,
    #[serde(with = "bytes::scalar")]
    pub private: Scalar,
}

impl fmt::Debug for Share {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Share{{index: {}}}", self.index)
    }
}

/// The message a proof of possession signs: the compressed public key bound
/// to the participant address.
pub(crate) fn pop_digest(key: &G1Projective, address: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(encode_g1(key));
    hasher.update(address.as_bytes());
    hasher.finalize().into()
}
