// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::bytes::{self, encode_g1};
use crate::poly::PublicPoly;
use crate::Identity;
use blstrs::G1Projective;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

/// The distributed public key: the commitments of the group polynomial.
/// The free coefficient is the public key beacon signatures verify against.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DistPublic {
    #[serde(with = "bytes::g1_vec")]
    pub commits: Vec<G1Projective>,
}

impl DistPublic {
    /// The collective public key of the group.
    pub fn key(&self) -> G1Projective {
        self.commits[0]
    }

    /// The public counterpart of the share dealt at `index`.
    pub fn eval(&self, index: u32) -> G1Projective {
        PublicPoly::new(self.commits.clone()).eval(index)
    }
}

impl From<PublicPoly> for DistPublic {
    fn from(poly: PublicPoly) -> Self {
        Self {
            commits: poly.coeffs().to_vec(),
        }
    }
}

/// A group member: a participant identity pinned to the share index it holds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub index: u32,
    pub identity: Identity,
}

/// The output of a finished key generation: the qualified members, the
/// threshold, the distributed key and the chain parameters the group signs
/// under.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub nodes: Vec<Node>,
    pub threshold: u32,
    pub period: Duration,
    pub genesis_time: u64,
    pub transition_time: u64,
    #[serde(with = "serde_bytes")]
    pub genesis_seed: Vec<u8>,
    pub scheme_id: String,
    pub public_key: DistPublic,
}

impl Group {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, index: u32) -> Option<&Node> {
        self.nodes.iter().find(|n| n.index == index)
    }

    /// The index the given participant holds in this group, if any.
    pub fn index_of(&self, identity: &Identity) -> Option<u32> {
        self.nodes
            .iter()
            .find(|n| &n.identity == identity)
            .map(|n| n.index)
    }

    /// A stable fingerprint over the group parameters and membership.
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.scheme_id.as_bytes());
        hasher.update(self.threshold.to_be_bytes());
        hasher.update(self.genesis_time.to_be_bytes());
        hasher.update(self.period.as_secs().to_be_bytes());
        for node in &self.nodes {
            hasher.update(node.index.to_be_bytes());
            hasher.update(node.identity.address.as_bytes());
            hasher.update(encode_g1(&node.identity.key));
        }
        hasher.finalize().into()
    }
}

/// The smallest threshold that still guarantees agreement on the produced
/// group: a strict majority.
pub fn minimum_threshold(n: usize) -> u32 {
    (n / 2 + 1) as u32
}
