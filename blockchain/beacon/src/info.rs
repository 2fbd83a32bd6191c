// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use blstrs::G1Projective;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

/// The public description of a chain, enough for a consumer to verify every
/// round it ever produces.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChainInfo {
    pub beacon_id: String,
    #[serde(with = "pharos_key::bytes::g1")]
    pub public_key: G1Projective,
    pub scheme_id: String,
    pub period: Duration,
    pub genesis_time: u64,
    #[serde(with = "serde_bytes")]
    pub genesis_seed: Vec<u8>,
}

impl ChainInfo {
    /// A stable fingerprint identifying the chain.
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.beacon_id.as_bytes());
        hasher.update(pharos_key::bytes::encode_g1(&self.public_key));
        hasher.update(self.scheme_id.as_bytes());
        hasher.update(self.period.as_secs().to_be_bytes());
        hasher.update(self.genesis_time.to_be_bytes());
        hasher.update(&self.genesis_seed);
        hasher.finalize().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use group::Group as _;

    fn info() -> ChainInfo {
        ChainInfo {
            beacon_id: "default".into(),
            public_key: G1Projective::generator(),
            scheme_id: pharos_key::scheme::SCHEME_ID.into(),
            period: Duration::from_secs(30),
            genesis_time: 1_700_000_000,
            genesis_seed: vec![],
        }
    }

    #[test]
    fn digest_is_stable_and_distinct() {
        let a = info();
        assert_eq!(a.digest(), info().digest());

        let mut b = info();
        b.beacon_id = "other".into();
        assert_ne!(a.digest(), b.digest());
    }
}
