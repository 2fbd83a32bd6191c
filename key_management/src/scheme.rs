// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The signing scheme used by the beacon: BLS with public keys in G1 and
//! signatures in G2, hashing to the curve per RFC 9380. Partial signatures
//! from `threshold` distinct shares interpolate into the group signature.

use crate::poly;
use crate::{DistPublic, Error, Share};
use blstrs::{pairing, G1Affine, G1Projective, G2Affine, G2Projective, Scalar};
use group::prime::PrimeCurveAffine;
use serde::{Deserialize, Serialize};

/// Identifier of the only scheme currently implemented: chained beacons with
/// Pedersen DKG key generation.
pub const SCHEME_ID: &str = "pedersen-bls-chained";

const DST_G2: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_NUL_";

pub fn hash_to_curve(msg: &[u8]) -> G2Projective {
    G2Projective::hash_to_curve(msg, DST_G2, &[])
}

/// Signs the message with a bare scalar, producing a compressed G2 signature.
pub fn sign(private: &Scalar, msg: &[u8]) -> Vec<u8> {
    let sig = hash_to_curve(msg) * private;
    crate::bytes::encode_g2(&sig).to_vec()
}

/// Verifies a signature against a G1 public key:
/// `e(pk, H(m)) == e(g1, sig)`.
pub fn verify(public: &G1Projective, msg: &[u8], signature: &[u8]) -> Result<(), Error> {
    let sig = crate::bytes::decode_g2(signature).ok_or(Error::InvalidPoint)?;
    let hm = hash_to_curve(msg);
    let lhs = pairing(&G1Affine::from(public), &G2Affine::from(hm));
    let rhs = pairing(&G1Affine::generator(), &G2Affine::from(sig));
    if lhs == rhs {
        Ok(())
    } else {
        Err(Error::InvalidSignature)
    }
}

/// One node's contribution to a round signature.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PartialSig {
    pub index: u32,
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
}

/// Signs the message with a key share.
pub fn partial_sign(share: &Share, msg: &[u8]) -> PartialSig {
    PartialSig {
        index: share.index,
        signature: sign(&share.private, msg),
    }
}

/// Verifies a partial signature against the distributed public polynomial:
/// the share's public counterpart is the polynomial evaluated at its index.
pub fn verify_partial(public: &DistPublic, msg: &[u8], partial: &PartialSig) -> Result<(), Error> {
    verify(&public.eval(partial.index), msg, &partial.signature)
}

/// Interpolates `threshold` partial signatures into the signature the group
/// key verifies. Partials are not checked here, callers verify them first.
pub fn recover_signature(partials: &[PartialSig], threshold: usize) -> Result<Vec<u8>, Error> {
    let mut points = Vec::with_capacity(partials.len());
    for p in partials {
        let point = crate::bytes::decode_g2(&p.signature).ok_or(Error::InvalidPoint)?;
        points.push((p.index, point));
    }
    let sig = poly::recover_g2(&points, threshold)?;
    Ok(crate::bytes::encode_g2(&sig).to_vec())
}
