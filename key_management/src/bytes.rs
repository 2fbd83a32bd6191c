// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Serde adapters for BLS12-381 scalars and points. Scalars travel as 32
//! big-endian bytes, G1 points as 48-byte and G2 points as 96-byte compressed
//! encodings, all inside `serde_bytes` buffers so binary formats stay compact.

use blstrs::{G1Affine, G1Projective, G2Affine, G2Projective, Scalar};
use serde::de::Error as _;
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serializer};

pub fn decode_scalar(bytes: &[u8]) -> Option<Scalar> {
    let arr: [u8; 32] = bytes.try_into().ok()?;
    Option::from(Scalar::from_bytes_be(&arr))
}

pub fn encode_scalar(s: &Scalar) -> [u8; 32] {
    s.to_bytes_be()
}

pub fn decode_g1(bytes: &[u8]) -> Option<G1Projective> {
    let arr: [u8; 48] = bytes.try_into().ok()?;
    Option::<G1Affine>::from(G1Affine::from_compressed(&arr)).map(G1Projective::from)
}

pub fn encode_g1(p: &G1Projective) -> [u8; 48] {
    G1Affine::from(p).to_compressed()
}

pub fn decode_g2(bytes: &[u8]) -> Option<G2Projective> {
    let arr: [u8; 96] = bytes.try_into().ok()?;
    Option::<G2Affine>::from(G2Affine::from_compressed(&arr)).map(G2Projective::from)
}

pub fn encode_g2(p: &G2Projective) -> [u8; 96] {
    G2Affine::from(p).to_compressed()
}

pub mod scalar {
    use super::*;

    pub fn serialize<S: Serializer>(v: &Scalar, serializer: S) -> Result<S::Ok, S::Error> {
        serde_bytes::serialize(encode_scalar(v).as_slice(), serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Scalar, D::Error> {
        let buf: serde_bytes::ByteBuf = Deserialize::deserialize(deserializer)?;
        decode_scalar(&buf).ok_or_else(|| D::Error::custom("invalid scalar encoding"))
    }
}

pub mod g1 {
    use super::*;

    pub fn serialize<S: Serializer>(v: &G1Projective, serializer: S) -> Result<S::Ok, S::Error> {
        serde_bytes::serialize(encode_g1(v).as_slice(), serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<G1Projective, D::Error> {
        let buf: serde_bytes::ByteBuf = Deserialize::deserialize(deserializer)?;
        decode_g1(&buf).ok_or_else(|| D::Error::custom("invalid G1 point encoding"))
    }
}

pub mod g1_vec {
    use super::*;

    pub fn serialize<S: Serializer>(v: &[G1Projective], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(v.len()))?;
        for p in v {
            seq.serialize_element(&serde_bytes::ByteBuf::from(encode_g1(p).to_vec()))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<G1Projective>, D::Error> {
        let bufs: Vec<serde_bytes::ByteBuf> = Deserialize::deserialize(deserializer)?;
        bufs.iter()
            .map(|b| decode_g1(b).ok_or_else(|| D::Error::custom("invalid G1 point encoding")))
            .collect()
    }
}
