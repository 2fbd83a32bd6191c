// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use thiserror::Error;

/// Key management error
#[derive(Debug, Error)]
pub enum Error {
    #[error("bytes do not encode a valid curve point")]
    InvalidPoint,
    #[error("bytes do not encode a valid scalar")]
    InvalidScalar,
    #[error("proof of possession does not verify for {0}")]
    InvalidPop(String),
    #[error("signature does not verify")]
    InvalidSignature,
    #[error("threshold {threshold} out of range [{min},{max}]")]
    InvalidThreshold {
        threshold: u32,
        min: u32,
        max: u32,
    },
    #[error("duplicate share index {0}")]
    DuplicateIndex(u32),
    #[error("only {0}/{1} shares available")]
    NotEnoughShares(usize, usize),
    #[error("ciphertext has wrong length {0}")]
    InvalidCiphertext(usize),
    #[error("no such file: {0}")]
    FileNotFound(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
