// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use thiserror::Error;

/// Database error
#[derive(Debug, Error)]
pub enum Error {
    #[error("Cannot use unopened database")]
    Unopened,
    #[error("Unknown column {0}")]
    UnknownColumn(String),
    #[error(transparent)]
    Database(#[from] rocksdb::Error),
    #[error("{0}")]
    Other(String),
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        use Error::*;

        match (self, other) {
            (&Unopened, &Unopened) => true,
            (&UnknownColumn(ref a), &UnknownColumn(ref b)) => a == b,
            (&Database(_), &Database(_)) => true,
            (&Other(ref a), &Other(ref b)) => a == b,
            _ => false,
        }
    }
}

impl From<Error> for String {
    fn from(e: Error) -> Self {
        e.to_string()
    }
}
