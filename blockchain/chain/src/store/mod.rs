// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod callback;
mod memory;
mod rocks;

pub use callback::CallbackStore;
pub use memory::MemStore;
pub use rocks::RocksStore;

use pharos_beacon::{Beacon, BeaconError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    /// The store holds no beacon able to answer the request.
    #[error("no beacon saved in the store")]
    NoBeaconSaved,
    /// A different beacon is already stored at this round. History is never
    /// rewritten; hitting this is a programmer error upstream.
    #[error("round {0} already stored with a different beacon")]
    BeaconConflict(u64),
    #[error("store is closed")]
    Closed,
    #[error(transparent)]
    Db(#[from] pharos_db::Error),
    #[error(transparent)]
    Encoding(#[from] BeaconError),
}

/// A persistent, round-indexed log of beacons.
///
/// Keys are big-endian encoded rounds so that lexicographic key order equals
/// numeric round order; every implementation must preserve this so cursors
/// traverse rounds in increasing order.
pub trait Store {
    /// Stores the beacon at its round. Storing an equal beacon again is a
    /// no-op; storing a different beacon at an occupied round fails with
    /// [`ChainError::BeaconConflict`]. Returns once the record is durable.
    fn put(&self, beacon: &Beacon) -> Result<(), ChainError>;

    /// The beacon at the highest stored round.
    fn last(&self) -> Result<Beacon, ChainError>;

    /// The beacon at exactly the given round.
    fn get(&self, round: u64) -> Result<Beacon, ChainError>;

    /// Number of stored beacons.
    fn len(&self) -> Result<u64, ChainError>;

    fn is_empty(&self) -> Result<bool, ChainError> {
        Ok(self.len()? == 0)
    }

    /// Runs `f` with a read-only cursor over the stored beacons. The cursor
    /// is only valid within `f`; it cannot escape the closure.
    fn cursor<F, R>(&self, f: F) -> Result<R, ChainError>
    where
        F: FnOnce(&mut dyn Cursor) -> Result<R, ChainError>,
        Self: Sized;

    /// Releases the underlying handle. Subsequent calls fail with
    /// [`ChainError::Closed`].
    fn close(&self) -> Result<(), ChainError>;
}

/// Positioned traversal over a store, in increasing round order.
pub trait Cursor {
    fn first(&mut self) -> Result<Option<Beacon>, ChainError>;

    fn last(&mut self) -> Result<Option<Beacon>, ChainError>;

    fn next(&mut self) -> Result<Option<Beacon>, ChainError>;

    /// Positions at exactly `round`, returning `None` if that round is not
    /// stored.
    fn seek(&mut self, round: u64) -> Result<Option<Beacon>, ChainError>;
}

pub(crate) fn round_key(round: u64) -> [u8; 8] {
    round.to_be_bytes()
}
