// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::{ChainError, Cursor, Store};
use parking_lot::RwLock;
use pharos_beacon::Beacon;
use std::collections::BTreeMap;

/// An in-memory chain store with the same contract as the durable one.
/// Used by tests and ephemeral chains.
pub struct MemStore {
    beacons: RwLock<Option<BTreeMap<u64, Beacon>>>,
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            beacons: RwLock::new(Some(BTreeMap::new())),
        }
    }
}

impl Store for MemStore {
    fn put(&self, beacon: &Beacon) -> Result<(), ChainError> {
        let mut guard = self.beacons.write();
        let beacons = guard.as_mut().ok_or(ChainError::Closed)?;
        if let Some(existing) = beacons.get(&beacon.round()) {
            if existing == beacon {
                return Ok(());
            }
            return Err(ChainError::BeaconConflict(beacon.round()));
        }
        beacons.insert(beacon.round(), beacon.clone());
        Ok(())
    }

    fn last(&self) -> Result<Beacon, ChainError> {
        let guard = self.beacons.read();
        let beacons = guard.as_ref().ok_or(ChainError::Closed)?;
        beacons
            .values()
            .next_back()
            .cloned()
            .ok_or(ChainError::NoBeaconSaved)
    }

    fn get(&self, round: u64) -> Result<Beacon, ChainError> {
        let guard = self.beacons.read();
        let beacons = guard.as_ref().ok_or(ChainError::Closed)?;
        beacons.get(&round).cloned().ok_or(ChainError::NoBeaconSaved)
    }

    fn len(&self) -> Result<u64, ChainError> {
        let guard = self.beacons.read();
        let beacons = guard.as_ref().ok_or(ChainError::Closed)?;
        Ok(beacons.len() as u64)
    }

    fn cursor<F, R>(&self, f: F) -> Result<R, ChainError>
    where
        F: FnOnce(&mut dyn Cursor) -> Result<R, ChainError>,
    {
        let guard = self.beacons.read();
        let beacons = guard.as_ref().ok_or(ChainError::Closed)?;
        let snapshot: Vec<Beacon> = beacons.values().cloned().collect();
        let mut cursor = MemCursor {
            beacons: snapshot,
            position: None,
        };
        f(&mut cursor)
    }

    fn close(&self) -> Result<(), ChainError> {
        match self.beacons.write().take() {
            Some(_) => Ok(()),
            None => Err(ChainError::Closed),
        }
    }
}

struct MemCursor {
    beacons: Vec<Beacon>,
    position: Option<usize>,
}

impl Cursor for MemCursor {
    fn first(&mut self) -> Result<Option<Beacon>, ChainError> {
        self.position = Some(0);
        Ok(self.beacons.first().cloned())
    }

    fn last(&mut self) -> Result<Option<Beacon>, ChainError> {
        if self.beacons.is_empty() {
            return Ok(None);
        }
        self.position = Some(self.beacons.len() - 1);
        Ok(self.beacons.last().cloned())
    }

    fn next(&mut self) -> Result<Option<Beacon>, ChainError> {
        let next = match self.position {
            Some(pos) => pos + 1,
            None => 0,
        };
        self.position = Some(next);
        Ok(self.beacons.get(next).cloned())
    }

    fn seek(&mut self, round: u64) -> Result<Option<Beacon>, ChainError> {
        match self.beacons.iter().position(|b| b.round() == round) {
            Some(pos) => {
                self.position = Some(pos);
                Ok(self.beacons.get(pos).cloned())
            }
            None => Ok(None),
        }
    }
}
