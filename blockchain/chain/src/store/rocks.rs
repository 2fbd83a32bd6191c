// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::{round_key, ChainError, Cursor, Store};
use parking_lot::{Mutex, RwLock};
use pharos_beacon::Beacon;
use pharos_db::rocks::{DBRawIterator, RocksDb};
use pharos_db::rocks_config::RocksDbConfig;
use pharos_db::Store as _;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

const BEACON_COLUMN: &str = "beacons";

/// The durable chain store: one database per chain, beacons keyed by their
/// big-endian round under a dedicated column.
pub struct RocksStore {
    db: RwLock<Option<RocksDb>>,
    // single-writer discipline; readers go through the RwLock only
    write_lock: Mutex<()>,
    len: AtomicU64,
}

impl RocksStore {
    /// Opens (creating if missing) the chain store at `path`.
    pub fn open<P: AsRef<Path>>(path: P, config: &RocksDbConfig) -> Result<Self, ChainError> {
        let db = RocksDb::open(path, config, &[BEACON_COLUMN])?;
        let len = count_beacons(&db)?;
        Ok(Self {
            db: RwLock::new(Some(db)),
            write_lock: Mutex::new(()),
            len: AtomicU64::new(len),
        })
    }
}

fn count_beacons(db: &RocksDb) -> Result<u64, ChainError> {
    let cf = db
        .db
        .cf_handle(BEACON_COLUMN)
        .ok_or_else(|| pharos_db::Error::UnknownColumn(BEACON_COLUMN.into()))?;
    let mut iter = db.db.raw_iterator_cf(cf);
    let mut count = 0;
    iter.seek_to_first();
    while iter.valid() {
        count += 1;
        iter.next();
    }
    Ok(count)
}

impl Store for RocksStore {
    fn put(&self, beacon: &Beacon) -> Result<(), ChainError> {
        let _writer = self.write_lock.lock();
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(ChainError::Closed)?;

        let key = round_key(beacon.round());
        let encoded = beacon.encode();
        if let Some(existing) = db.read_column(key, BEACON_COLUMN)? {
            if existing == encoded {
                return Ok(());
            }
            return Err(ChainError::BeaconConflict(beacon.round()));
        }
        db.write_sync_column(key, encoded, BEACON_COLUMN)?;
        self.len.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn last(&self) -> Result<Beacon, ChainError> {
        self.cursor(|c| c.last()?.ok_or(ChainError::NoBeaconSaved))
    }

    fn get(&self, round: u64) -> Result<Beacon, ChainError> {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(ChainError::Closed)?;
        match db.read_column(round_key(round), BEACON_COLUMN)? {
            Some(bytes) => Ok(Beacon::decode(&bytes)?),
            None => Err(ChainError::NoBeaconSaved),
        }
    }

    fn len(&self) -> Result<u64, ChainError> {
        if self.db.read().is_none() {
            return Err(ChainError::Closed);
        }
        Ok(self.len.load(Ordering::SeqCst))
    }

    fn cursor<F, R>(&self, f: F) -> Result<R, ChainError>
    where
        F: FnOnce(&mut dyn Cursor) -> Result<R, ChainError>,
    {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(ChainError::Closed)?;
        let cf = db
            .db
            .cf_handle(BEACON_COLUMN)
            .ok_or_else(|| pharos_db::Error::UnknownColumn(BEACON_COLUMN.into()))?;
        let mut cursor = RocksCursor {
            iter: db.db.raw_iterator_cf(cf),
        };
        f(&mut cursor)
    }

    fn close(&self) -> Result<(), ChainError> {
        match self.db.write().take() {
            Some(db) => {
                drop(db);
                Ok(())
            }
            None => Err(ChainError::Closed),
        }
    }
}

struct RocksCursor<'a> {
    iter: DBRawIterator<'a>,
}

impl RocksCursor<'_> {
    fn current(&self) -> Result<Option<Beacon>, ChainError> {
        if !self.iter.valid() {
            return Ok(None);
        }
        match self.iter.value() {
            Some(bytes) => Ok(Some(Beacon::decode(bytes)?)),
            None => Ok(None),
        }
    }
}

impl Cursor for RocksCursor<'_> {
    fn first(&mut self) -> Result<Option<Beacon>, ChainError> {
        self.iter.seek_to_first();
        self.current()
    }

    fn last(&mut self) -> Result<Option<Beacon>, ChainError> {
        self.iter.seek_to_last();
        self.current()
    }

    fn next(&mut self) -> Result<Option<Beacon>, ChainError> {
        if self.iter.valid() {
            self.iter.next();
        }
        self.current()
    }

    fn seek(&mut self, round: u64) -> Result<Option<Beacon>, ChainError> {
        self.iter.seek(round_key(round));
        match self.current()? {
            Some(beacon) if beacon.round() == round => Ok(Some(beacon)),
            _ => Ok(None),
        }
    }
}
