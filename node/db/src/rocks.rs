// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::errors::Error;
use super::{Store, DEFAULT_COLUMN};
use crate::rocks_config::RocksDbConfig;
pub use rocksdb::{DBRawIterator, Options, WriteOptions, DB};
use std::path::Path;

/// `RocksDB` instance, this satisfies the [Store] interface.
#[derive(Debug)]
pub struct RocksDb {
    pub db: DB,
}

/// `RocksDb` is used as the durable KV store for pharos.
///
/// Usage:
/// ```no_run
/// use pharos_db::rocks::RocksDb;
/// use pharos_db::rocks_config::RocksDbConfig;
///
/// let db = RocksDb::open("test_db", &RocksDbConfig::default(), &[]).unwrap();
/// ```
impl RocksDb {
    /// Opens (and creates if missing) a database with the given extra columns.
    /// The default column always exists.
    pub fn open<P>(path: P, config: &RocksDbConfig, columns: &[&str]) -> Result<Self, Error>
    where
        P: AsRef<Path>,
    {
        let db_opts = config.to_options()?;
        let mut cfs = vec![DEFAULT_COLUMN];
        cfs.extend_from_slice(columns);
        Ok(Self {
            db: DB::open_cf(&db_opts, path, cfs)?,
        })
    }

    fn cf(&self, column: &str) -> Result<&rocksdb::ColumnFamily, Error> {
        self.db
            .cf_handle(column)
            .ok_or_else(|| Error::UnknownColumn(column.to_owned()))
    }
}

impl Store for RocksDb {
    fn read_column<K>(&self, key: K, column: &str) -> Result<Option<Vec<u8>>, Error>
    where
        K: AsRef<[u8]>,
    {
        self.db.get_cf(self.cf(column)?, key).map_err(Error::from)
    }

    fn write_column<K, V>(&self, key: K, value: V, column: &str) -> Result<(), Error>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        Ok(self.db.put_cf(self.cf(column)?, key, value)?)
    }

    fn write_sync_column<K, V>(&self, key: K, value: V, column: &str) -> Result<(), Error>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let mut opts = WriteOptions::default();
        opts.set_sync(true);
        Ok(self.db.put_cf_opt(self.cf(column)?, key, value, &opts)?)
    }

    fn delete_column<K>(&self, key: K, column: &str) -> Result<(), Error>
    where
        K: AsRef<[u8]>,
    {
        Ok(self.db.delete_cf(self.cf(column)?, key)?)
    }

    fn exists_column<K>(&self, key: K, column: &str) -> Result<bool, Error>
    where
        K: AsRef<[u8]>,
    {
        self.db
            .get_pinned_cf(self.cf(column)?, key)
            .map(|v| v.is_some())
            .map_err(Error::from)
    }
}
