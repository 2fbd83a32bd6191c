// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod errors;
mod memory;

pub mod rocks;
pub mod rocks_config;

pub use errors::Error;
pub use memory::MemoryDB;

const DEFAULT_COLUMN: &str = "default";

/// Store interface used as a KV store implementation.
///
/// Columns group related keys the way buckets do in other embedded stores;
/// every backend creates the columns it is opened with and fails reads and
/// writes against unknown ones.
pub trait Store {
    /// Read single value from the default column of the data store and return `None` if key doesn't exist.
    fn read<K>(&self, key: K) -> Result<Option<Vec<u8>>, Error>
    where
        K: AsRef<[u8]>,
    {
        self.read_column(key, DEFAULT_COLUMN)
    }

    /// Read single value from the specified column of the data store and return `None` if key doesn't exist.
    fn read_column<K>(&self, key: K, column: &str) -> Result<Option<Vec<u8>>, Error>
    where
        K: AsRef<[u8]>;

    /// Write a single value to the default column of the data store.
    fn write<K, V>(&self, key: K, value: V) -> Result<(), Error>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        self.write_column(key, value, DEFAULT_COLUMN)
    }

    /// Write a single value to the specified column of the data store.
    fn write_column<K, V>(&self, key: K, value: V, column: &str) -> Result<(), Error>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>;

    /// Write a single value to the specified column and only return once it is
    /// durable on disk. Backends without a separate durable path fall back to
    /// `write_column`.
    fn write_sync_column<K, V>(&self, key: K, value: V, column: &str) -> Result<(), Error>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        self.write_column(key, value, column)
    }

    /// Delete value at key from the default column.
    fn delete<K>(&self, key: K) -> Result<(), Error>
    where
        K: AsRef<[u8]>,
    {
        self.delete_column(key, DEFAULT_COLUMN)
    }

    /// Delete value at key from the specified column.
    fn delete_column<K>(&self, key: K, column: &str) -> Result<(), Error>
    where
        K: AsRef<[u8]>;

    /// Returns `Ok(true)` if key exists in the default column of the store.
    fn exists<K>(&self, key: K) -> Result<bool, Error>
    where
        K: AsRef<[u8]>,
    {
        self.exists_column(key, DEFAULT_COLUMN)
    }

    /// Returns `Ok(true)` if key exists in the specified column of the store.
    fn exists_column<K>(&self, key: K, column: &str) -> Result<bool, Error>
    where
        K: AsRef<[u8]>;
}

impl<BS: Store> Store for &BS {
    fn read_column<K>(&self, key: K, column: &str) -> Result<Option<Vec<u8>>, Error>
    where
        K: AsRef<[u8]>,
    {
        (*self).read_column(key, column)
    }

    fn write_column<K, V>(&self, key: K, value: V, column: &str) -> Result<(), Error>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        (*self).write_column(key, value, column)
    }

    fn write_sync_column<K, V>(&self, key: K, value: V, column: &str) -> Result<(), Error>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        (*self).write_sync_column(key, value, column)
    }

    fn delete_column<K>(&self, key: K, column: &str) -> Result<(), Error>
    where
        K: AsRef<[u8]>,
    {
        (*self).delete_column(key, column)
    }

    fn exists_column<K>(&self, key: K, column: &str) -> Result<bool, Error>
    where
        K: AsRef<[u8]>,
    {
        (*self).exists_column(key, column)
    }
}
