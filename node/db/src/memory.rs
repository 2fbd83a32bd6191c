// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::{Error, Store, DEFAULT_COLUMN};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

type Column = BTreeMap<Vec<u8>, Vec<u8>>;

/// A thread-safe in-memory store, usable wherever durability is not needed.
///
/// Columns are created lazily on first write; keys stay ordered within a
/// column so backends can be swapped without changing traversal behavior.
#[derive(Debug, Clone)]
pub struct MemoryDB {
    db: Arc<RwLock<HashMap<String, Column>>>,
}

impl Default for MemoryDB {
    fn default() -> Self {
        let mut columns = HashMap::new();
        columns.insert(DEFAULT_COLUMN.to_owned(), Column::new());
        Self {
            db: Arc::new(RwLock::new(columns)),
        }
    }
}

impl Store for MemoryDB {
    fn read_column<K>(&self, key: K, column: &str) -> Result<Option<Vec<u8>>, Error>
    where
        K: AsRef<[u8]>,
    {
        Ok(self
            .db
            .read()
            .get(column)
            .and_then(|col| col.get(key.as_ref()).cloned()))
    }

    fn write_column<K, V>(&self, key: K, value: V, column: &str) -> Result<(), Error>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        self.db
            .write()
            .entry(column.to_owned())
            .or_default()
            .insert(key.as_ref().to_vec(), value.as_ref().to_vec());
        Ok(())
    }

    fn delete_column<K>(&self, key: K, column: &str) -> Result<(), Error>
    where
        K: AsRef<[u8]>,
    {
        if let Some(col) = self.db.write().get_mut(column) {
            col.remove(key.as_ref());
        }
        Ok(())
    }

    fn exists_column<K>(&self, key: K, column: &str) -> Result<bool, Error>
    where
        K: AsRef<[u8]>,
    {
        Ok(self
            .db
            .read()
            .get(column)
            .map(|col| col.contains_key(key.as_ref()))
            .unwrap_or(false))
    }
}
