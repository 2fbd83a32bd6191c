// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Durable storage of DKG progress: per beacon id, the in-flight state and
//! the last finished one, in two dedicated columns of the node database.

use crate::state::{DbState, Status};
use parking_lot::RwLock;
use pharos_db::Store;
use thiserror::Error;

/// Column holding the latest state of each beacon id, finished or not.
pub const CURRENT_COLUMN: &str = "dkg_current";
/// Column holding the last successful `Complete` state of each beacon id.
/// Terminal failures never land here.
pub const FINISHED_COLUMN: &str = "dkg_finished";

/// The columns a database handed to [`DkgStore`] must be opened with.
pub const COLUMNS: &[&str] = &[CURRENT_COLUMN, FINISHED_COLUMN];

#[derive(Debug, Error)]
pub enum DkgStoreError {
    #[error(transparent)]
    Db(#[from] pharos_db::Error),
    #[error(transparent)]
    Serialization(#[from] serde_cbor::Error),
    #[error("DKG state already exists for beacon {0}")]
    StateExists(String),
    #[error("only completed states can be migrated or finished, got {0}")]
    NotComplete(Status),
    #[error("store is closed")]
    Closed,
}

/// Two logical slots per beacon id over any KV backend: **current** (latest,
/// possibly in flight) and **finished** (last successful completion).
pub struct DkgStore<DB> {
    db: RwLock<Option<DB>>,
}

impl<DB: Store> DkgStore<DB> {
    /// Wraps a database opened with [`COLUMNS`].
    pub fn new(db: DB) -> Self {
        Self {
            db: RwLock::new(Some(db)),
        }
    }

    fn with_db<R>(&self, f: impl FnOnce(&DB) -> Result<R, DkgStoreError>) -> Result<R, DkgStoreError> {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(DkgStoreError::Closed)?;
        f(db)
    }

    /// The state to apply the next transition to: the in-flight state if any,
    /// else the last finished one, else a fresh genesis state for the id.
    pub fn get_current(&self, beacon_id: &str) -> Result<DbState, DkgStoreError> {
        self.with_db(|db| {
            if let Some(bytes) = db.read_column(beacon_id.as_bytes(), CURRENT_COLUMN)? {
                return Ok(serde_cbor::from_slice(&bytes)?);
            }
            if let Some(bytes) = db.read_column(beacon_id.as_bytes(), FINISHED_COLUMN)? {
                return Ok(serde_cbor::from_slice(&bytes)?);
            }
            Ok(DbState::fresh(beacon_id))
        })
    }

    /// The last successful `Complete` state, or `None` if this beacon id
    /// never completed an epoch.
    pub fn get_finished(&self, beacon_id: &str) -> Result<Option<DbState>, DkgStoreError> {
        self.with_db(|db| {
            match db.read_column(beacon_id.as_bytes(), FINISHED_COLUMN)? {
                Some(bytes) => Ok(Some(serde_cbor::from_slice(&bytes)?)),
                None => Ok(None),
            }
        })
    }

    /// Overwrites the in-flight state. Crash-safe: the write is synced before
    /// returning.
    pub fn save_current(&self, beacon_id: &str, state: &DbState) -> Result<(), DkgStoreError> {
        self.with_db(|db| {
            let bytes = serde_cbor::to_vec(state)?;
            db.write_sync_column(beacon_id.as_bytes(), bytes, CURRENT_COLUMN)?;
            Ok(())
        })
    }

    /// Records a successful completion: the finished slot and the current
    /// slot both point at the completed state afterwards.
    pub fn save_finished(&self, beacon_id: &str, state: &DbState) -> Result<(), DkgStoreError> {
        if state.state != Status::Complete {
            return Err(DkgStoreError::NotComplete(state.state));
        }
        self.with_db(|db| {
            let bytes = serde_cbor::to_vec(state)?;
            db.write_sync_column(beacon_id.as_bytes(), bytes.clone(), FINISHED_COLUMN)?;
            db.write_sync_column(beacon_id.as_bytes(), bytes, CURRENT_COLUMN)?;
            Ok(())
        })
    }

    /// Builds an epoch 1 `Complete` state from a legacy group file and share,
    /// for nodes upgrading from the previous release line. Fails if any state
    /// already exists for the id.
    // Deprecated: remove once no upgrade path from the groupfile era remains.
    pub fn migrate_from_groupfile(
        &self,
        beacon_id: &str,
        group: &pharos_key::Group,
        share: &pharos_key::Share,
    ) -> Result<DbState, DkgStoreError> {
        let exists = self.with_db(|db| {
            Ok(db.exists_column(beacon_id.as_bytes(), CURRENT_COLUMN)?
                || db.exists_column(beacon_id.as_bytes(), FINISHED_COLUMN)?)
        })?;
        if exists {
            return Err(DkgStoreError::StateExists(beacon_id.to_owned()));
        }

        let mut state = DbState::fresh(beacon_id);
        state.epoch = 1;
        state.state = Status::Complete;
        state.threshold = group.threshold;
        state.scheme_id = group.scheme_id.clone();
        state.genesis_time = group.genesis_time;
        state.genesis_seed = group.genesis_seed.clone();
        state.transition_time = group.transition_time;
        state.beacon_period = group.period;
        state.joining = group.nodes.iter().map(|n| n.identity.clone()).collect();
        state.final_group = Some(group.clone());
        state.key_share = Some(share.clone());

        self.save_finished(beacon_id, &state)?;
        Ok(state)
    }

    /// Releases the database handle; subsequent calls fail.
    pub fn close(&self) -> Result<(), DkgStoreError> {
        match self.db.write().take() {
            Some(db) => {
                drop(db);
                Ok(())
            }
            None => Err(DkgStoreError::Closed),
        }
    }
}
