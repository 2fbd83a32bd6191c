// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::Error;
use rocksdb::{DBCompactionStyle, DBCompressionType, LogLevel, Options};
use serde::{Deserialize, Serialize};

/// `RocksDB` configuration exposed in pharos.
/// Only a subset of possible options is implemented, add missing ones when needed.
/// For the description of the different options please refer to the `rocksdb`
/// crate documentation. <https://docs.rs/rocksdb/latest/rocksdb/>
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RocksDbConfig {
    pub create_if_missing: bool,
    pub parallelism: i32,
    /// This is the `memtable` size in bytes.
    pub write_buffer_size: usize,
    pub max_open_files: i32,
    pub max_background_jobs: Option<i32>,
    pub compaction_style: String,
    pub compression_type: String,
    pub enable_statistics: bool,
    pub stats_dump_period_sec: u32,
    pub log_level: String,
}

impl RocksDbConfig {
    pub fn to_options(&self) -> Result<Options, Error> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(self.create_if_missing);
        db_opts.create_missing_column_families(true);
        db_opts.increase_parallelism(self.parallelism);
        db_opts.set_write_buffer_size(self.write_buffer_size);
        db_opts.set_max_open_files(self.max_open_files);

        if let Some(max_background_jobs) = self.max_background_jobs {
            db_opts.set_max_background_jobs(max_background_jobs);
        }
        if let Some(compaction_style) = compaction_style_from_str(&self.compaction_style)? {
            db_opts.set_compaction_style(compaction_style);
            db_opts.set_disable_auto_compactions(false);
        } else {
            db_opts.set_disable_auto_compactions(true);
        }
        db_opts.set_compression_type(compression_type_from_str(&self.compression_type)?);
        if self.enable_statistics {
            db_opts.set_stats_dump_period_sec(self.stats_dump_period_sec);
            db_opts.enable_statistics();
        };
        db_opts.set_log_level(log_level_from_str(&self.log_level)?);
        Ok(db_opts)
    }
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            parallelism: num_cpus::get() as i32,
            write_buffer_size: 64 * 1024 * 1024,
            max_open_files: 1024,
            max_background_jobs: None,
            compaction_style: "level".into(),
            compression_type: "lz4".into(),
            enable_statistics: false,
            stats_dump_period_sec: 600,
            log_level: "warn".into(),
        }
    }
}

/// Converts string to a compaction style `RocksDB` variant.
pub(crate) fn compaction_style_from_str(s: &str) -> Result<Option<DBCompactionStyle>, Error> {
    match s.to_lowercase().as_str() {
        "level" => Ok(Some(DBCompactionStyle::Level)),
        "universal" => Ok(Some(DBCompactionStyle::Universal)),
        "fifo" => Ok(Some(DBCompactionStyle::Fifo)),
        "none" => Ok(None),
        _ => Err(Error::Other("invalid compaction option".into())),
    }
}

/// Converts string to a compression type `RocksDB` variant.
pub(crate) fn compression_type_from_str(s: &str) -> Result<DBCompressionType, Error> {
    match s.to_lowercase().as_str() {
        "lz4" => Ok(DBCompressionType::Lz4),
        "none" => Ok(DBCompressionType::None),
        opt => Err(Error::Other(format!(
            "invalid compression option: {opt}, valid options: lz4,none"
        ))),
    }
}

/// Converts string to a log level `RocksDB` variant.
pub(crate) fn log_level_from_str(s: &str) -> Result<LogLevel, Error> {
    match s.to_lowercase().as_str() {
        "debug" => Ok(LogLevel::Debug),
        "warn" => Ok(LogLevel::Warn),
        "error" => Ok(LogLevel::Error),
        "fatal" => Ok(LogLevel::Fatal),
        "header" => Ok(LogLevel::Header),
        _ => Err(Error::Other("invalid log level option".into())),
    }
}
