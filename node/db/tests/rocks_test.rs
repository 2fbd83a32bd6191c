// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod subtests;

use pharos_db::rocks::RocksDb;
use pharos_db::rocks_config::RocksDbConfig;
use pharos_db::Store;

fn open(dir: &tempfile::TempDir) -> RocksDb {
    RocksDb::open(
        dir.path(),
        &RocksDbConfig::default(),
        &["left", "right", "sync"],
    )
    .unwrap()
}

#[test]
fn rocks_db_write() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir);
    subtests::write(&db);
}

#[test]
fn rocks_db_read() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir);
    subtests::read(&db);
}

#[test]
fn rocks_db_exists() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir);
    subtests::exists(&db);
}

#[test]
fn rocks_db_does_not_exist() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir);
    subtests::does_not_exist(&db);
}

#[test]
fn rocks_db_delete() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir);
    subtests::delete(&db);
}

#[test]
fn rocks_db_columns_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir);
    subtests::columns_are_isolated(&db);
}

#[test]
fn rocks_db_write_sync() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir);
    subtests::write_sync(&db);
}

#[test]
fn rocks_db_unknown_column() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir);
    assert!(db.read_column([0], "missing").is_err());
}

#[test]
fn rocks_db_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = open(&dir);
        db.write([1, 2, 3], [4, 5, 6]).unwrap();
    }
    let db = open(&dir);
    assert_eq!(db.read([1, 2, 3]).unwrap(), Some(vec![4, 5, 6]));
}
