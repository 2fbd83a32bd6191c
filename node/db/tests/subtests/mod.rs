// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use pharos_db::Store;

pub fn write<DB>(db: &DB)
where
    DB: Store,
{
    let key = [1];
    let value = [1];
    db.write(key, value).unwrap();
}

pub fn read<DB>(db: &DB)
where
    DB: Store,
{
    let key = [0];
    let value = [1];
    db.write(key, value).unwrap();
    let res = db.read(key).unwrap().unwrap();
    assert_eq!(value.as_ref(), res.as_slice());
}

pub fn exists<DB>(db: &DB)
where
    DB: Store,
{
    let key = [0];
    let value = [1];
    db.write(key, value).unwrap();
    let res = db.exists(key).unwrap();
    assert!(res);
}

pub fn does_not_exist<DB>(db: &DB)
where
    DB: Store,
{
    let key = [0];
    let res = db.exists(key).unwrap();
    assert!(!res);
}

pub fn delete<DB>(db: &DB)
where
    DB: Store,
{
    let key = [0];
    let value = [1];
    db.write(key, value).unwrap();
    assert!(db.exists(key).unwrap());
    db.delete(key).unwrap();
    assert!(!db.exists(key).unwrap());
}

pub fn columns_are_isolated<DB>(db: &DB)
where
    DB: Store,
{
    let key = [7];
    db.write_column(key, [1], "left").unwrap();
    db.write_column(key, [2], "right").unwrap();
    assert_eq!(db.read_column(key, "left").unwrap(), Some(vec![1]));
    assert_eq!(db.read_column(key, "right").unwrap(), Some(vec![2]));
    assert_eq!(db.read(key).unwrap(), None);

    db.delete_column(key, "left").unwrap();
    assert!(!db.exists_column(key, "left").unwrap());
    assert!(db.exists_column(key, "right").unwrap());
}

pub fn write_sync<DB>(db: &DB)
where
    DB: Store,
{
    let key = [9];
    let value = [42];
    db.write_sync_column(key, value, "sync").unwrap();
    assert_eq!(db.read_column(key, "sync").unwrap(), Some(vec![42]));
}
