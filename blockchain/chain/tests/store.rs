// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use pharos_beacon::Beacon;
use pharos_chain::{CallbackStore, ChainError, MemStore, RocksStore, Store};
use pharos_db::rocks_config::RocksDbConfig;
use std::sync::mpsc;
use std::time::Duration;

fn open(dir: &tempfile::TempDir) -> RocksStore {
    RocksStore::open(dir.path(), &RocksDbConfig::default()).unwrap()
}

fn b1() -> Beacon {
    Beacon::new(
        145,
        b"a magnificent signature".to_vec(),
        b"one signature to".to_vec(),
    )
}

fn b2() -> Beacon {
    Beacon::new(
        146,
        b"is not worth an invalid one".to_vec(),
        b"govern them all".to_vec(),
    )
}

#[test]
fn store_order() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);

    store.put(&b1()).unwrap();
    assert_eq!(store.len().unwrap(), 1);
    assert_eq!(store.last().unwrap(), b1());

    store.put(&b2()).unwrap();
    assert_eq!(store.last().unwrap(), b2());
    // stable across repeated reads
    assert_eq!(store.last().unwrap(), b2());
    assert_eq!(store.last().unwrap(), b2());
}

#[test]
fn store_put_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);

    store.put(&b1()).unwrap();
    assert_eq!(store.len().unwrap(), 1);
    store.put(&b1()).unwrap();
    assert_eq!(store.len().unwrap(), 1);
    store.put(&b2()).unwrap();
    assert_eq!(store.len().unwrap(), 2);
    assert_eq!(store.last().unwrap(), b2());
}

#[test]
fn store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = open(&dir);
        store.put(&b1()).unwrap();
        store.put(&b2()).unwrap();
        store.close().unwrap();
    }
    let store = open(&dir);
    assert_eq!(store.len().unwrap(), 2);
    assert_eq!(store.get(145).unwrap(), b1());
    let last = store.cursor(|c| c.last()).unwrap();
    assert_eq!(last, Some(b2()));
}

#[test]
fn cursor_traverses_in_round_order() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    store.put(&b1()).unwrap();
    store.put(&b2()).unwrap();

    store
        .cursor(|c| {
            let expected = [b1(), b2()];
            let mut i = 0;
            let mut current = c.first()?;
            while let Some(beacon) = current {
                assert_eq!(expected[i], beacon);
                i += 1;
                current = c.next()?;
            }
            assert_eq!(i, expected.len());

            assert_eq!(c.seek(10_000)?, None);
            Ok(())
        })
        .unwrap();
}

#[test]
fn seek_and_get_miss() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    store.put(&b1()).unwrap();
    store.put(&b2()).unwrap();

    let missing = store.cursor(|c| c.seek(10_000)).unwrap();
    assert!(missing.is_none());
    assert!(matches!(store.get(10_000), Err(ChainError::NoBeaconSaved)));
}

#[test]
fn empty_store_has_no_last() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    assert!(matches!(store.last(), Err(ChainError::NoBeaconSaved)));
}

#[test]
fn different_beacon_at_same_round_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    store.put(&b1()).unwrap();

    let rewrite = Beacon::new(145, b"other prev".to_vec(), b"other sig".to_vec());
    assert!(matches!(
        store.put(&rewrite),
        Err(ChainError::BeaconConflict(145))
    ));
    // the stored beacon is untouched
    assert_eq!(store.get(145).unwrap(), b1());
    assert_eq!(store.len().unwrap(), 1);
}

#[test]
fn closed_store_fails() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    store.put(&b1()).unwrap();
    store.close().unwrap();

    assert!(matches!(store.put(&b2()), Err(ChainError::Closed)));
    assert!(matches!(store.last(), Err(ChainError::Closed)));
    assert!(matches!(store.close(), Err(ChainError::Closed)));
}

#[test]
fn callback_fires_asynchronously() {
    let dir = tempfile::tempdir().unwrap();
    let store = CallbackStore::new(open(&dir));

    let (tx, rx) = mpsc::channel();
    store.add_callback(move |beacon| {
        tx.send(beacon).unwrap();
    });

    store.put(&b1()).unwrap();
    let received = rx.recv_timeout(Duration::from_millis(50)).unwrap();
    assert_eq!(received, b1());
}

#[test]
fn callbacks_preserve_put_order() {
    let store = CallbackStore::new(MemStore::new());

    let (tx, rx) = mpsc::channel();
    store.add_callback(move |beacon| {
        tx.send(beacon.round()).unwrap();
    });

    for round in 1..=20u64 {
        let beacon = Beacon::new(round, vec![round as u8 - 1], vec![round as u8]);
        store.put(&beacon).unwrap();
    }

    let mut rounds = Vec::new();
    for _ in 0..20 {
        rounds.push(rx.recv_timeout(Duration::from_secs(1)).unwrap());
    }
    assert_eq!(rounds, (1..=20).collect::<Vec<u64>>());
}

#[test]
fn slow_subscriber_does_not_stall_put() {
    let store = CallbackStore::new(MemStore::new());

    // a subscriber that never drains fast
    store.add_callback(move |_| {
        std::thread::sleep(Duration::from_secs(5));
    });
    let (tx, rx) = mpsc::channel();
    store.add_callback(move |beacon| {
        tx.send(beacon.round()).unwrap();
    });

    let started = std::time::Instant::now();
    for round in 1..=5u64 {
        store
            .put(&Beacon::new(round, vec![0], vec![round as u8]))
            .unwrap();
    }
    assert!(started.elapsed() < Duration::from_secs(1));
    // the healthy subscriber still sees everything, in order
    for round in 1..=5u64 {
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), round);
    }
}

#[test]
fn failed_put_does_not_notify() {
    let store = CallbackStore::new(MemStore::new());
    let (tx, rx) = mpsc::channel();
    store.add_callback(move |beacon| {
        tx.send(beacon.round()).unwrap();
    });

    store.put(&b1()).unwrap();
    assert_eq!(rx.recv_timeout(Duration::from_millis(500)).unwrap(), 145);

    let conflicting = Beacon::new(145, b"x".to_vec(), b"y".to_vec());
    assert!(store.put(&conflicting).is_err());
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn mem_store_matches_contract() {
    let store = MemStore::new();
    store.put(&b1()).unwrap();
    store.put(&b1()).unwrap();
    store.put(&b2()).unwrap();
    assert_eq!(store.len().unwrap(), 2);
    assert_eq!(store.last().unwrap(), b2());
    assert_eq!(store.get(145).unwrap(), b1());
    assert!(matches!(store.get(7), Err(ChainError::NoBeaconSaved)));

    let collected = store
        .cursor(|c| {
            let mut out = Vec::new();
            let mut current = c.first()?;
            while let Some(beacon) = current {
                out.push(beacon.round());
                current = c.next()?;
            }
            Ok(out)
        })
        .unwrap();
    assert_eq!(collected, vec![145, 146]);

    store.close().unwrap();
    assert!(matches!(store.len(), Err(ChainError::Closed)));
}
