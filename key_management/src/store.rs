// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::{Error, Group, Pair, Share};
use log::info;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

pub const PAIR_FILE: &str = "pair.json";
pub const GROUP_FILE: &str = "group.json";
pub const SHARE_FILE: &str = "share.json";

/// On-disk storage of the longterm keypair and the artifacts of a finished
/// key generation, one directory per beacon id.
#[derive(Debug, Clone)]
pub struct FileStore {
    base: PathBuf,
}

impl FileStore {
    /// Creates the store rooted at `base`, creating the directory if needed.
    pub fn new<P: AsRef<Path>>(base: P) -> Result<Self, Error> {
        fs::create_dir_all(base.as_ref())?;
        Ok(Self {
            base: base.as_ref().to_owned(),
        })
    }

    fn path(&self, beacon_id: &str, file: &str) -> PathBuf {
        self.base.join(beacon_id).join(file)
    }

    fn save<T: Serialize>(&self, beacon_id: &str, file: &str, value: &T) -> Result<(), Error> {
        let path = self.path(beacon_id, file);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(writer, value)?;
        info!("saved key material file={}", path.display());
        Ok(())
    }

    fn load<T: DeserializeOwned>(&self, beacon_id: &str, file: &str) -> Result<T, Error> {
        let path = self.path(beacon_id, file);
        let reader = BufReader::new(
            File::open(&path).map_err(|_| Error::FileNotFound(path.display().to_string()))?,
        );
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn save_pair(&self, beacon_id: &str, pair: &Pair) -> Result<(), Error> {
        self.save(beacon_id, PAIR_FILE, pair)
    }

    pub fn load_pair(&self, beacon_id: &str) -> Result<Pair, Error> {
        self.load(beacon_id, PAIR_FILE)
    }

    pub fn save_group(&self, beacon_id: &str, group: &Group) -> Result<(), Error> {
        self.save(beacon_id, GROUP_FILE, group)
    }

    pub fn load_group(&self, beacon_id: &str) -> Result<Group, Error> {
        self.load(beacon_id, GROUP_FILE)
    }

    pub fn save_share(&self, beacon_id: &str, share: &Share) -> Result<(), Error> {
        self.save(beacon_id, SHARE_FILE, share)
    }

    pub fn load_share(&self, beacon_id: &str) -> Result<Share, Error> {
        self.load(beacon_id, SHARE_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poly::PrivatePoly;
    use crate::{minimum_threshold, DistPublic, Node};
    use blstrs::Scalar;
    use ff::Field;
    use rand::rngs::OsRng;
    use std::time::Duration;

    #[test]
    fn pair_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let pair = Pair::generate("127.0.0.1:8080", false);
        store.save_pair("default", &pair).unwrap();
        let loaded = store.load_pair("default").unwrap();
        assert_eq!(pair.public(), loaded.public());
        assert_eq!(pair.private(), loaded.private());
    }

    #[test]
    fn group_and_share_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();

        let poly = PrivatePoly::random(1, &mut OsRng);
        let nodes: Vec<Node> = (0..3)
            .map(|i| Node {
                index: i,
                identity: Pair::generate(&format!("127.0.0.1:{}", 9000 + i), false)
                    .public()
                    .clone(),
            })
            .collect();
        let group = Group {
            threshold: minimum_threshold(nodes.len()),
            nodes,
            period: Duration::from_secs(30),
            genesis_time: 1_700_000_000,
            transition_time: 0,
            genesis_seed: vec![9; 32],
            scheme_id: crate::scheme::SCHEME_ID.into(),
            public_key: DistPublic::from(poly.commit()),
        };
        let share = Share {
            index: 1,
            private: Scalar::random(&mut OsRng),
        };

        store.save_group("default", &group).unwrap();
        store.save_share("default", &share).unwrap();
        assert_eq!(store.load_group("default").unwrap(), group);
        assert_eq!(store.load_share("default").unwrap().private, share.private);
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        assert!(matches!(
            store.load_pair("default"),
            Err(Error::FileNotFound(_))
        ));
    }
}
