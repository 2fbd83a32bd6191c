// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The distributed key generation subsystem: the per-epoch state machine and
//! its durable store, the clock-paced execution of the underlying threshold
//! cryptography, and the transport adapter DKG packets travel through.

pub mod execution;
pub mod network;
pub mod packets;
pub mod process;
pub mod protocol;
pub mod state;
pub mod store;

use pharos_key::{Group, Pair, Share};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

pub use execution::Execution;
pub use network::{DkgClient, Network, TransportError};
pub use packets::{DkgCommand, GossipData, GossipPacket};
pub use process::DkgProcess;
pub use state::{DbState, StateError, Status};
pub use store::{DkgStore, DkgStoreError};

/// Tuning knobs of the DKG subsystem.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How long an epoch may stay in flight before every node abandons it.
    pub timeout: Duration,
    /// The pace the executor moves between protocol phases at.
    pub time_between_dkg_phases: Duration,
    /// Grace period before the first broadcast of an execution, so peers can
    /// set up their receivers. Without it early packets are dropped.
    pub kickoff_grace_period: Duration,
    /// Skips verifying proofs of possession on proposals. Tests only.
    pub skip_key_verification: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            time_between_dkg_phases: Duration::from_secs(10),
            kickoff_grace_period: Duration::from_secs(5),
            skip_key_verification: false,
        }
    }
}

/// What a finished execution hands back: the qualified group and this node's
/// share of the new distributed key.
#[derive(Clone, Debug)]
pub struct ExecutionOutput {
    pub final_group: Group,
    pub key_share: Share,
}

/// Emitted on the completion channel exactly once per successful epoch; the
/// randomness loop picks it up to switch over to the new group.
#[derive(Clone, Debug)]
pub struct SharingOutput {
    pub beacon_id: String,
    pub old: Option<DbState>,
    pub new: DbState,
}

/// Hands out the local signing identity per beacon id. Kept to a single
/// method so the DKG subsystem does not depend on a daemon handle.
pub trait BeaconIdentifier: Send + Sync + 'static {
    fn keypair_for(&self, beacon_id: &str) -> Result<Pair, pharos_key::Error>;
}

#[derive(Debug, Error)]
pub enum DkgError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Store(#[from] DkgStoreError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Key(#[from] pharos_key::Error),
    #[error(transparent)]
    Protocol(#[from] protocol::ProtocolError),
    #[error("sender {0} is not authorized to send this packet")]
    UnauthorizedSender(String),
    #[error("only the leader may issue this command")]
    NotLeader,
}
