// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The semantic message types the DKG subsystem exchanges. Operator commands
//! arrive over a local channel; gossip packets arrive from peers through the
//! transport, which authenticates the sender before they land here.

use crate::protocol::Bundle;
use pharos_key::{Group, Identity};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// Everything a leader proposes for a new epoch. Broadcast verbatim so every
/// participant validates the same view.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProposalTerms {
    pub beacon_id: String,
    pub epoch: u32,
    pub leader: Identity,
    pub threshold: u32,
    /// Absolute deadline after which the epoch auto-aborts.
    pub timeout: SystemTime,
    pub catchup_period: Duration,
    pub beacon_period: Duration,
    pub scheme_id: String,
    pub genesis_time: u64,
    /// Empty on epoch 1; frozen once the first epoch starts executing and
    /// copied verbatim on every reshare.
    #[serde(with = "serde_bytes")]
    pub genesis_seed: Vec<u8>,
    pub transition_time: u64,
    pub joining: Vec<Identity>,
    pub remaining: Vec<Identity>,
    pub leaving: Vec<Identity>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AcceptProposal {
    pub acceptor: Identity,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RejectProposal {
    pub rejector: Identity,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StartExecution {
    /// When the leader issued the execute, for operator forensics only.
    pub time: SystemTime,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AbortDkg {
    pub reason: String,
}

/// Routing envelope carried by every gossip packet. The transport layer has
/// already verified that the packet really came from `address`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GossipMetadata {
    pub beacon_id: String,
    pub epoch: u32,
    pub address: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum GossipData {
    Proposal(ProposalTerms),
    Accept(AcceptProposal),
    Reject(RejectProposal),
    Execute(StartExecution),
    Abort(AbortDkg),
    /// Carrier for the cryptographic protocol messages of an execution.
    Dkg(Bundle),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GossipPacket {
    pub metadata: GossipMetadata,
    pub data: GossipData,
}

impl GossipPacket {
    pub fn new(beacon_id: &str, epoch: u32, sender: &Identity, data: GossipData) -> Self {
        Self {
            metadata: GossipMetadata {
                beacon_id: beacon_id.to_owned(),
                epoch,
                address: sender.address.clone(),
            },
            data,
        }
    }
}

/// Parameters for an epoch 1 proposal.
#[derive(Clone, Debug)]
pub struct ProposalOptions {
    pub threshold: u32,
    pub beacon_period: Duration,
    pub catchup_period: Duration,
    pub scheme_id: String,
    pub genesis_time: u64,
    pub joining: Vec<Identity>,
}

/// Parameters for a resharing proposal. Chain parameters are inherited from
/// the last completed epoch.
#[derive(Clone, Debug)]
pub struct ResharingOptions {
    pub threshold: u32,
    pub catchup_period: Duration,
    pub transition_time: u64,
    pub joining: Vec<Identity>,
    pub remaining: Vec<Identity>,
    pub leaving: Vec<Identity>,
}

/// Operator commands. `Initial` and `Resharing` are leader-issued; the rest
/// answer a proposal previously received from the leader.
#[derive(Clone, Debug)]
pub enum DkgCommand {
    Initial(ProposalOptions),
    Resharing(ResharingOptions),
    /// Joiners in a reshare bring the previous group file along since they
    /// were not part of the old group.
    Join { previous_group: Option<Group> },
    Accept,
    Reject { reason: String },
    Execute,
    Abort { reason: String },
}
