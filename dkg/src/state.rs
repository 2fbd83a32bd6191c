// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The per-epoch DKG state machine. A [`DbState`] is an immutable snapshot;
//! every transition borrows the current snapshot and either returns the next
//! one or an error, leaving the input untouched. The driver persists whatever
//! comes back.

use crate::packets::{GossipData, GossipPacket, ProposalTerms};
use pharos_key::bytes::encode_g1;
use pharos_key::{Group, Identity, Share};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::{Duration, SystemTime};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// No epoch has ever run for this beacon id.
    Fresh,
    /// A non-leader received a proposal and has not answered yet.
    Proposed,
    /// The local node is the leader and has a proposal in flight.
    Proposing,
    Accepted,
    Rejected,
    /// The cryptographic protocol is running.
    Executing,
    /// Terminal success: group and share established.
    Complete,
    TimedOut,
    Aborted,
    /// A joiner has accepted and awaits execution.
    Joined,
    /// A leaver has been notified the group moves on without it.
    Left,
    Failed,
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Status::Complete | Status::TimedOut | Status::Aborted | Status::Failed | Status::Left
        )
    }

    /// States a brand new proposal may arrive in.
    pub fn can_receive_proposal(&self) -> bool {
        matches!(self, Status::Fresh) || self.is_terminal()
    }

    /// States carrying a live deadline.
    pub fn has_deadline(&self) -> bool {
        matches!(
            self,
            Status::Proposed
                | Status::Proposing
                | Status::Accepted
                | Status::Rejected
                | Status::Joined
                | Status::Executing
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("invalid transition attempt from {0} to {1}")]
    InvalidStateChange(Status, Status),
    #[error("packet for beacon {got} cannot apply to beacon {expected}")]
    WrongBeaconId { got: String, expected: String },
    #[error("packet epoch {got} is stale or future, expected {expected}")]
    StaleEpoch { got: u32, expected: u32 },
    #[error("the deadline for this epoch has passed")]
    TimedOut,
    #[error("this epoch has been aborted")]
    Aborted,
    #[error("only the leader may do this")]
    NotLeader,
    #[error("this node is not part of the proposal")]
    SelfMissingFromProposal,
    #[error("this node is not among the joiners of the proposal")]
    CannotJoin,
    #[error("a node marked as leaving cannot answer the proposal")]
    CannotAcceptLeaving,
    #[error("leader is not part of the proposed group")]
    LeaderNotPartOfGroup,
    #[error("invalid proof of possession for {0}")]
    InvalidSignature(String),
    #[error("threshold {threshold} larger than the {nodes} nodes of the group")]
    ThresholdTooHigh { threshold: u32, nodes: u32 },
    #[error("invalid proposal: {0}")]
    InvalidProposal(String),
    #[error("resharing requires a previously completed epoch")]
    MissingCompletedEpoch,
    #[error("{acceptors} acceptances below the threshold of {threshold}")]
    ThresholdNotMet { acceptors: u32, threshold: u32 },
    #[error("invalid final group: {0}")]
    FinalGroupInvalid(String),
    #[error("packet cannot apply to the state machine")]
    UnexpectedPacket,
    #[error("{0} did not receive the proposal")]
    UnknownParticipant(String),
}

/// Snapshot of one beacon id's DKG progress. Secret material stays local:
/// `key_share` is persisted but never put on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DbState {
    pub beacon_id: String,
    pub epoch: u32,
    pub state: Status,
    pub threshold: u32,
    pub timeout: SystemTime,
    pub scheme_id: String,
    pub genesis_time: u64,
    #[serde(with = "serde_bytes")]
    pub genesis_seed: Vec<u8>,
    pub transition_time: u64,
    pub catchup_period: Duration,
    pub beacon_period: Duration,
    pub leader: Option<Identity>,
    pub remaining: Vec<Identity>,
    pub joining: Vec<Identity>,
    pub leaving: Vec<Identity>,
    pub acceptors: Vec<Identity>,
    pub rejectors: Vec<Identity>,
    /// On `Complete` the freshly qualified group; while a reshare is in
    /// flight, the group of the previous epoch.
    pub final_group: Option<Group>,
    /// The local share matching `final_group`.
    pub key_share: Option<Share>,
}

impl DbState {
    /// The state a beacon id is in before any epoch ever ran.
    pub fn fresh(beacon_id: &str) -> Self {
        Self {
            beacon_id: beacon_id.to_owned(),
            epoch: 0,
            state: Status::Fresh,
            threshold: 0,
            timeout: SystemTime::UNIX_EPOCH,
            scheme_id: String::new(),
            genesis_time: 0,
            genesis_seed: vec![],
            transition_time: 0,
            catchup_period: Duration::ZERO,
            beacon_period: Duration::ZERO,
            leader: None,
            remaining: vec![],
            joining: vec![],
            leaving: vec![],
            acceptors: vec![],
            rejectors: vec![],
            final_group: None,
            key_share: None,
        }
    }

    /// Everybody ending up in the new group.
    pub fn joint_participants(&self) -> Vec<Identity> {
        let mut all = self.remaining.clone();
        for j in &self.joining {
            if !contains(&all, j) {
                all.push(j.clone());
            }
        }
        all
    }

    /// Everybody concerned by this epoch, leavers included.
    pub fn all_participants(&self) -> Vec<Identity> {
        let mut all = self.joint_participants();
        for l in &self.leaving {
            if !contains(&all, l) {
                all.push(l.clone());
            }
        }
        all
    }

    pub fn deadline_passed(&self, now: SystemTime) -> bool {
        self.state.has_deadline() && now > self.timeout
    }

    fn ensure_deadline(&self) -> Result<(), StateError> {
        if self.deadline_passed(SystemTime::now()) {
            return Err(StateError::TimedOut);
        }
        Ok(())
    }

    fn ensure_not_aborted(&self) -> Result<(), StateError> {
        if self.state == Status::Aborted {
            return Err(StateError::Aborted);
        }
        Ok(())
    }

    /// Leader-side transition on issuing a proposal.
    pub fn proposing(
        &self,
        me: &Identity,
        terms: &ProposalTerms,
        latest_complete: Option<&DbState>,
        skip_verification: bool,
    ) -> Result<DbState, StateError> {
        if &terms.leader != me {
            return Err(StateError::NotLeader);
        }
        self.receive_proposal(me, terms, latest_complete, skip_verification, Status::Proposing)
    }

    /// Follower-side transition on receiving a proposal. The caller has
    /// already checked the packet sender is the proposed leader.
    pub fn proposed(
        &self,
        me: &Identity,
        terms: &ProposalTerms,
        latest_complete: Option<&DbState>,
        skip_verification: bool,
    ) -> Result<DbState, StateError> {
        if &terms.leader == me {
            // our own proposal echoed back is not a valid event
            return Err(StateError::UnexpectedPacket);
        }
        self.receive_proposal(me, terms, latest_complete, skip_verification, Status::Proposed)
    }

    fn receive_proposal(
        &self,
        me: &Identity,
        terms: &ProposalTerms,
        latest_complete: Option<&DbState>,
        skip_verification: bool,
        to: Status,
    ) -> Result<DbState, StateError> {
        if !self.state.can_receive_proposal() {
            return Err(StateError::InvalidStateChange(self.state, to));
        }
        if !self.beacon_id.is_empty() && terms.beacon_id != self.beacon_id {
            return Err(StateError::WrongBeaconId {
                got: terms.beacon_id.clone(),
                expected: self.beacon_id.clone(),
            });
        }
        validate_proposal(terms, skip_verification)?;

        let joint = joint_of(terms);
        let i_join = contains(&terms.joining, me);
        let i_remain = contains(&terms.remaining, me);
        let i_leave = contains(&terms.leaving, me);
        if !(i_join || i_remain || i_leave) {
            return Err(StateError::SelfMissingFromProposal);
        }
        if !contains(&joint, &terms.leader) {
            return Err(StateError::LeaderNotPartOfGroup);
        }

        let mut genesis_seed = terms.genesis_seed.clone();
        if terms.epoch == 1 {
            if self.state == Status::Complete || self.epoch > 1 {
                return Err(StateError::InvalidProposal(
                    "this beacon already ran an epoch, reshare instead".into(),
                ));
            }
            if !terms.remaining.is_empty() || !terms.leaving.is_empty() {
                return Err(StateError::InvalidProposal(
                    "the first epoch can only have joiners".into(),
                ));
            }
        } else {
            if !i_join {
                // joiners have nothing local to check the proposal against;
                // everybody else must descend from a completed epoch
                let latest = latest_complete.ok_or(StateError::MissingCompletedEpoch)?;
                if terms.epoch != self.epoch + 1 {
                    return Err(StateError::StaleEpoch {
                        got: terms.epoch,
                        expected: self.epoch + 1,
                    });
                }
                if terms.genesis_time != latest.genesis_time
                    || terms.scheme_id != latest.scheme_id
                    || terms.genesis_seed != latest.genesis_seed
                {
                    return Err(StateError::InvalidProposal(
                        "chain parameters differ from the completed epoch".into(),
                    ));
                }
                genesis_seed = latest.genesis_seed.clone();
            }
            if terms.remaining.is_empty() {
                return Err(StateError::InvalidProposal(
                    "a reshare needs at least one remaining node".into(),
                ));
            }
            if terms.genesis_seed.is_empty() {
                return Err(StateError::InvalidProposal(
                    "a reshare cannot drop the genesis seed".into(),
                ));
            }
        }

        // the previous group and share stay around until the new epoch
        // completes; the executor re-shares from them
        let carried = latest_complete.or(if self.state == Status::Complete {
            Some(self)
        } else {
            None
        });

        Ok(DbState {
            beacon_id: terms.beacon_id.clone(),
            epoch: terms.epoch,
            state: to,
            threshold: terms.threshold,
            timeout: terms.timeout,
            scheme_id: terms.scheme_id.clone(),
            genesis_time: terms.genesis_time,
            genesis_seed,
            transition_time: terms.transition_time,
            catchup_period: terms.catchup_period,
            beacon_period: terms.beacon_period,
            leader: Some(terms.leader.clone()),
            remaining: terms.remaining.clone(),
            joining: terms.joining.clone(),
            leaving: terms.leaving.clone(),
            acceptors: vec![],
            rejectors: vec![],
            final_group: carried.and_then(|s| s.final_group.clone()),
            key_share: carried.and_then(|s| s.key_share.clone()),
        })
    }

    /// A remaining node answers the proposal positively.
    pub fn accepted(&self, me: &Identity) -> Result<DbState, StateError> {
        self.ensure_not_aborted()?;
        self.ensure_deadline()?;
        if self.state != Status::Proposed {
            return Err(StateError::InvalidStateChange(self.state, Status::Accepted));
        }
        if contains(&self.leaving, me) {
            return Err(StateError::CannotAcceptLeaving);
        }
        if !contains(&self.joint_participants(), me) {
            return Err(StateError::SelfMissingFromProposal);
        }
        Ok(DbState {
            state: Status::Accepted,
            ..self.clone()
        })
    }

    /// A node answers the proposal negatively.
    pub fn rejected(&self, me: &Identity) -> Result<DbState, StateError> {
        self.ensure_not_aborted()?;
        self.ensure_deadline()?;
        if self.state != Status::Proposed {
            return Err(StateError::InvalidStateChange(self.state, Status::Rejected));
        }
        if !contains(&self.all_participants(), me) {
            return Err(StateError::SelfMissingFromProposal);
        }
        Ok(DbState {
            state: Status::Rejected,
            ..self.clone()
        })
    }

    /// A joiner acknowledges the proposal. Reshare joiners bring the previous
    /// group file along, it is what the execution validates dealers against.
    pub fn joined(
        &self,
        me: &Identity,
        previous_group: Option<Group>,
    ) -> Result<DbState, StateError> {
        self.ensure_not_aborted()?;
        self.ensure_deadline()?;
        if self.state != Status::Proposed {
            return Err(StateError::InvalidStateChange(self.state, Status::Joined));
        }
        if !contains(&self.joining, me) {
            return Err(StateError::CannotJoin);
        }
        if self.epoch > 1 && previous_group.is_none() && self.final_group.is_none() {
            return Err(StateError::MissingCompletedEpoch);
        }
        Ok(DbState {
            state: Status::Joined,
            final_group: previous_group.or_else(|| self.final_group.clone()),
            ..self.clone()
        })
    }

    /// A leaver learns the group moves on without it.
    pub fn left(&self, me: &Identity) -> Result<DbState, StateError> {
        if !matches!(self.state, Status::Proposed | Status::Accepted) {
            return Err(StateError::InvalidStateChange(self.state, Status::Left));
        }
        if !contains(&self.leaving, me) {
            return Err(StateError::UnknownParticipant(me.address.clone()));
        }
        Ok(DbState {
            state: Status::Left,
            ..self.clone()
        })
    }

    /// Leader aggregation of an acceptance. A repeated answer from the same
    /// participant replaces the previous one.
    pub fn received_acceptance(
        &self,
        me: &Identity,
        them: &Identity,
    ) -> Result<DbState, StateError> {
        self.ensure_not_aborted()?;
        self.ensure_deadline()?;
        if self.state != Status::Proposing {
            return Err(StateError::InvalidStateChange(self.state, Status::Proposing));
        }
        if self.leader.as_ref() != Some(me) {
            return Err(StateError::NotLeader);
        }
        if !contains(&self.joint_participants(), them) {
            return Err(StateError::UnknownParticipant(them.address.clone()));
        }
        let mut next = self.clone();
        next.acceptors.retain(|a| a != them);
        next.rejectors.retain(|r| r != them);
        next.acceptors.push(them.clone());
        Ok(next)
    }

    /// Leader aggregation of a rejection, same replacement rule.
    pub fn received_rejection(
        &self,
        me: &Identity,
        them: &Identity,
    ) -> Result<DbState, StateError> {
        self.ensure_not_aborted()?;
        self.ensure_deadline()?;
        if self.state != Status::Proposing {
            return Err(StateError::InvalidStateChange(self.state, Status::Proposing));
        }
        if self.leader.as_ref() != Some(me) {
            return Err(StateError::NotLeader);
        }
        if !contains(&self.joint_participants(), them) {
            return Err(StateError::UnknownParticipant(them.address.clone()));
        }
        let mut next = self.clone();
        next.acceptors.retain(|a| a != them);
        next.rejectors.retain(|r| r != them);
        next.rejectors.push(them.clone());
        Ok(next)
    }

    /// Leader-side kick-off: requires a threshold of acceptances.
    pub fn start_executing(&self, me: &Identity) -> Result<DbState, StateError> {
        self.ensure_not_aborted()?;
        self.ensure_deadline()?;
        if self.state != Status::Proposing {
            return Err(StateError::InvalidStateChange(self.state, Status::Executing));
        }
        if self.leader.as_ref() != Some(me) {
            return Err(StateError::NotLeader);
        }
        if (self.acceptors.len() as u32) < self.threshold {
            return Err(StateError::ThresholdNotMet {
                acceptors: self.acceptors.len() as u32,
                threshold: self.threshold,
            });
        }
        Ok(self.into_executing())
    }

    /// Follower-side transition on the execute packet. Leavers transition to
    /// `Left` instead.
    pub fn executing(&self, me: &Identity) -> Result<DbState, StateError> {
        self.ensure_not_aborted()?;
        self.ensure_deadline()?;
        if contains(&self.leaving, me) {
            return self.left(me);
        }
        if !matches!(self.state, Status::Accepted | Status::Joined) {
            return Err(StateError::InvalidStateChange(self.state, Status::Executing));
        }
        if !contains(&self.joint_participants(), me) {
            return Err(StateError::SelfMissingFromProposal);
        }
        Ok(self.into_executing())
    }

    fn into_executing(&self) -> DbState {
        let mut next = self.clone();
        next.state = Status::Executing;
        if next.epoch == 1 && next.genesis_seed.is_empty() {
            next.genesis_seed = next.derive_genesis_seed();
        }
        next
    }

    /// Every node derives the same seed from the proposal it agreed on.
    fn derive_genesis_seed(&self) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(self.beacon_id.as_bytes());
        hasher.update(self.genesis_time.to_be_bytes());
        hasher.update(self.beacon_period.as_secs().to_be_bytes());
        hasher.update(self.scheme_id.as_bytes());
        hasher.update(self.threshold.to_be_bytes());
        for p in self.joint_participants() {
            hasher.update(p.address.as_bytes());
            hasher.update(encode_g1(&p.key));
        }
        hasher.finalize().to_vec()
    }

    /// Terminal success: records the qualified group and the local share.
    pub fn complete(&self, final_group: Group, key_share: Share) -> Result<DbState, StateError> {
        self.ensure_deadline()?;
        if self.state != Status::Executing {
            return Err(StateError::InvalidStateChange(self.state, Status::Complete));
        }
        if (final_group.len() as u32) < self.threshold {
            return Err(StateError::FinalGroupInvalid(format!(
                "{} nodes below the threshold of {}",
                final_group.len(),
                self.threshold
            )));
        }
        let joint = self.joint_participants();
        for node in &final_group.nodes {
            if !contains(&joint, &node.identity) {
                return Err(StateError::FinalGroupInvalid(format!(
                    "{} was never proposed",
                    node.identity.address
                )));
            }
        }
        Ok(DbState {
            state: Status::Complete,
            final_group: Some(final_group),
            key_share: Some(key_share),
            ..self.clone()
        })
    }

    /// Terminal failure of the running epoch.
    pub fn failed(&self) -> Result<DbState, StateError> {
        if self.state.is_terminal() {
            return Err(StateError::InvalidStateChange(self.state, Status::Failed));
        }
        Ok(DbState {
            state: Status::Failed,
            ..self.clone()
        })
    }

    /// Leader-initiated abort, terminal.
    pub fn aborted(&self) -> Result<DbState, StateError> {
        if self.state.is_terminal() || self.state == Status::Fresh {
            return Err(StateError::InvalidStateChange(self.state, Status::Aborted));
        }
        Ok(DbState {
            state: Status::Aborted,
            ..self.clone()
        })
    }

    /// Deadline reached, terminal. Checked on every transition and by the
    /// background sweep.
    pub fn timed_out(&self) -> Result<DbState, StateError> {
        if self.state.is_terminal() || self.state == Status::Fresh {
            return Err(StateError::InvalidStateChange(self.state, Status::TimedOut));
        }
        Ok(DbState {
            state: Status::TimedOut,
            ..self.clone()
        })
    }

    /// Applies an inbound non-proposal packet. Proposals carry enough context
    /// to need their own entry point, [`DbState::proposed`].
    pub fn apply(&self, me: &Identity, packet: &GossipPacket) -> Result<DbState, StateError> {
        if packet.metadata.beacon_id != self.beacon_id {
            return Err(StateError::WrongBeaconId {
                got: packet.metadata.beacon_id.clone(),
                expected: self.beacon_id.clone(),
            });
        }
        if packet.metadata.epoch != self.epoch {
            return Err(StateError::StaleEpoch {
                got: packet.metadata.epoch,
                expected: self.epoch,
            });
        }
        match &packet.data {
            GossipData::Accept(accept) => self.received_acceptance(me, &accept.acceptor),
            GossipData::Reject(reject) => self.received_rejection(me, &reject.rejector),
            GossipData::Execute(_) => self.executing(me),
            GossipData::Abort(_) => self.aborted(),
            GossipData::Proposal(_) | GossipData::Dkg(_) => Err(StateError::UnexpectedPacket),
        }
    }
}

fn contains(list: &[Identity], id: &Identity) -> bool {
    list.iter().any(|p| p == id)
}

fn joint_of(terms: &ProposalTerms) -> Vec<Identity> {
    let mut all = terms.remaining.clone();
    for j in &terms.joining {
        if !contains(&all, j) {
            all.push(j.clone());
        }
    }
    all
}

fn validate_proposal(terms: &ProposalTerms, skip_verification: bool) -> Result<(), StateError> {
    if terms.beacon_id.is_empty() {
        return Err(StateError::InvalidProposal("empty beacon id".into()));
    }
    if terms.epoch == 0 {
        return Err(StateError::InvalidProposal("epoch cannot be zero".into()));
    }
    if terms.genesis_time == 0 {
        return Err(StateError::InvalidProposal("genesis time is zero".into()));
    }
    if terms.beacon_period.is_zero() {
        return Err(StateError::InvalidProposal("beacon period is zero".into()));
    }
    if terms.timeout <= SystemTime::now() {
        return Err(StateError::TimedOut);
    }

    let joint = joint_of(terms);
    if joint.is_empty() {
        return Err(StateError::InvalidProposal("no participants".into()));
    }
    if terms.threshold == 0 {
        return Err(StateError::InvalidProposal("threshold is zero".into()));
    }
    if terms.threshold > joint.len() as u32 {
        return Err(StateError::ThresholdTooHigh {
            threshold: terms.threshold,
            nodes: joint.len() as u32,
        });
    }

    // joining, remaining and leaving must partition without overlap
    let sets = [
        (&terms.joining, &terms.remaining),
        (&terms.joining, &terms.leaving),
        (&terms.remaining, &terms.leaving),
    ];
    for (a, b) in sets {
        for p in a.iter() {
            if contains(b, p) {
                return Err(StateError::InvalidProposal(format!(
                    "{} appears in more than one participant set",
                    p.address
                )));
            }
        }
    }
    for list in [&terms.joining, &terms.remaining, &terms.leaving] {
        for (i, p) in list.iter().enumerate() {
            if list[..i].contains(p) {
                return Err(StateError::InvalidProposal(format!(
                    "{} is listed twice",
                    p.address
                )));
            }
        }
    }

    if !skip_verification {
        for p in terms
            .joining
            .iter()
            .chain(terms.remaining.iter())
            .chain(terms.leaving.iter())
        {
            p.verify_pop()
                .map_err(|_| StateError::InvalidSignature(p.address.clone()))?;
        }
    }
    Ok(())
}
