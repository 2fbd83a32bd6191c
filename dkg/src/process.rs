// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The front door of the DKG subsystem. Operator commands and inbound
//! packets both run their transition under one coarse lock, persist the
//! result, and only then dispatch side effects: the lock is never held
//! across a network send or an executor stop.

use crate::execution::{self, Execution, ExecutionArgs};
use crate::network::{DkgClient, Network};
use crate::packets::{
    AbortDkg, AcceptProposal, DkgCommand, GossipData, GossipPacket, ProposalOptions,
    ProposalTerms, RejectProposal, ResharingOptions, StartExecution,
};
use crate::state::{DbState, StateError, Status};
use crate::store::DkgStore;
use crate::{BeaconIdentifier, Config, DkgError, SharingOutput};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use pharos_key::{Identity, Pair};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;

pub(crate) struct Inner<DB> {
    pub store: DkgStore<DB>,
    pub executions: HashMap<String, Execution>,
    tracked: HashSet<String>,
}

/// Side effects a transition asks for, executed after the lock is released.
enum Action {
    Broadcast {
        to: Vec<Identity>,
        packet: GossipPacket,
        /// Critical sends abort on any failure and surface the error;
        /// non-critical ones skip unreachable peers.
        critical: bool,
        /// A failed fatal broadcast demotes the epoch to `Failed`. Only the
        /// leader's phase-initiating broadcasts are fatal.
        fatal: bool,
    },
    Start(DbState),
    Stop,
}

/// Orchestrates DKG state transitions for every beacon id of this node.
pub struct DkgProcess<DB, C, I> {
    inner: Arc<Mutex<Inner<DB>>>,
    network: Arc<Network<C>>,
    identity: Arc<I>,
    completed: flume::Sender<SharingOutput>,
    config: Config,
    sweeper: CancellationToken,
}

impl<DB, C, I> DkgProcess<DB, C, I>
where
    DB: pharos_db::Store + Send + Sync + 'static,
    C: DkgClient + 'static,
    I: BeaconIdentifier,
{
    pub fn new(
        store: DkgStore<DB>,
        identity: I,
        client: C,
        completed: flume::Sender<SharingOutput>,
        config: Config,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                store,
                executions: HashMap::new(),
                tracked: HashSet::new(),
            })),
            network: Arc::new(Network::new(client)),
            identity: Arc::new(identity),
            completed,
            config,
            sweeper: CancellationToken::new(),
        }
    }

    /// The current state of a beacon id, fresh if it never ran.
    pub fn status(&self, beacon_id: &str) -> Result<DbState, DkgError> {
        Ok(self.inner.lock().store.get_current(beacon_id)?)
    }

    /// See [`DkgStore::migrate_from_groupfile`].
    pub fn migrate(
        &self,
        beacon_id: &str,
        group: &pharos_key::Group,
        share: &pharos_key::Share,
    ) -> Result<(), DkgError> {
        let mut inner = self.inner.lock();
        inner.store.migrate_from_groupfile(beacon_id, group, share)?;
        inner.tracked.insert(beacon_id.to_owned());
        Ok(())
    }

    /// Applies an operator command, persists the transition, then performs
    /// the sends it implies.
    pub async fn command(&self, beacon_id: &str, command: DkgCommand) -> Result<(), DkgError> {
        let keypair = self.identity.keypair_for(beacon_id)?;
        let me = keypair.public().clone();

        let actions = {
            let mut inner = self.inner.lock();
            let current = inner.store.get_current(beacon_id)?;
            let (next, actions) = self.transition_for_command(
                &inner,
                beacon_id,
                &current,
                &me,
                command,
            )?;
            inner.store.save_current(beacon_id, &next)?;
            inner.tracked.insert(beacon_id.to_owned());
            actions
        };

        for action in actions {
            match action {
                Action::Broadcast {
                    to,
                    packet,
                    critical,
                    fatal,
                } => {
                    if let Err(err) = self
                        .network
                        .broadcast_packet(&me, &to, &packet, critical)
                        .await
                    {
                        if fatal {
                            error!(
                                "critical broadcast failed beacon_id={beacon_id} err={err}"
                            );
                            self.fail_epoch(beacon_id);
                            return Err(err.into());
                        }
                        if critical {
                            return Err(err.into());
                        }
                        warn!("broadcast failed beacon_id={beacon_id} err={err}");
                    }
                }
                Action::Start(state) => self.start_execution(beacon_id, &state, &keypair)?,
                Action::Stop => {
                    let stopped = self.inner.lock().executions.remove(beacon_id);
                    if let Some(execution) = stopped {
                        execution.stop();
                    }
                }
            }
        }
        Ok(())
    }

    /// Applies an inbound packet from a peer. Protocol bundles are relayed
    /// straight to the execution; everything else is a state transition.
    pub async fn packet(&self, packet: GossipPacket) -> Result<(), DkgError> {
        let beacon_id = packet.metadata.beacon_id.clone();

        if let GossipData::Dkg(bundle) = &packet.data {
            let inner = self.inner.lock();
            match inner.executions.get(&beacon_id) {
                Some(execution) => execution.relay(bundle.clone()),
                None => debug!("no execution for inbound bundle beacon_id={beacon_id}"),
            }
            return Ok(());
        }

        let keypair = self.identity.keypair_for(&beacon_id)?;
        let me = keypair.public().clone();

        let (next, start) = {
            let mut inner = self.inner.lock();
            let current = inner.store.get_current(&beacon_id)?;
            authorize(&current, &packet)?;
            let next = match &packet.data {
                GossipData::Proposal(terms) => {
                    let latest = latest_complete(&inner, &beacon_id, &current)?;
                    current.proposed(
                        &me,
                        terms,
                        latest.as_ref(),
                        self.config.skip_key_verification,
                    )?
                }
                _ => current.apply(&me, &packet)?,
            };
            inner.store.save_current(&beacon_id, &next)?;
            inner.tracked.insert(beacon_id.clone());
            let start = next.state == Status::Executing;
            (next, start)
        };

        info!(
            "applied packet beacon_id={beacon_id} from={} state={}",
            packet.metadata.address, next.state
        );
        if start {
            self.start_execution(&beacon_id, &next, &keypair)?;
        }
        Ok(())
    }

    /// Periodically turns expired epochs into `TimedOut`, even without any
    /// inbound event.
    pub fn start_timeout_sweeper(&self, interval: Duration) {
        let inner = Arc::clone(&self.inner);
        let cancel = self.sweeper.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => sweep(&inner),
                }
            }
        });
    }

    /// One sweep pass over every beacon id this process has seen.
    pub fn sweep(&self) {
        sweep(&self.inner);
    }

    /// Stops every running execution and releases the store.
    pub fn close(&self) {
        self.sweeper.cancel();
        let executions: Vec<Execution> = {
            let mut inner = self.inner.lock();
            inner.executions.drain().map(|(_, e)| e).collect()
        };
        for execution in &executions {
            execution.stop();
        }
        if let Err(err) = self.inner.lock().store.close() {
            error!("error closing the DKG store err={err}");
        }
    }

    fn transition_for_command(
        &self,
        inner: &Inner<DB>,
        beacon_id: &str,
        current: &DbState,
        me: &Identity,
        command: DkgCommand,
    ) -> Result<(DbState, Vec<Action>), DkgError> {
        let skip = self.config.skip_key_verification;
        match command {
            DkgCommand::Initial(options) => {
                let terms = self.initial_terms(beacon_id, me, options);
                let next = current.proposing(me, &terms, None, skip)?;
                let packet = GossipPacket::new(
                    beacon_id,
                    terms.epoch,
                    me,
                    GossipData::Proposal(terms),
                );
                let to = next.all_participants();
                Ok((next, vec![Action::Broadcast {
                    to,
                    packet,
                    critical: true,
                    fatal: true,
                }]))
            }
            DkgCommand::Resharing(options) => {
                let latest = latest_complete(inner, beacon_id, current)?
                    .ok_or(StateError::MissingCompletedEpoch)?;
                let terms = resharing_terms(beacon_id, me, current, &latest, &self.config, options);
                let next = current.proposing(me, &terms, Some(&latest), skip)?;
                let packet = GossipPacket::new(
                    beacon_id,
                    terms.epoch,
                    me,
                    GossipData::Proposal(terms),
                );
                let to = next.all_participants();
                Ok((next, vec![Action::Broadcast {
                    to,
                    packet,
                    critical: true,
                    fatal: true,
                }]))
            }
            DkgCommand::Join { previous_group } => {
                let next = current.joined(me, previous_group)?;
                let packet = GossipPacket::new(
                    beacon_id,
                    next.epoch,
                    me,
                    GossipData::Accept(AcceptProposal {
                        acceptor: me.clone(),
                    }),
                );
                let to = leader_only(&next)?;
                Ok((next, vec![Action::Broadcast {
                    to,
                    packet,
                    critical: true,
                    fatal: false,
                }]))
            }
            DkgCommand::Accept => {
                let next = current.accepted(me)?;
                let packet = GossipPacket::new(
                    beacon_id,
                    next.epoch,
                    me,
                    GossipData::Accept(AcceptProposal {
                        acceptor: me.clone(),
                    }),
                );
                let to = leader_only(&next)?;
                Ok((next, vec![Action::Broadcast {
                    to,
                    packet,
                    critical: true,
                    fatal: false,
                }]))
            }
            DkgCommand::Reject { reason } => {
                let next = current.rejected(me)?;
                let packet = GossipPacket::new(
                    beacon_id,
                    next.epoch,
                    me,
                    GossipData::Reject(RejectProposal {
                        rejector: me.clone(),
                        reason,
                    }),
                );
                let to = leader_only(&next)?;
                Ok((next, vec![Action::Broadcast {
                    to,
                    packet,
                    critical: false,
                    fatal: false,
                }]))
            }
            DkgCommand::Execute => {
                let next = current.start_executing(me)?;
                let packet = GossipPacket::new(
                    beacon_id,
                    next.epoch,
                    me,
                    GossipData::Execute(StartExecution {
                        time: SystemTime::now(),
                    }),
                );
                let to = next.all_participants();
                Ok((
                    next.clone(),
                    vec![
                        Action::Broadcast {
                            to,
                            packet,
                            critical: true,
                            fatal: true,
                        },
                        Action::Start(next),
                    ],
                ))
            }
            DkgCommand::Abort { reason } => {
                if current.leader.as_ref() != Some(me) {
                    return Err(DkgError::NotLeader);
                }
                let next = current.aborted()?;
                let packet = GossipPacket::new(
                    beacon_id,
                    next.epoch,
                    me,
                    GossipData::Abort(AbortDkg { reason }),
                );
                let to = next.all_participants();
                Ok((
                    next,
                    vec![
                        Action::Stop,
                        Action::Broadcast {
                            to,
                            packet,
                            critical: false,
                            fatal: false,
                        },
                    ],
                ))
            }
        }
    }

    fn initial_terms(
        &self,
        beacon_id: &str,
        me: &Identity,
        options: ProposalOptions,
    ) -> ProposalTerms {
        ProposalTerms {
            beacon_id: beacon_id.to_owned(),
            epoch: 1,
            leader: me.clone(),
            threshold: options.threshold,
            timeout: SystemTime::now() + self.config.timeout,
            catchup_period: options.catchup_period,
            beacon_period: options.beacon_period,
            scheme_id: options.scheme_id,
            genesis_time: options.genesis_time,
            genesis_seed: vec![],
            transition_time: options.genesis_time,
            joining: options.joining,
            remaining: vec![],
            leaving: vec![],
        }
    }

    fn start_execution(
        &self,
        beacon_id: &str,
        state: &DbState,
        keypair: &Pair,
    ) -> Result<(), DkgError> {
        let execution = execution::spawn(ExecutionArgs {
            state: state.clone(),
            keypair: keypair.clone(),
            inner: Arc::clone(&self.inner),
            network: Arc::clone(&self.network),
            completed: self.completed.clone(),
            config: self.config.clone(),
        })?;
        let replaced = self
            .inner
            .lock()
            .executions
            .insert(beacon_id.to_owned(), execution);
        if let Some(previous) = replaced {
            previous.stop();
        }
        info!(
            "execution started beacon_id={beacon_id} epoch={} group_size={}",
            state.epoch,
            state.joint_participants().len()
        );
        Ok(())
    }

    /// Best-effort demotion of the current epoch after a failed critical
    /// broadcast.
    fn fail_epoch(&self, beacon_id: &str) {
        let inner = self.inner.lock();
        if let Ok(current) = inner.store.get_current(beacon_id) {
            if let Ok(failed) = current.failed() {
                if let Err(err) = inner.store.save_current(beacon_id, &failed) {
                    error!("could not persist failed state beacon_id={beacon_id} err={err}");
                }
            }
        }
    }
}

/// Turns every expired epoch into `TimedOut` and stops its execution.
fn sweep<DB: pharos_db::Store>(inner: &Mutex<Inner<DB>>) {
    let now = SystemTime::now();
    let mut stopped = Vec::new();
    {
        let mut inner = inner.lock();
        let ids: Vec<String> = inner.tracked.iter().cloned().collect();
        for id in ids {
            let current = match inner.store.get_current(&id) {
                Ok(current) => current,
                Err(err) => {
                    error!("sweep could not load state beacon_id={id} err={err}");
                    continue;
                }
            };
            if !current.deadline_passed(now) {
                continue;
            }
            match current.timed_out() {
                Ok(timed_out) => {
                    if let Err(err) = inner.store.save_current(&id, &timed_out) {
                        error!("sweep could not persist beacon_id={id} err={err}");
                        continue;
                    }
                    warn!("epoch timed out beacon_id={id} epoch={}", timed_out.epoch);
                    if let Some(execution) = inner.executions.remove(&id) {
                        stopped.push(execution);
                    }
                }
                Err(err) => debug!("sweep skipped beacon_id={id} err={err}"),
            }
        }
    }
    for execution in stopped {
        execution.stop();
    }
}

fn resharing_terms(
    beacon_id: &str,
    me: &Identity,
    current: &DbState,
    latest: &DbState,
    config: &Config,
    options: ResharingOptions,
) -> ProposalTerms {
    ProposalTerms {
        beacon_id: beacon_id.to_owned(),
        epoch: current.epoch + 1,
        leader: me.clone(),
        threshold: options.threshold,
        timeout: SystemTime::now() + config.timeout,
        catchup_period: options.catchup_period,
        beacon_period: latest.beacon_period,
        scheme_id: latest.scheme_id.clone(),
        genesis_time: latest.genesis_time,
        genesis_seed: latest.genesis_seed.clone(),
        transition_time: options.transition_time,
        joining: options.joining,
        remaining: options.remaining,
        leaving: options.leaving,
    }
}

/// The last successful completion to validate a proposal against: the
/// current state itself when it is the completed one.
fn latest_complete<DB: pharos_db::Store>(
    inner: &Inner<DB>,
    beacon_id: &str,
    current: &DbState,
) -> Result<Option<DbState>, DkgError> {
    if current.state == Status::Complete {
        return Ok(Some(current.clone()));
    }
    Ok(inner.store.get_finished(beacon_id)?)
}

fn leader_only(state: &DbState) -> Result<Vec<Identity>, DkgError> {
    state
        .leader
        .clone()
        .map(|leader| vec![leader])
        .ok_or(DkgError::State(StateError::UnexpectedPacket))
}

/// Packets must come from the participant they claim to represent; group
/// control packets must come from the leader. The transport authenticated
/// the sender address before handing the packet over.
fn authorize(current: &DbState, packet: &GossipPacket) -> Result<(), DkgError> {
    let sender = &packet.metadata.address;
    let authorized = match &packet.data {
        GossipData::Proposal(terms) => sender == &terms.leader.address,
        GossipData::Accept(accept) => sender == &accept.acceptor.address,
        GossipData::Reject(reject) => sender == &reject.rejector.address,
        GossipData::Execute(_) | GossipData::Abort(_) => {
            current.leader.as_ref().map(|l| l.address.as_str()) == Some(sender.as_str())
        }
        GossipData::Dkg(_) => true,
    };
    if authorized {
        Ok(())
    } else {
        Err(DkgError::UnauthorizedSender(sender.clone()))
    }
}
