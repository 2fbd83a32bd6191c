// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Drives one epoch's cryptographic protocol to completion. Phases are
//! clock-paced: after the kickoff grace period the executor broadcasts its
//! deal, then advances on a fixed cadence, feeding whatever bundles arrived
//! in the meantime to the protocol. On success it persists the completed
//! state and emits the sharing output exactly once.

use crate::network::{DkgClient, Network};
use crate::packets::{GossipData, GossipPacket};
use crate::process::Inner;
use crate::protocol::{
    Bundle, Protocol, ProtocolNode, ProtocolOutput, ResponseOutcome,
};
use crate::state::{DbState, StateError, Status};
use crate::{Config, DkgError, ExecutionOutput, SharingOutput};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use pharos_key::poly::PublicPoly;
use pharos_key::{DistPublic, Group, Identity, Node, Pair};
use rand::rngs::OsRng;
use std::sync::Arc;
use std::time::SystemTime;
use tokio_util::sync::CancellationToken;

/// Handle on a running execution. Dropping it does not stop the task;
/// `stop` does, idempotently.
pub struct Execution {
    cancel: CancellationToken,
    bundles: flume::Sender<Bundle>,
}

impl Execution {
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Relays an inbound protocol bundle to the running phases.
    pub(crate) fn relay(&self, bundle: Bundle) {
        if self.bundles.send(bundle).is_err() {
            debug!("bundle arrived after the execution finished");
        }
    }
}

pub(crate) struct ExecutionArgs<DB, C> {
    pub state: DbState,
    pub keypair: Pair,
    pub inner: Arc<Mutex<Inner<DB>>>,
    pub network: Arc<Network<C>>,
    pub completed: flume::Sender<SharingOutput>,
    pub config: Config,
}

/// Starts the execution task for a state that just entered `Executing`.
pub(crate) fn spawn<DB, C>(args: ExecutionArgs<DB, C>) -> Result<Execution, DkgError>
where
    DB: pharos_db::Store + Send + Sync + 'static,
    C: DkgClient + 'static,
{
    let (protocol, holders) = build_protocol(&args.state, &args.keypair)?;
    let (bundle_tx, bundle_rx) = flume::unbounded();
    let cancel = CancellationToken::new();

    let task_cancel = cancel.clone();
    tokio::spawn(run(args, protocol, holders, bundle_rx, task_cancel));

    Ok(Execution {
        cancel,
        bundles: bundle_tx,
    })
}

/// Maps the agreed participant lists onto protocol nodes. Every node derives
/// the same indexing because the lists come verbatim from the proposal.
fn build_protocol(state: &DbState, keypair: &Pair) -> Result<(Protocol, Vec<Identity>), DkgError> {
    let joint = state.joint_participants();
    let holders: Vec<ProtocolNode> = joint
        .iter()
        .enumerate()
        .map(|(i, id)| ProtocolNode {
            index: i as u32,
            key: id.key,
        })
        .collect();

    let protocol = if state.epoch == 1 {
        Protocol::fresh(
            &state.beacon_id,
            state.epoch,
            *keypair.private(),
            holders,
            state.threshold as usize,
        )?
    } else {
        let old_group = state
            .final_group
            .as_ref()
            .ok_or(StateError::MissingCompletedEpoch)?;
        let dealers: Vec<ProtocolNode> = old_group
            .nodes
            .iter()
            .filter(|n| state.remaining.contains(&n.identity))
            .map(|n| ProtocolNode {
                index: n.index,
                key: n.identity.key,
            })
            .collect();
        Protocol::reshare(
            &state.beacon_id,
            state.epoch,
            *keypair.private(),
            state.key_share.clone(),
            PublicPoly::new(old_group.public_key.commits.clone()),
            old_group.threshold as usize,
            dealers,
            holders,
            state.threshold as usize,
        )?
    };
    Ok((protocol, joint))
}

async fn run<DB, C>(
    args: ExecutionArgs<DB, C>,
    protocol: Protocol,
    holders: Vec<Identity>,
    bundles: flume::Receiver<Bundle>,
    cancel: CancellationToken,
) where
    DB: pharos_db::Store + Send + Sync + 'static,
    C: DkgClient + 'static,
{
    let beacon_id = args.state.beacon_id.clone();
    let me = args.keypair.public().clone();
    let budget = args
        .state
        .timeout
        .duration_since(SystemTime::now())
        .unwrap_or_default();

    let phases = run_phases(
        protocol,
        bundles,
        Arc::clone(&args.network),
        me,
        holders,
        beacon_id.clone(),
        args.state.epoch,
        args.config.clone(),
    );

    tokio::select! {
        _ = cancel.cancelled() => {
            debug!("execution cancelled beacon_id={beacon_id}");
        }
        outcome = tokio::time::timeout(budget, phases) => match outcome {
            Ok(Ok(output)) => finish_success(&args, output),
            Ok(Err(err)) => {
                error!("execution failed beacon_id={beacon_id} err={err}");
                finish_terminal(&args, DbState::failed);
            }
            Err(_) => {
                warn!("execution deadline reached beacon_id={beacon_id}");
                finish_terminal(&args, DbState::timed_out);
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_phases<C: DkgClient>(
    mut protocol: Protocol,
    bundles: flume::Receiver<Bundle>,
    network: Arc<Network<C>>,
    me: Identity,
    recipients: Vec<Identity>,
    beacon_id: String,
    epoch: u32,
    config: Config,
) -> Result<ProtocolOutput, DkgError> {
    // let peers set up their receivers before the first packet flies
    tokio::time::sleep(config.kickoff_grace_period).await;

    let mut deals = Vec::new();
    let mut responses = Vec::new();
    let mut justifications = Vec::new();

    if let Some(deal) = protocol.deal(&mut OsRng)? {
        broadcast(&network, &me, &recipients, &beacon_id, epoch, Bundle::Deal(deal)).await?;
    }
    collect(
        &bundles,
        config.time_between_dkg_phases,
        &mut deals,
        &mut responses,
        &mut justifications,
    )
    .await;

    if let Some(response) = protocol.process_deals(&deals)? {
        broadcast(
            &network,
            &me,
            &recipients,
            &beacon_id,
            epoch,
            Bundle::Response(response),
        )
        .await?;
    }
    collect(
        &bundles,
        config.time_between_dkg_phases,
        &mut deals,
        &mut responses,
        &mut justifications,
    )
    .await;

    match protocol.process_responses(&responses)? {
        ResponseOutcome::Output(output) => Ok(output),
        ResponseOutcome::Justifications(mine) => {
            if let Some(justification) = mine {
                broadcast(
                    &network,
                    &me,
                    &recipients,
                    &beacon_id,
                    epoch,
                    Bundle::Justification(justification.clone()),
                )
                .await?;
                // our own reveals clear our own row too
                justifications.push(justification);
            }
            collect(
                &bundles,
                config.time_between_dkg_phases,
                &mut deals,
                &mut responses,
                &mut justifications,
            )
            .await;
            Ok(protocol.process_justifications(&justifications)?)
        }
    }
}

/// Drains inbound bundles until the phase window closes. Early arrivals for
/// later phases are buffered, not dropped: peers' clocks are never in
/// perfect lockstep.
async fn collect(
    bundles: &flume::Receiver<Bundle>,
    window: std::time::Duration,
    deals: &mut Vec<crate::protocol::DealBundle>,
    responses: &mut Vec<crate::protocol::ResponseBundle>,
    justifications: &mut Vec<crate::protocol::JustificationBundle>,
) {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => break,
            received = bundles.recv_async() => match received {
                Ok(Bundle::Deal(deal)) => deals.push(deal),
                Ok(Bundle::Response(response)) => responses.push(response),
                Ok(Bundle::Justification(justification)) => justifications.push(justification),
                Err(_) => break,
            }
        }
    }
}

async fn broadcast<C: DkgClient>(
    network: &Network<C>,
    me: &Identity,
    recipients: &[Identity],
    beacon_id: &str,
    epoch: u32,
    bundle: Bundle,
) -> Result<(), DkgError> {
    let packet = GossipPacket::new(beacon_id, epoch, me, GossipData::Dkg(bundle));
    network
        .broadcast_packet(me, recipients, &packet, false)
        .await?;
    Ok(())
}

/// Persists the completed state and emits the sharing output.
fn finish_success<DB, C>(args: &ExecutionArgs<DB, C>, output: ProtocolOutput)
where
    DB: pharos_db::Store + Send + Sync + 'static,
{
    let beacon_id = &args.state.beacon_id;
    let joint = args.state.joint_participants();
    let execution_output = ExecutionOutput {
        final_group: Group {
            nodes: joint
                .iter()
                .enumerate()
                .map(|(i, id)| Node {
                    index: i as u32,
                    identity: id.clone(),
                })
                .collect(),
            threshold: args.state.threshold,
            period: args.state.beacon_period,
            genesis_time: args.state.genesis_time,
            transition_time: args.state.transition_time,
            genesis_seed: args.state.genesis_seed.clone(),
            scheme_id: args.state.scheme_id.clone(),
            public_key: DistPublic {
                commits: output.public.commits.clone(),
            },
        },
        key_share: output.share,
    };

    let sharing = {
        let mut inner = args.inner.lock();
        let result = (|| -> Result<SharingOutput, DkgError> {
            let current = inner.store.get_current(beacon_id)?;
            let old = inner.store.get_finished(beacon_id)?;
            let complete =
                current.complete(execution_output.final_group, execution_output.key_share)?;
            inner.store.save_finished(beacon_id, &complete)?;
            Ok(SharingOutput {
                beacon_id: beacon_id.clone(),
                old,
                new: complete,
            })
        })();
        inner.executions.remove(beacon_id);
        result
    };

    match sharing {
        Ok(sharing) => {
            info!(
                "DKG complete beacon_id={beacon_id} epoch={} group_size={}",
                sharing.new.epoch,
                sharing.new.final_group.as_ref().map(Group::len).unwrap_or(0),
            );
            if args.completed.send(sharing).is_err() {
                warn!("nobody listens on the completion channel beacon_id={beacon_id}");
            }
        }
        Err(err) => error!("could not record the completed DKG beacon_id={beacon_id} err={err}"),
    }
}

/// Persists a terminal failure state; no completion is emitted.
fn finish_terminal<DB, C>(
    args: &ExecutionArgs<DB, C>,
    transition: fn(&DbState) -> Result<DbState, StateError>,
) where
    DB: pharos_db::Store + Send + Sync + 'static,
{
    let beacon_id = &args.state.beacon_id;
    let mut inner = args.inner.lock();
    match inner.store.get_current(beacon_id) {
        Ok(current) if current.state == Status::Executing => match transition(&current) {
            Ok(terminal) => {
                if let Err(err) = inner.store.save_current(beacon_id, &terminal) {
                    error!("could not persist terminal state beacon_id={beacon_id} err={err}");
                }
            }
            Err(err) => error!("invalid terminal transition beacon_id={beacon_id} err={err}"),
        },
        Ok(_) => {}
        Err(err) => error!("could not load state beacon_id={beacon_id} err={err}"),
    }
    inner.executions.remove(beacon_id);
}
