// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! End-to-end DKG runs over an in-process transport: several nodes, each
//! with its own store and process, wired through per-node packet queues.

use async_trait::async_trait;
use parking_lot::RwLock;
use pharos_db::MemoryDB;
use pharos_dkg::packets::{DkgCommand, GossipPacket, ProposalOptions, ResharingOptions};
use pharos_dkg::{
    BeaconIdentifier, Config, DbState, DkgClient, DkgError, DkgProcess, DkgStore, SharingOutput,
    Status, TransportError,
};
use pharos_key::{scheme, Identity, Pair};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const BEACON_ID: &str = "default";

struct StaticIdentifier {
    pair: Pair,
}

impl BeaconIdentifier for StaticIdentifier {
    fn keypair_for(&self, _beacon_id: &str) -> Result<Pair, pharos_key::Error> {
        Ok(self.pair.clone())
    }
}

type Inboxes = Arc<RwLock<HashMap<String, flume::Sender<GossipPacket>>>>;

/// Routes packets to the recipient's queue; unknown addresses look like
/// connection failures.
struct RouterClient {
    inboxes: Inboxes,
}

#[async_trait]
impl DkgClient for RouterClient {
    async fn packet(&self, peer: &Identity, packet: GossipPacket) -> Result<(), TransportError> {
        let sender = self.inboxes.read().get(&peer.address).cloned();
        match sender {
            Some(tx) => tx.send_async(packet).await.map_err(|_| {
                TransportError::Connection {
                    peer: peer.address.clone(),
                    reason: "receiver gone".into(),
                }
            }),
            None => Err(TransportError::Connection {
                peer: peer.address.clone(),
                reason: "no route".into(),
            }),
        }
    }
}

struct TestNode {
    process: Arc<DkgProcess<MemoryDB, RouterClient, StaticIdentifier>>,
    completed: flume::Receiver<SharingOutput>,
    identity: Identity,
}

impl TestNode {
    fn status(&self) -> DbState {
        self.process.status(BEACON_ID).unwrap()
    }
}

fn spawn_node(pair: Pair, inboxes: &Inboxes, config: &Config) -> TestNode {
    let (completed_tx, completed_rx) = flume::unbounded();
    let process = Arc::new(DkgProcess::new(
        DkgStore::new(MemoryDB::default()),
        StaticIdentifier { pair: pair.clone() },
        RouterClient {
            inboxes: Arc::clone(inboxes),
        },
        completed_tx,
        config.clone(),
    ));

    let (inbox_tx, inbox_rx) = flume::unbounded::<GossipPacket>();
    inboxes
        .write()
        .insert(pair.public().address.clone(), inbox_tx);
    let pump = Arc::clone(&process);
    tokio::spawn(async move {
        while let Ok(packet) = inbox_rx.recv_async().await {
            // state errors on duplicate or late packets are part of life
            if let Err(err) = pump.packet(packet).await {
                eprintln!("packet dropped: {err}");
            }
        }
    });

    TestNode {
        process,
        completed: completed_rx,
        identity: pair.public().clone(),
    }
}

fn cluster(n: usize, base_port: u16, config: &Config) -> (Vec<TestNode>, Vec<Identity>) {
    let inboxes: Inboxes = Arc::new(RwLock::new(HashMap::new()));
    let pairs: Vec<Pair> = (0..n)
        .map(|i| Pair::generate(&format!("127.0.0.1:{}", base_port + i as u16), false))
        .collect();
    let identities: Vec<Identity> = pairs.iter().map(|p| p.public().clone()).collect();
    let nodes = pairs
        .into_iter()
        .map(|pair| spawn_node(pair, &inboxes, config))
        .collect();
    (nodes, identities)
}

fn quick_config() -> Config {
    Config {
        timeout: Duration::from_secs(30),
        time_between_dkg_phases: Duration::from_millis(400),
        kickoff_grace_period: Duration::from_millis(100),
        skip_key_verification: false,
    }
}

fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

fn initial_options(joining: Vec<Identity>, threshold: u32) -> DkgCommand {
    DkgCommand::Initial(ProposalOptions {
        threshold,
        beacon_period: Duration::from_secs(30),
        catchup_period: Duration::from_secs(5),
        scheme_id: scheme::SCHEME_ID.into(),
        genesis_time: unix_now() + 3600,
        joining,
    })
}

async fn wait_for<F: Fn() -> bool>(what: &str, condition: F) {
    let result = tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {what}");
}

async fn recv_completion(node: &TestNode) -> SharingOutput {
    tokio::time::timeout(Duration::from_secs(15), node.completed.recv_async())
        .await
        .expect("no completion emitted in time")
        .expect("completion channel closed")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn initial_dkg_happy_path() {
    let config = quick_config();
    let (nodes, identities) = cluster(3, 9100, &config);

    // the leader proposes the first epoch to everybody
    nodes[0]
        .process
        .command(BEACON_ID, initial_options(identities.clone(), 2))
        .await
        .unwrap();
    assert_eq!(nodes[0].status().state, Status::Proposing);
    wait_for("proposal on node 1", || {
        nodes[1].status().state == Status::Proposed
    })
    .await;
    wait_for("proposal on node 2", || {
        nodes[2].status().state == Status::Proposed
    })
    .await;

    // both followers accept
    nodes[1].process.command(BEACON_ID, DkgCommand::Accept).await.unwrap();
    nodes[2].process.command(BEACON_ID, DkgCommand::Accept).await.unwrap();
    assert_eq!(nodes[1].status().state, Status::Accepted);
    wait_for("acceptances on the leader", || {
        nodes[0].status().acceptors.len() == 2
    })
    .await;

    // kick off and let every node finish
    nodes[0].process.command(BEACON_ID, DkgCommand::Execute).await.unwrap();

    let mut outputs = Vec::new();
    for node in &nodes {
        let sharing = recv_completion(node).await;
        assert_eq!(sharing.beacon_id, BEACON_ID);
        assert!(sharing.old.is_none());
        assert_eq!(sharing.new.epoch, 1);
        assert_eq!(sharing.new.state, Status::Complete);
        outputs.push(sharing);
    }

    // every node agrees on the group
    let group = outputs[0].new.final_group.clone().unwrap();
    assert_eq!(group.len(), 3);
    assert!(group.len() as u32 >= outputs[0].new.threshold);
    for sharing in &outputs {
        assert_eq!(sharing.new.final_group.as_ref().unwrap(), &group);
    }

    // any threshold-sized quorum produces a signature the group key verifies
    let msg = b"first round";
    let partials: Vec<_> = outputs
        .iter()
        .take(2)
        .map(|s| scheme::partial_sign(s.new.key_share.as_ref().unwrap(), msg))
        .collect();
    let signature = scheme::recover_signature(&partials, 2).unwrap();
    scheme::verify(&group.public_key.key(), msg, &signature).unwrap();

    // the sharing output is emitted exactly once per node
    tokio::time::sleep(Duration::from_millis(200)).await;
    for node in &nodes {
        assert!(node.completed.try_recv().is_err());
        assert_eq!(node.status().state, Status::Complete);
    }

    for node in &nodes {
        node.process.close();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn proposal_without_quorum_times_out_everywhere() {
    let config = Config {
        timeout: Duration::from_millis(700),
        ..quick_config()
    };
    let (nodes, identities) = cluster(3, 9200, &config);
    let nodes: Vec<Arc<TestNode>> = nodes.into_iter().map(Arc::new).collect();

    for node in &nodes {
        node.process.start_timeout_sweeper(Duration::from_millis(100));
    }

    nodes[0]
        .process
        .command(BEACON_ID, initial_options(identities.clone(), 2))
        .await
        .unwrap();
    wait_for("proposal spread", || {
        nodes[1].status().state == Status::Proposed
            && nodes[2].status().state == Status::Proposed
    })
    .await;

    // nobody answers; the sweep must retire the epoch on every node
    for node in &nodes {
        let node = Arc::clone(node);
        wait_for("timeout", move || node.status().state == Status::TimedOut).await;
    }
    for node in &nodes {
        assert!(node.completed.try_recv().is_err());
    }

    // answering after the deadline is refused
    let err = nodes[1]
        .process
        .command(BEACON_ID, DkgCommand::Accept)
        .await
        .unwrap_err();
    assert!(matches!(err, DkgError::State(_)));

    for node in &nodes {
        node.process.close();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn leader_can_abort_a_proposal() {
    let config = quick_config();
    let (nodes, identities) = cluster(3, 9300, &config);

    nodes[0]
        .process
        .command(BEACON_ID, initial_options(identities.clone(), 2))
        .await
        .unwrap();
    wait_for("proposal spread", || {
        nodes[1].status().state == Status::Proposed
            && nodes[2].status().state == Status::Proposed
    })
    .await;
    nodes[1].process.command(BEACON_ID, DkgCommand::Accept).await.unwrap();

    // only the leader may abort
    let err = nodes[2]
        .process
        .command(
            BEACON_ID,
            DkgCommand::Abort {
                reason: "mutiny".into(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DkgError::NotLeader));

    nodes[0]
        .process
        .command(
            BEACON_ID,
            DkgCommand::Abort {
                reason: "bad parameters".into(),
            },
        )
        .await
        .unwrap();

    for node in &nodes {
        let node_status = move || node.status().state;
        wait_for("abort spread", move || node_status() == Status::Aborted).await;
        assert!(node.completed.try_recv().is_err());
    }

    for node in &nodes {
        node.process.close();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn resharing_adds_a_node_and_keeps_the_group_key() {
    let config = quick_config();
    let inboxes: Inboxes = Arc::new(RwLock::new(HashMap::new()));
    let pairs: Vec<Pair> = (0..4)
        .map(|i| Pair::generate(&format!("127.0.0.1:{}", 9400 + i), false))
        .collect();
    let identities: Vec<Identity> = pairs.iter().map(|p| p.public().clone()).collect();
    let nodes: Vec<TestNode> = pairs
        .into_iter()
        .map(|pair| spawn_node(pair, &inboxes, &config))
        .collect();

    // epoch 1 among the first three nodes
    nodes[0]
        .process
        .command(BEACON_ID, initial_options(identities[..3].to_vec(), 2))
        .await
        .unwrap();
    wait_for("proposal spread", || {
        nodes[1].status().state == Status::Proposed
            && nodes[2].status().state == Status::Proposed
    })
    .await;
    nodes[1].process.command(BEACON_ID, DkgCommand::Accept).await.unwrap();
    nodes[2].process.command(BEACON_ID, DkgCommand::Accept).await.unwrap();
    wait_for("acceptances", || nodes[0].status().acceptors.len() == 2).await;
    nodes[0].process.command(BEACON_ID, DkgCommand::Execute).await.unwrap();

    for node in nodes.iter().take(3) {
        recv_completion(node).await;
    }
    let first_group = nodes[0].status().final_group.unwrap();
    let group_key = first_group.public_key.key();

    // epoch 2: everybody stays, the fourth node joins
    nodes[0]
        .process
        .command(
            BEACON_ID,
            DkgCommand::Resharing(ResharingOptions {
                threshold: 3,
                catchup_period: Duration::from_secs(5),
                transition_time: unix_now() + 7200,
                joining: vec![identities[3].clone()],
                remaining: identities[..3].to_vec(),
                leaving: vec![],
            }),
        )
        .await
        .unwrap();
    wait_for("reshare proposal spread", || {
        nodes[1].status().state == Status::Proposed
            && nodes[2].status().state == Status::Proposed
            && nodes[3].status().state == Status::Proposed
    })
    .await;

    nodes[1].process.command(BEACON_ID, DkgCommand::Accept).await.unwrap();
    nodes[2].process.command(BEACON_ID, DkgCommand::Accept).await.unwrap();
    nodes[3]
        .process
        .command(
            BEACON_ID,
            DkgCommand::Join {
                previous_group: Some(first_group.clone()),
            },
        )
        .await
        .unwrap();
    wait_for("reshare acceptances", || {
        nodes[0].status().acceptors.len() == 3
    })
    .await;
    nodes[0].process.command(BEACON_ID, DkgCommand::Execute).await.unwrap();

    let mut outputs = Vec::new();
    for node in &nodes {
        let sharing = recv_completion(node).await;
        assert_eq!(sharing.new.epoch, 2);
        assert_eq!(sharing.new.state, Status::Complete);
        outputs.push(sharing);
    }

    // old nodes saw epoch 1 as their previous sharing, the joiner did not
    assert_eq!(outputs[0].old.as_ref().map(|s| s.epoch), Some(1));
    assert!(outputs[3].old.is_none());

    let second_group = outputs[0].new.final_group.clone().unwrap();
    assert_eq!(second_group.len(), 4);
    // the distributed key survives the reshare
    assert_eq!(second_group.public_key.key(), group_key);

    // new shares, old key: a quorum of the new group signs for the old key
    let msg = b"round after the reshare";
    let partials: Vec<_> = outputs
        .iter()
        .take(3)
        .map(|s| scheme::partial_sign(s.new.key_share.as_ref().unwrap(), msg))
        .collect();
    let signature = scheme::recover_signature(&partials, 3).unwrap();
    scheme::verify(&group_key, msg, &signature).unwrap();

    for node in &nodes {
        node.process.close();
    }
}
