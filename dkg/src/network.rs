// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Fan-out of DKG packets to a list of participants. Best effort, no
//! retries: the retry policy of the protocol is its phase structure, not the
//! transport.

use async_trait::async_trait;
use log::warn;
use pharos_key::Identity;
use std::future::Future;
use thiserror::Error;

use crate::packets::GossipPacket;

#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer could not be reached at all. Skippable for non-critical
    /// broadcasts.
    #[error("connection to {peer} failed: {reason}")]
    Connection { peer: String, reason: String },
    /// The peer answered with an application-level failure. Never skipped.
    #[error("{peer} rejected the request: {reason}")]
    Application { peer: String, reason: String },
}

impl TransportError {
    pub fn is_connection_error(&self) -> bool {
        matches!(self, TransportError::Connection { .. })
    }
}

/// The client the DKG subsystem sends packets through. Implementations carry
/// the actual wire protocol and authenticate this node to the peer.
#[async_trait]
pub trait DkgClient: Send + Sync {
    async fn packet(&self, peer: &Identity, packet: GossipPacket) -> Result<(), TransportError>;
}

/// Per-recipient fan-out over a [`DkgClient`].
pub struct Network<C> {
    client: C,
}

impl<C: DkgClient> Network<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Runs `action` against every recipient but the sender itself, aborting
    /// on the first error of any kind.
    pub async fn send<'a, F, Fut>(
        &'a self,
        from: &Identity,
        to: &'a [Identity],
        action: F,
    ) -> Result<(), TransportError>
    where
        F: Fn(&'a C, &'a Identity) -> Fut,
        Fut: Future<Output = Result<(), TransportError>>,
    {
        for peer in to.iter().filter(|p| *p != from) {
            action(&self.client, peer).await?;
        }
        Ok(())
    }

    /// Same fan-out, but unreachable peers are logged and skipped; every
    /// recipient gets attempted. Application-level errors still abort.
    pub async fn send_ignoring_connection_error<'a, F, Fut>(
        &'a self,
        from: &Identity,
        to: &'a [Identity],
        action: F,
    ) -> Result<(), TransportError>
    where
        F: Fn(&'a C, &'a Identity) -> Fut,
        Fut: Future<Output = Result<(), TransportError>>,
    {
        for peer in to.iter().filter(|p| *p != from) {
            match action(&self.client, peer).await {
                Ok(()) => {}
                Err(err) if err.is_connection_error() => {
                    warn!("peer unreachable during broadcast err={err}");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Convenience wrapper broadcasting one packet to every recipient.
    pub async fn broadcast_packet(
        &self,
        from: &Identity,
        to: &[Identity],
        packet: &GossipPacket,
        critical: bool,
    ) -> Result<(), TransportError> {
        if critical {
            self.send(from, to, |client, peer| {
                let packet = packet.clone();
                async move { client.packet(peer, packet).await }
            })
            .await
        } else {
            self.send_ignoring_connection_error(from, to, |client, peer| {
                let packet = packet.clone();
                async move { client.packet(peer, packet).await }
            })
            .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets::{AbortDkg, GossipData};
    use parking_lot::Mutex;
    use pharos_key::Pair;
    use std::collections::HashSet;

    struct FlakyClient {
        unreachable: HashSet<String>,
        poisoned: HashSet<String>,
        delivered: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DkgClient for FlakyClient {
        async fn packet(
            &self,
            peer: &Identity,
            _packet: GossipPacket,
        ) -> Result<(), TransportError> {
            if self.unreachable.contains(&peer.address) {
                return Err(TransportError::Connection {
                    peer: peer.address.clone(),
                    reason: "connection refused".into(),
                });
            }
            if self.poisoned.contains(&peer.address) {
                return Err(TransportError::Application {
                    peer: peer.address.clone(),
                    reason: "bad packet".into(),
                });
            }
            self.delivered.lock().push(peer.address.clone());
            Ok(())
        }
    }

    fn identities(n: usize) -> Vec<Identity> {
        (0..n)
            .map(|i| {
                Pair::generate(&format!("127.0.0.1:{}", 8000 + i), false)
                    .public()
                    .clone()
            })
            .collect()
    }

    fn packet(sender: &Identity) -> GossipPacket {
        GossipPacket::new(
            "default",
            1,
            sender,
            GossipData::Abort(AbortDkg {
                reason: "test".into(),
            }),
        )
    }

    #[tokio::test]
    async fn send_aborts_on_first_connection_error() {
        let ids = identities(3);
        let network = Network::new(FlakyClient {
            unreachable: [ids[1].address.clone()].into(),
            poisoned: HashSet::new(),
            delivered: Mutex::new(vec![]),
        });
        let err = network
            .broadcast_packet(&ids[0], &ids, &packet(&ids[0]), true)
            .await
            .unwrap_err();
        assert!(err.is_connection_error());
    }

    #[tokio::test]
    async fn lenient_send_skips_unreachable_peers() {
        let ids = identities(4);
        let network = Network::new(FlakyClient {
            unreachable: [ids[2].address.clone()].into(),
            poisoned: HashSet::new(),
            delivered: Mutex::new(vec![]),
        });
        network
            .broadcast_packet(&ids[0], &ids, &packet(&ids[0]), false)
            .await
            .unwrap();
        // everybody reachable but the sender got the packet
        let delivered = network.client().delivered.lock().clone();
        assert_eq!(delivered, vec![ids[1].address.clone(), ids[3].address.clone()]);
    }

    #[tokio::test]
    async fn lenient_send_still_aborts_on_application_errors() {
        let ids = identities(3);
        let network = Network::new(FlakyClient {
            unreachable: HashSet::new(),
            poisoned: [ids[1].address.clone()].into(),
            delivered: Mutex::new(vec![]),
        });
        let err = network
            .broadcast_packet(&ids[0], &ids, &packet(&ids[0]), false)
            .await
            .unwrap_err();
        assert!(!err.is_connection_error());
    }

    #[tokio::test]
    async fn sender_is_never_a_recipient() {
        let ids = identities(2);
        let network = Network::new(FlakyClient {
            unreachable: HashSet::new(),
            poisoned: HashSet::new(),
            delivered: Mutex::new(vec![]),
        });
        network
            .broadcast_packet(&ids[0], &ids, &packet(&ids[0]), true)
            .await
            .unwrap();
        assert_eq!(
            network.client().delivered.lock().clone(),
            vec![ids[1].address.clone()]
        );
    }
}
