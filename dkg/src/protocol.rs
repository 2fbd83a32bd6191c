// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The threshold cryptography an execution drives: a Pedersen distributed key
//! generation over BLS12-381, in four phases. Dealers commit a secret
//! polynomial and deal sealed evaluations; holders answer with complaints
//! only; complained-against dealers justify by revealing the disputed share;
//! the finalize step combines the qualified dealers' contributions.
//!
//! Re-sharing runs the same phases with the dealer set taken from the
//! previous group: each dealer's polynomial is anchored at its current share
//! and checked against the previous public polynomial, and the finalize step
//! recombines with Lagrange weights so the distributed key never changes.

use log::debug;
use pharos_key::bytes::decode_scalar;
use pharos_key::ecies::{self, EciesCipher};
use pharos_key::poly::{lagrange_coefficients, share_correct, PrivatePoly, PublicPoly};
use pharos_key::{DistPublic, Share};
use blstrs::{G1Projective, Scalar};
use group::Group as _;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("this node's key is not part of the protocol group")]
    NotAParticipant,
    #[error("a dealer cannot reshare without its previous share")]
    MissingOldShare,
    #[error("threshold {0} out of range for a group of {1}")]
    InvalidThreshold(usize, usize),
    #[error("only {qualified} qualified dealers, {required} required")]
    NotEnoughQualifiedDealers { qualified: usize, required: usize },
    #[error("qualified dealer {0} never handed over a valid share")]
    MissingShare(u32),
    #[error(transparent)]
    Key(#[from] pharos_key::Error),
}

/// A protocol participant: its share index and the identity key its deals
/// are sealed to.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProtocolNode {
    pub index: u32,
    #[serde(with = "pharos_key::bytes::g1")]
    pub key: G1Projective,
}

/// One sealed share, addressed by holder index.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Deal {
    pub share_index: u32,
    pub cipher: EciesCipher,
}

/// Everything a dealer broadcasts in the first phase.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DealBundle {
    pub dealer: u32,
    pub commits: PublicPoly,
    pub deals: Vec<Deal>,
    #[serde(with = "serde_bytes")]
    pub session_id: Vec<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Response {
    pub dealer: u32,
    pub accepted: bool,
}

/// Complaints of one holder about the deals it received.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResponseBundle {
    pub share_index: u32,
    pub responses: Vec<Response>,
    #[serde(with = "serde_bytes")]
    pub session_id: Vec<u8>,
}

/// A disputed share, revealed in plaintext. Only complained-against dealers
/// send these; revealing clears the complaint if the share checks out.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Justification {
    pub share_index: u32,
    #[serde(with = "pharos_key::bytes::scalar")]
    pub share: Scalar,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JustificationBundle {
    pub dealer: u32,
    pub justifications: Vec<Justification>,
    #[serde(with = "serde_bytes")]
    pub session_id: Vec<u8>,
}

/// Carrier for every protocol phase message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Bundle {
    Deal(DealBundle),
    Response(ResponseBundle),
    Justification(JustificationBundle),
}

/// The final output: this node's share, the distributed public polynomial
/// and the dealer indices that made it through.
#[derive(Clone, Debug)]
pub struct ProtocolOutput {
    pub share: Share,
    pub public: DistPublic,
    pub qualified: Vec<u32>,
}

/// What processing the response phase yields: either the protocol finished
/// early (nobody complained), or justifications are required.
pub enum ResponseOutcome {
    Output(ProtocolOutput),
    Justifications(Option<JustificationBundle>),
}

/// Binds every bundle of an execution to its beacon id and epoch.
pub fn session_id(beacon_id: &str, epoch: u32) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(b"pharos-dkg-session");
    hasher.update(beacon_id.as_bytes());
    hasher.update(epoch.to_be_bytes());
    hasher.finalize().to_vec()
}

/// Tracks, per dealer row and holder column, whether the holder is happy
/// with its deal. A dealer whose whole row is happy is qualified.
#[derive(Clone, Debug)]
struct StatusMatrix {
    m: BTreeMap<u32, BTreeMap<u32, bool>>,
}

impl StatusMatrix {
    fn new(
        dealers: &[u32],
        holders: &[u32],
        my_dealer: Option<u32>,
        my_holder: Option<u32>,
    ) -> Self {
        let mut m = BTreeMap::new();
        for dealer in dealers {
            let mut row = BTreeMap::new();
            for holder in holders {
                // assume peers are content until their complaint arrives,
                // but track our own column explicitly: it starts unhappy for
                // every deal we have not validated ourselves
                let default = match my_holder {
                    Some(me) if *holder == me => Some(*dealer) == my_dealer,
                    _ => true,
                };
                row.insert(*holder, default);
            }
            m.insert(*dealer, row);
        }
        Self { m }
    }

    fn set(&mut self, dealer: u32, holder: u32, ok: bool) {
        if let Some(row) = self.m.get_mut(&dealer) {
            if let Some(cell) = row.get_mut(&holder) {
                *cell = ok;
            }
        }
    }

    fn get(&self, dealer: u32, holder: u32) -> bool {
        self.m
            .get(&dealer)
            .and_then(|row| row.get(&holder))
            .copied()
            .unwrap_or(false)
    }

    fn all_true(&self, dealer: u32) -> bool {
        self.m
            .get(&dealer)
            .map(|row| row.values().all(|ok| *ok))
            .unwrap_or(false)
    }

    fn unhappy_holders(&self, dealer: u32) -> Vec<u32> {
        self.m
            .get(&dealer)
            .map(|row| {
                row.iter()
                    .filter(|(_, ok)| !**ok)
                    .map(|(holder, _)| *holder)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// One node's view of a running key generation.
pub struct Protocol {
    session_id: Vec<u8>,
    private_key: Scalar,
    dealer_index: Option<u32>,
    holder_index: Option<u32>,
    dealers: Vec<ProtocolNode>,
    holders: Vec<ProtocolNode>,
    threshold: usize,
    old_threshold: usize,
    old_share: Option<Share>,
    previous_public: Option<PublicPoly>,
    secret: Option<PrivatePoly>,
    statuses: StatusMatrix,
    all_commits: BTreeMap<u32, PublicPoly>,
    valid_shares: BTreeMap<u32, Scalar>,
}

impl Protocol {
    /// A first-epoch protocol: everybody deals and everybody holds.
    pub fn fresh(
        beacon_id: &str,
        epoch: u32,
        private_key: Scalar,
        nodes: Vec<ProtocolNode>,
        threshold: usize,
    ) -> Result<Self, ProtocolError> {
        if threshold == 0 || threshold > nodes.len() {
            return Err(ProtocolError::InvalidThreshold(threshold, nodes.len()));
        }
        let my_key = G1Projective::generator() * private_key;
        let me = nodes
            .iter()
            .find(|n| n.key == my_key)
            .map(|n| n.index)
            .ok_or(ProtocolError::NotAParticipant)?;
        let indices: Vec<u32> = nodes.iter().map(|n| n.index).collect();
        Ok(Self {
            session_id: session_id(beacon_id, epoch),
            private_key,
            dealer_index: Some(me),
            holder_index: Some(me),
            dealers: nodes.clone(),
            holders: nodes,
            threshold,
            old_threshold: threshold,
            old_share: None,
            previous_public: None,
            secret: None,
            statuses: StatusMatrix::new(&indices, &indices, Some(me), Some(me)),
            all_commits: BTreeMap::new(),
            valid_shares: BTreeMap::new(),
        })
    }

    /// A re-sharing protocol: the previous group deals, the new group holds.
    /// Remaining nodes appear on both sides.
    #[allow(clippy::too_many_arguments)]
    pub fn reshare(
        beacon_id: &str,
        epoch: u32,
        private_key: Scalar,
        old_share: Option<Share>,
        previous_public: PublicPoly,
        old_threshold: usize,
        dealers: Vec<ProtocolNode>,
        holders: Vec<ProtocolNode>,
        threshold: usize,
    ) -> Result<Self, ProtocolError> {
        if threshold == 0 || threshold > holders.len() {
            return Err(ProtocolError::InvalidThreshold(threshold, holders.len()));
        }
        let my_key = G1Projective::generator() * private_key;
        let dealer_index = dealers.iter().find(|n| n.key == my_key).map(|n| n.index);
        let holder_index = holders.iter().find(|n| n.key == my_key).map(|n| n.index);
        if dealer_index.is_none() && holder_index.is_none() {
            return Err(ProtocolError::NotAParticipant);
        }
        if dealer_index.is_some() && old_share.is_none() {
            return Err(ProtocolError::MissingOldShare);
        }
        let dealer_indices: Vec<u32> = dealers.iter().map(|n| n.index).collect();
        let holder_indices: Vec<u32> = holders.iter().map(|n| n.index).collect();
        Ok(Self {
            session_id: session_id(beacon_id, epoch),
            private_key,
            dealer_index,
            holder_index,
            dealers,
            holders,
            threshold,
            old_threshold,
            old_share,
            previous_public: Some(previous_public),
            secret: None,
            statuses: StatusMatrix::new(
                &dealer_indices,
                &holder_indices,
                dealer_index,
                holder_index,
            ),
            all_commits: BTreeMap::new(),
            valid_shares: BTreeMap::new(),
        })
    }

    fn dealer_exists(&self, index: u32) -> bool {
        self.dealers.iter().any(|n| n.index == index)
    }

    fn holder_exists(&self, index: u32) -> bool {
        self.holders.iter().any(|n| n.index == index)
    }

    /// Phase one: commit, deal and seal. Non-dealers produce nothing.
    pub fn deal<R: RngCore>(&mut self, rng: &mut R) -> Result<Option<DealBundle>, ProtocolError> {
        let dealer = match self.dealer_index {
            Some(d) => d,
            None => return Ok(None),
        };
        let degree = self.threshold - 1;
        let poly = match &self.old_share {
            Some(share) => PrivatePoly::with_constant(share.private, degree, rng),
            None => PrivatePoly::random(degree, rng),
        };
        let commits = poly.commit();

        let mut deals = Vec::with_capacity(self.holders.len());
        for holder in &self.holders {
            if Some(holder.index) == self.holder_index {
                continue;
            }
            let share = poly.eval(holder.index);
            let cipher = ecies::encrypt(
                &holder.key,
                &pharos_key::bytes::encode_scalar(&share),
                rng,
            );
            deals.push(Deal {
                share_index: holder.index,
                cipher,
            });
        }

        // our own contribution needs no wire trip
        if let Some(me) = self.holder_index {
            self.valid_shares.insert(dealer, poly.eval(me));
        }
        self.all_commits.insert(dealer, commits.clone());
        self.secret = Some(poly);

        Ok(Some(DealBundle {
            dealer,
            commits,
            deals,
            session_id: self.session_id.clone(),
        }))
    }

    /// Phase two: validate every received deal, answer with complaints only.
    pub fn process_deals(
        &mut self,
        bundles: &[DealBundle],
    ) -> Result<Option<ResponseBundle>, ProtocolError> {
        let my_holder = match self.holder_index {
            Some(h) => h,
            None => return Ok(None),
        };
        for bundle in bundles {
            if Some(bundle.dealer) == self.dealer_index {
                continue;
            }
            if bundle.session_id != self.session_id {
                debug!("deal bundle from another session dealer={}", bundle.dealer);
                continue;
            }
            if !self.dealer_exists(bundle.dealer) || self.all_commits.contains_key(&bundle.dealer)
            {
                continue;
            }
            if bundle.commits.degree() + 1 != self.threshold {
                // malformed commitment, the complaint stands
                continue;
            }
            if let Some(previous) = &self.previous_public {
                if bundle.commits.free_coeff() != previous.eval(bundle.dealer) {
                    // the dealer is not re-sharing the share it actually owns
                    continue;
                }
            }
            self.all_commits
                .insert(bundle.dealer, bundle.commits.clone());

            let deal = match bundle.deals.iter().find(|d| d.share_index == my_holder) {
                Some(d) => d,
                None => continue,
            };
            let share = match ecies::decrypt(&self.private_key, &deal.cipher)
                .ok()
                .and_then(|bytes| decode_scalar(&bytes))
            {
                Some(share) => share,
                None => continue,
            };
            if !share_correct(my_holder, &share, &bundle.commits) {
                continue;
            }
            self.statuses.set(bundle.dealer, my_holder, true);
            self.valid_shares.insert(bundle.dealer, share);
        }

        let complaints: Vec<Response> = self
            .dealers
            .iter()
            .map(|d| d.index)
            .filter(|d| !self.statuses.get(*d, my_holder))
            .map(|dealer| Response {
                dealer,
                accepted: false,
            })
            .collect();
        if complaints.is_empty() {
            return Ok(None);
        }
        debug!("complaining about {} dealers", complaints.len());
        Ok(Some(ResponseBundle {
            share_index: my_holder,
            responses: complaints,
            session_id: self.session_id.clone(),
        }))
    }

    /// Phase three: fold everyone's complaints in. Without any complaint the
    /// protocol short-circuits to its output.
    pub fn process_responses(
        &mut self,
        bundles: &[ResponseBundle],
    ) -> Result<ResponseOutcome, ProtocolError> {
        for bundle in bundles {
            if Some(bundle.share_index) == self.holder_index {
                continue;
            }
            if bundle.session_id != self.session_id || !self.holder_exists(bundle.share_index) {
                continue;
            }
            for response in &bundle.responses {
                if self.dealer_exists(response.dealer) {
                    self.statuses
                        .set(response.dealer, bundle.share_index, response.accepted);
                }
            }
        }

        let justification_required = self
            .dealers
            .iter()
            .any(|d| !self.statuses.all_true(d.index));
        if !justification_required {
            return Ok(ResponseOutcome::Output(self.finalize()?));
        }

        let mut justifications = None;
        if let (Some(my_dealer), Some(secret)) = (self.dealer_index, &self.secret) {
            let unhappy = self.statuses.unhappy_holders(my_dealer);
            if !unhappy.is_empty() {
                justifications = Some(JustificationBundle {
                    dealer: my_dealer,
                    justifications: unhappy
                        .into_iter()
                        .map(|share_index| Justification {
                            share_index,
                            share: secret.eval(share_index),
                        })
                        .collect(),
                    session_id: self.session_id.clone(),
                });
            }
        }
        Ok(ResponseOutcome::Justifications(justifications))
    }

    /// Phase four: verify revealed shares, clear the complaints they answer,
    /// then combine the qualified dealers' contributions.
    pub fn process_justifications(
        &mut self,
        bundles: &[JustificationBundle],
    ) -> Result<ProtocolOutput, ProtocolError> {
        for bundle in bundles {
            if bundle.session_id != self.session_id {
                continue;
            }
            let commits = match self.all_commits.get(&bundle.dealer) {
                Some(commits) => commits.clone(),
                // a dealer whose commitment never checked out cannot justify
                None => continue,
            };
            for justification in &bundle.justifications {
                if !share_correct(justification.share_index, &justification.share, &commits) {
                    continue;
                }
                self.statuses
                    .set(bundle.dealer, justification.share_index, true);
                if Some(justification.share_index) == self.holder_index {
                    self.valid_shares.insert(bundle.dealer, justification.share);
                }
            }
        }
        self.finalize()
    }

    fn finalize(&self) -> Result<ProtocolOutput, ProtocolError> {
        let my_holder = self.holder_index.ok_or(ProtocolError::NotAParticipant)?;
        let qualified: Vec<u32> = self
            .dealers
            .iter()
            .map(|d| d.index)
            .filter(|d| self.statuses.all_true(*d))
            .collect();
        if qualified.len() < self.old_threshold {
            return Err(ProtocolError::NotEnoughQualifiedDealers {
                qualified: qualified.len(),
                required: self.old_threshold,
            });
        }
        for dealer in &qualified {
            if !self.valid_shares.contains_key(dealer) {
                return Err(ProtocolError::MissingShare(*dealer));
            }
        }

        let (private, public) = if self.previous_public.is_some() {
            // recombine with Lagrange weights at zero so the distributed
            // secret stays the previous one
            let lambdas = lagrange_coefficients(&qualified)?;
            let mut private = Scalar::from(0u64);
            let mut public = PublicPoly::zero(self.threshold - 1);
            for (dealer, lambda) in qualified.iter().zip(lambdas.iter()) {
                private += self.valid_shares[dealer] * lambda;
                public.add(&self.all_commits[dealer].scale(lambda));
            }
            (private, public)
        } else {
            let mut private = Scalar::from(0u64);
            let mut public = PublicPoly::zero(self.threshold - 1);
            for dealer in &qualified {
                private += self.valid_shares[dealer];
                public.add(&self.all_commits[dealer]);
            }
            (private, public)
        };

        Ok(ProtocolOutput {
            share: Share {
                index: my_holder,
                private,
            },
            public: DistPublic::from(public),
            qualified,
        })
    }
}
