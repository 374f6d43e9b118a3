use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use super::types::{ContactReport, FailedContact, MembershipAction, Partition};
use crate::config::{ClusterConfig, NodeAddress};
use crate::ring::hash_ring::ConsistentHashRing;
use crate::ring::types::{KeyHash, NodeHash};
use crate::storage::stage::PersistenceStage;

/// Ring view plus failure tracking for one node.
///
/// Nothing here does I/O. `process` returns the probes and failure declarations that
/// are due, and the request stage turns them into messages.
pub struct MembershipStage {
    local: NodeHash,
    num_replicas: usize,
    ring: ConsistentHashRing,
    addresses: HashMap<NodeHash, NodeAddress>,
    failed_contacts: BTreeMap<NodeHash, FailedContact>,
    probes_in_flight: HashSet<NodeHash>,
    next_probe: Instant,
    probe_interval: Duration,
    failure_threshold: u32,
    failure_backoff: Duration,
    rng: StdRng,
}

impl MembershipStage {
    /// Builds the ring from the full node list. The first probe goes out after
    /// `wait_time` so peers have a chance to start.
    pub fn new(
        local: NodeHash,
        nodes: &[NodeAddress],
        config: &ClusterConfig,
        now: Instant,
    ) -> Self {
        let addresses: HashMap<NodeHash, NodeAddress> = nodes
            .iter()
            .map(|address| (address.node_hash(), address.clone()))
            .collect();
        let ring = ConsistentHashRing::from_nodes(addresses.keys().cloned());

        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        tracing::info!(
            "Membership initialised with {} nodes, local {:?}",
            ring.len(),
            local.short()
        );

        Self {
            local,
            num_replicas: config.num_replicas,
            ring,
            addresses,
            failed_contacts: BTreeMap::new(),
            probes_in_flight: HashSet::new(),
            next_probe: now + config.wait_time(),
            probe_interval: config.probe_interval(),
            failure_threshold: config.failure_threshold,
            failure_backoff: config.failure_backoff(),
            rng,
        }
    }

    pub fn ring(&self) -> &ConsistentHashRing {
        &self.ring
    }

    pub fn node_hashes(&self) -> Vec<NodeHash> {
        self.ring.nodes().to_vec()
    }

    pub fn is_member(&self, node: &NodeHash) -> bool {
        self.ring.contains(node)
    }

    pub fn address(&self, node: &NodeHash) -> Option<&NodeAddress> {
        self.addresses.get(node)
    }

    pub fn responsible_nodes(&self, key: &KeyHash) -> Vec<NodeHash> {
        self.ring.responsible_nodes(key, self.num_replicas)
    }

    /// Drops `node` from the ring. Returns `false` if it was already gone.
    pub fn remove_node(&mut self, node: &NodeHash) -> bool {
        self.failed_contacts.remove(node);
        let removed = self.ring.remove(node);
        if removed {
            tracing::info!(
                "Removed {:?} from ring, {} members left",
                node.short(),
                self.ring.len()
            );
        }
        removed
    }

    /// Advances failure tracking and the probe schedule. A node that has left the
    /// ring stops taking part.
    pub fn process(&mut self, now: Instant) -> Vec<MembershipAction> {
        if !self.ring.contains(&self.local) {
            return Vec::new();
        }

        let mut actions = Vec::new();
        let mut settled = Vec::new();

        for (node, contact) in &self.failed_contacts {
            if contact.count >= self.failure_threshold {
                if self.ring.contains(node) {
                    tracing::warn!(
                        "{:?} failed {} consecutive contacts, declaring failure",
                        node.short(),
                        contact.count
                    );
                    actions.push(MembershipAction::DeclareFailure(node.clone()));
                }
                settled.push(node.clone());
            } else if now >= contact.timeout {
                tracing::debug!("Contact failures for {:?} expired", node.short());
                settled.push(node.clone());
            } else if !self.probes_in_flight.contains(node) {
                actions.push(MembershipAction::Probe(node.clone()));
            }
        }

        for node in settled {
            self.failed_contacts.remove(&node);
        }

        for action in &actions {
            if let MembershipAction::Probe(node) = action {
                self.probes_in_flight.insert(node.clone());
            }
        }

        if now >= self.next_probe {
            self.next_probe = now + self.probe_interval;

            let candidates: Vec<&NodeHash> = self
                .ring
                .nodes()
                .iter()
                .filter(|node| **node != self.local && !self.probes_in_flight.contains(*node))
                .collect();

            if let Some(target) = candidates.choose(&mut self.rng).map(|node| (*node).clone()) {
                tracing::debug!("Probing {:?}", target.short());
                self.probes_in_flight.insert(target.clone());
                actions.push(MembershipAction::Probe(target));
            }
        }

        actions
    }

    /// Records one failed attempt to reach `node`. Each failure pushes the entry's
    /// expiry out by the backoff.
    pub fn report_contact_failure(&mut self, node: &NodeHash, now: Instant) {
        if *node == self.local {
            return;
        }

        let backoff = self.failure_backoff;
        let contact = self
            .failed_contacts
            .entry(node.clone())
            .and_modify(|contact| {
                contact.count += 1;
                contact.timeout += backoff;
            })
            .or_insert(FailedContact {
                count: 1,
                timeout: now + backoff,
            });

        tracing::warn!(
            "Contact failure {} for {:?}",
            contact.count,
            node.short()
        );
    }

    pub fn report_contact_success(&mut self, node: &NodeHash) {
        if self.failed_contacts.remove(node).is_some() {
            tracing::debug!("{:?} answered again", node.short());
        }
    }

    pub fn finish_probe(&mut self, node: &NodeHash) {
        self.probes_in_flight.remove(node);
    }

    pub fn failed_contact_count(&self, node: &NodeHash) -> u32 {
        self.failed_contacts
            .get(node)
            .map(|contact| contact.count)
            .unwrap_or(0)
    }

    pub fn failed_contacts(&self) -> Vec<ContactReport> {
        self.failed_contacts
            .iter()
            .map(|(node_hash, contact)| ContactReport {
                node_hash: node_hash.clone(),
                count: contact.count,
            })
            .collect()
    }

    /// Ring members the peer no longer lists.
    ///
    /// Rings only ever shrink, so anything the peer dropped has left. The local node
    /// is never reported, and an empty peer view carries no information.
    pub fn stale_members(&self, members: &[NodeHash]) -> Vec<NodeHash> {
        if members.is_empty() {
            return Vec::new();
        }

        let peer_view: HashSet<&NodeHash> = members.iter().collect();
        self.ring
            .nodes()
            .iter()
            .filter(|node| **node != self.local && !peer_view.contains(node))
            .cloned()
            .collect()
    }

    /// Which locally held keys change owners if `failed` leaves, and who gets them.
    ///
    /// For each key `failed` currently replicates, the owners in the shrunk ring that
    /// were not owners before receive the key.
    pub fn partition_for_failure(
        &self,
        failed: &NodeHash,
        persistence: &PersistenceStage,
    ) -> Partition {
        let mut partition = Partition::new();
        if !self.ring.contains(failed) {
            return partition;
        }

        let mut shrunk = self.ring.clone();
        shrunk.remove(failed);

        for key in persistence.keys() {
            let before = self.ring.responsible_nodes(&key, self.num_replicas);
            if !before.contains(failed) {
                continue;
            }

            let Ok(stored) = persistence.get(&key) else {
                continue;
            };

            for owner in shrunk.responsible_nodes(&key, self.num_replicas) {
                if !before.contains(&owner) {
                    partition
                        .entry(owner)
                        .or_default()
                        .insert(key.clone(), stored.clone());
                }
            }
        }

        partition
    }

    /// Up to `n` distinct random ring members, never the local node.
    pub fn gossip_targets(&mut self, n: usize) -> Vec<NodeHash> {
        let peers: Vec<&NodeHash> = self
            .ring
            .nodes()
            .iter()
            .filter(|node| **node != self.local)
            .collect();

        peers
            .choose_multiple(&mut self.rng, n)
            .map(|node| (*node).clone())
            .collect()
    }

    pub fn coin_flip(&mut self, probability: f64) -> bool {
        self.rng.gen_bool(probability.clamp(0.0, 1.0))
    }

    /// Factor applied to the forwarding probability of a duplicate failure notice:
    /// `1 - r² / (n · ln n)` with `n` the size of the node list, not of the current
    /// ring, clamped to `[0, 1]`.
    pub fn gossip_decay(&self) -> f64 {
        let nodes = self.addresses.len() as f64;
        if nodes <= 1.0 {
            return 0.0;
        }
        let replicas = self.num_replicas as f64;
        (1.0 - replicas * replicas / (nodes * nodes.ln())).clamp(0.0, 1.0)
    }
}
