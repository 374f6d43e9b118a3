//! Membership & Failure Detection Module
//!
//! Owns this node's view of the cluster: the hash ring, the static address table and
//! the record of peers that recently failed to answer.
//!
//! ## Core Mechanisms
//! - **Membership probes**: every `probe_interval` one random peer is asked for its ring
//!   members. Members the peer has already dropped are dropped locally too.
//! - **Failure Detection**: coordinators report contact failures. A peer that keeps
//!   failing within the backoff window reaches the threshold and is declared failed
//!   (unannounced failure). Entries that stop failing age out.
//! - **Repartitioning**: before a node leaves the ring, the keys whose replica set
//!   changes are grouped by their new owners so they can be pushed there.
//! - **Gossip decay**: duplicate failure notices keep spreading with a probability
//!   that shrinks with cluster size.

pub mod service;
pub mod types;
