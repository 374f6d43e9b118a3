//! Dynamo-style Key-Value Cluster Library
//!
//! Every node owns a slice of a consistent-hash keyspace and replicates each key on
//! the `N` nodes clockwise of it. The binaries (`dynamo-node`, `kvctl`) are thin
//! shells around these modules.
//!
//! ## Architecture Modules
//! - **`ring`**: node and key hashes and the sorted ring that maps keys to replicas.
//! - **`storage`**: the local last-write-wins store behind each replica.
//! - **`membership`**: ring view, failure detection, key repartitioning and gossip decay.
//! - **`coordinator`**: request fan-out state machines, quorum reconciliation and the
//!   failure announcement protocols.
//! - **`server`**: composition root that owns the stages and drives the tick.
//! - **`protocol`**: wire messages, error codes and the JSON line codec.
//! - **`transport`**: channel abstraction with TCP and in-memory implementations.
//! - **`config`**, **`admin`**, **`client`**, **`error`**: supporting pieces.

pub mod admin;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod membership;
pub mod protocol;
pub mod ring;
pub mod server;
pub mod storage;
pub mod transport;
