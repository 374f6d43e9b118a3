use std::collections::BTreeMap;
use std::time::Instant;

use serde::Serialize;

use crate::protocol::message::KeyTransfer;
use crate::ring::types::NodeHash;

/// Consecutive contact failures recorded against one peer.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedContact {
    pub count: u32,
    /// The entry is dropped once this passes without reaching the threshold.
    pub timeout: Instant,
}

/// Keys to hand over after a departure, grouped by the node that now owns them.
pub type Partition = BTreeMap<NodeHash, KeyTransfer>;

/// Work the membership stage asks the request stage to carry out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipAction {
    /// Send a membership probe to the node.
    Probe(NodeHash),
    /// Run the unannounced failure protocol for the node.
    DeclareFailure(NodeHash),
}

/// Failure tracking as exposed through the status snapshot.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ContactReport {
    pub node_hash: NodeHash,
    pub count: u32,
}
