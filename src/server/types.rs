use serde::Serialize;

use crate::config::NodeAddress;
use crate::membership::types::ContactReport;
use crate::ring::types::NodeHash;

#[derive(Debug, Clone, PartialEq)]
pub struct NodeIdentity {
    pub address: NodeAddress,
    pub node_hash: NodeHash,
}

impl NodeIdentity {
    pub fn new(address: NodeAddress) -> Self {
        let node_hash = address.node_hash();
        Self { address, node_hash }
    }
}

/// Point-in-time view of a node, served by the admin endpoint.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NodeStatus {
    pub node_hash: NodeHash,
    pub external_endpoint: String,
    pub internal_endpoint: String,
    pub ring: Vec<NodeHash>,
    pub stored_keys: usize,
    pub failed_contacts: Vec<ContactReport>,
    pub active_coordinators: usize,
    pub client_connections: usize,
    pub accepting_external: bool,
}
