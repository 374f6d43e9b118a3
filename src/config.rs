//! Node configuration.
//!
//! Two sources feed a node at startup:
//! - the static node list, one `hostname,external_port,internal_port` line per node,
//!   from which every `NodeHash` is derived;
//! - [`ClusterConfig`], the protocol tunables (replica count, timeouts, retry budget).

use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::ClusterError;
use crate::ring::types::NodeHash;

/// Where a node listens. Its hash is its identity on the ring.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeAddress {
    pub hostname: String,
    pub external_port: u16,
    pub internal_port: u16,
}

impl NodeAddress {
    pub fn new(hostname: impl Into<String>, external_port: u16, internal_port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            external_port,
            internal_port,
        }
    }

    pub fn node_hash(&self) -> NodeHash {
        NodeHash::for_address(&self.hostname, self.external_port, self.internal_port)
    }

    pub fn external_endpoint(&self) -> String {
        format!("{}:{}", self.hostname, self.external_port)
    }

    pub fn internal_endpoint(&self) -> String {
        format!("{}:{}", self.hostname, self.internal_port)
    }
}

impl std::fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{},{}", self.hostname, self.external_port, self.internal_port)
    }
}

impl std::str::FromStr for NodeAddress {
    type Err = ClusterError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        let [hostname, external_port, internal_port] = parts.as_slice() else {
            return Err(ClusterError::Config(format!(
                "expected hostname,external_port,internal_port, got {:?}",
                line
            )));
        };

        if hostname.is_empty() {
            return Err(ClusterError::Config(format!("missing hostname in {:?}", line)));
        }

        let port = |value: &str| {
            value
                .parse::<u16>()
                .map_err(|e| ClusterError::Config(format!("bad port {:?}: {}", value, e)))
        };

        Ok(Self::new(*hostname, port(*external_port)?, port(*internal_port)?))
    }
}

/// The static cluster membership read at startup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeList {
    nodes: Vec<NodeAddress>,
}

impl NodeList {
    pub fn new(nodes: Vec<NodeAddress>) -> Self {
        Self { nodes }
    }

    /// Parses node list text. Blank lines and `#` comments are skipped.
    pub fn parse(text: &str) -> Result<Self, ClusterError> {
        let nodes = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::parse)
            .collect::<Result<Vec<NodeAddress>, _>>()?;

        if nodes.is_empty() {
            return Err(ClusterError::Config("node list is empty".to_string()));
        }

        Ok(Self { nodes })
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read node list {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("failed to parse node list {}", path.display()))
    }

    pub fn nodes(&self) -> &[NodeAddress] {
        &self.nodes
    }

    /// Finds this node's own entry. When several nodes share a hostname the
    /// external port disambiguates.
    pub fn find_local(&self, hostname: &str, external_port: Option<u16>) -> Option<&NodeAddress> {
        self.nodes.iter().find(|node| {
            node.hostname == hostname && external_port.is_none_or(|port| node.external_port == port)
        })
    }
}

/// Protocol tunables shared by every stage of a node.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Replicas per key (N).
    pub num_replicas: usize,
    /// Delay before the first membership probe after startup, in milliseconds.
    pub wait_time_ms: u64,
    /// Interval between steady-state membership probes, in milliseconds.
    pub probe_interval_ms: u64,
    /// Deadline for client-bound fan-out, in milliseconds.
    pub request_timeout_ms: u64,
    /// Deadline for point-to-point protocol messages, in milliseconds.
    pub protocol_timeout_ms: u64,
    /// Resends per replica before it is reported unreachable.
    pub max_retries: u32,
    /// Contact failures after which a node is declared failed.
    pub failure_threshold: u32,
    /// How long each contact failure extends a node's tracking window, in milliseconds.
    pub failure_backoff_ms: u64,
    /// Client connections with no traffic for this long are closed, in milliseconds.
    pub idle_timeout_ms: u64,
    /// Peers contacted per gossip round.
    pub gossip_fanout: usize,
    /// Seed for gossip target selection and coin flips. Random when unset.
    pub rng_seed: Option<u64>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            num_replicas: 3,
            wait_time_ms: 1_000,
            probe_interval_ms: 1_000,
            request_timeout_ms: 30_000,
            protocol_timeout_ms: 2_000,
            max_retries: 3,
            failure_threshold: 3,
            failure_backoff_ms: 10_000,
            idle_timeout_ms: 30_000,
            gossip_fanout: 3,
            rng_seed: None,
        }
    }
}

impl ClusterConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    pub fn wait_time(&self) -> Duration {
        Duration::from_millis(self.wait_time_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn protocol_timeout(&self) -> Duration {
        Duration::from_millis(self.protocol_timeout_ms)
    }

    pub fn failure_backoff(&self) -> Duration {
        Duration::from_millis(self.failure_backoff_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}
