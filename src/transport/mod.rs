//! Transport Module
//!
//! Moves framed messages between nodes and clients. Stages never touch sockets; they
//! see numbered channels and a stream of events drained once per tick.
//!
//! ## Implementations
//! - **`memory`**: an in-process network, deterministic, used to run whole clusters
//!   inside a single test.
//! - **`tcp`**: tokio listeners on a node's external and internal ports. Connection
//!   I/O runs on background tasks; `poll` only drains what they produced.

pub mod memory;
pub mod tcp;

#[cfg(test)]
mod tests;

use std::fmt;

use crate::error::ClusterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which listening port accepted an inbound channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Listener {
    External,
    Internal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A remote end opened a channel to one of our listeners.
    Accepted { channel: ChannelId, listener: Listener },
    /// One complete frame, terminator stripped.
    Received { channel: ChannelId, payload: String },
    /// The remote end closed the channel.
    Closed { channel: ChannelId },
    /// An outbound channel could not be established or broke mid-flight.
    Failed { channel: ChannelId, reason: String },
}

impl TransportEvent {
    pub fn channel(&self) -> ChannelId {
        match self {
            TransportEvent::Accepted { channel, .. }
            | TransportEvent::Received { channel, .. }
            | TransportEvent::Closed { channel }
            | TransportEvent::Failed { channel, .. } => *channel,
        }
    }
}

/// Outbound channel factory plus the inbound event stream.
///
/// `connect` may succeed before the remote end is actually reachable; in that case
/// the failure arrives later as [`TransportEvent::Failed`].
pub trait Transport {
    fn connect(&mut self, endpoint: &str) -> Result<ChannelId, ClusterError>;

    /// Queues one frame. The transport adds the terminator.
    fn send(&mut self, channel: ChannelId, payload: String) -> Result<(), ClusterError>;

    fn close(&mut self, channel: ChannelId);

    /// Drains every event that arrived since the last call.
    fn poll(&mut self) -> Vec<TransportEvent>;
}
