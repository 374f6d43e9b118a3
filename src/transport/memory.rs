//! In-process network.
//!
//! Every [`MemoryTransport`] is an endpoint on a shared hub. Frames are delivered
//! into the receiving endpoint's inbox immediately and surface on its next `poll`.
//! Endpoints can be taken offline to simulate a crashed node.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{ChannelId, Listener, Transport, TransportEvent};
use crate::config::NodeAddress;
use crate::error::ClusterError;

type EndpointId = usize;

#[derive(Debug, Default)]
struct Hub {
    next_channel: u64,
    next_endpoint: EndpointId,
    listeners: HashMap<String, (EndpointId, Listener)>,
    inboxes: HashMap<EndpointId, VecDeque<TransportEvent>>,
    offline: HashSet<EndpointId>,
    /// Open channels as (connecting endpoint, accepting endpoint).
    channels: HashMap<ChannelId, (EndpointId, EndpointId)>,
}

impl Hub {
    fn register(&mut self) -> EndpointId {
        let id = self.next_endpoint;
        self.next_endpoint += 1;
        self.inboxes.insert(id, VecDeque::new());
        id
    }

    fn deliver(&mut self, endpoint: EndpointId, event: TransportEvent) {
        if self.offline.contains(&endpoint) {
            return;
        }
        if let Some(inbox) = self.inboxes.get_mut(&endpoint) {
            inbox.push_back(event);
        }
    }

    fn other_side(&self, channel: ChannelId, endpoint: EndpointId) -> Option<EndpointId> {
        self.channels.get(&channel).map(|&(connector, acceptor)| {
            if connector == endpoint {
                acceptor
            } else {
                connector
            }
        })
    }
}

/// Handle on the shared hub. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn hub(&self) -> MutexGuard<'_, Hub> {
        // A poisoned hub only means another test thread panicked mid-update.
        self.hub.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers a node endpoint listening on both of its ports.
    pub fn bind(&self, address: &NodeAddress) -> MemoryTransport {
        let mut hub = self.hub();
        let endpoint = hub.register();
        hub.listeners
            .insert(address.external_endpoint(), (endpoint, Listener::External));
        hub.listeners
            .insert(address.internal_endpoint(), (endpoint, Listener::Internal));
        MemoryTransport {
            network: self.clone(),
            endpoint,
        }
    }

    /// Registers an endpoint without listeners, as used by clients.
    pub fn client(&self) -> MemoryTransport {
        let endpoint = self.hub().register();
        MemoryTransport {
            network: self.clone(),
            endpoint,
        }
    }

    /// Takes a node off the network (or brings it back). Going offline drops its
    /// queued events and breaks every channel it was part of.
    pub fn set_offline(&self, address: &NodeAddress, offline: bool) {
        let mut hub = self.hub();
        let Some(&(endpoint, _)) = hub.listeners.get(&address.internal_endpoint()) else {
            return;
        };

        if !offline {
            hub.offline.remove(&endpoint);
            return;
        }

        hub.offline.insert(endpoint);
        if let Some(inbox) = hub.inboxes.get_mut(&endpoint) {
            inbox.clear();
        }

        let broken: Vec<(ChannelId, EndpointId)> = hub
            .channels
            .iter()
            .filter_map(|(&channel, &(connector, acceptor))| {
                if connector == endpoint {
                    Some((channel, acceptor))
                } else if acceptor == endpoint {
                    Some((channel, connector))
                } else {
                    None
                }
            })
            .collect();

        for (channel, survivor) in broken {
            hub.channels.remove(&channel);
            hub.deliver(survivor, TransportEvent::Closed { channel });
        }
    }
}

/// One endpoint on a [`MemoryNetwork`].
#[derive(Debug)]
pub struct MemoryTransport {
    network: MemoryNetwork,
    endpoint: EndpointId,
}

impl Transport for MemoryTransport {
    fn connect(&mut self, endpoint: &str) -> Result<ChannelId, ClusterError> {
        let mut hub = self.network.hub();

        if hub.offline.contains(&self.endpoint) {
            return Err(ClusterError::Transport("endpoint is offline".to_string()));
        }

        let Some(&(acceptor, listener)) = hub.listeners.get(endpoint) else {
            return Err(ClusterError::Transport(format!(
                "connection refused by {}",
                endpoint
            )));
        };
        if hub.offline.contains(&acceptor) {
            return Err(ClusterError::Transport(format!(
                "connection refused by {}",
                endpoint
            )));
        }

        hub.next_channel += 1;
        let channel = ChannelId(hub.next_channel);
        hub.channels.insert(channel, (self.endpoint, acceptor));
        hub.deliver(acceptor, TransportEvent::Accepted { channel, listener });

        Ok(channel)
    }

    fn send(&mut self, channel: ChannelId, payload: String) -> Result<(), ClusterError> {
        let mut hub = self.network.hub();
        let other = hub
            .other_side(channel, self.endpoint)
            .ok_or(ClusterError::UnknownChannel(channel))?;

        if hub.offline.contains(&other) || hub.offline.contains(&self.endpoint) {
            return Err(ClusterError::Transport(format!(
                "channel {} is broken",
                channel
            )));
        }

        hub.deliver(other, TransportEvent::Received { channel, payload });
        Ok(())
    }

    fn close(&mut self, channel: ChannelId) {
        let mut hub = self.network.hub();
        if let Some(other) = hub.other_side(channel, self.endpoint) {
            hub.channels.remove(&channel);
            hub.deliver(other, TransportEvent::Closed { channel });
        }
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        let mut hub = self.network.hub();
        hub.inboxes
            .get_mut(&self.endpoint)
            .map(|inbox| inbox.drain(..).collect())
            .unwrap_or_default()
    }
}
