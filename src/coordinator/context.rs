use std::time::Instant;

use crate::config::ClusterConfig;
use crate::error::ClusterError;
use crate::membership::service::MembershipStage;
use crate::protocol::codec;
use crate::protocol::message::{PeerMessage, Reply};
use crate::ring::types::NodeHash;
use crate::storage::stage::PersistenceStage;
use crate::transport::{ChannelId, Transport};

/// Everything a stage may touch while handling one event or tick.
///
/// Built by the server for the duration of a call, so stages never hold on to
/// each other.
pub struct StageContext<'a> {
    pub local: &'a NodeHash,
    pub config: &'a ClusterConfig,
    pub membership: &'a mut MembershipStage,
    pub persistence: &'a mut PersistenceStage,
    pub transport: &'a mut dyn Transport,
    pub now: Instant,
}

impl StageContext<'_> {
    /// Opens a channel to `node`'s internal port and sends `message` on it.
    pub fn open(
        &mut self,
        node: &NodeHash,
        message: &PeerMessage,
    ) -> Result<ChannelId, ClusterError> {
        let endpoint = self
            .membership
            .address(node)
            .ok_or_else(|| ClusterError::UnknownNode(node.clone()))?
            .internal_endpoint();
        let payload = codec::encode(message)?;

        let channel = self.transport.connect(&endpoint)?;
        if let Err(e) = self.transport.send(channel, payload) {
            self.transport.close(channel);
            return Err(e);
        }
        Ok(channel)
    }

    /// Answers an inbound peer channel and closes it.
    pub fn respond(&mut self, channel: ChannelId, reply: Reply) -> Result<(), ClusterError> {
        let payload = codec::encode(&PeerMessage::Reply(reply));
        let sent = payload.and_then(|payload| self.transport.send(channel, payload));
        self.transport.close(channel);
        sent
    }
}
