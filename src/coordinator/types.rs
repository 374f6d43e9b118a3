use uuid::Uuid;

use crate::protocol::message::{ClientReply, Operation, PeerMessage};
use crate::transport::ChannelId;

/// What a coordinator sends to each of its targets.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatedRequest {
    /// A client operation, executed locally or as an internal request.
    Store(Operation),
    /// A ring-state probe.
    Probe,
    /// A failure notice or gossip, sent as is.
    Notice(PeerMessage),
}

/// Who is waiting for the coordinator's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyListener {
    /// A queued request on a client connection.
    External { channel: ChannelId, tag: Uuid },
    /// The node itself; the outcome only has side effects.
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Dispatching,
    AwaitingReplies,
    Complete,
}

/// Outstanding request to one target.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingReply {
    pub channel: Option<ChannelId>,
    pub retries: u32,
    /// The last attempt broke before a reply arrived.
    pub failed: bool,
}

/// A finished client request, ready to be queued on its connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub channel: ChannelId,
    pub tag: Uuid,
    pub reply: ClientReply,
}
