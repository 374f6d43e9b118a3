use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use uuid::Uuid;

use super::context::StageContext;
use super::reconcile::reconcile;
use super::types::{
    Completion, CoordinatedRequest, CoordinatorState, PendingReply, ReplyListener,
};
use crate::protocol::message::{PeerMessage, Reply};
use crate::protocol::types::ErrorCode;
use crate::ring::types::NodeHash;
use crate::transport::ChannelId;

/// Fan-out state machine for one request.
///
/// Sends the request to every target, counts replies, retries targets whose channel
/// broke or whose deadline passed, and gives up on a target after `max_retries` by
/// recording a `PeerUnreachable` reply in its place. Completes once every target
/// has a reply.
#[derive(Debug)]
pub struct InternalRequestCoordinator {
    id: Uuid,
    request: CoordinatedRequest,
    listener: ReplyListener,
    state: CoordinatorState,
    targets: Vec<NodeHash>,
    pending: BTreeMap<NodeHash, PendingReply>,
    replies: BTreeMap<NodeHash, Reply>,
    deadline: Instant,
    timeout: Duration,
    max_retries: u32,
}

impl InternalRequestCoordinator {
    pub fn new(
        request: CoordinatedRequest,
        listener: ReplyListener,
        targets: Vec<NodeHash>,
        timeout: Duration,
        max_retries: u32,
        now: Instant,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            listener,
            state: CoordinatorState::Dispatching,
            targets,
            pending: BTreeMap::new(),
            replies: BTreeMap::new(),
            deadline: now + timeout,
            timeout,
            max_retries,
        }
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == CoordinatorState::Complete
    }

    pub fn request(&self) -> &CoordinatedRequest {
        &self.request
    }

    pub fn replies(&self) -> &BTreeMap<NodeHash, Reply> {
        &self.replies
    }

    /// The target waiting on `channel`, if this coordinator opened it.
    pub fn owner_of(&self, channel: ChannelId) -> Option<&NodeHash> {
        self.pending
            .iter()
            .find(|(_, pending)| pending.channel == Some(channel))
            .map(|(node, _)| node)
    }

    pub fn open_channels(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.pending.values().filter_map(|pending| pending.channel)
    }

    /// Sends the request to every target. A store on the local node is executed
    /// right away.
    pub fn dispatch(&mut self, ctx: &mut StageContext<'_>) {
        for node in self.targets.clone() {
            let local_reply = match &self.request {
                CoordinatedRequest::Store(operation) if node == *ctx.local => {
                    Some(ctx.persistence.execute(operation, ctx.local))
                }
                _ => None,
            };

            match local_reply {
                Some(reply) => {
                    self.replies.insert(node, reply);
                }
                None => self.send_to(&node, ctx),
            }
        }

        self.state = CoordinatorState::AwaitingReplies;
        self.check_complete();
    }

    fn message(&self, ctx: &StageContext<'_>) -> PeerMessage {
        match &self.request {
            CoordinatedRequest::Store(operation) => PeerMessage::InternalRequest {
                request: operation.clone(),
            },
            CoordinatedRequest::Probe => PeerMessage::Membership {
                sender: ctx.local.clone(),
                members: ctx.membership.node_hashes(),
            },
            CoordinatedRequest::Notice(message) => message.clone(),
        }
    }

    fn send_to(&mut self, node: &NodeHash, ctx: &mut StageContext<'_>) {
        let message = self.message(ctx);
        let opened = ctx.open(node, &message);
        let pending = self.pending.entry(node.clone()).or_default();

        match opened {
            Ok(channel) => {
                tracing::debug!(
                    "Coordinator {} sent {} to {:?} on {}",
                    self.id,
                    message.kind_name(),
                    node.short(),
                    channel
                );
                pending.channel = Some(channel);
                pending.failed = false;
            }
            Err(e) => {
                tracing::warn!(
                    "Coordinator {} could not reach {:?}: {}",
                    self.id,
                    node.short(),
                    e
                );
                pending.channel = None;
                pending.failed = true;
                ctx.membership.report_contact_failure(node, ctx.now);
            }
        }
    }

    /// Records a reply that arrived on one of this coordinator's channels.
    pub fn on_reply(&mut self, channel: ChannelId, reply: Reply, ctx: &mut StageContext<'_>) {
        let Some(node) = self.owner_of(channel).cloned() else {
            return;
        };

        ctx.transport.close(channel);
        if let Some(pending) = self.pending.get_mut(&node) {
            pending.channel = None;
        }
        ctx.membership.report_contact_success(&node);

        if reply.node_hash != node {
            tracing::debug!(
                "Reply on {} names {:?}, expected {:?}",
                channel,
                reply.node_hash.short(),
                node.short()
            );
        }
        self.replies.insert(node, reply);
        self.check_complete();
    }

    /// A channel broke before its reply arrived. The target is retried on the next
    /// `process`.
    pub fn on_channel_lost(&mut self, channel: ChannelId, ctx: &mut StageContext<'_>) {
        let Some(node) = self.owner_of(channel).cloned() else {
            return;
        };

        if let Some(pending) = self.pending.get_mut(&node) {
            pending.channel = None;
            pending.failed = true;
        }
        tracing::warn!(
            "Coordinator {} lost channel {} to {:?}",
            self.id,
            channel,
            node.short()
        );
        ctx.membership.report_contact_failure(&node, ctx.now);
    }

    /// Dispatches if needed, then retries or gives up on targets that failed or
    /// timed out. Returns `true` once the coordinator is complete.
    pub fn process(&mut self, ctx: &mut StageContext<'_>) -> bool {
        match self.state {
            CoordinatorState::Complete => return true,
            CoordinatorState::Dispatching => self.dispatch(ctx),
            CoordinatorState::AwaitingReplies => {}
        }

        let timed_out = ctx.now >= self.deadline;
        let waiting: Vec<NodeHash> = self
            .pending
            .iter()
            .filter(|(node, pending)| {
                !self.replies.contains_key(*node) && (pending.failed || timed_out)
            })
            .map(|(node, _)| node.clone())
            .collect();

        for node in waiting {
            let Some(pending) = self.pending.get_mut(&node) else {
                continue;
            };

            if let Some(channel) = pending.channel.take() {
                // Timed out on an open channel.
                ctx.transport.close(channel);
                ctx.membership.report_contact_failure(&node, ctx.now);
            }

            if pending.retries < self.max_retries {
                pending.retries += 1;
                tracing::debug!(
                    "Coordinator {} retrying {:?} ({}/{})",
                    self.id,
                    node.short(),
                    pending.retries,
                    self.max_retries
                );
                self.send_to(&node, ctx);
            } else {
                pending.failed = false;
                tracing::warn!(
                    "Coordinator {} giving up on {:?} after {} retries",
                    self.id,
                    node.short(),
                    self.max_retries
                );
                self.replies.insert(
                    node.clone(),
                    Reply::status(node, ErrorCode::PeerUnreachable),
                );
            }
        }

        if timed_out {
            self.deadline = ctx.now + self.timeout;
        }

        self.check_complete();
        self.is_complete()
    }

    fn check_complete(&mut self) {
        if self.state == CoordinatorState::AwaitingReplies
            && self.replies.len() >= self.targets.len()
        {
            self.state = CoordinatorState::Complete;
        }
    }

    /// The client reply for a completed store submitted by a client.
    pub fn finish(self) -> Option<Completion> {
        let (CoordinatedRequest::Store(operation), ReplyListener::External { channel, tag }) =
            (&self.request, self.listener)
        else {
            return None;
        };

        let reply = reconcile(operation.command(), &self.replies);
        tracing::debug!(
            "Coordinator {} reconciled {} replies into {:?}",
            self.id,
            self.replies.len(),
            reply.error_code
        );
        Some(Completion {
            channel,
            tag,
            reply,
        })
    }
}
