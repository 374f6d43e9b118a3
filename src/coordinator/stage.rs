use std::collections::{BTreeMap, HashSet};

use uuid::Uuid;

use super::context::StageContext;
use super::internal::InternalRequestCoordinator;
use super::types::{Completion, CoordinatedRequest, ReplyListener};
use crate::error::ClusterError;
use crate::membership::types::Partition;
use crate::protocol::codec;
use crate::protocol::message::{
    ClientReply, FailureKind, FailureNotice, PeerMessage, Reply, Submission,
};
use crate::protocol::types::ErrorCode;
use crate::ring::types::NodeHash;
use crate::transport::{ChannelId, Transport};

/// Owns every active coordinator and answers inbound peer channels.
#[derive(Debug, Default)]
pub struct InternalRequestStage {
    coordinators: Vec<InternalRequestCoordinator>,
    inbound: HashSet<ChannelId>,
    ready: Vec<Completion>,
}

impl InternalRequestStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept(&mut self, channel: ChannelId) {
        self.inbound.insert(channel);
    }

    pub fn owns(&self, channel: ChannelId) -> bool {
        self.inbound.contains(&channel)
            || self
                .coordinators
                .iter()
                .any(|coordinator| coordinator.owner_of(channel).is_some())
    }

    pub fn active_coordinators(&self) -> usize {
        self.coordinators.len()
    }

    fn spawn(&mut self, mut coordinator: InternalRequestCoordinator, ctx: &mut StageContext<'_>) {
        coordinator.dispatch(ctx);
        self.coordinators.push(coordinator);
    }

    fn notify(&mut self, target: NodeHash, message: PeerMessage, ctx: &mut StageContext<'_>) {
        let coordinator = InternalRequestCoordinator::new(
            CoordinatedRequest::Notice(message),
            ReplyListener::Internal,
            vec![target],
            ctx.config.protocol_timeout(),
            ctx.config.max_retries,
            ctx.now,
        );
        self.spawn(coordinator, ctx);
    }

    // ============================================================
    // CLIENT SUBMISSIONS
    // ============================================================

    /// Starts the fan-out for a client request queued on `channel` under `tag`.
    pub fn handle_external_request(
        &mut self,
        submission: Submission,
        channel: ChannelId,
        tag: Uuid,
        ctx: &mut StageContext<'_>,
    ) {
        match submission {
            Submission::Store(operation) => {
                let targets = ctx.membership.responsible_nodes(operation.key());
                tracing::debug!(
                    "{:?} on {} fans out to {} replicas",
                    operation.command(),
                    operation.key(),
                    targets.len()
                );
                let coordinator = InternalRequestCoordinator::new(
                    CoordinatedRequest::Store(operation),
                    ReplyListener::External { channel, tag },
                    targets,
                    ctx.config.request_timeout(),
                    ctx.config.max_retries,
                    ctx.now,
                );
                self.spawn(coordinator, ctx);
            }
            Submission::Shutdown => {
                self.ready.push(Completion {
                    channel,
                    tag,
                    reply: ClientReply::status(ErrorCode::Success),
                });
                self.announce_departure(ctx);
            }
        }
    }

    // ============================================================
    // PEER FRAMES
    // ============================================================

    /// Routes a frame from the internal port: replies go to the coordinator that
    /// owns the channel, everything else is a request from a peer.
    pub fn handle_frame(
        &mut self,
        channel: ChannelId,
        payload: &str,
        ctx: &mut StageContext<'_>,
    ) -> Result<(), ClusterError> {
        let message = match codec::decode_peer_message(payload) {
            Ok(message) => message,
            Err(e) => {
                self.handle_channel_lost(channel, ctx);
                ctx.transport.close(channel);
                return Err(e);
            }
        };

        if let Some(coordinator) = self
            .coordinators
            .iter_mut()
            .find(|coordinator| coordinator.owner_of(channel).is_some())
        {
            return match message {
                PeerMessage::Reply(reply) => {
                    coordinator.on_reply(channel, reply, ctx);
                    Ok(())
                }
                other => {
                    coordinator.on_channel_lost(channel, ctx);
                    ctx.transport.close(channel);
                    Err(ClusterError::InvalidRequest(format!(
                        "expected reply on {}, got {}",
                        channel,
                        other.kind_name()
                    )))
                }
            };
        }

        if !self.inbound.remove(&channel) {
            return Err(ClusterError::UnknownChannel(channel));
        }

        let reply = match message {
            PeerMessage::InternalRequest { request } => {
                ctx.persistence.execute(&request, ctx.local)
            }
            PeerMessage::Membership { sender, members } => {
                let local_members = ctx.membership.node_hashes();
                if members != local_members {
                    tracing::debug!(
                        "Ring view of {:?} differs ({} vs {} members)",
                        sender.short(),
                        members.len(),
                        local_members.len()
                    );
                }
                Reply {
                    members: local_members,
                    ..Reply::status(ctx.local.clone(), ErrorCode::Success)
                }
            }
            PeerMessage::AnnouncedFailure(notice) => {
                self.handle_failure_notice(FailureKind::Announced, notice, 1.0, ctx);
                Reply::status(ctx.local.clone(), ErrorCode::Success)
            }
            PeerMessage::UnannouncedFailure(notice) => {
                self.handle_failure_notice(FailureKind::Unannounced, notice, 1.0, ctx);
                Reply::status(ctx.local.clone(), ErrorCode::Success)
            }
            PeerMessage::Gossip {
                probability,
                kind,
                notice,
            } => {
                self.handle_failure_notice(kind, notice, probability, ctx);
                Reply::status(ctx.local.clone(), ErrorCode::Success)
            }
            PeerMessage::Reply(_) => {
                ctx.transport.close(channel);
                return Err(ClusterError::InvalidRequest(format!(
                    "unsolicited reply on {}",
                    channel
                )));
            }
        };

        ctx.respond(channel, reply)
    }

    /// A channel closed or failed. Coordinators retry; inbound channels are forgotten.
    pub fn handle_channel_lost(&mut self, channel: ChannelId, ctx: &mut StageContext<'_>) {
        if self.inbound.remove(&channel) {
            tracing::debug!("Inbound channel {} closed before a request", channel);
            return;
        }
        if let Some(coordinator) = self
            .coordinators
            .iter_mut()
            .find(|coordinator| coordinator.owner_of(channel).is_some())
        {
            coordinator.on_channel_lost(channel, ctx);
        }
    }

    // ============================================================
    // TICK
    // ============================================================

    /// Advances every coordinator and returns the client replies that are ready.
    pub fn process(&mut self, ctx: &mut StageContext<'_>) -> Vec<Completion> {
        let mut completions = std::mem::take(&mut self.ready);

        for coordinator in &mut self.coordinators {
            coordinator.process(ctx);
        }

        let (finished, active): (Vec<_>, Vec<_>) = std::mem::take(&mut self.coordinators)
            .into_iter()
            .partition(InternalRequestCoordinator::is_complete);
        self.coordinators = active;

        for coordinator in finished {
            if *coordinator.request() == CoordinatedRequest::Probe {
                self.finish_probe(coordinator.replies(), ctx);
            } else {
                completions.extend(coordinator.finish());
            }
        }
        completions
    }

    /// A probe answered with the peer's ring view. Members the peer dropped have left
    /// and are removed here too.
    fn finish_probe(&mut self, replies: &BTreeMap<NodeHash, Reply>, ctx: &mut StageContext<'_>) {
        for (node, reply) in replies {
            if reply.error_code.is_success() {
                ctx.membership.report_contact_success(node);
                for stale in ctx.membership.stale_members(&reply.members) {
                    tracing::info!(
                        "{:?} no longer lists {:?}",
                        node.short(),
                        stale.short()
                    );
                    self.remove_and_repair(&stale, ctx);
                }
            }
            ctx.membership.finish_probe(node);
        }
    }

    // ============================================================
    // MEMBERSHIP PROTOCOLS
    // ============================================================

    pub fn probe(&mut self, target: NodeHash, ctx: &mut StageContext<'_>) {
        let coordinator = InternalRequestCoordinator::new(
            CoordinatedRequest::Probe,
            ReplyListener::Internal,
            vec![target],
            ctx.config.protocol_timeout(),
            ctx.config.max_retries,
            ctx.now,
        );
        self.spawn(coordinator, ctx);
    }

    /// Graceful departure: hand every displaced key to its new owner, tell all
    /// members, and leave the ring.
    pub fn announce_departure(&mut self, ctx: &mut StageContext<'_>) {
        let local = ctx.local.clone();
        if !ctx.membership.is_member(&local) {
            tracing::debug!("Already left the ring");
            return;
        }

        let partition = ctx.membership.partition_for_failure(&local, ctx.persistence);
        tracing::info!(
            "Leaving the ring, handing off keys to {} nodes",
            partition.len()
        );

        self.broadcast_failure(FailureKind::Announced, &local, partition, ctx);
        ctx.membership.remove_node(&local);
    }

    /// Unannounced failure detected locally: repair the keys `failed` replicated,
    /// drop it from the ring and tell every member.
    pub fn declare_failure(&mut self, failed: NodeHash, ctx: &mut StageContext<'_>) {
        if failed == *ctx.local {
            return;
        }

        let partition = ctx.membership.partition_for_failure(&failed, ctx.persistence);
        if !ctx.membership.remove_node(&failed) {
            return;
        }

        tracing::info!("Declared {:?} failed", failed.short());
        self.broadcast_failure(FailureKind::Unannounced, &failed, partition, ctx);
    }

    fn broadcast_failure(
        &mut self,
        kind: FailureKind,
        failed: &NodeHash,
        mut partition: Partition,
        ctx: &mut StageContext<'_>,
    ) {
        for member in ctx.membership.node_hashes() {
            if member == *ctx.local || member == *failed {
                continue;
            }
            let notice = FailureNotice {
                failed: failed.clone(),
                sender: ctx.local.clone(),
                partition: partition.remove(&member).unwrap_or_default(),
            };
            self.notify(member, PeerMessage::failure(kind, notice), ctx);
        }
    }

    /// Applies a failure notice received directly or through gossip.
    ///
    /// Attached keys are stored. The first time a node learns of a failure it
    /// repairs what it can (unannounced only) and gossips at probability 1; later
    /// copies are forwarded at `probability` times the decay factor.
    pub fn handle_failure_notice(
        &mut self,
        kind: FailureKind,
        notice: FailureNotice,
        probability: f64,
        ctx: &mut StageContext<'_>,
    ) {
        let FailureNotice {
            failed,
            sender,
            partition,
        } = notice;

        if failed == *ctx.local {
            tracing::warn!(
                "{:?} reports this node as failed, ignoring",
                sender.short()
            );
            return;
        }

        if !partition.is_empty() {
            tracing::debug!(
                "Absorbing {} keys from {:?}",
                partition.len(),
                sender.short()
            );
        }
        for (key, value) in partition {
            ctx.persistence.put(key, value);
        }

        let removed = match kind {
            FailureKind::Unannounced => self.remove_and_repair(&failed, ctx),
            FailureKind::Announced => ctx.membership.remove_node(&failed),
        };
        let forward = if removed {
            1.0
        } else {
            probability * ctx.membership.gossip_decay()
        };

        if removed {
            tracing::info!(
                "Learned of {:?} failure of {:?} from {:?}",
                kind,
                failed.short(),
                sender.short()
            );
        }

        for target in ctx.membership.gossip_targets(ctx.config.gossip_fanout) {
            if target == sender || !ctx.membership.coin_flip(forward) {
                continue;
            }
            let message = PeerMessage::Gossip {
                probability: forward,
                kind,
                notice: FailureNotice {
                    failed: failed.clone(),
                    sender: ctx.local.clone(),
                    partition: Default::default(),
                },
            };
            self.notify(target, message, ctx);
        }
    }

    /// Drops `failed` from the ring and sends the keys this node replicated for it
    /// to the nodes that take over. Returns `false` if it had already been removed.
    fn remove_and_repair(&mut self, failed: &NodeHash, ctx: &mut StageContext<'_>) -> bool {
        let repair = ctx.membership.partition_for_failure(failed, ctx.persistence);
        if !ctx.membership.remove_node(failed) {
            return false;
        }

        for (owner, keys) in repair {
            if owner == *ctx.local || keys.is_empty() {
                continue;
            }
            tracing::debug!(
                "Repairing {} keys of {:?} onto {:?}",
                keys.len(),
                failed.short(),
                owner.short()
            );
            let notice = FailureNotice {
                failed: failed.clone(),
                sender: ctx.local.clone(),
                partition: keys,
            };
            self.notify(owner, PeerMessage::UnannouncedFailure(notice), ctx);
        }
        true
    }

    /// Closes every channel this stage holds and drops all coordinators.
    pub fn immediate_shutdown(&mut self, transport: &mut dyn Transport) {
        for coordinator in self.coordinators.drain(..) {
            for channel in coordinator.open_channels() {
                transport.close(channel);
            }
        }
        for channel in self.inbound.drain() {
            transport.close(channel);
        }
        self.ready.clear();
    }
}
