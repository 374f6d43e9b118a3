use std::time::Instant;

use super::types::{NodeIdentity, NodeStatus};
use crate::config::{ClusterConfig, NodeAddress};
use crate::coordinator::context::StageContext;
use crate::coordinator::external::ExternalRequestStage;
use crate::coordinator::stage::InternalRequestStage;
use crate::error::ClusterError;
use crate::membership::service::MembershipStage;
use crate::membership::types::MembershipAction;
use crate::storage::engine::{MemoryEngine, PersistenceEngine};
use crate::storage::stage::PersistenceStage;
use crate::transport::{Listener, Transport, TransportEvent};

pub struct Server<T: Transport> {
    identity: NodeIdentity,
    config: ClusterConfig,
    membership: MembershipStage,
    persistence: PersistenceStage,
    internal: InternalRequestStage,
    external: ExternalRequestStage,
    transport: T,
}

impl<T: Transport> Server<T> {
    /// Builds a node backed by the in-memory engine.
    ///
    /// `address` must appear in `nodes`; the ring is built from the whole list.
    pub fn new(
        address: NodeAddress,
        nodes: &[NodeAddress],
        config: ClusterConfig,
        transport: T,
    ) -> Result<Self, ClusterError> {
        Self::with_engine(address, nodes, config, transport, Box::new(MemoryEngine::new()))
    }

    pub fn with_engine(
        address: NodeAddress,
        nodes: &[NodeAddress],
        config: ClusterConfig,
        transport: T,
        engine: Box<dyn PersistenceEngine>,
    ) -> Result<Self, ClusterError> {
        if !nodes.contains(&address) {
            return Err(ClusterError::Config(format!(
                "{} is not in the node list",
                address
            )));
        }
        if config.num_replicas == 0 {
            return Err(ClusterError::Config("num_replicas must be at least 1".to_string()));
        }

        let identity = NodeIdentity::new(address);
        let membership =
            MembershipStage::new(identity.node_hash.clone(), nodes, &config, Instant::now());

        tracing::info!(
            "Node {:?} at {} joining a ring of {} nodes (N={})",
            identity.node_hash.short(),
            identity.address,
            nodes.len(),
            config.num_replicas
        );

        Ok(Self {
            external: ExternalRequestStage::new(config.idle_timeout()),
            internal: InternalRequestStage::new(),
            persistence: PersistenceStage::new(engine),
            membership,
            identity,
            config,
            transport,
        })
    }

    pub fn membership(&self) -> &MembershipStage {
        &self.membership
    }

    pub fn persistence(&self) -> &PersistenceStage {
        &self.persistence
    }

    /// New client connections are refused once the node has left the ring.
    pub fn is_accepting_external(&self) -> bool {
        self.membership.is_member(&self.identity.node_hash)
    }

    pub fn process(&mut self) {
        self.process_at(Instant::now());
    }

    /// Runs one tick with an explicit clock.
    pub fn process_at(&mut self, now: Instant) {
        let Server {
            identity,
            config,
            membership,
            persistence,
            internal,
            external,
            transport,
        } = self;

        let mut ctx = StageContext {
            local: &identity.node_hash,
            config,
            membership,
            persistence,
            transport,
            now,
        };

        for event in ctx.transport.poll() {
            if let Err(e) = route(event, internal, external, &mut ctx) {
                tracing::error!("Error handling transport event: {}", e);
            }
        }

        for completion in internal.process(&mut ctx) {
            external.complete(completion.channel, completion.tag, completion.reply);
        }

        external.process(&mut *ctx.transport, now);

        for action in ctx.membership.process(now) {
            match action {
                MembershipAction::Probe(node) => internal.probe(node, &mut ctx),
                MembershipAction::DeclareFailure(node) => internal.declare_failure(node, &mut ctx),
            }
        }
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            node_hash: self.identity.node_hash.clone(),
            external_endpoint: self.identity.address.external_endpoint(),
            internal_endpoint: self.identity.address.internal_endpoint(),
            ring: self.membership.node_hashes(),
            stored_keys: self.persistence.len(),
            failed_contacts: self.membership.failed_contacts(),
            active_coordinators: self.internal.active_coordinators(),
            client_connections: self.external.connections(),
            accepting_external: self.is_accepting_external(),
        }
    }

    /// Closes every open channel and abandons all in-flight work.
    pub fn immediate_shutdown(&mut self) {
        tracing::info!("Immediate shutdown of {:?}", self.identity.node_hash.short());
        self.internal.immediate_shutdown(&mut self.transport);
        self.external.immediate_shutdown(&mut self.transport);
    }
}

fn route(
    event: TransportEvent,
    internal: &mut InternalRequestStage,
    external: &mut ExternalRequestStage,
    ctx: &mut StageContext<'_>,
) -> Result<(), ClusterError> {
    match event {
        TransportEvent::Accepted {
            channel,
            listener: Listener::External,
        } => {
            if ctx.membership.is_member(ctx.local) {
                external.accept(channel, ctx.now);
            } else {
                tracing::debug!("Refusing client on {}, node has left the ring", channel);
                ctx.transport.close(channel);
            }
        }
        TransportEvent::Accepted {
            channel,
            listener: Listener::Internal,
        } => internal.accept(channel),
        TransportEvent::Received { channel, payload } => {
            if external.owns(channel) {
                let submitted = external.handle_frame(channel, &payload, ctx.now)?;
                if let Some((submission, tag)) = submitted {
                    internal.handle_external_request(submission, channel, tag, ctx);
                }
            } else {
                internal.handle_frame(channel, &payload, ctx)?;
            }
        }
        TransportEvent::Closed { channel } => {
            if external.owns(channel) {
                external.handle_closed(channel);
            } else {
                internal.handle_channel_lost(channel, ctx);
            }
        }
        TransportEvent::Failed { channel, reason } => {
            tracing::debug!("Channel {} failed: {}", channel, reason);
            if external.owns(channel) {
                external.handle_closed(channel);
            } else {
                internal.handle_channel_lost(channel, ctx);
            }
        }
    }
    Ok(())
}
