use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::error::ClusterError;
use crate::protocol::codec;
use crate::protocol::message::{ClientReply, Submission};
use crate::protocol::types::ErrorCode;
use crate::storage::types::Timestamp;
use crate::transport::{ChannelId, Transport};

/// Tracks whether the internal coordinator for one client request has answered.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalRequestCoordinator {
    pub tag: Uuid,
    pub reply: Option<ClientReply>,
}

impl ExternalRequestCoordinator {
    fn pending() -> Self {
        Self {
            tag: Uuid::new_v4(),
            reply: None,
        }
    }

    fn answered(reply: ClientReply) -> Self {
        Self {
            tag: Uuid::new_v4(),
            reply: Some(reply),
        }
    }
}

/// One client connection and its queue of requests in submission order.
#[derive(Debug)]
pub struct ExternalChannel {
    pub channel: ChannelId,
    queue: VecDeque<ExternalRequestCoordinator>,
    last_activity: Instant,
}

impl ExternalChannel {
    fn new(channel: ChannelId, now: Instant) -> Self {
        Self {
            channel,
            queue: VecDeque::new(),
            last_activity: now,
        }
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Sends every reply at the head of the queue that is ready. Stops at the first
    /// request still waiting on its coordinator.
    fn flush(&mut self, transport: &mut dyn Transport, now: Instant) -> Result<(), ClusterError> {
        while self
            .queue
            .front()
            .is_some_and(|coordinator| coordinator.reply.is_some())
        {
            let Some(reply) = self.queue.pop_front().and_then(|coordinator| coordinator.reply)
            else {
                break;
            };
            transport.send(self.channel, codec::encode(&reply)?)?;
            self.last_activity = now;
        }
        Ok(())
    }

    fn is_idle(&self, now: Instant, idle_timeout: Duration) -> bool {
        self.queue.is_empty() && now.duration_since(self.last_activity) >= idle_timeout
    }
}

/// Client-facing connections.
#[derive(Debug)]
pub struct ExternalRequestStage {
    channels: HashMap<ChannelId, ExternalChannel>,
    idle_timeout: Duration,
}

impl ExternalRequestStage {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            channels: HashMap::new(),
            idle_timeout,
        }
    }

    pub fn accept(&mut self, channel: ChannelId, now: Instant) {
        tracing::debug!("Client connected on {}", channel);
        self.channels.insert(channel, ExternalChannel::new(channel, now));
    }

    pub fn owns(&self, channel: ChannelId) -> bool {
        self.channels.contains_key(&channel)
    }

    pub fn channel(&self, channel: ChannelId) -> Option<&ExternalChannel> {
        self.channels.get(&channel)
    }

    pub fn connections(&self) -> usize {
        self.channels.len()
    }

    /// Queues a client frame. Returns the submission and its tag when the frame is a
    /// valid request; malformed frames are queued with their error reply already set
    /// so they are answered in order.
    pub fn handle_frame(
        &mut self,
        channel: ChannelId,
        payload: &str,
        now: Instant,
    ) -> Result<Option<(Submission, Uuid)>, ClusterError> {
        let connection = self
            .channels
            .get_mut(&channel)
            .ok_or(ClusterError::UnknownChannel(channel))?;
        connection.last_activity = now;

        let submission = codec::decode_client_request(payload)
            .map_err(|e| {
                tracing::warn!("Malformed client frame on {}: {}", channel, e);
                ErrorCode::UnrecognizedCommand
            })
            .and_then(|request| request.into_submission(Timestamp::now()));

        match submission {
            Ok(submission) => {
                let coordinator = ExternalRequestCoordinator::pending();
                let tag = coordinator.tag;
                connection.queue.push_back(coordinator);
                Ok(Some((submission, tag)))
            }
            Err(code) => {
                connection
                    .queue
                    .push_back(ExternalRequestCoordinator::answered(ClientReply::status(code)));
                Ok(None)
            }
        }
    }

    /// Stores the reply for a queued request. Replies for connections that have
    /// since closed are dropped.
    pub fn complete(&mut self, channel: ChannelId, tag: Uuid, reply: ClientReply) {
        let Some(connection) = self.channels.get_mut(&channel) else {
            tracing::debug!("Dropping reply for closed channel {}", channel);
            return;
        };

        match connection
            .queue
            .iter_mut()
            .find(|coordinator| coordinator.tag == tag)
        {
            Some(coordinator) => coordinator.reply = Some(reply),
            None => tracing::warn!("No request {} queued on {}", tag, channel),
        }
    }

    /// Sends ready replies in order and closes idle connections.
    pub fn process(&mut self, transport: &mut dyn Transport, now: Instant) {
        let mut closing = Vec::new();

        for (channel, connection) in &mut self.channels {
            if let Err(e) = connection.flush(transport, now) {
                tracing::warn!("Failed to reply on {}: {}", channel, e);
                closing.push(*channel);
            } else if connection.is_idle(now, self.idle_timeout) {
                tracing::debug!("Closing idle client channel {}", channel);
                closing.push(*channel);
            }
        }

        for channel in closing {
            self.channels.remove(&channel);
            transport.close(channel);
        }
    }

    /// The client went away. Coordinators still running for it finish on their own.
    pub fn handle_closed(&mut self, channel: ChannelId) {
        if let Some(connection) = self.channels.remove(&channel)
            && !connection.queue.is_empty()
        {
            tracing::debug!(
                "Client on {} left with {} requests in flight",
                channel,
                connection.queue.len()
            );
        }
    }

    pub fn immediate_shutdown(&mut self, transport: &mut dyn Transport) {
        for (channel, _) in self.channels.drain() {
            transport.close(channel);
        }
    }
}
