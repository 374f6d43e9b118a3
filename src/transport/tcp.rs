//! tokio TCP transport.
//!
//! ## Core Concepts
//! - **Accept loops**: one task per listening port; each accepted socket gets a
//!   channel id and its own connection task.
//! - **Connection tasks**: a reader that splits the byte stream into `\r\n` frames,
//!   and a writer draining an unbounded queue. Dropping a channel's handle stops the
//!   reader; the writer flushes what is pending and then shuts the socket down.
//! - **Event funnel**: every task reports into a single mpsc queue that `poll`
//!   drains without blocking.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;

use super::{ChannelId, Listener, Transport, TransportEvent};
use crate::error::ClusterError;
use crate::protocol::codec::TERMINATOR;

enum Inbound {
    Opened {
        channel: ChannelId,
        listener: Listener,
        handle: ChannelHandle,
    },
    Event(TransportEvent),
}

/// Local side of an open channel. Dropping it cancels the connection's reader.
struct ChannelHandle {
    writer: mpsc::UnboundedSender<String>,
    _cancel: oneshot::Sender<()>,
}

struct ConnectionTask {
    channel: ChannelId,
    writer_rx: mpsc::UnboundedReceiver<String>,
    cancel_rx: oneshot::Receiver<()>,
    events: mpsc::UnboundedSender<Inbound>,
}

fn channel_pair(
    channel: ChannelId,
    events: mpsc::UnboundedSender<Inbound>,
) -> (ChannelHandle, ConnectionTask) {
    let (writer, writer_rx) = mpsc::unbounded_channel();
    let (cancel, cancel_rx) = oneshot::channel();
    (
        ChannelHandle {
            writer,
            _cancel: cancel,
        },
        ConnectionTask {
            channel,
            writer_rx,
            cancel_rx,
            events,
        },
    )
}

pub struct TcpTransport {
    next_channel: Arc<AtomicU64>,
    events_tx: mpsc::UnboundedSender<Inbound>,
    events_rx: mpsc::UnboundedReceiver<Inbound>,
    channels: HashMap<ChannelId, ChannelHandle>,
    accept_loops: Vec<AbortHandle>,
    external_addr: SocketAddr,
    internal_addr: SocketAddr,
}

impl TcpTransport {
    /// Binds both listeners and starts accepting. Must run inside a tokio runtime.
    pub async fn bind(external: &str, internal: &str) -> anyhow::Result<Self> {
        let external_listener = TcpListener::bind(external)
            .await
            .with_context(|| format!("binding external listener on {}", external))?;
        let internal_listener = TcpListener::bind(internal)
            .await
            .with_context(|| format!("binding internal listener on {}", internal))?;

        let external_addr = external_listener.local_addr()?;
        let internal_addr = internal_listener.local_addr()?;

        let next_channel = Arc::new(AtomicU64::new(0));
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let accept_loops = vec![
            tokio::spawn(accept_loop(
                external_listener,
                Listener::External,
                next_channel.clone(),
                events_tx.clone(),
            ))
            .abort_handle(),
            tokio::spawn(accept_loop(
                internal_listener,
                Listener::Internal,
                next_channel.clone(),
                events_tx.clone(),
            ))
            .abort_handle(),
        ];

        tracing::info!(
            "Listening on {} (external) and {} (internal)",
            external_addr,
            internal_addr
        );

        Ok(Self {
            next_channel,
            events_tx,
            events_rx,
            channels: HashMap::new(),
            accept_loops,
            external_addr,
            internal_addr,
        })
    }

    /// Actual bound addresses, useful when binding to port 0.
    pub fn local_addrs(&self) -> (SocketAddr, SocketAddr) {
        (self.external_addr, self.internal_addr)
    }

    fn allocate(&self) -> ChannelId {
        ChannelId(self.next_channel.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        for handle in &self.accept_loops {
            handle.abort();
        }
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self, endpoint: &str) -> Result<ChannelId, ClusterError> {
        let channel = self.allocate();
        let (handle, mut task) = channel_pair(channel, self.events_tx.clone());
        let endpoint = endpoint.to_string();

        tokio::spawn(async move {
            let connected = tokio::select! {
                connected = TcpStream::connect(&endpoint) => connected,
                _ = &mut task.cancel_rx => return,
            };
            match connected {
                Ok(stream) => run_connection(stream, task).await,
                Err(e) => {
                    tracing::debug!("Connect to {} failed: {:?}", endpoint, e);
                    let _ = task.events.send(Inbound::Event(TransportEvent::Failed {
                        channel,
                        reason: e.to_string(),
                    }));
                }
            }
        });

        self.channels.insert(channel, handle);
        Ok(channel)
    }

    fn send(&mut self, channel: ChannelId, payload: String) -> Result<(), ClusterError> {
        let handle = self
            .channels
            .get(&channel)
            .ok_or(ClusterError::UnknownChannel(channel))?;
        handle
            .writer
            .send(payload)
            .map_err(|_| ClusterError::Transport(format!("channel {} writer has stopped", channel)))
    }

    fn close(&mut self, channel: ChannelId) {
        self.channels.remove(&channel);
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        let mut events = Vec::new();

        while let Ok(inbound) = self.events_rx.try_recv() {
            match inbound {
                Inbound::Opened {
                    channel,
                    listener,
                    handle,
                } => {
                    self.channels.insert(channel, handle);
                    events.push(TransportEvent::Accepted { channel, listener });
                }
                Inbound::Event(event) => {
                    let channel = event.channel();
                    if !self.channels.contains_key(&channel) {
                        // Closed locally; anything still in flight is stale.
                        continue;
                    }
                    if matches!(
                        event,
                        TransportEvent::Closed { .. } | TransportEvent::Failed { .. }
                    ) {
                        self.channels.remove(&channel);
                    }
                    events.push(event);
                }
            }
        }

        events
    }
}

async fn accept_loop(
    listener: TcpListener,
    kind: Listener,
    next_channel: Arc<AtomicU64>,
    events: mpsc::UnboundedSender<Inbound>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let channel = ChannelId(next_channel.fetch_add(1, Ordering::Relaxed) + 1);
                tracing::debug!("Accepted {:?} connection {} from {}", kind, channel, peer);

                let (handle, task) = channel_pair(channel, events.clone());

                // Queue the handle first so no frame can overtake it.
                let opened = Inbound::Opened {
                    channel,
                    listener: kind,
                    handle,
                };
                if events.send(opened).is_err() {
                    return;
                }
                tokio::spawn(run_connection(stream, task));
            }
            Err(e) => {
                tracing::warn!("Failed to accept {:?} connection: {:?}", kind, e);
            }
        }
    }
}

async fn run_connection(stream: TcpStream, task: ConnectionTask) {
    let ConnectionTask {
        channel,
        mut writer_rx,
        mut cancel_rx,
        events,
    } = task;
    let (read_half, mut write_half) = stream.into_split();

    tokio::spawn(async move {
        while let Some(payload) = writer_rx.recv().await {
            let frame = format!("{}{}", payload, TERMINATOR);
            if let Err(e) = write_half.write_all(frame.as_bytes()).await {
                tracing::debug!("Write on {} failed: {:?}", channel, e);
                return;
            }
        }
        let _ = write_half.shutdown().await;
    });

    let mut lines = BufReader::new(read_half).lines();
    let closing = loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = &mut cancel_rx => return,
        };
        match line {
            Ok(Some(line)) => {
                if line.is_empty() {
                    continue;
                }
                let event = TransportEvent::Received {
                    channel,
                    payload: line,
                };
                if events.send(Inbound::Event(event)).is_err() {
                    return;
                }
            }
            Ok(None) => break TransportEvent::Closed { channel },
            Err(e) => {
                break TransportEvent::Failed {
                    channel,
                    reason: e.to_string(),
                };
            }
        }
    };

    let _ = events.send(Inbound::Event(closing));
}
