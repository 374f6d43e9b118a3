//! Async client for a node's external port.

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::protocol::codec::{self, TERMINATOR};
use crate::protocol::message::{ClientReply, ClientRequest};

/// One client connection. Requests are answered in the order they were sent.
pub struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Client {
    pub async fn connect(endpoint: &str) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(endpoint)
            .await
            .with_context(|| format!("connecting to {}", endpoint))?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            lines: BufReader::new(reader).lines(),
            writer,
        })
    }

    pub async fn request(&mut self, request: &ClientRequest) -> anyhow::Result<ClientReply> {
        let frame = format!("{}{}", codec::encode(request)?, TERMINATOR);
        self.writer.write_all(frame.as_bytes()).await?;

        let line = self
            .lines
            .next_line()
            .await?
            .context("node closed the connection")?;
        Ok(codec::decode_client_reply(&line)?)
    }

    pub async fn put(&mut self, key: &str, value: &str) -> anyhow::Result<ClientReply> {
        self.request(&ClientRequest::put(key, value)).await
    }

    pub async fn get(&mut self, key: &str) -> anyhow::Result<ClientReply> {
        self.request(&ClientRequest::get(key)).await
    }

    pub async fn delete(&mut self, key: &str) -> anyhow::Result<ClientReply> {
        self.request(&ClientRequest::delete(key)).await
    }

    pub async fn shutdown(&mut self) -> anyhow::Result<ClientReply> {
        self.request(&ClientRequest::shutdown()).await
    }
}
