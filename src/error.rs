//! Infrastructure error types.
//!
//! Outcomes a client or peer is expected to see (missing key, storage fault,
//! unreachable replica) travel as [`crate::protocol::types::ErrorCode`] values.
//! The variants here cover everything that goes wrong *around* a request: frames
//! that do not parse, channels that vanished, nodes missing from the address table.

use thiserror::Error;

use crate::ring::types::NodeHash;
use crate::transport::ChannelId;

#[derive(Debug, Error)]
pub enum ClusterError {
    /// A frame could not be parsed into the expected message shape.
    #[error("malformed frame: {0}")]
    Decode(#[from] serde_json::Error),

    /// A one-byte error code token outside the known set.
    #[error("unknown error code {0:?}")]
    InvalidErrorCode(String),

    /// A frame failed validation after parsing.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Connect or send failed at the transport layer.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("unknown node {0:?}")]
    UnknownNode(NodeHash),

    #[error("unknown channel {0}")]
    UnknownChannel(ChannelId),

    #[error("invalid configuration: {0}")]
    Config(String),
}
