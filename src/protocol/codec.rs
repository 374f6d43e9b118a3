//! Line framing for JSON messages.

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::message::{ClientReply, ClientRequest, PeerMessage};
use crate::error::ClusterError;

/// Terminator appended to every frame on the wire.
pub const TERMINATOR: &str = "\r\n";

/// Serializes a message into a frame body, without the terminator.
pub fn encode<T: Serialize>(message: &T) -> Result<String, ClusterError> {
    Ok(serde_json::to_string(message)?)
}

pub fn decode<T: DeserializeOwned>(frame: &str) -> Result<T, ClusterError> {
    Ok(serde_json::from_str(frame.trim_end_matches(['\r', '\n']))?)
}

pub fn decode_client_request(frame: &str) -> Result<ClientRequest, ClusterError> {
    decode(frame)
}

pub fn decode_client_reply(frame: &str) -> Result<ClientReply, ClusterError> {
    decode(frame)
}

pub fn decode_peer_message(frame: &str) -> Result<PeerMessage, ClusterError> {
    decode(frame)
}
