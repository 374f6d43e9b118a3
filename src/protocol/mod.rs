//! Wire Protocol Module
//!
//! Every message is a single JSON object terminated by `\r\n`.
//!
//! ## Message Families
//! - **Client**: `ClientRequest` / `ClientReply`, exchanged on a node's external port.
//! - **Peer**: `PeerMessage`, a tagged union keyed by `type`, exchanged on the internal port.
//!
//! Frames are validated here, at the transport boundary, so the coordinator only ever
//! sees well-formed operations.

pub mod codec;
pub mod message;
pub mod types;
