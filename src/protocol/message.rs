use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::types::{Command, ErrorCode};
use crate::ring::types::{KeyHash, NodeHash};
use crate::storage::types::{StoredValue, Timestamp};

// --- Client messages ---

/// A request as sent by a client on the external port.
///
/// `key` holds the raw client key; the node hashes it before routing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientRequest {
    pub command: Command,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// What the external stage hands to the internal stage once a client frame is
/// stamped and its key hashed.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    Store(Operation),
    Shutdown,
}

impl ClientRequest {
    pub fn put(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            command: Command::Put,
            key: Some(key.into()),
            value: Some(value.into()),
        }
    }

    pub fn get(key: impl Into<String>) -> Self {
        Self {
            command: Command::Get,
            key: Some(key.into()),
            value: None,
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            command: Command::Delete,
            key: Some(key.into()),
            value: None,
        }
    }

    pub fn shutdown() -> Self {
        Self {
            command: Command::Shutdown,
            key: None,
            value: None,
        }
    }

    /// Validates the request and turns it into a routable submission.
    ///
    /// Missing fields are reported as `UnrecognizedCommand`.
    pub fn into_submission(self, timestamp: Timestamp) -> Result<Submission, ErrorCode> {
        let operation = match self.command {
            Command::Shutdown => return Ok(Submission::Shutdown),
            Command::Put => Operation::Put {
                key: hashed_key(self.key)?,
                value: self.value.ok_or(ErrorCode::UnrecognizedCommand)?,
                timestamp,
            },
            Command::Get => Operation::Get {
                key: hashed_key(self.key)?,
            },
            Command::Delete => Operation::Delete {
                key: hashed_key(self.key)?,
            },
        };

        Ok(Submission::Store(operation))
    }
}

fn hashed_key(key: Option<String>) -> Result<KeyHash, ErrorCode> {
    match key {
        Some(key) if !key.is_empty() => Ok(KeyHash::for_key(&key)),
        _ => Err(ErrorCode::UnrecognizedCommand),
    }
}

/// Reply sent back to a client. `value` is only present for `get`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientReply {
    pub error_code: ErrorCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl ClientReply {
    pub fn status(error_code: ErrorCode) -> Self {
        Self {
            error_code,
            value: None,
        }
    }
}

// --- Peer messages ---

/// A storage operation on an already-hashed key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum Operation {
    Put {
        key: KeyHash,
        value: String,
        timestamp: Timestamp,
    },
    Get {
        key: KeyHash,
    },
    Delete {
        key: KeyHash,
    },
}

impl Operation {
    pub fn key(&self) -> &KeyHash {
        match self {
            Operation::Put { key, .. } | Operation::Get { key } | Operation::Delete { key } => key,
        }
    }

    pub fn command(&self) -> Command {
        match self {
            Operation::Put { .. } => Command::Put,
            Operation::Get { .. } => Command::Get,
            Operation::Delete { .. } => Command::Delete,
        }
    }
}

/// A replica's answer to any peer message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reply {
    pub node_hash: NodeHash,
    pub error_code: ErrorCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
    /// Ring members, only set on membership probe replies.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<NodeHash>,
}

impl Reply {
    pub fn status(node_hash: NodeHash, error_code: ErrorCode) -> Self {
        Self {
            node_hash,
            error_code,
            value: None,
            timestamp: None,
            members: Vec::new(),
        }
    }
}

/// Keys handed to a node that becomes responsible for them after a departure.
pub type KeyTransfer = BTreeMap<KeyHash, StoredValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The node left on its own after a `shutdown` command.
    Announced,
    /// The node stopped answering and was declared failed by a peer.
    Unannounced,
}

/// Notice that `failed` has left the ring, plus any keys the recipient now owns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureNotice {
    pub failed: NodeHash,
    pub sender: NodeHash,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub partition: KeyTransfer,
}

/// Everything exchanged on the internal port.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerMessage {
    InternalRequest {
        request: Operation,
    },
    Reply(Reply),
    AnnouncedFailure(FailureNotice),
    UnannouncedFailure(FailureNotice),
    /// A failure notice being spread epidemically. Each hop forwards it with
    /// `probability`.
    Gossip {
        probability: f64,
        kind: FailureKind,
        notice: FailureNotice,
    },
    /// Ring-state probe; answered with the recipient's ring members.
    Membership {
        sender: NodeHash,
        members: Vec<NodeHash>,
    },
}

impl PeerMessage {
    pub fn failure(kind: FailureKind, notice: FailureNotice) -> Self {
        match kind {
            FailureKind::Announced => PeerMessage::AnnouncedFailure(notice),
            FailureKind::Unannounced => PeerMessage::UnannouncedFailure(notice),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            PeerMessage::InternalRequest { .. } => "internal_request",
            PeerMessage::Reply(_) => "reply",
            PeerMessage::AnnouncedFailure(_) => "announced_failure",
            PeerMessage::UnannouncedFailure(_) => "unannounced_failure",
            PeerMessage::Gossip { .. } => "gossip",
            PeerMessage::Membership { .. } => "membership",
        }
    }
}
