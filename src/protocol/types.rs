use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ClusterError;

/// Single-byte status token carried by every reply.
///
/// On the wire it is a one-character JSON string, e.g. `"\u0000"` for success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ErrorCode {
    Success,
    KeyNotFound,
    OutOfMemory,
    Overload,
    StorageFailure,
    UnrecognizedCommand,
    Unclassified,
    /// Injected by a coordinator when a replica could not be reached.
    PeerUnreachable,
}

impl ErrorCode {
    pub fn as_byte(self) -> u8 {
        match self {
            ErrorCode::Success => 0x00,
            ErrorCode::KeyNotFound => 0x01,
            ErrorCode::OutOfMemory => 0x02,
            ErrorCode::Overload => 0x03,
            ErrorCode::StorageFailure => 0x04,
            ErrorCode::UnrecognizedCommand => 0x05,
            ErrorCode::Unclassified => 0x06,
            ErrorCode::PeerUnreachable => 0x10,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(ErrorCode::Success),
            0x01 => Some(ErrorCode::KeyNotFound),
            0x02 => Some(ErrorCode::OutOfMemory),
            0x03 => Some(ErrorCode::Overload),
            0x04 => Some(ErrorCode::StorageFailure),
            0x05 => Some(ErrorCode::UnrecognizedCommand),
            0x06 => Some(ErrorCode::Unclassified),
            0x10 => Some(ErrorCode::PeerUnreachable),
            _ => None,
        }
    }

    pub fn is_success(self) -> bool {
        self == ErrorCode::Success
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            ErrorCode::Success => "operation successful",
            ErrorCode::KeyNotFound => "inexistent key",
            ErrorCode::OutOfMemory => "out of memory",
            ErrorCode::Overload => "system overload",
            ErrorCode::StorageFailure => "internal storage failure",
            ErrorCode::UnrecognizedCommand => "unrecognized command",
            ErrorCode::Unclassified => "unrecognized error",
            ErrorCode::PeerUnreachable => "peer unreachable",
        };
        write!(f, "error code {:#04x}: {}", self.as_byte(), message)
    }
}

impl From<ErrorCode> for String {
    fn from(code: ErrorCode) -> Self {
        char::from(code.as_byte()).to_string()
    }
}

impl TryFrom<String> for ErrorCode {
    type Error = ClusterError;

    fn try_from(token: String) -> Result<Self, Self::Error> {
        let mut chars = token.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if (c as u32) <= 0xff => {
                ErrorCode::from_byte(c as u8).ok_or(ClusterError::InvalidErrorCode(token))
            }
            _ => Err(ClusterError::InvalidErrorCode(token)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Put,
    Get,
    Delete,
    Shutdown,
}
