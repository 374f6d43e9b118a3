//! Folding replica replies into the answer a client sees.

use std::collections::BTreeMap;

use crate::protocol::message::{ClientReply, Reply};
use crate::protocol::types::{Command, ErrorCode};
use crate::ring::types::NodeHash;

pub fn reconcile(command: Command, replies: &BTreeMap<NodeHash, Reply>) -> ClientReply {
    match command {
        Command::Get => newest(replies),
        Command::Put | Command::Delete | Command::Shutdown => {
            ClientReply::status(majority(replies))
        }
    }
}

/// Most frequent error code. Ties go to the code seen first walking the replies in
/// `NodeHash` order, i.e. the one reported by the lowest hash.
pub fn majority(replies: &BTreeMap<NodeHash, Reply>) -> ErrorCode {
    let mut counts: Vec<(ErrorCode, usize)> = Vec::new();
    for reply in replies.values() {
        match counts.iter_mut().find(|(code, _)| *code == reply.error_code) {
            Some((_, count)) => *count += 1,
            None => counts.push((reply.error_code, 1)),
        }
    }

    let mut winner: Option<(ErrorCode, usize)> = None;
    for (code, count) in counts {
        if winner.is_none_or(|(_, best)| count > best) {
            winner = Some((code, count));
        }
    }

    winner
        .map(|(code, _)| code)
        .unwrap_or(ErrorCode::Unclassified)
}

/// The successful reply with the greatest timestamp, or the majority code when no
/// replica had the key.
pub fn newest(replies: &BTreeMap<NodeHash, Reply>) -> ClientReply {
    let freshest = replies
        .values()
        .filter(|reply| reply.error_code.is_success())
        .filter_map(|reply| reply.timestamp.as_ref().map(|timestamp| (timestamp, reply)))
        .fold(None, |best: Option<(_, &Reply)>, candidate| match best {
            Some(best) if best.0 >= candidate.0 => Some(best),
            _ => Some(candidate),
        });

    match freshest {
        Some((_, reply)) => ClientReply {
            error_code: ErrorCode::Success,
            value: reply.value.clone(),
        },
        None => ClientReply::status(majority(replies)),
    }
}
