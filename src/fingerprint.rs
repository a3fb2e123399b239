//! Content-addressed message fingerprint used as the deduplication key.
//!
//! Transport message ids change when a mailbox is re-indexed, so a message is
//! identified by what it says instead: sender address, subject, the first 500
//! characters of the body, and the send timestamp, hashed with SHA-256.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::model::message::RawMessage;

/// Number of body characters (not bytes) included in the hash.
pub const BODY_PREFIX_CHARS: usize = 500;

/// 64-character lowercase hex SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hash `sender_email|subject|body[..500]|sent_at`.
    pub fn compute(sender_email: &str, subject: &str, body: &str, sent_at: &str) -> Self {
        let prefix_end = body
            .char_indices()
            .nth(BODY_PREFIX_CHARS)
            .map_or(body.len(), |(i, _)| i);

        let mut hasher = Sha256::new();
        hasher.update(sender_email.as_bytes());
        hasher.update(b"|");
        hasher.update(subject.as_bytes());
        hasher.update(b"|");
        hasher.update(&body.as_bytes()[..prefix_end]);
        hasher.update(b"|");
        hasher.update(sent_at.as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn of_message(msg: &RawMessage) -> Self {
        Self::compute(msg.sender_email(), &msg.subject, &msg.body, &msg.sent_at)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
