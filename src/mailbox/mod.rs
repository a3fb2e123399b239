//! Message fetcher: reads the most recent mailbox entries without changing
//! their read state.

pub mod imap;

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::model::message::RawMessage;
use crate::parser::mime::decode_message;

/// A remote mailbox that can be opened for read-only access.
pub trait Mailbox {
    /// Connect, authenticate and select the folder.
    fn open(&self) -> Result<Box<dyn MailboxSession>>;
}

/// An open read-only session on one folder.
pub trait MailboxSession {
    /// All message ids in the folder, read and unread.
    fn search_all(&mut self) -> Result<Vec<u32>>;

    /// The full raw message for `id`, without setting `\Seen`.
    fn fetch_raw(&mut self, id: u32) -> Result<Vec<u8>>;

    /// Close the session.
    fn close(&mut self) -> Result<()>;
}

/// Fetch at most `limit` messages, most recent first.
///
/// Connect, login and search errors are returned. A message that fails to
/// fetch or decode is skipped. The session is closed before returning, so it
/// is never held across classification or writes.
pub fn fetch_recent(mailbox: &dyn Mailbox, limit: usize) -> Result<Vec<RawMessage>> {
    let mut session = mailbox.open()?;

    let ids = match session.search_all() {
        Ok(ids) => ids,
        Err(e) => {
            close_quietly(session.as_mut());
            return Err(e);
        }
    };
    let selected = most_recent(ids, limit);
    info!(count = selected.len(), limit, "Fetching messages");

    let mut messages = Vec::with_capacity(selected.len());
    for id in selected {
        let raw = match session.fetch_raw(id) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(id, error = %e, "Skipping message that failed to fetch");
                continue;
            }
        };
        match decode_message(&id.to_string(), &raw) {
            Ok(msg) => messages.push(msg),
            Err(e) => warn!(id, error = %e, "Skipping undecodable message"),
        }
    }

    close_quietly(session.as_mut());
    debug!(fetched = messages.len(), "Mailbox session closed");
    Ok(messages)
}

/// Sort ids numerically, keep the last `limit`, newest first.
pub fn most_recent(mut ids: Vec<u32>, limit: usize) -> Vec<u32> {
    ids.sort_unstable();
    ids.dedup();
    let start = ids.len().saturating_sub(limit);
    ids.split_off(start).into_iter().rev().collect()
}

fn close_quietly(session: &mut dyn MailboxSession) {
    if let Err(e) = session.close() {
        debug!(error = %e, "Mailbox close failed");
    }
}
