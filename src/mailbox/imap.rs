//! IMAP over TLS.

use std::net::TcpStream;

use native_tls::{TlsConnector, TlsStream};
use tracing::debug;

use super::{Mailbox, MailboxSession};
use crate::config::MailboxConfig;
use crate::error::{HarvestError, Result};

type Session = imap::Session<TlsStream<TcpStream>>;

/// A mailbox reached with IMAP over implicit TLS.
pub struct ImapMailbox {
    config: MailboxConfig,
}

impl ImapMailbox {
    pub fn new(config: MailboxConfig) -> Self {
        Self { config }
    }
}

impl Mailbox for ImapMailbox {
    fn open(&self) -> Result<Box<dyn MailboxSession>> {
        let cfg = &self.config;
        let tls = TlsConnector::builder()
            .build()
            .map_err(|e| HarvestError::Mailbox(format!("TLS setup failed: {e}")))?;

        let client = imap::connect((cfg.host.as_str(), cfg.port), cfg.host.as_str(), &tls)
            .map_err(|e| {
                HarvestError::Mailbox(format!("cannot connect to {}:{}: {e}", cfg.host, cfg.port))
            })?;

        let mut session = client
            .login(cfg.username.as_str(), cfg.password.as_str())
            .map_err(|e| HarvestError::Mailbox(format!("login failed: {}", e.0)))?;

        // EXAMINE opens the folder read-only, so no flags change
        session
            .examine(&cfg.folder)
            .map_err(|e| HarvestError::Mailbox(format!("cannot open '{}': {e}", cfg.folder)))?;

        debug!(host = %cfg.host, folder = %cfg.folder, "IMAP session opened");
        Ok(Box::new(ImapSession {
            session: Some(session),
        }))
    }
}

struct ImapSession {
    session: Option<Session>,
}

impl ImapSession {
    fn session(&mut self) -> Result<&mut Session> {
        self.session
            .as_mut()
            .ok_or_else(|| HarvestError::Mailbox("session already closed".to_string()))
    }
}

impl MailboxSession for ImapSession {
    fn search_all(&mut self) -> Result<Vec<u32>> {
        let ids = self
            .session()?
            .search("ALL")
            .map_err(|e| HarvestError::Mailbox(format!("search failed: {e}")))?;
        Ok(ids.into_iter().collect())
    }

    fn fetch_raw(&mut self, id: u32) -> Result<Vec<u8>> {
        let fetches = self
            .session()?
            .fetch(id.to_string(), "BODY.PEEK[]")
            .map_err(|e| HarvestError::Mailbox(format!("fetch {id} failed: {e}")))?;
        fetches
            .iter()
            .find_map(|f| f.body())
            .map(<[u8]>::to_vec)
            .ok_or_else(|| HarvestError::Mailbox(format!("message {id} has no body")))
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut session) = self.session.take() {
            session
                .logout()
                .map_err(|e| HarvestError::Mailbox(format!("logout failed: {e}")))?;
        }
        Ok(())
    }
}
