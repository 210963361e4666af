//! In-process terminal sessions
//!
//! Terminals are process-local: their mailboxes vanish when the terminal
//! exits and are never shared. Inbox operations for one terminal are
//! totally ordered through its session lock.

use crate::inbox::{InboxKind, InboxMessage, TerminalInboxes};
use crate::{AishError, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One terminal session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalSession {
    /// Session id
    pub terminal_id: String,
    /// Human-facing name (unique among live terminals)
    pub name: String,
    /// Purpose tags for `@purpose` routing
    pub purposes: Vec<String>,
    /// The three mailboxes
    pub inboxes: TerminalInboxes,
    /// When the session opened
    pub created_at: DateTime<Utc>,
}

/// Delivery result for a single terminal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    /// Receiving terminal name
    pub terminal: String,
    /// Inbox the message landed in
    pub inbox: InboxKind,
    /// Whether the push evicted the oldest entry
    pub evicted: bool,
}

/// Registry of live terminal sessions
#[derive(Debug, Default)]
pub struct TerminalRegistry {
    sessions: DashMap<String, TerminalSession>,
}

impl TerminalRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a terminal session; names must be unique among live terminals
    pub fn open(&self, name: &str, purposes: Vec<String>) -> Result<String> {
        if self.find_id(name).is_some() {
            return Err(AishError::Usage(format!("Terminal name {} is taken", name)));
        }
        let terminal_id = Uuid::new_v4().to_string();
        self.sessions.insert(
            terminal_id.clone(),
            TerminalSession {
                terminal_id: terminal_id.clone(),
                name: name.to_string(),
                purposes,
                inboxes: TerminalInboxes::default(),
                created_at: Utc::now(),
            },
        );
        Ok(terminal_id)
    }

    /// Close a terminal; its mailboxes are dropped with it
    pub fn close(&self, name_or_id: &str) -> Result<()> {
        let id = self
            .find_id(name_or_id)
            .ok_or_else(|| AishError::UnknownTerminal(name_or_id.to_string()))?;
        self.sessions.remove(&id);
        Ok(())
    }

    /// Resolve a name or id to the session id
    pub fn find_id(&self, name_or_id: &str) -> Option<String> {
        if self.sessions.contains_key(name_or_id) {
            return Some(name_or_id.to_string());
        }
        self.sessions
            .iter()
            .find(|entry| entry.value().name == name_or_id)
            .map(|entry| entry.key().clone())
    }

    /// Whether a terminal exists
    pub fn exists(&self, name_or_id: &str) -> bool {
        self.find_id(name_or_id).is_some()
    }

    /// Snapshot of all sessions, sorted by name
    pub fn list(&self) -> Vec<TerminalSession> {
        let mut sessions: Vec<TerminalSession> =
            self.sessions.iter().map(|entry| entry.value().clone()).collect();
        sessions.sort_by(|a, b| a.name.cmp(&b.name));
        sessions
    }

    /// Session record for `whoami`
    pub fn get(&self, name_or_id: &str) -> Option<TerminalSession> {
        let id = self.find_id(name_or_id)?;
        self.sessions.get(&id).map(|entry| entry.value().clone())
    }

    /// Deliver a message to one terminal's inbox
    pub fn deliver(
        &self,
        name_or_id: &str,
        kind: InboxKind,
        message: InboxMessage,
    ) -> Result<Delivery> {
        let id = self
            .find_id(name_or_id)
            .ok_or_else(|| AishError::UnknownTerminal(name_or_id.to_string()))?;
        let mut session = self
            .sessions
            .get_mut(&id)
            .ok_or_else(|| AishError::UnknownTerminal(name_or_id.to_string()))?;
        let name = session.name.clone();
        let evicted = session.inboxes.get_mut(kind).push(message).is_some();
        if evicted {
            tracing::warn!(terminal = %name, inbox = %kind, "Mailbox overflow; oldest message evicted");
        }
        Ok(Delivery {
            terminal: name,
            inbox: kind,
            evicted,
        })
    }

    /// Deliver to every terminal carrying a purpose tag
    pub fn deliver_to_purpose(
        &self,
        purpose: &str,
        kind: InboxKind,
        message: &InboxMessage,
    ) -> Vec<Delivery> {
        let targets: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().purposes.iter().any(|p| p == purpose))
            .map(|entry| entry.key().clone())
            .collect();
        targets
            .iter()
            .filter_map(|id| self.deliver(id, kind, message.clone()).ok())
            .collect()
    }

    /// Broadcast to every live terminal except the sender
    pub fn broadcast(&self, sender: &str, kind: InboxKind, message: &InboxMessage) -> Vec<Delivery> {
        let targets: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().name != sender)
            .map(|entry| entry.key().clone())
            .collect();
        targets
            .iter()
            .filter_map(|id| self.deliver(id, kind, message.clone()).ok())
            .collect()
    }

    /// Pop the oldest message from an inbox
    pub fn pop(&self, name_or_id: &str, kind: InboxKind) -> Result<Option<InboxMessage>> {
        let id = self
            .find_id(name_or_id)
            .ok_or_else(|| AishError::UnknownTerminal(name_or_id.to_string()))?;
        let mut session = self
            .sessions
            .get_mut(&id)
            .ok_or_else(|| AishError::UnknownTerminal(name_or_id.to_string()))?;
        Ok(session.inboxes.get_mut(kind).pop())
    }

    /// Read an inbox; destructive only when `remove` is set
    pub fn read(&self, name_or_id: &str, kind: InboxKind, remove: bool) -> Result<Vec<InboxMessage>> {
        let id = self
            .find_id(name_or_id)
            .ok_or_else(|| AishError::UnknownTerminal(name_or_id.to_string()))?;
        let mut session = self
            .sessions
            .get_mut(&id)
            .ok_or_else(|| AishError::UnknownTerminal(name_or_id.to_string()))?;
        Ok(session.inboxes.get_mut(kind).read(remove))
    }
}
