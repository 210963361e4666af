//! Bounded per-terminal mailboxes
//!
//! Each terminal carries three FIFO inboxes: `prompt` (high priority, cap
//! 50), `new` (cap 100), and `keep` (cap 50). They are in-process and
//! vanish with the terminal. On overflow the oldest entry is evicted and a
//! counter bumped; eviction is a warning, never an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

/// Which inbox a message lands in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InboxKind {
    /// High-priority messages
    Prompt,
    /// Ordinary inbound messages
    New,
    /// Messages the operator chose to keep
    Keep,
}

impl InboxKind {
    /// Capacity for this inbox
    pub fn capacity(self) -> usize {
        match self {
            InboxKind::Prompt => 50,
            InboxKind::New => 100,
            InboxKind::Keep => 50,
        }
    }

    /// Parse an inbox name
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "prompt" => Some(InboxKind::Prompt),
            "new" => Some(InboxKind::New),
            "keep" => Some(InboxKind::Keep),
            _ => None,
        }
    }
}

impl std::fmt::Display for InboxKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Prompt => write!(f, "prompt"),
            Self::New => write!(f, "new"),
            Self::Keep => write!(f, "keep"),
        }
    }
}

/// One mailbox message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxMessage {
    /// Message id
    pub id: String,
    /// Arrival time
    pub timestamp: DateTime<Utc>,
    /// Sender (terminal name, CI name, or operator)
    pub from: String,
    /// How the message was routed (direct, forward, broadcast, purpose tag)
    pub routing: String,
    /// Message body
    pub body: serde_json::Value,
}

impl InboxMessage {
    /// Create a message
    pub fn new(from: impl Into<String>, routing: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            from: from.into(),
            routing: routing.into(),
            body,
        }
    }
}

/// A bounded FIFO mailbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mailbox {
    kind: InboxKind,
    queue: VecDeque<InboxMessage>,
    /// Messages evicted due to overflow
    pub overflow_count: u64,
}

impl Mailbox {
    /// Create an empty mailbox of a kind
    pub fn new(kind: InboxKind) -> Self {
        Self {
            kind,
            queue: VecDeque::new(),
            overflow_count: 0,
        }
    }

    /// The inbox kind
    pub fn kind(&self) -> InboxKind {
        self.kind
    }

    /// Number of messages held
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the mailbox is empty
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Append a message; on overflow the oldest is evicted and returned
    pub fn push(&mut self, message: InboxMessage) -> Option<InboxMessage> {
        let evicted = if self.queue.len() >= self.kind.capacity() {
            self.overflow_count += 1;
            self.queue.pop_front()
        } else {
            None
        };
        self.queue.push_back(message);
        evicted
    }

    /// Remove and return the oldest message
    pub fn pop(&mut self) -> Option<InboxMessage> {
        self.queue.pop_front()
    }

    /// Read all messages; destructive only when `remove` is set
    pub fn read(&mut self, remove: bool) -> Vec<InboxMessage> {
        if remove {
            self.queue.drain(..).collect()
        } else {
            self.queue.iter().cloned().collect()
        }
    }
}

/// The three inboxes of one terminal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalInboxes {
    /// High-priority inbox
    pub prompt: Mailbox,
    /// Ordinary inbox
    pub new: Mailbox,
    /// Kept messages
    pub keep: Mailbox,
}

impl Default for TerminalInboxes {
    fn default() -> Self {
        Self {
            prompt: Mailbox::new(InboxKind::Prompt),
            new: Mailbox::new(InboxKind::New),
            keep: Mailbox::new(InboxKind::Keep),
        }
    }
}

impl TerminalInboxes {
    /// Borrow an inbox by kind
    pub fn get_mut(&mut self, kind: InboxKind) -> &mut Mailbox {
        match kind {
            InboxKind::Prompt => &mut self.prompt,
            InboxKind::New => &mut self.new,
            InboxKind::Keep => &mut self.keep,
        }
    }

    /// Borrow an inbox by kind, read-only
    pub fn get(&self, kind: InboxKind) -> &Mailbox {
        match kind {
            InboxKind::Prompt => &self.prompt,
            InboxKind::New => &self.new,
            InboxKind::Keep => &self.keep,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(n: usize) -> InboxMessage {
        InboxMessage::new("term-b", "direct", json!({"n": n}))
    }

    #[test]
    fn test_fifo_order() {
        let mut mailbox = Mailbox::new(InboxKind::New);
        mailbox.push(message(1));
        mailbox.push(message(2));

        assert_eq!(mailbox.pop().unwrap().body["n"], 1);
        assert_eq!(mailbox.pop().unwrap().body["n"], 2);
        assert!(mailbox.pop().is_none());
    }

    #[test]
    fn test_overflow_evicts_exactly_oldest() {
        let mut mailbox = Mailbox::new(InboxKind::Keep);
        for n in 0..InboxKind::Keep.capacity() {
            assert!(mailbox.push(message(n)).is_none());
        }

        let evicted = mailbox.push(message(999)).unwrap();
        assert_eq!(evicted.body["n"], 0);
        assert_eq!(mailbox.len(), InboxKind::Keep.capacity());
        assert_eq!(mailbox.overflow_count, 1);
    }

    #[test]
    fn test_read_non_destructive_by_default() {
        let mut mailbox = Mailbox::new(InboxKind::Keep);
        mailbox.push(message(1));

        assert_eq!(mailbox.read(false).len(), 1);
        assert_eq!(mailbox.len(), 1);

        assert_eq!(mailbox.read(true).len(), 1);
        assert!(mailbox.is_empty());
    }

    #[test]
    fn test_capacities() {
        assert_eq!(InboxKind::Prompt.capacity(), 50);
        assert_eq!(InboxKind::New.capacity(), 100);
        assert_eq!(InboxKind::Keep.capacity(), 50);
    }

    #[test]
    fn test_parse() {
        assert_eq!(InboxKind::parse("new"), Some(InboxKind::New));
        assert_eq!(InboxKind::parse("nope"), None);
    }
}
