//! The message shell
//!
//! Dispatches a parsed command against the CI registry, terminal
//! registry, connection pool, and memory core. This is the layer the CLI
//! calls into; everything here is also reachable programmatically by the
//! workflow orchestrator.

use crate::ci::CiEntry;
use crate::inbox::{InboxKind, InboxMessage};
use crate::registry::{CiRegistry, EndpointResolver, ResolvedTarget};
use crate::team_chat::{self, ChatResult};
use crate::terminal::{Delivery, TerminalRegistry};
use crate::{AishError, Result};
use memory::{MemoryManager, SunriseBundle};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tooling::persistence::KvStore;
use transport::pool::ConnectionPool;
use tracing::debug;

/// What a send accomplished
#[derive(Debug)]
pub enum SendOutcome {
    /// The message landed in a terminal inbox
    Delivered(Delivery),
    /// The target endpoint replied
    Response(Value),
}

/// The unified message shell
pub struct MessageShell {
    cis: RwLock<CiRegistry>,
    terminals: Arc<TerminalRegistry>,
    pool: Arc<ConnectionPool>,
    resolver: Arc<dyn EndpointResolver>,
    memory: Option<Arc<MemoryManager>>,
    store: Option<Arc<dyn KvStore>>,
    sender: String,
    team_chat_timeout: Duration,
}

impl MessageShell {
    /// Create a shell
    pub fn new(
        cis: CiRegistry,
        terminals: Arc<TerminalRegistry>,
        pool: Arc<ConnectionPool>,
        resolver: Arc<dyn EndpointResolver>,
        sender: impl Into<String>,
    ) -> Self {
        Self {
            cis: RwLock::new(cis),
            terminals,
            pool,
            resolver,
            memory: None,
            store: None,
            sender: sender.into(),
            team_chat_timeout: Duration::from_secs(2),
        }
    }

    /// Attach the memory core (sunset gating, sunrise commands)
    pub fn with_memory(mut self, memory: Arc<MemoryManager>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Attach persistence for the CI registry and forwards
    pub fn with_store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the team-chat per-target timeout
    pub fn with_team_chat_timeout(mut self, timeout: Duration) -> Self {
        self.team_chat_timeout = timeout;
        self
    }

    /// The terminal registry
    pub fn terminals(&self) -> &TerminalRegistry {
        &self.terminals
    }

    /// Who this shell sends as
    pub fn sender(&self) -> &str {
        &self.sender
    }

    async fn persist(&self) -> Result<()> {
        if let Some(store) = &self.store {
            self.cis.read().await.save(store.as_ref()).await?;
        }
        Ok(())
    }

    /// Add or replace a CI entry
    pub async fn upsert_ci(&self, entry: CiEntry) -> Result<()> {
        self.cis.write().await.upsert(entry);
        self.persist().await
    }

    /// List CI entries
    pub async fn list_cis(&self) -> Vec<CiEntry> {
        self.cis.read().await.list().into_iter().cloned().collect()
    }

    /// Send a message to a CI
    ///
    /// Resolution honors forwards; a forward created with `--json` wraps
    /// the payload as `{message, dest, sender, purpose}` before delivery.
    /// A sleeping CI rejects the message with `ci_asleep`.
    pub async fn send(&self, ci: &str, message: &str) -> Result<SendOutcome> {
        if let Some(memory) = &self.memory {
            if memory.is_asleep(ci).await {
                return Err(AishError::Memory(memory::MemoryError::CiAsleep(ci.to_string())));
            }
        }

        let target = {
            let mut cis = self.cis.write().await;
            let target = cis.resolve(ci, &self.terminals, self.resolver.as_ref()).await?;
            target
        };
        // A stale forward may have been invalidated during resolution.
        self.persist().await?;

        match target {
            ResolvedTarget::Terminal { terminal_id, json: wrap, forwarded } => {
                let (routing, body) = if wrap {
                    (
                        "forward",
                        json!({
                            "message": message,
                            "dest": ci,
                            "sender": self.sender,
                            "purpose": "forward",
                        }),
                    )
                } else if forwarded {
                    ("forward", json!(message))
                } else {
                    ("direct", json!(message))
                };
                let delivery = self.terminals.deliver(
                    &terminal_id,
                    InboxKind::New,
                    InboxMessage::new(&self.sender, routing, body),
                )?;
                Ok(SendOutcome::Delivered(delivery))
            }
            ResolvedTarget::Endpoint { url } => {
                debug!(ci, %url, "Dispatching message to endpoint");
                let body = json!({
                    "message": message,
                    "dest": ci,
                    "sender": self.sender,
                });
                let reply = self.pool.post(&url, &body, None).await?;
                Ok(SendOutcome::Response(reply))
            }
        }
    }

    /// Send a high-priority message
    ///
    /// Terminal targets receive it in their `prompt` inbox; endpoint
    /// targets see a `priority` marker in the body.
    pub async fn prompt(&self, ci: &str, message: &str) -> Result<SendOutcome> {
        if let Some(memory) = &self.memory {
            if memory.is_asleep(ci).await {
                return Err(AishError::Memory(memory::MemoryError::CiAsleep(ci.to_string())));
            }
        }

        let target = {
            let mut cis = self.cis.write().await;
            cis.resolve(ci, &self.terminals, self.resolver.as_ref()).await?
        };

        match target {
            ResolvedTarget::Terminal { terminal_id, json: wrap, .. } => {
                let body = if wrap {
                    json!({
                        "message": message,
                        "dest": ci,
                        "sender": self.sender,
                        "purpose": "prompt",
                    })
                } else {
                    json!(message)
                };
                let delivery = self.terminals.deliver(
                    &terminal_id,
                    InboxKind::Prompt,
                    InboxMessage::new(&self.sender, "prompt", body),
                )?;
                Ok(SendOutcome::Delivered(delivery))
            }
            ResolvedTarget::Endpoint { url } => {
                let body = json!({
                    "message": message,
                    "dest": ci,
                    "sender": self.sender,
                    "priority": "prompt",
                });
                let reply = self.pool.post(&url, &body, None).await?;
                Ok(SendOutcome::Response(reply))
            }
        }
    }

    /// Broadcast to the greek chorus
    pub async fn team_chat(&self, message: &str) -> Result<Vec<ChatResult>> {
        let mut targets = Vec::new();
        {
            let mut cis = self.cis.write().await;
            let chorus: Vec<String> = cis
                .greek_chorus()
                .iter()
                .map(|entry| entry.ci_name.clone())
                .collect();
            for ci in chorus {
                match cis.resolve(&ci, &self.terminals, self.resolver.as_ref()).await {
                    Ok(ResolvedTarget::Endpoint { url }) => targets.push((ci, url)),
                    Ok(ResolvedTarget::Terminal { terminal_id, .. }) => {
                        // Forwarded chorus members get the message in their
                        // terminal instead of over the wire.
                        let _ = self.terminals.deliver(
                            &terminal_id,
                            InboxKind::New,
                            InboxMessage::new(&self.sender, "team-chat", json!(message)),
                        );
                    }
                    Err(e) => {
                        debug!(ci = %ci, error = %e, "Skipping unresolvable chorus member");
                    }
                }
            }
        }

        Ok(team_chat::broadcast(
            self.pool.clone(),
            targets,
            &self.sender,
            message,
            self.team_chat_timeout,
        )
        .await)
    }

    /// Create a forward
    pub async fn forward(&self, ci: &str, terminal: &str, wrap_json: bool) -> Result<()> {
        {
            let mut cis = self.cis.write().await;
            cis.set_forward(ci, terminal, wrap_json, &self.terminals)?;
        }
        self.persist().await
    }

    /// Remove a forward
    pub async fn unforward(&self, ci: &str) -> Result<()> {
        {
            let mut cis = self.cis.write().await;
            cis.forwards.remove(ci);
        }
        self.persist().await
    }

    /// List forwards as (ci, terminal, json) rows
    pub async fn forward_list(&self) -> Vec<(String, String, bool)> {
        self.cis
            .read()
            .await
            .forwards
            .list()
            .into_iter()
            .map(|(ci, rule)| (ci.to_string(), rule.terminal_id.clone(), rule.json))
            .collect()
    }

    /// Put a CI to sleep via the memory core protocol
    pub async fn sunset(&self, ci: &str) -> Result<()> {
        let memory = self
            .memory
            .as_ref()
            .ok_or_else(|| AishError::Usage("No memory core attached".to_string()))?;
        memory.advise_sunset(ci).await;
        Ok(())
    }

    /// Wake a CI; returns the restored context when one was applied
    pub async fn sunrise(&self, ci: &str) -> Result<Option<SunriseBundle>> {
        let memory = self
            .memory
            .as_ref()
            .ok_or_else(|| AishError::Usage("No memory core attached".to_string()))?;
        Ok(memory.sunrise(ci).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ci::CiKind;
    use async_trait::async_trait;
    use registry::component::Endpoint;
    use transport::client::{ClientConfig, HttpClient};
    use transport::pool::PoolConfig;

    struct NoResolver;

    #[async_trait]
    impl EndpointResolver for NoResolver {
        async fn resolve_endpoints(&self, name: &str) -> Result<Vec<Endpoint>> {
            Err(AishError::Resolution(format!("No live component named {}", name)))
        }
    }

    fn shell_with(cis: CiRegistry, terminals: Arc<TerminalRegistry>) -> MessageShell {
        let pool = Arc::new(ConnectionPool::new(
            HttpClient::new(ClientConfig::default()).unwrap(),
            PoolConfig::default(),
        ));
        MessageShell::new(cis, terminals, pool, Arc::new(NoResolver), "term-caller")
    }

    #[tokio::test]
    async fn test_forwarded_send_wraps_json_envelope() {
        let terminals = Arc::new(TerminalRegistry::new());
        terminals.open("term-a", vec![]).unwrap();

        let mut cis = CiRegistry::new();
        cis.upsert(CiEntry::new("apollo", CiKind::GreekChorus).with_component("apollo"));
        cis.set_forward("apollo", "term-a", true, &terminals).unwrap();

        let shell = shell_with(cis, terminals.clone());
        let outcome = shell.send("apollo", "ping").await.unwrap();
        assert!(matches!(outcome, SendOutcome::Delivered(_)));

        let inbox = terminals.read("term-a", InboxKind::New, false).unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(
            inbox[0].body,
            json!({
                "message": "ping",
                "dest": "apollo",
                "sender": "term-caller",
                "purpose": "forward",
            })
        );
    }

    #[tokio::test]
    async fn test_forwarded_send_raw_without_json() {
        let terminals = Arc::new(TerminalRegistry::new());
        terminals.open("term-a", vec![]).unwrap();

        let mut cis = CiRegistry::new();
        cis.upsert(CiEntry::new("apollo", CiKind::GreekChorus));
        cis.set_forward("apollo", "term-a", false, &terminals).unwrap();

        let shell = shell_with(cis, terminals.clone());
        shell.send("apollo", "ping").await.unwrap();

        let inbox = terminals.read("term-a", InboxKind::New, false).unwrap();
        assert_eq!(inbox[0].body, json!("ping"));
        assert_eq!(inbox[0].routing, "forward");
    }

    #[tokio::test]
    async fn test_prompt_goes_to_prompt_inbox() {
        let terminals = Arc::new(TerminalRegistry::new());
        terminals.open("term-a", vec![]).unwrap();

        let mut cis = CiRegistry::new();
        cis.upsert(CiEntry::new("apollo", CiKind::GreekChorus));
        cis.set_forward("apollo", "term-a", false, &terminals).unwrap();

        let shell = shell_with(cis, terminals.clone());
        shell.prompt("apollo", "urgent: review now").await.unwrap();

        assert_eq!(terminals.read("term-a", InboxKind::Prompt, false).unwrap().len(), 1);
        assert!(terminals.read("term-a", InboxKind::New, false).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sleeping_ci_rejects_messages() {
        use memory::sunset::SunsetConfig;
        use memory::tokens::TokenCoster;
        use tooling::config::MemoryConfig;

        let manager = Arc::new(MemoryManager::new(
            MemoryConfig::default(),
            TokenCoster::fallback(),
            SunsetConfig::default(),
        ));
        manager.register_ci("metis", "metis-large", 100_000).await;
        manager.advise_sunset("metis").await;
        manager.begin_turn("metis", vec![]).await.unwrap();
        manager.complete_turn("metis", 100, "drained state").await.unwrap();

        let terminals = Arc::new(TerminalRegistry::new());
        let mut cis = CiRegistry::new();
        cis.upsert(CiEntry::new("metis", CiKind::GreekChorus));

        let shell = shell_with(cis, terminals).with_memory(manager.clone());
        let err = shell.send("metis", "hello").await.unwrap_err();
        assert_eq!(err.code(), "ci_asleep");

        // After sunrise the shell routes again (resolution now fails on
        // transport instead, since nothing is registered).
        shell.sunrise("metis").await.unwrap();
        let err = shell.send("metis", "hello").await.unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[tokio::test]
    async fn test_unknown_ci_send() {
        let terminals = Arc::new(TerminalRegistry::new());
        let shell = shell_with(CiRegistry::new(), terminals);
        let err = shell.send("ghost", "hello").await.unwrap_err();
        assert!(matches!(err, AishError::UnknownCi(_)));
    }

    #[tokio::test]
    async fn test_forward_list_roundtrip() {
        let terminals = Arc::new(TerminalRegistry::new());
        terminals.open("term-a", vec![]).unwrap();

        let mut cis = CiRegistry::new();
        cis.upsert(CiEntry::new("apollo", CiKind::GreekChorus));

        let shell = shell_with(cis, terminals);
        shell.forward("apollo", "term-a", true).await.unwrap();
        assert_eq!(
            shell.forward_list().await,
            vec![("apollo".to_string(), "term-a".to_string(), true)]
        );

        shell.unforward("apollo").await.unwrap();
        assert!(shell.forward_list().await.is_empty());
    }
}
