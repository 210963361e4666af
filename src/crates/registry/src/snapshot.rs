//! Durable registry snapshots
//!
//! Registry state is authoritative in memory; snapshots exist so a
//! restarted registry knows which components to expect back. On reload
//! every component is marked unregistered and must re-register with a
//! fresh instance uuid.

use crate::capability::{Capability, FallbackBinding};
use crate::component::Component;
use crate::registry::ServiceRegistry;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tooling::persistence::{get_typed, put_typed, KvStore};
use tracing::{info, warn};

/// Storage key for the registry snapshot
pub const SNAPSHOT_KEY: &str = "registry.snapshot";

/// Serialized registry state
#[derive(Debug, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    /// Component records at snapshot time
    pub components: Vec<Component>,
    /// Capability rows at snapshot time
    pub capabilities: Vec<Capability>,
    /// Fallback bindings at snapshot time
    pub fallbacks: Vec<FallbackBinding>,
    /// When the snapshot was taken
    pub taken_at: DateTime<Utc>,
}

/// Write the current registry state to the store
pub async fn save(registry: &ServiceRegistry, store: &dyn KvStore) -> Result<()> {
    let snapshot = RegistrySnapshot {
        components: registry.components().await,
        capabilities: registry.capability_rows().await,
        fallbacks: registry.fallback_rows().await,
        taken_at: Utc::now(),
    };
    put_typed(store, SNAPSHOT_KEY, &snapshot).await?;
    Ok(())
}

/// Load a snapshot, if present, into a fresh registry
pub async fn load(registry: &ServiceRegistry, store: &dyn KvStore) -> Result<bool> {
    let Some(snapshot): Option<RegistrySnapshot> = get_typed(store, SNAPSHOT_KEY).await? else {
        return Ok(false);
    };
    info!(
        components = snapshot.components.len(),
        taken_at = %snapshot.taken_at,
        "Restoring registry snapshot; all components marked unregistered"
    );
    registry
        .install_snapshot(snapshot.components, snapshot.capabilities, snapshot.fallbacks)
        .await;
    Ok(true)
}

/// Periodically snapshot the registry until the task is aborted
pub fn spawn_snapshotter(
    registry: Arc<ServiceRegistry>,
    store: Arc<dyn KvStore>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = save(&registry, store.as_ref()).await {
                warn!(error = %e, "Registry snapshot failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{ComponentDescriptor, ComponentKind, ComponentState, Endpoint};
    use std::collections::HashMap;
    use tooling::config::HeartbeatConfig;
    use tooling::persistence::MemoryStore;
    use uuid::Uuid;

    fn descriptor(id: &str) -> ComponentDescriptor {
        ComponentDescriptor {
            id: id.to_string(),
            name: id.to_string(),
            kind: ComponentKind::Service,
            version: "1.0.0".to_string(),
            capabilities: vec!["predict@10".to_string()],
            endpoints: vec![Endpoint::http("localhost", 8112, "/")],
            dependencies: vec![],
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip_marks_unregistered() {
        let store = MemoryStore::new();
        let registry = ServiceRegistry::new(HeartbeatConfig::default());
        registry.register(descriptor("apollo"), Uuid::new_v4()).await.unwrap();

        save(&registry, &store).await.unwrap();

        let restored = ServiceRegistry::new(HeartbeatConfig::default());
        assert!(load(&restored, &store).await.unwrap());

        let component = restored.get("apollo").await.unwrap();
        assert_eq!(component.state, ComponentState::Unregistered);

        // Unregistered components are not routable until they re-register.
        assert!(restored.resolve_name("apollo").await.is_err());
    }

    #[tokio::test]
    async fn test_load_without_snapshot() {
        let store = MemoryStore::new();
        let registry = ServiceRegistry::new(HeartbeatConfig::default());
        assert!(!load(&registry, &store).await.unwrap());
    }

    #[tokio::test]
    async fn test_reregistration_after_restore() {
        let store = MemoryStore::new();
        let registry = ServiceRegistry::new(HeartbeatConfig::default());
        registry.register(descriptor("apollo"), Uuid::new_v4()).await.unwrap();
        save(&registry, &store).await.unwrap();

        let restored = ServiceRegistry::new(HeartbeatConfig::default());
        load(&restored, &store).await.unwrap();
        restored.register(descriptor("apollo"), Uuid::new_v4()).await.unwrap();
        assert!(restored.resolve_name("apollo").await.is_ok());
    }
}
