//! Registration, resolution, and heartbeat lifecycle end to end

use registry::component::{ComponentDescriptor, ComponentKind, ComponentState, Endpoint};
use registry::registry::ServiceRegistry;
use registry::RegistryError;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tooling::config::HeartbeatConfig;
use uuid::Uuid;

fn apollo() -> ComponentDescriptor {
    ComponentDescriptor {
        id: "apollo".to_string(),
        name: "apollo".to_string(),
        kind: ComponentKind::Service,
        version: "1.0.0".to_string(),
        capabilities: vec!["predict@10".to_string()],
        endpoints: vec![Endpoint::http("localhost", 8112, "/")],
        dependencies: vec![],
        metadata: HashMap::new(),
    }
}

/// Register, resolve, heartbeat for a while, go silent, and fail at T2.
#[tokio::test]
async fn registration_resolution_and_heartbeat_death() {
    let registry = ServiceRegistry::new(HeartbeatConfig::default());
    let uuid = Uuid::new_v4();

    registry.register(apollo(), uuid).await.unwrap();

    // Resolution returns the registered endpoint.
    let endpoints = registry.resolve_name("apollo").await.unwrap();
    assert_eq!(endpoints.len(), 1);
    assert_eq!(endpoints[0].port, 8112);

    // Heartbeats on schedule keep the component ready.
    let start = Instant::now();
    let tick = Duration::from_secs(10);
    for n in 0..5u32 {
        registry
            .heartbeat_at("apollo", uuid, HashMap::new(), start + tick * n)
            .await
            .unwrap();
    }
    let last_beat = start + tick * 4;
    registry.sweep(last_beat + Duration::from_secs(5)).await;
    assert_eq!(registry.get("apollo").await.unwrap().state, ComponentState::Ready);

    // Silence past T2 fails the component.
    registry.sweep(last_beat + HeartbeatConfig::default().t2()).await;
    assert_eq!(registry.get("apollo").await.unwrap().state, ComponentState::Failed);

    // The failed instance's uuid is now stale for new operations.
    let err = registry
        .heartbeat("apollo", Uuid::new_v4(), HashMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Stale { .. }));

    // Recovery requires a fresh registration with a new instance uuid.
    let revived = Uuid::new_v4();
    registry.register(apollo(), revived).await.unwrap();
    assert!(registry.resolve_name("apollo").await.is_ok());
}

/// Resolution is deterministic for identical state and counter position.
#[tokio::test]
async fn resolve_is_deterministic() {
    let build = || async {
        let registry = ServiceRegistry::new(HeartbeatConfig::default());
        for id in ["alpha", "beta", "gamma"] {
            let mut desc = apollo();
            desc.id = id.to_string();
            desc.name = id.to_string();
            registry.register(desc, Uuid::new_v4()).await.unwrap();
        }
        registry
    };

    let first = build().await;
    let second = build().await;

    // Same state, same counter position: identical provider order.
    let a = first.resolve_capability("predict").await.unwrap();
    let b = second.resolve_capability("predict").await.unwrap();
    let ids_a: Vec<&str> = a.iter().map(|p| p.provider_id.as_str()).collect();
    let ids_b: Vec<&str> = b.iter().map(|p| p.provider_id.as_str()).collect();
    assert_eq!(ids_a, ids_b);
}

/// Metric gauges ride along with heartbeats onto the component record.
#[tokio::test]
async fn heartbeat_gauges_recorded() {
    let registry = ServiceRegistry::new(HeartbeatConfig::default());
    let uuid = Uuid::new_v4();
    registry.register(apollo(), uuid).await.unwrap();

    let mut gauges = HashMap::new();
    gauges.insert("queue_depth".to_string(), 7.0);
    registry.heartbeat("apollo", uuid, gauges).await.unwrap();

    let component = registry.get("apollo").await.unwrap();
    assert_eq!(component.gauges.get("queue_depth"), Some(&7.0));
    assert!(component.last_heartbeat.is_some());
}
