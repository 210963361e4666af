//! The `ServiceRegistry` write boundary
//!
//! All registry state lives behind one `RwLock`; every mutation goes
//! through methods here and lifecycle events are published after the lock
//! is released. Resolution reads share the lock and stay non-blocking with
//! respect to writes in progress elsewhere.

use crate::capability::{Capability, FallbackBinding, FallbackOutcome};
use crate::component::{compare_versions, Component, ComponentDescriptor, ComponentState, Endpoint};
use crate::events::RegistryEvent;
use crate::health::{classify, HealthClass, HeartbeatDirective, HeartbeatLedger};
use crate::readiness::{check_for_cycle, ReadinessCondition, ReadinessTracker};
use crate::{RegistryError, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::{broadcast, RwLock};
use tooling::config::HeartbeatConfig;
use tooling::validation::{validate_id, validate_name};
use tracing::{info, warn};
use uuid::Uuid;

/// Proof of registration returned to the component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationToken {
    /// Component id
    pub id: String,
    /// Instance uuid the registration is bound to
    pub instance_uuid: Uuid,
    /// Opaque token presented on privileged operations
    pub token: Uuid,
}

/// A provider selected by capability resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedProvider {
    /// Provider component id
    pub provider_id: String,
    /// Capability level
    pub level: i32,
    /// Provider state at resolution time
    pub state: ComponentState,
    /// Provider endpoints
    pub endpoints: Vec<Endpoint>,
}

/// Invokes a capability on a provider; supplied by the caller because the
/// registry publishes endpoints and never proxies traffic itself.
#[async_trait]
pub trait ProviderInvoker: Send + Sync {
    /// Invoke a capability on a provider
    async fn invoke(
        &self,
        provider: &Component,
        capability: &str,
        payload: &Value,
    ) -> transport::Result<Value>;
}

#[derive(Default)]
struct RegistryState {
    components: HashMap<String, Component>,
    capabilities: HashMap<String, Vec<Capability>>,
    fallbacks: Vec<FallbackBinding>,
    readiness: ReadinessTracker,
    ledger: HeartbeatLedger,
}

/// Authoritative component and capability table
pub struct ServiceRegistry {
    state: RwLock<RegistryState>,
    events: broadcast::Sender<RegistryEvent>,
    resolve_counter: AtomicU64,
    config: HeartbeatConfig,
}

impl ServiceRegistry {
    /// Create an empty registry
    pub fn new(config: HeartbeatConfig) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            state: RwLock::new(RegistryState::default()),
            events,
            resolve_counter: AtomicU64::new(0),
            config,
        }
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// The heartbeat configuration in force
    pub fn heartbeat_config(&self) -> &HeartbeatConfig {
        &self.config
    }

    fn emit(&self, events: Vec<RegistryEvent>) {
        for event in events {
            info!(event = %event.description(), "registry event");
            let _ = self.events.send(event);
        }
    }

    /// Register a component incarnation
    ///
    /// Fails with `conflict` when a live instance already holds the id and
    /// with `invalid` on schema failures or declared dependency cycles.
    pub async fn register(
        &self,
        descriptor: ComponentDescriptor,
        instance_uuid: Uuid,
    ) -> Result<RegistrationToken> {
        validate_id(&descriptor.id).map_err(|e| RegistryError::Invalid(e.to_string()))?;
        validate_name(&descriptor.name).map_err(|e| RegistryError::Invalid(e.to_string()))?;

        let mut events = Vec::new();
        let token = {
            let mut state = self.state.write().await;

            if let Some(existing) = state.components.get(&descriptor.id) {
                if existing.instance_uuid == instance_uuid {
                    return Err(RegistryError::Conflict(format!(
                        "Instance {} of {} is already registered",
                        instance_uuid, descriptor.id
                    )));
                }
                if existing.state != ComponentState::Failed
                    && existing.state != ComponentState::Unregistered
                {
                    return Err(RegistryError::Conflict(format!(
                        "A live instance of {} exists (state {})",
                        descriptor.id, existing.state
                    )));
                }
            }

            // Dependency edges including the candidate must stay acyclic.
            let mut edges: HashMap<String, Vec<String>> = state
                .components
                .values()
                .map(|c| (c.id.clone(), c.dependencies.clone()))
                .collect();
            edges.insert(descriptor.id.clone(), descriptor.dependencies.clone());
            check_for_cycle(&edges)?;

            let id = descriptor.id.clone();
            let declared = descriptor.capabilities.clone();
            let mut component = Component::from_descriptor(descriptor, instance_uuid);
            component.transition(ComponentState::Initializing)?;

            // Replace any capability rows from a previous incarnation.
            for providers in state.capabilities.values_mut() {
                providers.retain(|cap| cap.provider_id != id);
            }
            for decl in &declared {
                let cap = Capability::parse_declaration(&id, decl);
                state.capabilities.entry(cap.name.clone()).or_default().push(cap);
            }

            state.ledger.forget(&id);
            state.readiness.forget(&id);
            state.components.insert(id.clone(), component);
            events.push(RegistryEvent::registered(&id, instance_uuid));

            // With no declared conditions and satisfied dependencies the
            // ready signal is derived immediately.
            Self::promote_if_ready(&mut state, &id, &mut events);

            RegistrationToken {
                id,
                instance_uuid,
                token: Uuid::new_v4(),
            }
        };
        self.emit(events);
        Ok(token)
    }

    /// Unregister a component incarnation
    pub async fn unregister(&self, id: &str, instance_uuid: Uuid) -> Result<()> {
        let mut events = Vec::new();
        {
            let mut state = self.state.write().await;
            let component = state
                .components
                .get(id)
                .ok_or_else(|| RegistryError::Unknown(id.to_string()))?;
            component.check_instance(instance_uuid)?;

            state.components.remove(id);
            for providers in state.capabilities.values_mut() {
                providers.retain(|cap| cap.provider_id != id);
            }
            state.ledger.forget(id);
            state.readiness.forget(id);
            events.push(RegistryEvent::unregistered(id));
        }
        self.emit(events);
        Ok(())
    }

    /// Record a heartbeat and hand back any pending directive
    ///
    /// Heartbeats are processed in arrival order per component; gaps are
    /// recoverable and never discard registry data.
    pub async fn heartbeat(
        &self,
        id: &str,
        instance_uuid: Uuid,
        gauges: HashMap<String, f64>,
    ) -> Result<HeartbeatDirective> {
        self.heartbeat_at(id, instance_uuid, gauges, Instant::now()).await
    }

    /// Heartbeat with an explicit arrival instant (tests drive time)
    pub async fn heartbeat_at(
        &self,
        id: &str,
        instance_uuid: Uuid,
        gauges: HashMap<String, f64>,
        now: Instant,
    ) -> Result<HeartbeatDirective> {
        let mut events = Vec::new();
        let directive = {
            let mut state = self.state.write().await;
            let component = state
                .components
                .get(id)
                .ok_or_else(|| RegistryError::Unknown(id.to_string()))?;
            component.check_instance(instance_uuid)?;

            let arrived_on_schedule = match state.ledger.elapsed(id, now) {
                Some(elapsed) => classify(elapsed, &self.config) == HealthClass::Healthy,
                None => true,
            };
            let consecutive = state.ledger.record(id, now, arrived_on_schedule);

            let component = state.components.get_mut(id).expect("checked above");
            component.last_heartbeat = Some(Utc::now());
            component.gauges = gauges;

            if component.state == ComponentState::Degraded
                && consecutive >= self.config.recovery_heartbeats
            {
                component.transition(ComponentState::Ready)?;
                events.push(RegistryEvent::recovered(id));
            }

            state.ledger.take_directive(id)
        };
        self.emit(events);
        Ok(directive)
    }

    /// Declare a readiness condition for a component
    pub async fn declare_condition(
        &self,
        instance_uuid: Uuid,
        condition: ReadinessCondition,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let component = state
            .components
            .get(&condition.component_id)
            .ok_or_else(|| RegistryError::Unknown(condition.component_id.clone()))?;
        component.check_instance(instance_uuid)?;
        state.readiness.declare(condition);
        Ok(())
    }

    /// Report a readiness condition result; may promote the component
    pub async fn report_condition(
        &self,
        id: &str,
        instance_uuid: Uuid,
        name: &str,
        satisfied: bool,
    ) -> Result<()> {
        let mut events = Vec::new();
        {
            let mut state = self.state.write().await;
            let component = state
                .components
                .get(id)
                .ok_or_else(|| RegistryError::Unknown(id.to_string()))?;
            component.check_instance(instance_uuid)?;
            state.readiness.report(id, name, satisfied)?;
            if satisfied {
                Self::promote_if_ready(&mut state, id, &mut events);
            }
        }
        self.emit(events);
        Ok(())
    }

    /// Explicit ready signal from a component
    pub async fn signal_ready(&self, id: &str, instance_uuid: Uuid) -> Result<()> {
        let mut events = Vec::new();
        let promoted = {
            let mut state = self.state.write().await;
            let component = state
                .components
                .get(id)
                .ok_or_else(|| RegistryError::Unknown(id.to_string()))?;
            component.check_instance(instance_uuid)?;
            Self::promote_if_ready(&mut state, id, &mut events)
        };
        self.emit(events);
        if promoted {
            Ok(())
        } else {
            Err(RegistryError::Invalid(format!(
                "Component {} is not promotable: conditions or dependencies unsatisfied",
                id
            )))
        }
    }

    /// Self-reported degradation signal
    pub async fn report_degraded(&self, id: &str, instance_uuid: Uuid, reason: &str) -> Result<()> {
        let mut events = Vec::new();
        {
            let mut state = self.state.write().await;
            let component = state
                .components
                .get_mut(id)
                .ok_or_else(|| RegistryError::Unknown(id.to_string()))?;
            component.check_instance(instance_uuid)?;
            if component.state == ComponentState::Ready {
                component.transition(ComponentState::Degraded)?;
                state.ledger.reset_recovery(id);
                events.push(RegistryEvent::degraded(id, reason));
            }
        }
        self.emit(events);
        Ok(())
    }

    /// Explicit failure signal; any state may fail
    pub async fn report_failed(&self, id: &str, reason: &str) -> Result<()> {
        let mut events = Vec::new();
        {
            let mut state = self.state.write().await;
            let component = state
                .components
                .get_mut(id)
                .ok_or_else(|| RegistryError::Unknown(id.to_string()))?;
            if component.state != ComponentState::Failed {
                component.transition(ComponentState::Failed)?;
                state.ledger.reset_recovery(id);
                events.push(RegistryEvent::failed(id, reason));
            }
        }
        self.emit(events);
        Ok(())
    }

    /// Ask a component to drain on its next heartbeat
    pub async fn request_drain(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.components.contains_key(id) {
            return Err(RegistryError::Unknown(id.to_string()));
        }
        state.ledger.request_drain(id);
        Ok(())
    }

    /// Sweep heartbeat deadlines, degrading and failing silent components
    ///
    /// Driven by the background monitor; `now` is injectable for tests.
    pub async fn sweep(&self, now: Instant) {
        let mut events = Vec::new();
        {
            let mut state = self.state.write().await;
            let ids: Vec<String> = state.components.keys().cloned().collect();
            for id in ids {
                let Some(class) = state.ledger.classify(&id, now, &self.config) else {
                    continue;
                };
                let component = state.components.get_mut(&id).expect("keys snapshot");
                match (component.state, class) {
                    (ComponentState::Ready, HealthClass::Degraded) => {
                        if component.transition(ComponentState::Degraded).is_ok() {
                            state.ledger.reset_recovery(&id);
                            events.push(RegistryEvent::degraded(&id, "heartbeat misses exceeded T1"));
                        }
                    }
                    (ComponentState::Ready, HealthClass::Failed)
                    | (ComponentState::Degraded, HealthClass::Failed) => {
                        if component.transition(ComponentState::Failed).is_ok() {
                            state.ledger.reset_recovery(&id);
                            events.push(RegistryEvent::failed(&id, "heartbeat deadline T2 exceeded"));
                        }
                    }
                    _ => {}
                }
            }
        }
        self.emit(events);
    }

    /// Resolve a component name to its live endpoints
    ///
    /// Prefers ready components over degraded and the highest version among
    /// equals. Deterministic for identical registry state.
    pub async fn resolve_name(&self, name: &str) -> Result<Vec<Endpoint>> {
        let state = self.state.read().await;
        let mut matches: Vec<&Component> = state
            .components
            .values()
            .filter(|c| (c.id == name || c.name == name) && c.state.is_live())
            .collect();
        if matches.is_empty() {
            return Err(RegistryError::NotFound(format!("No live component named {}", name)));
        }
        matches.sort_by(|a, b| {
            b.state
                .routing_priority()
                .cmp(&a.state.routing_priority())
                .then_with(|| compare_versions(&b.version, &a.version))
        });
        Ok(matches[0].endpoints.clone())
    }

    /// Resolve a capability to an ordered provider list
    ///
    /// Order: state priority (ready over degraded), then level descending,
    /// then round-robin among ties driven by the registry's monotonic
    /// counter, never wall-clock.
    pub async fn resolve_capability(&self, capability: &str) -> Result<Vec<ResolvedProvider>> {
        let state = self.state.read().await;
        let providers = state
            .capabilities
            .get(capability)
            .ok_or_else(|| RegistryError::NotFound(format!("No providers for capability {}", capability)))?;

        let mut resolved: Vec<ResolvedProvider> = providers
            .iter()
            .filter_map(|cap| {
                let component = state.components.get(&cap.provider_id)?;
                if !component.state.is_live() {
                    return None;
                }
                Some(ResolvedProvider {
                    provider_id: cap.provider_id.clone(),
                    level: cap.level,
                    state: component.state,
                    endpoints: component.endpoints.clone(),
                })
            })
            .collect();

        if resolved.is_empty() {
            return Err(RegistryError::NotFound(format!(
                "No live providers for capability {}",
                capability
            )));
        }

        resolved.sort_by(|a, b| {
            b.state
                .routing_priority()
                .cmp(&a.state.routing_priority())
                .then_with(|| b.level.cmp(&a.level))
                .then_with(|| a.provider_id.cmp(&b.provider_id))
        });

        // Rotate each (priority, level) tie group by the counter.
        let tick = self.resolve_counter.fetch_add(1, Ordering::SeqCst);
        let mut rotated = Vec::with_capacity(resolved.len());
        let mut group_start = 0;
        while group_start < resolved.len() {
            let key = (resolved[group_start].state.routing_priority(), resolved[group_start].level);
            let group_end = resolved[group_start..]
                .iter()
                .position(|p| (p.state.routing_priority(), p.level) != key)
                .map(|offset| group_start + offset)
                .unwrap_or(resolved.len());
            let group = &resolved[group_start..group_end];
            let shift = (tick as usize) % group.len();
            rotated.extend(group.iter().skip(shift).cloned());
            rotated.extend(group.iter().take(shift).cloned());
            group_start = group_end;
        }
        Ok(rotated)
    }

    /// Register a capability explicitly; conflicts are logged, not rejected
    pub async fn register_capability(&self, capability: Capability) {
        let mut state = self.state.write().await;
        let providers = state.capabilities.entry(capability.name.clone()).or_default();
        if let Some(existing) = providers
            .iter_mut()
            .find(|cap| cap.provider_id == capability.provider_id)
        {
            warn!(
                provider = %capability.provider_id,
                capability = %capability.name,
                old_level = existing.level,
                new_level = capability.level,
                "Capability re-registered; replacing previous row"
            );
            *existing = capability;
        } else {
            providers.push(capability);
        }
    }

    /// Bind a fallback provider for a consumer
    pub async fn register_fallback(&self, binding: FallbackBinding) {
        let mut state = self.state.write().await;
        state.fallbacks.push(binding);
    }

    /// Invoke a capability with automatic fallback
    ///
    /// Only transport-class failures from the primary trigger fallback;
    /// logic errors surface to the caller unchanged. Fallbacks are tried
    /// highest-level first.
    pub async fn execute_with_fallback(
        &self,
        consumer: &str,
        capability: &str,
        payload: &Value,
        invoker: &dyn ProviderInvoker,
    ) -> Result<FallbackOutcome> {
        let providers = self.resolve_capability(capability).await?;
        let primary = providers.first().cloned().expect("resolve returns non-empty");

        let primary_component = self
            .get(&primary.provider_id)
            .await
            .ok_or_else(|| RegistryError::NotFound(primary.provider_id.clone()))?;

        let mut attempted = Vec::new();
        match invoker.invoke(&primary_component, capability, payload).await {
            Ok(value) => {
                return Ok(FallbackOutcome::Completed {
                    provider_id: primary.provider_id,
                    value,
                })
            }
            Err(e) if e.is_retryable() => {
                warn!(
                    provider = %primary.provider_id,
                    capability,
                    error = %e,
                    "Primary provider unavailable; trying fallbacks"
                );
                attempted.push(primary.provider_id.clone());
            }
            Err(e) => return Err(e.into()),
        }

        let mut bindings: Vec<FallbackBinding> = {
            let state = self.state.read().await;
            state
                .fallbacks
                .iter()
                .filter(|b| {
                    b.consumer_id == consumer
                        && b.capability_name == capability
                        && !attempted.contains(&b.provider_id)
                })
                .cloned()
                .collect()
        };
        bindings.sort_by(|a, b| b.level.cmp(&a.level));

        for binding in bindings {
            let Some(component) = self.get(&binding.provider_id).await else {
                continue;
            };
            if !component.state.is_live() {
                continue;
            }
            match invoker.invoke(&component, capability, payload).await {
                Ok(value) => {
                    return Ok(FallbackOutcome::FallbackApplied {
                        provider_id: binding.provider_id,
                        attempted,
                        value,
                    })
                }
                Err(e) if e.is_retryable() => {
                    attempted.push(binding.provider_id.clone());
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(RegistryError::NoFallbackAvailable(capability.to_string()))
    }

    /// Fetch a component record
    pub async fn get(&self, id: &str) -> Option<Component> {
        self.state.read().await.components.get(id).cloned()
    }

    /// All component records
    pub async fn components(&self) -> Vec<Component> {
        let state = self.state.read().await;
        let mut list: Vec<Component> = state.components.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    /// All registered capabilities (for snapshotting)
    pub(crate) async fn capability_rows(&self) -> Vec<Capability> {
        let state = self.state.read().await;
        let mut rows: Vec<Capability> = state.capabilities.values().flatten().cloned().collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.provider_id.cmp(&b.provider_id)));
        rows
    }

    /// All fallback bindings (for snapshotting)
    pub(crate) async fn fallback_rows(&self) -> Vec<FallbackBinding> {
        self.state.read().await.fallbacks.clone()
    }

    /// Install records from a snapshot, marking every component unregistered
    ///
    /// Components must re-register with fresh instance uuids after a
    /// registry restart.
    pub(crate) async fn install_snapshot(
        &self,
        mut components: Vec<Component>,
        capabilities: Vec<Capability>,
        fallbacks: Vec<FallbackBinding>,
    ) {
        let mut state = self.state.write().await;
        state.components.clear();
        state.capabilities.clear();
        for component in components.iter_mut() {
            component.state = ComponentState::Unregistered;
            component.last_heartbeat = None;
            state.components.insert(component.id.clone(), component.clone());
        }
        for capability in capabilities {
            state.capabilities.entry(capability.name.clone()).or_default().push(capability);
        }
        state.fallbacks = fallbacks;
        state.ledger = HeartbeatLedger::new();
        state.readiness = ReadinessTracker::new();
    }

    /// Promote a component to ready when its conditions and dependencies
    /// allow, then cascade to dependents. Returns whether `id` promoted.
    fn promote_if_ready(state: &mut RegistryState, id: &str, events: &mut Vec<RegistryEvent>) -> bool {
        let promotable = |state: &RegistryState, id: &str| -> bool {
            let Some(component) = state.components.get(id) else {
                return false;
            };
            component.state == ComponentState::Initializing
                && state.readiness.all_satisfied(id)
                && component.dependencies.iter().all(|dep| {
                    state
                        .components
                        .get(dep)
                        .map(|d| d.state == ComponentState::Ready)
                        .unwrap_or(false)
                })
        };

        if !promotable(state, id) {
            return false;
        }

        let mut queue = vec![id.to_string()];
        let mut promoted_target = false;
        while let Some(current) = queue.pop() {
            if !promotable(state, &current) {
                continue;
            }
            let component = state.components.get_mut(&current).expect("promotable checked");
            if component.transition(ComponentState::Ready).is_ok() {
                events.push(RegistryEvent::ready(&current));
                if current == id {
                    promoted_target = true;
                }
                // Dependents may now be unblocked.
                let dependents: Vec<String> = state
                    .components
                    .values()
                    .filter(|c| c.dependencies.iter().any(|d| d == &current))
                    .map(|c| c.id.clone())
                    .collect();
                queue.extend(dependents);
            }
        }
        promoted_target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentKind;

    fn registry() -> ServiceRegistry {
        ServiceRegistry::new(HeartbeatConfig::default())
    }

    fn descriptor(id: &str) -> ComponentDescriptor {
        ComponentDescriptor {
            id: id.to_string(),
            name: id.to_string(),
            kind: ComponentKind::Service,
            version: "1.0.0".to_string(),
            capabilities: vec![],
            endpoints: vec![Endpoint::http("localhost", 8112, "/")],
            dependencies: vec![],
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_register_and_resolve() {
        let registry = registry();
        let mut desc = descriptor("apollo");
        desc.capabilities = vec!["predict@10".to_string()];
        registry.register(desc, Uuid::new_v4()).await.unwrap();

        let endpoints = registry.resolve_name("apollo").await.unwrap();
        assert_eq!(endpoints[0].port, 8112);

        let providers = registry.resolve_capability("predict").await.unwrap();
        assert_eq!(providers[0].provider_id, "apollo");
        assert_eq!(providers[0].level, 10);
    }

    #[tokio::test]
    async fn test_duplicate_registration_conflicts() {
        let registry = registry();
        registry.register(descriptor("apollo"), Uuid::new_v4()).await.unwrap();
        let err = registry.register(descriptor("apollo"), Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, RegistryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_failed_component_can_reregister_with_new_uuid() {
        let registry = registry();
        let first = Uuid::new_v4();
        registry.register(descriptor("apollo"), first).await.unwrap();
        registry.report_failed("apollo", "crashed").await.unwrap();

        let second = Uuid::new_v4();
        registry.register(descriptor("apollo"), second).await.unwrap();
        let component = registry.get("apollo").await.unwrap();
        assert_eq!(component.instance_uuid, second);
        assert_eq!(component.state, ComponentState::Ready);
    }

    #[tokio::test]
    async fn test_invalid_id_rejected() {
        let registry = registry();
        let err = registry.register(descriptor("Apollo"), Uuid::new_v4()).await;
        assert!(matches!(err, Err(RegistryError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_stale_heartbeat_rejected() {
        let registry = registry();
        registry.register(descriptor("apollo"), Uuid::new_v4()).await.unwrap();
        let err = registry
            .heartbeat("apollo", Uuid::new_v4(), HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Stale { .. }));
    }

    #[tokio::test]
    async fn test_heartbeat_unknown_component() {
        let registry = registry();
        let err = registry
            .heartbeat("ghost", Uuid::new_v4(), HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Unknown(_)));
    }

    #[tokio::test]
    async fn test_sweep_degrades_then_fails() {
        let registry = registry();
        let uuid = Uuid::new_v4();
        registry.register(descriptor("apollo"), uuid).await.unwrap();

        let start = Instant::now();
        registry
            .heartbeat_at("apollo", uuid, HashMap::new(), start)
            .await
            .unwrap();

        // Exactly T1 elapsed classifies as degraded.
        registry.sweep(start + registry.heartbeat_config().t1()).await;
        assert_eq!(registry.get("apollo").await.unwrap().state, ComponentState::Degraded);

        registry.sweep(start + registry.heartbeat_config().t2()).await;
        assert_eq!(registry.get("apollo").await.unwrap().state, ComponentState::Failed);
    }

    #[tokio::test]
    async fn test_recovery_after_consecutive_heartbeats() {
        let registry = registry();
        let uuid = Uuid::new_v4();
        registry.register(descriptor("apollo"), uuid).await.unwrap();

        let start = Instant::now();
        registry.heartbeat_at("apollo", uuid, HashMap::new(), start).await.unwrap();
        registry.sweep(start + registry.heartbeat_config().t1()).await;
        assert_eq!(registry.get("apollo").await.unwrap().state, ComponentState::Degraded);

        // Three on-schedule heartbeats restore readiness.
        let tick = std::time::Duration::from_secs(10);
        let resume = start + registry.heartbeat_config().t1();
        for n in 1..=3u32 {
            registry
                .heartbeat_at("apollo", uuid, HashMap::new(), resume + tick * n)
                .await
                .unwrap();
        }
        assert_eq!(registry.get("apollo").await.unwrap().state, ComponentState::Ready);
    }

    #[tokio::test]
    async fn test_dependency_gates_readiness() {
        let registry = registry();
        let mut dependent = descriptor("athena");
        dependent.dependencies = vec!["hermes-store".to_string()];
        registry.register(dependent, Uuid::new_v4()).await.unwrap();
        assert_eq!(
            registry.get("athena").await.unwrap().state,
            ComponentState::Initializing
        );

        // Registering the dependency cascades readiness to the dependent.
        registry.register(descriptor("hermes-store"), Uuid::new_v4()).await.unwrap();
        assert_eq!(registry.get("athena").await.unwrap().state, ComponentState::Ready);
    }

    #[tokio::test]
    async fn test_dependency_cycle_rejected() {
        let registry = registry();
        let mut a = descriptor("alpha");
        a.dependencies = vec!["beta".to_string()];
        registry.register(a, Uuid::new_v4()).await.unwrap();

        let mut b = descriptor("beta");
        b.dependencies = vec!["alpha".to_string()];
        let err = registry.register(b, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, RegistryError::DependencyCycle(_)));
    }

    #[tokio::test]
    async fn test_capability_ordering_and_round_robin() {
        let registry = registry();
        for (id, decl) in [("alpha", "predict@5"), ("beta", "predict@5"), ("gamma", "predict@9")] {
            let mut desc = descriptor(id);
            desc.capabilities = vec![decl.to_string()];
            registry.register(desc, Uuid::new_v4()).await.unwrap();
        }

        // Highest level first on every resolution.
        let first = registry.resolve_capability("predict").await.unwrap();
        assert_eq!(first[0].provider_id, "gamma");

        // The level-5 tie rotates deterministically between calls.
        let second = registry.resolve_capability("predict").await.unwrap();
        assert_eq!(second[0].provider_id, "gamma");
        assert_ne!(first[1].provider_id, second[1].provider_id);
    }

    struct ScriptedInvoker {
        unavailable: Vec<String>,
    }

    #[async_trait]
    impl ProviderInvoker for ScriptedInvoker {
        async fn invoke(
            &self,
            provider: &Component,
            _capability: &str,
            _payload: &Value,
        ) -> transport::Result<Value> {
            if self.unavailable.contains(&provider.id) {
                Err(transport::TransportError::Unavailable(provider.id.clone()))
            } else {
                Ok(serde_json::json!({"answered_by": provider.id}))
            }
        }
    }

    #[tokio::test]
    async fn test_execute_with_fallback_applies_fallback() {
        let registry = registry();
        let mut primary = descriptor("apollo");
        primary.capabilities = vec!["predict@10".to_string()];
        registry.register(primary, Uuid::new_v4()).await.unwrap();
        registry.register(descriptor("rhetor"), Uuid::new_v4()).await.unwrap();

        registry
            .register_fallback(FallbackBinding {
                consumer_id: "aish".to_string(),
                capability_name: "predict".to_string(),
                provider_id: "rhetor".to_string(),
                level: 3,
                handler_ref: "rhetor::predict".to_string(),
            })
            .await;

        let invoker = ScriptedInvoker {
            unavailable: vec!["apollo".to_string()],
        };
        let outcome = registry
            .execute_with_fallback("aish", "predict", &serde_json::json!({}), &invoker)
            .await
            .unwrap();

        match outcome {
            FallbackOutcome::FallbackApplied { provider_id, attempted, .. } => {
                assert_eq!(provider_id, "rhetor");
                assert_eq!(attempted, vec!["apollo".to_string()]);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_execute_with_fallback_exhausted() {
        let registry = registry();
        let mut primary = descriptor("apollo");
        primary.capabilities = vec!["predict@10".to_string()];
        registry.register(primary, Uuid::new_v4()).await.unwrap();

        let invoker = ScriptedInvoker {
            unavailable: vec!["apollo".to_string()],
        };
        let err = registry
            .execute_with_fallback("aish", "predict", &serde_json::json!({}), &invoker)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NoFallbackAvailable(_)));
    }

    #[tokio::test]
    async fn test_logic_errors_surface_without_fallback() {
        let registry = registry();
        let mut primary = descriptor("apollo");
        primary.capabilities = vec!["predict@10".to_string()];
        registry.register(primary, Uuid::new_v4()).await.unwrap();

        struct LogicErrorInvoker;

        #[async_trait]
        impl ProviderInvoker for LogicErrorInvoker {
            async fn invoke(
                &self,
                _provider: &Component,
                _capability: &str,
                _payload: &Value,
            ) -> transport::Result<Value> {
                Err(transport::TransportError::Remote {
                    code: "invalid".to_string(),
                    message: "bad payload".to_string(),
                    details: None,
                })
            }
        }

        let err = registry
            .execute_with_fallback("aish", "predict", &serde_json::json!({}), &LogicErrorInvoker)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Transport(_)));
    }

    #[tokio::test]
    async fn test_events_published() {
        let registry = registry();
        let mut rx = registry.subscribe();
        registry.register(descriptor("apollo"), Uuid::new_v4()).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, RegistryEvent::Registered { .. }));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, RegistryEvent::Ready { .. }));
    }

    #[tokio::test]
    async fn test_unregister_removes_routing() {
        let registry = registry();
        let uuid = Uuid::new_v4();
        registry.register(descriptor("apollo"), uuid).await.unwrap();
        registry.unregister("apollo", uuid).await.unwrap();
        assert!(registry.resolve_name("apollo").await.is_err());
    }
}
