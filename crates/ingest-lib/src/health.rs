//! Component health for the ingestion pipeline
//!
//! The synchronizer reports queue and store trouble here; the agent serves
//! the aggregate as liveness and readiness.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Parts of the pipeline that report health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Queue,
    Synchronizer,
    LocalStore,
}

impl Component {
    /// Every component the agent registers at startup
    pub const ALL: [Component; 3] = [
        Component::Queue,
        Component::Synchronizer,
        Component::LocalStore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Queue => "queue",
            Component::Synchronizer => "synchronizer",
            Component::LocalStore => "local_store",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered from best to worst, so the aggregate is the maximum
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Points are still accepted and kept queued
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// When the component last changed status or message
    pub since: DateTime<Utc>,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            since: Utc::now(),
        }
    }
}

/// Body of the liveness endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<Component, ComponentHealth>,
}

/// Body of the readiness endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Default)]
struct RegistryState {
    components: BTreeMap<Component, ComponentHealth>,
    ready: bool,
}

/// Shared health state. Clones report into the same registry.
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `component` as healthy
    pub async fn register(&self, component: Component) {
        self.set(component, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_healthy(&self, component: Component) {
        self.set(component, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_degraded(&self, component: Component, message: impl Into<String>) {
        self.set(component, ComponentStatus::Degraded, Some(message.into()))
            .await;
    }

    pub async fn set_unhealthy(&self, component: Component, message: impl Into<String>) {
        self.set(component, ComponentStatus::Unhealthy, Some(message.into()))
            .await;
    }

    async fn set(&self, component: Component, status: ComponentStatus, message: Option<String>) {
        let mut state = self.state.write().await;
        let unchanged = state
            .components
            .get(&component)
            .is_some_and(|h| h.status == status && h.message == message);
        if !unchanged {
            state
                .components
                .insert(component, ComponentHealth::new(status, message));
        }
    }

    pub async fn component(&self, component: Component) -> Option<ComponentHealth> {
        self.state.read().await.components.get(&component).cloned()
    }

    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.ready = ready;
    }

    /// Worst status across registered components; healthy when none are
    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        let status = state
            .components
            .values()
            .map(|h| h.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);
        HealthResponse {
            status,
            components: state.components.clone(),
        }
    }

    /// Ready once started, until some component turns unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;
        let reason = if !state.ready {
            Some("Queue and synchronizer not yet started".to_string())
        } else {
            state
                .components
                .iter()
                .find(|(_, h)| h.status == ComponentStatus::Unhealthy)
                .map(|(component, _)| format!("Component {} unhealthy", component))
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn registry_with_all() -> HealthRegistry {
        let registry = HealthRegistry::new();
        for component in Component::ALL {
            registry.register(component).await;
        }
        registry
    }

    #[tokio::test]
    async fn test_empty_registry_is_healthy_but_not_ready() {
        let registry = HealthRegistry::new();

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert!(readiness.reason.is_some());
    }

    #[tokio::test]
    async fn test_store_failure_degrades_then_recovers() {
        let registry = registry_with_all().await;

        registry
            .set_degraded(Component::LocalStore, "database is locked")
            .await;
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert_eq!(
            health.components[&Component::LocalStore].message.as_deref(),
            Some("database is locked")
        );

        registry.set_healthy(Component::LocalStore).await;
        assert_eq!(registry.health().await.status, ComponentStatus::Healthy);
        assert!(registry
            .component(Component::LocalStore)
            .await
            .unwrap()
            .message
            .is_none());
    }

    #[tokio::test]
    async fn test_unhealthy_outranks_degraded() {
        let registry = registry_with_all().await;

        registry.set_degraded(Component::Queue, "corrupt record").await;
        registry
            .set_unhealthy(Component::Synchronizer, "worker stopped")
            .await;

        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_repeated_report_keeps_since() {
        let registry = registry_with_all().await;
        registry.set_degraded(Component::Queue, "corrupt record").await;
        let first = registry.component(Component::Queue).await.unwrap().since;

        registry.set_degraded(Component::Queue, "corrupt record").await;
        assert_eq!(
            registry.component(Component::Queue).await.unwrap().since,
            first
        );
    }

    #[tokio::test]
    async fn test_readiness_names_unhealthy_component() {
        let registry = registry_with_all().await;
        registry.set_ready(true).await;
        assert!(registry.readiness().await.ready);

        registry
            .set_unhealthy(Component::Synchronizer, "worker stopped")
            .await;

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(
            readiness.reason.as_deref(),
            Some("Component synchronizer unhealthy")
        );
    }

    #[tokio::test]
    async fn test_components_serialize_by_name() {
        let registry = registry_with_all().await;

        let json = serde_json::to_value(registry.health().await).unwrap();

        assert_eq!(json["status"], "healthy");
        for component in Component::ALL {
            assert_eq!(json["components"][component.as_str()]["status"], "healthy");
        }
    }
}
