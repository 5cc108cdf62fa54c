use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use utoipa::ToSchema;

use crate::{RegistryError, ServiceInstance};

/// Where instance listings come from.
#[async_trait::async_trait]
pub trait RegistrySource: Send + Sync {
    async fn list_instances(&self) -> Result<Vec<ServiceInstance>, RegistryError>;
}

/// Immutable point-in-time view of the registry.
///
/// `healthy` only holds instances that were UP and heartbeating at build time,
/// ordered by instance id. `instances` keeps everything the registry reported so
/// excluded entries stay visible.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RegistrySnapshot {
    built_at: u64,
    healthy: HashMap<String, Vec<ServiceInstance>>,
    instances: Vec<ServiceInstance>,
}

impl RegistrySnapshot {
    pub fn build(mut instances: Vec<ServiceInstance>, now_millis: u64, heartbeat_staleness: Duration) -> Self {
        instances.sort_by(|a, b| {
            a.service_name
                .cmp(&b.service_name)
                .then_with(|| a.instance_id.cmp(&b.instance_id))
        });
        instances.dedup_by(|a, b| a.service_name == b.service_name && a.instance_id == b.instance_id);

        let mut healthy: HashMap<String, Vec<ServiceInstance>> = HashMap::new();
        for instance in &instances {
            if instance.is_routable(now_millis, heartbeat_staleness) {
                healthy
                    .entry(instance.service_name.clone())
                    .or_default()
                    .push(instance.clone());
            }
        }

        Self {
            built_at: now_millis,
            healthy,
            instances,
        }
    }

    pub fn built_at(&self) -> u64 {
        self.built_at
    }

    pub fn healthy(&self, service_name: &str) -> &[ServiceInstance] {
        self.healthy
            .get(&service_name.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn instances(&self) -> &[ServiceInstance] {
        &self.instances
    }

    pub fn healthy_count(&self) -> usize {
        self.healthy.values().map(Vec::len).sum()
    }

    /// Names of services with at least one healthy instance, sorted.
    pub fn services(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.healthy.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn age(&self, now_millis: u64) -> Duration {
        Duration::from_millis(now_millis.saturating_sub(self.built_at))
    }
}
