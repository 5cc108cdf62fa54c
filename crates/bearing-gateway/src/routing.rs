use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bearing_core::{RouteError, ServiceInstance};
use bearing_registry::RegistryClient;
use dashmap::DashMap;

/// Picks an upstream instance per request, round-robin over each service's
/// healthy set. The only state it owns is the per-service cursor.
pub struct Router {
    registry: Arc<RegistryClient>,
    cursors: DashMap<String, AtomicUsize>,
}

impl Router {
    pub fn new(registry: Arc<RegistryClient>) -> Self {
        Self {
            registry,
            cursors: DashMap::new(),
        }
    }

    pub fn select(&self, service_name: &str) -> Result<ServiceInstance, RouteError> {
        let snapshot = self.registry.current_snapshot().ok_or(RouteError::RegistryUnavailable)?;
        let healthy = snapshot.healthy(service_name);
        if healthy.is_empty() {
            return Err(RouteError::NoAvailableInstance(service_name.to_string()));
        }
        let position = self.advance(service_name) % healthy.len();
        Ok(healthy[position].clone())
    }

    /// Next healthy instance other than `failed`, for the single retry after a
    /// refused connection.
    pub fn select_alternate(&self, service_name: &str, failed: &ServiceInstance) -> Result<ServiceInstance, RouteError> {
        let snapshot = self.registry.current_snapshot().ok_or(RouteError::RegistryUnavailable)?;
        let candidates: Vec<&ServiceInstance> = snapshot
            .healthy(service_name)
            .iter()
            .filter(|instance| instance.instance_id != failed.instance_id)
            .collect();
        if candidates.is_empty() {
            return Err(RouteError::NoAvailableInstance(service_name.to_string()));
        }
        let position = self.advance(service_name) % candidates.len();
        Ok(candidates[position].clone())
    }

    fn advance(&self, service_name: &str) -> usize {
        let key = service_name.to_ascii_lowercase();
        if let Some(cursor) = self.cursors.get(&key) {
            return cursor.fetch_add(1, Ordering::Relaxed);
        }
        self.cursors
            .entry(key)
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed)
    }
}
