use serde::{Deserialize, Serialize};
use std::time::Duration;
use utoipa::ToSchema;

use crate::health::HealthStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ServiceInstance {
    pub instance_id: String,
    /// Lowercased; lookups are case-insensitive.
    pub service_name: String,
    /// `host:port`, or a full base URL when the registry reports a scheme.
    pub address: String,
    pub health: HealthStatus,
    /// Milliseconds since the epoch.
    pub last_heartbeat: Option<u64>,
}

impl ServiceInstance {
    pub fn new(
        service_name: impl Into<String>,
        address: impl Into<String>,
        health: HealthStatus,
        last_heartbeat: Option<u64>,
    ) -> Self {
        let service_name = service_name.into().to_ascii_lowercase();
        let address = address.into();
        Self {
            instance_id: format!("{}@{}", service_name, address),
            service_name,
            address,
            health,
            last_heartbeat,
        }
    }

    pub fn with_instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = id.into();
        self
    }

    /// An instance without a reported heartbeat is never fresh.
    pub fn is_fresh(&self, now_millis: u64, staleness: Duration) -> bool {
        self.last_heartbeat
            .is_some_and(|beat| now_millis.saturating_sub(beat) <= staleness.as_millis() as u64)
    }

    pub fn is_routable(&self, now_millis: u64, staleness: Duration) -> bool {
        self.health == HealthStatus::Up && self.is_fresh(now_millis, staleness)
    }

    pub fn base_url(&self) -> String {
        if self.address.starts_with("http://") || self.address.starts_with("https://") {
            self.address.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", self.address)
        }
    }
}
