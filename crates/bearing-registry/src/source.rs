use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use bearing_core::{HealthStatus, RegistryError, RegistrySource, ServiceInstance};
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

/// Wire format of the registry listing endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryFormat {
    /// A JSON array of `{serviceName, address, health, lastHeartbeat}` entries.
    Flat,
    /// Eureka's `GET /eureka/apps` document.
    Eureka,
}

impl FromStr for RegistryFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "flat" => Ok(RegistryFormat::Flat),
            "eureka" => Ok(RegistryFormat::Eureka),
            other => Err(format!("unknown registry format '{}', expected flat or eureka", other)),
        }
    }
}

impl fmt::Display for RegistryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryFormat::Flat => f.write_str("flat"),
            RegistryFormat::Eureka => f.write_str("eureka"),
        }
    }
}

pub struct HttpRegistrySource {
    client: Client,
    url: String,
    format: RegistryFormat,
}

impl HttpRegistrySource {
    pub fn new(url: impl Into<String>, format: RegistryFormat, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            format,
        })
    }
}

#[async_trait::async_trait]
impl RegistrySource for HttpRegistrySource {
    async fn list_instances(&self) -> Result<Vec<ServiceInstance>, RegistryError> {
        let res = self
            .client
            .get(&self.url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| RegistryError::Transport(e.to_string()))?;

        if !res.status().is_success() {
            return Err(RegistryError::Status(res.status().as_u16()));
        }

        let body: Value = res
            .json()
            .await
            .map_err(|e| RegistryError::Malformed(e.to_string()))?;

        match self.format {
            RegistryFormat::Flat => parse_flat(body),
            RegistryFormat::Eureka => parse_eureka(body),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlatEntry {
    service_name: String,
    address: String,
    #[serde(default)]
    health: Option<String>,
    #[serde(default)]
    last_heartbeat: Option<u64>,
    #[serde(default)]
    instance_id: Option<String>,
}

/// Parses the flat listing. Entries without a service name or address are
/// skipped; anything other than a JSON array is malformed.
pub fn parse_flat(body: Value) -> Result<Vec<ServiceInstance>, RegistryError> {
    let Value::Array(entries) = body else {
        return Err(RegistryError::Malformed("expected a JSON array of instances".into()));
    };

    let mut instances = Vec::with_capacity(entries.len());
    for entry in entries {
        match serde_json::from_value::<FlatEntry>(entry) {
            Ok(entry) => {
                let health = entry.health.as_deref().map(HealthStatus::parse).unwrap_or_default();
                let mut instance = ServiceInstance::new(entry.service_name, entry.address, health, entry.last_heartbeat);
                if let Some(id) = entry.instance_id {
                    instance = instance.with_instance_id(id);
                }
                instances.push(instance);
            }
            Err(e) => skip_entry(&e.to_string()),
        }
    }
    Ok(instances)
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

#[derive(Debug, Deserialize)]
struct EurekaDocument {
    applications: EurekaApplications,
}

#[derive(Debug, Deserialize)]
struct EurekaApplications {
    #[serde(default)]
    application: OneOrMany<EurekaApplication>,
}

#[derive(Debug, Deserialize)]
struct EurekaApplication {
    name: String,
    #[serde(default)]
    instance: OneOrMany<EurekaInstance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EurekaInstance {
    instance_id: Option<String>,
    host_name: Option<String>,
    ip_addr: Option<String>,
    status: Option<String>,
    port: Option<EurekaPort>,
    secure_port: Option<EurekaPort>,
    lease_info: Option<EurekaLease>,
    last_updated_timestamp: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct EurekaPort {
    #[serde(rename = "$")]
    number: u16,
    #[serde(rename = "@enabled", default)]
    enabled: Value,
}

impl EurekaPort {
    fn is_enabled(&self, default: bool) -> bool {
        match &self.enabled {
            Value::Bool(flag) => *flag,
            Value::String(flag) => flag.eq_ignore_ascii_case("true"),
            _ => default,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EurekaLease {
    last_renewal_timestamp: Option<u64>,
}

/// Parses Eureka's application listing into instances.
pub fn parse_eureka(body: Value) -> Result<Vec<ServiceInstance>, RegistryError> {
    let document: EurekaDocument =
        serde_json::from_value(body).map_err(|e| RegistryError::Malformed(e.to_string()))?;

    let mut instances = Vec::new();
    for application in document.applications.application.into_vec() {
        for raw in application.instance.into_vec() {
            let Some(host) = raw.ip_addr.clone().or_else(|| raw.host_name.clone()) else {
                skip_entry("instance without ipAddr or hostName");
                continue;
            };

            let plain = raw.port.as_ref().filter(|p| p.is_enabled(true));
            let secure = raw.secure_port.as_ref().filter(|p| p.is_enabled(false));
            let address = match (plain, secure, raw.port.as_ref()) {
                (Some(port), _, _) => format!("{}:{}", host, port.number),
                (None, Some(port), _) => format!("https://{}:{}", host, port.number),
                (None, None, Some(port)) => format!("{}:{}", host, port.number),
                (None, None, None) => {
                    skip_entry("instance without a port");
                    continue;
                }
            };

            let health = raw.status.as_deref().map(HealthStatus::parse).unwrap_or_default();
            let heartbeat = raw
                .lease_info
                .as_ref()
                .and_then(|lease| lease.last_renewal_timestamp)
                .or(raw.last_updated_timestamp);

            let mut instance = ServiceInstance::new(&application.name, address, health, heartbeat);
            if let Some(id) = raw.instance_id {
                instance = instance.with_instance_id(id);
            }
            instances.push(instance);
        }
    }
    Ok(instances)
}

fn skip_entry(reason: &str) {
    tracing::warn!(reason = %reason, "Skipping unusable registry entry");
    metrics::counter!("registry_entries_skipped_total").increment(1);
}
