use std::net::SocketAddr;
use std::time::Duration;

use bearing_registry::{RegistryConfig, RegistryFormat};
use clap::Parser;

use crate::server::ProxySettings;

/// Gateway settings. Every flag can also come from the environment or a
/// `.env` file.
#[derive(Parser, Debug, Clone)]
#[command(name = "bearing-gateway")]
#[command(about = "Authenticating reverse proxy in front of a service registry", long_about = None)]
pub struct GatewayConfig {
    #[arg(long, env = "GATEWAY_LISTEN", default_value = "127.0.0.1:8000")]
    pub listen: SocketAddr,

    /// Base64-encoded HMAC key for bearer credentials
    #[arg(long, env = "TOKEN_SECRET", hide_env_values = true)]
    pub token_secret: String,

    #[arg(long, env = "REGISTRY_URL", default_value = "http://localhost:8761/eureka/apps")]
    pub registry_url: String,

    /// `eureka` or `flat`
    #[arg(long, env = "REGISTRY_FORMAT", default_value = "eureka")]
    pub registry_format: RegistryFormat,

    #[arg(long, env = "REGISTRY_REFRESH_SECS", default_value_t = 30)]
    pub refresh_interval_secs: u64,

    #[arg(long, env = "REGISTRY_BACKOFF_CEILING_SECS", default_value_t = 300)]
    pub backoff_ceiling_secs: u64,

    #[arg(long, env = "HEARTBEAT_STALENESS_SECS", default_value_t = 90)]
    pub heartbeat_staleness_secs: u64,

    #[arg(long, env = "MAX_SNAPSHOT_STALENESS_SECS", default_value_t = 300)]
    pub max_snapshot_staleness_secs: u64,

    #[arg(long, env = "REGISTRY_TIMEOUT_MS", default_value_t = 5_000)]
    pub registry_timeout_ms: u64,

    #[arg(long, env = "UPSTREAM_TIMEOUT_MS", default_value_t = 30_000)]
    pub upstream_timeout_ms: u64,

    /// Remove the Authorization header before forwarding
    #[arg(long, env = "STRIP_CREDENTIAL")]
    pub strip_credential: bool,

    /// Forward the full path instead of dropping the service segment
    #[arg(long, env = "KEEP_SERVICE_PREFIX")]
    pub keep_service_prefix: bool,

    /// Path prefixes reachable without a credential (comma separated)
    #[arg(long = "public-path", env = "PUBLIC_PATHS", value_delimiter = ',')]
    pub public_paths: Vec<String>,

    #[arg(long, env = "MAX_BODY_BYTES", default_value_t = 10 * 1024 * 1024)]
    pub max_body_bytes: usize,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

impl GatewayConfig {
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            refresh_interval: Duration::from_secs(self.refresh_interval_secs),
            backoff_ceiling: Duration::from_secs(self.backoff_ceiling_secs),
            heartbeat_staleness: Duration::from_secs(self.heartbeat_staleness_secs),
            max_snapshot_staleness: Duration::from_secs(self.max_snapshot_staleness_secs),
        }
    }

    pub fn proxy_settings(&self) -> ProxySettings {
        ProxySettings {
            strip_service_prefix: !self.keep_service_prefix,
            max_body_bytes: self.max_body_bytes,
        }
    }

    pub fn registry_timeout(&self) -> Duration {
        Duration::from_millis(self.registry_timeout_ms)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_registry_client() {
        let config = GatewayConfig::try_parse_from(["bearing-gateway", "--token-secret", "c2VjcmV0"]).unwrap();
        let registry = config.registry_config();
        let defaults = RegistryConfig::default();

        assert_eq!(registry.refresh_interval, defaults.refresh_interval);
        assert_eq!(registry.backoff_ceiling, defaults.backoff_ceiling);
        assert_eq!(registry.heartbeat_staleness, defaults.heartbeat_staleness);
        assert_eq!(registry.max_snapshot_staleness, defaults.max_snapshot_staleness);
        assert!(config.proxy_settings().strip_service_prefix);
        assert_eq!(config.registry_format, RegistryFormat::Eureka);
    }

    #[test]
    fn flags_override_defaults() {
        let config = GatewayConfig::try_parse_from([
            "bearing-gateway",
            "--token-secret",
            "c2VjcmV0",
            "--registry-format",
            "flat",
            "--public-path",
            "/users/login,/catalog",
            "--public-path",
            "/status",
            "--keep-service-prefix",
            "--upstream-timeout-ms",
            "250",
        ])
        .unwrap();

        assert_eq!(config.registry_format, RegistryFormat::Flat);
        assert_eq!(config.public_paths, vec!["/users/login", "/catalog", "/status"]);
        assert!(!config.proxy_settings().strip_service_prefix);
        assert_eq!(config.upstream_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn unknown_registry_format_is_rejected() {
        let result = GatewayConfig::try_parse_from([
            "bearing-gateway",
            "--token-secret",
            "c2VjcmV0",
            "--registry-format",
            "consul",
        ]);
        assert!(result.is_err());
    }
}
