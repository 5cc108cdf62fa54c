use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Up,
    Down,
    #[default]
    Unknown,
}

impl HealthStatus {
    /// Maps a registry-reported status string. Anything unrecognised is
    /// `Unknown`, which keeps the instance out of routing.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "UP" => HealthStatus::Up,
            "DOWN" | "OUT_OF_SERVICE" => HealthStatus::Down,
            _ => HealthStatus::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_registry_statuses() {
        assert_eq!(HealthStatus::parse("UP"), HealthStatus::Up);
        assert_eq!(HealthStatus::parse("up"), HealthStatus::Up);
        assert_eq!(HealthStatus::parse("DOWN"), HealthStatus::Down);
        assert_eq!(HealthStatus::parse("OUT_OF_SERVICE"), HealthStatus::Down);
        assert_eq!(HealthStatus::parse("STARTING"), HealthStatus::Unknown);
        assert_eq!(HealthStatus::parse(""), HealthStatus::Unknown);
    }

    #[test]
    fn serializes_in_registry_casing() {
        assert_eq!(serde_json::to_string(&HealthStatus::Up).unwrap(), "\"UP\"");
        let parsed: HealthStatus = serde_json::from_str("\"DOWN\"").unwrap();
        assert_eq!(parsed, HealthStatus::Down);
    }
}
