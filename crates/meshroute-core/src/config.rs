use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Serde helper to serialize/deserialize `std::time::Duration` as milliseconds (u64).
mod duration_ms {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

/// Timing and topology constants for the routing engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// How long a route request stays pending before it is reported as failed.
    #[serde(default = "default_path_discovery_time", with = "duration_ms", rename = "path_discovery_time_ms")]
    pub path_discovery_time: Duration,
    /// Lifetime of an installed route since it was last used.
    #[serde(default = "default_active_route_timeout", with = "duration_ms", rename = "active_route_timeout_ms")]
    pub active_route_timeout: Duration,
    /// Sleep between request-table sweeps.
    #[serde(default = "default_cleaner_interval", with = "duration_ms", rename = "request_cleaner_interval_ms")]
    pub request_cleaner_interval: Duration,
    /// How long an aged-out route lingers inactive before it is deleted.
    #[serde(default = "default_delete_period", with = "duration_ms", rename = "delete_period_ms")]
    pub delete_period: Duration,
    /// Upper bound an in-flight (active) request may outlive its deadline.
    #[serde(default = "default_active_grace_period", with = "duration_ms", rename = "active_grace_period_ms")]
    pub active_grace_period: Duration,
    /// Maximum hop count a route request may travel.
    #[serde(default = "default_net_diameter")]
    pub net_diameter: u32,
}

// Default value functions
fn default_path_discovery_time() -> Duration {
    // 200 ms average backoff * diameter * 2, plus net traversal time.
    Duration::from_millis(6_900)
}
fn default_active_route_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_cleaner_interval() -> Duration {
    Duration::from_secs(8)
}
fn default_delete_period() -> Duration {
    Duration::from_millis(2_500)
}
fn default_active_grace_period() -> Duration {
    Duration::from_millis(1_500)
}
fn default_net_diameter() -> u32 {
    15
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            path_discovery_time: default_path_discovery_time(),
            active_route_timeout: default_active_route_timeout(),
            request_cleaner_interval: default_cleaner_interval(),
            delete_period: default_delete_period(),
            active_grace_period: default_active_grace_period(),
            net_diameter: default_net_diameter(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RoutingConfig::default();
        assert_eq!(config.request_cleaner_interval, Duration::from_secs(8));
        assert_eq!(config.active_route_timeout, Duration::from_secs(30));
        assert_eq!(config.delete_period, Duration::from_millis(2_500));
        assert_eq!(config.net_diameter, 15);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: RoutingConfig = toml::from_str("path_discovery_time_ms = 250\n").unwrap();
        assert_eq!(config.path_discovery_time, Duration::from_millis(250));
        assert_eq!(config.request_cleaner_interval, Duration::from_secs(8));
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = RoutingConfig {
            net_diameter: 4,
            ..RoutingConfig::default()
        };
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        assert!(toml_str.contains("active_route_timeout_ms = 30000"));
        let decoded: RoutingConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(decoded, config);
    }
}
