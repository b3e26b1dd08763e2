//! Node configuration loading and management.

use meshroute_core::{Address, RoutingConfig, RoutingPolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Full configuration for the meshroute host.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodeConfig {
    /// Identity and policy of the local node.
    #[serde(default)]
    pub node: NodeSection,

    /// Routing engine timing constants.
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Simulated mesh settings.
    #[serde(default)]
    pub simulation: SimulationConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    /// Radio address of the local node; the simulated relays follow it.
    #[serde(default = "default_address")]
    pub address: Address,
    /// Routing policy (endnode, always, ifawake, shared-basestation).
    #[serde(default = "default_policy")]
    pub policy: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Number of nodes in the simulated line, including the local node.
    #[serde(default = "default_nodes")]
    pub nodes: usize,
    /// Probability in `[0, 1]` that any single frame is lost.
    #[serde(default)]
    pub link_loss: f64,
    /// Neighbor advertisement period in milliseconds; 0 disables adverts.
    #[serde(default = "default_advertise_interval_ms")]
    pub advertise_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (text, json).
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_address() -> Address {
    Address(0x0013_A200_0000_0001)
}
fn default_policy() -> String {
    "ifawake".into()
}
fn default_nodes() -> usize {
    3
}
fn default_advertise_interval_ms() -> u64 {
    10_000
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            address: default_address(),
            policy: default_policy(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            nodes: default_nodes(),
            link_loss: 0.0,
            advertise_interval_ms: default_advertise_interval_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl NodeConfig {
    /// Load config from a TOML file, falling back to defaults for missing fields.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: NodeConfig = toml::from_str(&contents)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save the current config to a TOML file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// The configured routing policy.
    pub fn policy(&self) -> anyhow::Result<RoutingPolicy> {
        Ok(self.node.policy.parse()?)
    }

    /// Addresses of the simulated line, starting with the local node.
    pub fn addresses(&self) -> Vec<Address> {
        let first = self.node.address.as_u64();
        (0..self.simulation.nodes.max(1) as u64)
            .map(|i| Address(first.wrapping_add(i)))
            .collect()
    }

    pub fn advertise_interval(&self) -> Option<Duration> {
        match self.simulation.advertise_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}
