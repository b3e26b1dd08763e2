use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// A 64-bit IEEE radio address.
///
/// Displayed in canonical dotted-hex notation: four upper-case groups of four
/// hex digits, most significant first (e.g. `0000.0000.0013.A200`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub u64);

impl Address {
    /// The link-layer broadcast address.
    pub const BROADCAST: Address = Address(0xFFFF);

    /// Create an address from its raw 64-bit value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw 64-bit value.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Returns true for the link-layer broadcast address.
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Dotted-hex rendering of this address.
    pub fn to_dotted_hex(&self) -> String {
        self.to_string()
    }

    /// Parse strict dotted-hex notation (`XXXX.XXXX.XXXX.XXXX`).
    fn parse_dotted_hex(s: &str) -> Option<u64> {
        let groups: Vec<&str> = s.split('.').collect();
        if groups.len() != 4 {
            return None;
        }
        let mut result: u64 = 0;
        for group in groups {
            if group.len() != 4 {
                return None;
            }
            let block = u16::from_str_radix(group, 16).ok()?;
            result = (result << 16) | u64::from(block);
        }
        Some(result)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = self.0;
        write!(
            f,
            "{:04X}.{:04X}.{:04X}.{:04X}",
            (a >> 48) & 0xFFFF,
            (a >> 32) & 0xFFFF,
            (a >> 16) & 0xFFFF,
            a & 0xFFFF
        )
    }
}

impl FromStr for Address {
    type Err = CoreError;

    /// Accepts dotted hex, a `0x`-prefixed hex literal, or a decimal value.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(raw) = Self::parse_dotted_hex(s) {
            return Ok(Self(raw));
        }
        let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => s.parse::<u64>(),
        };
        parsed
            .map(Self)
            .map_err(|_| CoreError::InvalidAddress(s.to_string()))
    }
}

impl From<u64> for Address {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The node's routing policy.
///
/// The four flags are independent so that consumers can test exactly the
/// property they care about; the named constructors produce the policy kinds
/// a node is normally configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoutingPolicy {
    /// Forward packets for other nodes at all times.
    pub route_always: bool,
    /// Only consume routes; never forward RREQ/RREP for others.
    pub end_node: bool,
    /// Deep sleep is permitted under this policy.
    pub may_sleep: bool,
    /// Pass broadcasts through without decrementing the hop count.
    pub bridge_broadcasts: bool,
}

impl RoutingPolicy {
    /// A routing consumer only.
    pub const fn end_node() -> Self {
        Self {
            route_always: false,
            end_node: true,
            may_sleep: true,
            bridge_broadcasts: false,
        }
    }

    /// Route all packets and keep the node out of deep sleep.
    pub const fn always() -> Self {
        Self {
            route_always: true,
            end_node: false,
            may_sleep: false,
            bridge_broadcasts: false,
        }
    }

    /// Route all packets, but only while awake.
    pub const fn if_awake() -> Self {
        Self {
            route_always: false,
            end_node: false,
            may_sleep: true,
            bridge_broadcasts: false,
        }
    }

    /// A shared basestation: route always and bridge broadcasts.
    pub const fn shared_basestation() -> Self {
        Self {
            route_always: true,
            end_node: false,
            may_sleep: false,
            bridge_broadcasts: true,
        }
    }

    /// Whether this node forwards discovery traffic for other nodes.
    pub fn forwards(&self) -> bool {
        !self.end_node
    }

    fn preset_name(&self) -> Option<&'static str> {
        if *self == Self::end_node() {
            Some("endnode")
        } else if *self == Self::always() {
            Some("always")
        } else if *self == Self::if_awake() {
            Some("ifawake")
        } else if *self == Self::shared_basestation() {
            Some("shared-basestation")
        } else {
            None
        }
    }
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self::if_awake()
    }
}

impl fmt::Display for RoutingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.preset_name() {
            Some(name) => write!(f, "{}", name),
            None => write!(
                f,
                "custom(route_always={}, end_node={}, may_sleep={}, bridge_broadcasts={})",
                self.route_always, self.end_node, self.may_sleep, self.bridge_broadcasts
            ),
        }
    }
}

impl FromStr for RoutingPolicy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "endnode" | "end-node" | "false" => Ok(Self::end_node()),
            "always" => Ok(Self::always()),
            "ifawake" | "if-awake" | "true" => Ok(Self::if_awake()),
            "shared-basestation" | "sharedbasestation" => Ok(Self::shared_basestation()),
            other => Err(CoreError::UnknownPolicy(other.to_string())),
        }
    }
}
