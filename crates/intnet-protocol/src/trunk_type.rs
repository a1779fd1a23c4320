use serde::{Deserialize, Serialize};

/// How a network is connected to the outside world.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrunkType {
    /// Purely internal.
    #[default]
    None,
    /// Joins any existing network of that name regardless of its trunk.
    WhateverNone,
    /// Host network filter driver attached to a physical NIC.
    NetFlt,
    /// Host-only virtual adapter.
    NetAdp,
    /// Service (NAT) network; the service itself is a client interface.
    SrvNat,
}

impl TrunkType {
    pub fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            1 => Self::None,
            2 => Self::WhateverNone,
            3 => Self::NetFlt,
            4 => Self::NetAdp,
            5 => Self::SrvNat,
            _ => return None,
        })
    }

    pub fn to_u32(self) -> u32 {
        match self {
            Self::None => 1,
            Self::WhateverNone => 2,
            Self::NetFlt => 3,
            Self::NetAdp => 4,
            Self::SrvNat => 5,
        }
    }

    /// Whether a trunk name must be given.
    pub fn needs_trunk_name(self) -> bool {
        matches!(self, Self::NetFlt | Self::NetAdp)
    }

    /// Whether a driver is attached to networks of this type.
    pub fn has_driver(self) -> bool {
        self.needs_trunk_name()
    }

    /// Networks created without a real trunk default to restricted access.
    pub fn default_restricted(self) -> bool {
        matches!(self, Self::None | Self::WhateverNone | Self::SrvNat)
    }

    /// Joining requests of this type skip the trunk compatibility check.
    pub fn joins_any(self) -> bool {
        matches!(self, Self::WhateverNone | Self::SrvNat)
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if let Ok(n) = s.parse::<u32>() {
            return Self::from_u32(n);
        }
        Some(match s.to_ascii_lowercase().as_str() {
            "none" => Self::None,
            "whatever-none" | "whatevernone" => Self::WhateverNone,
            "netflt" | "bridged" => Self::NetFlt,
            "netadp" | "host-only" | "hostonly" => Self::NetAdp,
            "srvnat" | "nat" => Self::SrvNat,
            _ => return None,
        })
    }
}

impl core::fmt::Display for TrunkType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::WhateverNone => "whatever-none",
            Self::NetFlt => "netflt",
            Self::NetAdp => "netadp",
            Self::SrvNat => "srvnat",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_values_round_trip() {
        for v in 1..=5 {
            assert_eq!(TrunkType::from_u32(v).unwrap().to_u32(), v);
        }
        assert_eq!(TrunkType::from_u32(0), None);
        assert_eq!(TrunkType::from_u32(6), None);
    }

    #[test]
    fn parses_names_and_numbers() {
        assert_eq!(TrunkType::parse("3"), Some(TrunkType::NetFlt));
        assert_eq!(TrunkType::parse("host-only"), Some(TrunkType::NetAdp));
        assert_eq!(TrunkType::parse("NetFlt"), Some(TrunkType::NetFlt));
        assert_eq!(TrunkType::parse("bogus"), None);
    }
}
