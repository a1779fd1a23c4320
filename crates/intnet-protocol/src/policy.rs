//! Typed view of the policy bits.
//!
//! [`OpenFlags`] stays the wire encoding; these types are what code reasons
//! about. Each dimension is either unspecified or one of two sides, and may be
//! fixed.

use crate::flags::{OpenFlags, PolicyPair, IF_PAIRS, NET_PAIRS};
use serde::{Deserialize, Serialize};

/// One side of a policy pair.
pub trait Side: Copy + Eq {
    const RESTRICTIVE: Self;
    const RELAXED: Self;

    fn is_restrictive(self) -> bool {
        self == Self::RESTRICTIVE
    }

    fn from_pair(flags: OpenFlags, pair: &PolicyPair) -> Option<Self> {
        if flags.contains(pair.restrictive) {
            Some(Self::RESTRICTIVE)
        } else if flags.contains(pair.relaxed) {
            Some(Self::RELAXED)
        } else {
            None
        }
    }

    fn to_bit(self, pair: &PolicyPair) -> OpenFlags {
        if self.is_restrictive() {
            pair.restrictive
        } else {
            pair.relaxed
        }
    }
}

macro_rules! side {
    ($(#[$meta:meta])* $name:ident { $restrictive:ident, $relaxed:ident }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "kebab-case")]
        pub enum $name {
            $restrictive,
            $relaxed,
        }

        impl Side for $name {
            const RESTRICTIVE: Self = Self::$restrictive;
            const RELAXED: Self = Self::$relaxed;
        }
    };
}

side!(
    /// Who may open the network.
    Access { Restricted, Public }
);
side!(Promisc { Deny, Allow });
side!(Link { Disabled, Enabled });
side!(
    /// Whether a trunk direction listens to all traffic or only its own.
    Mode { Chaste, Promisc }
);
side!(
    /// Whether a promiscuous interface also sees trunk traffic.
    TrunkVisibility { NoTrunk, SeeTrunk }
);

/// A policy dimension: an optional choice and the fixed marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fixable<T> {
    pub value: Option<T>,
    pub fixed: bool,
}

impl<T> Default for Fixable<T> {
    fn default() -> Self {
        Self {
            value: None,
            fixed: false,
        }
    }
}

impl<T: Side> Fixable<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: Some(value),
            fixed: false,
        }
    }

    pub fn fixed(value: T) -> Self {
        Self {
            value: Some(value),
            fixed: true,
        }
    }

    fn decode(flags: OpenFlags, pair: &PolicyPair) -> Self {
        Self {
            value: T::from_pair(flags, pair),
            fixed: flags.contains(pair.fixed),
        }
    }

    fn encode(&self, pair: &PolicyPair) -> OpenFlags {
        let mut out = self.value.map_or(OpenFlags::empty(), |v| v.to_bit(pair));
        if self.fixed {
            out |= pair.fixed;
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TrunkPolicy {
    pub link: Fixable<Link>,
    pub mode: Fixable<Mode>,
}

/// Network-wide policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct NetPolicy {
    pub access: Fixable<Access>,
    pub promisc_clients: Fixable<Promisc>,
    pub promisc_host: Fixable<Promisc>,
    pub promisc_wire: Fixable<Promisc>,
    pub host: TrunkPolicy,
    pub wire: TrunkPolicy,
    pub shared_mac_on_wire: bool,
}

impl NetPolicy {
    pub fn from_flags(flags: OpenFlags) -> Self {
        let p = &NET_PAIRS;
        Self {
            access: Fixable::decode(flags, &p[0]),
            promisc_clients: Fixable::decode(flags, &p[1]),
            promisc_host: Fixable::decode(flags, &p[2]),
            promisc_wire: Fixable::decode(flags, &p[3]),
            host: TrunkPolicy {
                link: Fixable::decode(flags, &p[4]),
                mode: Fixable::decode(flags, &p[5]),
            },
            wire: TrunkPolicy {
                link: Fixable::decode(flags, &p[6]),
                mode: Fixable::decode(flags, &p[7]),
            },
            shared_mac_on_wire: flags.contains(OpenFlags::SHARED_MAC_ON_WIRE),
        }
    }

    pub fn to_flags(&self) -> OpenFlags {
        let p = &NET_PAIRS;
        let mut out = self.access.encode(&p[0])
            | self.promisc_clients.encode(&p[1])
            | self.promisc_host.encode(&p[2])
            | self.promisc_wire.encode(&p[3])
            | self.host.link.encode(&p[4])
            | self.host.mode.encode(&p[5])
            | self.wire.link.encode(&p[6])
            | self.wire.mode.encode(&p[7]);
        if self.shared_mac_on_wire {
            out |= OpenFlags::SHARED_MAC_ON_WIRE;
        }
        out
    }

    pub fn is_restricted(&self) -> bool {
        self.access.value == Some(Access::Restricted)
    }
}

/// Per-interface policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct IfPolicy {
    pub promisc: Fixable<Promisc>,
    pub trunk: Fixable<TrunkVisibility>,
}

impl IfPolicy {
    pub fn from_flags(flags: OpenFlags) -> Self {
        Self {
            promisc: Fixable::decode(flags, &IF_PAIRS[0]),
            trunk: Fixable::decode(flags, &IF_PAIRS[1]),
        }
    }

    pub fn to_flags(&self) -> OpenFlags {
        self.promisc.encode(&IF_PAIRS[0]) | self.trunk.encode(&IF_PAIRS[1])
    }
}

/// Whether every network pair restrictive in `than` is also restrictive in
/// `flags`.
pub fn at_least_as_restrictive(flags: OpenFlags, than: OpenFlags) -> bool {
    NET_PAIRS
        .iter()
        .all(|pair| !than.contains(pair.restrictive) || flags.contains(pair.restrictive))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_typed_view() {
        let flags = OpenFlags::ACCESS_RESTRICTED
            | OpenFlags::ACCESS_FIXED
            | OpenFlags::TRUNK_WIRE_ENABLED
            | OpenFlags::TRUNK_WIRE_PROMISC_MODE
            | OpenFlags::SHARED_MAC_ON_WIRE;
        let policy = NetPolicy::from_flags(flags);
        assert_eq!(policy.access, Fixable::fixed(Access::Restricted));
        assert!(policy.is_restricted());
        assert_eq!(policy.wire.link.value, Some(Link::Enabled));
        assert_eq!(policy.wire.mode.value, Some(Mode::Promisc));
        assert_eq!(policy.host.link.value, None);
        assert!(policy.shared_mac_on_wire);
        assert_eq!(policy.to_flags(), flags);
    }

    #[test]
    fn interface_policy_defaults() {
        let policy = IfPolicy::from_flags(OpenFlags::IF_DEFAULTS);
        assert_eq!(policy.promisc, Fixable::new(Promisc::Allow));
        assert_eq!(policy.trunk, Fixable::new(TrunkVisibility::SeeTrunk));
        assert_eq!(policy.to_flags(), OpenFlags::IF_DEFAULTS);
    }

    #[test]
    fn restrictiveness_ordering() {
        let strict = OpenFlags::ACCESS_RESTRICTED | OpenFlags::PROMISC_DENY_CLIENTS;
        assert!(at_least_as_restrictive(strict, OpenFlags::ACCESS_RESTRICTED));
        assert!(!at_least_as_restrictive(OpenFlags::ACCESS_PUBLIC, strict));
        assert!(at_least_as_restrictive(OpenFlags::empty(), OpenFlags::ACCESS_PUBLIC));
    }

    #[test]
    fn serializes_as_kebab_case() {
        let json = serde_json::to_string(&Fixable::fixed(Access::Restricted)).unwrap();
        assert_eq!(json, r#"{"value":"restricted","fixed":true}"#);
    }
}
