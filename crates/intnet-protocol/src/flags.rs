//! Open flags: the wire encoding of network and interface policy.
//!
//! Every policy dimension is a restrictive/relaxed bit pair plus a "fixed" bit
//! shared by a group of pairs. Setting both bits of one pair is invalid.

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct OpenFlags: u32 {
        const ACCESS_PUBLIC = 1 << 0;
        const ACCESS_RESTRICTED = 1 << 1;
        const ACCESS_FIXED = 1 << 2;
        const SHARED_MAC_ON_WIRE = 1 << 3;

        const PROMISC_ALLOW_CLIENTS = 1 << 4;
        const PROMISC_DENY_CLIENTS = 1 << 5;
        const PROMISC_ALLOW_TRUNK_HOST = 1 << 6;
        const PROMISC_DENY_TRUNK_HOST = 1 << 7;
        const PROMISC_ALLOW_TRUNK_WIRE = 1 << 8;
        const PROMISC_DENY_TRUNK_WIRE = 1 << 9;
        const PROMISC_FIXED = 1 << 10;

        const TRUNK_HOST_ENABLED = 1 << 11;
        const TRUNK_HOST_DISABLED = 1 << 12;
        const TRUNK_HOST_PROMISC_MODE = 1 << 13;
        const TRUNK_HOST_CHASTE_MODE = 1 << 14;
        const TRUNK_WIRE_ENABLED = 1 << 15;
        const TRUNK_WIRE_DISABLED = 1 << 16;
        const TRUNK_WIRE_PROMISC_MODE = 1 << 17;
        const TRUNK_WIRE_CHASTE_MODE = 1 << 18;
        const TRUNK_FIXED = 1 << 19;

        const IF_PROMISC_ALLOW = 1 << 20;
        const IF_PROMISC_DENY = 1 << 21;
        const IF_PROMISC_SEE_TRUNK = 1 << 22;
        const IF_PROMISC_NO_TRUNK = 1 << 23;
        const IF_FIXED = 1 << 24;

        const REQUIRE_AS_RESTRICTIVE_POLICIES = 1 << 25;
        const REQUIRE_EXACT = 1 << 26;

        /// Opaque platform hint; passes through without validation.
        const WORKAROUND_1 = 1 << 27;
    }
}

/// Every bit a caller may pass.
pub const MASK: u32 = 0x0FFF_FFFF;

/// One policy dimension: its restrictive bit, relaxed bit, and the fixed bit
/// that freezes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyPair {
    pub restrictive: OpenFlags,
    pub relaxed: OpenFlags,
    pub fixed: OpenFlags,
}

impl PolicyPair {
    const fn new(restrictive: OpenFlags, relaxed: OpenFlags, fixed: OpenFlags) -> Self {
        Self {
            restrictive,
            relaxed,
            fixed,
        }
    }

    pub fn both(&self) -> OpenFlags {
        self.restrictive | self.relaxed
    }

    /// Whether `flags` picks a side of this pair.
    pub fn specified_in(&self, flags: OpenFlags) -> bool {
        flags.intersects(self.both())
    }

    pub fn conflicts_in(&self, flags: OpenFlags) -> bool {
        flags.contains(self.both())
    }
}

/// Network-wide policy pairs.
pub const NET_PAIRS: [PolicyPair; 8] = [
    PolicyPair::new(
        OpenFlags::ACCESS_RESTRICTED,
        OpenFlags::ACCESS_PUBLIC,
        OpenFlags::ACCESS_FIXED,
    ),
    PolicyPair::new(
        OpenFlags::PROMISC_DENY_CLIENTS,
        OpenFlags::PROMISC_ALLOW_CLIENTS,
        OpenFlags::PROMISC_FIXED,
    ),
    PolicyPair::new(
        OpenFlags::PROMISC_DENY_TRUNK_HOST,
        OpenFlags::PROMISC_ALLOW_TRUNK_HOST,
        OpenFlags::PROMISC_FIXED,
    ),
    PolicyPair::new(
        OpenFlags::PROMISC_DENY_TRUNK_WIRE,
        OpenFlags::PROMISC_ALLOW_TRUNK_WIRE,
        OpenFlags::PROMISC_FIXED,
    ),
    PolicyPair::new(
        OpenFlags::TRUNK_HOST_DISABLED,
        OpenFlags::TRUNK_HOST_ENABLED,
        OpenFlags::TRUNK_FIXED,
    ),
    PolicyPair::new(
        OpenFlags::TRUNK_HOST_CHASTE_MODE,
        OpenFlags::TRUNK_HOST_PROMISC_MODE,
        OpenFlags::TRUNK_FIXED,
    ),
    PolicyPair::new(
        OpenFlags::TRUNK_WIRE_DISABLED,
        OpenFlags::TRUNK_WIRE_ENABLED,
        OpenFlags::TRUNK_FIXED,
    ),
    PolicyPair::new(
        OpenFlags::TRUNK_WIRE_CHASTE_MODE,
        OpenFlags::TRUNK_WIRE_PROMISC_MODE,
        OpenFlags::TRUNK_FIXED,
    ),
];

/// Per-interface policy pairs.
pub const IF_PAIRS: [PolicyPair; 2] = [
    PolicyPair::new(
        OpenFlags::IF_PROMISC_DENY,
        OpenFlags::IF_PROMISC_ALLOW,
        OpenFlags::IF_FIXED,
    ),
    PolicyPair::new(
        OpenFlags::IF_PROMISC_NO_TRUNK,
        OpenFlags::IF_PROMISC_SEE_TRUNK,
        OpenFlags::IF_FIXED,
    ),
];

impl OpenFlags {
    /// Union of the restrictive side of every pair.
    pub const STRICT_MASK: OpenFlags = OpenFlags::ACCESS_RESTRICTED
        .union(OpenFlags::PROMISC_DENY_CLIENTS)
        .union(OpenFlags::PROMISC_DENY_TRUNK_HOST)
        .union(OpenFlags::PROMISC_DENY_TRUNK_WIRE)
        .union(OpenFlags::TRUNK_HOST_DISABLED)
        .union(OpenFlags::TRUNK_HOST_CHASTE_MODE)
        .union(OpenFlags::TRUNK_WIRE_DISABLED)
        .union(OpenFlags::TRUNK_WIRE_CHASTE_MODE)
        .union(OpenFlags::IF_PROMISC_DENY)
        .union(OpenFlags::IF_PROMISC_NO_TRUNK);

    pub const FIXED_MASK: OpenFlags = OpenFlags::ACCESS_FIXED
        .union(OpenFlags::PROMISC_FIXED)
        .union(OpenFlags::TRUNK_FIXED)
        .union(OpenFlags::IF_FIXED);

    pub const IF_MASK: OpenFlags = OpenFlags::IF_PROMISC_ALLOW
        .union(OpenFlags::IF_PROMISC_DENY)
        .union(OpenFlags::IF_PROMISC_SEE_TRUNK)
        .union(OpenFlags::IF_PROMISC_NO_TRUNK)
        .union(OpenFlags::IF_FIXED);

    pub const REQUIRE_MASK: OpenFlags =
        OpenFlags::REQUIRE_AS_RESTRICTIVE_POLICIES.union(OpenFlags::REQUIRE_EXACT);

    /// Defaults for network pairs a creating request leaves unspecified
    /// (access is chosen from the trunk type).
    pub const NET_DEFAULTS: OpenFlags = OpenFlags::PROMISC_ALLOW_CLIENTS
        .union(OpenFlags::PROMISC_ALLOW_TRUNK_HOST)
        .union(OpenFlags::PROMISC_ALLOW_TRUNK_WIRE)
        .union(OpenFlags::TRUNK_HOST_ENABLED)
        .union(OpenFlags::TRUNK_HOST_CHASTE_MODE)
        .union(OpenFlags::TRUNK_WIRE_ENABLED)
        .union(OpenFlags::TRUNK_WIRE_CHASTE_MODE);

    /// Defaults for interface pairs a request leaves unspecified.
    pub const IF_DEFAULTS: OpenFlags =
        OpenFlags::IF_PROMISC_ALLOW.union(OpenFlags::IF_PROMISC_SEE_TRUNK);

    /// Decodes raw wire flags, rejecting unknown bits.
    pub fn from_wire(raw: u32) -> Option<Self> {
        if raw & !MASK != 0 {
            return None;
        }
        Self::from_bits(raw)
    }

    /// First pair (network or interface) with both of its bits set.
    pub fn conflicting_pair(self) -> Option<PolicyPair> {
        NET_PAIRS
            .iter()
            .chain(IF_PAIRS.iter())
            .copied()
            .find(|pair| pair.conflicts_in(self))
    }

    /// Fills each pair in `pairs` that `self` leaves unspecified from `defaults`.
    pub fn with_defaults(self, pairs: &[PolicyPair], defaults: OpenFlags) -> OpenFlags {
        let mut out = self;
        for pair in pairs {
            if !pair.specified_in(self) {
                out |= defaults & pair.both();
            }
        }
        out
    }
}
