//! Network policy negotiation: the flags a new network starts with, whether a
//! joining request is compatible, and how the network's flags move when it is.

use intnet_protocol::{OpenFlags, TrunkType, IF_PAIRS, NET_PAIRS};

/// The policy state of one network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetFlags {
    /// Every network pair has exactly one side set.
    pub flags: OpenFlags,
    /// Restrictive bits demanded by REQUIRE_AS_RESTRICTIVE_POLICIES joiners.
    pub min_flags: OpenFlags,
}

impl NetFlags {
    /// Flags of a network created by a request with `requested` flags.
    pub fn for_new_network(requested: OpenFlags, trunk_type: TrunkType) -> Self {
        let access = if trunk_type.default_restricted() {
            OpenFlags::ACCESS_RESTRICTED
        } else {
            OpenFlags::ACCESS_PUBLIC
        };
        let flags = (requested - OpenFlags::IF_MASK - OpenFlags::REQUIRE_MASK)
            .with_defaults(&NET_PAIRS, OpenFlags::NET_DEFAULTS | access);
        let min_flags = if requested.contains(OpenFlags::REQUIRE_AS_RESTRICTIVE_POLICIES) {
            requested & (OpenFlags::STRICT_MASK - OpenFlags::IF_MASK)
        } else {
            OpenFlags::empty()
        };
        Self { flags, min_flags }
    }

    pub fn shared_mac(&self) -> bool {
        self.flags.contains(OpenFlags::SHARED_MAC_ON_WIRE)
    }

    /// Whether a request with `requested` flags may join.
    pub fn admits(&self, requested: OpenFlags) -> bool {
        let net = self.flags;
        if requested.contains(OpenFlags::SHARED_MAC_ON_WIRE) != net.contains(OpenFlags::SHARED_MAC_ON_WIRE) {
            return false;
        }
        if requested.contains(OpenFlags::REQUIRE_EXACT)
            && NET_PAIRS.iter().any(|pair| {
                pair.specified_in(requested) && requested & pair.both() != net & pair.both()
            })
        {
            return false;
        }
        if requested.contains(OpenFlags::REQUIRE_AS_RESTRICTIVE_POLICIES)
            && NET_PAIRS.iter().any(|pair| {
                requested.contains(pair.restrictive)
                    && !net.contains(pair.restrictive)
                    && net.contains(pair.fixed)
            })
        {
            return false;
        }
        true
    }

    /// Applies an admitted request. Returns the previous flags when they
    /// changed.
    pub fn adapt(&mut self, requested: OpenFlags) -> Option<OpenFlags> {
        let as_restrictive = requested.contains(OpenFlags::REQUIRE_AS_RESTRICTIVE_POLICIES);
        if as_restrictive {
            let min = self.min_flags | (requested & (OpenFlags::STRICT_MASK - OpenFlags::IF_MASK));
            if min != self.min_flags {
                tracing::info!(old = ?self.min_flags, new = ?min, "minimum policy raised");
                self.min_flags = min;
            }
        }

        let old = self.flags;
        let mut flags = old;
        for pair in &NET_PAIRS {
            if !pair.specified_in(requested) || flags.contains(pair.fixed) {
                continue;
            }
            if self.min_flags.contains(pair.restrictive) || requested.contains(pair.restrictive) {
                flags.remove(pair.both());
                flags.insert(pair.restrictive);
            } else if !as_restrictive {
                flags.remove(pair.both());
                flags.insert(pair.relaxed);
            }
        }
        for pair in &NET_PAIRS {
            flags |= requested & pair.fixed;
        }

        if flags == old {
            return None;
        }
        self.flags = flags;
        Some(old)
    }

    /// Recomputes the minimum after an interface that demanded one left.
    pub fn recompute_min(&mut self, remaining: impl Iterator<Item = OpenFlags>) {
        self.min_flags = remaining
            .filter(|f| f.contains(OpenFlags::REQUIRE_AS_RESTRICTIVE_POLICIES))
            .fold(OpenFlags::empty(), |acc, f| {
                acc | (f & (OpenFlags::STRICT_MASK - OpenFlags::IF_MASK))
            });
    }
}

/// Interface flags: the request's interface pairs, defaulted.
pub fn interface_flags(requested: OpenFlags) -> OpenFlags {
    (requested & OpenFlags::IF_MASK).with_defaults(&IF_PAIRS, OpenFlags::IF_DEFAULTS)
}
