#![cfg(not(target_arch = "wasm32"))]

use intnet_protocol::{IfPolicy, NetPolicy, OpenFlags, IF_PAIRS, NET_PAIRS};
use proptest::prelude::*;

/// Arbitrary flags without any conflicting pair.
fn valid_flags() -> impl Strategy<Value = OpenFlags> {
    any::<u32>().prop_map(|raw| {
        let mut flags = OpenFlags::from_bits_truncate(raw);
        for pair in NET_PAIRS.iter().chain(IF_PAIRS.iter()) {
            if pair.conflicts_in(flags) {
                flags.remove(pair.relaxed);
            }
        }
        flags
    })
}

proptest! {
    #[test]
    fn typed_view_is_lossless(flags in valid_flags()) {
        let net_bits = OpenFlags::all()
            - OpenFlags::IF_MASK
            - OpenFlags::REQUIRE_MASK
            - OpenFlags::WORKAROUND_1;
        prop_assert_eq!(NetPolicy::from_flags(flags).to_flags(), flags & net_bits);
        prop_assert_eq!(IfPolicy::from_flags(flags).to_flags(), flags & OpenFlags::IF_MASK);
    }

    #[test]
    fn valid_flags_have_no_conflicts(flags in valid_flags()) {
        prop_assert!(flags.conflicting_pair().is_none());
        prop_assert!(OpenFlags::from_wire(flags.bits()).is_some());
    }

    #[test]
    fn defaults_never_override_choices(flags in valid_flags()) {
        let filled = flags.with_defaults(&NET_PAIRS, OpenFlags::NET_DEFAULTS);
        prop_assert!(filled.contains(flags));
        prop_assert!(filled.conflicting_pair().is_none());
    }
}
