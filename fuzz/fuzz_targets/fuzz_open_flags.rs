#![no_main]

use arbitrary::{Arbitrary, Unstructured};
use intnet_protocol::policy::at_least_as_restrictive;
use intnet_protocol::{OpenFlags, TrunkType};
use intnet_switch::policy::{interface_flags, NetFlags};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    trunk_type: u8,
    create: u32,
    joins: Vec<u32>,
}

fuzz_target!(|data: &[u8]| {
    let Ok(input) = Input::arbitrary(&mut Unstructured::new(data)) else {
        return;
    };
    let trunk_type = TrunkType::from_u32(u32::from(input.trunk_type % 5) + 1).unwrap_or_default();
    let Some(create) = OpenFlags::from_wire(input.create) else {
        return;
    };
    if create.conflicting_pair().is_some() {
        return;
    }

    let mut net = NetFlags::for_new_network(create, trunk_type);
    assert!(net.flags.conflicting_pair().is_none());
    for raw in input.joins.into_iter().take(32) {
        let Some(req) = OpenFlags::from_wire(raw) else {
            continue;
        };
        if req.conflicting_pair().is_some() {
            continue;
        }
        let _ = interface_flags(req);
        if !net.admits(req) {
            continue;
        }
        let before = net.flags;
        net.adapt(req);
        assert!(net.flags.conflicting_pair().is_none());
        if req.contains(OpenFlags::REQUIRE_AS_RESTRICTIVE_POLICIES) {
            assert!(at_least_as_restrictive(net.flags, before));
        }
    }
});
