mod common;

use common::*;
use intnet_protocol::{OpenFlags, OpenRequest, ProtocolError, TrunkType};
use intnet_switch::{IntNet, IntNetConfig, IntNetError, Session};

#[test]
fn fixed_restricted_network_rejects_exact_public_join() {
    let (net, _factory) = switch_with_trunk();
    net.register_trunk_factory(TrunkType::NetAdp, intnet_trunk::LoopbackFactory::new(MAC_TRUNK));
    let req = OpenRequest::new("vboxnet0").with_trunk(TrunkType::NetAdp, "vboxnet0");

    let (_, joined) = net
        .open(
            &ALICE,
            &req.clone()
                .with_flags(OpenFlags::ACCESS_RESTRICTED | OpenFlags::ACCESS_FIXED),
        )
        .unwrap();
    assert!(!joined);

    let err = net
        .open(
            &ALICE,
            &req.with_flags(OpenFlags::ACCESS_PUBLIC | OpenFlags::REQUIRE_EXACT),
        )
        .unwrap_err();
    assert!(matches!(err, IntNetError::IncompatibleFlags { .. }));

    let flags = net.network_flags("vboxnet0").unwrap();
    assert!(flags.contains(OpenFlags::ACCESS_RESTRICTED));
    assert!(!flags.contains(OpenFlags::ACCESS_PUBLIC));
    assert_eq!(net.interface_count(), 1);
}

#[test]
fn policy_mismatch_is_reported_before_access() {
    let (net, _factory) = switch_with_trunk();
    net.register_trunk_factory(TrunkType::NetAdp, intnet_trunk::LoopbackFactory::new(MAC_TRUNK));
    let req = OpenRequest::new("vboxnet0").with_trunk(TrunkType::NetAdp, "vboxnet0");
    net.open(
        &ALICE,
        &req.clone()
            .with_flags(OpenFlags::ACCESS_RESTRICTED | OpenFlags::ACCESS_FIXED),
    )
    .unwrap();

    // A stranger asking for an incompatible policy learns about the policy.
    let err = net
        .open(
            &BOB,
            &req.clone()
                .with_flags(OpenFlags::ACCESS_PUBLIC | OpenFlags::REQUIRE_EXACT),
        )
        .unwrap_err();
    assert!(matches!(err, IntNetError::IncompatibleFlags { .. }));

    // With a compatible request the identity check decides.
    let err = net.open(&BOB, &req).unwrap_err();
    assert!(matches!(err, IntNetError::AccessDenied { .. }));
    assert_eq!(net.interface_count(), 1);
}

#[test]
fn second_open_joins() {
    let net = switch();
    let (h1, joined) = net.open(&ALICE, &OpenRequest::new("intnet")).unwrap();
    assert!(!joined);
    let (h2, joined) = net.open(&ALICE, &OpenRequest::new("intnet")).unwrap();
    assert!(joined);
    assert_ne!(h1, h2);
    assert_eq!(net.network_count(), 1);
}

#[test]
fn restricted_network_checks_identity() {
    let net = switch();
    open(&net, &ALICE, "private", OpenFlags::ACCESS_RESTRICTED);
    let err = net.open(&BOB, &OpenRequest::new("private")).unwrap_err();
    assert!(matches!(err, IntNetError::AccessDenied { .. }));

    // Same group is enough.
    let colleague = Session::new(3, 4242, ALICE.gid);
    net.open(&colleague, &OpenRequest::new("private")).unwrap();

    open(&net, &ALICE, "public", OpenFlags::ACCESS_PUBLIC);
    net.open(&BOB, &OpenRequest::new("public")).unwrap();
}

#[test]
fn trunk_must_match_unless_whatever() {
    let (net, _factory) = switch_with_trunk();
    open_trunked(&net, "bridged", OpenFlags::ACCESS_PUBLIC);

    let err = net.open(&ALICE, &OpenRequest::new("bridged")).unwrap_err();
    assert!(matches!(err, IntNetError::IncompatibleTrunk { .. }));

    let req = OpenRequest::new("bridged").with_trunk(TrunkType::NetFlt, "eth1");
    assert!(matches!(
        net.open(&ALICE, &req),
        Err(IntNetError::IncompatibleTrunk { .. })
    ));

    let req = OpenRequest::new("bridged").with_trunk(TrunkType::WhateverNone, "");
    assert!(net.open(&ALICE, &req).unwrap().1);
}

#[test]
fn bad_requests_are_invalid_parameters() {
    let net = switch();
    let req = OpenRequest::new("x").with_flags(OpenFlags::TRUNK_HOST_ENABLED | OpenFlags::TRUNK_HOST_DISABLED);
    assert!(matches!(
        net.open(&ALICE, &req),
        Err(IntNetError::InvalidParameter(ProtocolError::ConflictingFlags { .. }))
    ));
    assert!(matches!(
        net.open(&ALICE, &OpenRequest::new("")),
        Err(IntNetError::InvalidParameter(ProtocolError::EmptyNetworkName))
    ));
    assert_eq!(net.network_count(), 0);
}

#[test]
fn unknown_trunk_type_is_not_supported() {
    let net = switch();
    let req = OpenRequest::new("bridged").with_trunk(TrunkType::NetAdp, "vboxnet1");
    assert_eq!(
        net.open(&ALICE, &req),
        Err(IntNetError::NotSupported(TrunkType::NetAdp))
    );
    assert_eq!(net.network_count(), 0);
}

#[test]
fn failed_trunk_creation_fails_the_open() {
    let (net, factory) = switch_with_trunk();
    factory.set_fail_create(true);
    let req = OpenRequest::new("bridged").with_trunk(TrunkType::NetFlt, "eth9");
    assert!(matches!(net.open(&ALICE, &req), Err(IntNetError::Trunk(_))));
    assert_eq!(net.network_count(), 0);
}

#[test]
fn as_restrictive_joiner_tightens_and_holds() {
    let net = switch();
    open(&net, &ALICE, "net", OpenFlags::ACCESS_PUBLIC);
    let strict = open(
        &net,
        &ALICE,
        "net",
        OpenFlags::PROMISC_DENY_CLIENTS | OpenFlags::REQUIRE_AS_RESTRICTIVE_POLICIES,
    );
    let flags = net.network_flags("net").unwrap();
    assert!(flags.contains(OpenFlags::PROMISC_DENY_CLIENTS));

    // A relaxed joiner cannot loosen it while the strict one is there.
    open(&net, &ALICE, "net", OpenFlags::PROMISC_ALLOW_CLIENTS);
    assert!(net
        .network_flags("net")
        .unwrap()
        .contains(OpenFlags::PROMISC_DENY_CLIENTS));

    net.close(&ALICE, strict).unwrap();
    open(&net, &ALICE, "net", OpenFlags::PROMISC_ALLOW_CLIENTS);
    assert!(net
        .network_flags("net")
        .unwrap()
        .contains(OpenFlags::PROMISC_ALLOW_CLIENTS));
}

#[test]
fn shared_mac_mismatch_is_incompatible() {
    let (net, _factory) = switch_with_trunk();
    open_trunked(&net, "shared", OpenFlags::ACCESS_PUBLIC | OpenFlags::SHARED_MAC_ON_WIRE);
    let req = OpenRequest::new("shared").with_trunk(TrunkType::NetFlt, "eth0");
    assert!(matches!(
        net.open(&ALICE, &req),
        Err(IntNetError::IncompatibleFlags { .. })
    ));
}

#[test]
fn interface_limit() {
    let net = IntNet::new(IntNetConfig {
        max_interfaces: 2,
        default_recv_size: 4096,
        default_send_size: 4096,
        ..IntNetConfig::default()
    });
    open(&net, &ALICE, "a", OpenFlags::empty());
    open(&net, &ALICE, "b", OpenFlags::empty());
    assert_eq!(
        net.open(&ALICE, &OpenRequest::new("c")),
        Err(IntNetError::TooManyInterfaces { limit: 2 })
    );
}

#[test]
fn shutdown_closes_everything() {
    let net = switch();
    let h = open(&net, &ALICE, "a", OpenFlags::empty());
    net.shutdown();
    assert_eq!(net.network_count(), 0);
    assert_eq!(net.set_active(&ALICE, h, true), Err(IntNetError::InvalidHandle));
    assert_eq!(net.open(&ALICE, &OpenRequest::new("a")), Err(IntNetError::ShutDown));
}
