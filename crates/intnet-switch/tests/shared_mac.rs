//! Networks bridged with one MAC address for everything behind the trunk.

mod common;

use common::*;
use intnet_protocol::{MacAddr, OpenFlags};
use intnet_switch::IntNet;
use intnet_trunk::{LoopbackFactory, LoopbackTrunk, TrunkDir};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

const IP_A: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
const IP_GW: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 254);

struct Bridge {
    net: IntNet,
    _factory: Arc<LoopbackFactory>,
    trunk: Arc<LoopbackTrunk>,
    a: intnet_switch::IfHandle,
}

fn bridge() -> Bridge {
    let (net, factory) = switch_with_trunk();
    let a = open_trunked(&net, "bridged", OpenFlags::SHARED_MAC_ON_WIRE);
    net.set_mac_address(&ALICE, a, MAC_A).unwrap();
    net.set_active(&ALICE, a, true).unwrap();
    let trunk = trunk(&factory);
    Bridge {
        net,
        _factory: factory,
        trunk,
        a,
    }
}

impl Bridge {
    fn send(&self, frame: &[u8]) {
        send(&self.net, &ALICE, self.a, frame);
    }

    fn recv(&self) -> Vec<Vec<u8>> {
        recv_all(&self.net, &ALICE, self.a)
    }

    /// Lets the switch learn that `a` owns `IP_A`.
    fn claim_ip_a(&self) {
        self.send(&ipv4(MAC_WIRE, MAC_A, IP_A, IP_GW));
        self.trunk.take_sent();
    }
}

#[test]
fn trunk_is_created_without_promiscuous_wire() {
    let b = bridge();
    assert!(!b.trunk.wire_promiscuous());
}

#[test]
fn source_mac_is_replaced_on_the_wire() {
    let b = bridge();
    let frame = ipv4(MAC_WIRE, MAC_A, IP_A, IP_GW);
    b.send(&frame);

    let sent = b.trunk.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].dst, TrunkDir::WIRE);
    assert_eq!(&sent[0].data[6..12], &MAC_TRUNK.0);
    assert_eq!(&sent[0].data[12..], &frame[12..]);
}

#[test]
fn unicast_from_the_wire_is_switched_by_ip() {
    let b = bridge();
    b.claim_ip_a();

    let frame = ipv4(MAC_TRUNK, MAC_WIRE, IP_GW, IP_A);
    let outcome = b.trunk.inject(TrunkDir::WIRE, &frame).unwrap();
    assert!(outcome.handled);

    let got = b.recv();
    assert_eq!(got.len(), 1);
    assert_eq!(&got[0][..6], &MAC_A.0);
    assert_eq!(&got[0][6..], &frame[6..]);
}

#[test]
fn unknown_ip_from_the_wire_goes_to_the_host() {
    let b = bridge();
    let frame = ipv4(MAC_TRUNK, MAC_WIRE, IP_GW, Ipv4Addr::new(10, 0, 0, 77));
    let outcome = b.trunk.inject(TrunkDir::WIRE, &frame).unwrap();
    assert!(!outcome.handled);
    assert!(b.recv().is_empty());
}

#[test]
fn arp_towards_the_wire_names_the_trunk() {
    let b = bridge();
    let request = arp(
        MacAddr::BROADCAST,
        MAC_A,
        1,
        MAC_A,
        IP_A,
        MacAddr::ZERO,
        IP_GW,
    );
    b.send(&request);

    let sent = b.trunk.take_sent();
    assert_eq!(sent.len(), 2);
    // The host sees the original.
    assert_eq!(sent[0].dst, TrunkDir::HOST);
    assert_eq!(sent[0].data, request);
    assert_eq!(sent[1].dst, TrunkDir::WIRE);
    assert_eq!(&sent[1].data[6..12], &MAC_TRUNK.0);
    assert_eq!(&sent[1].data[22..28], &MAC_TRUNK.0);
}

#[test]
fn arp_reply_from_the_wire_is_redirected_to_the_owner() {
    let b = bridge();
    b.claim_ip_a();

    let reply = arp(MAC_TRUNK, MAC_WIRE, 2, MAC_WIRE, IP_GW, MAC_TRUNK, IP_A);
    b.trunk.inject(TrunkDir::WIRE, &reply).unwrap();

    let got = b.recv();
    assert_eq!(got.len(), 1);
    assert_eq!(&got[0][..6], &MAC_A.0);
    assert_eq!(&got[0][32..38], &MAC_A.0);
    assert_eq!(&got[0][22..28], &MAC_WIRE.0);
}

#[test]
fn unicast_wrapped_broadcast_is_restored() {
    let b = bridge();
    let frame = ipv4(MAC_TRUNK, MAC_WIRE, IP_GW, Ipv4Addr::BROADCAST);
    b.trunk.inject(TrunkDir::WIRE, &frame).unwrap();

    let got = b.recv();
    assert_eq!(got.len(), 1);
    assert_eq!(&got[0][..6], &MacAddr::BROADCAST.0);
}

#[test]
fn host_addresses_cannot_be_claimed() {
    let b = bridge();
    b.claim_ip_a();
    b.trunk.host_address(true, IpAddr::V4(IP_A));

    b.claim_ip_a();
    let frame = ipv4(MAC_TRUNK, MAC_WIRE, IP_GW, IP_A);
    b.trunk.inject(TrunkDir::WIRE, &frame).unwrap();
    assert!(b.recv().is_empty());

    b.trunk.host_address(false, IpAddr::V4(IP_A));
    b.claim_ip_a();
    b.trunk.inject(TrunkDir::WIRE, &frame).unwrap();
    assert_eq!(b.recv().len(), 1);
}

#[test]
fn duplicate_address_probe_on_the_wire_evicts() {
    let b = bridge();
    let ll_a: Ipv6Addr = "fe80::a".parse().unwrap();
    let ll_gw: Ipv6Addr = "fe80::1".parse().unwrap();
    b.send(&ipv6(MAC_WIRE, MAC_A, ll_a, ll_gw, 17, &[0u8; 8]));
    b.trunk.take_sent();

    let unicast = ipv6(MAC_TRUNK, MAC_WIRE, ll_gw, ll_a, 17, &[0u8; 8]);
    b.trunk.inject(TrunkDir::WIRE, &unicast).unwrap();
    assert_eq!(b.recv().len(), 1);

    let mut ns = vec![135, 0, 0, 0, 0, 0, 0, 0];
    ns.extend_from_slice(&ll_a.octets());
    let solicited: Ipv6Addr = "ff02::1:ff00:a".parse().unwrap();
    let probe = ipv6(
        MacAddr([0x33, 0x33, 0xff, 0, 0, 0x0a]),
        MAC_WIRE,
        Ipv6Addr::UNSPECIFIED,
        solicited,
        58,
        &ns,
    );
    b.trunk.inject(TrunkDir::WIRE, &probe).unwrap();
    assert_eq!(b.recv().len(), 1);

    b.trunk.inject(TrunkDir::WIRE, &unicast).unwrap();
    assert!(b.recv().is_empty());
}

#[test]
fn neighbor_advert_link_address_is_rewritten() {
    let b = bridge();
    let ll_a: Ipv6Addr = "fe80::a".parse().unwrap();
    let mut na = vec![136, 0, 0, 0, 0x20, 0, 0, 0];
    na.extend_from_slice(&ll_a.octets());
    na.extend_from_slice(&[2, 1]);
    na.extend_from_slice(&MAC_A.0);
    let frame = ipv6(
        MacAddr([0x33, 0x33, 0, 0, 0, 1]),
        MAC_A,
        ll_a,
        "ff02::1".parse().unwrap(),
        58,
        &na,
    );
    b.send(&frame);

    let sent = b.trunk.take_sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].data, frame);
    let wire = &sent[1].data;
    let lla = 14 + 40 + 24 + 2;
    assert_eq!(&wire[lla..lla + 6], &MAC_TRUNK.0);
    assert_ne!(wire[14 + 40 + 2..14 + 40 + 4], frame[14 + 40 + 2..14 + 40 + 4]);
}
