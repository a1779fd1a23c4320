//! The whole stack at once: configuration strings, the client backend, the
//! switch and a loopback trunk.

use intnet::protocol::{MacAddr, OpenFlags, TrunkType};
use intnet::trunk::{LoopbackFactory, TrunkDir, TrunkState};
use intnet::{IntNet, IntNetBackend, IntNetConfig, NetworkBackend, OpenConfig, Session};
use std::net::Ipv4Addr;
use std::sync::Arc;

const SESSION: Session = Session::new(7, 1000, 1000);
const MAC_GUEST: MacAddr = MacAddr([0x08, 0x00, 0x27, 0xaa, 0xbb, 0x01]);
const MAC_PEER: MacAddr = MacAddr([0x08, 0x00, 0x27, 0xaa, 0xbb, 0x02]);
const MAC_NIC: MacAddr = MacAddr([0x00, 0x1b, 0x21, 0x00, 0x00, 0x01]);
const MAC_ROUTER: MacAddr = MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
const IP_GUEST: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 20);
const IP_ROUTER: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);

fn ipv4(dst: MacAddr, src: MacAddr, ip_src: Ipv4Addr, ip_dst: Ipv4Addr) -> Vec<u8> {
    let mut f = Vec::with_capacity(14 + 28);
    f.extend_from_slice(&dst.0);
    f.extend_from_slice(&src.0);
    f.extend_from_slice(&0x0800u16.to_be_bytes());
    let mut ip = [0u8; 28];
    ip[0] = 0x45;
    ip[2..4].copy_from_slice(&28u16.to_be_bytes());
    ip[8] = 64;
    ip[9] = 17;
    ip[12..16].copy_from_slice(&ip_src.octets());
    ip[16..20].copy_from_slice(&ip_dst.octets());
    f.extend_from_slice(&ip);
    f
}

fn bridged(net: &IntNet, mac: MacAddr, extra: &[(&str, &str)]) -> IntNetBackend {
    let mac = mac.to_string();
    let mut pairs = vec![
        ("Network", "bridged-eth0"),
        ("TrunkType", "netflt"),
        ("Trunk", "eth0"),
        ("MAC", mac.as_str()),
    ];
    pairs.extend_from_slice(extra);
    let cfg = OpenConfig::from_pairs(pairs).unwrap();
    IntNetBackend::open(net, SESSION, &cfg).unwrap()
}

fn setup() -> (IntNet, Arc<LoopbackFactory>) {
    let net = IntNet::new(IntNetConfig {
        default_recv_size: 32 * 1024,
        default_send_size: 32 * 1024,
        ..IntNetConfig::default()
    });
    let factory = LoopbackFactory::new(MAC_NIC);
    net.register_trunk_factory(TrunkType::NetFlt, factory.clone());
    (net, factory)
}

#[test]
fn bridged_guests_reach_each_other_and_the_wire() {
    let (net, factory) = setup();
    let mut guest = bridged(&net, MAC_GUEST, &[]);
    let mut peer = bridged(&net, MAC_PEER, &[]);
    let trunk = factory.last().unwrap();
    assert_eq!(trunk.state(), TrunkState::Active);

    // Guest to guest stays on the switch.
    let frame = ipv4(MAC_PEER, MAC_GUEST, IP_GUEST, Ipv4Addr::new(192, 168, 1, 21));
    guest.transmit(frame.clone());
    assert_eq!(peer.poll_receive(), Some(frame));
    assert!(trunk.take_sent().is_empty());

    // An unknown destination leaves through the trunk.
    let frame = ipv4(MAC_ROUTER, MAC_GUEST, IP_GUEST, IP_ROUTER);
    guest.transmit(frame.clone());
    let sent = trunk.take_sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].dst.contains(TrunkDir::WIRE));
    assert_eq!(sent[0].data, frame);

    // And the answer comes back to the guest only.
    let reply = ipv4(MAC_GUEST, MAC_ROUTER, IP_ROUTER, IP_GUEST);
    assert!(trunk.inject(TrunkDir::WIRE, &reply).unwrap().handled);
    assert_eq!(guest.poll_receive(), Some(reply));
    assert_eq!(peer.poll_receive(), None);
}

#[test]
fn shared_mac_network_from_configuration() {
    let (net, factory) = setup();
    let mut guest = bridged(&net, MAC_GUEST, &[("SharedMacOnWire", "yes")]);
    assert!(net
        .network_flags("bridged-eth0")
        .unwrap()
        .contains(OpenFlags::SHARED_MAC_ON_WIRE));
    let trunk = factory.last().unwrap();

    guest.transmit(ipv4(MAC_ROUTER, MAC_GUEST, IP_GUEST, IP_ROUTER));
    let sent = trunk.take_sent();
    let wire = sent
        .iter()
        .find(|f| f.dst.contains(TrunkDir::WIRE))
        .expect("frame on the wire");
    assert_eq!(&wire.data[6..12], &MAC_NIC.0);

    // The wire only knows the NIC's address; the switch routes by IP.
    let reply = ipv4(MAC_NIC, MAC_ROUTER, IP_ROUTER, IP_GUEST);
    assert!(trunk.inject(TrunkDir::WIRE, &reply).unwrap().handled);
    let got = guest.poll_receive().unwrap();
    assert_eq!(&got[..6], &MAC_GUEST.0);

    // A second guest without the flag cannot join.
    let cfg = OpenConfig::from_pairs([("Network", "bridged-eth0"), ("TrunkType", "netflt"), ("Trunk", "eth0")]).unwrap();
    assert!(IntNetBackend::open(&net, SESSION, &cfg).is_err());
}

#[test]
fn closing_every_backend_releases_the_trunk() {
    let (net, factory) = setup();
    let guest = bridged(&net, MAC_GUEST, &[]);
    let trunk = factory.last().unwrap();
    drop(guest);

    assert!(trunk.is_released());
    assert_eq!(net.network_count(), 0);
    assert!(!net.network_has_trunk("bridged-eth0"));
}

#[test]
fn shutdown_detaches_live_backends() {
    let (net, _factory) = setup();
    let mut guest = bridged(&net, MAC_GUEST, &[]);
    net.shutdown();

    // Transmit after shutdown is dropped quietly; the handle is gone.
    guest.transmit(ipv4(MAC_ROUTER, MAC_GUEST, IP_GUEST, IP_ROUTER));
    assert!(guest.poll_receive().is_none());
    assert!(guest.wait(0).is_err());
}
