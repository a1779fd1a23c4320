#![allow(dead_code)]

use intnet_ipc::GsoContext;
use intnet_protocol::{MacAddr, OpenFlags, OpenRequest, TrunkType};
use intnet_switch::{IfHandle, IntNet, IntNetConfig, Session};
use intnet_trunk::{LoopbackFactory, LoopbackTrunk};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const ALICE: Session = Session::new(1, 1000, 1000);
pub const BOB: Session = Session::new(2, 1001, 1001);

pub const MAC_A: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x0a]);
pub const MAC_B: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x0b]);
pub const MAC_C: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x0c]);
pub const MAC_TRUNK: MacAddr = MacAddr([0x0a, 0, 0x27, 0, 0, 0x01]);
pub const MAC_WIRE: MacAddr = MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);

pub fn switch() -> IntNet {
    IntNet::new(IntNetConfig {
        default_recv_size: 16 * 1024,
        default_send_size: 16 * 1024,
        trunk_reconnect_interval: Duration::from_millis(20),
        ..IntNetConfig::default()
    })
}

/// A switch with a loopback factory registered for NetFlt.
pub fn switch_with_trunk() -> (IntNet, Arc<LoopbackFactory>) {
    let net = switch();
    let factory = LoopbackFactory::new(MAC_TRUNK);
    net.register_trunk_factory(TrunkType::NetFlt, factory.clone());
    (net, factory)
}

pub fn open(net: &IntNet, session: &Session, name: &str, flags: OpenFlags) -> IfHandle {
    net.open(session, &OpenRequest::new(name).with_flags(flags))
        .unwrap()
        .0
}

pub fn open_trunked(net: &IntNet, name: &str, flags: OpenFlags) -> IfHandle {
    let req = OpenRequest::new(name)
        .with_trunk(TrunkType::NetFlt, "eth0")
        .with_flags(flags);
    net.open(&ALICE, &req).unwrap().0
}

/// Opens, names and activates an interface.
pub fn up(net: &IntNet, session: &Session, name: &str, mac: MacAddr) -> IfHandle {
    let h = open(net, session, name, OpenFlags::empty());
    net.set_mac_address(session, h, mac).unwrap();
    net.set_active(session, h, true).unwrap();
    h
}

pub fn eth(dst: MacAddr, src: MacAddr, ethertype: u16, payload: &[u8]) -> Vec<u8> {
    let mut f = Vec::with_capacity(14 + payload.len());
    f.extend_from_slice(&dst.0);
    f.extend_from_slice(&src.0);
    f.extend_from_slice(&ethertype.to_be_bytes());
    f.extend_from_slice(payload);
    f
}

pub fn ipv4(dst: MacAddr, src: MacAddr, ip_src: Ipv4Addr, ip_dst: Ipv4Addr) -> Vec<u8> {
    let mut ip = [0u8; 28];
    ip[0] = 0x45;
    ip[2..4].copy_from_slice(&28u16.to_be_bytes());
    ip[8] = 64;
    ip[9] = 17;
    ip[12..16].copy_from_slice(&ip_src.octets());
    ip[16..20].copy_from_slice(&ip_dst.octets());
    eth(dst, src, 0x0800, &ip)
}

pub fn ipv6(dst: MacAddr, src: MacAddr, ip_src: Ipv6Addr, ip_dst: Ipv6Addr, next: u8, payload: &[u8]) -> Vec<u8> {
    let mut ip = vec![0u8; 40];
    ip[0] = 0x60;
    ip[4..6].copy_from_slice(&(payload.len() as u16).to_be_bytes());
    ip[6] = next;
    ip[7] = 0xff;
    ip[8..24].copy_from_slice(&ip_src.octets());
    ip[24..40].copy_from_slice(&ip_dst.octets());
    ip.extend_from_slice(payload);
    eth(dst, src, 0x86dd, &ip)
}

pub fn arp(dst: MacAddr, src: MacAddr, op: u16, sha: MacAddr, spa: Ipv4Addr, tha: MacAddr, tpa: Ipv4Addr) -> Vec<u8> {
    let mut a = Vec::with_capacity(28);
    a.extend_from_slice(&[0, 1, 8, 0, 6, 4]);
    a.extend_from_slice(&op.to_be_bytes());
    a.extend_from_slice(&sha.0);
    a.extend_from_slice(&spa.octets());
    a.extend_from_slice(&tha.0);
    a.extend_from_slice(&tpa.octets());
    eth(dst, src, 0x0806, &a)
}

/// An IPv4/TCP frame with `payload_len` bytes of payload and a context
/// splitting it into `mss`-sized segments.
pub fn tcp_gso(dst: MacAddr, src: MacAddr, payload_len: usize, mss: u16) -> (Vec<u8>, GsoContext) {
    let total = 20 + 20 + payload_len;
    let mut ip = vec![0u8; total];
    ip[0] = 0x45;
    ip[2..4].copy_from_slice(&(total as u16).to_be_bytes());
    ip[8] = 64;
    ip[9] = 6;
    ip[12..16].copy_from_slice(&[10, 0, 0, 1]);
    ip[16..20].copy_from_slice(&[10, 0, 0, 2]);
    ip[32] = 5 << 4;
    ip[33] = 0x18;
    for (i, b) in ip[40..].iter_mut().enumerate() {
        *b = i as u8;
    }
    let frame = eth(dst, src, 0x0800, &ip);
    let gso = GsoContext {
        gso_type: 1,
        cb_hdrs_total: 54,
        cb_hdrs_seg: 54,
        off_hdr1: 14,
        off_hdr2: 34,
        unused: 0,
        cb_max_seg: mss,
    };
    (frame, gso)
}

pub fn queue(net: &IntNet, session: &Session, h: IfHandle, frame: &[u8]) {
    let buf = net.get_buffer(session, h).unwrap();
    buf.send().write_frame(&[frame]).unwrap();
}

pub fn send(net: &IntNet, session: &Session, h: IfHandle, frame: &[u8]) {
    queue(net, session, h, frame);
    net.send(session, h).unwrap();
}

pub fn recv_all(net: &IntNet, session: &Session, h: IfHandle) -> Vec<Vec<u8>> {
    let buf = net.get_buffer(session, h).unwrap();
    let ring = buf.recv();
    std::iter::from_fn(|| ring.try_pop().ok().map(|f| f.data)).collect()
}

pub fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(5));
    }
}

pub fn trunk(factory: &LoopbackFactory) -> Arc<LoopbackTrunk> {
    factory.last().expect("trunk created")
}
