//! Frame edits for networks whose trunk shares one MAC address between the
//! host and every interface behind it on the wire.
//!
//! Frames leaving towards the wire get the trunk's MAC; frames arriving from
//! the wire only carry that MAC, so the real destination is recovered from
//! the layer-3 header.

use intnet_protocol::ether::{
    self, ArpIpv4, Ipv4Header, Ipv6Header, ARP_OP_REQUEST, ETHERTYPE_ARP, ETHERTYPE_IPV4,
    ETHERTYPE_IPV6, ETH_HDR_LEN, IPV6_HDR_LEN,
};
use intnet_protocol::MacAddr;
use intnet_trunk::Sg;
use std::net::Ipv6Addr;

/// Enough of a frame for every header the switch looks at.
pub(crate) const HEAD_LEN: usize = 128;

const IPPROTO_ICMPV6: u8 = 58;
const ICMPV6_RS: u8 = 133;
const ICMPV6_RA: u8 = 134;
const ICMPV6_NS: u8 = 135;
const ICMPV6_NA: u8 = 136;
const ND_OPT_SLLA: u8 = 1;
const ND_OPT_TLLA: u8 = 2;

const ICMPV6_OFF: usize = ETH_HDR_LEN + IPV6_HDR_LEN;

/// Copies the start of `sg` into `buf` and returns the filled part.
pub(crate) fn read_head<'b>(sg: &Sg<'_>, buf: &'b mut [u8; HEAD_LEN]) -> &'b [u8] {
    let n = sg.read_part(0, buf);
    &buf[..n]
}

/// Wireless bridges like to deliver broadcast and multicast traffic as
/// unicast to the shared MAC. Returns the group destination such a frame
/// should really carry.
pub(crate) fn broadcast_dst(head: &[u8]) -> Option<MacAddr> {
    match ether::ethertype(head)? {
        ETHERTYPE_ARP => {
            let op = head.get(ether::arp::OP..ether::arp::OP + 2)?;
            (u16::from_be_bytes([op[0], op[1]]) == ARP_OP_REQUEST).then_some(MacAddr::BROADCAST)
        }
        ETHERTYPE_IPV4 => {
            let ip = Ipv4Header::parse(head)?;
            if ip.dst.is_broadcast() {
                Some(MacAddr::BROADCAST)
            } else if ip.dst.is_multicast() {
                Some(ether::ipv4_multicast_mac(ip.dst))
            } else {
                None
            }
        }
        ETHERTYPE_IPV6 => {
            let ip = Ipv6Header::parse(head)?;
            ip.dst.is_multicast().then(|| ether::ipv6_multicast_mac(ip.dst))
        }
        _ => None,
    }
}

/// The address being probed by a duplicate address detection neighbor
/// solicitation (unspecified source, hop limit 255).
pub(crate) fn dad_target(head: &[u8]) -> Option<Ipv6Addr> {
    let ip = Ipv6Header::parse(head)?;
    if ip.hop_limit != 0xff || ip.next_header != IPPROTO_ICMPV6 || !ip.src.is_unspecified() {
        return None;
    }
    let icmp = head.get(ICMPV6_OFF..ICMPV6_OFF + 24)?;
    if icmp[0] != ICMPV6_NS || icmp[1] != 0 {
        return None;
    }
    let target: [u8; 16] = icmp[8..24].try_into().ok()?;
    Some(Ipv6Addr::from(target))
}

/// Whether `arp` is an Ethernet/IPv4 request or reply the switch edits.
pub(crate) fn editable_arp(head: &[u8]) -> Option<ArpIpv4> {
    ArpIpv4::parse(head).filter(|arp| arp.op == ether::ARP_OP_REQUEST || arp.op == ether::ARP_OP_REPLY)
}

/// Rewrites the link-layer address option of an outgoing router or neighbor
/// discovery message from `sender` to `trunk`, fixing the ICMPv6 checksum.
/// Returns whether the frame changed.
pub(crate) fn ndp_lla_to_trunk(frame: &mut [u8], sender: MacAddr, trunk: MacAddr) -> bool {
    let Some(ip) = Ipv6Header::parse(frame) else {
        return false;
    };
    if ip.next_header != IPPROTO_ICMPV6 || ip.hop_limit != 0xff {
        return false;
    }
    let msg_end = ICMPV6_OFF + usize::from(ip.payload_len);
    if msg_end > frame.len() || frame.len() < ICMPV6_OFF + 4 {
        return false;
    }
    let (hdr_len, lla_opt) = match frame[ICMPV6_OFF] {
        ICMPV6_RS => (8, ND_OPT_SLLA),
        ICMPV6_RA => (16, ND_OPT_SLLA),
        ICMPV6_NS => (24, ND_OPT_SLLA),
        ICMPV6_NA => (24, ND_OPT_TLLA),
        _ => return false,
    };
    if frame[ICMPV6_OFF + 1] != 0 || msg_end < ICMPV6_OFF + hdr_len {
        return false;
    }

    let mut off = ICMPV6_OFF + hdr_len;
    let lla = loop {
        if msg_end - off < 8 {
            return false;
        }
        let opt_len = usize::from(frame[off + 1]) * 8;
        if opt_len == 0 || msg_end - off < opt_len {
            return false;
        }
        if frame[off] == lla_opt {
            if opt_len != 8 {
                return false;
            }
            break off + 2;
        }
        off += opt_len;
    };
    if frame[lla..lla + 6] != sender.0 {
        return false;
    }
    frame[lla..lla + 6].copy_from_slice(&trunk.0);

    frame[ICMPV6_OFF + 2..ICMPV6_OFF + 4].fill(0);
    let sum = icmpv6_checksum(ip.src, ip.dst, &frame[ICMPV6_OFF..msg_end]);
    frame[ICMPV6_OFF + 2..ICMPV6_OFF + 4].copy_from_slice(&sum.to_be_bytes());
    true
}

/// Internet checksum of an ICMPv6 message including the IPv6 pseudo header.
pub(crate) fn icmpv6_checksum(src: Ipv6Addr, dst: Ipv6Addr, msg: &[u8]) -> u16 {
    let mut sum = 0u32;
    let mut add = |bytes: &[u8]| {
        for pair in bytes.chunks(2) {
            let hi = u32::from(pair[0]) << 8;
            let lo = pair.get(1).copied().map_or(0, u32::from);
            sum += hi | lo;
        }
    };
    add(&src.octets());
    add(&dst.octets());
    add(&(msg.len() as u32).to_be_bytes());
    add(&[0, 0, 0, IPPROTO_ICMPV6]);
    add(msg);
    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}
