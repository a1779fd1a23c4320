//! Just enough Ethernet, ARP, IPv4 and IPv6 parsing for the switch to make
//! forwarding decisions and do shared-MAC address rewriting.

use crate::MacAddr;
use std::net::{Ipv4Addr, Ipv6Addr};

pub const ETH_HDR_LEN: usize = 14;
pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;
pub const ETHERTYPE_IPV6: u16 = 0x86dd;

pub const ARP_HTYPE_ETHER: u16 = 1;
pub const ARP_OP_REQUEST: u16 = 1;
pub const ARP_OP_REPLY: u16 = 2;
pub const ARP_OP_REVREQUEST: u16 = 3;
pub const ARP_OP_REVREPLY: u16 = 4;
/// Ethernet/IPv4 ARP body length.
pub const ARP_IPV4_LEN: usize = 28;

pub const IPV4_MIN_HDR_LEN: usize = 20;
pub const IPV6_HDR_LEN: usize = 40;

/// Absolute frame offsets of the Ethernet/IPv4 ARP fields.
pub mod arp {
    use super::ETH_HDR_LEN;

    pub const HTYPE: usize = ETH_HDR_LEN;
    pub const PTYPE: usize = ETH_HDR_LEN + 2;
    pub const HLEN: usize = ETH_HDR_LEN + 4;
    pub const PLEN: usize = ETH_HDR_LEN + 5;
    pub const OP: usize = ETH_HDR_LEN + 6;
    pub const SHA: usize = ETH_HDR_LEN + 8;
    pub const SPA: usize = ETH_HDR_LEN + 14;
    pub const THA: usize = ETH_HDR_LEN + 18;
    pub const TPA: usize = ETH_HDR_LEN + 24;
}

fn be16(frame: &[u8], off: usize) -> Option<u16> {
    Some(u16::from_be_bytes(frame.get(off..off + 2)?.try_into().ok()?))
}

pub fn dst_mac(frame: &[u8]) -> Option<MacAddr> {
    MacAddr::from_slice(frame.get(0..6)?)
}

pub fn src_mac(frame: &[u8]) -> Option<MacAddr> {
    MacAddr::from_slice(frame.get(6..12)?)
}

pub fn ethertype(frame: &[u8]) -> Option<u16> {
    be16(frame, 12)
}

/// Decoded Ethernet/IPv4 ARP packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpIpv4 {
    pub op: u16,
    pub sha: MacAddr,
    pub spa: Ipv4Addr,
    pub tha: MacAddr,
    pub tpa: Ipv4Addr,
}

impl ArpIpv4 {
    /// Parses the ARP body of a full Ethernet frame. Anything other than
    /// Ethernet hardware with IPv4 protocol addresses is ignored.
    pub fn parse(frame: &[u8]) -> Option<Self> {
        if ethertype(frame)? != ETHERTYPE_ARP || frame.len() < ETH_HDR_LEN + ARP_IPV4_LEN {
            return None;
        }
        if be16(frame, arp::HTYPE)? != ARP_HTYPE_ETHER
            || be16(frame, arp::PTYPE)? != ETHERTYPE_IPV4
            || frame[arp::HLEN] != 6
            || frame[arp::PLEN] != 4
        {
            return None;
        }
        let ipv4 = |off: usize| -> Option<Ipv4Addr> {
            let b: [u8; 4] = frame.get(off..off + 4)?.try_into().ok()?;
            Some(Ipv4Addr::from(b))
        };
        Some(Self {
            op: be16(frame, arp::OP)?,
            sha: MacAddr::from_slice(&frame[arp::SHA..])?,
            spa: ipv4(arp::SPA)?,
            tha: MacAddr::from_slice(&frame[arp::THA..])?,
            tpa: ipv4(arp::TPA)?,
        })
    }

    pub fn is_request(&self) -> bool {
        matches!(self.op, ARP_OP_REQUEST | ARP_OP_REVREQUEST)
    }

    pub fn is_reply(&self) -> bool {
        matches!(self.op, ARP_OP_REPLY | ARP_OP_REVREPLY)
    }
}

pub fn set_arp_sha(frame: &mut [u8], mac: MacAddr) {
    if let Some(sha) = frame.get_mut(arp::SHA..arp::SHA + 6) {
        sha.copy_from_slice(&mac.0);
    }
}

pub fn set_arp_tha(frame: &mut [u8], mac: MacAddr) {
    if let Some(tha) = frame.get_mut(arp::THA..arp::THA + 6) {
        tha.copy_from_slice(&mac.0);
    }
}

/// The fixed part of an IPv4 header that follows the Ethernet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    pub hdr_len: usize,
    pub total_len: u16,
    pub protocol: u8,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

impl Ipv4Header {
    pub fn parse(frame: &[u8]) -> Option<Self> {
        let ip = frame.get(ETH_HDR_LEN..)?;
        if ip.len() < IPV4_MIN_HDR_LEN || ip[0] >> 4 != 4 {
            return None;
        }
        let hdr_len = usize::from(ip[0] & 0x0f) * 4;
        if hdr_len < IPV4_MIN_HDR_LEN || hdr_len > ip.len() {
            return None;
        }
        let addr = |off: usize| Ipv4Addr::new(ip[off], ip[off + 1], ip[off + 2], ip[off + 3]);
        Some(Self {
            hdr_len,
            total_len: u16::from_be_bytes([ip[2], ip[3]]),
            protocol: ip[9],
            src: addr(12),
            dst: addr(16),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv6Header {
    pub payload_len: u16,
    pub next_header: u8,
    pub hop_limit: u8,
    pub src: Ipv6Addr,
    pub dst: Ipv6Addr,
}

impl Ipv6Header {
    pub fn parse(frame: &[u8]) -> Option<Self> {
        let ip = frame.get(ETH_HDR_LEN..ETH_HDR_LEN + IPV6_HDR_LEN)?;
        if ip[0] >> 4 != 6 {
            return None;
        }
        let addr = |off: usize| -> Option<Ipv6Addr> {
            let b: [u8; 16] = ip.get(off..off + 16)?.try_into().ok()?;
            Some(Ipv6Addr::from(b))
        };
        Some(Self {
            payload_len: u16::from_be_bytes([ip[4], ip[5]]),
            next_header: ip[6],
            hop_limit: ip[7],
            src: addr(8)?,
            dst: addr(24)?,
        })
    }
}

/// Multicast MAC for an IPv4 group address (01:00:5e + low 23 bits).
pub fn ipv4_multicast_mac(addr: Ipv4Addr) -> MacAddr {
    let o = addr.octets();
    MacAddr([0x01, 0x00, 0x5e, o[1] & 0x7f, o[2], o[3]])
}

/// Multicast MAC for an IPv6 group address (33:33 + low 32 bits).
pub fn ipv6_multicast_mac(addr: Ipv6Addr) -> MacAddr {
    let o = addr.octets();
    MacAddr([0x33, 0x33, o[12], o[13], o[14], o[15]])
}
