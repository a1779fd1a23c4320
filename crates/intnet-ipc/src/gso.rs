//! Generic segmentation offload context and segment carving.
//!
//! A GSO frame is one oversized TCP/UDP frame plus a context describing where
//! its headers are and how large each wire segment may be. Whoever cannot hand
//! the frame to GSO-capable hardware carves it into regular frames here.

use bytemuck::{Pod, Zeroable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GsoType {
    Ipv4Tcp,
    Ipv6Tcp,
    Ipv4Udp,
    Ipv6Udp,
    Ipv4InIpv6Tcp,
    Ipv4InIpv6Udp,
}

impl GsoType {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => GsoType::Ipv4Tcp,
            2 => GsoType::Ipv6Tcp,
            3 => GsoType::Ipv4Udp,
            4 => GsoType::Ipv6Udp,
            5 => GsoType::Ipv4InIpv6Tcp,
            6 => GsoType::Ipv4InIpv6Udp,
            _ => return None,
        })
    }

    pub fn to_u8(self) -> u8 {
        match self {
            GsoType::Ipv4Tcp => 1,
            GsoType::Ipv6Tcp => 2,
            GsoType::Ipv4Udp => 3,
            GsoType::Ipv6Udp => 4,
            GsoType::Ipv4InIpv6Tcp => 5,
            GsoType::Ipv4InIpv6Udp => 6,
        }
    }

    /// Capability bit used in trunk GSO capability reports.
    pub fn capability_bit(self) -> u32 {
        1 << self.to_u8()
    }

    pub fn is_tcp(self) -> bool {
        matches!(
            self,
            GsoType::Ipv4Tcp | GsoType::Ipv6Tcp | GsoType::Ipv4InIpv6Tcp
        )
    }
}

/// The 8-byte GSO context stored after a GSO frame header.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct GsoContext {
    pub gso_type: u8,
    /// Bytes of headers in the template frame.
    pub cb_hdrs_total: u8,
    /// Bytes of headers repeated in every segment.
    pub cb_hdrs_seg: u8,
    /// Offset of the first (IP) header.
    pub off_hdr1: u8,
    /// Offset of the second (TCP/UDP) header.
    pub off_hdr2: u8,
    pub unused: u8,
    /// Maximum payload bytes per segment.
    pub cb_max_seg: u16,
}

const _: () = assert!(core::mem::size_of::<GsoContext>() == 8);

const ETH_HDR_LEN: u8 = 14;
const IPV4_MIN_LEN: u8 = 20;
const IPV6_HDR_LEN: u8 = 40;
const TCP_MIN_LEN: u8 = 20;
const UDP_HDR_LEN: u8 = 8;

const TCP_FLAG_FIN: u8 = 0x01;
const TCP_FLAG_PSH: u8 = 0x08;

impl GsoContext {
    pub const SIZE_BYTES: usize = core::mem::size_of::<Self>();

    pub fn kind(&self) -> Option<GsoType> {
        GsoType::from_u8(self.gso_type)
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Checks the context against a frame of `cb_frame` bytes.
    pub fn is_valid(&self, cb_frame: usize) -> bool {
        let Some(kind) = self.kind() else {
            return false;
        };
        if self.cb_max_seg == 0
            || usize::from(self.cb_hdrs_total) >= cb_frame
            || self.cb_hdrs_seg > self.cb_hdrs_total
            || self.off_hdr1 < ETH_HDR_LEN
        {
            return false;
        }
        let ip_len = match kind {
            GsoType::Ipv4Tcp | GsoType::Ipv4Udp => IPV4_MIN_LEN,
            // The outer IPv6 header precedes the IPv4 one we edit.
            _ => IPV6_HDR_LEN,
        };
        if u16::from(self.off_hdr2) < u16::from(self.off_hdr1) + u16::from(ip_len) {
            return false;
        }
        let l4_len = if kind.is_tcp() {
            TCP_MIN_LEN
        } else {
            UDP_HDR_LEN
        };
        if u16::from(self.cb_hdrs_total) < u16::from(self.off_hdr2) + u16::from(l4_len) {
            return false;
        }
        if kind.is_tcp() {
            self.cb_hdrs_seg == self.cb_hdrs_total
        } else {
            true
        }
    }

    /// Number of wire segments the frame turns into.
    pub fn segment_count(&self, cb_frame: usize) -> usize {
        let payload = cb_frame.saturating_sub(usize::from(self.cb_hdrs_total));
        payload.div_ceil(usize::from(self.cb_max_seg.max(1)))
    }

    /// Builds the headers of segment `index` into `hdrs_out` and returns where
    /// the segment's payload lives inside `frame`.
    ///
    /// Only TCP over IPv4 and IPv6 can be carved; other types return `None`.
    pub fn carve_segment(
        &self,
        frame: &[u8],
        index: usize,
        hdrs_out: &mut [u8],
    ) -> Option<CarvedSegment> {
        let kind = self.kind()?;
        if !matches!(kind, GsoType::Ipv4Tcp | GsoType::Ipv6Tcp) || !self.is_valid(frame.len()) {
            return None;
        }
        let count = self.segment_count(frame.len());
        if index >= count {
            return None;
        }
        let hdrs = usize::from(self.cb_hdrs_total);
        if hdrs_out.len() < hdrs {
            return None;
        }
        let max_seg = usize::from(self.cb_max_seg);
        let payload_off = hdrs + index * max_seg;
        let payload_len = max_seg.min(frame.len() - payload_off);
        let last = index + 1 == count;

        let out = &mut hdrs_out[..hdrs];
        out.copy_from_slice(&frame[..hdrs]);

        let ip = usize::from(self.off_hdr1);
        let tcp = usize::from(self.off_hdr2);
        let tcp_len = hdrs - tcp + payload_len;
        match kind {
            GsoType::Ipv4Tcp => {
                let ihl = usize::from(out[ip] & 0x0f) * 4;
                if ihl < usize::from(IPV4_MIN_LEN) || ip + ihl > tcp {
                    return None;
                }
                let total = (hdrs - ip + payload_len) as u16;
                out[ip + 2..ip + 4].copy_from_slice(&total.to_be_bytes());
                let id = u16::from_be_bytes([out[ip + 4], out[ip + 5]]).wrapping_add(index as u16);
                out[ip + 4..ip + 6].copy_from_slice(&id.to_be_bytes());
                out[ip + 10..ip + 12].fill(0);
                let sum = checksum_finish(checksum_add(0, &out[ip..ip + ihl]));
                out[ip + 10..ip + 12].copy_from_slice(&sum.to_be_bytes());
            }
            _ => {
                let payload_len_field = (hdrs - ip - usize::from(IPV6_HDR_LEN) + payload_len) as u16;
                out[ip + 4..ip + 6].copy_from_slice(&payload_len_field.to_be_bytes());
            }
        }

        let seq = u32::from_be_bytes([out[tcp + 4], out[tcp + 5], out[tcp + 6], out[tcp + 7]])
            .wrapping_add((index * max_seg) as u32);
        out[tcp + 4..tcp + 8].copy_from_slice(&seq.to_be_bytes());
        if !last {
            out[tcp + 13] &= !(TCP_FLAG_FIN | TCP_FLAG_PSH);
        }

        out[tcp + 16..tcp + 18].fill(0);
        let pseudo = match kind {
            GsoType::Ipv4Tcp => &out[ip + 12..ip + 20],
            _ => &out[ip + 8..ip + 40],
        };
        let mut sum = checksum_add(0, pseudo) + 6 + tcp_len as u32;
        sum = checksum_add(sum, &out[tcp..hdrs]);
        sum = checksum_add_at(sum, &frame[payload_off..payload_off + payload_len], hdrs - tcp);
        let tcp_sum = checksum_finish(sum);
        out[tcp + 16..tcp + 18].copy_from_slice(&tcp_sum.to_be_bytes());

        Some(CarvedSegment {
            hdrs_len: hdrs,
            payload_off,
            payload_len,
        })
    }

    /// Carves every segment into standalone frames.
    pub fn carve_all(&self, frame: &[u8]) -> Option<Vec<Vec<u8>>> {
        let mut hdrs = [0u8; 256];
        let count = self.segment_count(frame.len());
        let mut out = Vec::with_capacity(count);
        for index in 0..count {
            let seg = self.carve_segment(frame, index, &mut hdrs)?;
            let mut wire = Vec::with_capacity(seg.hdrs_len + seg.payload_len);
            wire.extend_from_slice(&hdrs[..seg.hdrs_len]);
            wire.extend_from_slice(&frame[seg.payload_off..seg.payload_off + seg.payload_len]);
            out.push(wire);
        }
        Some(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CarvedSegment {
    pub hdrs_len: usize,
    pub payload_off: usize,
    pub payload_len: usize,
}

fn checksum_add(sum: u32, data: &[u8]) -> u32 {
    checksum_add_at(sum, data, 0)
}

/// Adds `data` to a ones-complement sum, where `data` starts `pos` bytes into
/// the summed region (odd positions shift the byte lanes).
fn checksum_add_at(mut sum: u32, data: &[u8], pos: usize) -> u32 {
    let mut iter = data.iter();
    if pos % 2 == 1 {
        if let Some(&b) = iter.next() {
            sum += u32::from(b);
        }
    }
    let rest = iter.as_slice();
    let mut chunks = rest.chunks_exact(2);
    for pair in &mut chunks {
        sum += u32::from(u16::from_be_bytes([pair[0], pair[1]]));
        if sum > 0xFFFF_0000 {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }
    }
    if let [b] = chunks.remainder() {
        sum += u32::from(*b) << 8;
    }
    sum
}

fn checksum_finish(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}
