//! Shared memory layout contract for an internal network interface buffer.
//!
//! One interface buffer is a single allocation mapped by both the switch and the
//! interface consumer:
//!
//! - a fixed 320-byte header (magic, sizes, the two ring headers, statistics)
//! - the receive ring data area (switch → consumer)
//! - the send ring data area (consumer → switch)
//!
//! Every reference inside the block is a byte offset, never a pointer, so both
//! sides can map it at different addresses. Multi-byte fields use the host's
//! native byte order; producer and consumer always share a machine.

use bytemuck::{Pod, Zeroable};

/// Interface buffer magic (a date, 1960-07-16).
pub const INTNETBUF_MAGIC: u32 = 0x1960_0716;

/// Frame headers, and therefore every ring cursor, are aligned to this many bytes.
pub const HDR_ALIGN: usize = 8;

/// Largest frame length representable in the 24-bit header field.
pub const MAX_FRAME_LEN: u32 = 0x00FF_FFFF;

/// Smallest ring data area accepted; requested sizes are raised to this.
pub const MIN_RING_BYTES: usize = HDR_ALIGN * 4;

/// Frame type tags. Anything else in a header is treated as corruption.
pub mod hdr_type {
    pub const FRAME: u8 = 0x42;
    pub const GSO: u8 = 0x43;
    pub const PADDING: u8 = 0x53;
}

/// Byte offsets inside a 48-byte ring header.
///
/// `OFF_START`/`OFF_END` (and every cursor) are relative to the ring header's own
/// position in the buffer.
pub mod ring_hdr {
    pub const OFF_START: usize = 0;
    pub const OFF_END: usize = 4;
    pub const OFF_READ: usize = 8;
    pub const ALIGN0: usize = 12;
    pub const OFF_WRITE_COM: usize = 16;
    pub const OFF_WRITE_INT: usize = 20;
    pub const STAT_WRITTEN: usize = 24;
    pub const STAT_FRAMES: usize = 32;
    pub const STAT_OVERFLOWS: usize = 40;
    pub const BYTES: usize = 48;
}

/// Byte offsets inside the 320-byte interface buffer header.
pub mod buf_hdr {
    pub const MAGIC: usize = 0;
    pub const CB_BUF: usize = 4;
    pub const CB_RECV: usize = 8;
    pub const CB_SEND: usize = 12;
    pub const RECV: usize = 16;
    pub const SEND: usize = 64;
    pub const STAT_YIELDS_OK: usize = 112;
    pub const STAT_YIELDS_NOK: usize = 120;
    pub const STAT_LOST: usize = 128;
    pub const STAT_BAD_FRAMES: usize = 136;
    pub const PROFILE: usize = 144;
    pub const PROFILE_SLOTS: usize = 5;
    pub const PROFILE_SLOT_BYTES: usize = 32;
    pub const BYTES: usize = 320;
}

const _: () = assert!(buf_hdr::RECV + ring_hdr::BYTES == buf_hdr::SEND);
const _: () = assert!(buf_hdr::SEND + ring_hdr::BYTES == buf_hdr::STAT_YIELDS_OK);
const _: () = assert!(
    buf_hdr::PROFILE + buf_hdr::PROFILE_SLOTS * buf_hdr::PROFILE_SLOT_BYTES <= buf_hdr::BYTES
);
const _: () = assert!(buf_hdr::BYTES % HDR_ALIGN == 0);
const _: () = assert!(ring_hdr::STAT_WRITTEN % 8 == 0);

/// The 8-byte frame header (`INTNETHDR`).
///
/// Word 0 packs the 24-bit frame length with the type tag in the top byte.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct IntNetHdr {
    pub len_and_type: u32,
    /// Offset from the header to the first byte of frame data.
    pub off_frame: i32,
}

impl IntNetHdr {
    pub const SIZE_BYTES: usize = core::mem::size_of::<Self>();

    pub fn new(frame_type: u8, cb_frame: u32, off_frame: i32) -> Self {
        debug_assert!(cb_frame <= MAX_FRAME_LEN);
        Self {
            len_and_type: (cb_frame & MAX_FRAME_LEN) | (u32::from(frame_type) << 24),
            off_frame,
        }
    }

    pub fn frame_type(&self) -> u8 {
        (self.len_and_type >> 24) as u8
    }

    pub fn cb_frame(&self) -> u32 {
        self.len_and_type & MAX_FRAME_LEN
    }

    pub fn is_known_type(&self) -> bool {
        matches!(
            self.frame_type(),
            hdr_type::FRAME | hdr_type::GSO | hdr_type::PADDING
        )
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

const _: () = assert!(IntNetHdr::SIZE_BYTES == HDR_ALIGN);

pub const fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + (align - 1)) & !(align - 1)
}

pub(crate) const fn align_up_u32(value: u32, align: u32) -> u32 {
    (value + (align - 1)) & !(align - 1)
}

/// Size a requested ring data area is actually given.
pub const fn ring_bytes(requested: usize) -> usize {
    let cb = if requested < MIN_RING_BYTES {
        MIN_RING_BYTES
    } else {
        requested
    };
    align_up(cb, HDR_ALIGN)
}

/// Total interface buffer size for the given (already rounded) ring sizes.
pub const fn buf_bytes(cb_recv: usize, cb_send: usize) -> usize {
    buf_hdr::BYTES + cb_recv + cb_send
}

/// Bytes a frame of `cb_frame` payload bytes consumes in a ring, header included.
pub fn frame_footprint(cb_frame: usize, gso: bool) -> usize {
    let ctx = if gso { crate::gso::GsoContext::SIZE_BYTES } else { 0 };
    IntNetHdr::SIZE_BYTES + ctx + align_up(cb_frame, HDR_ALIGN)
}
