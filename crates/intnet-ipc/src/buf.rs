//! The interface buffer: one receive ring and one send ring plus statistics in
//! a single shareable block.

use crate::layout::{buf_bytes, buf_hdr, ring_bytes, ring_hdr, INTNETBUF_MAGIC};
use crate::ring::Ring;
use crate::shared::SharedMem;
use core::sync::atomic::Ordering;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BufError {
    #[error("buffer too small: {len} bytes")]
    TooSmall { len: usize },
    #[error("bad magic {found:#010x}")]
    BadMagic { found: u32 },
    #[error("size mismatch: cbBuf={cb_buf} cbRecv={cb_recv} cbSend={cb_send} actual={actual}")]
    SizeMismatch {
        cb_buf: u32,
        cb_recv: u32,
        cb_send: u32,
        actual: usize,
    },
    #[error("{0} ring is not where the layout puts it")]
    RingPlacement(&'static str),
    #[error("{0} ring cursors are inconsistent")]
    RingCursors(&'static str),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BufStats {
    pub yields_ok: u64,
    pub yields_nok: u64,
    pub lost: u64,
    pub bad_frames: u64,
}

pub struct IntNetBuf {
    mem: SharedMem,
}

impl IntNetBuf {
    /// Allocates a buffer; both sizes are raised to the minimum and aligned.
    pub fn new(cb_recv: usize, cb_send: usize) -> Self {
        let cb_recv = ring_bytes(cb_recv);
        let cb_send = ring_bytes(cb_send);
        let total = buf_bytes(cb_recv, cb_send);
        assert!(total <= u32::MAX as usize, "interface buffer too large");

        let mem = SharedMem::new(total);
        mem.write_u32(buf_hdr::MAGIC, INTNETBUF_MAGIC);
        mem.write_u32(buf_hdr::CB_BUF, total as u32);
        mem.write_u32(buf_hdr::CB_RECV, cb_recv as u32);
        mem.write_u32(buf_hdr::CB_SEND, cb_send as u32);

        let buf = Self { mem };
        buf.recv()
            .init((buf_hdr::BYTES - buf_hdr::RECV) as u32, cb_recv as u32);
        buf.send().init(
            (buf_hdr::BYTES + cb_recv - buf_hdr::SEND) as u32,
            cb_send as u32,
        );
        buf
    }

    /// Wraps an existing image (e.g. one received from another address space)
    /// after validating it.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BufError> {
        if bytes.len() < buf_hdr::BYTES {
            return Err(BufError::TooSmall { len: bytes.len() });
        }
        let buf = Self {
            mem: SharedMem::from_bytes(bytes),
        };
        buf.validate()?;
        Ok(buf)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.mem.to_vec()
    }

    #[cfg(test)]
    pub(crate) fn mem(&self) -> &SharedMem {
        &self.mem
    }

    pub fn len(&self) -> usize {
        self.mem.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mem.len() == 0
    }

    pub fn magic(&self) -> u32 {
        self.mem.read_u32(buf_hdr::MAGIC)
    }

    pub fn cb_buf(&self) -> u32 {
        self.mem.read_u32(buf_hdr::CB_BUF)
    }

    pub fn cb_recv(&self) -> u32 {
        self.mem.read_u32(buf_hdr::CB_RECV)
    }

    pub fn cb_send(&self) -> u32 {
        self.mem.read_u32(buf_hdr::CB_SEND)
    }

    /// Switch → consumer ring.
    pub fn recv(&self) -> Ring<'_> {
        Ring::new(&self.mem, buf_hdr::RECV)
    }

    /// Consumer → switch ring.
    pub fn send(&self) -> Ring<'_> {
        Ring::new(&self.mem, buf_hdr::SEND)
    }

    /// Structural check; a buffer failing it must not be used.
    pub fn validate(&self) -> Result<(), BufError> {
        let magic = self.magic();
        if magic != INTNETBUF_MAGIC {
            return Err(BufError::BadMagic { found: magic });
        }
        let (cb_buf, cb_recv, cb_send) = (self.cb_buf(), self.cb_recv(), self.cb_send());
        let expected = buf_hdr::BYTES as u64 + u64::from(cb_recv) + u64::from(cb_send);
        if u64::from(cb_buf) != expected || cb_buf as usize != self.mem.len() {
            return Err(BufError::SizeMismatch {
                cb_buf,
                cb_recv,
                cb_send,
                actual: self.mem.len(),
            });
        }

        let recv = self.recv();
        let recv_start = buf_hdr::RECV as u64 + u64::from(recv.off_start());
        let recv_end = buf_hdr::RECV as u64 + u64::from(recv.off_end());
        if recv_start != buf_hdr::BYTES as u64 || recv_end != recv_start + u64::from(cb_recv) {
            return Err(BufError::RingPlacement("receive"));
        }

        let send = self.send();
        let send_start = buf_hdr::SEND as u64 + u64::from(send.off_start());
        let send_end = buf_hdr::SEND as u64 + u64::from(send.off_end());
        if send_start != recv_end || send_end != send_start + u64::from(cb_send) {
            return Err(BufError::RingPlacement("send"));
        }

        if !recv.is_consistent() {
            return Err(BufError::RingCursors("receive"));
        }
        if !send.is_consistent() {
            return Err(BufError::RingCursors("send"));
        }
        Ok(())
    }

    pub fn stats(&self) -> BufStats {
        let load = |off| self.mem.atomic_u64(off).load(Ordering::Relaxed);
        BufStats {
            yields_ok: load(buf_hdr::STAT_YIELDS_OK),
            yields_nok: load(buf_hdr::STAT_YIELDS_NOK),
            lost: load(buf_hdr::STAT_LOST),
            bad_frames: load(buf_hdr::STAT_BAD_FRAMES),
        }
    }

    fn bump(&self, off: usize) {
        self.mem.atomic_u64(off).fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_yields_ok(&self) {
        self.bump(buf_hdr::STAT_YIELDS_OK);
    }

    pub fn inc_yields_nok(&self) {
        self.bump(buf_hdr::STAT_YIELDS_NOK);
    }

    pub fn inc_lost(&self) {
        self.bump(buf_hdr::STAT_LOST);
    }

    pub fn inc_bad_frames(&self) {
        self.bump(buf_hdr::STAT_BAD_FRAMES);
    }

    /// Overflow counter of the receive ring.
    pub fn recv_overflows(&self) -> u64 {
        self.mem
            .atomic_u64(buf_hdr::RECV + ring_hdr::STAT_OVERFLOWS)
            .load(Ordering::Relaxed)
    }
}

impl core::fmt::Debug for IntNetBuf {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IntNetBuf")
            .field("cb_buf", &self.cb_buf())
            .field("recv", &self.recv())
            .field("send", &self.send())
            .finish()
    }
}
