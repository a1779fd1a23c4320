//! Single-writer / single-reader ring of variable-length frames.
//!
//! The ring lives inside an interface buffer and is described by a 48-byte ring
//! header holding the data area bounds, three cursors and statistics:
//!
//! - `offReadX`: owned by the reader.
//! - `offWriteInt`: advanced by the writer when it reserves space.
//! - `offWriteCom`: published by the writer once the reserved frame is filled in.
//!
//! Frames never straddle the end of the data area. When the tail is too short
//! for the next frame the writer fills it with a PADDING frame and places the
//! real frame at the start; readers skip padding transparently.
//!
//! The ring never fills its last free byte, so `offReadX == offWriteCom` always
//! means empty.

use crate::gso::GsoContext;
use crate::layout::{align_up_u32, hdr_type, ring_hdr, IntNetHdr, HDR_ALIGN, MAX_FRAME_LEN};
use crate::shared::SharedMem;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

const HDR: u32 = IntNetHdr::SIZE_BYTES as u32;
const ALIGN: u32 = HDR_ALIGN as u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    /// Not enough free space right now; the overflow counter was bumped.
    Full,
    /// The frame can never fit in this ring.
    TooLarge,
    /// A previously reserved frame has not been committed yet.
    Busy,
    /// The ring's bounds or cursors are invalid.
    Corrupt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopError {
    /// The ring is empty.
    Empty,
    /// Corruption detected (bad type tag, misaligned or out-of-range offsets).
    Corrupt,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RingStats {
    pub bytes_written: u64,
    pub frames_written: u64,
    pub overflows: u64,
}

/// Location and kind of the frame at the read cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub gso: Option<GsoContext>,
    pub len: usize,
    data: usize,
}

/// A frame copied out of a ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub gso: Option<GsoContext>,
    pub data: Vec<u8>,
}

/// View of one ring inside an interface buffer.
#[derive(Clone, Copy)]
pub struct Ring<'a> {
    mem: &'a SharedMem,
    hdr: usize,
}

impl<'a> Ring<'a> {
    pub(crate) fn new(mem: &'a SharedMem, hdr: usize) -> Self {
        Self { mem, hdr }
    }

    /// Writes a fresh ring header whose data area spans `[off_start, off_start + cb)`.
    pub(crate) fn init(&self, off_start: u32, cb: u32) {
        self.mem.write_u32(self.hdr + ring_hdr::OFF_START, off_start);
        self.mem.write_u32(self.hdr + ring_hdr::OFF_END, off_start + cb);
        self.mem.write_u32(self.hdr + ring_hdr::ALIGN0, 0);
        self.read_cursor().store(off_start, Ordering::Relaxed);
        self.write_int().store(off_start, Ordering::Relaxed);
        self.write_com().store(off_start, Ordering::Release);
    }

    /// Data area start, relative to the ring header.
    pub fn off_start(&self) -> u32 {
        self.mem.read_u32(self.hdr + ring_hdr::OFF_START)
    }

    /// Data area end (exclusive), relative to the ring header.
    pub fn off_end(&self) -> u32 {
        self.mem.read_u32(self.hdr + ring_hdr::OFF_END)
    }

    pub fn capacity_bytes(&self) -> usize {
        self.off_end().saturating_sub(self.off_start()) as usize
    }

    /// Position of the ring header within the interface buffer.
    pub fn header_offset(&self) -> usize {
        self.hdr
    }

    fn read_cursor(&self) -> &'a AtomicU32 {
        self.mem.atomic_u32(self.hdr + ring_hdr::OFF_READ)
    }

    fn write_com(&self) -> &'a AtomicU32 {
        self.mem.atomic_u32(self.hdr + ring_hdr::OFF_WRITE_COM)
    }

    fn write_int(&self) -> &'a AtomicU32 {
        self.mem.atomic_u32(self.hdr + ring_hdr::OFF_WRITE_INT)
    }

    fn stat(&self, off: usize) -> &'a AtomicU64 {
        self.mem.atomic_u64(self.hdr + off)
    }

    pub fn read_offset(&self) -> u32 {
        self.read_cursor().load(Ordering::Acquire)
    }

    pub fn write_committed_offset(&self) -> u32 {
        self.write_com().load(Ordering::Acquire)
    }

    pub fn write_internal_offset(&self) -> u32 {
        self.write_int().load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.read_offset() == self.write_committed_offset()
    }

    pub fn has_more(&self) -> bool {
        !self.is_empty()
    }

    /// Committed bytes waiting for the reader (headers and padding included).
    pub fn readable(&self) -> u32 {
        let read = self.read_offset();
        let com = self.write_committed_offset();
        if read <= com {
            com - read
        } else {
            self.off_end().saturating_sub(read) + com.saturating_sub(self.off_start())
        }
    }

    /// Free bytes the writer could use, less one header of slack.
    pub fn writable(&self) -> u32 {
        let read = self.read_offset();
        let int = self.write_internal_offset();
        if read <= int {
            (self.off_end().saturating_sub(int) + read.saturating_sub(self.off_start()))
                .saturating_sub(HDR)
        } else {
            (read - int).saturating_sub(HDR)
        }
    }

    /// Cursor sanity check: bounds, alignment and the relative order of the
    /// read, committed and internal write cursors.
    pub fn is_consistent(&self) -> bool {
        let Some((start, end)) = self.bounds() else {
            return false;
        };
        let read = self.read_offset();
        let com = self.write_committed_offset();
        let int = self.write_internal_offset();
        for cursor in [read, com, int] {
            if cursor % ALIGN != 0 || cursor < start || cursor >= end {
                return false;
            }
        }
        if read <= com {
            com <= int || int < read
        } else {
            com <= int
        }
    }

    pub fn stats(&self) -> RingStats {
        RingStats {
            bytes_written: self.stat(ring_hdr::STAT_WRITTEN).load(Ordering::Relaxed),
            frames_written: self.stat(ring_hdr::STAT_FRAMES).load(Ordering::Relaxed),
            overflows: self.stat(ring_hdr::STAT_OVERFLOWS).load(Ordering::Relaxed),
        }
    }

    /// Data area bounds, if they are aligned and inside the buffer.
    fn bounds(&self) -> Option<(u32, u32)> {
        let start = self.off_start();
        let end = self.off_end();
        let valid = start % ALIGN == 0
            && end % ALIGN == 0
            && start < end
            && self.abs(end) <= self.mem.len();
        valid.then_some((start, end))
    }

    fn abs(&self, off: u32) -> usize {
        self.hdr + off as usize
    }

    fn write_hdr(&self, off: u32, hdr: IntNetHdr) {
        self.mem.write(self.abs(off), hdr.as_bytes());
    }

    fn read_hdr(&self, off: u32) -> IntNetHdr {
        let mut raw = [0u8; IntNetHdr::SIZE_BYTES];
        self.mem.read(self.abs(off), &mut raw);
        bytemuck::pod_read_unaligned(&raw)
    }

    /// Reserves room for a frame of `cb_frame` bytes.
    ///
    /// The reservation is invisible to the reader until the returned slot is
    /// committed.
    pub fn allocate_frame(&self, cb_frame: usize) -> Result<FrameSlot<'a>, PushError> {
        self.allocate(cb_frame, None)
    }

    /// Reserves room for a GSO frame; the context is stored right after the header.
    pub fn allocate_gso_frame(
        &self,
        cb_frame: usize,
        gso: &GsoContext,
    ) -> Result<FrameSlot<'a>, PushError> {
        self.allocate(cb_frame, Some(gso))
    }

    fn allocate(&self, cb_frame: usize, gso: Option<&GsoContext>) -> Result<FrameSlot<'a>, PushError> {
        if cb_frame > MAX_FRAME_LEN as usize {
            return Err(PushError::TooLarge);
        }
        let cb = cb_frame as u32;
        let ctx = if gso.is_some() {
            GsoContext::SIZE_BYTES as u32
        } else {
            0
        };
        let need = HDR + ctx + align_up_u32(cb, ALIGN);
        let Some((start, end)) = self.bounds() else {
            return Err(PushError::Corrupt);
        };
        if u64::from(need) >= u64::from(end - start) {
            return Err(PushError::TooLarge);
        }
        let frame_type = if gso.is_some() {
            hdr_type::GSO
        } else {
            hdr_type::FRAME
        };

        let int = self.write_int().load(Ordering::Acquire);
        if int != self.write_com().load(Ordering::Acquire) {
            return Err(PushError::Busy);
        }
        let read = self.read_cursor().load(Ordering::Acquire);
        for cursor in [read, int] {
            if cursor % ALIGN != 0 || cursor < start || cursor >= end {
                return Err(PushError::Corrupt);
            }
        }

        // (frame header position, new internal cursor, padding header position)
        let placement = if read <= int {
            if end - int >= need {
                let mut new_int = int + need;
                if new_int >= end {
                    new_int = start;
                }
                if new_int == start && read == start {
                    None
                } else {
                    Some((int, new_int, None))
                }
            } else if read - start > need {
                Some((start, start + need, Some(int)))
            } else {
                None
            }
        } else if read - int > need {
            Some((int, int + need, None))
        } else {
            None
        };

        let Some((at, new_int, padding_at)) = placement else {
            self.stat(ring_hdr::STAT_OVERFLOWS)
                .fetch_add(1, Ordering::Relaxed);
            return Err(PushError::Full);
        };

        if self
            .write_int()
            .compare_exchange(int, new_int, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(PushError::Busy);
        }

        if let Some(pad) = padding_at {
            self.write_hdr(pad, IntNetHdr::new(hdr_type::PADDING, end - pad - HDR, HDR as i32));
        }
        self.write_hdr(at, IntNetHdr::new(frame_type, cb, (HDR + ctx) as i32));
        if let Some(gso) = gso {
            self.mem.write(self.abs(at + HDR), gso.as_bytes());
        }

        Ok(FrameSlot {
            ring: *self,
            hdr_off: at,
            data_off: at + HDR + ctx,
            cb,
            frame_type,
            reserved_end: at + need,
            done: false,
        })
    }

    /// Copies `parts` into the ring as one frame and commits it.
    pub fn write_frame(&self, parts: &[&[u8]]) -> Result<(), PushError> {
        let total = parts.iter().map(|p| p.len()).sum();
        let mut slot = self.allocate_frame(total)?;
        slot.write_parts(parts);
        slot.commit();
        Ok(())
    }

    pub fn write_gso_frame(&self, gso: &GsoContext, parts: &[&[u8]]) -> Result<(), PushError> {
        let total = parts.iter().map(|p| p.len()).sum();
        let mut slot = self.allocate_gso_frame(total, gso)?;
        slot.write_parts(parts);
        slot.commit();
        Ok(())
    }

    /// Decodes the header at `read`, returning it with the cursor that follows
    /// the frame (already wrapped).
    fn frame_at(&self, read: u32, com: u32) -> Result<(IntNetHdr, u32), PopError> {
        let (start, end) = self.bounds().ok_or(PopError::Corrupt)?;
        if read % ALIGN != 0 || read < start || read.saturating_add(HDR) > end {
            return Err(PopError::Corrupt);
        }
        let hdr = self.read_hdr(read);
        if !hdr.is_known_type() {
            return Err(PopError::Corrupt);
        }

        let data = i64::from(read) + i64::from(hdr.off_frame);
        let cb = i64::from(hdr.cb_frame());
        if hdr.frame_type() != hdr_type::PADDING {
            let min_data = if hdr.frame_type() == hdr_type::GSO {
                i64::from(read) + i64::from(HDR) + GsoContext::SIZE_BYTES as i64
            } else {
                i64::from(start)
            };
            if data < min_data || data + cb > i64::from(end) {
                return Err(PopError::Corrupt);
            }
        }

        let next = data + i64::from(align_up_u32(hdr.cb_frame(), ALIGN));
        if next <= i64::from(read) || next > i64::from(end) || next % i64::from(ALIGN) != 0 {
            return Err(PopError::Corrupt);
        }
        let consumed = (next - i64::from(read)) as u32;
        let readable = if read <= com {
            com - read
        } else {
            (end - read) + com.saturating_sub(start)
        };
        if consumed > readable {
            return Err(PopError::Corrupt);
        }
        let next = if next as u32 >= end { start } else { next as u32 };
        Ok((hdr, next))
    }

    /// Returns the next real frame, skipping (and consuming) padding frames.
    pub fn peek(&self) -> Result<FrameInfo, PopError> {
        loop {
            let read = self.read_cursor().load(Ordering::Acquire);
            let com = self.write_com().load(Ordering::Acquire);
            if read == com {
                return Err(PopError::Empty);
            }
            let (hdr, next) = self.frame_at(read, com)?;
            if hdr.frame_type() == hdr_type::PADDING {
                self.read_cursor().store(next, Ordering::Release);
                continue;
            }

            let gso = if hdr.frame_type() == hdr_type::GSO {
                let mut raw = [0u8; GsoContext::SIZE_BYTES];
                self.mem.read(self.abs(read + HDR), &mut raw);
                Some(bytemuck::pod_read_unaligned(&raw))
            } else {
                None
            };
            let data = (i64::from(read) + i64::from(hdr.off_frame)) as u32;
            return Ok(FrameInfo {
                gso,
                len: hdr.cb_frame() as usize,
                data: self.abs(data),
            });
        }
    }

    /// Copies the payload described by `info` into `out` (at most `out.len()` bytes).
    pub fn copy_frame(&self, info: &FrameInfo, out: &mut [u8]) -> usize {
        let n = info.len.min(out.len());
        self.mem.read(info.data, &mut out[..n]);
        n
    }

    /// Consumes the frame at the read cursor, whatever its type.
    pub fn skip_frame(&self) -> Result<(), PopError> {
        let read = self.read_cursor().load(Ordering::Acquire);
        let com = self.write_com().load(Ordering::Acquire);
        if read == com {
            return Err(PopError::Empty);
        }
        let (_, next) = self.frame_at(read, com)?;
        self.read_cursor().store(next, Ordering::Release);
        Ok(())
    }

    pub fn try_pop(&self) -> Result<Frame, PopError> {
        let info = self.peek()?;
        let mut data = vec![0u8; info.len];
        self.copy_frame(&info, &mut data);
        self.skip_frame()?;
        Ok(Frame {
            gso: info.gso,
            data,
        })
    }
}

impl core::fmt::Debug for Ring<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Ring")
            .field("start", &self.off_start())
            .field("end", &self.off_end())
            .field("read", &self.read_offset())
            .field("write_com", &self.write_committed_offset())
            .field("write_int", &self.write_internal_offset())
            .finish()
    }
}

/// A reserved, not yet visible frame.
///
/// Dropping a slot without committing it turns the reservation into padding so
/// the ring does not stay busy.
pub struct FrameSlot<'a> {
    ring: Ring<'a>,
    hdr_off: u32,
    data_off: u32,
    cb: u32,
    frame_type: u8,
    reserved_end: u32,
    done: bool,
}

impl FrameSlot<'_> {
    pub fn len(&self) -> usize {
        self.cb as usize
    }

    pub fn is_empty(&self) -> bool {
        self.cb == 0
    }

    /// Writes `data` at `off` bytes into the frame payload.
    pub fn write(&mut self, off: usize, data: &[u8]) {
        assert!(off + data.len() <= self.cb as usize, "frame slot overflow");
        self.ring
            .mem
            .write(self.ring.abs(self.data_off) + off, data);
    }

    pub fn write_parts(&mut self, parts: &[&[u8]]) {
        let mut off = 0;
        for part in parts {
            self.write(off, part);
            off += part.len();
        }
    }

    pub fn commit(self) {
        let cb = self.cb as usize;
        self.commit_ex(cb);
    }

    /// Commits only the first `cb_used` bytes and hands the rest of the
    /// reservation back to the writer.
    pub fn commit_ex(mut self, cb_used: usize) {
        debug_assert!(cb_used <= self.cb as usize);
        let cb_used = u32::try_from(cb_used).map_or(self.cb, |cb| cb.min(self.cb));
        if cb_used != self.cb {
            let off_frame = (self.data_off - self.hdr_off) as i32;
            self.ring
                .write_hdr(self.hdr_off, IntNetHdr::new(self.frame_type, cb_used, off_frame));
            // Only one reservation is ever outstanding, so the internal cursor
            // can simply move back to the end of the shrunk frame.
            let mut frame_end = self.data_off + align_up_u32(cb_used, ALIGN);
            if frame_end >= self.ring.off_end() {
                frame_end = self.ring.off_start();
            }
            self.ring.write_int().store(frame_end, Ordering::Release);
        }
        self.ring
            .stat(ring_hdr::STAT_WRITTEN)
            .fetch_add(u64::from(cb_used), Ordering::Relaxed);
        self.ring
            .stat(ring_hdr::STAT_FRAMES)
            .fetch_add(1, Ordering::Relaxed);
        self.publish();
    }

    fn publish(&mut self) {
        let int = self.ring.write_int().load(Ordering::Acquire);
        self.ring.write_com().store(int, Ordering::Release);
        self.done = true;
    }
}

impl Drop for FrameSlot<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let span = self.reserved_end - self.hdr_off;
        self.ring.write_hdr(
            self.hdr_off,
            IntNetHdr::new(hdr_type::PADDING, span - HDR, HDR as i32),
        );
        self.publish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buf::IntNetBuf;

    #[test]
    fn abandoned_slot_becomes_padding() {
        let buf = IntNetBuf::new(256, 256);
        let ring = buf.send();
        drop(ring.allocate_frame(40).unwrap());
        assert!(ring.has_more());
        assert_eq!(ring.try_pop(), Err(PopError::Empty));
        assert!(ring.is_empty());
        ring.write_frame(&[b"after"]).unwrap();
        assert_eq!(ring.try_pop().unwrap().data, b"after");
    }

    #[test]
    fn uncommitted_reservation_blocks_second_writer() {
        let buf = IntNetBuf::new(256, 256);
        let ring = buf.send();
        let slot = ring.allocate_frame(16).unwrap();
        assert_eq!(ring.allocate_frame(16).err(), Some(PushError::Busy));
        assert!(ring.is_empty());
        slot.commit();
        assert!(!ring.is_empty());
    }

    #[test]
    fn commit_ex_shrinks_frame() {
        let buf = IntNetBuf::new(256, 256);
        let ring = buf.recv();
        let mut slot = ring.allocate_frame(100).unwrap();
        slot.write(0, &[7u8; 20]);
        slot.commit_ex(20);
        let frame_end = ring.off_start() + HDR + 24;
        assert_eq!(ring.write_committed_offset(), frame_end);
        assert_eq!(ring.write_internal_offset(), frame_end);
        let frame = ring.try_pop().unwrap();
        assert_eq!(frame.data, vec![7u8; 20]);
        assert!(ring.is_empty());
        assert_eq!(ring.read_offset(), ring.write_committed_offset());
        assert_eq!(ring.stats().bytes_written, 20);
        assert_eq!(ring.stats().frames_written, 1);
    }

    #[test]
    fn shrunk_reservation_returns_its_tail() {
        let buf = IntNetBuf::new(256, 256);
        let ring = buf.recv();
        let writable = ring.writable();
        let slot = ring.allocate_frame(120).unwrap();
        slot.commit_ex(8);
        assert_eq!(ring.writable(), writable - (HDR + 8));
        ring.write_frame(&[&[1u8; 64]]).unwrap();
        assert_eq!(ring.try_pop().unwrap().data.len(), 8);
        assert_eq!(ring.try_pop().unwrap().data, vec![1u8; 64]);
        assert_eq!(ring.try_pop(), Err(PopError::Empty));
        assert_eq!(ring.read_offset(), ring.write_internal_offset());
    }

    #[test]
    fn corrupt_type_tag_is_reported() {
        let buf = IntNetBuf::new(256, 256);
        let ring = buf.recv();
        ring.write_frame(&[b"hello"]).unwrap();
        let hdr_at = ring.abs(ring.read_offset());
        buf.mem().write(hdr_at, IntNetHdr::new(0x77, 5, 8).as_bytes());
        assert_eq!(ring.peek(), Err(PopError::Corrupt));
    }
}
