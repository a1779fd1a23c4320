//! Scatter/gather lists: one frame in transit between the switch and a trunk
//! driver, described as a list of segments.
//!
//! Three ownership shapes exist:
//! - [`Sg`] is the list itself. Segments either borrow (`Sg<'a>`) or own their
//!   bytes (`Sg<'static>`).
//! - [`TempSg`] wraps a borrowed list that is only valid for the call that
//!   supplied it. Releasing it does nothing; keeping it means copying out.
//! - [`SgRef`] is a counted handle. Every `retain` must be paired with one
//!   `release`, and the call that created it holds one implicit reference. The
//!   free path ([`FreePath`]) runs exactly once, on the transition to zero.

use crate::error::{Result, TrunkError};
use bitflags::bitflags;
use intnet_ipc::GsoContext;
use std::borrow::Cow;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Physical address of a segment that has none.
pub const NIL_PHYS: u64 = u64::MAX;

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct SgFlags: u16 {
        /// Backing memory only lives for the duration of the providing call.
        const TEMP = 1 << 0;
        /// The frame is an IPv4 ARP packet whose addresses may need editing.
        const ARP_IPV4 = 1 << 1;
        /// The frame was copied into a scratch buffer before editing.
        const PKT_CP_IN_TMP = 1 << 2;
        /// Returned to a pool when released instead of dropped.
        const FREE = 1 << 3;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SgSeg<'a> {
    /// Physical address, or [`NIL_PHYS`].
    pub phys: u64,
    pub data: Cow<'a, [u8]>,
}

impl SgSeg<'_> {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn has_phys(&self) -> bool {
        self.phys != NIL_PHYS
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sg<'a> {
    owner: u64,
    /// Free for the driver holding the list.
    pub user: [u64; 2],
    gso: Option<GsoContext>,
    cb_total: usize,
    flags: SgFlags,
    segs_alloc: usize,
    segs: Vec<SgSeg<'a>>,
}

impl<'a> Sg<'a> {
    pub fn new(cb_total: usize, segs_alloc: usize) -> Self {
        Self {
            owner: 0,
            user: [0; 2],
            gso: None,
            cb_total,
            flags: SgFlags::empty(),
            segs_alloc,
            segs: Vec::with_capacity(segs_alloc),
        }
    }

    /// A single-segment list over `frame`.
    pub fn from_frame(frame: impl Into<Cow<'a, [u8]>>) -> Self {
        let data = frame.into();
        let mut sg = Self::new(data.len(), 1);
        sg.segs.push(SgSeg {
            phys: NIL_PHYS,
            data,
        });
        sg
    }

    pub fn add_segment(&mut self, data: impl Into<Cow<'a, [u8]>>, phys: Option<u64>) -> Result<()> {
        if self.segs.len() >= self.segs_alloc {
            return Err(TrunkError::SegmentsFull {
                alloc: self.segs_alloc,
            });
        }
        self.segs.push(SgSeg {
            phys: phys.unwrap_or(NIL_PHYS),
            data: data.into(),
        });
        Ok(())
    }

    pub fn segments(&self) -> &[SgSeg<'a>] {
        &self.segs
    }

    pub fn segs_used(&self) -> usize {
        self.segs.len()
    }

    pub fn segs_alloc(&self) -> usize {
        self.segs_alloc
    }

    pub fn cb_total(&self) -> usize {
        self.cb_total
    }

    pub fn flags(&self) -> SgFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: SgFlags) {
        self.flags = flags;
    }

    pub fn insert_flags(&mut self, flags: SgFlags) {
        self.flags |= flags;
    }

    pub fn is_temp(&self) -> bool {
        self.flags.contains(SgFlags::TEMP)
    }

    pub fn gso(&self) -> Option<&GsoContext> {
        self.gso.as_ref()
    }

    pub fn set_gso(&mut self, gso: Option<GsoContext>) {
        self.gso = gso;
    }

    pub fn owner(&self) -> u64 {
        self.owner
    }

    pub fn set_owner(&mut self, owner: u64) {
        self.owner = owner;
    }

    /// Copies up to `buf.len()` bytes starting at `off`; returns how many were
    /// available.
    pub fn read_part(&self, off: usize, buf: &mut [u8]) -> usize {
        let end = self.cb_total.min(off.saturating_add(buf.len()));
        let mut pos = 0usize;
        let mut copied = 0usize;
        for seg in &self.segs {
            let seg_end = pos + seg.len();
            let lo = off.max(pos);
            let hi = end.min(seg_end);
            if lo < hi {
                buf[lo - off..hi - off].copy_from_slice(&seg.data[lo - pos..hi - pos]);
                copied += hi - lo;
            }
            pos = seg_end;
            if pos >= end {
                break;
            }
        }
        copied
    }

    pub fn read_byte(&self, off: usize) -> Option<u8> {
        let mut b = [0u8; 1];
        (self.read_part(off, &mut b) == 1).then_some(b[0])
    }

    /// Overwrites bytes starting at `off`. Borrowed segments that get touched
    /// are copied first. Returns false when the range is out of bounds.
    pub fn write_part(&mut self, off: usize, data: &[u8]) -> bool {
        let Some(end) = off.checked_add(data.len()) else {
            return false;
        };
        if end > self.cb_total || end > self.segs.iter().map(SgSeg::len).sum::<usize>() {
            return false;
        }
        let mut pos = 0usize;
        for seg in &mut self.segs {
            let seg_end = pos + seg.data.len();
            let lo = off.max(pos);
            let hi = end.min(seg_end);
            if lo < hi {
                if matches!(seg.data, Cow::Borrowed(_)) {
                    self.flags |= SgFlags::PKT_CP_IN_TMP;
                }
                seg.data.to_mut()[lo - pos..hi - pos].copy_from_slice(&data[lo - off..hi - off]);
            }
            pos = seg_end;
            if pos >= end {
                break;
            }
        }
        true
    }

    /// The first `cb_total` bytes as one buffer.
    pub fn copy_to_vec(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.cb_total];
        let n = self.read_part(0, &mut out);
        out.truncate(n);
        out
    }

    /// A contiguous view when the frame lives in the first segment.
    pub fn contiguous(&self) -> Option<&[u8]> {
        let first = self.segs.first()?;
        (first.len() >= self.cb_total).then(|| &first.data[..self.cb_total])
    }

    /// Deep copy that no longer borrows anything; TEMP is cleared.
    pub fn to_owned_sg(&self) -> Sg<'static> {
        Sg {
            owner: self.owner,
            user: self.user,
            gso: self.gso,
            cb_total: self.cb_total,
            flags: self.flags - SgFlags::TEMP,
            segs_alloc: self.segs_alloc,
            segs: self
                .segs
                .iter()
                .map(|seg| SgSeg {
                    phys: seg.phys,
                    data: Cow::Owned(seg.data.clone().into_owned()),
                })
                .collect(),
        }
    }

    /// Fills in physical addresses for segments that lack one. This model has
    /// no real physical memory, so the addresses are synthetic and only tell a
    /// driver that translation already happened.
    pub fn populate_phys(&mut self) {
        for seg in &mut self.segs {
            if !seg.has_phys() {
                seg.phys = seg.data.as_ptr() as u64;
            }
        }
    }

    fn reset(&mut self) {
        self.owner = 0;
        self.user = [0; 2];
        self.gso = None;
        self.cb_total = 0;
        self.flags = SgFlags::empty();
        self.segs.clear();
    }
}

/// A list that is only valid during the call that provided it.
#[derive(Debug)]
pub struct TempSg<'a>(Sg<'a>);

impl<'a> TempSg<'a> {
    pub fn new(frame: &'a [u8]) -> Self {
        let mut sg = Sg::from_frame(frame);
        sg.flags |= SgFlags::TEMP;
        Self(sg)
    }

    pub fn with_gso(frame: &'a [u8], gso: GsoContext) -> Self {
        let mut sg = Self::new(frame);
        sg.0.gso = Some(gso);
        sg
    }

    pub fn from_sg(mut sg: Sg<'a>) -> Self {
        sg.flags |= SgFlags::TEMP;
        Self(sg)
    }

    /// Releasing a transient list is a no-op; ownership stays with the caller.
    pub fn release(&self) {
        tracing::trace!("release of a temporary scatter/gather list ignored");
    }

    /// Copies the list out so it can outlive the call.
    pub fn retain_copy(&self) -> SgRef {
        SgRef::new(self.0.to_owned_sg(), FreePath::Heap)
    }

    pub fn into_inner(self) -> Sg<'a> {
        self.0
    }
}

impl<'a> std::ops::Deref for TempSg<'a> {
    type Target = Sg<'a>;

    fn deref(&self) -> &Sg<'a> {
        &self.0
    }
}

impl<'a> std::ops::DerefMut for TempSg<'a> {
    fn deref_mut(&mut self) -> &mut Sg<'a> {
        &mut self.0
    }
}

/// Where a list goes when its last reference is released.
#[derive(Debug, Clone, Default)]
pub enum FreePath {
    #[default]
    Heap,
    Pool(Arc<SgPool>),
}

#[derive(Debug)]
struct SgShared {
    users: AtomicU32,
    free: FreePath,
    sg: Mutex<Option<Sg<'static>>>,
}

/// Counted handle to an owned list.
#[derive(Debug, Clone)]
pub struct SgRef {
    shared: Arc<SgShared>,
}

impl SgRef {
    /// Wraps `sg` with one reference held by the caller.
    pub fn new(mut sg: Sg<'static>, free: FreePath) -> Self {
        sg.flags -= SgFlags::TEMP;
        if matches!(free, FreePath::Pool(_)) {
            sg.flags |= SgFlags::FREE;
        }
        Self {
            shared: Arc::new(SgShared {
                users: AtomicU32::new(1),
                free,
                sg: Mutex::new(Some(sg)),
            }),
        }
    }

    pub fn users(&self) -> u32 {
        self.shared.users.load(Ordering::Acquire)
    }

    pub fn is_freed(&self) -> bool {
        self.users() == 0
    }

    pub fn retain(&self) {
        let prev = self.shared.users.fetch_add(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "retain of a freed scatter/gather list");
    }

    /// Drops one reference; the last one runs the free path. Returns true when
    /// this call freed the list.
    pub fn release(&self) -> bool {
        let prev = self
            .shared
            .users
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match prev {
            Ok(1) => {}
            Ok(_) => return false,
            Err(_) => {
                tracing::error!("release of a freed scatter/gather list");
                debug_assert!(false, "release of a freed scatter/gather list");
                return false;
            }
        }

        let sg = self
            .shared
            .sg
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let (Some(sg), FreePath::Pool(pool)) = (sg, &self.shared.free) {
            pool.put(sg);
        }
        true
    }

    /// Runs `f` on the list while it is alive.
    pub fn with<R>(&self, f: impl FnOnce(&Sg<'static>) -> R) -> Option<R> {
        let guard = self
            .shared
            .sg
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.as_ref().map(f)
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut Sg<'static>) -> R) -> Option<R> {
        let mut guard = self
            .shared
            .sg
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.as_mut().map(f)
    }

    pub fn ptr_eq(&self, other: &SgRef) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SgPoolStats {
    pub allocated: u64,
    pub reused: u64,
    pub returned: u64,
}

/// Recycles list allocations.
#[derive(Debug)]
pub struct SgPool {
    max_cached: usize,
    cache: Mutex<Vec<Sg<'static>>>,
    stats: Mutex<SgPoolStats>,
}

impl SgPool {
    pub fn new(max_cached: usize) -> Arc<Self> {
        Arc::new(Self {
            max_cached,
            cache: Mutex::new(Vec::new()),
            stats: Mutex::new(SgPoolStats::default()),
        })
    }

    /// Hands out an empty list with room for `segs_alloc` segments, already
    /// wrapped in a handle that returns it here.
    pub fn alloc(self: &Arc<Self>, cb_total: usize, segs_alloc: usize) -> SgRef {
        let cached = self
            .cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop();
        let mut stats = self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let sg = match cached {
            Some(mut sg) => {
                stats.reused += 1;
                sg.cb_total = cb_total;
                sg.segs_alloc = segs_alloc;
                sg
            }
            None => {
                stats.allocated += 1;
                Sg::new(cb_total, segs_alloc)
            }
        };
        drop(stats);
        SgRef::new(sg, FreePath::Pool(Arc::clone(self)))
    }

    fn put(&self, mut sg: Sg<'static>) {
        self.stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .returned += 1;
        let mut cache = self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if cache.len() < self.max_cached {
            sg.reset();
            cache.push(sg);
        }
    }

    pub fn cached(&self) -> usize {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn stats(&self) -> SgPoolStats {
        *self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_across_segments() {
        let mut sg = Sg::new(10, 3);
        sg.add_segment(&b"abc"[..], None).unwrap();
        sg.add_segment(&b"defg"[..], Some(0x1000)).unwrap();
        sg.add_segment(&b"hij"[..], None).unwrap();
        assert_eq!(
            sg.add_segment(&b"k"[..], None),
            Err(TrunkError::SegmentsFull { alloc: 3 })
        );
        assert_eq!(sg.segs_used(), 3);

        let mut buf = [0u8; 5];
        assert_eq!(sg.read_part(2, &mut buf), 5);
        assert_eq!(&buf, b"cdefg");
        assert_eq!(sg.read_byte(9), Some(b'j'));
        assert_eq!(sg.read_byte(10), None);
        assert_eq!(sg.copy_to_vec(), b"abcdefghij");
        assert!(sg.contiguous().is_none());
        assert!(!sg.segments()[0].has_phys());
        assert!(sg.segments()[1].has_phys());
    }

    #[test]
    fn write_copies_borrowed_segments() {
        let frame = b"0123456789".to_vec();
        let mut sg = Sg::new(10, 2);
        sg.add_segment(&frame[..4], None).unwrap();
        sg.add_segment(&frame[4..], None).unwrap();
        assert!(sg.write_part(3, b"xy"));
        assert_eq!(sg.copy_to_vec(), b"012xy56789");
        assert!(sg.flags().contains(SgFlags::PKT_CP_IN_TMP));
        assert_eq!(frame, b"0123456789");
        assert!(!sg.write_part(9, b"xy"));
    }

    #[test]
    fn cb_total_bounds_reads() {
        let sg = Sg::from_frame(vec![1u8; 64]);
        let mut short = Sg::new(16, 1);
        short.add_segment(vec![2u8; 64], None).unwrap();
        assert_eq!(sg.copy_to_vec().len(), 64);
        assert_eq!(short.copy_to_vec(), vec![2u8; 16]);
        assert_eq!(short.contiguous().map(<[u8]>::len), Some(16));
    }

    #[test]
    fn temp_release_is_a_noop() {
        let frame = [7u8; 20];
        let temp = TempSg::new(&frame);
        assert!(temp.is_temp());
        temp.release();
        temp.release();
        let kept = temp.retain_copy();
        assert_eq!(kept.with(|sg| sg.is_temp()), Some(false));
        assert_eq!(kept.with(Sg::copy_to_vec), Some(frame.to_vec()));
    }

    #[test]
    fn pool_gets_list_back_once() {
        let pool = SgPool::new(4);
        let sg = pool.alloc(4, 1);
        sg.with_mut(|sg| sg.add_segment(vec![1, 2, 3, 4], None).unwrap());
        assert!(sg.with(|sg| sg.flags().contains(SgFlags::FREE)).unwrap());
        sg.retain();
        assert!(!sg.release());
        assert_eq!(pool.cached(), 0);
        assert!(sg.release());
        assert!(sg.is_freed());
        assert_eq!(pool.cached(), 1);
        assert_eq!(sg.with(|_| ()), None);

        let again = pool.alloc(8, 2);
        assert_eq!(again.with(|sg| (sg.segs_used(), sg.cb_total())), Some((0, 8)));
        assert_eq!(
            pool.stats(),
            SgPoolStats {
                allocated: 1,
                reused: 1,
                returned: 1,
            }
        );
    }
}
