//! Backing storage for an interface buffer.
//!
//! The block is touched concurrently by the switch and the consumer, so it is
//! allocated as atomic words (8-byte aligned, interior mutable) and accessed
//! through raw byte copies plus atomic views of the cursor fields. The ring
//! protocol guarantees that plain byte ranges are never written by one side
//! while the other side may read them.

use core::sync::atomic::{AtomicU32, AtomicU64};

pub(crate) struct SharedMem {
    len: usize,
    base: *mut u8,
    _storage: Box<[AtomicU64]>,
}

unsafe impl Send for SharedMem {}
unsafe impl Sync for SharedMem {}

impl SharedMem {
    pub(crate) fn new(len: usize) -> Self {
        let words = len.div_ceil(8);
        let storage: Box<[AtomicU64]> = (0..words).map(|_| AtomicU64::new(0)).collect();
        let base = storage.as_ptr() as *mut u8;
        Self {
            len,
            base,
            _storage: storage,
        }
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Self {
        let mem = Self::new(bytes.len());
        mem.write(0, bytes);
        mem
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    fn check(&self, off: usize, len: usize) {
        assert!(
            off.checked_add(len).is_some_and(|end| end <= self.len),
            "shared memory access out of bounds: off={off} len={len} size={}",
            self.len
        );
    }

    pub(crate) fn atomic_u32(&self, off: usize) -> &AtomicU32 {
        self.check(off, 4);
        assert_eq!(off % 4, 0);
        // SAFETY: in bounds, aligned, and the storage is made of atomics.
        unsafe { &*(self.base.add(off) as *const AtomicU32) }
    }

    pub(crate) fn atomic_u64(&self, off: usize) -> &AtomicU64 {
        self.check(off, 8);
        assert_eq!(off % 8, 0);
        // SAFETY: as above.
        unsafe { &*(self.base.add(off) as *const AtomicU64) }
    }

    pub(crate) fn read(&self, off: usize, out: &mut [u8]) {
        self.check(off, out.len());
        unsafe {
            core::ptr::copy_nonoverlapping(self.base.add(off), out.as_mut_ptr(), out.len());
        }
    }

    pub(crate) fn write(&self, off: usize, data: &[u8]) {
        self.check(off, data.len());
        unsafe {
            core::ptr::copy_nonoverlapping(data.as_ptr(), self.base.add(off), data.len());
        }
    }

    pub(crate) fn read_u32(&self, off: usize) -> u32 {
        let mut tmp = [0u8; 4];
        self.read(off, &mut tmp);
        u32::from_ne_bytes(tmp)
    }

    pub(crate) fn write_u32(&self, off: usize, v: u32) {
        self.write(off, &v.to_ne_bytes());
    }

    pub(crate) fn to_vec(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.len];
        self.read(0, &mut out);
        out
    }
}
