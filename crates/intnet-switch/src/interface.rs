//! One attached interface: its shared buffer, its wait event and the receive
//! side of frame delivery.

use crate::error::{IntNetError, Result};
use crate::preempt::preemption_enabled;
use crate::session::{IfHandle, Session};
use intnet_ipc::{IntNetBuf, PushError};
use intnet_protocol::{ether, MacAddr, OpenFlags};
use intnet_trunk::{IfId, Sg};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct WaitState {
    /// Pending wake-ups; never more than there are sleepers, or one.
    permits: u32,
    sleepers: u32,
    /// Bumped by every abort so sleepers can tell they were interrupted.
    aborts: u64,
    no_more_waits: bool,
    destroyed: bool,
}

/// Receive-availability event of an interface.
#[derive(Debug, Default)]
pub(crate) struct WaitEvent {
    state: Mutex<WaitState>,
    cond: Condvar,
}

impl WaitEvent {
    pub fn signal(&self) {
        let mut st = lock(&self.state);
        if st.permits < st.sleepers.max(1) {
            st.permits += 1;
        }
        drop(st);
        self.cond.notify_one();
    }

    /// `None` waits indefinitely.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut st = lock(&self.state);
        if st.destroyed || st.no_more_waits {
            return Err(IntNetError::SemDestroyed);
        }
        let aborts = st.aborts;
        st.sleepers += 1;
        let res = loop {
            if st.destroyed || st.no_more_waits {
                break Err(IntNetError::SemDestroyed);
            }
            if st.aborts != aborts {
                break Err(IntNetError::Interrupted);
            }
            if st.permits > 0 {
                st.permits -= 1;
                break Ok(());
            }
            match deadline {
                None => {
                    st = self
                        .cond
                        .wait(st)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break Err(IntNetError::Timeout);
                    }
                    st = self
                        .cond
                        .wait_timeout(st, deadline - now)
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .0;
                }
            }
        };
        st.sleepers -= 1;
        res
    }

    /// Wakes every current sleeper with `Interrupted`; with `no_more_waits`
    /// they and every later waiter get `SemDestroyed` instead.
    pub fn abort(&self, no_more_waits: bool) {
        let mut st = lock(&self.state);
        st.no_more_waits |= no_more_waits;
        st.aborts += 1;
        drop(st);
        self.cond.notify_all();
    }

    pub fn destroy(&self) {
        lock(&self.state).destroyed = true;
        self.cond.notify_all();
    }

    #[cfg(test)]
    fn sleepers(&self) -> u32 {
        lock(&self.state).sleepers
    }
}

pub(crate) struct Interface {
    pub id: IfId,
    pub handle: IfHandle,
    pub session: Session,
    /// The flags the interface was opened with.
    pub open_flags: OpenFlags,
    /// Interface policy pairs, defaulted.
    pub if_flags: OpenFlags,
    pub buf: Arc<IntNetBuf>,
    pub wait: WaitEvent,
    /// Serializes drains of the send ring.
    pub send_lock: Mutex<()>,
    /// Serializes writers of the receive ring.
    recv_lock: Mutex<()>,
    active: AtomicBool,
    /// Consecutive receive overflows that yielding did not fix.
    yields: AtomicU32,
}

impl Interface {
    pub fn new(
        id: IfId,
        handle: IfHandle,
        session: Session,
        open_flags: OpenFlags,
        if_flags: OpenFlags,
        buf: Arc<IntNetBuf>,
    ) -> Self {
        Self {
            id,
            handle,
            session,
            open_flags,
            if_flags,
            buf,
            wait: WaitEvent::default(),
            send_lock: Mutex::new(()),
            recv_lock: Mutex::new(()),
            active: AtomicBool::new(false),
            yields: AtomicU32::new(0),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    /// Copies `sg` into the receive ring, optionally with a new destination MAC.
    fn write_recv(&self, sg: &Sg<'_>, new_dst: Option<MacAddr>) -> std::result::Result<(), PushError> {
        let _guard = lock(&self.recv_lock);
        let ring = self.buf.recv();
        let cb = sg.cb_total();
        let mut slot = match sg.gso() {
            Some(gso) => ring.allocate_gso_frame(cb, gso)?,
            None => ring.allocate_frame(cb)?,
        };
        let mut off = 0usize;
        for seg in sg.segments() {
            if off >= cb {
                break;
            }
            let n = seg.len().min(cb - off);
            slot.write(off, &seg.data[..n]);
            off += n;
        }
        if let Some(mac) = new_dst {
            if cb >= ether::ETH_HDR_LEN {
                slot.write(0, &mac.0);
            }
        }
        slot.commit_ex(off);
        Ok(())
    }

    /// Delivers one frame. A full ring is retried once after yielding when the
    /// sender is another interface and the context allows it; otherwise the
    /// frame is counted as lost. The waiter is always woken.
    pub fn deliver(&self, sg: &Sg<'_>, new_dst: Option<MacAddr>, from_if: bool, yield_budget: u32) {
        let err = match self.write_recv(sg, new_dst) {
            Ok(()) => {
                self.yields.store(0, Ordering::Relaxed);
                self.wait.signal();
                return;
            }
            Err(err) => err,
        };

        if err == PushError::Full
            && from_if
            && self.is_active()
            && self.yields.load(Ordering::Relaxed) < yield_budget
            && preemption_enabled()
        {
            self.wait.signal();
            std::thread::yield_now();
            if self.write_recv(sg, new_dst).is_ok() {
                self.buf.inc_yields_ok();
                self.wait.signal();
                return;
            }
            self.yields.fetch_add(1, Ordering::Relaxed);
            self.buf.inc_yields_nok();
        }

        self.buf.inc_lost();
        tracing::trace!(if_id = self.id.0, ?err, len = sg.cb_total(), "receive ring full, frame lost");
        self.wait.signal();
    }
}

impl std::fmt::Debug for Interface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interface")
            .field("id", &self.id)
            .field("handle", &self.handle)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intnet_trunk::TempSg;

    fn iface(cb_recv: usize) -> Interface {
        Interface::new(
            IfId(1),
            IfHandle(1),
            Session::new(1, 0, 0),
            OpenFlags::empty(),
            OpenFlags::IF_DEFAULTS,
            Arc::new(IntNetBuf::new(cb_recv, 64)),
        )
    }

    #[test]
    fn signal_before_wait_is_latched_once() {
        let ev = WaitEvent::default();
        ev.signal();
        ev.signal();
        ev.wait(Some(Duration::ZERO)).unwrap();
        assert_eq!(ev.wait(Some(Duration::from_millis(1))), Err(IntNetError::Timeout));
    }

    #[test]
    fn abort_interrupts_sleepers() {
        let ev = Arc::new(WaitEvent::default());
        let waiter = {
            let ev = Arc::clone(&ev);
            std::thread::spawn(move || ev.wait(None))
        };
        while ev.sleepers() == 0 {
            std::thread::yield_now();
        }
        ev.abort(false);
        assert_eq!(waiter.join().unwrap(), Err(IntNetError::Interrupted));
        ev.signal();
        ev.wait(Some(Duration::ZERO)).unwrap();

        ev.abort(true);
        assert_eq!(ev.wait(None), Err(IntNetError::SemDestroyed));
    }

    #[test]
    fn destroy_wakes_sleepers() {
        let ev = Arc::new(WaitEvent::default());
        let waiter = {
            let ev = Arc::clone(&ev);
            std::thread::spawn(move || ev.wait(Some(Duration::from_secs(30))))
        };
        while ev.sleepers() == 0 {
            std::thread::yield_now();
        }
        ev.destroy();
        assert_eq!(waiter.join().unwrap(), Err(IntNetError::SemDestroyed));
    }

    #[test]
    fn deliver_patches_destination() {
        let iface = iface(256);
        let frame = [0xAAu8; 60];
        iface.deliver(&TempSg::new(&frame), Some(MacAddr([2, 0, 0, 0, 0, 9])), true, 4);
        let got = iface.buf.recv().try_pop().unwrap();
        assert_eq!(&got.data[..6], &[2, 0, 0, 0, 0, 9]);
        assert_eq!(&got.data[6..], &frame[6..]);
        iface.wait.wait(Some(Duration::ZERO)).unwrap();
    }

    #[test]
    fn overflow_counts_lost_and_yields() {
        let iface = iface(64);
        iface.set_active(true);
        let frame = [1u8; 40];
        iface.deliver(&TempSg::new(&frame), None, true, 4);
        iface.deliver(&TempSg::new(&frame), None, true, 4);
        let stats = iface.buf.stats();
        assert_eq!((stats.lost, stats.yields_nok, stats.yields_ok), (1, 1, 0));

        // Trunk senders never yield.
        iface.deliver(&TempSg::new(&frame), None, false, 4);
        let stats = iface.buf.stats();
        assert_eq!((stats.lost, stats.yields_nok), (2, 1));
    }
}
