use crate::{BackendError, NetworkBackend, OpenConfig};
use intnet_ipc::{Frame, IntNetBuf, PopError, PushError};
use intnet_switch::{IfHandle, IntNet, IntNetError, Session};
use std::collections::VecDeque;
use std::sync::Arc;

/// Maximum number of receive ring frames to pop per [`NetworkBackend::poll_receive`] call.
///
/// Bounds the work done when the ring is full of frames that get dropped
/// (oversized or carrying an unusable GSO context).
pub const MAX_RX_POPS_PER_POLL: usize = 64;

/// Largest frame handed to or taken from the NIC model, GSO frames excluded.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024;

/// Stats for [`IntNetBackend`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IntNetBackendStats {
    pub tx_pushed_frames: u64,
    pub tx_pushed_bytes: u64,
    pub tx_dropped_oversize: u64,
    pub tx_dropped_oversize_bytes: u64,
    pub tx_dropped_full: u64,
    pub tx_dropped_full_bytes: u64,
    /// `send` requests the switch asked us to repeat later.
    pub tx_deferred: u64,

    pub rx_popped_frames: u64,
    pub rx_popped_bytes: u64,
    pub rx_dropped_oversize: u64,
    pub rx_dropped_oversize_bytes: u64,
    /// GSO frames split into wire segments on the way to the NIC model.
    pub rx_gso_carved: u64,
    pub rx_dropped_bad_gso: u64,
    pub rx_corrupt: u64,
    /// Set once a ring was found corrupt; the backend stops touching it.
    pub rx_broken: bool,
    pub tx_broken: bool,
}

/// A NIC backend attached to one interface of an [`IntNet`] switch.
///
/// Frames handed to [`transmit`](NetworkBackend::transmit) go into the
/// interface's send ring and are switched right away. Received frames are
/// popped from the receive ring; GSO frames are cut into wire-sized
/// segments first since NIC models only take plain frames.
pub struct IntNetBackend {
    net: IntNet,
    session: Session,
    handle: IfHandle,
    buf: Arc<IntNetBuf>,
    joined: bool,
    max_frame_bytes: usize,
    carved: VecDeque<Vec<u8>>,
    stats: IntNetBackendStats,
}

impl IntNetBackend {
    /// Opens an interface as `cfg` describes, applies its MAC address and
    /// activates it.
    pub fn open(net: &IntNet, session: Session, cfg: &OpenConfig) -> Result<Self, BackendError> {
        let (handle, joined) = net.open(&session, &cfg.to_request())?;
        let buf = match net.get_buffer(&session, handle) {
            Ok(buf) => buf,
            Err(err) => {
                let _ = net.close(&session, handle);
                return Err(err.into());
            }
        };
        // From here on dropping the backend closes the handle.
        let backend = Self {
            net: net.clone(),
            session,
            handle,
            buf,
            joined,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            carved: VecDeque::new(),
            stats: IntNetBackendStats::default(),
        };
        if let Some(mac) = cfg.mac {
            net.set_mac_address(&session, handle, mac)?;
        }
        net.set_active(&session, handle, true)?;
        tracing::info!(network = %cfg.network, %handle, joined, "backend attached");
        Ok(backend)
    }

    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    pub fn handle(&self) -> IfHandle {
        self.handle
    }

    /// Whether `open` joined a network that already existed.
    pub fn joined(&self) -> bool {
        self.joined
    }

    pub fn buffer(&self) -> &Arc<IntNetBuf> {
        &self.buf
    }

    pub fn stats(&self) -> IntNetBackendStats {
        self.stats
    }

    pub fn set_promiscuous(&self, promiscuous: bool) -> Result<(), BackendError> {
        Ok(self.net.set_promiscuous_mode(&self.session, self.handle, promiscuous)?)
    }

    pub fn set_active(&self, active: bool) -> Result<(), BackendError> {
        Ok(self.net.set_active(&self.session, self.handle, active)?)
    }

    /// Blocks until the receive ring may have something, or `timeout_ms`
    /// passes (`u32::MAX` waits forever).
    pub fn wait(&self, timeout_ms: u32) -> Result<(), BackendError> {
        if !self.carved.is_empty() || !self.buf.recv().is_empty() {
            return Ok(());
        }
        Ok(self.net.wait(&self.session, self.handle, timeout_ms)?)
    }

    /// Asks the switch to process everything queued on the send ring.
    pub fn flush(&mut self) {
        if self.stats.tx_broken {
            return;
        }
        match self.net.send(&self.session, self.handle) {
            Ok(()) => {}
            Err(IntNetError::TryAgain) => self.stats.tx_deferred += 1,
            Err(IntNetError::CorruptBuffer(err)) => {
                tracing::warn!(handle = %self.handle, %err, "send ring corrupt; transmit disabled");
                self.stats.tx_broken = true;
            }
            Err(err) => tracing::debug!(handle = %self.handle, %err, "send request failed"),
        }
    }

    fn push(&self, frame: &[u8]) -> Result<(), PushError> {
        self.buf.send().write_frame(&[frame])
    }

    fn take_rx(&mut self, frame: Frame) -> Option<Vec<u8>> {
        let frame_len = frame.data.len() as u64;
        let Some(gso) = frame.gso else {
            if frame.data.len() > self.max_frame_bytes {
                self.stats.rx_dropped_oversize += 1;
                self.stats.rx_dropped_oversize_bytes += frame_len;
                return None;
            }
            self.stats.rx_popped_frames += 1;
            self.stats.rx_popped_bytes += frame_len;
            return Some(frame.data);
        };

        let segments = gso
            .is_valid(frame.data.len())
            .then(|| gso.carve_all(&frame.data))
            .flatten();
        let Some(segments) = segments else {
            tracing::debug!(handle = %self.handle, len = frame.data.len(), "dropping GSO frame we cannot carve");
            self.stats.rx_dropped_bad_gso += 1;
            return None;
        };
        self.stats.rx_gso_carved += 1;
        for segment in segments {
            if segment.len() > self.max_frame_bytes {
                self.stats.rx_dropped_oversize += 1;
                self.stats.rx_dropped_oversize_bytes += segment.len() as u64;
                continue;
            }
            self.carved.push_back(segment);
        }
        self.next_carved()
    }

    fn next_carved(&mut self) -> Option<Vec<u8>> {
        let segment = self.carved.pop_front()?;
        self.stats.rx_popped_frames += 1;
        self.stats.rx_popped_bytes += segment.len() as u64;
        Some(segment)
    }
}

impl NetworkBackend for IntNetBackend {
    fn transmit(&mut self, frame: Vec<u8>) {
        let frame_len = frame.len() as u64;
        if self.stats.tx_broken {
            self.stats.tx_dropped_full += 1;
            self.stats.tx_dropped_full_bytes += frame_len;
            return;
        }
        if frame.len() > self.max_frame_bytes {
            self.stats.tx_dropped_oversize += 1;
            self.stats.tx_dropped_oversize_bytes += frame_len;
            return;
        }

        // A full send ring means the switch has not caught up; let it drain
        // the ring once before giving up on the frame.
        let mut res = self.push(&frame);
        if res == Err(PushError::Full) {
            self.flush();
            res = self.push(&frame);
        }
        match res {
            Ok(()) => {
                self.stats.tx_pushed_frames += 1;
                self.stats.tx_pushed_bytes += frame_len;
                self.flush();
            }
            Err(PushError::Full) | Err(PushError::Busy) => {
                self.stats.tx_dropped_full += 1;
                self.stats.tx_dropped_full_bytes += frame_len;
            }
            Err(PushError::TooLarge) => {
                self.stats.tx_dropped_oversize += 1;
                self.stats.tx_dropped_oversize_bytes += frame_len;
            }
            Err(PushError::Corrupt) => {
                tracing::warn!(handle = %self.handle, "send ring corrupt; transmit disabled");
                self.stats.tx_broken = true;
                self.stats.tx_dropped_full += 1;
                self.stats.tx_dropped_full_bytes += frame_len;
            }
        }
    }

    fn poll_receive(&mut self) -> Option<Vec<u8>> {
        if let Some(segment) = self.next_carved() {
            return Some(segment);
        }
        if self.stats.rx_broken {
            return None;
        }

        for _ in 0..MAX_RX_POPS_PER_POLL {
            match self.buf.recv().try_pop() {
                Ok(frame) => {
                    if let Some(frame) = self.take_rx(frame) {
                        return Some(frame);
                    }
                }
                Err(PopError::Empty) => return None,
                Err(PopError::Corrupt) => {
                    tracing::warn!(handle = %self.handle, "receive ring corrupt; receive disabled");
                    self.stats.rx_corrupt += 1;
                    self.stats.rx_broken = true;
                    return None;
                }
            }
        }
        None
    }

    fn stats(&self) -> Option<IntNetBackendStats> {
        Some(self.stats)
    }
}

impl Drop for IntNetBackend {
    fn drop(&mut self) {
        if let Err(err) = self.net.abort_wait(&self.session, self.handle, true) {
            tracing::debug!(handle = %self.handle, %err, "abort before close failed");
        }
        match self.net.close(&self.session, self.handle) {
            Ok(()) => tracing::debug!(handle = %self.handle, "backend detached"),
            // The switch may already be shut down.
            Err(err) => tracing::debug!(handle = %self.handle, %err, "close failed"),
        }
    }
}

impl std::fmt::Debug for IntNetBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntNetBackend")
            .field("handle", &self.handle)
            .field("joined", &self.joined)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
