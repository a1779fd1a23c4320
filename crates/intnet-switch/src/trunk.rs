//! The switch's end of a trunk connection: what the driver calls into
//! ([`SwitchPort`]) and the bookkeeping the switch needs to call the driver.

use crate::interface::lock;
use crate::network::Network;
use intnet_ipc::GsoType;
use intnet_protocol::MacAddr;
use intnet_trunk::{
    IfId, Sg, SgRef, SwDecision, SwitchPort, TrunkDir, TrunkError, TrunkIfPort, TrunkState,
    TrunkStateCell,
};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock, Weak};
use std::time::{Duration, Instant};

/// How long a single idle wait lasts before it is logged and retried.
const IDLE_WAIT_SLICE: Duration = Duration::from_secs(10);
/// When teardown gives up on a driver that never goes idle.
const IDLE_WAIT_LIMIT: Duration = Duration::from_secs(360);

pub(crate) struct TrunkPort {
    network: Weak<Network>,
    if_port: RwLock<Option<Arc<dyn TrunkIfPort>>>,
    /// Mirrors the state last pushed to the driver.
    state: TrunkStateCell,
    mac: Mutex<MacAddr>,
    host_gso_caps: AtomicU32,
    wire_gso_caps: AtomicU32,
    no_preempt: AtomicU32,
    sg_phys: AtomicBool,
    busy: Mutex<u32>,
    idle: Condvar,
}

/// A busy reference on a trunk; teardown waits for all of them to go away.
pub(crate) struct TrunkBusy(Arc<TrunkPort>);

impl TrunkBusy {
    pub fn port(&self) -> &Arc<TrunkPort> {
        &self.0
    }

    pub fn no_preempt_dsts(&self) -> TrunkDir {
        self.0.no_preempt_dsts()
    }
}

impl Drop for TrunkBusy {
    fn drop(&mut self) {
        let mut busy = lock(&self.0.busy);
        *busy = busy.saturating_sub(1);
        if *busy == 0 {
            self.0.idle.notify_all();
        }
    }
}

impl TrunkPort {
    pub fn new(network: Weak<Network>) -> Arc<Self> {
        Arc::new(Self {
            network,
            if_port: RwLock::new(None),
            state: TrunkStateCell::new(),
            mac: Mutex::new(MacAddr::BROADCAST),
            host_gso_caps: AtomicU32::new(0),
            wire_gso_caps: AtomicU32::new(0),
            no_preempt: AtomicU32::new(0),
            sg_phys: AtomicBool::new(false),
            busy: Mutex::new(0),
            idle: Condvar::new(),
        })
    }

    pub fn enter(self: &Arc<Self>) -> TrunkBusy {
        *lock(&self.busy) += 1;
        TrunkBusy(Arc::clone(self))
    }

    /// Waits for every [`TrunkBusy`] to be dropped.
    pub fn wait_not_busy(&self, timeout: Duration) -> bool {
        let busy = lock(&self.busy);
        let (_busy, res) = self
            .idle
            .wait_timeout_while(busy, timeout, |busy| *busy > 0)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        !res.timed_out()
    }

    pub fn if_port(&self) -> Option<Arc<dyn TrunkIfPort>> {
        self.if_port
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn attach(&self, port: Arc<dyn TrunkIfPort>) {
        *self
            .if_port
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(port);
    }

    fn detach(&self) -> Option<Arc<dyn TrunkIfPort>> {
        self.if_port
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    pub fn mac(&self) -> MacAddr {
        *lock(&self.mac)
    }

    pub fn no_preempt_dsts(&self) -> TrunkDir {
        TrunkDir::from_bits_truncate(self.no_preempt.load(Ordering::Acquire))
    }

    pub fn sg_phys(&self) -> bool {
        self.sg_phys.load(Ordering::Acquire)
    }

    pub fn is_disconnecting(&self) -> bool {
        self.state.is_disconnecting()
    }

    /// Whether the driver can take a GSO frame of `kind` towards all of `dst`.
    pub fn can_handle_gso(&self, kind: Option<GsoType>, dst: TrunkDir) -> bool {
        let Some(kind) = kind else {
            return false;
        };
        let bit = kind.capability_bit();
        let host = self.host_gso_caps.load(Ordering::Acquire);
        let wire = self.wire_gso_caps.load(Ordering::Acquire);
        (!dst.contains(TrunkDir::HOST) || host & bit != 0)
            && (!dst.contains(TrunkDir::WIRE) || wire & bit != 0)
    }

    /// Pushes a new state to the driver. Errors are logged; the mirror only
    /// moves when the driver accepted the change.
    pub fn set_state(&self, state: TrunkState) {
        if self.state.get() == state {
            return;
        }
        let Some(port) = self.if_port() else {
            return;
        };
        match port.set_state(state) {
            Ok(_) => {
                if let Err(err) = self.state.set(state) {
                    tracing::debug!(%err, "trunk state mirror out of sync");
                }
            }
            Err(err) => tracing::warn!(%err, ?state, "trunk refused state change"),
        }
    }

    pub fn connect_interface(&self, if_id: IfId) -> Result<(), TrunkError> {
        match self.if_port() {
            Some(port) => port.connect_interface(if_id),
            None => Ok(()),
        }
    }

    pub fn disconnect_interface(&self, if_id: IfId) {
        if let Some(port) = self.if_port() {
            port.disconnect_interface(if_id);
        }
    }

    pub fn notify_mac_address(&self, if_id: IfId, mac: MacAddr) {
        if let Some(port) = self.if_port() {
            port.notify_mac_address(if_id, mac);
        }
    }

    pub fn xmit(&self, if_id: Option<IfId>, sg: &Sg<'_>, dst: TrunkDir) {
        let Some(port) = self.if_port() else {
            return;
        };
        let populated;
        let sg = if self.sg_phys() {
            let mut copy = sg.clone();
            copy.populate_phys();
            populated = copy;
            &populated
        } else {
            sg
        };
        if let Err(err) = port.xmit(if_id, sg, dst) {
            tracing::debug!(%err, ?dst, "trunk transmit failed");
        }
    }

    /// Final teardown: wait for the driver to drain, then let it go. The
    /// caller holds the big mutex and has already moved the trunk to
    /// `Disconnecting`.
    pub fn destroy(&self, network: &str) {
        if !self.wait_not_busy(IDLE_WAIT_SLICE) {
            tracing::warn!(network, "switch still busy on the trunk at teardown");
        }
        let Some(port) = self.detach() else {
            return;
        };
        let start = Instant::now();
        let mut res = port.wait_for_idle(IDLE_WAIT_SLICE);
        while let Err(err) = &res {
            if start.elapsed() >= IDLE_WAIT_LIMIT {
                tracing::error!(network, %err, "trunk never went idle; giving up");
                break;
            }
            tracing::warn!(network, elapsed = ?start.elapsed(), "trunk did not become idle yet");
            res = port.wait_for_idle(IDLE_WAIT_SLICE);
        }
        port.disconnect_and_release();
        tracing::info!(network, "trunk released");
    }
}

impl SwitchPort for TrunkPort {
    fn pre_recv(&self, frame_head: &[u8], src: TrunkDir) -> SwDecision {
        if self.is_disconnecting() {
            return SwDecision::Drop;
        }
        match self.network.upgrade() {
            Some(network) => network.pre_recv(frame_head, src),
            None => SwDecision::Trunk,
        }
    }

    fn recv(&self, sg: &Sg<'_>, src: TrunkDir) -> bool {
        if self.is_disconnecting() {
            return false;
        }
        match self.network.upgrade() {
            Some(network) => network.trunk_recv(sg, src),
            None => false,
        }
    }

    fn sg_retain(&self, sg: &SgRef) {
        sg.retain();
    }

    fn sg_release(&self, sg: &SgRef) {
        sg.release();
    }

    fn set_sg_phys(&self, enable: bool) -> bool {
        self.sg_phys.swap(enable, Ordering::AcqRel)
    }

    fn report_mac_address(&self, mac: MacAddr) {
        if self.is_disconnecting() {
            return;
        }
        *lock(&self.mac) = mac;
        if let Some(network) = self.network.upgrade() {
            network.host_mac_changed(mac);
        }
    }

    fn report_promiscuous_mode(&self, promiscuous: bool) {
        if self.is_disconnecting() {
            return;
        }
        if let Some(network) = self.network.upgrade() {
            network.host_promisc_changed(promiscuous);
        }
    }

    fn report_gso_capabilities(&self, caps: u32, dst: TrunkDir) {
        if self.is_disconnecting() {
            return;
        }
        if dst.contains(TrunkDir::HOST) {
            self.host_gso_caps.store(caps, Ordering::Release);
        }
        if dst.contains(TrunkDir::WIRE) {
            self.wire_gso_caps.store(caps, Ordering::Release);
        }
    }

    fn report_no_preempt_dsts(&self, dsts: TrunkDir) {
        if self.is_disconnecting() {
            return;
        }
        self.no_preempt.store(dsts.bits(), Ordering::Release);
    }

    fn notify_host_address(&self, added: bool, addr: IpAddr) {
        if self.is_disconnecting() {
            return;
        }
        if let Some(network) = self.network.upgrade() {
            network.host_address(added, addr);
        }
    }

    fn disconnect(&self, _if_port: &dyn TrunkIfPort, release_busy: Option<&dyn Fn()>) {
        // Drop the driver's busy reference first; teardown waits for it while
        // holding the big mutex.
        if let Some(release) = release_busy {
            release();
        }
        if let Some(network) = self.network.upgrade() {
            network.trunk_disconnected(self);
        }
    }
}

impl std::fmt::Debug for TrunkPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrunkPort")
            .field("state", &self.state.get())
            .field("mac", &self.mac())
            .field("no_preempt", &self.no_preempt_dsts())
            .finish_non_exhaustive()
    }
}
