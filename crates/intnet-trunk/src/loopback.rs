//! An in-process trunk driver. It records what the switch transmits and lets
//! callers inject frames as if they came from the host or the wire.

use crate::dir::{SwDecision, TrunkDir};
use crate::error::{Result, TrunkError};
use crate::factory::{CreateFlags, TrunkFactory};
use crate::port::{IfId, SwitchPort, TrunkIfPort, SWITCH_PORT_VERSION};
use crate::sg::{Sg, TempSg};
use crate::state::{TrunkState, TrunkStateCell};
use intnet_ipc::GsoContext;
use intnet_protocol::MacAddr;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// How many bytes of a frame `pre_recv` gets to look at.
const PRE_RECV_HEAD: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    pub if_id: Option<IfId>,
    pub dst: TrunkDir,
    pub data: Vec<u8>,
    pub gso: Option<GsoContext>,
}

/// What happened to an injected frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InjectOutcome {
    pub decision: SwDecision,
    /// The switch consumed the frame; it must not go to the other direction.
    pub handled: bool,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct LoopbackTrunk {
    name: String,
    mac: MacAddr,
    state: TrunkStateCell,
    switch_port: Mutex<Option<Arc<dyn SwitchPort>>>,
    interfaces: Mutex<BTreeSet<IfId>>,
    if_macs: Mutex<BTreeMap<IfId, MacAddr>>,
    sent: Mutex<Vec<SentFrame>>,
    busy: Mutex<u32>,
    idle: Condvar,
    fail_xmit: AtomicBool,
    released: AtomicBool,
    wire_promisc: AtomicBool,
}

impl LoopbackTrunk {
    pub fn new(name: impl Into<String>, mac: MacAddr, switch_port: Arc<dyn SwitchPort>) -> Result<Arc<Self>> {
        switch_port.version().check(SWITCH_PORT_VERSION)?;
        Ok(Arc::new(Self {
            name: name.into(),
            mac,
            state: TrunkStateCell::new(),
            switch_port: Mutex::new(Some(switch_port)),
            interfaces: Mutex::new(BTreeSet::new()),
            if_macs: Mutex::new(BTreeMap::new()),
            sent: Mutex::new(Vec::new()),
            busy: Mutex::new(0),
            idle: Condvar::new(),
            fail_xmit: AtomicBool::new(false),
            released: AtomicBool::new(false),
            wire_promisc: AtomicBool::new(false),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mac(&self) -> MacAddr {
        self.mac
    }

    pub fn state(&self) -> TrunkState {
        self.state.get()
    }

    /// Whether the switch asked for the wire side to listen promiscuously.
    pub fn wire_promiscuous(&self) -> bool {
        self.wire_promisc.load(Ordering::Acquire)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    pub fn connected_interfaces(&self) -> Vec<IfId> {
        lock(&self.interfaces).iter().copied().collect()
    }

    /// The last MAC address the switch reported for `if_id`.
    pub fn interface_mac(&self, if_id: IfId) -> Option<MacAddr> {
        lock(&self.if_macs).get(&if_id).copied()
    }

    /// Makes every following `xmit` fail.
    pub fn set_fail_xmit(&self, fail: bool) {
        self.fail_xmit.store(fail, Ordering::Release);
    }

    pub fn take_sent(&self) -> Vec<SentFrame> {
        std::mem::take(&mut *lock(&self.sent))
    }

    fn port(&self) -> Option<Arc<dyn SwitchPort>> {
        lock(&self.switch_port).clone()
    }

    fn enter(&self) {
        *lock(&self.busy) += 1;
    }

    fn leave(&self) {
        let mut busy = lock(&self.busy);
        *busy = busy.saturating_sub(1);
        if *busy == 0 {
            self.idle.notify_all();
        }
    }

    /// Feeds `frame` to the switch as if it arrived from `src`. Nothing happens
    /// unless the trunk is active.
    pub fn inject(&self, src: TrunkDir, frame: &[u8]) -> Option<InjectOutcome> {
        if self.state.get() != TrunkState::Active {
            return None;
        }
        let port = self.port()?;
        self.enter();
        let head = &frame[..frame.len().min(PRE_RECV_HEAD)];
        let decision = port.pre_recv(head, src);
        let handled = match decision {
            SwDecision::Trunk | SwDecision::Drop => false,
            _ => port.recv(&TempSg::new(frame), src),
        };
        self.leave();
        Some(InjectOutcome { decision, handled })
    }

    /// Reports a host address change to the switch.
    pub fn host_address(&self, added: bool, addr: std::net::IpAddr) {
        if let Some(port) = self.port() {
            port.notify_host_address(added, addr);
        }
    }

    /// Simulates the underlying device going away.
    pub fn unplug(&self) {
        let Some(port) = self.port() else {
            return;
        };
        self.enter();
        port.disconnect(self, Some(&|| self.leave()));
    }
}

impl std::fmt::Debug for LoopbackTrunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackTrunk")
            .field("name", &self.name)
            .field("mac", &self.mac)
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

impl TrunkIfPort for LoopbackTrunk {
    fn set_state(&self, state: TrunkState) -> Result<TrunkState> {
        let old = self.state.set(state)?;
        tracing::debug!(trunk = %self.name, ?old, new = ?state, "loopback trunk state");
        Ok(old)
    }

    fn connect_interface(&self, if_id: IfId) -> Result<()> {
        lock(&self.interfaces).insert(if_id);
        Ok(())
    }

    fn disconnect_interface(&self, if_id: IfId) {
        lock(&self.interfaces).remove(&if_id);
        lock(&self.if_macs).remove(&if_id);
    }

    fn notify_mac_address(&self, if_id: IfId, mac: MacAddr) {
        lock(&self.if_macs).insert(if_id, mac);
    }

    fn xmit(&self, if_id: Option<IfId>, sg: &Sg<'_>, dst: TrunkDir) -> Result<()> {
        if self.fail_xmit.load(Ordering::Acquire) {
            return Err(TrunkError::Xmit(format!("{} is failing transmits", self.name)));
        }
        lock(&self.sent).push(SentFrame {
            if_id,
            dst,
            data: sg.copy_to_vec(),
            gso: sg.gso().copied(),
        });
        Ok(())
    }

    fn wait_for_idle(&self, timeout: Duration) -> Result<()> {
        let busy = lock(&self.busy);
        let (_busy, res) = self
            .idle
            .wait_timeout_while(busy, timeout, |busy| *busy > 0)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if res.timed_out() {
            return Err(TrunkError::Timeout);
        }
        Ok(())
    }

    fn disconnect_and_release(&self) {
        lock(&self.switch_port).take();
        self.released.store(true, Ordering::Release);
        tracing::debug!(trunk = %self.name, "loopback trunk released");
    }
}

/// Creates [`LoopbackTrunk`]s and keeps them reachable for inspection.
pub struct LoopbackFactory {
    mac: MacAddr,
    gso_caps: u32,
    no_preempt: TrunkDir,
    fail_create: AtomicBool,
    created: Mutex<Vec<Arc<LoopbackTrunk>>>,
}

impl LoopbackFactory {
    pub fn new(mac: MacAddr) -> Arc<Self> {
        Self::with_capabilities(mac, 0, TrunkDir::HOST | TrunkDir::WIRE)
    }

    pub fn with_capabilities(mac: MacAddr, gso_caps: u32, no_preempt: TrunkDir) -> Arc<Self> {
        Arc::new(Self {
            mac,
            gso_caps,
            no_preempt,
            fail_create: AtomicBool::new(false),
            created: Mutex::new(Vec::new()),
        })
    }

    /// Makes creation fail as if the device did not exist.
    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::Release);
    }

    pub fn created(&self) -> Vec<Arc<LoopbackTrunk>> {
        lock(&self.created).clone()
    }

    pub fn last(&self) -> Option<Arc<LoopbackTrunk>> {
        lock(&self.created).last().cloned()
    }
}

impl TrunkFactory for LoopbackFactory {
    fn create_and_connect(
        &self,
        name: &str,
        switch_port: Arc<dyn SwitchPort>,
        flags: CreateFlags,
    ) -> Result<Arc<dyn TrunkIfPort>> {
        if self.fail_create.load(Ordering::Acquire) {
            return Err(TrunkError::NotFound(name.to_string()));
        }
        let trunk = LoopbackTrunk::new(name, self.mac, Arc::clone(&switch_port))?;
        switch_port.report_mac_address(self.mac);
        trunk
            .wire_promisc
            .store(!flags.contains(CreateFlags::NO_PROMISC), Ordering::Release);
        switch_port.report_promiscuous_mode(false);
        switch_port.report_gso_capabilities(self.gso_caps, TrunkDir::HOST | TrunkDir::WIRE);
        switch_port.report_no_preempt_dsts(self.no_preempt);
        lock(&self.created).push(Arc::clone(&trunk));
        tracing::info!(trunk = name, mac = %self.mac, "loopback trunk created");
        Ok(trunk)
    }
}
