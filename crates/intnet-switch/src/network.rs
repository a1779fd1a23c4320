//! One internal network: its switching table, its trunk and the paths frames
//! take through it.
//!
//! Control operations (join, activate, teardown, trunk reconnect) run under
//! the switch's big mutex. The frame path only takes the narrow table lock and
//! never holds it across a call into a driver or an interface ring.

use crate::addr_cache::{is_good_ipv4, is_good_ipv6};
use crate::config::IntNetConfig;
use crate::error::{IntNetError, Result};
use crate::interface::{lock, Interface};
use crate::intnet::Shared;
use crate::mac_tab::{MacTabEntry, SwitchTable};
use crate::policy::NetFlags;
use crate::session::Session;
use crate::shared_mac::{self, read_head, HEAD_LEN};
use crate::switching::DstTab;
use crate::trunk::TrunkPort;
use intnet_ipc::{BufError, PopError};
use intnet_protocol::ether::{
    self, ArpIpv4, Ipv4Header, Ipv6Header, ARP_OP_REPLY, ETHERTYPE_ARP, ETHERTYPE_IPV4,
    ETHERTYPE_IPV6, ETH_HDR_LEN,
};
use intnet_protocol::{MacAddr, OpenFlags, OpenRequest, TrunkType};
use intnet_trunk::{
    CreateFlags, IfId, Sg, SgFlags, SwDecision, SwitchPort, TempSg, TrunkDir, TrunkFactory,
    TrunkState,
};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, TryLockError, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

/// How long deactivation waits for in-flight trunk transmits.
const TRUNK_BUSY_WAIT: Duration = Duration::from_secs(3);
/// Poll interval of a reconnect worker waiting for the big mutex.
const RECONNECT_LOCK_POLL: Duration = Duration::from_millis(10);

pub(crate) struct Network {
    pub name: String,
    pub trunk_type: TrunkType,
    pub trunk_name: String,
    pub creator: Session,
    shared_mac: bool,
    yield_budget: u32,
    reconnect_interval: Duration,
    table: Mutex<SwitchTable>,
    owner: Weak<Shared>,
    reconnect: Mutex<Option<Reconnector>>,
}

struct Reconnector {
    stop: Arc<StopSignal>,
    thread: JoinHandle<()>,
}

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    cond: Condvar,
}

impl StopSignal {
    fn stop(&self) {
        *lock(&self.stopped) = true;
        self.cond.notify_all();
    }

    /// Sleeps for `dur` or until stopped. Returns true when stopped.
    fn sleep(&self, dur: Duration) -> bool {
        let stopped = lock(&self.stopped);
        let (stopped, _) = self
            .cond
            .wait_timeout_while(stopped, dur, |stopped| !*stopped)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *stopped
    }
}

impl Network {
    pub fn new(
        req: &OpenRequest,
        creator: Session,
        config: &IntNetConfig,
        owner: Weak<Shared>,
    ) -> Arc<Self> {
        let policy = NetFlags::for_new_network(req.flags, req.trunk_type);
        Arc::new(Self {
            name: req.network.clone(),
            trunk_type: req.trunk_type,
            trunk_name: req.trunk.clone(),
            creator,
            shared_mac: policy.shared_mac(),
            yield_budget: config.yield_retries,
            reconnect_interval: config.trunk_reconnect_interval,
            table: Mutex::new(SwitchTable::new(policy)),
            owner,
            reconnect: Mutex::new(None),
        })
    }

    fn table(&self) -> MutexGuard<'_, SwitchTable> {
        lock(&self.table)
    }

    pub fn flags(&self) -> OpenFlags {
        self.table().flags()
    }

    pub fn has_trunk(&self) -> bool {
        self.table().trunk.is_some()
    }

    /// Decides whether `session` may add an interface with `req`.
    pub fn check_join(&self, session: &Session, req: &OpenRequest) -> Result<()> {
        if !req.trunk_type.joins_any()
            && (req.trunk_type != self.trunk_type || req.trunk != self.trunk_name)
        {
            return Err(IntNetError::IncompatibleTrunk {
                network: self.name.clone(),
            });
        }
        let tab = self.table();
        if !tab.policy.admits(req.flags) {
            tracing::info!(
                network = %self.name,
                requested = ?req.flags,
                current = ?tab.flags(),
                "incompatible open flags"
            );
            return Err(IntNetError::IncompatibleFlags {
                network: self.name.clone(),
            });
        }
        if tab.flags().contains(OpenFlags::ACCESS_RESTRICTED) && !session.shares_identity(&self.creator) {
            return Err(IntNetError::AccessDenied {
                network: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Creates and connects the trunk through `factory`. Interfaces already
    /// on the network are connected to it right away.
    pub fn create_trunk(self: &Arc<Self>, factory: &dyn TrunkFactory) -> Result<()> {
        let port = TrunkPort::new(Arc::downgrade(self));
        {
            let mut tab = self.table();
            tab.host_mac = MacAddr::BROADCAST;
            tab.host_promisc_real = false;
        }
        let flags = if self.shared_mac {
            CreateFlags::NO_PROMISC
        } else {
            CreateFlags::empty()
        };
        let switch_port: Arc<dyn SwitchPort> = Arc::clone(&port) as Arc<dyn SwitchPort>;
        let if_port = factory
            .create_and_connect(&self.trunk_name, switch_port, flags)
            .map_err(|err| {
                tracing::warn!(network = %self.name, trunk = %self.trunk_name, %err, "trunk creation failed");
                IntNetError::from(err)
            })?;
        port.attach(if_port);

        let (ifs, active) = {
            let mut tab = self.table();
            tab.trunk = Some(Arc::clone(&port));
            tab.recompute_trunk_state();
            let ifs: Vec<(IfId, MacAddr)> = tab.entries.iter().map(|e| (e.id(), e.mac)).collect();
            (ifs, tab.active_ifs > 0)
        };
        for (id, mac) in ifs {
            if let Err(err) = port.connect_interface(id) {
                tracing::warn!(network = %self.name, if_id = id.0, %err, "trunk refused interface");
            }
            if mac != MacAddr::BROADCAST {
                port.notify_mac_address(id, mac);
            }
        }
        if active {
            port.set_state(TrunkState::Active);
        }
        tracing::info!(
            network = %self.name,
            trunk = %self.trunk_name,
            trunk_type = %self.trunk_type,
            shared_mac = self.shared_mac,
            "trunk connected"
        );
        Ok(())
    }

    // ---- control path (big mutex held by the caller) ----

    pub fn add_interface(&self, iface: &Arc<Interface>, requested: OpenFlags) -> Result<()> {
        let trunk = {
            let mut tab = self.table();
            if let Some(old) = tab.policy.adapt(requested) {
                let new = tab.flags();
                tracing::info!(network = %self.name, ?old, ?new, "network policy adapted");
                tab.recompute_trunk_state();
                if (old ^ new).contains(OpenFlags::PROMISC_ALLOW_CLIENTS) {
                    tab.recompute_promisc();
                }
            }
            tab.entries.push(MacTabEntry::new(Arc::clone(iface)));
            tab.trunk.clone()
        };
        if let Some(trunk) = trunk {
            if let Err(err) = trunk.connect_interface(iface.id) {
                self.table().remove(iface.id);
                return Err(err.into());
            }
        }
        Ok(())
    }

    pub fn set_active(&self, iface: &Interface, active: bool) -> Result<()> {
        let (trunk, edge) = {
            let mut tab = self.table();
            let entry = tab.entry_mut(iface.id).ok_or(IntNetError::InvalidHandle)?;
            if entry.active == active {
                return Ok(());
            }
            entry.active = active;
            iface.set_active(active);
            let edge = if active {
                tab.active_ifs += 1;
                tab.active_ifs == 1
            } else {
                tab.active_ifs = tab.active_ifs.saturating_sub(1);
                tab.active_ifs == 0
            };
            tab.recompute_trunk_state();
            (tab.trunk.clone(), edge)
        };
        tracing::debug!(network = %self.name, if_id = iface.id.0, active, "interface activity changed");

        if let (Some(trunk), true) = (trunk, edge) {
            if !active && !trunk.wait_not_busy(TRUNK_BUSY_WAIT) {
                tracing::warn!(network = %self.name, "trunk still busy while going inactive");
            }
            trunk.set_state(if active {
                TrunkState::Active
            } else {
                TrunkState::Inactive
            });
        }
        Ok(())
    }

    pub fn set_promiscuous(&self, id: IfId, promiscuous: bool) -> Result<()> {
        if !self.table().set_promiscuous(id, promiscuous) {
            return Err(IntNetError::InvalidHandle);
        }
        tracing::debug!(network = %self.name, if_id = id.0, promiscuous, "promiscuous mode changed");
        Ok(())
    }

    pub fn set_mac_address(&self, id: IfId, mac: MacAddr) -> Result<()> {
        let trunk = {
            let mut tab = self.table();
            let entry = tab.entry_mut(id).ok_or(IntNetError::InvalidHandle)?;
            let changed = entry.mac != mac;
            entry.mac = mac;
            entry.mac_set = true;
            if changed {
                tab.trunk.clone()
            } else {
                None
            }
        };
        if let Some(trunk) = trunk {
            trunk.notify_mac_address(id, mac);
        }
        tracing::debug!(network = %self.name, if_id = id.0, %mac, "MAC address set");
        Ok(())
    }

    /// Unlinks `iface`. Returns true when the network has no interfaces left.
    pub fn remove_interface(&self, iface: &Interface) -> bool {
        let (trunk, last_active) = {
            let mut tab = self.table();
            let Some(entry) = tab.remove(iface.id) else {
                return tab.entries.is_empty();
            };
            let mut last_active = false;
            if entry.active {
                iface.set_active(false);
                tab.active_ifs = tab.active_ifs.saturating_sub(1);
                last_active = tab.active_ifs == 0;
            }
            let remaining: Vec<OpenFlags> = tab.entries.iter().map(|e| e.iface.open_flags).collect();
            tab.policy.recompute_min(remaining.into_iter());
            tab.recompute_trunk_state();
            (tab.trunk.clone(), last_active)
        };
        if let Some(trunk) = trunk {
            if last_active {
                if !trunk.wait_not_busy(TRUNK_BUSY_WAIT) {
                    tracing::warn!(network = %self.name, "trunk still busy while going inactive");
                }
                trunk.set_state(TrunkState::Inactive);
            }
            trunk.disconnect_interface(iface.id);
        }
        self.table().entries.is_empty()
    }

    /// Tears the network down: stops reconnecting and releases the trunk.
    pub fn destruct(&self) {
        self.stop_reconnect();
        let trunk = {
            let mut tab = self.table();
            tab.deactivate_all();
            let trunk = tab.trunk.take();
            tab.recompute_trunk_state();
            trunk
        };
        if let Some(trunk) = trunk {
            trunk.set_state(TrunkState::Disconnecting);
            trunk.destroy(&self.name);
        }
        tracing::info!(network = %self.name, "network destroyed");
    }

    /// The driver pulled the trunk out from under us. Drops it and starts
    /// retrying in the background.
    pub fn trunk_disconnected(self: &Arc<Self>, port: &TrunkPort) {
        let Some(shared) = self.owner.upgrade() else {
            return;
        };
        let reg = shared.registry();
        if reg.shut_down || !reg.contains(self) {
            return;
        }
        let trunk = {
            let mut tab = self.table();
            match &tab.trunk {
                Some(trunk) if std::ptr::eq(Arc::as_ptr(trunk), port) => {}
                _ => return,
            }
            let trunk = tab.trunk.take();
            tab.recompute_trunk_state();
            trunk
        };
        let Some(trunk) = trunk else {
            return;
        };
        tracing::warn!(network = %self.name, trunk = %self.trunk_name, "trunk disconnected by its driver");
        trunk.set_state(TrunkState::Disconnecting);
        self.start_reconnect();
        trunk.destroy(&self.name);
        drop(reg);
    }

    fn start_reconnect(self: &Arc<Self>) {
        self.stop_reconnect();
        let stop = Arc::new(StopSignal::default());
        let worker = {
            let weak = Arc::downgrade(self);
            let stop = Arc::clone(&stop);
            let interval = self.reconnect_interval;
            std::thread::Builder::new()
                .name(format!("intnet-reconnect:{}", self.name))
                .spawn(move || reconnect_loop(weak, stop, interval))
        };
        match worker {
            Ok(thread) => *lock(&self.reconnect) = Some(Reconnector { stop, thread }),
            Err(err) => {
                tracing::error!(network = %self.name, %err, "failed to start trunk reconnect worker")
            }
        }
    }

    fn stop_reconnect(&self) {
        let Some(worker) = lock(&self.reconnect).take() else {
            return;
        };
        worker.stop.stop();
        if worker.thread.thread().id() == std::thread::current().id() {
            return;
        }
        if worker.thread.join().is_err() {
            tracing::warn!(network = %self.name, "trunk reconnect worker panicked");
        }
    }

    // ---- trunk reports ----

    pub fn host_mac_changed(&self, mac: MacAddr) {
        self.table().host_mac = mac;
        tracing::debug!(network = %self.name, %mac, "host MAC reported");
    }

    pub fn host_promisc_changed(&self, promiscuous: bool) {
        let mut tab = self.table();
        tab.host_promisc_real = promiscuous;
        tab.recompute_trunk_state();
    }

    /// Host addresses are off limits for interfaces in shared-MAC mode.
    pub fn host_address(&self, added: bool, addr: IpAddr) {
        if !self.shared_mac {
            return;
        }
        let mut tab = self.table();
        if added {
            tab.blacklist.add(addr);
            tab.forget_addr(addr, "host address");
        } else {
            tab.blacklist.remove(addr);
        }
        tracing::debug!(network = %self.name, %addr, added, "host address change");
    }

    // ---- frame path ----

    /// Quick look at a frame arriving from the trunk, before the driver
    /// commits to building a full list for it.
    pub fn pre_recv(&self, head: &[u8], src: TrunkDir) -> SwDecision {
        let tab = self.table();
        if tab.active_ifs == 0 {
            return SwDecision::Trunk;
        }
        let Some(dst) = ether::dst_mac(head) else {
            return SwDecision::Trunk;
        };
        if dst.is_multicast() || (self.shared_mac && src.contains(TrunkDir::WIRE)) {
            return SwDecision::Broadcast;
        }
        tab.pre_switch_unicast(src, ether::src_mac(head), dst)
    }

    /// A frame from the trunk. True means it was only for interfaces and the
    /// driver must not pass it on.
    pub fn trunk_recv(&self, sg: &Sg<'_>, src: TrunkDir) -> bool {
        let mut sg = sg.clone();
        self.network_send(None, src, &mut sg) == SwDecision::Intnet
    }

    /// Drains the send ring of `iface`.
    pub fn send(&self, iface: &Arc<Interface>) -> Result<()> {
        let _guard = lock(&iface.send_lock);
        let ring = iface.buf.send();
        let mut frame = Vec::new();
        loop {
            let info = match ring.peek() {
                Ok(info) => info,
                Err(PopError::Empty) => return Ok(()),
                Err(PopError::Corrupt) => return Err(self.send_ring_corrupt(iface)),
            };
            frame.resize(info.len, 0);
            ring.copy_frame(&info, &mut frame);

            let decision = match info.gso {
                Some(gso) if !gso.is_valid(info.len) => {
                    iface.buf.inc_bad_frames();
                    tracing::debug!(network = %self.name, if_id = iface.id.0, ?gso, "bad GSO frame dropped");
                    None
                }
                gso => {
                    let mut sg = match gso {
                        Some(gso) => TempSg::with_gso(&frame, gso),
                        None => TempSg::new(&frame),
                    };
                    if self.shared_mac {
                        self.if_snoop(iface.id, &mut sg);
                    }
                    Some(self.network_send(Some(iface), TrunkDir::empty(), &mut sg))
                }
            };
            // Leave the frame in the ring; the caller retries from a context
            // where the trunk can take it.
            if decision == Some(SwDecision::BadContext) {
                return Err(IntNetError::TryAgain);
            }
            if ring.skip_frame().is_err() {
                return Err(self.send_ring_corrupt(iface));
            }
        }
    }

    fn send_ring_corrupt(&self, iface: &Interface) -> IntNetError {
        iface.buf.inc_bad_frames();
        tracing::warn!(network = %self.name, if_id = iface.id.0, "send ring is corrupt");
        IntNetError::CorruptBuffer(BufError::RingCursors("send"))
    }

    fn network_send(&self, sender: Option<&Arc<Interface>>, src: TrunkDir, sg: &mut Sg<'_>) -> SwDecision {
        let mut buf = [0u8; HEAD_LEN];
        let head = read_head(sg, &mut buf);
        if sg.cb_total() < ETH_HDR_LEN || head.len() < ETH_HDR_LEN {
            tracing::trace!(network = %self.name, len = sg.cb_total(), "runt frame dropped");
            return SwDecision::Drop;
        }
        let (Some(dst), Some(src_mac)) = (ether::dst_mac(head), ether::src_mac(head)) else {
            return SwDecision::Drop;
        };
        let sender_id = sender.map(|s| s.id);

        let mut tab = self.table();
        let mut sender_mac = MacAddr::ZERO;
        if let Some(id) = sender_id {
            if let Some(entry) = tab.entry_mut(id) {
                if !entry.mac_set && entry.mac != src_mac && !src_mac.is_multicast() {
                    tracing::debug!(if_id = id.0, old = %entry.mac, new = %src_mac, "interface MAC learned");
                    entry.mac = src_mac;
                }
                sender_mac = entry.mac;
            }
        }

        let dst_tab = if self.shared_mac {
            if dst.is_multicast() {
                self.shared_broadcast(&mut tab, src, sender_id, sg)
            } else if src.contains(TrunkDir::WIRE) {
                if fix_broadcast(sg) {
                    self.shared_broadcast(&mut tab, src, sender_id, sg)
                } else {
                    self.shared_unicast_from_wire(&mut tab, sg, dst)
                }
            } else {
                Some(tab.switch_unicast(src, sender_id, dst))
            }
        } else if dst.is_multicast() {
            Some(tab.switch_broadcast(src, sender_id))
        } else {
            Some(tab.switch_unicast(src, sender_id, dst))
        };

        let Some(dst_tab) = dst_tab.filter(|t| tab.context_ok(sender_id, t)) else {
            return SwDecision::BadContext;
        };
        drop(tab);

        let decision = dst_tab.decision();
        tracing::trace!(network = %self.name, ?src, ?decision, ?dst_tab, "frame switched");
        self.deliver(sender, sender_mac, dst_tab, sg);
        decision
    }

    fn deliver(&self, sender: Option<&Arc<Interface>>, sender_mac: MacAddr, dst_tab: DstTab, sg: &mut Sg<'_>) {
        for dst in &dst_tab.ifs {
            dst.iface.deliver(sg, dst.new_dst, sender.is_some(), self.yield_budget);
        }
        // Frames from the trunk are passed on by the driver itself.
        if let (Some(sender), Some(busy)) = (sender, &dst_tab.trunk) {
            if !dst_tab.trunk_dst.is_empty() {
                self.trunk_send(busy.port(), sender.id, sender_mac, dst_tab.trunk_dst, sg);
            }
        }
    }

    fn trunk_send(&self, port: &TrunkPort, if_id: IfId, sender_mac: MacAddr, dst: TrunkDir, sg: &mut Sg<'_>) {
        let mut dst = dst;
        if self.shared_mac && dst.contains(TrunkDir::WIRE) {
            // The host sees the frame as the interface sent it.
            if dst.contains(TrunkDir::HOST) {
                trunk_xmit(port, if_id, TrunkDir::HOST, sg);
                dst -= TrunkDir::HOST;
            }

            let trunk_mac = port.mac();
            sg.write_part(6, &trunk_mac.0);
            let mut buf = [0u8; HEAD_LEN];
            let head = read_head(sg, &mut buf);
            if sg.flags().contains(SgFlags::ARP_IPV4) {
                if let Some(arp) = ArpIpv4::parse(head) {
                    if arp.sha == sender_mac {
                        sg.write_part(ether::arp::SHA, &trunk_mac.0);
                    }
                    if arp.tha == sender_mac {
                        sg.write_part(ether::arp::THA, &trunk_mac.0);
                    }
                }
            } else if ether::ethertype(head) == Some(ETHERTYPE_IPV6) {
                let mut frame = sg.copy_to_vec();
                if shared_mac::ndp_lla_to_trunk(&mut frame, sender_mac, trunk_mac) {
                    sg.write_part(0, &frame);
                }
            }
        }
        trunk_xmit(port, if_id, dst, sg);
    }

    // ---- shared-MAC helpers ----

    fn shared_broadcast(
        &self,
        tab: &mut SwitchTable,
        src: TrunkDir,
        sender: Option<IfId>,
        sg: &mut Sg<'_>,
    ) -> Option<DstTab> {
        if !tab.context_ok_for_broadcast(src) {
            return None;
        }
        if src.contains(TrunkDir::WIRE) && sg.gso().is_none() {
            let mut buf = [0u8; HEAD_LEN];
            let head = read_head(sg, &mut buf);
            match ether::ethertype(head) {
                Some(ETHERTYPE_IPV6) => {
                    if let Some(target) = shared_mac::dad_target(head) {
                        tab.forget_addr(IpAddr::V6(target), "duplicate address probe on the wire");
                    }
                }
                Some(ETHERTYPE_ARP) => edit_arp_from_wire(tab, sg, head),
                _ => {}
            }
        }
        if !src.is_empty() && sg.flags().contains(SgFlags::ARP_IPV4) {
            trunk_snoop_arp(tab, sg);
        }
        Some(tab.switch_broadcast(src, sender))
    }

    fn shared_unicast_from_wire(&self, tab: &mut SwitchTable, sg: &mut Sg<'_>, dst: MacAddr) -> Option<DstTab> {
        let mut buf = [0u8; HEAD_LEN];
        let ethertype = ether::ethertype(read_head(sg, &mut buf));
        let addr = match ethertype {
            Some(ETHERTYPE_IPV4) => {
                let mut a = [0u8; 4];
                if sg.read_part(ETH_HDR_LEN + 16, &mut a) < a.len() {
                    tracing::debug!(network = %self.name, len = sg.cb_total(), "short IPv4 frame from the wire");
                    return Some(tab.switch_trunk(TrunkDir::WIRE));
                }
                IpAddr::V4(Ipv4Addr::from(a))
            }
            Some(ETHERTYPE_IPV6) => {
                let mut a = [0u8; 16];
                if sg.read_part(ETH_HDR_LEN + 24, &mut a) < a.len() {
                    tracing::debug!(network = %self.name, len = sg.cb_total(), "short IPv6 frame from the wire");
                    return Some(tab.switch_trunk(TrunkDir::WIRE));
                }
                IpAddr::V6(Ipv6Addr::from(a))
            }
            // Unicast ARP is rare enough to just broadcast it.
            Some(ETHERTYPE_ARP) => return self.shared_broadcast(tab, TrunkDir::WIRE, None, sg),
            _ => return Some(tab.switch_trunk_and_promisc(TrunkDir::WIRE)),
        };
        Some(tab.switch_level3(dst, addr))
    }

    /// Learns the layer-3 addresses an interface uses from what it sends.
    fn if_snoop(&self, id: IfId, sg: &mut Sg<'_>) {
        let mut buf = [0u8; HEAD_LEN];
        let head = read_head(sg, &mut buf);
        let mut tab = self.table();
        match ether::ethertype(head) {
            Some(ETHERTYPE_IPV4) => {
                if let Some(ip) = Ipv4Header::parse(head) {
                    if is_good_ipv4(ip.src) {
                        tab.learn_addr(id, IpAddr::V4(ip.src));
                    }
                }
            }
            Some(ETHERTYPE_IPV6) => {
                if let Some(ip) = Ipv6Header::parse(head) {
                    if is_good_ipv6(ip.src) && ip.hop_limit == 0xff {
                        tab.learn_addr(id, IpAddr::V6(ip.src));
                    }
                }
            }
            Some(ETHERTYPE_ARP) => {
                let Some(arp) = shared_mac::editable_arp(head) else {
                    return;
                };
                sg.insert_flags(SgFlags::ARP_IPV4);
                let Some(entry) = tab.entry_mut(id) else {
                    return;
                };
                let own_mac = entry.mac;
                if arp.op == ARP_OP_REPLY
                    && !arp.tha.is_multicast()
                    && !arp.tha.is_dummy()
                    && is_good_ipv4(arp.tpa)
                    && entry.addrs.remove(IpAddr::V4(arp.tpa))
                {
                    tracing::debug!(if_id = id.0, addr = %arp.tpa, "interface answered for an address it lost");
                }
                if arp.sha == own_mac && is_good_ipv4(arp.spa) {
                    tab.learn_addr(id, IpAddr::V4(arp.spa));
                }
            }
            _ => {}
        }
    }
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("name", &self.name)
            .field("trunk_type", &self.trunk_type)
            .field("trunk_name", &self.trunk_name)
            .field("shared_mac", &self.shared_mac)
            .finish_non_exhaustive()
    }
}

fn trunk_xmit(port: &TrunkPort, if_id: IfId, dst: TrunkDir, sg: &Sg<'_>) {
    match sg.gso().copied() {
        Some(gso) if !port.can_handle_gso(gso.kind(), dst) => {
            let frame = sg.copy_to_vec();
            let Some(segments) = gso.carve_all(&frame) else {
                tracing::debug!(?gso, ?dst, "GSO frame cannot be segmented for the trunk; dropped");
                return;
            };
            for segment in segments {
                port.xmit(Some(if_id), &Sg::from_frame(segment), dst);
            }
        }
        _ => port.xmit(Some(if_id), sg, dst),
    }
}

/// Restores a group destination on a broadcast that arrived as unicast.
fn fix_broadcast(sg: &mut Sg<'_>) -> bool {
    let mut buf = [0u8; HEAD_LEN];
    let Some(mac) = shared_mac::broadcast_dst(read_head(sg, &mut buf)) else {
        return false;
    };
    sg.write_part(0, &mac.0)
}

/// ARP replies from the wire name the trunk's MAC as target; point them at
/// the interface that owns the target address instead.
fn edit_arp_from_wire(tab: &SwitchTable, sg: &mut Sg<'_>, head: &[u8]) {
    let Some(arp) = shared_mac::editable_arp(head) else {
        return;
    };
    sg.insert_flags(SgFlags::ARP_IPV4);
    let Some(trunk_mac) = tab.trunk.as_ref().map(|t| t.mac()) else {
        return;
    };
    if arp.op != ARP_OP_REPLY || arp.tha != trunk_mac {
        return;
    }
    let Some(owner) = tab.owner_of(IpAddr::V4(arp.tpa)) else {
        return;
    };
    sg.write_part(ether::arp::THA, &owner.mac.0);
    if ether::dst_mac(head) == Some(trunk_mac) {
        sg.write_part(0, &owner.mac.0);
    }
    tracing::debug!(if_id = owner.id().0, addr = %arp.tpa, mac = %owner.mac, "ARP reply redirected");
}

/// Anyone answering ARP on the wire owns that address now.
fn trunk_snoop_arp(tab: &mut SwitchTable, sg: &Sg<'_>) {
    let mut buf = [0u8; HEAD_LEN];
    let Some(arp) = ArpIpv4::parse(read_head(sg, &mut buf)) else {
        return;
    };
    if !arp.sha.is_multicast() && !arp.sha.is_dummy() && is_good_ipv4(arp.spa) {
        tab.forget_addr(IpAddr::V4(arp.spa), "claimed on the wire");
    }
}

fn reconnect_loop(network: Weak<Network>, stop: Arc<StopSignal>, interval: Duration) {
    loop {
        if stop.sleep(interval) {
            return;
        }
        let Some(net) = network.upgrade() else {
            return;
        };
        let Some(shared) = net.owner.upgrade() else {
            return;
        };
        let reg = loop {
            match shared.big.try_lock() {
                Ok(reg) => break reg,
                Err(TryLockError::Poisoned(poisoned)) => break poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => {
                    if stop.sleep(RECONNECT_LOCK_POLL) {
                        return;
                    }
                }
            }
        };
        if reg.shut_down || !reg.contains(&net) {
            return;
        }
        let Some(factory) = shared.factory(net.trunk_type) else {
            tracing::debug!(network = %net.name, "no trunk factory registered; still waiting");
            continue;
        };
        match net.create_trunk(factory.as_ref()) {
            Ok(()) => {
                tracing::info!(network = %net.name, trunk = %net.trunk_name, "trunk reconnected");
                return;
            }
            Err(err) => {
                tracing::debug!(network = %net.name, %err, "trunk reconnect failed; will retry")
            }
        }
    }
}
