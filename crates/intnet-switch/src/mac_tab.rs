//! The switching table of one network: its interfaces with their MAC and
//! promiscuity state, plus the trunk's host and wire sides.
//!
//! Everything here is guarded by the network's narrow table lock; the hot
//! path only ever takes that lock.

use crate::addr_cache::AddrCaches;
use crate::interface::Interface;
use crate::policy::NetFlags;
use crate::trunk::TrunkPort;
use intnet_protocol::{MacAddr, OpenFlags};
use intnet_trunk::IfId;
use std::net::IpAddr;
use std::sync::Arc;

#[derive(Debug)]
pub(crate) struct MacTabEntry {
    pub mac: MacAddr,
    /// The MAC was set explicitly and is no longer learned from traffic.
    pub mac_set: bool,
    pub active: bool,
    pub promisc_real: bool,
    pub promisc_eff: bool,
    pub see_trunk: bool,
    /// Addresses snooped from this interface's traffic (shared-MAC mode only).
    pub addrs: AddrCaches,
    pub iface: Arc<Interface>,
}

impl MacTabEntry {
    pub fn new(iface: Arc<Interface>) -> Self {
        Self {
            mac: MacAddr::BROADCAST,
            mac_set: false,
            active: false,
            promisc_real: false,
            promisc_eff: false,
            see_trunk: false,
            addrs: AddrCaches::default(),
            iface,
        }
    }

    pub fn id(&self) -> IfId {
        self.iface.id
    }

    /// Derives the effective promiscuity from the requested one and policy.
    fn update_promisc(&mut self, net_flags: OpenFlags) {
        self.promisc_eff = self.promisc_real
            && self.iface.if_flags.contains(OpenFlags::IF_PROMISC_ALLOW)
            && net_flags.contains(OpenFlags::PROMISC_ALLOW_CLIENTS);
        self.see_trunk =
            self.promisc_eff && self.iface.if_flags.contains(OpenFlags::IF_PROMISC_SEE_TRUNK);
    }
}

#[derive(Debug)]
pub(crate) struct SwitchTable {
    pub policy: NetFlags,
    pub entries: Vec<MacTabEntry>,
    pub promisc_entries: usize,
    pub promisc_no_trunk_entries: usize,
    pub active_ifs: usize,

    pub host_mac: MacAddr,
    pub host_promisc_real: bool,
    pub host_promisc_eff: bool,
    pub host_active: bool,
    pub wire_promisc_real: bool,
    pub wire_promisc_eff: bool,
    pub wire_active: bool,
    pub trunk: Option<Arc<TrunkPort>>,

    /// Host addresses guests must not claim.
    pub blacklist: AddrCaches,
}

impl SwitchTable {
    pub fn new(policy: NetFlags) -> Self {
        Self {
            policy,
            entries: Vec::new(),
            promisc_entries: 0,
            promisc_no_trunk_entries: 0,
            active_ifs: 0,
            host_mac: MacAddr::BROADCAST,
            host_promisc_real: false,
            host_promisc_eff: false,
            host_active: false,
            wire_promisc_real: false,
            wire_promisc_eff: false,
            wire_active: false,
            trunk: None,
            blacklist: AddrCaches::default(),
        }
    }

    pub fn flags(&self) -> OpenFlags {
        self.policy.flags
    }

    pub fn index_of(&self, id: IfId) -> Option<usize> {
        self.entries.iter().position(|e| e.id() == id)
    }

    pub fn entry_mut(&mut self, id: IfId) -> Option<&mut MacTabEntry> {
        self.entries.iter_mut().find(|e| e.id() == id)
    }

    pub fn remove(&mut self, id: IfId) -> Option<MacTabEntry> {
        let idx = self.index_of(id)?;
        let entry = self.entries.remove(idx);
        self.recount_promisc();
        Some(entry)
    }

    pub fn recount_promisc(&mut self) {
        self.promisc_entries = self.entries.iter().filter(|e| e.promisc_eff).count();
        self.promisc_no_trunk_entries = self
            .entries
            .iter()
            .filter(|e| e.promisc_eff && !e.see_trunk)
            .count();
    }

    /// Sets the requested promiscuity of one interface. Returns false when the
    /// interface is unknown.
    pub fn set_promiscuous(&mut self, id: IfId, promiscuous: bool) -> bool {
        let flags = self.flags();
        let Some(entry) = self.entry_mut(id) else {
            return false;
        };
        if entry.promisc_real != promiscuous {
            entry.promisc_real = promiscuous;
            entry.update_promisc(flags);
            self.recount_promisc();
        }
        true
    }

    /// Derived trunk state after the trunk, the active count or the flags
    /// changed.
    pub fn recompute_trunk_state(&mut self) {
        let flags = self.flags();
        let active_trunk = self.trunk.is_some() && self.active_ifs > 0;
        self.host_active = active_trunk && flags.contains(OpenFlags::TRUNK_HOST_ENABLED);
        self.host_promisc_eff = (self.host_promisc_real
            || flags.contains(OpenFlags::TRUNK_HOST_PROMISC_MODE))
            && flags.contains(OpenFlags::PROMISC_ALLOW_TRUNK_HOST);
        self.wire_active = active_trunk && flags.contains(OpenFlags::TRUNK_WIRE_ENABLED);
        self.wire_promisc_real = flags.contains(OpenFlags::TRUNK_WIRE_PROMISC_MODE);
        self.wire_promisc_eff =
            self.wire_promisc_real && flags.contains(OpenFlags::PROMISC_ALLOW_TRUNK_WIRE);
    }

    /// Re-derives every interface's effective promiscuity from the policy.
    pub fn recompute_promisc(&mut self) {
        let flags = self.flags();
        for entry in &mut self.entries {
            entry.update_promisc(flags);
        }
        self.recount_promisc();
    }

    /// The active interface that owns `addr`, if any.
    pub fn owner_of(&self, addr: IpAddr) -> Option<&MacTabEntry> {
        self.entries
            .iter()
            .find(|e| e.active && e.addrs.contains(addr))
    }

    /// Drops `addr` from every interface cache. Returns how many had it.
    pub fn forget_addr(&mut self, addr: IpAddr, why: &str) -> usize {
        let mut hits = 0;
        for entry in &mut self.entries {
            if entry.addrs.remove(addr) {
                tracing::debug!(if_id = entry.id().0, %addr, why, "address evicted from cache");
                hits += 1;
            }
        }
        hits
    }

    /// Caches `addr` for interface `id` unless the host owns it.
    pub fn learn_addr(&mut self, id: IfId, addr: IpAddr) {
        if self.blacklist.contains(addr) {
            tracing::warn!(if_id = id.0, %addr, "interface claims a host address; ignored");
            return;
        }
        if let Some(entry) = self.entry_mut(id) {
            if entry.addrs.add(addr) {
                tracing::debug!(if_id = id.0, %addr, "address cached");
            }
        }
    }

    /// Deactivates everything, as the network goes away.
    pub fn deactivate_all(&mut self) {
        for entry in &mut self.entries {
            entry.active = false;
            entry.iface.set_active(false);
        }
        self.active_ifs = 0;
        self.host_active = false;
        self.wire_active = false;
    }
}
