//! Destination selection. Each switch function walks the table under the
//! narrow lock and records who should receive a frame; delivery happens
//! afterwards without the lock.

use crate::interface::Interface;
use crate::mac_tab::SwitchTable;
use crate::preempt::preemption_enabled;
use crate::trunk::TrunkBusy;
use intnet_protocol::MacAddr;
use intnet_trunk::{IfId, SwDecision, TrunkDir};
use std::net::IpAddr;
use std::sync::Arc;

pub(crate) struct IfDst {
    pub iface: Arc<Interface>,
    /// Destination MAC to write into the copy this interface receives.
    pub new_dst: Option<MacAddr>,
}

/// Where one frame goes.
#[derive(Default)]
pub(crate) struct DstTab {
    pub ifs: Vec<IfDst>,
    pub trunk_dst: TrunkDir,
    pub trunk: Option<TrunkBusy>,
}

impl DstTab {
    fn push(&mut self, iface: &Arc<Interface>, new_dst: Option<MacAddr>) {
        self.ifs.push(IfDst {
            iface: Arc::clone(iface),
            new_dst,
        });
    }

    fn contains(&self, id: IfId) -> bool {
        self.ifs.iter().any(|d| d.iface.id == id)
    }

    pub fn decision(&self) -> SwDecision {
        match (self.ifs.is_empty(), self.trunk_dst.is_empty()) {
            (false, true) => SwDecision::Intnet,
            (false, false) => SwDecision::Broadcast,
            (true, false) => SwDecision::Trunk,
            (true, true) => SwDecision::Drop,
        }
    }
}

impl std::fmt::Debug for DstTab {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DstTab")
            .field("ifs", &self.ifs.iter().map(|d| d.iface.id).collect::<Vec<_>>())
            .field("trunk_dst", &self.trunk_dst)
            .finish()
    }
}

impl SwitchTable {
    /// Takes a busy reference on the trunk when any trunk direction is wanted.
    fn grab_trunk(&self, tab: &mut DstTab) {
        if tab.trunk_dst.is_empty() {
            return;
        }
        match &self.trunk {
            Some(trunk) => tab.trunk = Some(trunk.enter()),
            None => tab.trunk_dst = TrunkDir::empty(),
        }
    }

    /// Adds the promiscuous interfaces that do not see trunk traffic to a
    /// frame that had exact hits and came from the trunk.
    fn add_promisc_no_trunk(&self, tab: &mut DstTab, skip: impl Fn(&crate::mac_tab::MacTabEntry) -> bool) {
        for entry in self.entries.iter().rev() {
            if entry.promisc_eff
                && !entry.see_trunk
                && entry.active
                && !entry.mac.is_dummy()
                && !skip(entry)
                && !tab.contains(entry.id())
            {
                tab.push(&entry.iface, None);
            }
        }
    }

    pub fn switch_unicast(&self, src: TrunkDir, sender: Option<IfId>, dst: MacAddr) -> DstTab {
        debug_assert!(!dst.is_multicast());
        let mut tab = DstTab::default();
        let mut exact_hits = 0usize;

        for entry in self.entries.iter().rev() {
            if !entry.active {
                continue;
            }
            let exact = entry.mac == dst;
            if exact
                || entry.mac.is_dummy()
                || entry.see_trunk
                || (src.is_empty() && entry.promisc_eff)
            {
                exact_hits += usize::from(exact);
                if Some(entry.id()) != sender {
                    tab.push(&entry.iface, None);
                }
            }
        }

        if exact_hits > 0 && !src.is_empty() && self.promisc_no_trunk_entries > 0 {
            self.add_promisc_no_trunk(&mut tab, |e| e.mac == dst);
        }

        if src != TrunkDir::HOST && self.host_active {
            let exact = self.host_mac == dst;
            if exact || self.host_mac.is_dummy() || self.host_promisc_eff {
                exact_hits += usize::from(exact);
                tab.trunk_dst |= TrunkDir::HOST;
            }
        }

        if src != TrunkDir::WIRE && self.wire_active && (exact_hits == 0 || self.wire_promisc_eff) {
            tab.trunk_dst |= TrunkDir::WIRE;
        }

        self.grab_trunk(&mut tab);
        tab
    }

    /// Unicast from the wire in shared-MAC mode, switched on the layer-3
    /// destination. Interfaces owning `addr` get their own MAC patched in.
    pub fn switch_level3(&self, dst_mac: MacAddr, addr: IpAddr) -> DstTab {
        let src = TrunkDir::WIRE;
        let mut tab = DstTab::default();
        let mut dst_mac = dst_mac;
        let mut exact_hits = 0usize;

        for entry in self.entries.iter().rev() {
            if !entry.active {
                continue;
            }
            if entry.addrs.contains(addr) {
                exact_hits += 1;
                dst_mac = entry.mac;
                tab.push(&entry.iface, Some(entry.mac));
            } else if entry.see_trunk {
                tab.push(&entry.iface, None);
            }
        }

        if exact_hits > 0 && self.promisc_no_trunk_entries > 0 {
            self.add_promisc_no_trunk(&mut tab, |e| e.addrs.contains(addr));
        }

        if self.host_active {
            let exact = self.host_mac == dst_mac;
            if exact || self.host_mac.is_dummy() || self.host_promisc_eff {
                exact_hits += usize::from(exact);
                tab.trunk_dst |= TrunkDir::HOST;
            }
        }

        if self.wire_active && (exact_hits == 0 || self.wire_promisc_eff) {
            tab.trunk_dst |= TrunkDir::WIRE;
        }
        tab.trunk_dst -= src;

        self.grab_trunk(&mut tab);
        tab
    }

    /// Everybody active except the sender and the source direction.
    pub fn switch_broadcast(&self, src: TrunkDir, sender: Option<IfId>) -> DstTab {
        let mut tab = DstTab::default();
        for entry in self.entries.iter().rev() {
            if entry.active && Some(entry.id()) != sender {
                tab.push(&entry.iface, None);
            }
        }
        if self.host_active {
            tab.trunk_dst |= TrunkDir::HOST;
        }
        if self.wire_active {
            tab.trunk_dst |= TrunkDir::WIRE;
        }
        tab.trunk_dst -= src;
        self.grab_trunk(&mut tab);
        tab
    }

    /// Frames nobody inside can be matched to: the other trunk direction and
    /// interfaces that see trunk traffic.
    pub fn switch_trunk_and_promisc(&self, src: TrunkDir) -> DstTab {
        let mut tab = DstTab::default();
        for entry in self.entries.iter().rev() {
            if entry.active && (entry.see_trunk || (src.is_empty() && entry.promisc_eff)) {
                tab.push(&entry.iface, None);
            }
        }
        tab.trunk_dst = self.trunk_dirs() - src;
        self.grab_trunk(&mut tab);
        tab
    }

    /// Only the other trunk direction.
    pub fn switch_trunk(&self, src: TrunkDir) -> DstTab {
        let mut tab = DstTab {
            trunk_dst: self.trunk_dirs() - src,
            ..DstTab::default()
        };
        self.grab_trunk(&mut tab);
        tab
    }

    fn trunk_dirs(&self) -> TrunkDir {
        let mut dirs = TrunkDir::empty();
        if self.host_active {
            dirs |= TrunkDir::HOST;
        }
        if self.wire_active {
            dirs |= TrunkDir::WIRE;
        }
        dirs
    }

    /// Cheap classification for frames arriving from the trunk: `Intnet` when
    /// an interface owns the destination and the frame need not go anywhere
    /// else.
    pub fn pre_switch_unicast(&self, src: TrunkDir, src_mac: Option<MacAddr>, dst: MacAddr) -> SwDecision {
        for entry in self.entries.iter().rev() {
            if !entry.active {
                continue;
            }
            if entry.mac.is_dummy() || Some(entry.mac) == src_mac {
                break;
            }
            if entry.mac == dst {
                return if self.host_promisc_eff && src == TrunkDir::WIRE {
                    SwDecision::Broadcast
                } else {
                    SwDecision::Intnet
                };
            }
        }
        SwDecision::Broadcast
    }

    /// Whether a frame from `sender` can reach the trunk directions in `tab`
    /// from the current context.
    pub fn context_ok(&self, sender: Option<IfId>, tab: &DstTab) -> bool {
        if sender.is_none() || tab.trunk_dst.is_empty() || preemption_enabled() {
            return true;
        }
        let no_preempt = tab
            .trunk
            .as_ref()
            .map_or(TrunkDir::empty(), |t| t.no_preempt_dsts());
        no_preempt.contains(tab.trunk_dst)
    }

    /// The broadcast variant is decided before a table is built.
    pub fn context_ok_for_broadcast(&self, src: TrunkDir) -> bool {
        if !src.is_empty() || preemption_enabled() {
            return true;
        }
        let Some(trunk) = &self.trunk else {
            return true;
        };
        let no_preempt = trunk.no_preempt_dsts();
        if no_preempt == TrunkDir::HOST | TrunkDir::WIRE {
            return true;
        }
        (!self.host_active || no_preempt.contains(TrunkDir::HOST))
            && (!self.wire_active || no_preempt.contains(TrunkDir::WIRE))
    }
}
