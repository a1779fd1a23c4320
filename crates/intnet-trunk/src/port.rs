//! The two halves of the switch/trunk protocol.
//!
//! [`SwitchPort`] is implemented by the switch and called by a trunk driver;
//! [`TrunkIfPort`] is implemented by the driver and called by the switch.
//! `pre_recv`, `recv` and the scatter/gather calls may come from restricted
//! contexts and only ever take the switch's narrow address lock. Everything
//! that changes the trunk's shape runs under the switch's big mutex.

use crate::dir::{SwDecision, TrunkDir};
use crate::error::{Result, TrunkError};
use crate::sg::{Sg, SgRef};
use crate::state::TrunkState;
use intnet_protocol::MacAddr;
use std::net::IpAddr;
use std::time::Duration;

pub const SWITCH_PORT_VERSION: u32 = 0xA2CD_F001;
pub const IF_PORT_VERSION: u32 = 0xA2CD_E001;

/// The version words bracketing a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortVersion {
    pub leading: u32,
    pub trailing: u32,
}

impl PortVersion {
    pub const fn new(version: u32) -> Self {
        Self {
            leading: version,
            trailing: version,
        }
    }

    pub fn check(self, expected: u32) -> Result<()> {
        if self.leading != expected || self.trailing != expected {
            return Err(TrunkError::VersionMismatch {
                expected,
                leading: self.leading,
                trailing: self.trailing,
            });
        }
        Ok(())
    }
}

/// Identifies an interface to the trunk driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IfId(pub u32);

pub trait SwitchPort: Send + Sync {
    fn version(&self) -> PortVersion {
        PortVersion::new(SWITCH_PORT_VERSION)
    }

    /// Cheap classification of an inbound frame from its first bytes.
    fn pre_recv(&self, frame_head: &[u8], src: TrunkDir) -> SwDecision;

    /// Injects an inbound frame. Returns true when the frame was fully handled
    /// internally and must not be forwarded to the other trunk direction.
    fn recv(&self, sg: &Sg<'_>, src: TrunkDir) -> bool;

    fn sg_retain(&self, sg: &SgRef);

    fn sg_release(&self, sg: &SgRef);

    /// Toggles physical address population; returns the previous setting.
    fn set_sg_phys(&self, enable: bool) -> bool;

    fn report_mac_address(&self, mac: MacAddr);

    fn report_promiscuous_mode(&self, promiscuous: bool);

    /// `caps` is a mask of `1 << GsoType` bits.
    fn report_gso_capabilities(&self, caps: u32, dst: TrunkDir);

    /// Directions whose `xmit` can be called with preemption disabled.
    fn report_no_preempt_dsts(&self, dsts: TrunkDir);

    /// A host interface gained or lost an address.
    fn notify_host_address(&self, added: bool, addr: IpAddr);

    /// Driver-initiated teardown (e.g. the device went away). `release_busy`
    /// drops the busy reference the driver took before calling.
    fn disconnect(&self, if_port: &dyn TrunkIfPort, release_busy: Option<&dyn Fn()>);
}

/// Ownership of a driver port is an `Arc`; cloning retains and dropping
/// releases.
pub trait TrunkIfPort: Send + Sync {
    fn version(&self) -> PortVersion {
        PortVersion::new(IF_PORT_VERSION)
    }

    /// Returns the previous state.
    fn set_state(&self, state: TrunkState) -> Result<TrunkState>;

    fn connect_interface(&self, if_id: IfId) -> Result<()>;

    fn disconnect_interface(&self, if_id: IfId);

    /// An interface changed its MAC address.
    fn notify_mac_address(&self, if_id: IfId, mac: MacAddr);

    /// Sends a frame towards `dst`. The list is only valid during the call.
    fn xmit(&self, if_id: Option<IfId>, sg: &Sg<'_>, dst: TrunkDir) -> Result<()>;

    /// Blocks until no calls into the switch port are in flight.
    fn wait_for_idle(&self, timeout: Duration) -> Result<()>;

    /// Final step of teardown; the driver must drop its switch port.
    fn disconnect_and_release(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_words_must_both_match() {
        PortVersion::new(IF_PORT_VERSION).check(IF_PORT_VERSION).unwrap();
        let torn = PortVersion {
            leading: IF_PORT_VERSION,
            trailing: 0,
        };
        assert_eq!(
            torn.check(IF_PORT_VERSION),
            Err(TrunkError::VersionMismatch {
                expected: IF_PORT_VERSION,
                leading: IF_PORT_VERSION,
                trailing: 0,
            })
        );
        assert!(PortVersion::new(SWITCH_PORT_VERSION)
            .check(IF_PORT_VERSION)
            .is_err());
    }
}
