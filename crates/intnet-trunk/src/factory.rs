use crate::error::Result;
use crate::port::{SwitchPort, TrunkIfPort};
use bitflags::bitflags;
use std::sync::Arc;

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct CreateFlags: u32 {
        /// Do not put the underlying device into promiscuous mode.
        const NO_PROMISC = 1 << 0;
    }
}

/// Creates driver ports for one trunk type.
pub trait TrunkFactory: Send + Sync {
    /// Attaches to the device called `name` and returns its port, connected to
    /// `switch_port`. The returned port starts `Inactive`.
    fn create_and_connect(
        &self,
        name: &str,
        switch_port: Arc<dyn SwitchPort>,
        flags: CreateFlags,
    ) -> Result<Arc<dyn TrunkIfPort>>;
}
