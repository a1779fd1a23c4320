use bitflags::bitflags;

bitflags! {
    /// Trunk directions: towards the host stack and towards the wire.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct TrunkDir: u32 {
        const HOST = 1 << 0;
        const WIRE = 1 << 1;
    }
}

/// Result of a switching decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwDecision {
    /// Nobody wants it.
    Drop,
    /// Only internal interfaces want it.
    Intnet,
    /// Only the trunk wants it.
    Trunk,
    /// Internal interfaces and the trunk.
    Broadcast,
    /// The decision needs a context the caller is not in.
    BadContext,
}
