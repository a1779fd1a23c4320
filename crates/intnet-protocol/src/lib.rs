//! Wire-level vocabulary shared by the switch, trunk drivers and clients:
//! open flags and their typed policy view, open requests, trunk types, MAC
//! addresses and the few packet fields the switch inspects.

pub mod choice;
pub mod error;
pub mod ether;
pub mod flags;
pub mod mac;
pub mod open;
pub mod policy;
pub mod trunk_type;

pub use error::ProtocolError;
pub use flags::{OpenFlags, PolicyPair, IF_PAIRS, NET_PAIRS};
pub use mac::{MacAddr, ParseMacError};
pub use open::{OpenRequest, MAX_NETWORK_NAME, MAX_TRUNK_NAME};
pub use policy::{
    Access, Fixable, IfPolicy, Link, Mode, NetPolicy, Promisc, Side, TrunkPolicy, TrunkVisibility,
};
pub use trunk_type::TrunkType;
