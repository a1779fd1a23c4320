//! Internal network switch: shared frame rings, trunk ports, open policy
//! negotiation and the switch itself, plus a NIC-facing client backend.

pub use intnet_backend as backend;
pub use intnet_ipc as ipc;
pub use intnet_protocol as protocol;
pub use intnet_switch as switch;
pub use intnet_trunk as trunk;

pub use intnet_backend::{IntNetBackend, NetworkBackend, OpenConfig};
pub use intnet_switch::{IfHandle, IntNet, IntNetConfig, IntNetError, Session};
