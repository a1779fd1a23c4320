//! The internal network switch: named networks of interfaces exchanging
//! Ethernet frames through shared rings, optionally connected to the host or
//! a physical NIC through a trunk driver.

pub mod addr_cache;
pub mod config;
pub mod error;
mod interface;
mod intnet;
mod mac_tab;
mod network;
pub mod policy;
pub mod preempt;
pub mod session;
mod shared_mac;
mod switching;
mod trunk;

pub use config::IntNetConfig;
pub use error::{IntNetError, Result};
pub use intnet::IntNet;
pub use preempt::{preemption_enabled, NoPreemptGuard};
pub use session::{IfHandle, Session};
