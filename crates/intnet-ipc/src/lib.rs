//! Shared-memory frame rings exchanged between internal network interfaces and
//! the switch.
//!
//! An [`IntNetBuf`] is the whole block an interface maps; it carries one receive
//! and one send [`Ring`]. The layout is fixed and offset based (see [`layout`]),
//! so producer and consumer may be built separately and map the block at
//! different addresses.

pub mod buf;
pub mod gso;
pub mod layout;
pub mod ring;
mod shared;

pub use buf::{BufError, BufStats, IntNetBuf};
pub use gso::{CarvedSegment, GsoContext, GsoType};
pub use layout::IntNetHdr;
pub use ring::{Frame, FrameInfo, FrameSlot, PopError, PushError, Ring, RingStats};
