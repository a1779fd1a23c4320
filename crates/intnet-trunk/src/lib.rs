//! The trunk side of the internal network: scatter/gather lists, the two port
//! traits that connect a switch to a trunk driver, the trunk state machine and
//! an in-process loopback driver.

pub mod dir;
pub mod error;
pub mod factory;
pub mod loopback;
pub mod port;
pub mod sg;
pub mod state;

pub use dir::{SwDecision, TrunkDir};
pub use error::{Result, TrunkError};
pub use factory::{CreateFlags, TrunkFactory};
pub use loopback::{InjectOutcome, LoopbackFactory, LoopbackTrunk, SentFrame};
pub use port::{
    IfId, PortVersion, SwitchPort, TrunkIfPort, IF_PORT_VERSION, SWITCH_PORT_VERSION,
};
pub use sg::{FreePath, Sg, SgFlags, SgPool, SgPoolStats, SgRef, SgSeg, TempSg, NIL_PHYS};
pub use state::{TrunkState, TrunkStateCell};
