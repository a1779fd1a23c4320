use crate::state::TrunkState;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrunkError {
    #[error("port version mismatch: expected {expected:#010x}, found {leading:#010x}/{trailing:#010x}")]
    VersionMismatch {
        expected: u32,
        leading: u32,
        trailing: u32,
    },
    #[error("invalid trunk state transition {from:?} -> {to:?}")]
    InvalidState { from: TrunkState, to: TrunkState },
    #[error("scatter/gather list is full ({alloc} segments)")]
    SegmentsFull { alloc: usize },
    #[error("timed out waiting for the trunk to go idle")]
    Timeout,
    #[error("transmit failed: {0}")]
    Xmit(String),
    #[error("trunk {0:?} not found")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, TrunkError>;
