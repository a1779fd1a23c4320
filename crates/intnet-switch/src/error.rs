use intnet_ipc::BufError;
use intnet_protocol::{ProtocolError, TrunkType};
use intnet_trunk::TrunkError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntNetError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(#[from] ProtocolError),
    #[error("invalid interface handle")]
    InvalidHandle,
    #[error("open flags are incompatible with network {network:?}")]
    IncompatibleFlags { network: String },
    #[error("network {network:?} uses a different trunk")]
    IncompatibleTrunk { network: String },
    #[error("access to network {network:?} denied")]
    AccessDenied { network: String },
    #[error("the wait semaphore was destroyed")]
    SemDestroyed,
    #[error("timed out")]
    Timeout,
    #[error("interrupted")]
    Interrupted,
    #[error("try again")]
    TryAgain,
    #[error("trunk type {0} is not supported")]
    NotSupported(TrunkType),
    #[error("version mismatch")]
    VersionMismatch,
    #[error("corrupt interface buffer: {0}")]
    CorruptBuffer(#[from] BufError),
    #[error("too many interfaces (limit {limit})")]
    TooManyInterfaces { limit: usize },
    #[error("the switch is shut down")]
    ShutDown,
    #[error(transparent)]
    Trunk(TrunkError),
}

impl From<TrunkError> for IntNetError {
    fn from(err: TrunkError) -> Self {
        match err {
            TrunkError::VersionMismatch { .. } => Self::VersionMismatch,
            other => Self::Trunk(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, IntNetError>;
