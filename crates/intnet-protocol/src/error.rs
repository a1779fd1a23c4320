use crate::mac::ParseMacError;
use crate::{OpenFlags, TrunkType};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("network name is empty")]
    EmptyNetworkName,
    #[error("network name is {len} bytes; the limit is {max}", max = crate::open::MAX_NETWORK_NAME - 1)]
    NetworkNameTooLong { len: usize },
    #[error("trunk name is {len} bytes; the limit is {max}", max = crate::open::MAX_TRUNK_NAME - 1)]
    TrunkNameTooLong { len: usize },
    #[error("names may not contain NUL bytes")]
    EmbeddedNul,
    #[error("trunk type {trunk_type} requires a trunk name")]
    MissingTrunkName { trunk_type: TrunkType },
    #[error("trunk type {trunk_type} takes no trunk name")]
    UnexpectedTrunkName { trunk_type: TrunkType },
    #[error("unknown open flags {0:#x}")]
    UnknownFlags(u32),
    #[error("conflicting open flags {restrictive:?} and {relaxed:?}")]
    ConflictingFlags {
        restrictive: OpenFlags,
        relaxed: OpenFlags,
    },
    #[error("unknown value {value:?} for {key}")]
    UnknownPolicyValue { key: &'static str, value: String },
    #[error("unknown trunk type {0:?}")]
    UnknownTrunkType(String),
    #[error(transparent)]
    BadMac(#[from] ParseMacError),
}
