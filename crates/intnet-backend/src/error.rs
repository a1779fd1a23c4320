use intnet_protocol::ProtocolError;
use intnet_switch::IntNetError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("unknown configuration key {0:?}")]
    UnknownKey(String),
    #[error("invalid value {value:?} for {key}")]
    InvalidNumber { key: &'static str, value: String },
    #[error("configuration key {0} is required")]
    Missing(&'static str),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Switch(#[from] IntNetError),
}
