use crate::flags::OpenFlags;
use crate::{ProtocolError, TrunkType};
use serde::{Deserialize, Serialize};

/// Size of the network name field, terminator included.
pub const MAX_NETWORK_NAME: usize = 128;
/// Size of the trunk name field, terminator included.
pub const MAX_TRUNK_NAME: usize = 64;

/// A request to attach a new interface to a (possibly new) network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenRequest {
    pub network: String,
    #[serde(default)]
    pub trunk_type: TrunkType,
    #[serde(default)]
    pub trunk: String,
    #[serde(with = "flag_bits", default = "OpenFlags::empty")]
    pub flags: OpenFlags,
    /// Requested send ring size; zero picks the switch default.
    #[serde(default)]
    pub cb_send: u32,
    /// Requested receive ring size; zero picks the switch default.
    #[serde(default)]
    pub cb_recv: u32,
}

impl OpenRequest {
    pub fn new(network: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            trunk_type: TrunkType::None,
            trunk: String::new(),
            flags: OpenFlags::empty(),
            cb_send: 0,
            cb_recv: 0,
        }
    }

    pub fn with_trunk(mut self, trunk_type: TrunkType, trunk: impl Into<String>) -> Self {
        self.trunk_type = trunk_type;
        self.trunk = trunk.into();
        self
    }

    pub fn with_flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_buffer_sizes(mut self, cb_send: u32, cb_recv: u32) -> Self {
        self.cb_send = cb_send;
        self.cb_recv = cb_recv;
        self
    }

    /// Checks everything that can be checked without looking at a network.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.network.is_empty() {
            return Err(ProtocolError::EmptyNetworkName);
        }
        if self.network.len() >= MAX_NETWORK_NAME {
            return Err(ProtocolError::NetworkNameTooLong {
                len: self.network.len(),
            });
        }
        if self.trunk.len() >= MAX_TRUNK_NAME {
            return Err(ProtocolError::TrunkNameTooLong {
                len: self.trunk.len(),
            });
        }
        if self.network.contains('\0') || self.trunk.contains('\0') {
            return Err(ProtocolError::EmbeddedNul);
        }
        match (self.trunk_type.needs_trunk_name(), self.trunk.is_empty()) {
            (true, true) => {
                return Err(ProtocolError::MissingTrunkName {
                    trunk_type: self.trunk_type,
                })
            }
            (false, false) => {
                return Err(ProtocolError::UnexpectedTrunkName {
                    trunk_type: self.trunk_type,
                })
            }
            _ => {}
        }
        if let Some(pair) = self.flags.conflicting_pair() {
            return Err(ProtocolError::ConflictingFlags {
                restrictive: pair.restrictive,
                relaxed: pair.relaxed,
            });
        }
        Ok(())
    }
}

/// Serializes flags as their raw bits, rejecting unknown ones.
mod flag_bits {
    use crate::OpenFlags;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(flags: &OpenFlags, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u32(flags.bits())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<OpenFlags, D::Error> {
        let raw = u32::deserialize(d)?;
        OpenFlags::from_wire(raw).ok_or_else(|| D::Error::custom(format!("unknown open flags {raw:#x}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_limits() {
        assert_eq!(
            OpenRequest::new("").validate(),
            Err(ProtocolError::EmptyNetworkName)
        );
        OpenRequest::new("a".repeat(127)).validate().unwrap();
        assert_eq!(
            OpenRequest::new("a".repeat(128)).validate(),
            Err(ProtocolError::NetworkNameTooLong { len: 128 })
        );
        let req = OpenRequest::new("net").with_trunk(TrunkType::NetFlt, "e".repeat(64));
        assert_eq!(req.validate(), Err(ProtocolError::TrunkNameTooLong { len: 64 }));
    }

    #[test]
    fn trunk_name_must_match_type() {
        let req = OpenRequest::new("net").with_trunk(TrunkType::NetFlt, "");
        assert_eq!(
            req.validate(),
            Err(ProtocolError::MissingTrunkName {
                trunk_type: TrunkType::NetFlt
            })
        );
        let req = OpenRequest::new("net").with_trunk(TrunkType::None, "eth0");
        assert_eq!(
            req.validate(),
            Err(ProtocolError::UnexpectedTrunkName {
                trunk_type: TrunkType::None
            })
        );
        OpenRequest::new("net")
            .with_trunk(TrunkType::NetAdp, "vboxnet0")
            .validate()
            .unwrap();
    }

    #[test]
    fn conflicting_flags_are_rejected() {
        let req = OpenRequest::new("net")
            .with_flags(OpenFlags::ACCESS_PUBLIC | OpenFlags::ACCESS_RESTRICTED);
        assert_eq!(
            req.validate(),
            Err(ProtocolError::ConflictingFlags {
                restrictive: OpenFlags::ACCESS_RESTRICTED,
                relaxed: OpenFlags::ACCESS_PUBLIC,
            })
        );
    }

    #[test]
    fn deserializes_with_defaults() {
        let req: OpenRequest = serde_json::from_str(r#"{"network":"intnet","flags":3}"#).unwrap();
        assert_eq!(req.trunk_type, TrunkType::None);
        assert!(req.validate().is_err());
        let req: OpenRequest = serde_json::from_str(r#"{"network":"intnet","flags":1}"#).unwrap();
        assert_eq!(req.flags, OpenFlags::ACCESS_PUBLIC);
        assert!(serde_json::from_str::<OpenRequest>(r#"{"network":"x","flags":268435456}"#).is_err());
    }
}
