//! The client's view of which network to join and how: parsed from the same
//! `Key = value` configuration a NIC is set up with.

use crate::BackendError;
use intnet_protocol::choice::{self, PolicyKey, ALL_POLICY_KEYS};
use intnet_protocol::{MacAddr, OpenFlags, OpenRequest, ProtocolError, TrunkType};
use serde::Deserialize;
use std::collections::BTreeMap;

/// Every accepted key with the environment variable that sets it.
pub const KEYS: [(&str, &str); 16] = [
    ("Network", "INTNET_NETWORK"),
    ("Trunk", "INTNET_TRUNK"),
    ("TrunkType", "INTNET_TRUNK_TYPE"),
    ("MAC", "INTNET_MAC"),
    ("AccessPolicy", "INTNET_ACCESS_POLICY"),
    ("PromiscPolicyClients", "INTNET_PROMISC_POLICY_CLIENTS"),
    ("PromiscPolicyHost", "INTNET_PROMISC_POLICY_HOST"),
    ("PromiscPolicyWire", "INTNET_PROMISC_POLICY_WIRE"),
    ("IfPolicyPromisc", "INTNET_IF_POLICY_PROMISC"),
    ("TrunkPolicyHost", "INTNET_TRUNK_POLICY_HOST"),
    ("TrunkPolicyWire", "INTNET_TRUNK_POLICY_WIRE"),
    ("SharedMacOnWire", "INTNET_SHARED_MAC_ON_WIRE"),
    ("RequireExactPolicyMatch", "INTNET_REQUIRE_EXACT_POLICY_MATCH"),
    ("RequireAsRestrictivePolicy", "INTNET_REQUIRE_AS_RESTRICTIVE_POLICY"),
    ("ReceiveBufferSize", "INTNET_RECEIVE_BUFFER_SIZE"),
    ("SendBufferSize", "INTNET_SEND_BUFFER_SIZE"),
];

/// Parameters of one interface open.
///
/// Deserializes from a flat map using the configuration key names, e.g.
/// `{"Network": "intnet", "AccessPolicy": "restricted+fixed"}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "BTreeMap<String, Scalar>")]
pub struct OpenConfig {
    pub network: String,
    pub trunk_type: TrunkType,
    pub trunk: String,
    /// Set on the interface right after it is opened.
    pub mac: Option<MacAddr>,
    pub flags: OpenFlags,
    /// Zero picks the switch default.
    pub recv_size: u32,
    pub send_size: u32,
}

impl OpenConfig {
    pub fn new(network: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            trunk_type: TrunkType::None,
            trunk: String::new(),
            mac: None,
            flags: OpenFlags::empty(),
            recv_size: 0,
            send_size: 0,
        }
    }

    /// Builds a configuration from `Key = value` pairs. Key names are
    /// matched case-insensitively; policy keys given twice accumulate.
    pub fn from_pairs<'a>(
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, BackendError> {
        let mut cfg = Self::new(String::new());
        for (key, value) in pairs {
            let key = canonical_key(key).ok_or_else(|| BackendError::UnknownKey(key.to_string()))?;
            cfg.set(key, value)?;
        }
        cfg.finish()
    }

    /// Reads every `INTNET_<KEY>` variable that is set.
    pub fn from_env() -> Result<Self, BackendError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, BackendError> {
        let mut cfg = Self::new(String::new());
        for (key, var) in KEYS {
            if let Some(value) = lookup(var) {
                cfg.set(key, &value)?;
            }
        }
        cfg.finish()
    }

    fn set(&mut self, key: &'static str, value: &str) -> Result<(), BackendError> {
        if let Some(policy) = policy_key(key) {
            self.flags |= policy.parse(value)?;
            return Ok(());
        }
        match key {
            "Network" => self.network = value.to_string(),
            "Trunk" => self.trunk = value.to_string(),
            "TrunkType" => {
                self.trunk_type = TrunkType::parse(value)
                    .ok_or_else(|| ProtocolError::UnknownTrunkType(value.to_string()))?;
            }
            "MAC" => self.mac = Some(value.trim().parse().map_err(ProtocolError::from)?),
            "SharedMacOnWire" => self.set_flag(key, value, OpenFlags::SHARED_MAC_ON_WIRE)?,
            "RequireExactPolicyMatch" => self.set_flag(key, value, OpenFlags::REQUIRE_EXACT)?,
            "RequireAsRestrictivePolicy" => {
                self.set_flag(key, value, OpenFlags::REQUIRE_AS_RESTRICTIVE_POLICIES)?
            }
            "ReceiveBufferSize" => self.recv_size = parse_size(key, value)?,
            "SendBufferSize" => self.send_size = parse_size(key, value)?,
            _ => return Err(BackendError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    fn set_flag(&mut self, key: &'static str, value: &str, flag: OpenFlags) -> Result<(), BackendError> {
        self.flags.set(flag, choice::parse_bool(key, value)?);
        Ok(())
    }

    fn finish(self) -> Result<Self, BackendError> {
        if self.network.is_empty() {
            return Err(BackendError::Missing("Network"));
        }
        self.to_request().validate()?;
        Ok(self)
    }

    pub fn to_request(&self) -> OpenRequest {
        OpenRequest::new(self.network.clone())
            .with_trunk(self.trunk_type, self.trunk.clone())
            .with_flags(self.flags)
            .with_buffer_sizes(self.send_size, self.recv_size)
    }
}

fn canonical_key(key: &str) -> Option<&'static str> {
    let key = key.trim();
    KEYS.iter()
        .map(|(name, _)| *name)
        .find(|name| name.eq_ignore_ascii_case(key))
}

fn policy_key(key: &str) -> Option<PolicyKey> {
    ALL_POLICY_KEYS.into_iter().find(|p| p.name == key)
}

fn parse_size(key: &'static str, value: &str) -> Result<u32, BackendError> {
    value.trim().parse().map_err(|_| BackendError::InvalidNumber {
        key,
        value: value.to_string(),
    })
}

/// A configuration value as it appears in a document.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Str(String),
    Int(u64),
    Bool(bool),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Self::Str(s) => s,
            Self::Int(n) => n.to_string(),
            Self::Bool(b) => b.to_string(),
        }
    }
}

impl TryFrom<BTreeMap<String, Scalar>> for OpenConfig {
    type Error = BackendError;

    fn try_from(map: BTreeMap<String, Scalar>) -> Result<Self, Self::Error> {
        let owned: Vec<(String, String)> = map
            .into_iter()
            .map(|(key, value)| (key, value.into_string()))
            .collect();
        Self::from_pairs(owned.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn policy_strings_become_flags() {
        let cfg = OpenConfig::from_pairs([
            ("Network", "intnet"),
            ("AccessPolicy", "restricted+fixed"),
            ("PromiscPolicyClients", "deny"),
            ("TrunkPolicyWire", "disabled ; fixed"),
            ("IfPolicyPromisc", "allow-network"),
            ("RequireExactPolicyMatch", "yes"),
        ])
        .unwrap();
        assert_eq!(
            cfg.flags,
            OpenFlags::ACCESS_RESTRICTED
                | OpenFlags::ACCESS_FIXED
                | OpenFlags::PROMISC_DENY_CLIENTS
                | OpenFlags::TRUNK_WIRE_DISABLED
                | OpenFlags::TRUNK_FIXED
                | OpenFlags::IF_PROMISC_ALLOW
                | OpenFlags::IF_PROMISC_NO_TRUNK
                | OpenFlags::REQUIRE_EXACT
        );
        assert_eq!(cfg.network, "intnet");
        assert_eq!(cfg.trunk_type, TrunkType::None);
    }

    #[test]
    fn trunk_mac_and_sizes() {
        let cfg = OpenConfig::from_pairs([
            ("network", "bridge0"),
            ("TrunkType", "netflt"),
            ("Trunk", "eth0"),
            ("MAC", "08:00:27:12:34:56"),
            ("ReceiveBufferSize", "65536"),
            ("SendBufferSize", " 32768 "),
            ("SharedMacOnWire", "on"),
        ])
        .unwrap();
        assert_eq!(cfg.trunk_type, TrunkType::NetFlt);
        assert_eq!(cfg.mac, Some(MacAddr([0x08, 0x00, 0x27, 0x12, 0x34, 0x56])));
        assert!(cfg.flags.contains(OpenFlags::SHARED_MAC_ON_WIRE));

        let req = cfg.to_request();
        assert_eq!(req.trunk, "eth0");
        assert_eq!((req.cb_recv, req.cb_send), (65536, 32768));
    }

    #[test]
    fn rejects_bad_configuration() {
        assert_eq!(
            OpenConfig::from_pairs([("Network", "n"), ("Colour", "blue")]).unwrap_err(),
            BackendError::UnknownKey("Colour".into())
        );
        assert_eq!(
            OpenConfig::from_pairs([("AccessPolicy", "public")]).unwrap_err(),
            BackendError::Missing("Network")
        );
        assert!(matches!(
            OpenConfig::from_pairs([("Network", "n"), ("ReceiveBufferSize", "big")]),
            Err(BackendError::InvalidNumber { key: "ReceiveBufferSize", .. })
        ));
        assert!(matches!(
            OpenConfig::from_pairs([("Network", "n"), ("TrunkType", "netflt")]),
            Err(BackendError::Protocol(ProtocolError::MissingTrunkName { .. }))
        ));
        assert!(matches!(
            OpenConfig::from_pairs([
                ("Network", "n"),
                ("AccessPolicy", "public"),
                ("AccessPolicy", "restricted"),
            ]),
            Err(BackendError::Protocol(ProtocolError::ConflictingFlags { .. }))
        ));
        assert!(OpenConfig::from_pairs([("Network", "n"), ("MAC", "08:00:27")]).is_err());
    }

    #[test]
    fn environment_lookup() {
        let vars: HashMap<&str, &str> = [
            ("INTNET_NETWORK", "envnet"),
            ("INTNET_PROMISC_POLICY_HOST", "allow+fixed"),
            ("INTNET_TRUNK_TYPE", "srvnat"),
        ]
        .into_iter()
        .collect();
        let cfg = OpenConfig::from_lookup(|var| vars.get(var).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.network, "envnet");
        assert_eq!(cfg.trunk_type, TrunkType::SrvNat);
        assert_eq!(
            cfg.flags,
            OpenFlags::PROMISC_ALLOW_TRUNK_HOST | OpenFlags::PROMISC_FIXED
        );
    }

    #[test]
    fn deserializes_from_a_document() {
        let cfg: OpenConfig = serde_json::from_str(
            r#"{"Network": "doc", "AccessPolicy": "public", "ReceiveBufferSize": 8192, "SharedMacOnWire": false}"#,
        )
        .unwrap();
        assert_eq!(cfg.network, "doc");
        assert_eq!(cfg.flags, OpenFlags::ACCESS_PUBLIC);
        assert_eq!(cfg.recv_size, 8192);

        assert!(serde_json::from_str::<OpenConfig>(r#"{"AccessPolicy": "public"}"#).is_err());
    }
}
