//! Textual policy choices as found in configuration: `value[+fixed]`,
//! `none`, or a bare `fixed`.

use crate::flags::OpenFlags;
use crate::ProtocolError;

/// A configuration key that selects one of a few flag combinations.
#[derive(Debug, Clone, Copy)]
pub struct PolicyKey {
    pub name: &'static str,
    pub choices: &'static [(&'static str, OpenFlags)],
    pub fixed: OpenFlags,
}

pub const ACCESS_POLICY: PolicyKey = PolicyKey {
    name: "AccessPolicy",
    choices: &[
        ("public", OpenFlags::ACCESS_PUBLIC),
        ("restricted", OpenFlags::ACCESS_RESTRICTED),
    ],
    fixed: OpenFlags::ACCESS_FIXED,
};

pub const PROMISC_POLICY_CLIENTS: PolicyKey = PolicyKey {
    name: "PromiscPolicyClients",
    choices: &[
        ("allow", OpenFlags::PROMISC_ALLOW_CLIENTS),
        ("deny", OpenFlags::PROMISC_DENY_CLIENTS),
    ],
    fixed: OpenFlags::PROMISC_FIXED,
};

pub const PROMISC_POLICY_HOST: PolicyKey = PolicyKey {
    name: "PromiscPolicyHost",
    choices: &[
        ("allow", OpenFlags::PROMISC_ALLOW_TRUNK_HOST),
        ("deny", OpenFlags::PROMISC_DENY_TRUNK_HOST),
    ],
    fixed: OpenFlags::PROMISC_FIXED,
};

pub const PROMISC_POLICY_WIRE: PolicyKey = PolicyKey {
    name: "PromiscPolicyWire",
    choices: &[
        ("allow", OpenFlags::PROMISC_ALLOW_TRUNK_WIRE),
        ("deny", OpenFlags::PROMISC_DENY_TRUNK_WIRE),
    ],
    fixed: OpenFlags::PROMISC_FIXED,
};

pub const IF_POLICY_PROMISC: PolicyKey = PolicyKey {
    name: "IfPolicyPromisc",
    choices: &[
        (
            "allow-all",
            OpenFlags::IF_PROMISC_ALLOW.union(OpenFlags::IF_PROMISC_SEE_TRUNK),
        ),
        (
            "allow-network",
            OpenFlags::IF_PROMISC_ALLOW.union(OpenFlags::IF_PROMISC_NO_TRUNK),
        ),
        ("deny", OpenFlags::IF_PROMISC_DENY),
    ],
    fixed: OpenFlags::IF_FIXED,
};

pub const TRUNK_POLICY_HOST: PolicyKey = PolicyKey {
    name: "TrunkPolicyHost",
    choices: &[
        (
            "promisc",
            OpenFlags::TRUNK_HOST_ENABLED.union(OpenFlags::TRUNK_HOST_PROMISC_MODE),
        ),
        ("enabled", OpenFlags::TRUNK_HOST_ENABLED),
        ("disabled", OpenFlags::TRUNK_HOST_DISABLED),
    ],
    fixed: OpenFlags::TRUNK_FIXED,
};

pub const TRUNK_POLICY_WIRE: PolicyKey = PolicyKey {
    name: "TrunkPolicyWire",
    choices: &[
        (
            "promisc",
            OpenFlags::TRUNK_WIRE_ENABLED.union(OpenFlags::TRUNK_WIRE_PROMISC_MODE),
        ),
        ("enabled", OpenFlags::TRUNK_WIRE_ENABLED),
        ("disabled", OpenFlags::TRUNK_WIRE_DISABLED),
    ],
    fixed: OpenFlags::TRUNK_FIXED,
};

pub const ALL_POLICY_KEYS: [PolicyKey; 7] = [
    ACCESS_POLICY,
    PROMISC_POLICY_CLIENTS,
    PROMISC_POLICY_HOST,
    PROMISC_POLICY_WIRE,
    IF_POLICY_PROMISC,
    TRUNK_POLICY_HOST,
    TRUNK_POLICY_WIRE,
];

impl PolicyKey {
    /// Parses `value` into the flags it selects.
    pub fn parse(&self, value: &str) -> Result<OpenFlags, ProtocolError> {
        let unknown = || ProtocolError::UnknownPolicyValue {
            key: self.name,
            value: value.to_string(),
        };

        let mut out = OpenFlags::empty();
        let mut choice = value.trim();
        if let Some(sep) = choice.find(['+', ',', ';']) {
            if choice[sep + 1..].trim() != "fixed" {
                return Err(unknown());
            }
            out |= self.fixed;
            choice = choice[..sep].trim_end();
        }

        if let Some((_, flags)) = self.choices.iter().find(|(name, _)| *name == choice) {
            return Ok(out | *flags);
        }
        match choice {
            "none" => Ok(out),
            "fixed" => Ok(out | self.fixed),
            _ => Err(unknown()),
        }
    }
}

/// Parses a yes/no style switch.
pub fn parse_bool(key: &'static str, value: &str) -> Result<bool, ProtocolError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ProtocolError::UnknownPolicyValue {
            key,
            value: value.to_string(),
        }),
    }
}
