use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_MAX_INTERFACES: usize = 1040;
pub const DEFAULT_RECV_SIZE: usize = 318 * 1024;
pub const DEFAULT_SEND_SIZE: usize = 192 * 1024;
pub const MAX_BUFFER_SIZE: usize = 8 * 1024 * 1024;
pub const DEFAULT_YIELD_RETRIES: u32 = 4;
pub const DEFAULT_TRUNK_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// Switch-wide limits and timings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntNetConfig {
    /// Across all networks.
    pub max_interfaces: usize,
    pub default_recv_size: usize,
    pub default_send_size: usize,
    /// Larger requested ring sizes are clamped to this.
    pub max_buffer_size: usize,
    /// How often a full receive ring is retried before the frame is lost.
    pub yield_retries: u32,
    #[serde(with = "millis")]
    pub trunk_reconnect_interval: Duration,
}

impl Default for IntNetConfig {
    fn default() -> Self {
        Self {
            max_interfaces: DEFAULT_MAX_INTERFACES,
            default_recv_size: DEFAULT_RECV_SIZE,
            default_send_size: DEFAULT_SEND_SIZE,
            max_buffer_size: MAX_BUFFER_SIZE,
            yield_retries: DEFAULT_YIELD_RETRIES,
            trunk_reconnect_interval: DEFAULT_TRUNK_RECONNECT_INTERVAL,
        }
    }
}

impl IntNetConfig {
    /// Defaults overridden by `INTNET_MAX_IFS`, `INTNET_RECV_BUF_SIZE`,
    /// `INTNET_SEND_BUF_SIZE` and `INTNET_TRUNK_RECONNECT_MS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(v) = parse::<usize>(&lookup, "INTNET_MAX_IFS")? {
            anyhow::ensure!(v > 0, "INTNET_MAX_IFS must be positive");
            cfg.max_interfaces = v;
        }
        if let Some(v) = parse::<usize>(&lookup, "INTNET_RECV_BUF_SIZE")? {
            cfg.default_recv_size = v;
        }
        if let Some(v) = parse::<usize>(&lookup, "INTNET_SEND_BUF_SIZE")? {
            cfg.default_send_size = v;
        }
        if let Some(v) = parse::<u64>(&lookup, "INTNET_TRUNK_RECONNECT_MS")? {
            cfg.trunk_reconnect_interval = Duration::from_millis(v);
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.default_recv_size <= self.max_buffer_size,
            "receive buffer size {} exceeds the limit {}",
            self.default_recv_size,
            self.max_buffer_size
        );
        anyhow::ensure!(
            self.default_send_size <= self.max_buffer_size,
            "send buffer size {} exceeds the limit {}",
            self.default_send_size,
            self.max_buffer_size
        );
        anyhow::ensure!(
            !self.trunk_reconnect_interval.is_zero(),
            "trunk reconnect interval must be positive"
        );
        Ok(())
    }

    /// Zero picks the default; everything is clamped to the maximum.
    pub(crate) fn recv_size(&self, requested: u32) -> usize {
        self.buffer_size(requested, self.default_recv_size)
    }

    pub(crate) fn send_size(&self, requested: u32) -> usize {
        self.buffer_size(requested, self.default_send_size)
    }

    fn buffer_size(&self, requested: u32, default: usize) -> usize {
        match requested as usize {
            0 => default,
            n => n.min(self.max_buffer_size),
        }
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("invalid value {raw:?} for {key}")),
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let cfg = IntNetConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, IntNetConfig::default());
        assert_eq!(cfg.recv_size(0), DEFAULT_RECV_SIZE);
        assert_eq!(cfg.send_size(u32::MAX), MAX_BUFFER_SIZE);
    }

    #[test]
    fn env_overrides() {
        let cfg = IntNetConfig::from_lookup(lookup(&[
            ("INTNET_MAX_IFS", "8"),
            ("INTNET_RECV_BUF_SIZE", "4096"),
            ("INTNET_TRUNK_RECONNECT_MS", " 250 "),
        ]))
        .unwrap();
        assert_eq!(cfg.max_interfaces, 8);
        assert_eq!(cfg.default_recv_size, 4096);
        assert_eq!(cfg.default_send_size, DEFAULT_SEND_SIZE);
        assert_eq!(cfg.trunk_reconnect_interval, Duration::from_millis(250));
    }

    #[test]
    fn rejects_bad_values() {
        let err = IntNetConfig::from_lookup(lookup(&[("INTNET_MAX_IFS", "lots")])).unwrap_err();
        assert!(format!("{err:#}").contains("INTNET_MAX_IFS"));
        assert!(IntNetConfig::from_lookup(lookup(&[("INTNET_MAX_IFS", "0")])).is_err());
        assert!(IntNetConfig::from_lookup(lookup(&[("INTNET_SEND_BUF_SIZE", "999999999")])).is_err());
        assert!(IntNetConfig::from_lookup(lookup(&[("INTNET_TRUNK_RECONNECT_MS", "0")])).is_err());
    }

    #[test]
    fn deserializes_partial_json() {
        let cfg: IntNetConfig = serde_json::from_str(r#"{"yield_retries":1}"#).unwrap();
        assert_eq!(cfg.yield_retries, 1);
        assert_eq!(cfg.trunk_reconnect_interval, DEFAULT_TRUNK_RECONNECT_INTERVAL);
    }
}
