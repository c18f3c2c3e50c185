//! Node configuration.
//!
//! `OlsrConfig` is handed to [`crate::OlsrNode::new`] and can be built in code
//! with the builder methods or loaded from JSON. Every field has a default,
//! so a JSON document only needs to list interfaces.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::message::Willingness;

/// Holding times are this many emission intervals.
const HOLD_MULTIPLIER: u32 = 3;

/// One local interface taking part in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    pub index: u32,
    pub address: Ipv4Addr,
}

/// A network announced through HNA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OlsrConfig {
    #[serde(default)]
    pub interfaces: Vec<InterfaceConfig>,
    /// Interface whose address is the node's main address. Defaults to the
    /// first interface that is not excluded.
    #[serde(default)]
    pub main_interface: Option<u32>,
    /// Interfaces ignored for protocol operation.
    #[serde(default)]
    pub excluded_interfaces: BTreeSet<u32>,
    #[serde(default = "OlsrConfig::default_willingness")]
    pub willingness: u8,
    #[serde(default = "OlsrConfig::default_hello_interval_ms")]
    pub hello_interval_ms: u64,
    #[serde(default = "OlsrConfig::default_tc_interval_ms")]
    pub tc_interval_ms: u64,
    #[serde(default = "OlsrConfig::default_mid_interval_ms")]
    pub mid_interval_ms: u64,
    #[serde(default = "OlsrConfig::default_hna_interval_ms")]
    pub hna_interval_ms: u64,
    /// Duplicate Set holding time.
    #[serde(default = "OlsrConfig::default_dup_hold_ms")]
    pub dup_hold_ms: u64,
    /// Upper bound of the random delay before queued messages are sent.
    /// `None` means a quarter of the HELLO interval.
    #[serde(default)]
    pub max_jitter_ms: Option<u64>,
    #[serde(default)]
    pub host_networks: Vec<NetworkConfig>,
}

impl Default for OlsrConfig {
    fn default() -> Self {
        OlsrConfig {
            interfaces: Vec::new(),
            main_interface: None,
            excluded_interfaces: BTreeSet::new(),
            willingness: Self::default_willingness(),
            hello_interval_ms: Self::default_hello_interval_ms(),
            tc_interval_ms: Self::default_tc_interval_ms(),
            mid_interval_ms: Self::default_mid_interval_ms(),
            hna_interval_ms: Self::default_hna_interval_ms(),
            dup_hold_ms: Self::default_dup_hold_ms(),
            max_jitter_ms: None,
            host_networks: Vec::new(),
        }
    }
}

impl OlsrConfig {
    fn default_willingness() -> u8 { 3 }
    fn default_hello_interval_ms() -> u64 { 2000 }
    fn default_tc_interval_ms() -> u64 { 5000 }
    fn default_mid_interval_ms() -> u64 { 5000 }
    fn default_hna_interval_ms() -> u64 { 5000 }
    fn default_dup_hold_ms() -> u64 { 30_000 }

    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a protocol interface.
    pub fn with_interface(mut self, index: u32, address: Ipv4Addr) -> Self {
        self.interfaces.push(InterfaceConfig { index, address });
        self
    }

    pub fn main_interface(mut self, index: u32) -> Self {
        self.main_interface = Some(index);
        self
    }

    pub fn exclude_interface(mut self, index: u32) -> Self {
        self.excluded_interfaces.insert(index);
        self
    }

    pub fn willingness(mut self, value: u8) -> Self {
        self.willingness = value;
        self
    }

    /// Set the HELLO interval (in milliseconds).
    pub fn hello_interval_ms(mut self, value: u64) -> Self {
        self.hello_interval_ms = value;
        self
    }

    /// Set the TC interval (in milliseconds).
    pub fn tc_interval_ms(mut self, value: u64) -> Self {
        self.tc_interval_ms = value;
        self
    }

    pub fn mid_interval_ms(mut self, value: u64) -> Self {
        self.mid_interval_ms = value;
        self
    }

    pub fn hna_interval_ms(mut self, value: u64) -> Self {
        self.hna_interval_ms = value;
        self
    }

    pub fn dup_hold_ms(mut self, value: u64) -> Self {
        self.dup_hold_ms = value;
        self
    }

    /// `Some(0)` sends queued messages immediately.
    pub fn max_jitter_ms(mut self, value: Option<u64>) -> Self {
        self.max_jitter_ms = value;
        self
    }

    /// Announce a network through HNA from startup.
    pub fn with_host_network(mut self, address: Ipv4Addr, netmask: Ipv4Addr) -> Self {
        self.host_networks.push(NetworkConfig { address, netmask });
        self
    }

    pub fn hello_interval(&self) -> Duration {
        Duration::from_millis(self.hello_interval_ms)
    }

    pub fn tc_interval(&self) -> Duration {
        Duration::from_millis(self.tc_interval_ms)
    }

    pub fn mid_interval(&self) -> Duration {
        Duration::from_millis(self.mid_interval_ms)
    }

    pub fn hna_interval(&self) -> Duration {
        Duration::from_millis(self.hna_interval_ms)
    }

    pub fn neighbor_hold(&self) -> Duration {
        self.hello_interval() * HOLD_MULTIPLIER
    }

    pub fn top_hold(&self) -> Duration {
        self.tc_interval() * HOLD_MULTIPLIER
    }

    pub fn mid_hold(&self) -> Duration {
        self.mid_interval() * HOLD_MULTIPLIER
    }

    pub fn hna_hold(&self) -> Duration {
        self.hna_interval() * HOLD_MULTIPLIER
    }

    pub fn dup_hold(&self) -> Duration {
        Duration::from_millis(self.dup_hold_ms)
    }

    pub fn max_jitter(&self) -> Duration {
        match self.max_jitter_ms {
            Some(ms) => Duration::from_millis(ms),
            None => self.hello_interval() / 4,
        }
    }

    /// The configured main interface, or the first usable one.
    pub fn main_interface_index(&self) -> Option<u32> {
        self.main_interface.or_else(|| {
            self.interfaces
                .iter()
                .find(|i| !self.excluded_interfaces.contains(&i.index))
                .map(|i| i.index)
        })
    }

    pub fn interface(&self, index: u32) -> Option<&InterfaceConfig> {
        self.interfaces.iter().find(|i| i.index == index)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        Willingness::new(self.willingness)
            .ok_or(ConfigError::InvalidWillingness(self.willingness))?;

        let mut seen = BTreeSet::new();
        for iface in &self.interfaces {
            if !seen.insert(iface.index) {
                return Err(ConfigError::DuplicateInterface(iface.index));
            }
        }
        if let Some(index) = self
            .excluded_interfaces
            .iter()
            .chain(self.main_interface.iter())
            .find(|i| !seen.contains(*i))
        {
            return Err(ConfigError::UnknownInterface(*index));
        }
        if seen.len() == self.excluded_interfaces.len() {
            return Err(ConfigError::NoInterfaces);
        }

        for (name, value) in [
            ("hello_interval_ms", self.hello_interval_ms),
            ("tc_interval_ms", self.tc_interval_ms),
            ("mid_interval_ms", self.mid_interval_ms),
            ("hna_interval_ms", self.hna_interval_ms),
            ("dup_hold_ms", self.dup_hold_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroInterval(name));
            }
        }
        Ok(())
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: OlsrConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_ifaces() -> OlsrConfig {
        OlsrConfig::new()
            .with_interface(1, Ipv4Addr::new(10, 0, 0, 1))
            .with_interface(2, Ipv4Addr::new(10, 1, 0, 1))
    }

    #[test]
    fn defaults_and_hold_times() {
        let config = OlsrConfig::default();
        assert_eq!(config.willingness, 3);
        assert_eq!(config.neighbor_hold(), Duration::from_secs(6));
        assert_eq!(config.top_hold(), Duration::from_secs(15));
        assert_eq!(config.max_jitter(), Duration::from_millis(500));
        assert_eq!(config.dup_hold(), Duration::from_secs(30));
    }

    #[test]
    fn builder_sets_fields() {
        let config = two_ifaces()
            .hello_interval_ms(1000)
            .tc_interval_ms(3000)
            .max_jitter_ms(Some(0))
            .willingness(7);
        assert!(config.validate().is_ok());
        assert_eq!(config.neighbor_hold(), Duration::from_secs(3));
        assert_eq!(config.max_jitter(), Duration::ZERO);
        assert_eq!(config.main_interface_index(), Some(1));
    }

    #[test]
    fn main_interface_skips_excluded() {
        let config = two_ifaces().exclude_interface(1);
        assert_eq!(config.main_interface_index(), Some(2));
        assert_eq!(config.clone().main_interface(1).main_interface_index(), Some(1));
    }

    #[test]
    fn validation_errors() {
        assert!(matches!(
            OlsrConfig::new().validate(),
            Err(ConfigError::NoInterfaces)
        ));
        assert!(matches!(
            two_ifaces().exclude_interface(1).exclude_interface(2).validate(),
            Err(ConfigError::NoInterfaces)
        ));
        assert!(matches!(
            two_ifaces().willingness(8).validate(),
            Err(ConfigError::InvalidWillingness(8))
        ));
        assert!(matches!(
            two_ifaces().with_interface(1, Ipv4Addr::new(10, 2, 0, 1)).validate(),
            Err(ConfigError::DuplicateInterface(1))
        ));
        assert!(matches!(
            two_ifaces().exclude_interface(9).validate(),
            Err(ConfigError::UnknownInterface(9))
        ));
        assert!(matches!(
            two_ifaces().main_interface(4).validate(),
            Err(ConfigError::UnknownInterface(4))
        ));
        assert!(matches!(
            two_ifaces().hello_interval_ms(0).validate(),
            Err(ConfigError::ZeroInterval("hello_interval_ms"))
        ));
    }

    #[test]
    fn json_fills_in_defaults() {
        let json = r#"{
            "interfaces": [{ "index": 1, "address": "10.0.0.1" }],
            "host_networks": [{ "address": "192.168.1.0", "netmask": "255.255.255.0" }],
            "tc_interval_ms": 4000
        }"#;
        let config = OlsrConfig::from_json_str(json).unwrap();
        assert_eq!(config.tc_interval_ms, 4000);
        assert_eq!(config.hello_interval_ms, 2000);
        assert_eq!(config.host_networks.len(), 1);

        let again = OlsrConfig::from_json_str(&config.to_json().unwrap()).unwrap();
        assert_eq!(again, config);
    }

    #[test]
    fn json_errors_are_reported() {
        assert!(matches!(
            OlsrConfig::from_json_str("{ not json"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            OlsrConfig::from_json_str(r#"{ "interfaces": [], "willingness": 3 }"#),
            Err(ConfigError::NoInterfaces)
        ));
    }

    #[test]
    fn missing_file() {
        let err = OlsrConfig::load_file(Path::new("/nonexistent/olsr.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
