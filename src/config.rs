//! # Configuration Management
//!
//! Centralized configuration for the overlay core.
//!
//! This module provides structured configuration for the local node, the
//! topology manager's role quotas and timers, the packet pool and logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - `OVERLAY_` prefixed environment variables via `from_env()`
//!
//! ## Defaults
//! - Leaf mode, 3 hub connections
//! - Hub mode, 6 hub peers and up to 300 leaves
//! - One maintenance tick per second, 250ms bounded wait for the network lock

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::net::SocketAddrV4;
use std::path::Path;
use std::time::Duration;
use tracing::Level;
use uuid::Uuid;

/// Default overlay listen port
pub const DEFAULT_PORT: u16 = 6346;

/// Default vendor code advertised in local node info
pub const DEFAULT_VENDOR_CODE: &str = "RSOV";

/// Upper bound on connection attempts started in one maintenance pass
pub const MAX_CONNECT_ATTEMPTS: usize = 8;

/// Default countdown, in ticks, for the periodic topology timers
pub const DEFAULT_TIMER_TICKS: u32 = 60;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Local node identity and worker timing
    #[serde(default)]
    pub node: NodeConfig,

    /// Role quotas and maintenance timers
    #[serde(default)]
    pub topology: TopologyConfig,

    /// Packet pool sizing
    #[serde(default)]
    pub pool: PoolConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `OVERLAY_` overrides read through `lookup`.
    ///
    /// Unparseable values are configuration errors rather than silently
    /// ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
            value
                .parse::<T>()
                .map_err(|_| ProtocolError::ConfigError(format!("Invalid value for {key}: {value}")))
        }

        if let Some(addr) = lookup("OVERLAY_ADDRESS") {
            self.node.address = addr;
        }
        if let Some(mode) = lookup("OVERLAY_MODE") {
            self.node.mode = match mode.to_ascii_lowercase().as_str() {
                "hub" => NodeMode::Hub,
                "leaf" => NodeMode::Leaf,
                _ => {
                    return Err(ProtocolError::ConfigError(format!(
                        "Invalid value for OVERLAY_MODE: {mode}"
                    )))
                }
            };
        }
        if let Some(vendor) = lookup("OVERLAY_VENDOR_CODE") {
            self.node.vendor_code = vendor;
        }
        if let Some(ms) = lookup("OVERLAY_TICK_INTERVAL_MS") {
            self.node.tick_interval = Duration::from_millis(parse("OVERLAY_TICK_INTERVAL_MS", &ms)?);
        }
        if let Some(ms) = lookup("OVERLAY_TICK_LOCK_TIMEOUT_MS") {
            self.node.tick_lock_timeout =
                Duration::from_millis(parse("OVERLAY_TICK_LOCK_TIMEOUT_MS", &ms)?);
        }
        if let Some(n) = lookup("OVERLAY_LEAF_TO_HUB") {
            self.topology.leaf_to_hub = parse("OVERLAY_LEAF_TO_HUB", &n)?;
        }
        if let Some(n) = lookup("OVERLAY_HUB_TO_HUB") {
            self.topology.hub_to_hub = parse("OVERLAY_HUB_TO_HUB", &n)?;
        }
        if let Some(n) = lookup("OVERLAY_HUB_TO_LEAF") {
            self.topology.hub_to_leaf = parse("OVERLAY_HUB_TO_LEAF", &n)?;
        }
        if let Some(f) = lookup("OVERLAY_CONNECT_FACTOR") {
            self.topology.connect_factor = parse("OVERLAY_CONNECT_FACTOR", &f)?;
        }
        if let Some(level) = lookup("OVERLAY_LOG_LEVEL") {
            self.logging.log_level = parse("OVERLAY_LOG_LEVEL", &level)?;
        }

        Ok(())
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.node.validate());
        errors.extend(self.topology.validate());
        errors.extend(self.pool.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Operating mode of the local node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeMode {
    Hub,
    #[default]
    Leaf,
}

/// Local node identity and worker timing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeConfig {
    /// Advertised IPv4 listen address (e.g., "0.0.0.0:6346")
    pub address: String,

    /// Overlay identifier; a random one is generated when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<Uuid>,

    /// Hub or leaf
    pub mode: NodeMode,

    /// Four-character vendor code advertised to peers
    pub vendor_code: String,

    /// Interval between maintenance ticks
    #[serde(with = "duration_serde")]
    pub tick_interval: Duration,

    /// Longest a tick waits for the network lock before it is skipped
    #[serde(with = "duration_serde")]
    pub tick_lock_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            address: format!("0.0.0.0:{DEFAULT_PORT}"),
            guid: None,
            mode: NodeMode::Leaf,
            vendor_code: String::from(DEFAULT_VENDOR_CODE),
            tick_interval: Duration::from_secs(1),
            tick_lock_timeout: Duration::from_millis(250),
        }
    }
}

impl NodeConfig {
    /// Parsed listen address.
    pub fn socket_addr(&self) -> Result<SocketAddrV4> {
        self.address.parse::<SocketAddrV4>().map_err(|_| {
            ProtocolError::ConfigError(format!("Invalid node address: '{}'", self.address))
        })
    }

    /// Vendor code as the four bytes carried on the wire.
    pub fn vendor_bytes(&self) -> Result<[u8; 4]> {
        self.vendor_code.as_bytes().try_into().map_err(|_| {
            ProtocolError::ConfigError(format!(
                "Vendor code must be exactly 4 bytes: '{}'",
                self.vendor_code
            ))
        })
    }

    /// Validate node configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Node address cannot be empty".to_string());
        } else if self.socket_addr().is_err() {
            errors.push(format!(
                "Invalid node address format: '{}' (expected IPv4 format: '0.0.0.0:6346')",
                self.address
            ));
        }

        if self.vendor_bytes().is_err() {
            errors.push(format!(
                "Vendor code must be exactly 4 bytes: '{}'",
                self.vendor_code
            ));
        }

        if self.tick_interval.as_millis() < 10 {
            errors.push("Tick interval too short (minimum: 10ms)".to_string());
        } else if self.tick_interval.as_secs() > 60 {
            errors.push("Tick interval too long (maximum: 60s)".to_string());
        }

        if self.tick_lock_timeout.is_zero() {
            errors.push("Tick lock timeout must be greater than 0".to_string());
        } else if self.tick_lock_timeout > self.tick_interval {
            errors.push("Tick lock timeout cannot exceed the tick interval".to_string());
        }

        errors
    }
}

/// Role quotas and maintenance timers
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TopologyConfig {
    /// Hub connections a leaf keeps
    pub leaf_to_hub: usize,

    /// Hub peers a hub keeps
    pub hub_to_hub: usize,

    /// Leaves a hub accepts
    pub hub_to_leaf: usize,

    /// Over-dial multiplier applied to the missing connection count
    pub connect_factor: f64,

    /// Cap on attempts started per maintenance pass
    pub max_connect_attempts: usize,

    /// Ticks between local node info broadcasts
    pub lni_interval_ticks: u32,

    /// Ticks between known-hub-list broadcasts
    pub khl_interval_ticks: u32,

    /// Ticks between routing table expiry passes
    pub route_expiry_ticks: u32,

    /// Lifetime of a routing table entry
    #[serde(with = "duration_serde")]
    pub route_ttl: Duration,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            leaf_to_hub: 3,
            hub_to_hub: 6,
            hub_to_leaf: 300,
            connect_factor: 1.5,
            max_connect_attempts: MAX_CONNECT_ATTEMPTS,
            lni_interval_ticks: DEFAULT_TIMER_TICKS,
            khl_interval_ticks: DEFAULT_TIMER_TICKS,
            route_expiry_ticks: DEFAULT_TIMER_TICKS,
            route_ttl: Duration::from_secs(600),
        }
    }
}

impl TopologyConfig {
    /// Validate topology configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.leaf_to_hub == 0 {
            errors.push("Leaf-to-hub quota must be greater than 0".to_string());
        }
        if self.hub_to_hub == 0 {
            errors.push("Hub-to-hub quota must be greater than 0".to_string());
        }
        if self.hub_to_leaf > u16::MAX as usize {
            errors.push(format!(
                "Hub-to-leaf quota too large: {} (maximum: {})",
                self.hub_to_leaf,
                u16::MAX
            ));
        }

        if !self.connect_factor.is_finite() || self.connect_factor < 1.0 {
            errors.push(format!(
                "Connect factor must be at least 1.0: {}",
                self.connect_factor
            ));
        } else if self.connect_factor > 10.0 {
            errors.push(format!(
                "Connect factor too large: {} (maximum: 10.0)",
                self.connect_factor
            ));
        }

        if self.max_connect_attempts == 0 {
            errors.push("Max connect attempts must be greater than 0".to_string());
        }

        for (name, ticks) in [
            ("LNI interval", self.lni_interval_ticks),
            ("KHL interval", self.khl_interval_ticks),
            ("Route expiry interval", self.route_expiry_ticks),
        ] {
            if ticks == 0 {
                errors.push(format!("{name} must be at least 1 tick"));
            }
        }

        if self.route_ttl.as_secs() < 1 {
            errors.push("Route TTL too short (minimum: 1s)".to_string());
        }

        errors
    }
}

/// Packet pool sizing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Slabs allocated up front
    pub initial_slabs: usize,

    /// Upper bound on slabs; unset grows without limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_slabs: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_slabs: 1,
            max_slabs: None,
        }
    }
}

impl PoolConfig {
    /// Validate pool configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if let Some(max) = self.max_slabs {
            if max == 0 {
                errors.push("Max slabs must be greater than 0".to_string());
            } else if self.initial_slabs > max {
                errors.push(format!(
                    "Initial slabs ({}) exceed max slabs ({max})",
                    self.initial_slabs
                ));
            }
        }
        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("overlay-protocol"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
