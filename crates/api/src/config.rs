//! Application configuration
//!
//! Layered: a JSON config file (path from `--config` or `NEXUS_CONFIG`)
//! provides the base, the `MCP_ENV_VARS` JSON dictionary is merged over it,
//! and `PORT` / `NEXUS_PORT` override the management listener port.

use std::env;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use nexus_shared::{NewVirtualServer, UpstreamDefinition};

use crate::mcp::transport::{
    TransportOptions, DEFAULT_MAX_RETRIES, DEFAULT_QUEUE_CAPACITY, DEFAULT_RETRY_DELAY,
    DEFAULT_TIMEOUT,
};

/// Default management listener port.
pub const DEFAULT_MANAGEMENT_PORT: u16 = 3000;

/// Default capability refresh interval in milliseconds (5 minutes).
pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 300_000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("MCP_ENV_VARS must be a JSON object")]
    InvalidEnvOverlay,
}

/// Transport tuning shared by every upstream connection
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportConfig {
    pub max_retries: u32,
    /// Base reconnect delay in milliseconds.
    pub retry_delay: u64,
    /// Request / handshake timeout in milliseconds.
    pub timeout: u64,
    pub queue_capacity: usize,
    /// Default bearer token; a per-upstream `authToken` wins over this.
    pub auth_token: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY.as_millis() as u64,
            timeout: DEFAULT_TIMEOUT.as_millis() as u64,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            auth_token: None,
        }
    }
}

/// Capability refresh scheduling
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RefreshConfig {
    /// Interval between discovery passes, in milliseconds.
    pub interval: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_REFRESH_INTERVAL_MS,
        }
    }
}

/// Allowed port window for virtual servers
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

/// Limits applied by the virtual-server manager
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VmcpLimits {
    pub max_instances: Option<usize>,
    pub port_range: Option<PortRange>,
}

/// Full gateway configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Management listener port.
    pub port: u16,
    /// Prepopulated upstream definitions.
    pub mcp_servers: Vec<UpstreamDefinition>,
    /// Prepopulated virtual-server definitions.
    pub vmcps: Vec<NewVirtualServer>,
    pub transport: TransportConfig,
    pub refresh: RefreshConfig,
    pub vmcp: VmcpLimits,
    /// Accepted for compatibility with older config files; all state is
    /// in-memory.
    pub persistence: Option<Value>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_MANAGEMENT_PORT,
            mcp_servers: Vec::new(),
            vmcps: Vec::new(),
            transport: TransportConfig::default(),
            refresh: RefreshConfig::default(),
            vmcp: VmcpLimits::default(),
            persistence: None,
        }
    }
}

/// Deep-merge `overlay` into `base`; objects merge per key, everything else
/// replaces.
fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(slot) => merge(slot, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

impl Config {
    /// Load configuration from an optional file plus environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = env::var("NEXUS_CONFIG").ok();
        let path = path
            .map(|p| p.to_path_buf())
            .or_else(|| env_path.map(Into::into));

        let mut value: Value = match path {
            Some(p) => serde_json::from_str(&std::fs::read_to_string(p)?)?,
            None => Value::Object(serde_json::Map::new()),
        };

        if let Ok(raw) = env::var("MCP_ENV_VARS") {
            let overlay: Value = serde_json::from_str(&raw)?;
            if !overlay.is_object() {
                return Err(ConfigError::InvalidEnvOverlay);
            }
            merge(&mut value, overlay);
        }

        let mut config: Config = serde_json::from_value(value)?;

        if let Ok(port) = env::var("PORT") {
            config.port = port.parse().unwrap_or(config.port);
        }
        // NEXUS_PORT is the more specific override and wins.
        if let Ok(port) = env::var("NEXUS_PORT") {
            config.port = port.parse().unwrap_or(config.port);
        }

        Ok(config)
    }

    /// Transport options for one upstream; its own token beats the global
    /// default.
    pub fn transport_options(&self, auth_token: Option<String>) -> TransportOptions {
        TransportOptions {
            timeout: Duration::from_millis(self.transport.timeout),
            retry_delay: Duration::from_millis(self.transport.retry_delay),
            max_retries: self.transport.max_retries,
            queue_capacity: self.transport.queue_capacity,
            auth_token: auth_token.or_else(|| self.transport.auth_token.clone()),
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh.interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Mutex to ensure config tests run serially (they modify shared env vars)
    static CONFIG_TEST_MUTEX: Mutex<()> = Mutex::new(());

    fn cleanup_env() {
        env::remove_var("NEXUS_CONFIG");
        env::remove_var("MCP_ENV_VARS");
        env::remove_var("PORT");
        env::remove_var("NEXUS_PORT");
    }

    #[test]
    fn test_defaults_match_protocol_tuning() {
        let _lock = CONFIG_TEST_MUTEX.lock().unwrap();
        cleanup_env();

        let config = Config::load(None).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.transport.max_retries, 5);
        assert_eq!(config.transport.retry_delay, 1000);
        assert_eq!(config.transport.timeout, 30_000);
        assert_eq!(config.refresh.interval, 300_000);
        assert!(config.mcp_servers.is_empty());

        cleanup_env();
    }

    #[test]
    fn test_file_shape_parses() {
        let config: Config = serde_json::from_value(serde_json::json!({
            "port": 4000,
            "mcpServers": [
                {"name": "u1", "url": "http://127.0.0.1:40001", "authToken": "secret"}
            ],
            "vmcps": [
                {
                    "name": "v1",
                    "port": 5001,
                    "sourceServerIds": ["u1"],
                    "aggregationRules": [{"type": "aggregate_all"}]
                }
            ],
            "transport": {"maxRetries": 3, "retryDelay": 250},
            "refresh": {"interval": 60000},
            "vmcp": {"maxInstances": 4, "portRange": {"start": 5000, "end": 6000}},
            "persistence": {"mode": "none"}
        }))
        .unwrap();

        assert_eq!(config.port, 4000);
        assert_eq!(config.mcp_servers[0].auth_token.as_deref(), Some("secret"));
        assert_eq!(config.vmcps[0].source_server_ids, vec!["u1"]);
        assert_eq!(config.transport.max_retries, 3);
        // Unset fields keep their defaults.
        assert_eq!(config.transport.timeout, 30_000);
        assert_eq!(config.vmcp.max_instances, Some(4));
    }

    #[test]
    fn test_env_port_overrides() {
        let _lock = CONFIG_TEST_MUTEX.lock().unwrap();
        cleanup_env();

        env::set_var("PORT", "4100");
        let config = Config::load(None).unwrap();
        assert_eq!(config.port, 4100);

        // NEXUS_PORT beats PORT.
        env::set_var("NEXUS_PORT", "4200");
        let config = Config::load(None).unwrap();
        assert_eq!(config.port, 4200);

        cleanup_env();
    }

    #[test]
    fn test_mcp_env_vars_merge() {
        let _lock = CONFIG_TEST_MUTEX.lock().unwrap();
        cleanup_env();

        env::set_var(
            "MCP_ENV_VARS",
            r#"{"transport": {"timeout": 5000}, "port": 3210}"#,
        );
        let config = Config::load(None).unwrap();
        assert_eq!(config.port, 3210);
        assert_eq!(config.transport.timeout, 5000);
        // Untouched siblings survive the merge.
        assert_eq!(config.transport.max_retries, 5);

        env::set_var("MCP_ENV_VARS", r#"["not", "an", "object"]"#);
        assert!(matches!(
            Config::load(None),
            Err(ConfigError::InvalidEnvOverlay)
        ));

        cleanup_env();
    }

    #[test]
    fn test_per_upstream_token_beats_global() {
        let mut config = Config::default();
        config.transport.auth_token = Some("global".to_string());

        let opts = config.transport_options(Some("mine".to_string()));
        assert_eq!(opts.auth_token.as_deref(), Some("mine"));

        let opts = config.transport_options(None);
        assert_eq!(opts.auth_token.as_deref(), Some("global"));
    }
}
