//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the gateway server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address, family, TLS).
    pub listener: ListenerConfig,

    /// Request size limits enforced by the parser.
    pub limits: LimitsConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Execution policy and server identity.
    pub server: ServerSection,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Host or IP literal to bind (e.g., "127.0.0.1", "::").
    pub host: String,

    /// Port to bind; 0 picks an ephemeral port.
    pub port: u16,

    /// Address family policy.
    pub address_family: AddressFamily,

    /// Set `SO_REUSEADDR` on the listening socket.
    pub reuse_address: bool,

    /// Pending connection queue length.
    pub backlog: u32,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Serve TLS with a self-signed certificate generated at bind time.
    pub adhoc_tls: bool,
}

impl ListenerConfig {
    /// `host:port` as written in the config, with IPv6 literals bracketed.
    pub fn bind_address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            address_family: AddressFamily::Auto,
            reuse_address: true,
            backlog: 128,
            tls: None,
            adhoc_tls: false,
        }
    }
}

/// Which socket family the listener binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressFamily {
    /// IPv6 when the host looks like an IPv6 literal, IPv4 otherwise.
    Auto,
    /// IPv4 only.
    Ipv4,
    /// IPv6 only.
    Ipv6,
    /// IPv6 wildcard socket that also accepts IPv4-mapped peers.
    Dual,
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate chain file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Parser limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Longest accepted request line or header line, in bytes.
    pub max_line_length: usize,

    /// Maximum number of header lines per request.
    pub max_headers: usize,

    /// How many unread request-body bytes the server discards after the
    /// application returns before giving up and closing instead.
    pub max_drain_bytes: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_line_length: 65_536,
            max_headers: 100,
            max_drain_bytes: 10_000_000,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Idle keep-alive connection timeout in seconds.
    pub idle_secs: u64,

    /// How often the dispatcher and idle connections re-check the stop flag,
    /// in milliseconds.
    pub poll_interval_ms: u64,

    /// How long shutdown waits for in-flight connections, in seconds.
    pub shutdown_secs: u64,
}

impl TimeoutConfig {
    pub fn idle(&self) -> Duration {
        Duration::from_secs(self.idle_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown(&self) -> Duration {
        Duration::from_secs(self.shutdown_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            idle_secs: 60,
            poll_interval_ms: 500,
            shutdown_secs: 30,
        }
    }
}

/// How accepted connections are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Each connection runs on its own blocking task.
    PerConnection,
    /// One connection at a time; the next accept waits for the current one.
    Sequential,
}

/// Server identity and execution policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSection {
    /// Execution policy for accepted connections.
    pub execution: ExecutionMode,

    /// Value of the `Server` header and `SERVER_SOFTWARE`.
    pub server_software: String,

    /// Overrides `SERVER_NAME`; defaults to the bound host.
    pub server_name: Option<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            execution: ExecutionMode::PerConnection,
            server_software: concat!("gateway-server/", env!("CARGO_PKG_VERSION")).to_string(),
            server_name: None,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Human-readable or JSON log lines.
    pub log_format: LogFormat,

    /// Record request/connection counters through the `metrics` facade.
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_development_server() {
        let config = ServerConfig::default();
        assert_eq!(config.listener.host, "127.0.0.1");
        assert_eq!(config.listener.port, 5000);
        assert_eq!(config.listener.backlog, 128);
        assert_eq!(config.limits.max_line_length, 65_536);
        assert_eq!(config.limits.max_headers, 100);
        assert_eq!(config.timeouts.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.server.execution, ExecutionMode::PerConnection);
        assert!(config.server.server_software.starts_with("gateway-server/"));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            [listener]
            port = 8000
            address_family = "dual"

            [server]
            execution = "sequential"
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.port, 8000);
        assert_eq!(config.listener.host, "127.0.0.1");
        assert_eq!(config.listener.address_family, AddressFamily::Dual);
        assert_eq!(config.server.execution, ExecutionMode::Sequential);
        assert_eq!(config.limits.max_headers, 100);
    }

    #[test]
    fn bind_address_brackets_ipv6() {
        let mut listener = ListenerConfig::default();
        assert_eq!(listener.bind_address(), "127.0.0.1:5000");
        listener.host = "::1".into();
        assert_eq!(listener.bind_address(), "[::1]:5000");
    }
}
