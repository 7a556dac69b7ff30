use serde::Deserialize;
use std::time::Duration;

/// Timeout configuration
///
/// There is no idle timeout: once a session is relayed it lives
/// until one of the peers closes it.
#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutConfig {
    /// Maximum time to wait for the client's first packets (TLS ClientHello
    /// or game handshake + login start) in milliseconds
    /// Default: 5000 (5 seconds)
    #[serde(default = "default_sniff_timeout")]
    pub sniff_ms: u64,
    /// Upstream connect timeout in milliseconds
    /// Default: 5000 (5 seconds)
    #[serde(default = "default_connect_timeout")]
    pub connect_ms: u64,
    /// Graceful shutdown timeout in seconds
    /// How long shutdown waits for in-flight sessions before flushing and exiting
    /// Default: 10
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_secs: u64,
}

impl TimeoutConfig {
    pub fn sniff(&self) -> Duration {
        Duration::from_millis(self.sniff_ms)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn shutdown(&self) -> Duration {
        Duration::from_secs(self.shutdown_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            sniff_ms: default_sniff_timeout(),
            connect_ms: default_connect_timeout(),
            shutdown_secs: default_shutdown_timeout(),
        }
    }
}

fn default_sniff_timeout() -> u64 {
    5000
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_shutdown_timeout() -> u64 {
    10
}
