use serde::Deserialize;

use super::lists::NamedLists;
use super::service::ServiceConfig;
use super::logging::LoggingConfig;
use super::timeout::TimeoutConfig;
use super::traffic::TrafficLimiterConfig;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Branding and contact strings shown in kick messages
    #[serde(default)]
    pub settings: Settings,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Timeout configuration
    #[serde(default)]
    pub timeout: TimeoutConfig,
    /// Global per-player traffic limiter
    #[serde(default)]
    pub traffic_limiter: TrafficLimiterConfig,
    /// Named identity lists (IPs/CIDRs, player names, host names) referenced
    /// by tag from access policies
    #[serde(default)]
    pub lists: NamedLists,
    /// Proxied services
    /// At least one service is required
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

/// Branding and contact strings
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Title shown at the top of kick messages and as the fake status version
    /// Default: "mcgate"
    #[serde(default = "default_header")]
    pub header: String,
    /// Contact label shown in kick messages
    /// Default: empty (contact line omitted)
    #[serde(default)]
    pub contact_name: String,
    /// Contact link shown (underlined, clickable) in kick messages
    #[serde(default)]
    pub contact_link: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self { header: default_header(), contact_name: String::new(), contact_link: String::new() }
    }
}

fn default_header() -> String {
    "mcgate".to_string()
}
