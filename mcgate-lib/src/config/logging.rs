use serde::Deserialize;

/// `[logging]` section
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Filter directive for the fmt subscriber, e.g. "info" or "mcgate_lib=debug,info"
    /// Default: "info"
    /// `RUST_LOG` takes precedence when set
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Include the module path of each event
    /// Default: false
    #[serde(default)]
    pub show_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), show_target: false }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
