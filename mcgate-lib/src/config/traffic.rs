use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Global per-player traffic limiter
///
/// This is the only source of quota configuration; services do not carry
/// their own limits.
#[derive(Debug, Deserialize, Clone)]
pub struct TrafficLimiterConfig {
    /// Enable per-player daily traffic accounting and enforcement
    /// Default: false
    #[serde(default)]
    pub enabled: bool,
    /// Daily allowance for players without an explicit limit, in MiB
    /// Default: 1024
    #[serde(default = "default_limit_mb")]
    pub limit_mb: i64,
    /// Kick message used when a player is over quota
    /// Placeholders: {player}, {used}, {limit}, {percentage}
    /// Default: None (built-in styled message)
    #[serde(default)]
    pub kick_message: Option<String>,
    /// JSON file holding the per-player ledger
    /// Default: "traffic_table.json"
    #[serde(default = "default_data_file")]
    pub data_file: PathBuf,
    /// Interval between ledger saves in seconds
    /// Default: 300
    #[serde(default = "default_save_interval")]
    pub save_interval_secs: u64,
    /// Interval between daily-rollover sweeps in seconds
    /// Default: 3600
    #[serde(default = "default_reset_check_interval")]
    pub reset_check_interval_secs: u64,
    /// Interval between usage reports in the log, in seconds (0 disables them)
    /// Default: 300
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
    /// Records not seen for this many days are dropped
    /// Default: 7
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

impl TrafficLimiterConfig {
    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.save_interval_secs)
    }

    pub fn reset_check_interval(&self) -> Duration {
        Duration::from_secs(self.reset_check_interval_secs)
    }

    pub fn report_interval(&self) -> Option<Duration> {
        (self.report_interval_secs > 0).then(|| Duration::from_secs(self.report_interval_secs))
    }
}

impl Default for TrafficLimiterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            limit_mb: default_limit_mb(),
            kick_message: None,
            data_file: default_data_file(),
            save_interval_secs: default_save_interval(),
            reset_check_interval_secs: default_reset_check_interval(),
            report_interval_secs: default_report_interval(),
            retention_days: default_retention_days(),
        }
    }
}

fn default_limit_mb() -> i64 {
    1024
}

fn default_data_file() -> PathBuf {
    PathBuf::from("traffic_table.json")
}

fn default_save_interval() -> u64 {
    300
}

fn default_reset_check_interval() -> u64 {
    3600
}

fn default_report_interval() -> u64 {
    300
}

fn default_retention_days() -> i64 {
    7
}
