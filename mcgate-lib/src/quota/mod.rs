//! Per-player daily traffic quota: ledger, durable store, metering stream
//! and the background duties that keep them in shape.

mod ledger;
mod meter;
mod store;
mod tasks;

pub use ledger::{local_midnight, QuotaLedger, QuotaStats, UserQuota};
pub use meter::{is_quota_exceeded, quota_exceeded, MeteredStream};
pub use store::{QuotaRecords, QuotaStore};
pub use tasks::{log_usage_report, spawn_background_tasks};

/// Bytes per MiB; limits are configured in MiB.
pub const MIB: i64 = 1024 * 1024;

/// Usage at or above this percentage refuses new logins.
pub const LOGIN_DENY_PERCENTAGE: f64 = 98.0;
