use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ahash::AHashMap;
use chrono::{DateTime, Local, TimeZone, Timelike};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::store::{QuotaRecords, QuotaStore};
use super::MIB;
use crate::error::{ProxyError, Result};

const SECS_PER_DAY: i64 = 24 * 60 * 60;

/// Daily traffic record of one player.
///
/// Field names are the on-disk format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserQuota {
    pub player_name: String,
    pub used_bytes: i64,
    /// 0 means "not set yet", replaced by the default on the next check
    pub limit_mb: i64,
    /// Unix seconds of the last daily reset
    pub last_reset: i64,
    /// Unix seconds of the last check or accounted transfer
    pub last_seen: i64,
}

impl UserQuota {
    fn new(player_name: &str, limit_mb: i64, now: i64) -> Self {
        Self { player_name: player_name.to_string(), used_bytes: 0, limit_mb, last_reset: now, last_seen: now }
    }

    /// Clear usage if the last reset happened before `midnight`.
    fn roll_over(&mut self, midnight: i64) -> bool {
        if self.last_reset < midnight {
            self.used_bytes = 0;
            self.last_reset = midnight;
            true
        } else {
            false
        }
    }

    /// Apply an externally edited copy of this record.
    fn merge_from_file(&mut self, file: UserQuota) {
        self.limit_mb = file.limit_mb;
        if file.last_reset > self.last_reset {
            self.used_bytes = file.used_bytes;
            self.last_reset = file.last_reset;
        } else {
            self.used_bytes = self.used_bytes.max(file.used_bytes);
        }
        self.last_seen = self.last_seen.max(file.last_seen);
    }

    pub fn stats(&self) -> QuotaStats {
        let used_mb = self.used_bytes as f64 / MIB as f64;
        let limit_mb = self.limit_mb as f64;
        let percentage = if self.limit_mb > 0 { used_mb / limit_mb * 100.0 } else { 0.0 };
        QuotaStats { used_mb, limit_mb, percentage }
    }
}

/// Usage summary in MiB.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QuotaStats {
    pub used_mb: f64,
    pub limit_mb: f64,
    pub percentage: f64,
}

/// Per-player daily traffic accounting.
///
/// All access goes through one reader/writer lock; persistence happens
/// outside of it on a blocking thread.
#[derive(Debug)]
pub struct QuotaLedger {
    users: RwLock<AHashMap<String, UserQuota>>,
    store: Arc<QuotaStore>,
    retention_days: i64,
}

impl QuotaLedger {
    /// Empty ledger backed by `store`; nothing is read.
    pub fn new(store: QuotaStore, retention_days: i64) -> Self {
        Self { users: RwLock::new(AHashMap::new()), store: Arc::new(store), retention_days }
    }

    /// Open a ledger from its file, dropping records not seen within the retention window.
    pub async fn load(store: QuotaStore, retention_days: i64) -> Result<Self> {
        let ledger = Self::new(store, retention_days);
        let store = ledger.store.clone();
        let records = tokio::task::spawn_blocking(move || store.read())
            .await
            .map_err(|e| ProxyError::Persistence(format!("Load task failed: {e}")))??;

        let cutoff = ledger.retention_cutoff(Local::now());
        let total = records.len();
        {
            let mut users = ledger.write();
            for (name, record) in records {
                if record.last_seen > cutoff {
                    users.insert(name, record);
                }
            }
            info!(
                players = users.len(),
                expired = total - users.len(),
                path = %ledger.store.path().display(),
                "loaded traffic data"
            );
        }
        Ok(ledger)
    }

    pub fn store(&self) -> &QuotaStore {
        &self.store
    }

    /// Whether `identity` may transfer `bytes` more today.
    ///
    /// Creates the record on first sight, refreshes `last_seen`, applies the
    /// daily reset and backfills an unset limit from `default_limit_mb`.
    pub fn can_consume(&self, identity: &str, bytes: i64, default_limit_mb: i64) -> bool {
        let now = Local::now();
        let ts = now.timestamp();
        let midnight = local_midnight(now);

        let mut users = self.write();
        let record = users.entry(identity.to_string()).or_insert_with(|| {
            info!(player = identity, limit_mb = default_limit_mb, "created traffic record");
            UserQuota::new(identity, default_limit_mb, ts)
        });
        record.last_seen = ts;
        if record.roll_over(midnight) {
            info!(player = identity, "daily traffic reset");
        }
        if record.limit_mb == 0 && default_limit_mb > 0 {
            record.limit_mb = default_limit_mb;
            info!(player = identity, limit_mb = default_limit_mb, "backfilled traffic limit");
        }
        record.used_bytes.saturating_add(bytes) <= record.limit_mb.saturating_mul(MIB)
    }

    /// Add transferred bytes; unknown identities are ignored.
    pub fn consume(&self, identity: &str, bytes: i64) {
        let mut users = self.write();
        if let Some(record) = users.get_mut(identity) {
            record.used_bytes = record.used_bytes.saturating_add(bytes);
            record.last_seen = Local::now().timestamp();
        }
    }

    /// Usage of `identity`; all zeros when unknown (no record is created).
    pub fn stats(&self, identity: &str) -> QuotaStats {
        self.read()
            .get(identity)
            .map(UserQuota::stats)
            .unwrap_or_default()
    }

    pub fn get(&self, identity: &str) -> Option<UserQuota> {
        self.read().get(identity).cloned()
    }

    /// Set the daily limit, creating the record when absent.
    ///
    /// `false` when the record already had this limit.
    pub fn set_limit(&self, identity: &str, limit_mb: i64) -> bool {
        let ts = Local::now().timestamp();
        let mut users = self.write();
        match users.get_mut(identity) {
            Some(record) => {
                record.last_seen = ts;
                if record.limit_mb == limit_mb {
                    return false;
                }
                record.limit_mb = limit_mb;
            }
            None => {
                users.insert(identity.to_string(), UserQuota::new(identity, limit_mb, ts));
            }
        }
        true
    }

    /// Clear today's usage; `false` for unknown identities.
    pub fn reset(&self, identity: &str) -> bool {
        let mut users = self.write();
        match users.get_mut(identity) {
            Some(record) => {
                record.used_bytes = 0;
                record.last_reset = Local::now().timestamp();
                true
            }
            None => false,
        }
    }

    /// Drop records last seen before `cutoff` (unix seconds).
    pub fn purge(&self, cutoff: i64) -> bool {
        let mut users = self.write();
        let before = users.len();
        users.retain(|_, r| r.last_seen >= cutoff);
        let removed = before - users.len();
        if removed > 0 {
            info!(removed, "purged expired traffic records");
        }
        removed > 0
    }

    pub fn purge_expired(&self) -> bool {
        self.purge(self.retention_cutoff(Local::now()))
    }

    /// Reset every record whose last reset predates today's local midnight.
    pub fn check_and_reset_daily(&self) -> usize {
        let midnight = local_midnight(Local::now());
        let mut users = self.write();
        let count = users
            .values_mut()
            .map(|r| r.roll_over(midnight))
            .filter(|reset| *reset)
            .count();
        if count > 0 {
            info!(players = count, "daily traffic reset");
        }
        count
    }

    /// Copies of all records, sorted by player name.
    pub fn snapshot(&self) -> Vec<UserQuota> {
        let mut records: Vec<UserQuota> = self.read().values().cloned().collect();
        records.sort_by(|a, b| a.player_name.cmp(&b.player_name));
        records
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Insert or replace a record as-is.
    pub fn insert_record(&self, record: UserQuota) {
        self.write().insert(record.player_name.clone(), record);
    }

    /// Persist all records.
    pub async fn save(&self) -> Result<()> {
        let records: QuotaRecords = self
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.write(&records))
            .await
            .map_err(|e| ProxyError::Persistence(format!("Save task failed: {e}")))?
    }

    /// Merge the file's records into memory after an external edit.
    ///
    /// Limits come from the file. Usage recorded since the last save is kept
    /// unless the file carries a newer reset. Returns `false` when the file
    /// holds what this ledger last wrote.
    pub async fn reload_data(&self) -> Result<bool> {
        let store = self.store.clone();
        let records = tokio::task::spawn_blocking(move || store.read_if_changed())
            .await
            .map_err(|e| ProxyError::Persistence(format!("Reload task failed: {e}")))??;
        let Some(records) = records else {
            return Ok(false);
        };

        let cutoff = self.retention_cutoff(Local::now());
        let mut users = self.write();
        let mut merged = 0usize;
        for (name, record) in records {
            if record.last_seen <= cutoff {
                continue;
            }
            match users.get_mut(&name) {
                Some(current) => current.merge_from_file(record),
                None => {
                    users.insert(name, record);
                }
            }
            merged += 1;
        }
        info!(merged, players = users.len(), "reloaded traffic data");
        Ok(true)
    }

    /// Final save on shutdown.
    pub async fn close(&self) -> Result<()> {
        self.save().await?;
        info!(players = self.len(), "traffic data saved");
        Ok(())
    }

    fn retention_cutoff(&self, now: DateTime<Local>) -> i64 {
        now.timestamp() - self.retention_days.saturating_mul(SECS_PER_DAY)
    }

    fn read(&self) -> RwLockReadGuard<'_, AHashMap<String, UserQuota>> {
        self.users.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, AHashMap<String, UserQuota>> {
        self.users.write().unwrap_or_else(|e| {
            warn!("traffic ledger lock was poisoned");
            e.into_inner()
        })
    }
}

/// Unix seconds of the most recent local midnight.
pub fn local_midnight(now: DateTime<Local>) -> i64 {
    let naive = now.date_naive().and_hms_opt(0, 0, 0);
    naive
        .and_then(|n| Local.from_local_datetime(&n).earliest())
        .map(|dt| dt.timestamp())
        // Midnight skipped by a DST change: fall back to the day's first second we have
        .unwrap_or_else(|| now.timestamp() - i64::from(now.time().num_seconds_from_midnight()))
}
