//! JSON file backing the quota ledger.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::RandomState;

use super::ledger::UserQuota;
use crate::error::{ProxyError, Result};

/// Records as stored on disk, keyed by player name.
pub type QuotaRecords = BTreeMap<String, UserQuota>;

/// Durable store with atomic replace-on-write.
///
/// Remembers a hash of the last content it wrote so file watchers can tell
/// external edits apart from its own saves.
#[derive(Debug)]
pub struct QuotaStore {
    path: PathBuf,
    hasher: RandomState,
    last_written: AtomicU64,
}

impl QuotaStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), hasher: RandomState::new(), last_written: AtomicU64::new(0) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the file with an empty table when it does not exist.
    ///
    /// Returns `true` when a file was created.
    pub fn ensure_exists(&self) -> Result<bool> {
        if self.path.exists() {
            return Ok(false);
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.error("create directory for", e))?;
        }
        fs::write(&self.path, b"{}").map_err(|e| self.error("create", e))?;
        Ok(true)
    }

    /// Read all records; a missing file is an empty table.
    pub fn read(&self) -> Result<QuotaRecords> {
        match fs::read(&self.path) {
            Ok(bytes) => self.parse(&bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(QuotaRecords::new()),
            Err(e) => Err(self.error("read", e)),
        }
    }

    /// Read all records unless the file holds exactly what was last written.
    pub fn read_if_changed(&self) -> Result<Option<QuotaRecords>> {
        let bytes = fs::read(&self.path).map_err(|e| self.error("read", e))?;
        if self.hasher.hash_one(&bytes[..]) == self.last_written.load(Ordering::Acquire) {
            return Ok(None);
        }
        self.parse(&bytes).map(Some)
    }

    /// Replace the file atomically (temp file + rename).
    pub fn write(&self, records: &QuotaRecords) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(records)
            .map_err(|e| ProxyError::Persistence(format!("Failed to encode quota data: {e}")))?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut file = fs::File::create(&tmp).map_err(|e| self.error("create", e))?;
        file.write_all(&bytes).map_err(|e| self.error("write", e))?;
        file.sync_all().map_err(|e| self.error("sync", e))?;
        drop(file);

        // Store the hash first: a watcher may fire as soon as the rename lands
        self.last_written
            .store(self.hasher.hash_one(&bytes[..]), Ordering::Release);
        fs::rename(&tmp, &self.path).map_err(|e| self.error("replace", e))?;
        Ok(())
    }

    fn parse(&self, bytes: &[u8]) -> Result<QuotaRecords> {
        let mut records: QuotaRecords = serde_json::from_slice(bytes).map_err(|e| {
            ProxyError::Persistence(format!("Failed to parse {}: {e}", self.path.display()))
        })?;
        for (name, record) in records.iter_mut() {
            if record.player_name.is_empty() {
                record.player_name = name.clone();
            }
        }
        Ok(records)
    }

    fn error(&self, action: &str, e: std::io::Error) -> ProxyError {
        ProxyError::Persistence(format!("Failed to {action} {}: {e}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, used: i64) -> UserQuota {
        UserQuota { player_name: name.into(), used_bytes: used, limit_mb: 10, last_reset: 1, last_seen: 2 }
    }

    #[test]
    fn test_missing_file_reads_empty() -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let dir = tempfile::tempdir()?;
        let store = QuotaStore::new(dir.path().join("quota.json"));
        assert!(store.read()?.is_empty());
        assert!(store.ensure_exists()?);
        assert!(!store.ensure_exists()?);
        assert_eq!(fs::read_to_string(store.path())?, "{}");
        Ok(())
    }

    #[test]
    fn test_own_write_is_not_a_change() -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let dir = tempfile::tempdir()?;
        let store = QuotaStore::new(dir.path().join("quota.json"));
        let mut records = QuotaRecords::new();
        records.insert("Steve".into(), record("Steve", 5));
        store.write(&records)?;
        assert!(store.read_if_changed()?.is_none());

        fs::write(store.path(), r#"{"Alex": {"player_name": "", "used_bytes": 7, "limit_mb": 1, "last_reset": 0, "last_seen": 0}}"#)?;
        let changed = store.read_if_changed()?.unwrap_or_default();
        assert_eq!(changed.get("Alex").map(|r| r.player_name.as_str()), Some("Alex"));
        assert_eq!(changed.get("Alex").map(|r| r.used_bytes), Some(7));
        Ok(())
    }

    #[test]
    fn test_write_leaves_no_temp_file() -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let dir = tempfile::tempdir()?;
        let store = QuotaStore::new(dir.path().join("quota.json"));
        store.write(&QuotaRecords::new())?;
        let names: Vec<_> = fs::read_dir(dir.path())?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("quota.json")]);
        Ok(())
    }

    #[test]
    fn test_corrupt_file_is_persistence_error() -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let dir = tempfile::tempdir()?;
        let store = QuotaStore::new(dir.path().join("quota.json"));
        fs::write(store.path(), "not json")?;
        assert!(matches!(store.read(), Err(ProxyError::Persistence(_))));
        Ok(())
    }
}
