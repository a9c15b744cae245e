//! Content-addressed memo store for terminal results.
//!
//! Entries live at `.rlm_cache/{cache_key}.json`, one file per key, so the memo
//! set survives process restarts. Unreadable entries are treated as misses.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::write_json_atomic;
use crate::core::types::TerminalResult;

/// One persisted memo entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub result: TerminalResult,
    pub stored_at: DateTime<Utc>,
    pub ttl_us: u64,
}

impl CacheEntry {
    /// An entry stays valid while `now - stored_at <= ttl`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        let ttl = chrono::Duration::microseconds(i64::try_from(self.ttl_us).unwrap_or(i64::MAX));
        now.signed_duration_since(self.stored_at) > ttl
    }
}

/// File-backed memo store scoped to one cache directory.
#[derive(Debug, Clone)]
pub struct MemoStore {
    dir: PathBuf,
}

impl MemoStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Return the stored result for `key` if present and not expired.
    ///
    /// Expired entries are deleted. Read or parse failures count as a miss.
    pub fn lookup(&self, key: &str) -> Option<TerminalResult> {
        let path = self.entry_path(key);
        let entry = match read_entry(&path) {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(err) => {
                warn!(cache_key = key, err = %format!("{err:#}"), "unreadable cache entry");
                return None;
            }
        };

        if entry.is_expired_at(Utc::now()) {
            debug!(cache_key = key, "cache entry expired");
            if let Err(err) = fs::remove_file(&path) {
                warn!(cache_key = key, err = %err, "failed to remove expired cache entry");
            }
            return None;
        }

        debug!(cache_key = key, "cache hit");
        Some(entry.result)
    }

    /// Persist `result` under `key`, replacing any previous entry.
    pub fn store(&self, key: &str, result: &TerminalResult, ttl: Duration) -> Result<()> {
        let entry = CacheEntry {
            result: result.clone(),
            stored_at: Utc::now(),
            ttl_us: u64::try_from(ttl.as_micros()).unwrap_or(u64::MAX),
        };
        let path = self.entry_path(key);
        debug!(cache_key = key, path = %path.display(), "storing cache entry");
        write_json_atomic(&path, &entry).with_context(|| format!("store cache entry {key}"))
    }

    /// Remove every entry.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("remove cache dir {}", self.dir.display()))
            }
        }
    }

    /// Delete expired entries and return how many were removed.
    pub fn evict_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut removed = 0usize;
        for path in self.entry_paths()? {
            let entry = match read_entry(&path) {
                Ok(Some(entry)) => entry,
                _ => continue,
            };
            if entry.is_expired_at(now) {
                fs::remove_file(&path)
                    .with_context(|| format!("remove cache entry {}", path.display()))?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "evicted expired cache entries");
        }
        Ok(removed)
    }

    /// Number of entry files currently on disk.
    pub fn entry_count(&self) -> Result<usize> {
        Ok(self.entry_paths()?.len())
    }

    fn entry_paths(&self) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("read cache dir {}", self.dir.display()));
            }
        };

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.context("read cache dir entry")?;
            let path = entry.path();
            if entry.file_type()?.is_file() && path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }
}

fn read_entry(path: &Path) -> Result<Option<CacheEntry>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
    };
    let entry = serde_json::from_str(&contents)
        .with_context(|| format!("parse cache entry {}", path.display()))?;
    Ok(Some(entry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Metadata;
    use std::thread;

    fn result(content: &str) -> TerminalResult {
        TerminalResult {
            content: content.to_string(),
            metadata: Metadata::new(),
            token_count: 42,
            cost_usd: 0.01,
        }
    }

    fn store_in(temp: &tempfile::TempDir) -> MemoStore {
        MemoStore::new(temp.path().join(".rlm_cache"))
    }

    #[test]
    fn lookup_missing_key_is_a_miss() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(store_in(&temp).lookup("deadbeef").is_none());
    }

    #[test]
    fn store_then_lookup_within_ttl_hits() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(&temp);
        store
            .store("abc", &result("cached"), Duration::from_secs(3600))
            .expect("store");

        assert_eq!(store.lookup("abc"), Some(result("cached")));
    }

    #[test]
    fn store_overwrites_previous_entry() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(&temp);
        let ttl = Duration::from_secs(60);
        store.store("abc", &result("first"), ttl).expect("store");
        store.store("abc", &result("second"), ttl).expect("store");

        assert_eq!(store.lookup("abc").map(|r| r.content).as_deref(), Some("second"));
        assert_eq!(store.entry_count().expect("count"), 1);
    }

    /// Verifies a 1ms entry read back after 10ms is a miss and gets purged.
    #[test]
    fn expired_entry_is_a_miss_and_removed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(&temp);
        store
            .store("short", &result("stale"), Duration::from_millis(1))
            .expect("store");
        thread::sleep(Duration::from_millis(10));

        assert!(store.lookup("short").is_none());
        assert!(!store.entry_path("short").exists());
    }

    #[test]
    fn corrupt_entry_is_a_miss() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(&temp);
        fs::create_dir_all(store.dir()).expect("mkdir");
        fs::write(store.entry_path("broken"), "{ not json").expect("write");

        assert!(store.lookup("broken").is_none());
    }

    #[test]
    fn evict_expired_removes_only_stale_entries() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(&temp);
        store
            .store("stale", &result("old"), Duration::from_millis(1))
            .expect("store");
        store
            .store("fresh", &result("new"), Duration::from_secs(3600))
            .expect("store");
        fs::write(store.dir().join("notes.txt"), "ignored").expect("write");
        thread::sleep(Duration::from_millis(10));

        assert_eq!(store.evict_expired().expect("evict"), 1);
        assert!(!store.entry_path("stale").exists());
        assert!(store.entry_path("fresh").exists());
        assert_eq!(store.entry_count().expect("count"), 1);
    }

    #[test]
    fn clear_removes_everything_and_tolerates_missing_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(&temp);
        store.clear().expect("clear empty");
        store
            .store("abc", &result("x"), Duration::from_secs(60))
            .expect("store");

        store.clear().expect("clear");
        assert_eq!(store.entry_count().expect("count"), 0);
        assert!(store.lookup("abc").is_none());
    }

    #[test]
    fn entry_expiry_is_inclusive_of_ttl() {
        let stored_at = Utc::now();
        let entry = CacheEntry {
            result: result("x"),
            stored_at,
            ttl_us: 1_000_000,
        };
        assert!(!entry.is_expired_at(stored_at + chrono::Duration::milliseconds(1_000)));
        assert!(entry.is_expired_at(stored_at + chrono::Duration::milliseconds(1_001)));
    }

    #[test]
    fn sub_millisecond_overshoot_counts_as_expired() {
        let stored_at = Utc::now();
        let entry = CacheEntry {
            result: result("x"),
            stored_at,
            ttl_us: 1_000,
        };
        assert!(!entry.is_expired_at(stored_at + chrono::Duration::microseconds(1_000)));
        assert!(entry.is_expired_at(stored_at + chrono::Duration::microseconds(1_900)));
        assert!(entry.is_expired_at(stored_at + chrono::Duration::nanoseconds(1_000_001)));
    }

    #[test]
    fn store_keeps_sub_millisecond_ttl() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(&temp);
        store
            .store("tiny", &result("x"), Duration::from_micros(1_500))
            .expect("store");

        let entry = read_entry(&store.entry_path("tiny"))
            .expect("read")
            .expect("entry present");
        assert_eq!(entry.ttl_us, 1_500);
    }
}
