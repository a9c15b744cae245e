//! Durable snapshot of the in-flight computation (`.rlm_state.json`).
//!
//! The snapshot is the only record of "where was I": it is rewritten after every
//! loop iteration and removed once the top-level computation completes.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::write_json_atomic;
use crate::core::types::{Frame, RunStats, TerminalResult};

/// Format version written into every snapshot.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Everything needed to resume a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub version: u32,
    /// Pending parent frames, bottom (root) first.
    pub stack: Vec<Frame>,
    pub current_frame: Frame,
    pub cross_frame_results: BTreeMap<String, TerminalResult>,
    pub stats: RunStats,
    pub saved_at: DateTime<Utc>,
}

/// Reads and writes the snapshot file for one working directory.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Overwrite the snapshot with the given controller state.
    pub fn save(
        &self,
        stack: &[Frame],
        current_frame: &Frame,
        cross_frame_results: &BTreeMap<String, TerminalResult>,
        stats: &RunStats,
    ) -> Result<()> {
        debug!(
            path = %self.path.display(),
            stack_size = stack.len(),
            depth = current_frame.depth,
            "writing snapshot"
        );
        let state = PersistedState {
            version: SNAPSHOT_VERSION,
            stack: stack.to_vec(),
            current_frame: current_frame.clone(),
            cross_frame_results: cross_frame_results.clone(),
            stats: stats.clone(),
            saved_at: Utc::now(),
        };
        write_json_atomic(&self.path, &state)
    }

    /// Load the snapshot.
    ///
    /// A missing file is `Ok(None)`. Malformed content or an unsupported version
    /// is an error; callers fall back to a fresh start.
    pub fn load(&self) -> Result<Option<PersistedState>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("read snapshot {}", self.path.display()));
            }
        };
        let state: PersistedState = serde_json::from_str(&contents)
            .with_context(|| format!("parse snapshot {}", self.path.display()))?;
        if state.version != SNAPSHOT_VERSION {
            bail!(
                "unsupported snapshot version {} in {} (expected {})",
                state.version,
                self.path.display(),
                SNAPSHOT_VERSION
            );
        }
        debug!(
            stack_size = state.stack.len(),
            results = state.cross_frame_results.len(),
            "snapshot loaded"
        );
        Ok(Some(state))
    }

    /// Remove the snapshot. Missing is fine.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("remove snapshot {}", self.path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ContinuationRequest, FrameContext, Metadata};

    fn result(content: &str) -> TerminalResult {
        TerminalResult {
            content: content.to_string(),
            metadata: Metadata::new(),
            token_count: 7,
            cost_usd: 0.25,
        }
    }

    fn store_in(temp: &tempfile::TempDir) -> SnapshotStore {
        SnapshotStore::new(temp.path().join(".rlm_state.json"))
    }

    #[test]
    fn load_missing_is_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(store_in(&temp).load().expect("load").is_none());
    }

    /// Verifies save → load reproduces stack, frame, results and stats.
    #[test]
    fn snapshot_round_trips_non_empty_stack() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(&temp);

        let mut root = Frame::root("doc.md", "what is this?");
        root.child_results.insert("intro".to_string(), result("intro summary"));
        let middle = root.child(ContinuationRequest {
            agent_role: "Worker".to_string(),
            description: "body".to_string(),
            context: FrameContext::from([("section".to_string(), serde_json::json!(2))]),
            return_label: "body".to_string(),
            metadata: Metadata::new(),
        });
        let current = middle.child(ContinuationRequest {
            agent_role: "Worker".to_string(),
            description: "paragraph".to_string(),
            context: FrameContext::new(),
            return_label: "p1".to_string(),
            metadata: Metadata::new(),
        });
        let stack = vec![root, middle];
        let results = BTreeMap::from([("intro".to_string(), result("intro summary"))]);
        let mut stats = RunStats::fresh();
        stats.subagent_calls = 3;
        stats.total_tokens = 21;
        stats.total_cost_usd = 0.75;
        stats.max_depth_reached = 2;
        stats.cache_hits = 1;

        store.save(&stack, &current, &results, &stats).expect("save");
        let loaded = store.load().expect("load").expect("present");

        assert_eq!(loaded.version, SNAPSHOT_VERSION);
        assert_eq!(loaded.stack, stack);
        assert_eq!(loaded.current_frame, current);
        assert_eq!(loaded.cross_frame_results, results);
        assert_eq!(loaded.stats, stats);
    }

    #[test]
    fn corrupt_snapshot_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(&temp);
        fs::write(store.path(), "{ truncated").expect("write");

        let err = store.load().unwrap_err();
        assert!(format!("{err:#}").contains("parse snapshot"));
    }

    #[test]
    fn unsupported_version_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(&temp);
        let frame = Frame::root("doc", "q");
        store
            .save(&[], &frame, &BTreeMap::new(), &RunStats::fresh())
            .expect("save");
        let raw = fs::read_to_string(store.path()).expect("read");
        fs::write(store.path(), raw.replace("\"version\": 1", "\"version\": 99"))
            .expect("write");

        let err = store.load().unwrap_err();
        assert!(err.to_string().contains("unsupported snapshot version 99"));
    }

    #[test]
    fn clear_removes_snapshot_and_tolerates_absence() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(&temp);
        store
            .save(&[], &Frame::root("doc", "q"), &BTreeMap::new(), &RunStats::fresh())
            .expect("save");
        assert!(store.exists());

        store.clear().expect("clear");
        assert!(!store.exists());
        store.clear().expect("clear again");
    }
}
