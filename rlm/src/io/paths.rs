//! Canonical file locations inside a working directory.

use std::path::PathBuf;

/// Snapshot of the in-flight computation.
pub const SNAPSHOT_FILE_NAME: &str = ".rlm_state.json";
/// Directory holding one memo entry per cache key.
pub const CACHE_DIR_NAME: &str = ".rlm_cache";
/// Default configuration file.
pub const CONFIG_FILE_NAME: &str = "rlm.toml";

/// All paths the controller reads or writes for one working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkDirPaths {
    pub root: PathBuf,
    pub snapshot_path: PathBuf,
    pub cache_dir: PathBuf,
    pub config_path: PathBuf,
}

impl WorkDirPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            snapshot_path: root.join(SNAPSHOT_FILE_NAME),
            cache_dir: root.join(CACHE_DIR_NAME),
            config_path: root.join(CONFIG_FILE_NAME),
            root,
        }
    }
}
