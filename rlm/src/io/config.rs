//! Configuration stored in `rlm.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use super::write_atomic;

/// Top-level configuration file (TOML).
///
/// Intended to be edited by humans. Missing fields fall back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct RlmConfig {
    pub controller: ControllerSection,
    pub dispatcher: DispatcherSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ControllerSection {
    /// Deepest frame the controller will dispatch (root is depth 0).
    pub max_depth: u32,
    /// Loop iterations allowed per `run` invocation.
    pub max_iterations: u32,
    pub cache_enabled: bool,
    /// Lifetime of a memo entry, in seconds.
    pub cache_ttl_secs: u64,
}

impl Default for ControllerSection {
    fn default() -> Self {
        Self {
            max_depth: 10,
            max_iterations: 1000,
            cache_enabled: true,
            cache_ttl_secs: 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DispatcherSection {
    /// Worker command (e.g. `["python3","worker.py"]`). Empty selects the placeholder worker.
    pub command: Vec<String>,
    /// Wall-clock budget for one worker call.
    pub timeout_secs: u64,
    /// Captured worker stdout/stderr beyond this many bytes is discarded.
    pub output_limit_bytes: usize,
}

impl Default for DispatcherSection {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 10 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingSection {
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Compact,
        }
    }
}

impl RlmConfig {
    pub fn validate(&self) -> Result<()> {
        if self.controller.max_iterations == 0 {
            return Err(anyhow!("controller.max_iterations must be >= 1"));
        }
        if self.controller.cache_enabled && self.controller.cache_ttl_secs == 0 {
            return Err(anyhow!(
                "controller.cache_ttl_secs must be > 0 when the cache is enabled"
            ));
        }
        if self.dispatcher.timeout_secs == 0 {
            return Err(anyhow!("dispatcher.timeout_secs must be > 0"));
        }
        if self.dispatcher.output_limit_bytes == 0 {
            return Err(anyhow!("dispatcher.output_limit_bytes must be > 0"));
        }
        if let Some(program) = self.dispatcher.command.first()
            && program.trim().is_empty()
        {
            return Err(anyhow!("dispatcher.command program must not be blank"));
        }
        if self.logging.level.trim().is_empty() {
            return Err(anyhow!("logging.level must not be empty"));
        }
        Ok(())
    }

    /// Runtime controller settings for `work_dir`.
    pub fn controller_config(&self, work_dir: impl Into<PathBuf>) -> ControllerConfig {
        ControllerConfig {
            max_depth: self.controller.max_depth,
            max_iterations: self.controller.max_iterations,
            cache_enabled: self.controller.cache_enabled,
            cache_ttl: Duration::from_secs(self.controller.cache_ttl_secs),
            work_dir: work_dir.into(),
        }
    }
}

/// Settings consumed by [`Controller`](crate::controller::Controller).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    pub max_depth: u32,
    pub max_iterations: u32,
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
    /// Directory that scopes the snapshot and memo store.
    pub work_dir: PathBuf,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        RlmConfig::default().controller_config(".")
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RlmConfig::default()`.
pub fn load_config(path: &Path) -> Result<RlmConfig> {
    if !path.exists() {
        let cfg = RlmConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RlmConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RlmConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, RlmConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("rlm.toml");
        let mut cfg = RlmConfig::default();
        cfg.dispatcher.command = vec!["python3".to_string(), "worker.py".to_string()];
        cfg.logging.format = LogFormat::Json;
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("rlm.toml");
        fs::write(&path, "[controller]\nmax_depth = 3\n").expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.controller.max_depth, 3);
        assert_eq!(cfg.controller.max_iterations, 1000);
        assert!(cfg.dispatcher.command.is_empty());
    }

    #[test]
    fn validate_rejects_zero_iterations() {
        let mut cfg = RlmConfig::default();
        cfg.controller.max_iterations = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_allows_zero_ttl_only_when_cache_disabled() {
        let mut cfg = RlmConfig::default();
        cfg.controller.cache_ttl_secs = 0;
        assert!(cfg.validate().is_err());
        cfg.controller.cache_enabled = false;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_blank_worker_program() {
        let mut cfg = RlmConfig::default();
        cfg.dispatcher.command = vec!["  ".to_string()];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unknown_log_format_fails_to_parse() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("rlm.toml");
        fs::write(&path, "[logging]\nformat = \"pretty\"\n").expect("write");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn controller_config_converts_ttl() {
        let cfg = RlmConfig::default().controller_config("/work");
        assert_eq!(cfg.cache_ttl, Duration::from_secs(86_400));
        assert_eq!(cfg.work_dir, PathBuf::from("/work"));
        assert_eq!(cfg.max_depth, 10);
    }
}
