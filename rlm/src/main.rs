//! Trampoline-based recursive document analysis.
//!
//! `rlm analyze` drives a worker through an explicit continuation stack kept in
//! `.rlm_state.json`; an interrupted analysis resumes from that snapshot on the
//! next invocation in the same working directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;

use rlm::controller::Controller;
use rlm::core::types::RunStats;
use rlm::dispatch::{CommandDispatcher, PlaceholderDispatcher};
use rlm::error::TrampolineError;
use rlm::exit_codes;
use rlm::io::config::{RlmConfig, load_config, write_config};
use rlm::io::memo_store::MemoStore;
use rlm::io::paths::WorkDirPaths;
use rlm::io::snapshot::SnapshotStore;
use rlm::logging;

#[derive(Parser)]
#[command(
    name = "rlm",
    version,
    about = "Trampoline-based recursive document analysis"
)]
struct Cli {
    /// Directory that scopes the snapshot and memo store.
    #[arg(long, global = true, default_value = ".")]
    work_dir: PathBuf,
    /// Config file (defaults to `<work-dir>/rlm.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyze a file or directory, resuming an interrupted run if one exists.
    Analyze { path: String, query: String },
    /// Show configuration, resumable snapshot and cache status.
    Status,
    /// Discard the snapshot of an interrupted run.
    Reset,
    /// Manage the memo cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Write the default config file if missing.
    Init {
        /// Overwrite an existing config file.
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Remove every cached result.
    Clear,
    /// Remove expired cached results.
    Prune,
}

fn main() {
    let code = match run() {
        Ok(()) => exit_codes::OK,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<TrampolineError>() {
        Some(trampoline) if trampoline.is_limit() => exit_codes::LIMIT_EXCEEDED,
        Some(_) => exit_codes::DISPATCH_FAILED,
        None => exit_codes::INVALID,
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let paths = WorkDirPaths::new(&cli.work_dir);
    let config_path = cli.config.clone().unwrap_or_else(|| paths.config_path.clone());

    if let Command::Init { force } = cli.command {
        return cmd_init(&config_path, force);
    }

    let cfg = load_config(&config_path)?;
    logging::init(&cfg.logging);
    debug!(config = %config_path.display(), work_dir = %paths.root.display(), "config loaded");

    match cli.command {
        Command::Analyze { path, query } => cmd_analyze(&cfg, &paths, &path, &query),
        Command::Status => cmd_status(&cfg, &config_path, &paths),
        Command::Reset => cmd_reset(&paths),
        Command::Cache { action } => cmd_cache(&paths, action),
        Command::Init { .. } => Ok(()),
    }
}

fn cmd_init(config_path: &Path, force: bool) -> Result<()> {
    if !force && config_path.exists() {
        println!("init: config={} exists", config_path.display());
        return Ok(());
    }
    write_config(config_path, &RlmConfig::default())
        .with_context(|| format!("write {}", config_path.display()))?;
    println!("init: config={} written", config_path.display());
    Ok(())
}

fn cmd_analyze(cfg: &RlmConfig, paths: &WorkDirPaths, path: &str, query: &str) -> Result<()> {
    let mut controller = Controller::new(cfg.controller_config(&paths.root));
    if cfg.dispatcher.command.is_empty() {
        controller.set_dispatcher(PlaceholderDispatcher);
    } else {
        controller.set_dispatcher(CommandDispatcher::from_config(&cfg.dispatcher, &paths.root)?);
    }

    let result = controller.run(path, query)?;

    println!("Analysis Result:");
    println!("================");
    println!("{}", result.content);
    println!();
    println!("Token Count: {}", result.token_count);
    println!("Cost: ${:.4}", result.cost_usd);
    println!();
    print_stats(controller.stats());
    Ok(())
}

fn cmd_status(cfg: &RlmConfig, config_path: &Path, paths: &WorkDirPaths) -> Result<()> {
    let controller = &cfg.controller;
    println!(
        "status: config={} max_depth={} max_iterations={} cache_enabled={} cache_ttl_secs={}",
        config_path.display(),
        controller.max_depth,
        controller.max_iterations,
        controller.cache_enabled,
        controller.cache_ttl_secs
    );
    if cfg.dispatcher.command.is_empty() {
        println!("status: worker=placeholder");
    } else {
        println!(
            "status: worker={} timeout_secs={}",
            cfg.dispatcher.command.join(" "),
            cfg.dispatcher.timeout_secs
        );
    }

    let snapshot = SnapshotStore::new(&paths.snapshot_path);
    match snapshot.load() {
        Ok(None) => println!("status: snapshot=none"),
        Ok(Some(state)) => {
            println!(
                "status: snapshot=present stack_size={} depth={} agent_role={} results={} saved_at={}",
                state.stack.len(),
                state.current_frame.depth,
                state.current_frame.agent_role,
                state.cross_frame_results.len(),
                state.saved_at.to_rfc3339()
            );
            print_stats(&state.stats);
        }
        Err(err) => println!("status: snapshot=unreadable error={:#}", err),
    }

    let memo = MemoStore::new(&paths.cache_dir);
    println!(
        "status: cache_entries={} cache_dir={}",
        memo.entry_count()?,
        memo.dir().display()
    );
    Ok(())
}

fn cmd_reset(paths: &WorkDirPaths) -> Result<()> {
    let snapshot = SnapshotStore::new(&paths.snapshot_path);
    let existed = snapshot.exists();
    snapshot.clear()?;
    println!(
        "reset: snapshot={} removed={}",
        snapshot.path().display(),
        existed
    );
    Ok(())
}

fn cmd_cache(paths: &WorkDirPaths, action: CacheAction) -> Result<()> {
    let memo = MemoStore::new(&paths.cache_dir);
    match action {
        CacheAction::Clear => {
            let removed = memo.entry_count()?;
            memo.clear()?;
            println!("cache: cleared={} dir={}", removed, memo.dir().display());
        }
        CacheAction::Prune => {
            let removed = memo.evict_expired()?;
            println!("cache: pruned={} dir={}", removed, memo.dir().display());
        }
    }
    Ok(())
}

fn print_stats(stats: &RunStats) {
    println!("Statistics:");
    println!("  Subagent Calls: {}", stats.subagent_calls);
    println!("  Total Tokens: {}", stats.total_tokens);
    println!("  Total Cost: ${:.4}", stats.total_cost_usd);
    println!("  Max Depth: {}", stats.max_depth_reached);
    println!("  Cache Hits: {}", stats.cache_hits);
    println!("  Started: {}", stats.started_at.to_rfc3339());
}
