//! `dupscan` command-line interface: scan/resume/sessions/export/
//! sweep-cache subcommands over the library core.

#![cfg(feature = "cli")]

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;

use crate::core::config::Config;
use crate::core::errors::Result;
use crate::export;
use crate::orchestrator::{self, CancelToken, Completion, NullCallbacks};
use crate::store::fingerprint::FingerprintStore;
use crate::store::session::SessionStore;

/// Global CLI entry point.
#[derive(Debug, Parser)]
#[command(name = "dupscan", about = "Resumable duplicate-file scan core")]
pub struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit machine-readable JSON instead of human-readable text.
    #[arg(long, global = true, conflicts_with = "quiet")]
    pub json: bool,

    /// Disable colored output.
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Increase log verbosity (repeatable).
    #[arg(short, long, global = true, action = clap::ArgAction::Count, conflicts_with = "quiet")]
    pub verbose: u8,

    /// Suppress non-error output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a fresh scan.
    Scan,
    /// Resume the most recent paused session matching the active config.
    Resume,
    /// List known sessions.
    Sessions,
    /// Export a session's results as v2 JSON.
    Export {
        /// Session id to export.
        session_id: String,
    },
    /// Purge stale fingerprint-cache rows.
    SweepCache {
        /// Age threshold in days.
        #[arg(long, default_value_t = 90)]
        age_days: u64,
    },
    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Drive the parsed CLI invocation.
pub fn run(cli: &Cli) -> Result<()> {
    if cli.no_color {
        colored::control::set_override(false);
    }

    match &cli.command {
        Command::Scan | Command::Resume => run_scan(cli),
        Command::Sessions => run_sessions(cli),
        Command::Export { session_id } => run_export(cli, session_id),
        Command::SweepCache { age_days } => run_sweep_cache(cli, *age_days),
        Command::Completions { shell } => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            clap_complete::generate(*shell, &mut cmd, "dupscan", &mut std::io::stdout());
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    match &cli.config {
        Some(path) => Config::load(path),
        None => {
            let mut config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}

fn open_stores(config: &Config) -> Result<(FingerprintStore, SessionStore)> {
    let fp_store = FingerprintStore::open(&config.data_dir.join("fingerprints.db"))?;
    let session_store = SessionStore::open(&config.data_dir.join("sessions.db"))?;
    Ok((fp_store, session_store))
}

fn run_scan(cli: &Cli) -> Result<()> {
    let mut config = load_config(cli)?;
    if matches!(cli.command, Command::Resume) {
        config.incremental_rescan = true;
    }
    let (fp_store, session_store) = open_stores(&config)?;
    let cancel = CancelToken::new();

    let completion = orchestrator::run(&config, &fp_store, &session_store, &NullCallbacks, &cancel)?;
    fp_store.close_all()?;

    match completion {
        Completion::Finished(result) => {
            if cli.json {
                println!("{}", export::to_json(&result)?);
            } else if !cli.quiet {
                println!(
                    "{} session {} ({} groups, {} errors)",
                    "scan complete:".green(),
                    result.session_id,
                    result.groups.len(),
                    result.metrics.errors_total
                );
            }
            Ok(())
        }
        Completion::Cancelled => {
            if !cli.quiet {
                println!("{}", "scan cancelled".yellow());
            }
            Ok(())
        }
        Completion::Failed(message) => {
            eprintln!("{} {message}", "scan failed:".red());
            std::process::exit(1);
        }
    }
}

fn run_sessions(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let (_, session_store) = open_stores(&config)?;
    let current_hash = config.config_hash();
    if let Some(summary) = session_store.find_resumable(&current_hash)? {
        println!(
            "{} {} stage={} status={}",
            "resumable:".cyan(),
            summary.id,
            summary.stage.as_str(),
            summary.status.as_str()
        );
    } else if !cli.quiet {
        println!("no resumable session for the active configuration");
    }
    Ok(())
}

fn run_export(cli: &Cli, session_id: &str) -> Result<()> {
    let config = load_config(cli)?;
    let (_, session_store) = open_stores(&config)?;
    let results = session_store.load_results(session_id)?;
    let mut grouped: std::collections::HashMap<String, Vec<String>> = std::collections::HashMap::new();
    for (key, path) in results {
        grouped.entry(key).or_default().push(path);
    }
    println!("{}", serde_json::to_string_pretty(&grouped)?);
    Ok(())
}

fn run_sweep_cache(cli: &Cli, age_days: u64) -> Result<()> {
    let config = load_config(cli)?;
    let (fp_store, _) = open_stores(&config)?;
    let deleted = fp_store.sweep(age_days)?;
    fp_store.close_all()?;
    if !cli.quiet {
        println!("swept {deleted} stale fingerprint rows");
    }
    Ok(())
}
