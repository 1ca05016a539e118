#![forbid(unsafe_code)]

//! `dupscan` CLI entry point.

use clap::Parser;
use dupscan_core::cli::Cli;
use tracing_subscriber::{EnvFilter, fmt};

/// Map `-v`/`-vv`/`--quiet` onto a default filter level, with `DUPSCAN_LOG`
/// taking precedence when set (matching the `RUST_LOG`-style override other
/// tools in this stack honor).
fn init_logging(cli: &Cli) {
    let default_level = if cli.quiet {
        "off"
    } else {
        match cli.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    };

    let filter =
        EnvFilter::try_from_env("DUPSCAN_LOG").unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let args = Cli::parse();
    init_logging(&args);
    if let Err(e) = dupscan_core::cli::run(&args) {
        eprintln!("dupscan: {e}");
        std::process::exit(1);
    }
}
