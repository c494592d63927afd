//! # mirrorsync (msync)
//!
//! **msync** keeps a primary remote and a mirror remote in sync for one
//! working tree.
//!
//! Each run:
//! - commits pending changes and pushes them to the primary remote
//! - copies the tree into the mirror working directory (deletions included)
//! - commits the mirror and pushes it to the branch of the same name
//!
//! Credentials and options come from a `.env` file and the environment.
//! This CLI is built with [clap](https://docs.rs/clap).

use clap::Parser;
use mirrorsync::{Overrides, SyncOptions, Transport, cmd_sync};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

/// Command-line interface definition.
///
/// Parsed using `clap` derive macros.
#[derive(Parser, Debug)]
#[command(
    name = "msync",
    version,
    about = "mirrorsync (msync) - commit, push, and mirror a repository in one step"
)]
struct Cli {
    /// Commit message (words are joined with spaces); defaults to a timestamp
    message: Vec<String>,

    /// Path inside the source repository
    #[arg(short = 'C', long = "repo", default_value = ".")]
    repo: PathBuf,

    /// Configuration file (default: <repository root>/.env)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Mirror working directory (default: <source-parent>/<name>-mirror)
    #[arg(long)]
    mirror_dir: Option<PathBuf>,

    /// How the mirror remote is reached: https (token) or ssh
    #[arg(long)]
    transport: Option<Transport>,

    /// Keep files in the mirror that no longer exist in the source
    #[arg(long)]
    no_delete: bool,

    /// Initialize a new mirror on libgit2's default branch instead of the source branch
    #[arg(long)]
    no_auto_init: bool,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Disable logging
    #[arg(short, long)]
    quiet: bool,
}

fn init_logging(verbose: u8, quiet: bool) {
    if quiet {
        return;
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        match verbose {
            0 => tracing_subscriber::EnvFilter::new("warn"),
            1 => tracing_subscriber::EnvFilter::new("info"),
            2 => tracing_subscriber::EnvFilter::new("debug"),
            _ => tracing_subscriber::EnvFilter::new("trace"),
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// CLI entry point.
///
/// Parses arguments with `clap`, runs one sync, prints the report, and
/// exits with `0` on success (including "nothing to do") or `1` on any
/// failure.
fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let message = cli.message.join(" ");
    let opts = SyncOptions {
        repo_path: cli.repo,
        config_path: cli.config,
        message: (!message.trim().is_empty()).then_some(message),
        overrides: Overrides {
            transport: cli.transport,
            no_delete: cli.no_delete,
            no_auto_init: cli.no_auto_init,
            mirror_dir: cli.mirror_dir,
        },
    };

    let outcome = cmd_sync(&opts);
    // Spinners already left one line per stage on a terminal.
    outcome.print(!std::io::stderr().is_terminal());
    ExitCode::from(outcome.exit_code())
}
