//! Clap derive structures for the `reowatch` daemon.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// reowatch -- Reolink camera integration daemon
#[derive(Debug, Parser)]
#[command(
    name = "reowatch",
    version,
    about = "Bridge Reolink cameras to motion events and recording playback",
    long_about = "A daemon that subscribes to Reolink camera push notifications,\n\
        tracks motion and AI detection state, and serves recorded clips\n\
        with thumbnails over a small HTTP API.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Path to the config file (default: platform config directory)
    #[arg(long, short = 'c', env = "REOWATCH_CONFIG_FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the daemon: connect cameras, subscribe, serve HTTP
    Run(RunArgs),

    /// Validate the configuration without contacting any camera
    Check,

    /// Manage the daemon configuration file
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// HTTP listen address (overrides the config file)
    #[arg(long, short = 'b')]
    pub bind: Option<SocketAddr>,
}

// ── Config subcommands ───────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display the resolved configuration as TOML
    Show,

    /// Print the config file path
    Path,

    /// Write a starter config file
    Init,
}
