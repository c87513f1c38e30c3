//! CLI argument definitions and subcommand routing.

pub mod config;
pub mod decode;
pub mod replay;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Drive a friendlink client over the in-memory loopback.
#[derive(Parser)]
#[command(name = "friendlink", version, about)]
pub struct Cli {
    /// Log filter, e.g. `debug` or `friendlink=trace` (`RUST_LOG` wins).
    #[arg(long, global = true)]
    pub log: Option<String>,

    /// Config file (default: `friendlink.conf` in the platform config directory).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// One-shot operations (run and exit).
#[derive(Subcommand)]
pub enum Command {
    /// Replay a JSON script against a loopback client and print every notification.
    Replay(ReplayArgs),
    /// Decode one raw callback record and print the typed payload.
    Decode {
        /// Callback id, e.g. 805.
        id: i32,
        /// Payload bytes as hex (`0x` prefix and whitespace allowed).
        hex: String,
    },
    /// Show the effective configuration.
    Config {
        /// Write it to the config file as well.
        #[arg(long)]
        init: bool,
    },
}

/// Arguments for the `replay` subcommand.
#[derive(clap::Args)]
pub struct ReplayArgs {
    /// Script file.
    pub script: PathBuf,

    /// Messages kept per friend (overrides the config file).
    #[arg(long)]
    pub history_capacity: Option<usize>,

    /// Idle poll interval in milliseconds (overrides the config file).
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// Worker stop timeout in milliseconds (overrides the config file).
    #[arg(long)]
    pub stop_timeout_ms: Option<u64>,

    /// Print notifications as JSON lines.
    #[arg(long)]
    pub json: bool,
}
