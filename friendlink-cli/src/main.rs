//! friendlink — replay scripted callback traffic through a client and decode
//! raw callback records.

#![allow(
    missing_docs,
    missing_debug_implementations,
    clippy::print_stderr,
    clippy::print_stdout
)]

mod cmd;

use std::process;

use clap::Parser;

use crate::cmd::config::{self, Config};
use crate::cmd::{Cli, Command};

/// Log filter used when neither `--log`, the config file nor `RUST_LOG` sets one.
const DEFAULT_LOG: &str = "warn";

fn main() {
    if let Err(e) = run() {
        eprintln!("fatal: {e}");
        process::exit(1);
    }
}

fn run() -> friendlink::Result<()> {
    let cli = Cli::parse();
    let path = cli.config.clone().unwrap_or_else(config::default_path);
    let cfg = Config::load(&path)?;

    let level = cli.log.as_deref().or(cfg.log.as_deref()).unwrap_or(DEFAULT_LOG);
    friendlink::init_logger(Some(level))?;
    tracing::debug!(config = %path.display(), "configuration loaded");

    match cli.command {
        Command::Replay(args) => cmd::replay::run(&args, &cfg),
        Command::Decode { id, hex } => cmd::decode::run(id, &hex),
        Command::Config { init } => {
            if init {
                cfg.save(&path)?;
                println!("wrote {}", path.display());
            }
            print!("{cfg}");
            Ok(())
        }
    }
}
