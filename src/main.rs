//! appswap CLI entry point
//!
//! Parses the command line, exports the settings the watchdog inherits, then
//! runs the subcommand on a tokio runtime. Errors are shown with a suggestion
//! and exit code 1.

use anyhow::{Context, Result};
use appswap::cli;
use appswap::core::user_friendly_error;
use clap::Parser;

fn main() {
    let cli = cli::Cli::parse();
    let config = cli.build_config();
    // Environment changes must happen before the runtime spawns worker threads.
    config.apply_to_env();

    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    if let Err(e) = run(cli, config) {
        user_friendly_error(e).display();
        std::process::exit(1);
    }
}

fn run(cli: cli::Cli, config: cli::CliConfig) -> Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?
        .block_on(cli.execute_with_config(config))
}
