use anyhow::Result;
use clap::Args;
use colored::Colorize;

use super::common::{CommandContext, CommandExecutor};

/// Remove stale locks, partial downloads and leftover watchdog copies.
///
/// Anything still in use by a live transfer or install is left alone.
#[derive(Args, Debug, Default)]
pub struct CleanupCommand {}

impl CommandExecutor for CleanupCommand {
    async fn execute_with_context(self, context: CommandContext) -> Result<()> {
        let service = context.service();
        if !service.staging().dir().exists() {
            println!("Nothing to clean up");
            return Ok(());
        }

        let report = service.clean_up_stale().await?;
        if report.total() == 0 {
            println!("Nothing to clean up");
        } else {
            println!(
                "{} {} lock(s), {} partial download(s), {} watchdog leftover(s)",
                "Removed".green().bold(),
                report.removed_locks,
                report.removed_partials,
                report.removed_watchdogs
            );
        }
        Ok(())
    }
}
