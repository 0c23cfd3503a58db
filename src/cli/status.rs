use anyhow::Result;
use clap::Args;
use colored::Colorize;

use super::common::{CommandContext, CommandExecutor};
use crate::upgrade::install_lock;
use crate::upgrade::markers::InstallOutcome;

/// Report, and consume, the outcome of the previous install.
#[derive(Args, Debug, Default)]
pub struct StatusCommand {
    /// Print the result as JSON.
    #[arg(long)]
    json: bool,
}

impl CommandExecutor for StatusCommand {
    async fn execute_with_context(self, context: CommandContext) -> Result<()> {
        let mut service = context.service();
        let staging_dir = service.staging().dir().to_path_buf();

        let running = install_lock::read(&staging_dir).await.filter(|record| record.is_live());
        let outcome = service.take_last_outcome().await?;
        let version = service.config().current_version.clone();

        if self.json {
            let value = serde_json::json!({
                "current_version": version,
                "install_running": running.as_ref().map(|r| r.pid),
                "last_install": outcome,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
            return Ok(());
        }

        println!("Installed version: {}", version.bold());
        if let Some(record) = running {
            println!(
                "{}",
                format!("An install is running (pid {}, job {})", record.pid, record.job_id)
                    .yellow()
            );
        }
        match outcome {
            Some(InstallOutcome::Succeeded { message }) => {
                println!("{} {}", "Last install succeeded:".green().bold(), message.trim());
            }
            Some(InstallOutcome::Failed { reason }) => {
                println!("{} {}", "Last install failed:".red().bold(), reason.trim());
            }
            None => println!("No install outcome to report"),
        }
        Ok(())
    }
}
