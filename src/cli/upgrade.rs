use anyhow::Result;
use clap::Args;
use colored::Colorize;

use super::common::{CommandContext, CommandExecutor, print_update};
use super::download::download_with_progress;
use super::install::print_job;

/// Check, download and install the newer version in one go.
#[derive(Args, Debug, Default)]
pub struct UpgradeCommand {
    /// Stop after downloading; install later with `appswap install`.
    #[arg(long)]
    no_install: bool,
}

impl CommandExecutor for UpgradeCommand {
    async fn execute_with_context(self, context: CommandContext) -> Result<()> {
        let current = context.config.current_version.clone();
        let service = context.service();

        let Some(update) = service.check_for_updates().await?.into_available() else {
            println!("{}", format!("You are on the latest version ({current})").green());
            return Ok(());
        };
        print_update(&current, &update);

        let staged = download_with_progress(service, &update, context.no_progress).await?;
        if self.no_install {
            println!("{} {}", "Staged".green().bold(), staged.path.display());
            return Ok(());
        }

        let job = context.service().install(&staged, Some(&update.version)).await?;
        print_job(&job);
        Ok(())
    }
}
