use anyhow::Result;
use clap::Args;
use colored::Colorize;

use super::common::{CommandContext, CommandExecutor, print_update};
use crate::upgrade::resolver::UpdateCheck;
use crate::utils::progress::spinner_with_message;

/// Probe the configured distribution locations.
///
/// Locations are tried in priority order; unreachable ones are skipped and the
/// first reachable one decides.
#[derive(Args, Debug, Default)]
pub struct CheckCommand {
    /// Print the result as JSON.
    #[arg(long)]
    json: bool,
}

impl CommandExecutor for CheckCommand {
    async fn execute_with_context(self, context: CommandContext) -> Result<()> {
        let service = context.service();
        let current = context.config.current_version.clone();

        let spinner = spinner_with_message("Checking for updates...", context.no_progress || self.json);
        let result = service.check_for_updates().await;
        spinner.finish_and_clear();

        match result? {
            UpdateCheck::Available(update) if self.json => {
                let value = serde_json::json!({
                    "current_version": current,
                    "update_available": true,
                    "update": update,
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            }
            UpdateCheck::Available(update) => {
                print_update(&current, &update);
                println!("Run `appswap upgrade` to install it");
            }
            UpdateCheck::UpToDate if self.json => {
                let value = serde_json::json!({
                    "current_version": current,
                    "update_available": false,
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            }
            UpdateCheck::UpToDate => {
                println!("{}", format!("You are on the latest version ({current})").green());
            }
        }
        Ok(())
    }
}
