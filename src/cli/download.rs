use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tracing::debug;

use super::common::{CommandContext, CommandExecutor, print_update};
use crate::upgrade::UpdateService;
use crate::upgrade::resolver::UpdateDescriptor;
use crate::upgrade::transfer::{CancelHandle, StagedArtifact};
use crate::utils::progress::render_events;

/// Download the newer version into the staging directory without installing it.
#[derive(Args, Debug, Default)]
pub struct DownloadCommand {}

impl CommandExecutor for DownloadCommand {
    async fn execute_with_context(self, context: CommandContext) -> Result<()> {
        let service = context.service();
        let Some(update) = service.check_for_updates().await?.into_available() else {
            println!(
                "{}",
                format!("You are on the latest version ({})", context.config.current_version).green()
            );
            return Ok(());
        };
        print_update(&context.config.current_version, &update);

        let staged = download_with_progress(service, &update, context.no_progress).await?;
        println!("{} {}", "Staged".green().bold(), staged.path.display());
        println!("Run `appswap install {}` to install it", staged.path.display());
        Ok(())
    }
}

/// Stage `update`, rendering progress and cancelling on Ctrl-C.
///
/// Consumes the service so the renderer sees the bridge close.
pub(super) async fn download_with_progress(
    service: UpdateService,
    update: &UpdateDescriptor,
    no_progress: bool,
) -> Result<StagedArtifact> {
    let renderer = render_events(service.subscribe(), no_progress);

    let cancel = CancelHandle::new();
    let on_interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                debug!("Interrupt received; cancelling transfer");
                cancel.cancel();
                // A second Ctrl-C exits without waiting for cleanup.
                if tokio::signal::ctrl_c().await.is_ok() {
                    std::process::exit(130);
                }
            }
        })
    };

    let result = service.download(update, cancel).await;
    on_interrupt.abort();
    drop(service);
    let _ = renderer.await;

    result.with_context(|| format!("Failed to download version {}", update.version))
}
