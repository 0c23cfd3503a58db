use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;

use super::common::{CommandContext, CommandExecutor};
use crate::upgrade::handoff::InstallJob;
use crate::upgrade::transfer::StagedArtifact;

/// Hand a local artifact to the watchdog.
///
/// The watchdog closes the running application, replaces its executable and
/// starts the new one. This command returns as soon as the watchdog is
/// running; `appswap status` reports the outcome afterwards.
#[derive(Args, Debug)]
pub struct InstallCommand {
    /// The replacement executable.
    artifact: PathBuf,

    /// Version of the artifact, recorded in the configuration on success.
    #[arg(long = "as-version", value_name = "VERSION")]
    version: Option<String>,
}

impl CommandExecutor for InstallCommand {
    async fn execute_with_context(self, context: CommandContext) -> Result<()> {
        let staged = StagedArtifact::from_path(&self.artifact)
            .await
            .with_context(|| format!("Cannot install {}", self.artifact.display()))?;

        let job = context.service().install(&staged, self.version.as_deref()).await?;
        print_job(&job);
        Ok(())
    }
}

pub(super) fn print_job(job: &InstallJob) {
    let pid = job.pid.map(|pid| format!(", pid {pid}")).unwrap_or_default();
    println!(
        "{} {} (job {}{pid})",
        "Installer started for".green().bold(),
        job.target.display(),
        job.id
    );
    println!("The application will be closed and restarted. Run `appswap status` afterwards.");
}
