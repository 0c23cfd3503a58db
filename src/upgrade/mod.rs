//! The update pipeline.
//!
//! ```text
//! check     -> resolver    (descriptor, VersionSource)
//! download  -> transfer    (staging, TransferSource)
//! install   -> handoff     (locator, watchdog copy or script, detached spawn)
//!           => watchdog    (independent process: terminate, backup, replace,
//!                           verify, restart, marker)
//! next run  -> markers     (success or error flag in the staging directory)
//! ```
//!
//! The host never waits for the watchdog. Once [`handoff::HandoffOrchestrator`]
//! has spawned it, the only channel back is the pair of outcome markers that
//! [`service::UpdateService::take_last_outcome`] reads on the next launch.
//!
//! Progress for the three host-side stages flows through
//! [`progress::ProgressBridge`].

pub mod backup;
pub mod config;
pub mod descriptor;
pub mod handoff;
pub mod install_lock;
pub mod locator;
pub mod markers;
pub mod process;
pub mod progress;
pub mod resolver;
pub mod service;
pub mod staging;
pub mod transfer;
pub mod verification;
pub mod watchdog;

pub use descriptor::{DistributionLocation, DistributionReader, VersionDescriptor, VersionSource};
pub use handoff::{HandoffOrchestrator, InstallJob, WatchdogKind};
pub use locator::InstallLocator;
pub use markers::{InstallOutcome, OutcomeMarkers};
pub use process::{HostControl, SystemHost};
pub use progress::{ProgressBridge, ProgressEvent, Stage};
pub use resolver::{UpdateCheck, UpdateDescriptor, UpdateResolver};
pub use service::UpdateService;
pub use staging::{CleanupReport, StagingArea};
pub use transfer::{CancelHandle, StagedArtifact, TransferEngine, TransferProgress, TransferSource};
pub use watchdog::{InstallPaths, Watchdog, WatchdogReport};
