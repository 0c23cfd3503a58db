//! Core types shared by the host and the watchdog.
//!
//! - [`error`]: the [`UpdateError`] taxonomy and user-facing error formatting
//! - [`version`]: the lenient dotted-numeric [`Version`] comparator

pub mod error;
pub mod version;

pub use error::{ErrorContext, UpdateError, user_friendly_error};
pub use version::{Version, is_newer};
