//! Integration test suite for appswap
//!
//! End-to-end checks of the update pipeline through the public API, the
//! `appswap` CLI and the `appswap-watchdog` binary.
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **resolver**: candidate ordering and the first-reachable-wins rule
//! - **transfer**: staging downloads, integrity failures, stale cleanup
//! - **handoff**: install job creation and watchdog selection
//! - **watchdog**: the install state machine against a mock host
//! - **cli**: command behavior and exit codes of both binaries

mod cli;
mod handoff;
mod resolver;
mod transfer;
mod watchdog;
