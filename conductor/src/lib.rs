//! Autonomous-task orchestration controller.
//!
//! Pulls candidate tasks from a tracker, runs a bounded number of them on
//! independent workers, and reconciles each task's lifecycle against the
//! review and version-control systems until it is merged and cleaned up,
//! abandoned, or reverted.
//!
//! - **[`core`]**: pure, deterministic logic (scoring, selection,
//!   reservations, the phase state machine, the ledger document). No I/O.
//! - **[`io`]**: side-effecting adapters (config, ledger file, git, `gh`,
//!   backlog, worker processes). Each external system sits behind a trait
//!   so tests can substitute in-memory fakes.
//!
//! Orchestration modules ([`schedule`], [`reconcile`], [`recovery`],
//! [`looping`]) combine the two through a [`controller::Controller`].

pub mod cleanup;
pub mod controller;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod reconcile;
pub mod recovery;
pub mod retry;
pub mod schedule;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod ticker;
