//! I/O adapters for the controller.

pub mod config;
pub mod git;
pub mod init;
pub mod interrupt;
pub mod launcher;
pub mod ledger_store;
pub mod picker;
pub mod process;
pub mod reservation;
pub mod review;
pub mod tracker;
