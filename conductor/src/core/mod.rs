//! Deterministic, pure logic shared by the controller.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod ledger;
pub mod naming;
pub mod reservation;
pub mod scorer;
pub mod selector;
pub mod transitions;
pub mod types;
