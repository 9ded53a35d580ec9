//! Deterministic, pure logic shared by the conductor engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod classifier;
pub mod fileops;
pub mod invariants;
pub mod patch;
pub mod path;
pub mod record;
pub mod textedit;
pub mod transitions;
pub mod types;
