//! Deterministic, pure logic shared by the solver pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on diff text,
//! manifest contents and captured output and return deterministic results
//! suitable for tests.

pub mod classifier;
pub mod diff;
pub mod packages;
pub mod profile;
pub mod scope;
pub mod types;
