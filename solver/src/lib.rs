//! Issue-resolution and test-validation pipeline.
//!
//! Given an issue (repository, base commit, optional gold and test patches) the
//! crate clones the repository into an ephemeral tree, profiles and prepares
//! its environment, applies or synthesizes a fix, and runs the narrowest test
//! scope that can confirm it. The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (profiling rules, scope
//!   extraction, failure classification, diff synthesis). No I/O.
//! - **[`io`]**: Side-effecting operations (git, child processes, installers,
//!   test runners). External commands go through the
//!   [`io::runner::CommandRunner`] seam so tests can script them.
//!
//! [`attempt`] coordinates both to turn one issue into a [`core::types::Verdict`].

pub mod attempt;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
