//! Side-effecting operations: processes, git, the filesystem and installers.

pub mod candidates;
pub mod config;
pub mod deps;
pub mod executor;
pub mod git;
pub mod issue;
pub mod manifests;
pub mod patch;
pub mod probe;
pub mod process;
pub mod runner;
pub mod symbols;
pub mod tree;
