//! Command runner seam for installers and test runners.
//!
//! Every external tool other than git goes through [`CommandRunner`], so the
//! resolver, executor and orchestrator can be driven by a scripted fake in
//! tests.

use std::fmt;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, instrument};
use which::which;

use crate::io::process::run_command_with_timeout;

/// One external command to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
    pub workdir: PathBuf,
    pub timeout: Duration,
}

impl Invocation {
    pub fn new<I, S>(program: &str, args: I, workdir: impl Into<PathBuf>, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            envs: Vec::new(),
            workdir: workdir.into(),
            timeout,
        }
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.envs.push((key.to_string(), value.to_string()));
        self
    }

    /// Program and arguments joined with spaces.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Captured result of an [`Invocation`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl RunOutput {
    pub fn passed(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

pub trait CommandRunner {
    /// Run to completion or timeout. `Err` only when the command could not be started.
    fn run(&self, invocation: &Invocation) -> Result<RunOutput>;

    /// True when `program` resolves on `PATH`.
    fn has_program(&self, program: &str) -> bool;
}

/// Runs commands on the host.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    output_limit_bytes: usize,
}

impl SystemRunner {
    pub fn new(output_limit_bytes: usize) -> Self {
        Self { output_limit_bytes }
    }
}

impl CommandRunner for SystemRunner {
    #[instrument(skip_all, fields(program = %invocation.program, timeout_secs = invocation.timeout.as_secs()))]
    fn run(&self, invocation: &Invocation) -> Result<RunOutput> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args).current_dir(&invocation.workdir);
        for (key, value) in &invocation.envs {
            cmd.env(key, value);
        }
        debug!(command = %invocation, "running");
        let output = run_command_with_timeout(
            cmd,
            None,
            invocation.timeout,
            self.output_limit_bytes,
        )?;
        Ok(RunOutput {
            exit_code: output.status.code(),
            stdout: output.stdout_text(),
            stderr: output.stderr_text(),
            timed_out: output.timed_out,
        })
    }

    fn has_program(&self, program: &str) -> bool {
        which(program).is_ok()
    }
}
