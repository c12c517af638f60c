//! Git adapter for working-tree setup and patch application.
//!
//! Every call is bounded by a timeout through `io::process`; a timed-out git
//! command is reported as an error, never waited on indefinitely.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::io::process::{CommandOutput, run_command_with_timeout};

/// Captured git output kept small; patches and status listings fit easily.
const GIT_OUTPUT_LIMIT_BYTES: usize = 200_000;
/// Bound for quick local queries (status, add, commit).
const LOCAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Clone `url` into `dest` and return a wrapper rooted there.
    #[instrument(skip_all, fields(url = %url, dest = %dest.display()))]
    pub fn clone_repo(url: &str, dest: &Path, timeout: Duration) -> Result<Self> {
        let mut cmd = Command::new("git");
        cmd.arg("clone").arg("--quiet").arg(url).arg(dest);
        let output = run_command_with_timeout(cmd, None, timeout, GIT_OUTPUT_LIMIT_BYTES)
            .context("spawn git clone")?;
        check("clone", &output)?;
        debug!("clone finished");
        Ok(Self::new(dest))
    }

    /// Checkout `rev` (detached).
    #[instrument(skip_all, fields(rev = %rev))]
    pub fn checkout(&self, rev: &str, timeout: Duration) -> Result<()> {
        self.run_checked(&["checkout", "--quiet", rev], None, timeout)?;
        Ok(())
    }

    /// Dry-run `diff` against the tree. `Ok(false)` means the patch does not apply cleanly.
    #[instrument(skip_all, fields(diff_bytes = diff.len()))]
    pub fn apply_check(&self, diff: &str, timeout: Duration) -> Result<bool> {
        let output = self.run(&["apply", "--check"], Some(diff.as_bytes()), timeout)?;
        if output.timed_out {
            return Err(anyhow!("git apply --check timed out"));
        }
        if !output.status.success() {
            debug!(stderr = %output.stderr_text().trim(), "apply check rejected diff");
        }
        Ok(output.status.success())
    }

    /// Apply `diff` to the tree.
    #[instrument(skip_all, fields(diff_bytes = diff.len()))]
    pub fn apply(&self, diff: &str, timeout: Duration) -> Result<()> {
        self.run_checked(&["apply"], Some(diff.as_bytes()), timeout)?;
        Ok(())
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// Stage all changes (respects .gitignore).
    #[cfg(any(test, feature = "test-support"))]
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"], None, LOCAL_TIMEOUT)?;
        Ok(())
    }

    /// Commit staged changes with a message.
    ///
    /// If there are no staged changes, this returns Ok(false) and does nothing.
    #[cfg(any(test, feature = "test-support"))]
    #[instrument(skip_all)]
    pub fn commit_staged(&self, message: &str) -> Result<bool> {
        let staged = self.run_capture(&["diff", "--cached", "--name-only"])?;
        if staged.trim().is_empty() {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        self.run_checked(&["commit", "--quiet", "-m", message], None, LOCAL_TIMEOUT)?;
        Ok(true)
    }

    /// Full SHA of HEAD.
    #[cfg(any(test, feature = "test-support"))]
    pub fn head_sha(&self) -> Result<String> {
        Ok(self.run_capture(&["rev-parse", "HEAD"])?.trim().to_string())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args, None, LOCAL_TIMEOUT)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(
        &self,
        args: &[&str],
        stdin: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let output = self.run(args, stdin, timeout)?;
        check(&args.join(" "), &output)?;
        Ok(output)
    }

    fn run(&self, args: &[&str], stdin: Option<&[u8]>, timeout: Duration) -> Result<CommandOutput> {
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(&self.workdir);
        run_command_with_timeout(cmd, stdin, timeout, GIT_OUTPUT_LIMIT_BYTES)
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

fn check(label: &str, output: &CommandOutput) -> Result<()> {
    if output.timed_out {
        warn!(label, "git command timed out");
        return Err(anyhow!("git {label} timed out"));
    }
    if !output.status.success() {
        let stderr = output.stderr_text();
        return Err(anyhow!("git {label} failed: {}", stderr.trim()));
    }
    Ok(())
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_untracked_line() {
        let e = parse_status_line("?? foo.txt").expect("parse");
        assert_eq!(
            e,
            StatusEntry {
                code: "??".to_string(),
                path: "foo.txt".to_string()
            }
        );
    }

    #[test]
    fn parses_modified_line() {
        let e = parse_status_line(" M src/main.py").expect("parse");
        assert_eq!(
            e,
            StatusEntry {
                code: " M".to_string(),
                path: "src/main.py".to_string()
            }
        );
    }

    #[test]
    fn parses_rename_line_uses_new_path() {
        let e = parse_status_line("R  old.txt -> new.txt").expect("parse");
        assert_eq!(e.path, "new.txt");
    }

    #[test]
    fn clone_of_missing_source_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let missing = temp.path().join("no-such-repo");
        let err = Git::clone_repo(
            &missing.display().to_string(),
            &temp.path().join("dest"),
            Duration::from_secs(30),
        )
        .expect_err("clone should fail");
        assert!(err.to_string().contains("clone"));
    }
}
