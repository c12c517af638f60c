//! Test-only helpers: scratch trees and a scripted command runner.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::io::config::SolverConfig;
use crate::io::git::Git;
use crate::io::issue::Issue;
use crate::io::runner::{CommandRunner, Invocation, RunOutput};

/// Scratch directory with file-writing helpers.
pub struct TestTree {
    dir: TempDir,
}

impl TestTree {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `contents` to `rel`, creating parent directories.
    pub fn write(&self, rel: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        fs::write(&path, contents).expect("write test file");
        path
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.dir.path().join(rel)).expect("read test file")
    }

    /// Turn the tree into a git repository with everything committed.
    ///
    /// Returns the HEAD commit.
    pub fn commit_all(&self, message: &str) -> String {
        commit_dir(self.path(), message)
    }
}

/// Initialise `dir` as a git repository if needed and commit everything in it.
///
/// Returns the HEAD commit.
pub fn commit_dir(dir: &Path, message: &str) -> String {
    if !dir.join(".git").exists() {
        git(dir, &["init", "--quiet"]);
        git(dir, &["config", "user.name", "Solver Test"]);
        git(dir, &["config", "user.email", "solver-test@local.invalid"]);
        git(dir, &["config", "commit.gpgsign", "false"]);
    }
    let git_dir = Git::new(dir);
    git_dir.add_all().expect("git add");
    git_dir.commit_staged(message).expect("git commit");
    git_dir.head_sha().expect("head sha")
}

/// Local stand-in for a hosted repository, cloned through a path template.
pub struct Upstream {
    dir: TestTree,
    repo: String,
}

impl Upstream {
    /// `repo` is the `owner/name` the issue will reference.
    pub fn new(repo: &str) -> Self {
        let dir = TestTree::new();
        fs::create_dir_all(dir.path().join(repo)).expect("create upstream dir");
        Self {
            dir,
            repo: repo.to_string(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.path().join(&self.repo)
    }

    pub fn write(&self, rel: &str, contents: &str) -> PathBuf {
        self.dir.write(&format!("{}/{rel}", self.repo), contents)
    }

    pub fn commit(&self, message: &str) -> String {
        commit_dir(&self.path(), message)
    }

    /// Defaults with cloning pointed at this upstream and trees kept beside it.
    pub fn config(&self) -> SolverConfig {
        SolverConfig {
            clone_url_template: format!("{}/{{repo}}", self.dir.path().display()),
            workspace_dir: Some(self.dir.path().join("work")),
            ..SolverConfig::default()
        }
    }

    pub fn issue(&self, base_commit: &str, gold_patch: Option<&str>, test_patch: Option<&str>) -> Issue {
        Issue {
            id: format!("{}-1", self.repo.replace('/', "__")),
            repo: self.repo.clone(),
            problem_statement: "Fix the failing behaviour.".to_string(),
            base_commit: base_commit.to_string(),
            gold_patch: gold_patch.map(str::to_string),
            test_patch: test_patch.map(str::to_string),
        }
    }

    /// Number of working trees still present under the workspace directory.
    pub fn live_trees(&self) -> usize {
        fs::read_dir(self.dir.path().join("work"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

impl Default for TestTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Run git in `dir`, panicking on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("spawn git");
    assert!(
        output.status.success(),
        "git {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// Exit-zero output with the given stdout.
pub fn passing(stdout: &str) -> RunOutput {
    RunOutput {
        exit_code: Some(0),
        stdout: stdout.to_string(),
        ..RunOutput::default()
    }
}

/// Exit-one output with the given stdout.
pub fn failing(stdout: &str) -> RunOutput {
    RunOutput {
        exit_code: Some(1),
        stdout: stdout.to_string(),
        ..RunOutput::default()
    }
}

/// Output of a run killed at its deadline.
pub fn timed_out() -> RunOutput {
    RunOutput {
        exit_code: None,
        timed_out: true,
        ..RunOutput::default()
    }
}

struct Rule {
    needle: String,
    output: RunOutput,
    once: bool,
}

/// [`CommandRunner`] that records invocations and answers from a script.
///
/// Rules match when their needle is a substring of the command line; the
/// first matching rule answers. Unmatched commands pass with empty output.
/// Programs registered as missing fail to spawn and report absent from `PATH`.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: RefCell<Vec<Rule>>,
    calls: RefCell<Vec<Invocation>>,
    missing: BTreeSet<String>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn without_program(mut self, program: &str) -> Self {
        self.missing.insert(program.to_string());
        self
    }

    /// Answer every matching command with `output`.
    pub fn respond(self, needle: &str, output: RunOutput) -> Self {
        self.push(needle, output, false);
        self
    }

    /// Answer the next matching command with `output`, then fall through.
    pub fn respond_once(self, needle: &str, output: RunOutput) -> Self {
        self.push(needle, output, true);
        self
    }

    fn push(&self, needle: &str, output: RunOutput, once: bool) {
        self.rules.borrow_mut().push(Rule {
            needle: needle.to_string(),
            output,
            once,
        });
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.borrow().clone()
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .map(Invocation::command_line)
            .collect()
    }

    /// Number of recorded command lines containing `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.command_lines()
            .iter()
            .filter(|line| line.contains(needle))
            .count()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, invocation: &Invocation) -> Result<RunOutput> {
        self.calls.borrow_mut().push(invocation.clone());
        if self.missing.contains(&invocation.program) {
            return Err(anyhow!("spawn {}: not found", invocation.program));
        }
        let line = invocation.command_line();
        let mut rules = self.rules.borrow_mut();
        let Some(index) = rules.iter().position(|rule| line.contains(&rule.needle)) else {
            return Ok(RunOutput {
                exit_code: Some(0),
                ..RunOutput::default()
            });
        };
        if rules[index].once {
            Ok(rules.remove(index).output)
        } else {
            Ok(rules[index].output.clone())
        }
    }

    fn has_program(&self, program: &str) -> bool {
        !self.missing.contains(program)
    }
}
