//! One end-to-end resolution attempt for a single issue.
//!
//! The attempt is a fixed sequence of stages:
//!
//! ```text
//! Cloning -> Profiling -> InstallingDeps
//!         -> [BaselineTesting -> Classifying -> CandidateGeneration]   (autonomous only)
//!         -> Applying -> InstallingTestPlugins -> DetectingRuntimeImports
//!         -> Executing -> Done
//! ```
//!
//! Every stage appends human-readable lines to the verdict log. Clone, patch
//! selection, patch application and test execution are terminal on failure;
//! environment preparation never is. No error escapes [`run_attempt`].

use std::path::Path;

use tracing::{info, instrument, warn};

use crate::core::classifier::classify;
use crate::core::scope::{extract_files, plan_scopes};
use crate::core::types::{
    FailureRecord, Language, LanguageProfile, StageOutcome, TestScope, Verdict,
};
use crate::io::candidates;
use crate::io::config::SolverConfig;
use crate::io::deps::{DependencyCache, DependencyResolver};
use crate::io::executor::{TestExecutor, TestRun};
use crate::io::issue::Issue;
use crate::io::patch::apply_patch;
use crate::io::probe::probe;
use crate::io::runner::CommandRunner;
use crate::io::tree::WorkingTree;

const DEPS_PREVIEW: usize = 5;

/// Knobs for a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptOptions {
    /// Apply the issue's gold patch instead of generating candidates.
    ///
    /// Ignored when the issue carries no gold patch.
    pub use_gold_patch: bool,
}

impl Default for AttemptOptions {
    fn default() -> Self {
        Self {
            use_gold_patch: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Cloning,
    Profiling,
    InstallingDeps,
    BaselineTesting,
    Classifying,
    CandidateGeneration,
    Applying,
    InstallingTestPlugins,
    DetectingRuntimeImports,
    Executing,
    Done,
}

impl Stage {
    fn as_str(self) -> &'static str {
        match self {
            Stage::Cloning => "cloning",
            Stage::Profiling => "profiling",
            Stage::InstallingDeps => "installing_deps",
            Stage::BaselineTesting => "baseline_testing",
            Stage::Classifying => "classifying",
            Stage::CandidateGeneration => "candidate_generation",
            Stage::Applying => "applying",
            Stage::InstallingTestPlugins => "installing_test_plugins",
            Stage::DetectingRuntimeImports => "detecting_runtime_imports",
            Stage::Executing => "executing",
            Stage::Done => "done",
        }
    }
}

/// Run one attempt against `issue` and report the verdict.
///
/// The working tree lives only for the duration of this call.
#[instrument(skip_all, fields(issue = %issue.id, gold = options.use_gold_patch))]
pub fn run_attempt<R: CommandRunner>(
    issue: &Issue,
    cfg: &SolverConfig,
    runner: &R,
    options: &AttemptOptions,
) -> Verdict {
    let mut attempt = Attempt {
        issue,
        cfg,
        runner,
        log: Vec::new(),
        cache: DependencyCache::new(),
        test_patch_applied: false,
    };
    let outcome = attempt.run(options);
    info!(success = outcome.ok, detail = %outcome.detail, "attempt finished");
    Verdict {
        success: outcome.ok,
        log: attempt.log,
    }
}

struct Attempt<'a, R: CommandRunner> {
    issue: &'a Issue,
    cfg: &'a SolverConfig,
    runner: &'a R,
    log: Vec<String>,
    cache: DependencyCache,
    test_patch_applied: bool,
}

impl<'a, R: CommandRunner> Attempt<'a, R> {
    fn run(&mut self, options: &AttemptOptions) -> StageOutcome {
        self.line(format!("Attempting: {}", self.issue.id));
        self.line(format!("Repo: {}", self.issue.repo));
        self.line(format!("Problem preview: {}...", self.issue.problem_preview()));

        let tree = match self.clone_tree() {
            Ok(tree) => tree,
            Err(outcome) => return outcome,
        };
        let root = tree.root();

        let profile = self.prepare_environment(root);

        let Some(patch) = self.select_patch(root, &profile, options) else {
            self.line("  ✗ No patch available");
            return StageOutcome::failed("no patch available");
        };

        let applied = self.apply_stage(&tree, &profile, &patch);
        if !applied.ok {
            return applied;
        }

        let tested = self.test_stage(root, &profile);
        if !tested.ok {
            return tested;
        }

        self.enter(Stage::Done);
        self.line("[6/6] Validation complete");
        StageOutcome::ok("validated")
    }

    fn enter(&self, stage: Stage) {
        info!(stage = stage.as_str(), "entering stage");
    }

    fn line(&mut self, text: impl Into<String>) {
        self.log.push(text.into());
    }

    fn resolver(&self) -> DependencyResolver<'a, R> {
        DependencyResolver::new(self.runner, self.cfg)
    }

    fn executor(&self) -> TestExecutor<'a, R> {
        TestExecutor::new(self.runner, self.cfg)
    }

    fn clone_tree(&mut self) -> Result<WorkingTree, StageOutcome> {
        self.enter(Stage::Cloning);
        self.line(format!(
            "[1/6] Cloning {} @ {}...",
            self.issue.repo,
            self.issue.short_commit()
        ));
        match WorkingTree::materialize(self.issue, self.cfg) {
            Ok(tree) => {
                self.line("  ✓ Clone successful");
                Ok(tree)
            }
            Err(err) => {
                warn!(err = %err, "clone failed");
                self.line(format!("  ✗ Clone failed: {err:#}"));
                Err(StageOutcome::failed("clone failed"))
            }
        }
    }

    /// Profile the tree and install what it declares. Never terminal.
    fn prepare_environment(&mut self, root: &Path) -> LanguageProfile {
        self.enter(Stage::Profiling);
        let profile = probe(root, self.issue.test_patch());
        self.line(format!(
            "[2/6] Detected language: {} (framework: {})",
            profile.language, profile.test_framework
        ));

        self.enter(Stage::InstallingDeps);
        self.line("  Installing dependencies...");
        let resolver = self.resolver();
        let resolution = resolver.resolve(root, &profile, &mut self.cache);
        if !resolution.deps.is_empty() {
            let names: Vec<&str> = resolution.deps.iter().map(String::as_str).collect();
            self.line(format!("  - Project deps: {}", preview_list(&names)));
        }
        self.line(format!("  - Install: {}", resolution.report.summary()));
        if profile.language == Language::Python {
            let report = resolver.install_project(root);
            self.line(format!("  - Project install: {}", report.summary()));
        }
        self.line("  ✓ Environment prepared");
        profile
    }

    /// The diff to apply, or `None` when neither a candidate nor a gold patch exists.
    fn select_patch(
        &mut self,
        root: &Path,
        profile: &LanguageProfile,
        options: &AttemptOptions,
    ) -> Option<String> {
        if options.use_gold_patch
            && let Some(gold) = self.issue.gold_patch()
        {
            self.line("[3/6] Using gold patch...");
            return Some(gold.to_string());
        }

        self.line("[3/6] Generating autonomous patch candidates...");
        self.enter(Stage::BaselineTesting);
        self.apply_test_patch(root);
        let baseline = self
            .executor()
            .run(root, profile, &[TestScope::FullSuite]);
        self.log_attempts(&baseline);

        self.enter(Stage::Classifying);
        let failures = if baseline.passed {
            self.line("  - Baseline suite passes; nothing to learn from");
            Vec::new()
        } else {
            let failures = classify(&baseline.stdout, &baseline.stderr);
            self.log_failures(&failures);
            failures
        };

        self.enter(Stage::CandidateGeneration);
        match candidates::generate(root, &failures) {
            Ok(found) if !found.is_empty() => {
                self.line(format!("  ✓ Generated {} candidate patch(es)", found.len()));
                let chosen = &found[0];
                self.line(format!(
                    "  - Using candidate for {} ({} confidence)",
                    chosen.target_file,
                    chosen.confidence.as_str()
                ));
                return Some(chosen.diff.clone());
            }
            Ok(_) => self.line("  ✗ No patches generated from failures"),
            Err(err) => {
                warn!(err = %err, "candidate generation failed");
                self.line(format!("  ✗ Candidate generation failed: {err:#}"));
            }
        }

        let gold = self.issue.gold_patch()?;
        self.line("  - Falling back to gold patch");
        Some(gold.to_string())
    }

    fn apply_stage(
        &mut self,
        tree: &WorkingTree,
        profile: &LanguageProfile,
        patch: &str,
    ) -> StageOutcome {
        let root = tree.root();
        self.enter(Stage::Applying);
        self.line("[4/6] Applying patch...");
        if !apply_patch(root, patch, self.cfg.patch_timeout()) {
            self.line("  ✗ Patch application failed");
            return StageOutcome::failed("patch did not apply");
        }
        match tree.git().status_porcelain() {
            Ok(entries) => self.line(format!("  ✓ Patch applied ({} file(s) changed)", entries.len())),
            Err(_) => self.line("  ✓ Patch applied"),
        }
        self.apply_test_patch(root);

        if profile.language == Language::Python {
            let resolver = self.resolver();

            self.enter(Stage::InstallingTestPlugins);
            let plugins = resolver.install_test_plugins(root, &mut self.cache);
            self.line(format!("  - Test plugins: {}", plugins.summary()));

            self.enter(Stage::DetectingRuntimeImports);
            let test_file = self.issue.test_patch().and_then(first_python_test_file);
            let imports = resolver.install_runtime_imports(root, test_file.as_deref());
            self.line(format!("  - Runtime imports: {}", imports.summary()));
        }
        StageOutcome::ok(format!("applied at {}", tree.base_commit()))
    }

    fn test_stage(&mut self, root: &Path, profile: &LanguageProfile) -> StageOutcome {
        self.enter(Stage::Executing);
        self.line("[5/6] Running tests...");
        self.line(format!("  Detected test framework: {}", profile.test_framework));
        let scopes = plan_scopes(self.issue.test_patch());
        let run = self.executor().run(root, profile, &scopes);
        self.log_attempts(&run);

        if run.vacuous {
            self.line(format!("  ! {}", run.stdout.trim()));
            self.line("  ✓ Tests passed (vacuously)");
            return StageOutcome::ok("vacuous pass");
        }
        if run.passed {
            self.line("  ✓ Tests passed");
            return StageOutcome::ok("tests passed");
        }
        self.line("  ✗ Tests failed");
        if run.attempts.is_empty() {
            let reason = run.stderr.trim();
            if !reason.is_empty() {
                self.line(format!("  - {reason}"));
            }
        }
        let failures = classify(&run.stdout, &run.stderr);
        self.log_failures(&failures);
        StageOutcome::failed("tests failed")
    }

    /// Apply the issue's test patch once per attempt. A rejection is not terminal.
    fn apply_test_patch(&mut self, root: &Path) {
        if self.test_patch_applied {
            return;
        }
        let Some(test_patch) = self.issue.test_patch() else {
            return;
        };
        self.test_patch_applied = true;
        if apply_patch(root, test_patch, self.cfg.patch_timeout()) {
            self.line("  ✓ Test patch applied");
        } else {
            warn!("test patch did not apply");
            self.line("  ! Test patch did not apply; continuing");
        }
    }

    fn log_attempts(&mut self, run: &TestRun) {
        for attempt in &run.attempts {
            let status = if attempt.passed {
                "passed"
            } else if attempt.timed_out {
                "timed out"
            } else {
                "failed"
            };
            self.line(format!(
                "  - {} scope {status}: {}",
                attempt.scope, attempt.command
            ));
        }
    }

    fn log_failures(&mut self, failures: &[FailureRecord]) {
        if failures.is_empty() {
            self.line("  - Failure cause not recognised");
            return;
        }
        for failure in failures {
            self.line(format!("  - {}: {}", failure.kind, failure.message));
        }
    }
}

/// First Python test file touched by `test_patch`.
fn first_python_test_file(test_patch: &str) -> Option<String> {
    extract_files(test_patch)
        .into_iter()
        .find(|file| file.ends_with(".py"))
}

/// Comma-joined names, truncated with a `(+N more)` suffix.
fn preview_list(names: &[&str]) -> String {
    let shown = names.iter().take(DEPS_PREVIEW).copied().collect::<Vec<_>>().join(", ");
    if names.len() > DEPS_PREVIEW {
        format!("{shown} (+{} more)", names.len() - DEPS_PREVIEW)
    } else {
        shown
    }
}
