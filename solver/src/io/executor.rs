//! Test execution with progressive scope escalation.
//!
//! Scopes are tried narrowest first and execution stops at the first passing
//! scope. The full suite runs at most once per call.

use std::collections::BTreeSet;
use std::path::Path;

use tracing::{debug, info, instrument, warn};

use crate::core::types::{LanguageProfile, TestFramework, TestScope};
use crate::io::config::SolverConfig;
use crate::io::probe::tree_files;
use crate::io::runner::{CommandRunner, Invocation, RunOutput};

const PYTHON_SUITE_ROOTS: [&str; 3] = ["test", "tests", "src/tests"];
const JS_SUITE_ROOTS: [&str; 3] = ["test", "tests", "__tests__"];

/// One executed scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeAttempt {
    pub scope: &'static str,
    pub command: String,
    pub passed: bool,
    pub timed_out: bool,
}

/// Outcome of [`TestExecutor::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestRun {
    pub passed: bool,
    /// Passed only because the toolchain is absent.
    pub vacuous: bool,
    /// Output of the last executed invocation.
    pub stdout: String,
    pub stderr: String,
    pub attempts: Vec<ScopeAttempt>,
}

impl TestRun {
    fn vacuous(reason: String) -> Self {
        Self {
            passed: true,
            vacuous: true,
            stdout: reason,
            ..Self::default()
        }
    }

    fn missing_toolchain(reason: String) -> Self {
        Self {
            passed: false,
            stderr: reason,
            ..Self::default()
        }
    }
}

pub struct TestExecutor<'a, R: CommandRunner> {
    runner: &'a R,
    cfg: &'a SolverConfig,
}

impl<'a, R: CommandRunner> TestExecutor<'a, R> {
    pub fn new(runner: &'a R, cfg: &'a SolverConfig) -> Self {
        Self { runner, cfg }
    }

    /// Run `scopes` in order until one passes.
    #[instrument(skip_all, fields(root = %root.display(), framework = %profile.test_framework, scopes = scopes.len()))]
    pub fn run(&self, root: &Path, profile: &LanguageProfile, scopes: &[TestScope]) -> TestRun {
        let framework = profile.test_framework;
        if framework == TestFramework::IntegrationYaml {
            return self.run_integration(root);
        }

        let program = self.entry_program(framework);
        if !self.runner.has_program(&program) {
            return self.toolchain_missing(&program, framework);
        }

        let mut run = TestRun::default();
        let mut full_suite_done = false;
        for scope in scopes {
            if matches!(scope, TestScope::FullSuite) {
                if full_suite_done {
                    continue;
                }
                full_suite_done = true;
            }
            let Some(invocation) = self.invocation(root, framework, scope) else {
                debug!(scope = scope.label(), "no invocation for scope");
                continue;
            };
            let output = self.execute(&invocation);
            let passed = output.passed();
            info!(scope = scope.label(), passed, command = %invocation, "scope finished");
            run.attempts.push(ScopeAttempt {
                scope: scope.label(),
                command: invocation.command_line(),
                passed,
                timed_out: output.timed_out,
            });
            run.stdout = output.stdout;
            run.stderr = output.stderr;
            if passed {
                run.passed = true;
                return run;
            }
        }
        run
    }

    fn entry_program(&self, framework: TestFramework) -> String {
        match framework {
            TestFramework::Pytest | TestFramework::IntegrationYaml => self.cfg.python_program.clone(),
            TestFramework::Jest | TestFramework::Mocha | TestFramework::Vitest => "npx".to_string(),
            TestFramework::Go => "go".to_string(),
            TestFramework::ShellScript => "bash".to_string(),
        }
    }

    fn toolchain_missing(&self, program: &str, framework: TestFramework) -> TestRun {
        let reason = format!("{program} not found on PATH; {framework} tests not run");
        if self.cfg.vacuous_pass_on_missing_toolchain {
            warn!(program, %framework, "toolchain missing, treating run as vacuous pass");
            TestRun::vacuous(reason)
        } else {
            warn!(program, %framework, "toolchain missing");
            TestRun::missing_toolchain(reason)
        }
    }

    fn execute(&self, invocation: &Invocation) -> RunOutput {
        match self.runner.run(invocation) {
            Ok(output) => {
                if output.timed_out {
                    warn!(command = %invocation, "test run timed out");
                }
                output
            }
            Err(err) => {
                warn!(command = %invocation, err = %err, "test run did not start");
                RunOutput {
                    exit_code: None,
                    stderr: format!("{err:#}"),
                    ..RunOutput::default()
                }
            }
        }
    }

    /// Command for `scope`, or `None` when the framework has no such granularity.
    pub fn invocation(
        &self,
        root: &Path,
        framework: TestFramework,
        scope: &TestScope,
    ) -> Option<Invocation> {
        let timeout = self.cfg.scope_timeouts.for_scope(scope);
        let python = self.cfg.python_program.as_str();
        let inv = |program: &str, args: Vec<String>| Invocation::new(program, args, root, timeout);

        let invocation = match (framework, scope) {
            (TestFramework::Pytest, TestScope::FunctionLevel { file, functions }) => {
                let mut args = to_args(&["-m", "pytest", "-xvs", "-k"]);
                args.push(functions.join(" or "));
                args.push(file.clone());
                inv(python, args)
            }
            (TestFramework::Pytest, TestScope::FileLevel { files }) => {
                let mut args = to_args(&["-m", "pytest", "-xvs"]);
                args.extend(files.iter().cloned());
                inv(python, args)
            }
            (TestFramework::Pytest, TestScope::FullSuite) => {
                let mut args = to_args(&["-m", "pytest", "-xvs", "--tb=short"]);
                args.extend(suite_root(root, &PYTHON_SUITE_ROOTS, is_python_test_file));
                inv(python, args)
            }

            (TestFramework::Jest, TestScope::FunctionLevel { file, functions }) => {
                let args = vec!["jest".to_string(), file.clone(), "-t".to_string(), name_pattern(functions)];
                inv("npx", args)
            }
            (TestFramework::Vitest, TestScope::FunctionLevel { file, functions }) => {
                let mut args = to_args(&["vitest", "run"]);
                args.extend([file.clone(), "-t".to_string(), name_pattern(functions)]);
                inv("npx", args)
            }
            (TestFramework::Mocha, TestScope::FunctionLevel { file, functions }) => {
                let args = vec!["mocha".to_string(), file.clone(), "--grep".to_string(), name_pattern(functions)];
                inv("npx", args)
            }
            (TestFramework::Jest | TestFramework::Vitest | TestFramework::Mocha, TestScope::FileLevel { files }) => {
                let mut args = js_base_args(framework);
                args.extend(files.iter().cloned());
                inv("npx", args)
            }
            (TestFramework::Jest | TestFramework::Vitest | TestFramework::Mocha, TestScope::FullSuite) => {
                let mut args = js_base_args(framework);
                if framework == TestFramework::Mocha {
                    args.push("--recursive".to_string());
                }
                args.extend(suite_root(root, &JS_SUITE_ROOTS, is_js_source));
                inv("npx", args)
            }

            (TestFramework::Go, TestScope::FunctionLevel { file, functions }) => {
                let pattern = format!("^({})$", functions.join("|"));
                let args = vec!["test".to_string(), "-run".to_string(), pattern, go_package(file)];
                inv("go", args).env("GO111MODULE", "on")
            }
            (TestFramework::Go, TestScope::FileLevel { files }) => {
                let packages: BTreeSet<String> = files.iter().map(|file| go_package(file)).collect();
                let mut args = vec!["test".to_string()];
                args.extend(packages);
                inv("go", args).env("GO111MODULE", "on")
            }
            (TestFramework::Go, TestScope::FullSuite) => {
                inv("go", to_args(&["test", "./..."])).env("GO111MODULE", "on")
            }

            (TestFramework::ShellScript, TestScope::FullSuite) => {
                inv("bash", to_args(&["run_tests.sh"]))
            }
            (TestFramework::ShellScript | TestFramework::IntegrationYaml, _) => return None,
        };
        Some(invocation)
    }

    /// `ansible-test` when available, degrading to pytest over `test/integration`.
    fn run_integration(&self, root: &Path) -> TestRun {
        let timeout = self.cfg.scope_timeouts.for_scope(&TestScope::FullSuite);
        let python = self.cfg.python_program.as_str();
        let mut candidates = Vec::new();
        if self.runner.has_program("ansible-test") {
            candidates.push(Invocation::new(
                "ansible-test",
                ["integration", "--docker", "default", "-vv"],
                root,
                timeout,
            ));
        }
        if self.runner.has_program(python) {
            candidates.push(Invocation::new(
                python,
                ["-m", "pytest", "-xvs", "test/integration"],
                root,
                timeout,
            ));
        }
        if candidates.is_empty() {
            return self.toolchain_missing("ansible-test", TestFramework::IntegrationYaml);
        }

        let mut run = TestRun::default();
        for invocation in candidates {
            let output = self.execute(&invocation);
            let passed = output.passed();
            info!(passed, command = %invocation, "integration run finished");
            run.attempts.push(ScopeAttempt {
                scope: TestScope::FullSuite.label(),
                command: invocation.command_line(),
                passed,
                timed_out: output.timed_out,
            });
            run.stdout = output.stdout;
            run.stderr = output.stderr;
            if passed {
                run.passed = true;
                break;
            }
        }
        run
    }
}

fn to_args(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

fn js_base_args(framework: TestFramework) -> Vec<String> {
    match framework {
        TestFramework::Vitest => vec!["vitest".to_string(), "run".to_string()],
        TestFramework::Mocha => vec!["mocha".to_string()],
        _ => vec!["jest".to_string()],
    }
}

/// Alternation of regex-escaped test names for `-t`/`--grep`.
fn name_pattern(names: &[String]) -> String {
    let escaped: Vec<String> = names.iter().map(|name| regex::escape(name)).collect();
    format!("({})", escaped.join("|"))
}

/// `./dir` package path for a Go test file.
fn go_package(file: &str) -> String {
    match file.rsplit_once('/') {
        Some((dir, _)) if !dir.is_empty() => format!("./{dir}"),
        _ => ".".to_string(),
    }
}

fn is_python_test_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "py")
        && path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.contains("test"))
}

fn is_js_source(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| matches!(ext, "js" | "ts" | "jsx" | "tsx"))
}

/// First conventional test root that contains a matching file.
fn suite_root(root: &Path, candidates: &[&str], wanted: fn(&Path) -> bool) -> Option<String> {
    candidates
        .iter()
        .find(|dir| {
            let path = root.join(dir);
            path.is_dir() && tree_files(&path).any(|file| wanted(&file))
        })
        .map(|dir| format!("{dir}/"))
}
