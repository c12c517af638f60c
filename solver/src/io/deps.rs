//! Dependency resolution and installation.
//!
//! Discovery is cached per tree for the lifetime of one attempt; installation
//! is always attempted. Installer failures are collected, never raised.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::core::classifier::missing_top_level_modules;
use crate::core::packages::{DependencySet, canonical_name, is_pytest_plugin};
use crate::core::types::{Language, LanguageProfile};
use crate::io::config::SolverConfig;
use crate::io::manifests;
use crate::io::runner::{CommandRunner, Invocation};

const PIP_INSTALL_FLAGS: [&str; 5] = [
    "-m",
    "pip",
    "install",
    "--quiet",
    "--disable-pip-version-check",
];

/// Discovered dependency sets keyed by tree root, scoped to one attempt.
#[derive(Debug, Default)]
pub struct DependencyCache {
    entries: BTreeMap<PathBuf, DependencySet>,
}

impl DependencyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, root: &Path) -> Option<&DependencySet> {
        self.entries.get(root)
    }

    pub fn insert(&mut self, root: &Path, deps: DependencySet) {
        self.entries.insert(root.to_path_buf(), deps);
    }
}

/// What an install step tried and how it went.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub installed: Vec<String>,
    pub failed: Vec<String>,
    /// Set when the step did nothing, with the reason.
    pub skipped: Option<String>,
}

impl InstallReport {
    fn skipped(reason: impl Into<String>) -> Self {
        Self {
            skipped: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn summary(&self) -> String {
        if let Some(reason) = &self.skipped {
            return format!("skipped: {reason}");
        }
        let mut text = format!("{} installed", self.installed.len());
        if !self.failed.is_empty() {
            text.push_str(&format!(", {} failed ({})", self.failed.len(), self.failed.join(", ")));
        }
        text
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub deps: DependencySet,
    pub from_cache: bool,
    pub report: InstallReport,
}

#[derive(Debug, Deserialize)]
struct PipListEntry {
    name: String,
}

pub struct DependencyResolver<'a, R: CommandRunner> {
    runner: &'a R,
    cfg: &'a SolverConfig,
}

impl<'a, R: CommandRunner> DependencyResolver<'a, R> {
    pub fn new(runner: &'a R, cfg: &'a SolverConfig) -> Self {
        Self { runner, cfg }
    }

    /// Discover (or reuse) the tree's dependency set and install what is missing.
    #[instrument(skip_all, fields(root = %root.display(), language = %profile.language))]
    pub fn resolve(
        &self,
        root: &Path,
        profile: &LanguageProfile,
        cache: &mut DependencyCache,
    ) -> Resolution {
        let (deps, from_cache) = match cache.get(root) {
            Some(deps) => (deps.clone(), true),
            None => {
                let deps = manifests::discover(root, profile.language);
                cache.insert(root, deps.clone());
                (deps, false)
            }
        };
        debug!(count = deps.len(), from_cache, "dependency set ready");

        let report = match profile.language {
            Language::Python => {
                let mut wanted: DependencySet = self
                    .cfg
                    .baseline_python_packages
                    .iter()
                    .map(|name| canonical_name(name))
                    .collect();
                wanted.extend(deps.iter().cloned());
                self.install_python_packages(root, &wanted)
            }
            Language::Javascript => self.install_node_modules(root, &deps),
            Language::Go => self.download_go_modules(root),
        };
        info!(summary = %report.summary(), "dependency install finished");
        Resolution {
            deps,
            from_cache,
            report,
        }
    }

    /// Editable install of the project itself when it has packaging metadata.
    #[instrument(skip_all)]
    pub fn install_project(&self, root: &Path) -> InstallReport {
        if !self.cfg.install_project_editable {
            return InstallReport::skipped("editable install disabled");
        }
        if !root.join("setup.py").is_file() && !root.join("pyproject.toml").is_file() {
            return InstallReport::skipped("no packaging metadata");
        }
        let python = &self.cfg.python_program;
        if !self.runner.has_program(python) {
            return InstallReport::skipped(format!("{python} not found"));
        }
        let mut args: Vec<&str> = PIP_INSTALL_FLAGS.to_vec();
        args.extend(["-e", "."]);
        let inv = Invocation::new(python, args, root, self.cfg.project_install_timeout());
        let mut report = InstallReport::default();
        if self.succeeds(&inv) {
            report.installed.push(".".to_string());
        } else {
            report.failed.push(".".to_string());
        }
        report
    }

    /// Install pytest plugins the project declares plus the configured defaults.
    #[instrument(skip_all)]
    pub fn install_test_plugins(&self, root: &Path, cache: &mut DependencyCache) -> InstallReport {
        let deps = match cache.get(root) {
            Some(deps) => deps.clone(),
            None => {
                let deps = manifests::discover(root, Language::Python);
                cache.insert(root, deps.clone());
                deps
            }
        };
        let mut plugins: DependencySet = deps
            .into_iter()
            .filter(|name| is_pytest_plugin(name))
            .collect();
        plugins.extend(manifests::pytest_plugins(root));
        plugins.extend(
            self.cfg
                .default_pytest_plugins
                .iter()
                .map(|name| canonical_name(name)),
        );
        debug!(count = plugins.len(), "pytest plugins wanted");
        self.install_python_packages(root, &plugins)
    }

    /// Collect tests once and install top-level modules reported missing.
    ///
    /// Modules that exist inside the tree, and `test`/`tests`, are never installed.
    #[instrument(skip_all, fields(collect = test_file.unwrap_or("test/")))]
    pub fn install_runtime_imports(&self, root: &Path, test_file: Option<&str>) -> InstallReport {
        let python = &self.cfg.python_program;
        if !self.runner.has_program(python) {
            return InstallReport::skipped(format!("{python} not found"));
        }
        let target = test_file.unwrap_or("test/");
        let inv = Invocation::new(
            python,
            ["-m", "pytest", "--collect-only", "-q", target],
            root,
            self.cfg.collect_timeout(),
        );
        let output = match self.runner.run(&inv) {
            Ok(output) => output,
            Err(err) => {
                warn!(err = %err, "collect-only failed to start");
                return InstallReport::skipped("collection did not start");
            }
        };
        let combined = format!("{}\n{}", output.stderr, output.stdout);
        let missing: BTreeSet<String> = missing_top_level_modules(&combined)
            .into_iter()
            .filter(|module| !is_internal_module(root, module))
            .collect();
        if missing.is_empty() {
            return InstallReport::skipped("no missing imports");
        }
        info!(?missing, "installing runtime imports");
        let mut report = InstallReport::default();
        for module in missing {
            let mut args: Vec<&str> = PIP_INSTALL_FLAGS.to_vec();
            args.push(&module);
            let inv = Invocation::new(python, args, root, self.cfg.install_timeout());
            if self.succeeds(&inv) {
                report.installed.push(module);
            } else {
                report.failed.push(module);
            }
        }
        report
    }

    /// Canonical names of installed Python distributions, from one static registry query.
    fn installed_python_packages(&self, root: &Path) -> BTreeSet<String> {
        let inv = Invocation::new(
            &self.cfg.python_program,
            ["-m", "pip", "list", "--format=json", "--disable-pip-version-check"],
            root,
            self.cfg.install_timeout(),
        );
        let output = match self.runner.run(&inv) {
            Ok(output) if output.passed() => output,
            Ok(_) | Err(_) => {
                warn!("pip list failed, assuming nothing installed");
                return BTreeSet::new();
            }
        };
        match serde_json::from_str::<Vec<PipListEntry>>(output.stdout.trim()) {
            Ok(entries) => entries
                .into_iter()
                .map(|entry| canonical_name(&entry.name))
                .collect(),
            Err(err) => {
                warn!(err = %err, "unparseable pip list output");
                BTreeSet::new()
            }
        }
    }

    fn install_python_packages(&self, root: &Path, wanted: &DependencySet) -> InstallReport {
        let python = &self.cfg.python_program;
        if !self.runner.has_program(python) {
            warn!(python = %python, "python not found, skipping installs");
            return InstallReport::skipped(format!("{python} not found"));
        }
        let installed = self.installed_python_packages(root);
        let missing: Vec<&String> = wanted.iter().filter(|name| !installed.contains(*name)).collect();
        if missing.is_empty() {
            return InstallReport::skipped("all packages already installed");
        }
        let mut report = InstallReport::default();
        for package in missing {
            let mut args: Vec<&str> = PIP_INSTALL_FLAGS.to_vec();
            args.push(package);
            let inv = Invocation::new(python, args, root, self.cfg.install_timeout());
            if self.succeeds(&inv) {
                report.installed.push(package.clone());
            } else {
                warn!(package = %package, "package install failed");
                report.failed.push(package.clone());
            }
        }
        report
    }

    fn install_node_modules(&self, root: &Path, deps: &DependencySet) -> InstallReport {
        if !root.join("package.json").is_file() {
            return InstallReport::skipped("no package.json");
        }
        let all_present = deps.iter().all(|name| {
            root.join("node_modules")
                .join(name)
                .join("package.json")
                .is_file()
        });
        if all_present {
            return InstallReport::skipped("node_modules up to date");
        }
        if !self.runner.has_program("npm") {
            warn!("npm not found, skipping install");
            return InstallReport::skipped("npm not found");
        }
        let timeout = self.cfg.project_install_timeout();
        let mut report = InstallReport::default();
        let primary = Invocation::new("npm", ["install", "--legacy-peer-deps"], root, timeout);
        if self.succeeds(&primary) {
            report.installed.push("npm install".to_string());
            return report;
        }
        let fallback = Invocation::new("npm", ["install", "--force"], root, timeout);
        if self.succeeds(&fallback) {
            report.installed.push("npm install --force".to_string());
        } else {
            report.failed.push("npm install".to_string());
        }
        report
    }

    fn download_go_modules(&self, root: &Path) -> InstallReport {
        if !root.join("go.mod").is_file() {
            return InstallReport::skipped("no go.mod");
        }
        if !self.runner.has_program("go") {
            warn!("go not found, skipping module download");
            return InstallReport::skipped("go not found");
        }
        let inv = Invocation::new(
            "go",
            ["mod", "download"],
            root,
            self.cfg.project_install_timeout(),
        )
        .env("GO111MODULE", "on");
        let mut report = InstallReport::default();
        if self.succeeds(&inv) {
            report.installed.push("go mod download".to_string());
        } else {
            report.failed.push("go mod download".to_string());
        }
        report
    }

    fn succeeds(&self, inv: &Invocation) -> bool {
        match self.runner.run(inv) {
            Ok(output) => {
                if !output.passed() {
                    debug!(command = %inv, exit_code = ?output.exit_code, timed_out = output.timed_out, "installer failed");
                }
                output.passed()
            }
            Err(err) => {
                warn!(command = %inv, err = %err, "installer did not start");
                false
            }
        }
    }
}

/// True when `module` is provided by the tree itself.
fn is_internal_module(root: &Path, module: &str) -> bool {
    if matches!(module, "test" | "tests") {
        return true;
    }
    [root.to_path_buf(), root.join("src"), root.join("lib")]
        .iter()
        .any(|base| base.join(module).is_dir() || base.join(format!("{module}.py")).is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TestFramework;
    use crate::test_support::{ScriptedRunner, TestTree, failing, passing};

    fn python_profile() -> LanguageProfile {
        LanguageProfile::new(Language::Python, TestFramework::Pytest)
    }

    #[test]
    fn installs_only_missing_python_packages() {
        let tree = TestTree::new();
        tree.write("requirements.txt", "requests\nSix\n");
        let runner = ScriptedRunner::new().respond(
            "pip list",
            passing(r#"[{"name":"pytest","version":"8.0"},{"name":"six","version":"1.16"}]"#),
        );
        let cfg = SolverConfig::default();
        let resolver = DependencyResolver::new(&runner, &cfg);
        let mut cache = DependencyCache::new();

        let resolution = resolver.resolve(tree.path(), &python_profile(), &mut cache);
        assert!(!resolution.from_cache);
        assert_eq!(resolution.report.installed, vec!["requests".to_string()]);
        assert_eq!(runner.count("pip install"), 1);
        assert_eq!(runner.count("pip list"), 1);
    }

    #[test]
    fn cache_hit_skips_discovery_not_installation() {
        let tree = TestTree::new();
        tree.write("requirements.txt", "requests\n");
        let runner = ScriptedRunner::new();
        let cfg = SolverConfig::default();
        let resolver = DependencyResolver::new(&runner, &cfg);
        let mut cache = DependencyCache::new();

        let first = resolver.resolve(tree.path(), &python_profile(), &mut cache);
        tree.write("requirements.txt", "requests\nflask\n");
        let second = resolver.resolve(tree.path(), &python_profile(), &mut cache);

        assert!(second.from_cache);
        assert_eq!(first.deps, second.deps);
        assert!(!second.deps.contains("flask"));
        assert_eq!(runner.count("pip list"), 2);
    }

    #[test]
    fn install_failures_are_collected() {
        let tree = TestTree::new();
        tree.write("requirements.txt", "broken-pkg\n");
        let runner = ScriptedRunner::new()
            .respond("pip list", passing("[]"))
            .respond("install --quiet --disable-pip-version-check broken-pkg", failing(""));
        let cfg = SolverConfig::default();
        let resolver = DependencyResolver::new(&runner, &cfg);
        let resolution = resolver.resolve(tree.path(), &python_profile(), &mut DependencyCache::new());
        assert_eq!(resolution.report.failed, vec!["broken-pkg".to_string()]);
        assert_eq!(resolution.report.installed, vec!["pytest".to_string()]);
    }

    #[test]
    fn missing_python_is_not_fatal() {
        let tree = TestTree::new();
        let runner = ScriptedRunner::new().without_program("python");
        let cfg = SolverConfig::default();
        let resolver = DependencyResolver::new(&runner, &cfg);
        let resolution = resolver.resolve(tree.path(), &python_profile(), &mut DependencyCache::new());
        assert!(resolution.report.skipped.is_some());
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn npm_falls_back_to_force() {
        let tree = TestTree::new();
        tree.write("package.json", r#"{"devDependencies":{"jest":"^29"}}"#);
        let runner = ScriptedRunner::new().respond("--legacy-peer-deps", failing("ERESOLVE"));
        let cfg = SolverConfig::default();
        let resolver = DependencyResolver::new(&runner, &cfg);
        let profile = LanguageProfile::new(Language::Javascript, TestFramework::Jest);
        let resolution = resolver.resolve(tree.path(), &profile, &mut DependencyCache::new());
        assert_eq!(
            runner.command_lines(),
            vec!["npm install --legacy-peer-deps", "npm install --force"]
        );
        assert_eq!(resolution.report.installed, vec!["npm install --force".to_string()]);
    }

    #[test]
    fn npm_skipped_when_node_modules_complete() {
        let tree = TestTree::new();
        tree.write("package.json", r#"{"devDependencies":{"jest":"^29"}}"#);
        tree.write("node_modules/jest/package.json", "{}");
        let runner = ScriptedRunner::new();
        let cfg = SolverConfig::default();
        let resolver = DependencyResolver::new(&runner, &cfg);
        let profile = LanguageProfile::new(Language::Javascript, TestFramework::Jest);
        resolver.resolve(tree.path(), &profile, &mut DependencyCache::new());
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn go_download_sets_module_mode() {
        let tree = TestTree::new();
        tree.write("go.mod", "module x\n");
        let runner = ScriptedRunner::new();
        let cfg = SolverConfig::default();
        let resolver = DependencyResolver::new(&runner, &cfg);
        let profile = LanguageProfile::new(Language::Go, TestFramework::Go);
        resolver.resolve(tree.path(), &profile, &mut DependencyCache::new());
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].command_line(), "go mod download");
        assert!(calls[0].envs.contains(&("GO111MODULE".to_string(), "on".to_string())));
    }

    #[test]
    fn runtime_imports_skip_tree_modules() {
        let tree = TestTree::new();
        tree.write("mypkg/__init__.py", "");
        let runner = ScriptedRunner::new()
            .respond(
                "--collect-only",
                failing("E   ModuleNotFoundError: No module named 'mypkg.sub'\nE   ModuleNotFoundError: No module named 'yaml'\nNo module named 'tests.helpers'\n"),
            );
        let cfg = SolverConfig::default();
        let resolver = DependencyResolver::new(&runner, &cfg);
        let report = resolver.install_runtime_imports(tree.path(), Some("tests/test_a.py"));
        assert_eq!(report.installed, vec!["yaml".to_string()]);
        assert!(runner.command_lines()[0].ends_with("--collect-only -q tests/test_a.py"));
    }

    #[test]
    fn test_plugins_include_declared_and_defaults() {
        let tree = TestTree::new();
        tree.write("requirements-test.txt", "pytest-django\nrequests\n");
        let runner = ScriptedRunner::new();
        let cfg = SolverConfig {
            default_pytest_plugins: vec!["pytest-mock".to_string()],
            ..SolverConfig::default()
        };
        let resolver = DependencyResolver::new(&runner, &cfg);
        let report = resolver.install_test_plugins(tree.path(), &mut DependencyCache::new());
        assert_eq!(
            report.installed,
            vec!["pytest-django".to_string(), "pytest-mock".to_string()]
        );
    }

    #[test]
    fn editable_install_needs_packaging_metadata() {
        let tree = TestTree::new();
        let runner = ScriptedRunner::new();
        let cfg = SolverConfig::default();
        let resolver = DependencyResolver::new(&runner, &cfg);
        assert!(resolver.install_project(tree.path()).skipped.is_some());

        tree.write("pyproject.toml", "[project]\nname = \"x\"\n");
        let report = resolver.install_project(tree.path());
        assert_eq!(report.installed, vec![".".to_string()]);
        assert!(runner.command_lines()[0].ends_with("-e ."));
    }
}
