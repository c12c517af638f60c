//! Environment probing: walk a working tree and resolve its language profile.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, instrument};
use walkdir::WalkDir;

use crate::core::profile::{self, Markers, ProjectSignals, SourceCounts};
use crate::core::types::LanguageProfile;

const IGNORED_DIRS: [&str; 10] = [
    ".git",
    "node_modules",
    "vendor",
    "__pycache__",
    ".pytest_cache",
    ".mypy_cache",
    ".tox",
    ".venv",
    "venv",
    "site-packages",
];

/// Regular files under `root`, skipping VCS, dependency and cache directories.
///
/// Unreadable entries are ignored.
pub fn tree_files(root: &Path) -> impl Iterator<Item = PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_ignored(entry.path()))
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
}

fn is_ignored(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| IGNORED_DIRS.contains(&name))
}

/// Count source files by language.
pub fn count_sources(root: &Path) -> SourceCounts {
    let mut counts = SourceCounts::default();
    for path in tree_files(root) {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("py") => counts.python += 1,
            Some("js" | "jsx" | "ts" | "tsx") => counts.javascript += 1,
            Some("go") => counts.go += 1,
            _ => {}
        }
    }
    counts
}

pub fn detect_markers(root: &Path) -> Markers {
    Markers {
        go_mod: root.join("go.mod").is_file(),
        package_json: root.join("package.json").is_file(),
        python_packaging: root.join("setup.py").is_file() || root.join("pyproject.toml").is_file(),
    }
}

/// Configuration signals that can name a test framework.
pub fn project_signals(root: &Path) -> ProjectSignals {
    let root_names: Vec<String> = fs::read_dir(root)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    let has_prefix = |prefix: &str| root_names.iter().any(|name| name.starts_with(prefix));
    let has_file = |name: &str| root.join(name).is_file();

    ProjectSignals {
        npm_test_script: npm_test_script(root),
        has_jest_config: has_prefix("jest.config."),
        has_vitest_config: has_prefix("vitest.config."),
        has_mocharc: has_prefix(".mocharc"),
        has_pytest_config: has_file("pytest.ini") || has_file("setup.cfg") || has_file("tox.ini"),
        has_run_tests_sh: has_file("run_tests.sh"),
    }
}

/// `scripts.test` from the root `package.json`, if readable.
pub fn npm_test_script(root: &Path) -> Option<String> {
    let manifest = read_package_json(root)?;
    manifest
        .get("scripts")?
        .get("test")?
        .as_str()
        .map(str::to_string)
}

pub(crate) fn read_package_json(root: &Path) -> Option<Value> {
    let contents = fs::read_to_string(root.join("package.json")).ok()?;
    serde_json::from_str(&contents).ok()
}

/// Resolve the language profile of `root`. Never fails.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn probe(root: &Path, test_patch: Option<&str>) -> LanguageProfile {
    let markers = detect_markers(root);
    let counts = count_sources(root);
    let language = profile::resolve_language(markers, counts);
    let signals = project_signals(root);
    let resolved = profile::resolve_profile(language, test_patch, &signals);
    debug!(
        ?markers,
        ?counts,
        language = %resolved.language,
        framework = %resolved.test_framework,
        "probed tree"
    );
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Language, TestFramework};
    use crate::test_support::TestTree;

    #[test]
    fn go_mod_wins_over_many_python_files() {
        let tree = TestTree::new();
        tree.write("go.mod", "module example.com/x\n");
        tree.write("main.go", "package main\n");
        for i in 0..5 {
            tree.write(&format!("scripts/tool_{i}.py"), "print(1)\n");
        }
        let profile = probe(tree.path(), None);
        assert_eq!(profile.language, Language::Go);
        assert_eq!(profile.test_framework, TestFramework::Go);
    }

    #[test]
    fn ignores_dependency_directories() {
        let tree = TestTree::new();
        tree.write("app.py", "x = 1\n");
        tree.write("node_modules/a/index.js", "");
        tree.write("node_modules/b/index.js", "");
        let counts = count_sources(tree.path());
        assert_eq!(counts.python, 1);
        assert_eq!(counts.javascript, 0);
    }

    #[test]
    fn reads_npm_test_script() {
        let tree = TestTree::new();
        tree.write(
            "package.json",
            r#"{"name":"x","scripts":{"test":"mocha --recursive"}}"#,
        );
        tree.write("lib/index.js", "module.exports = 1;\n");
        let profile = probe(tree.path(), None);
        assert_eq!(profile.language, Language::Javascript);
        assert_eq!(profile.test_framework, TestFramework::Mocha);
    }

    #[test]
    fn malformed_package_json_is_ignored() {
        let tree = TestTree::new();
        tree.write("package.json", "{ not json");
        assert_eq!(npm_test_script(tree.path()), None);
        let profile = probe(tree.path(), None);
        assert_eq!(profile.test_framework, TestFramework::Jest);
    }

    #[test]
    fn vitest_config_file_is_detected() {
        let tree = TestTree::new();
        tree.write("package.json", "{}");
        tree.write("vitest.config.ts", "export default {}\n");
        assert!(project_signals(tree.path()).has_vitest_config);
        assert_eq!(
            probe(tree.path(), None).test_framework,
            TestFramework::Vitest
        );
    }

    #[test]
    fn test_patch_hint_selects_integration_yaml() {
        let tree = TestTree::new();
        tree.write("setup.py", "from setuptools import setup\nsetup()\n");
        let patch = "diff --git a/test/integration/targets/x/tasks/main.yml b/test/integration/targets/x/tasks/main.yml\n";
        let profile = probe(tree.path(), Some(patch));
        assert_eq!(profile.language, Language::Python);
        assert_eq!(profile.test_framework, TestFramework::IntegrationYaml);
    }
}
