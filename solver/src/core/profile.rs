//! Deterministic language and test-framework decision rules.
//!
//! The filesystem walk lives in `io::probe`; this module only ranks the
//! signals it collected.

use crate::core::types::{Language, LanguageProfile, TestFramework};

/// Fixed resolution order used for markers and count ties.
const PRIORITY: [Language; 3] = [Language::Go, Language::Javascript, Language::Python];

/// Ecosystem marker files found at the tree root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Markers {
    pub go_mod: bool,
    pub package_json: bool,
    /// `setup.py` or `pyproject.toml`.
    pub python_packaging: bool,
}

impl Markers {
    fn has(&self, language: Language) -> bool {
        match language {
            Language::Go => self.go_mod,
            Language::Javascript => self.package_json,
            Language::Python => self.python_packaging,
        }
    }
}

/// Source file counts by language.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceCounts {
    pub python: usize,
    pub javascript: usize,
    pub go: usize,
}

impl SourceCounts {
    fn get(&self, language: Language) -> usize {
        match language {
            Language::Python => self.python,
            Language::Javascript => self.javascript,
            Language::Go => self.go,
        }
    }
}

/// Project configuration signals that can name a framework.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectSignals {
    /// `scripts.test` from `package.json`.
    pub npm_test_script: Option<String>,
    pub has_jest_config: bool,
    pub has_vitest_config: bool,
    pub has_mocharc: bool,
    /// `pytest.ini`, `setup.cfg` or `tox.ini` present.
    pub has_pytest_config: bool,
    pub has_run_tests_sh: bool,
}

/// Pick the primary language.
///
/// Any marker outranks raw counts. Without markers the strictly largest count
/// wins; ties and empty trees fall back to the fixed order, then Python.
pub fn resolve_language(markers: Markers, counts: SourceCounts) -> Language {
    if let Some(language) = PRIORITY.iter().copied().find(|lang| markers.has(*lang)) {
        return language;
    }
    let best = PRIORITY
        .iter()
        .map(|lang| counts.get(*lang))
        .max()
        .unwrap_or(0);
    if best == 0 {
        return Language::Python;
    }
    PRIORITY
        .iter()
        .copied()
        .find(|lang| counts.get(*lang) == best)
        .unwrap_or(Language::Python)
}

/// Every framework the test patch hints at, strongest hint first.
pub fn patch_hints(test_patch: &str) -> Vec<TestFramework> {
    const JEST_HINTS: [&str; 5] = [".test.js", ".spec.js", ".test.ts", ".spec.ts", "jest.config"];
    let lower = test_patch.to_lowercase();
    let mut hints = Vec::new();
    if test_patch.contains("test/integration")
        && (test_patch.contains(".yml") || test_patch.contains(".yaml"))
    {
        hints.push(TestFramework::IntegrationYaml);
    }
    if lower.contains("vitest") {
        hints.push(TestFramework::Vitest);
    }
    if lower.contains("mocha") {
        hints.push(TestFramework::Mocha);
    }
    if JEST_HINTS.iter().any(|hint| test_patch.contains(hint)) {
        hints.push(TestFramework::Jest);
    }
    if test_patch.contains("_test.go") {
        hints.push(TestFramework::Go);
    }
    if lower.contains("pytest") || test_patch.contains("test_") {
        hints.push(TestFramework::Pytest);
    }
    hints
}

/// Framework declared by project configuration for `language`, if any.
pub fn framework_from_project(language: Language, signals: &ProjectSignals) -> Option<TestFramework> {
    match language {
        Language::Javascript => {
            if let Some(script) = &signals.npm_test_script {
                if script.contains("jest") {
                    return Some(TestFramework::Jest);
                }
                if script.contains("mocha") {
                    return Some(TestFramework::Mocha);
                }
                if script.contains("vitest") {
                    return Some(TestFramework::Vitest);
                }
            }
            if signals.has_vitest_config {
                Some(TestFramework::Vitest)
            } else if signals.has_jest_config {
                Some(TestFramework::Jest)
            } else if signals.has_mocharc {
                Some(TestFramework::Mocha)
            } else {
                None
            }
        }
        Language::Python => {
            if !signals.has_pytest_config && signals.has_run_tests_sh {
                Some(TestFramework::ShellScript)
            } else {
                None
            }
        }
        Language::Go => None,
    }
}

/// Layer patch hints, project configuration and the language default.
pub fn resolve_profile(
    language: Language,
    test_patch: Option<&str>,
    signals: &ProjectSignals,
) -> LanguageProfile {
    let from_patch = test_patch.and_then(|patch| {
        patch_hints(patch)
            .into_iter()
            .find(|framework| framework.supports(language))
    });
    let framework = from_patch
        .or_else(|| framework_from_project(language, signals))
        .unwrap_or_else(|| language.default_framework());
    LanguageProfile::new(language, framework)
}
