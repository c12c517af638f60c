//! Shared deterministic types for the resolution pipeline.
//!
//! These types define stable contracts between components. They carry no I/O
//! handles and serialize to stable snake_case names for CLI output.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Primary language of a working tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Python,
    Javascript,
    Go,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Javascript => "javascript",
            Language::Go => "go",
        }
    }

    /// Framework used when neither the test patch nor the project configuration says otherwise.
    pub fn default_framework(self) -> TestFramework {
        match self {
            Language::Python => TestFramework::Pytest,
            Language::Javascript => TestFramework::Jest,
            Language::Go => TestFramework::Go,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Test runner used to execute a tree's suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestFramework {
    Pytest,
    Jest,
    Mocha,
    Vitest,
    Go,
    IntegrationYaml,
    ShellScript,
}

impl TestFramework {
    pub fn as_str(self) -> &'static str {
        match self {
            TestFramework::Pytest => "pytest",
            TestFramework::Jest => "jest",
            TestFramework::Mocha => "mocha",
            TestFramework::Vitest => "vitest",
            TestFramework::Go => "go",
            TestFramework::IntegrationYaml => "integration_yaml",
            TestFramework::ShellScript => "shell_script",
        }
    }

    /// True when the framework can drive a suite written in `language`.
    pub fn supports(self, language: Language) -> bool {
        match self {
            TestFramework::Pytest | TestFramework::ShellScript => language == Language::Python,
            TestFramework::Jest | TestFramework::Mocha | TestFramework::Vitest => {
                language == Language::Javascript
            }
            TestFramework::Go => language == Language::Go,
            TestFramework::IntegrationYaml => true,
        }
    }
}

impl fmt::Display for TestFramework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Language and framework resolved once per working tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageProfile {
    pub language: Language,
    pub test_framework: TestFramework,
}

impl LanguageProfile {
    pub fn new(language: Language, test_framework: TestFramework) -> Self {
        Self {
            language,
            test_framework,
        }
    }
}

/// Granularity at which tests are executed, narrowest first.
///
/// `FunctionLevel` is only built when `functions` is non-empty and `file` is a
/// discovered test file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum TestScope {
    FunctionLevel { file: String, functions: Vec<String> },
    FileLevel { files: Vec<String> },
    FullSuite,
}

impl TestScope {
    pub fn label(&self) -> &'static str {
        match self {
            TestScope::FunctionLevel { .. } => "function",
            TestScope::FileLevel { .. } => "file",
            TestScope::FullSuite => "full_suite",
        }
    }
}

/// Failure cause recognized in test output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ImportError,
    AttributeError,
    AssertionError,
    TypeError,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::ImportError => "import_error",
            FailureKind::AttributeError => "attribute_error",
            FailureKind::AssertionError => "assertion_error",
            FailureKind::TypeError => "type_error",
        };
        f.write_str(name)
    }
}

/// One classified failure signature from a failed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub kind: FailureKind,
    pub message: String,
    /// Captured module, symbol, plugin or attribute name.
    pub subject: Option<String>,
    /// Attribute owner, or the module a symbol was imported from.
    pub owner: Option<String>,
    pub context_excerpt: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(self) -> &'static str {
        match self {
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }
}

/// Synthesized corrective diff for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchCandidate {
    pub target_file: String,
    pub diff: String,
    pub confidence: Confidence,
}

/// Result of a single orchestrator stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutcome {
    pub ok: bool,
    pub detail: String,
}

impl StageOutcome {
    pub fn ok(detail: impl Into<String>) -> Self {
        Self {
            ok: true,
            detail: detail.into(),
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: detail.into(),
        }
    }
}

/// The only externally observable result of one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub success: bool,
    pub log: Vec<String>,
}

impl Verdict {
    pub fn render_log(&self) -> String {
        self.log.join("\n")
    }
}
