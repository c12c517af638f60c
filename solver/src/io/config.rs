//! Solver configuration stored as TOML.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::TestScope;

/// Solver configuration (TOML).
///
/// Missing fields default to the values the pipeline was tuned with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SolverConfig {
    pub clone_timeout_secs: u64,
    pub checkout_timeout_secs: u64,
    /// Bound for both the `git apply --check` dry run and the real apply.
    pub patch_timeout_secs: u64,
    /// Per-package installer timeout.
    pub install_timeout_secs: u64,
    /// Whole-project installs (`npm install`, `go mod download`, editable pip install).
    pub project_install_timeout_secs: u64,
    /// `pytest --collect-only` used to detect runtime imports.
    pub collect_timeout_secs: u64,

    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    pub scope_timeouts: ScopeTimeouts,

    /// Treat a framework whose entry program is absent as a passing run.
    pub vacuous_pass_on_missing_toolchain: bool,

    /// Interpreter used for pip and pytest.
    pub python_program: String,

    /// Packages always installed for Python trees.
    pub baseline_python_packages: Vec<String>,

    /// Plugins installed alongside pytest when missing.
    pub default_pytest_plugins: Vec<String>,

    /// Run `pip install -e .` when the tree has Python packaging metadata.
    pub install_project_editable: bool,

    /// Clone URL; `{repo}` is replaced with the issue's `owner/name`.
    pub clone_url_template: String,

    /// Parent directory for ephemeral working trees (system temp dir when unset).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_dir: Option<PathBuf>,
}

/// Escalating per-scope timeouts, each clamped to `cap_secs`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScopeTimeouts {
    pub function_secs: u64,
    pub file_secs: u64,
    pub full_suite_secs: u64,
    pub cap_secs: u64,
}

impl Default for ScopeTimeouts {
    fn default() -> Self {
        Self {
            function_secs: 120,
            file_secs: 300,
            full_suite_secs: 600,
            cap_secs: 900,
        }
    }
}

impl ScopeTimeouts {
    pub fn for_scope(&self, scope: &TestScope) -> Duration {
        let secs = match scope {
            TestScope::FunctionLevel { .. } => self.function_secs,
            TestScope::FileLevel { .. } => self.file_secs,
            TestScope::FullSuite => self.full_suite_secs,
        };
        Duration::from_secs(secs.min(self.cap_secs))
    }
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            clone_timeout_secs: 120,
            checkout_timeout_secs: 30,
            patch_timeout_secs: 30,
            install_timeout_secs: 60,
            project_install_timeout_secs: 120,
            collect_timeout_secs: 30,
            output_limit_bytes: 100_000,
            scope_timeouts: ScopeTimeouts::default(),
            vacuous_pass_on_missing_toolchain: true,
            python_program: "python".to_string(),
            baseline_python_packages: vec!["pytest".to_string()],
            default_pytest_plugins: [
                "pytest-cov",
                "pytest-xdist",
                "pytest-bdd",
                "pytest-benchmark",
                "pytest-instafail",
                "pytest-mock",
                "pytest-rerunfailures",
                "pytest-timeout",
                "pytest-asyncio",
                "pytest-qt",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            install_project_editable: true,
            clone_url_template: "https://github.com/{repo}.git".to_string(),
            workspace_dir: None,
        }
    }
}

impl SolverConfig {
    pub fn validate(&self) -> Result<()> {
        let timeouts = [
            ("clone_timeout_secs", self.clone_timeout_secs),
            ("checkout_timeout_secs", self.checkout_timeout_secs),
            ("patch_timeout_secs", self.patch_timeout_secs),
            ("install_timeout_secs", self.install_timeout_secs),
            ("project_install_timeout_secs", self.project_install_timeout_secs),
            ("collect_timeout_secs", self.collect_timeout_secs),
            ("scope_timeouts.function_secs", self.scope_timeouts.function_secs),
            ("scope_timeouts.file_secs", self.scope_timeouts.file_secs),
            ("scope_timeouts.full_suite_secs", self.scope_timeouts.full_suite_secs),
            ("scope_timeouts.cap_secs", self.scope_timeouts.cap_secs),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(anyhow!("{name} must be > 0"));
            }
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.python_program.trim().is_empty() {
            return Err(anyhow!("python_program must be non-empty"));
        }
        if !self.clone_url_template.contains("{repo}") {
            return Err(anyhow!("clone_url_template must contain {{repo}}"));
        }
        Ok(())
    }

    pub fn clone_url(&self, repo: &str) -> String {
        self.clone_url_template.replace("{repo}", repo)
    }

    pub fn clone_timeout(&self) -> Duration {
        Duration::from_secs(self.clone_timeout_secs)
    }

    pub fn checkout_timeout(&self) -> Duration {
        Duration::from_secs(self.checkout_timeout_secs)
    }

    pub fn patch_timeout(&self) -> Duration {
        Duration::from_secs(self.patch_timeout_secs)
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }

    pub fn project_install_timeout(&self) -> Duration {
        Duration::from_secs(self.project_install_timeout_secs)
    }

    pub fn collect_timeout(&self) -> Duration {
        Duration::from_secs(self.collect_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `SolverConfig::default()`.
pub fn load_config(path: &Path) -> Result<SolverConfig> {
    if !path.exists() {
        let cfg = SolverConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: SolverConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &SolverConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, SolverConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("solver.toml");
        let cfg = SolverConfig {
            workspace_dir: Some(temp.path().join("work")),
            ..SolverConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("solver.toml");
        fs::write(&path, "python_program = \"python3\"\n[scope_timeouts]\ncap_secs = 200\n")
            .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.python_program, "python3");
        assert_eq!(cfg.clone_timeout_secs, 120);
        assert_eq!(
            cfg.scope_timeouts.for_scope(&TestScope::FullSuite),
            Duration::from_secs(200)
        );
        assert_eq!(
            cfg.scope_timeouts.for_scope(&TestScope::FileLevel { files: vec![] }),
            Duration::from_secs(200)
        );
    }

    #[test]
    fn rejects_zero_timeouts_and_bad_template() {
        let cfg = SolverConfig {
            patch_timeout_secs: 0,
            ..SolverConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = SolverConfig {
            clone_url_template: "https://example.com/repo.git".to_string(),
            ..SolverConfig::default()
        };
        let err = cfg.validate().expect_err("template without placeholder");
        assert!(err.to_string().contains("{repo}"));
    }

    #[test]
    fn clone_url_substitutes_repo() {
        let cfg = SolverConfig::default();
        assert_eq!(
            cfg.clone_url("psf/requests"),
            "https://github.com/psf/requests.git"
        );
    }

    #[test]
    fn scope_timeouts_escalate() {
        let timeouts = ScopeTimeouts::default();
        let function = timeouts.for_scope(&TestScope::FunctionLevel {
            file: "t.py".to_string(),
            functions: vec!["test_a".to_string()],
        });
        let file = timeouts.for_scope(&TestScope::FileLevel { files: vec![] });
        let full = timeouts.for_scope(&TestScope::FullSuite);
        assert!(function < file && file < full);
    }
}
