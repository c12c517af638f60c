//! Issue file parsing and validation.
//!
//! An issue is either a single JSON object or one line of a JSON Lines file.
//! Dataset exports spell some fields differently (`instance_id`, `patch`);
//! both spellings are accepted.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};

/// Immutable description of one attempt's input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Issue {
    #[serde(alias = "instance_id")]
    pub id: String,
    /// `owner/name` of the upstream repository.
    pub repo: String,
    #[serde(default)]
    pub problem_statement: String,
    pub base_commit: String,
    #[serde(default, alias = "patch")]
    pub gold_patch: Option<String>,
    #[serde(default)]
    pub test_patch: Option<String>,
}

impl Issue {
    /// Load an issue from `path`.
    ///
    /// `.jsonl` files are read line by line and `index` selects the record
    /// (zero based, blank lines skipped). Any other file must hold one object
    /// and `index` must be 0.
    pub fn load(path: &Path, index: usize) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read issue {}", path.display()))?;
        let is_jsonl = path.extension().and_then(|ext| ext.to_str()) == Some("jsonl");
        let issue = if is_jsonl {
            Self::parse_jsonl(&contents, index)
        } else if index == 0 {
            Self::parse_str(&contents)
        } else {
            Err(anyhow!("index {index} requires a .jsonl issue file"))
        };
        issue.with_context(|| format!("load issue {}", path.display()))
    }

    pub fn parse_str(contents: &str) -> Result<Self> {
        let issue: Issue = serde_json::from_str(contents).context("parse issue json")?;
        issue.validate()?;
        Ok(issue)
    }

    fn parse_jsonl(contents: &str, index: usize) -> Result<Self> {
        let records: Vec<&str> = contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .collect();
        let line = records.get(index).ok_or_else(|| {
            anyhow!(
                "issue index {index} out of range ({} records)",
                records.len()
            )
        })?;
        Self::parse_str(line).with_context(|| format!("record {index}"))
    }

    fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            bail!("issue.id must be non-empty");
        }
        let repo_ok = self
            .repo
            .split_once('/')
            .is_some_and(|(owner, name)| !owner.is_empty() && !name.is_empty());
        if !repo_ok || self.repo.contains("..") || self.repo.contains(char::is_whitespace) {
            bail!("issue.repo must look like owner/name (got '{}')", self.repo);
        }
        if self.base_commit.trim().is_empty() {
            bail!("issue.base_commit must be non-empty");
        }
        Ok(())
    }

    /// Gold patch when present and non-blank.
    pub fn gold_patch(&self) -> Option<&str> {
        non_blank(self.gold_patch.as_deref())
    }

    /// Test patch when present and non-blank.
    pub fn test_patch(&self) -> Option<&str> {
        non_blank(self.test_patch.as_deref())
    }

    /// First 200 characters of the problem statement.
    pub fn problem_preview(&self) -> String {
        self.problem_statement.chars().take(200).collect()
    }

    /// Abbreviated base commit for log lines.
    pub fn short_commit(&self) -> &str {
        let end = self
            .base_commit
            .char_indices()
            .nth(8)
            .map_or(self.base_commit.len(), |(idx, _)| idx);
        &self.base_commit[..end]
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|text| !text.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DATASET_RECORD: &str = r#"{"instance_id":"psf__requests-1","repo":"psf/requests","problem_statement":"Session drops headers","base_commit":"0123456789abcdef","patch":"diff --git a/x b/x\n","test_patch":"","created_at":"2024-01-01"}"#;

    #[test]
    fn accepts_dataset_spelling() {
        let issue = Issue::parse_str(DATASET_RECORD).expect("parse");
        assert_eq!(issue.id, "psf__requests-1");
        assert_eq!(issue.gold_patch(), Some("diff --git a/x b/x\n"));
        assert_eq!(issue.test_patch(), None);
        assert_eq!(issue.short_commit(), "01234567");
    }

    #[test]
    fn rejects_bad_repo() {
        let err = Issue::parse_str(r#"{"id":"a","repo":"requests","base_commit":"abc"}"#)
            .expect_err("repo without owner");
        assert!(err.to_string().contains("owner/name"));
    }

    #[test]
    fn loads_jsonl_by_index() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("issues.jsonl");
        let second = DATASET_RECORD.replace("psf__requests-1", "psf__requests-2");
        fs::write(&path, format!("{DATASET_RECORD}\n\n{second}\n")).expect("write");

        let issue = Issue::load(&path, 1).expect("load");
        assert_eq!(issue.id, "psf__requests-2");

        let err = Issue::load(&path, 2).expect_err("out of range");
        assert!(format!("{err:#}").contains("out of range"));
    }

    #[test]
    fn single_object_rejects_nonzero_index() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("issue.json");
        fs::write(&path, DATASET_RECORD).expect("write");
        assert!(Issue::load(&path, 0).is_ok());
        assert!(Issue::load(&path, 3).is_err());
    }

    #[test]
    fn preview_is_bounded() {
        let mut issue = Issue::parse_str(DATASET_RECORD).expect("parse");
        issue.problem_statement = "é".repeat(500);
        assert_eq!(issue.problem_preview().chars().count(), 200);
    }
}
