//! Test scope extraction from unified diffs.
//!
//! Works purely on diff text. An empty result is never an error: callers fall
//! through to the next broader scope.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::TestScope;

const TEST_EXTENSIONS: [&str; 8] = ["py", "js", "jsx", "ts", "tsx", "go", "yml", "yaml"];

static PY_TEST_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"def\s+(test_\w+)").unwrap());
static JS_QUOTED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:test|it|describe)\s*\(\s*['"]([^'"]+)['"]"#).unwrap()
});
static JS_BACKTICK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:test|it|describe)\s*\(\s*`([^`]+)`").unwrap());
static GO_TEST_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"func\s+(Test\w+)").unwrap());

/// One file section of a diff.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FileSection<'a> {
    path: String,
    deleted: bool,
    in_hunk: bool,
    added_lines: Vec<&'a str>,
}

/// Test files touched by `diff`, sorted and de-duplicated.
pub fn extract_files(diff: &str) -> Vec<String> {
    let files: BTreeSet<String> = sections(diff)
        .into_iter()
        .filter(|section| !section.deleted && is_test_file(&section.path))
        .map(|section| section.path)
        .collect();
    files.into_iter().collect()
}

/// Test function identifiers added per test file.
///
/// Only added lines are scanned; files without any match are omitted.
pub fn extract_functions(diff: &str) -> BTreeMap<String, Vec<String>> {
    let mut functions: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for section in sections(diff) {
        if section.deleted || !is_test_file(&section.path) {
            continue;
        }
        let names = functions.entry(section.path.clone()).or_default();
        for line in &section.added_lines {
            for name in declared_tests(&section.path, line) {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
    }
    functions.retain(|_, names| !names.is_empty());
    functions
}

/// Ordered escalation plan: function-level entries, then file level, then the full suite.
pub fn plan_scopes(test_patch: Option<&str>) -> Vec<TestScope> {
    let mut plan = Vec::new();
    if let Some(diff) = test_patch {
        let files = extract_files(diff);
        for (file, functions) in extract_functions(diff) {
            if files.contains(&file) {
                plan.push(TestScope::FunctionLevel { file, functions });
            }
        }
        if !files.is_empty() {
            plan.push(TestScope::FileLevel { files });
        }
    }
    plan.push(TestScope::FullSuite);
    plan
}

/// True when `path` names a test source the executor knows how to target.
pub fn is_test_file(path: &str) -> bool {
    if !path.to_lowercase().contains("test") {
        return false;
    }
    extension(path).is_some_and(|ext| TEST_EXTENSIONS.contains(&ext))
}

fn extension(path: &str) -> Option<&str> {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.rsplit_once('.').map(|(_, ext)| ext)
}

fn declared_tests(path: &str, line: &str) -> Vec<String> {
    match extension(path) {
        Some("py") => PY_TEST_RE
            .captures_iter(line)
            .map(|caps| caps[1].to_string())
            .collect(),
        Some("js" | "jsx" | "ts" | "tsx") => JS_QUOTED_RE
            .captures_iter(line)
            .chain(JS_BACKTICK_RE.captures_iter(line))
            .map(|caps| caps[1].to_string())
            .collect(),
        Some("go") => GO_TEST_RE
            .captures_iter(line)
            .map(|caps| caps[1].to_string())
            .collect(),
        _ => Vec::new(),
    }
}

fn sections(diff: &str) -> Vec<FileSection<'_>> {
    let mut out: Vec<FileSection<'_>> = Vec::new();
    for line in diff.lines() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            if let Some(path) = target_path(rest) {
                out.push(FileSection {
                    path,
                    deleted: false,
                    in_hunk: false,
                    added_lines: Vec::new(),
                });
            }
            continue;
        }
        let Some(current) = out.last_mut() else {
            continue;
        };
        if line.starts_with("@@") {
            current.in_hunk = true;
            continue;
        }
        // `+++` is a file header only before the first hunk.
        if !current.in_hunk && line.starts_with("+++") {
            if line.trim_end() == "+++ /dev/null" {
                current.deleted = true;
            }
            continue;
        }
        if let Some(added) = line.strip_prefix('+') {
            current.added_lines.push(added);
        }
    }
    out
}

/// Extract the `b/` path from the remainder of a `diff --git` header.
fn target_path(header: &str) -> Option<String> {
    let (_, path) = header.rsplit_once(" b/")?;
    let path = path.trim();
    if path.is_empty() {
        None
    } else {
        Some(path.to_string())
    }
}
