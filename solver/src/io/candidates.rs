//! Patch candidate generation from classified failures.
//!
//! Only missing-import shapes are repaired: when a symbol the failure names is
//! defined at module level in exactly one non-test file, an import of it is
//! synthesized into the file the traceback points at.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use tracing::{debug, instrument, warn};

use crate::core::diff::insertion_diff;
use crate::core::types::{Confidence, FailureKind, FailureRecord, PatchCandidate};
use crate::io::probe::tree_files;
use crate::io::symbols;

static TRACEBACK_FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"File "([^"]+\.py)", line \d+"#).unwrap());
static LOCATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\w./\-]+\.py):\d+").unwrap());
static COLLECTING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ERROR collecting ([\w./\-]+\.py)").unwrap());

/// Top-level symbol name to the tree-relative files defining it.
type SymbolIndex = BTreeMap<String, BTreeSet<String>>;

/// Candidate fixes for `failures`, in failure order and de-duplicated.
///
/// An empty list means no safe fix was found.
#[instrument(skip_all, fields(root = %root.display(), failures = failures.len()))]
pub fn generate(root: &Path, failures: &[FailureRecord]) -> Result<Vec<PatchCandidate>> {
    let wanted: Vec<_> = failures.iter().filter_map(repair_target).collect();
    if wanted.is_empty() {
        return Ok(Vec::new());
    }
    let index = build_index(root);
    let mut candidates: Vec<PatchCandidate> = Vec::new();
    for (failure, symbol, confidence) in wanted {
        let Some(candidate) = candidate_for(root, &index, failure, symbol, confidence)? else {
            continue;
        };
        if !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    }
    debug!(count = candidates.len(), "generated candidates");
    Ok(candidates)
}

/// Symbol to import and the confidence of the fix, for repairable kinds.
fn repair_target(failure: &FailureRecord) -> Option<(&FailureRecord, &str, Confidence)> {
    let subject = failure.subject.as_deref()?;
    match failure.kind {
        FailureKind::ImportError => {
            let symbol = subject.rsplit('.').next().unwrap_or(subject);
            Some((failure, symbol, Confidence::High))
        }
        FailureKind::AttributeError => Some((failure, subject, Confidence::Medium)),
        FailureKind::AssertionError | FailureKind::TypeError => None,
    }
}

fn candidate_for(
    root: &Path,
    index: &SymbolIndex,
    failure: &FailureRecord,
    symbol: &str,
    confidence: Confidence,
) -> Result<Option<PatchCandidate>> {
    let Some(defining) = unique_definition(index, symbol) else {
        debug!(symbol, "no unique definition");
        return Ok(None);
    };
    let target = owner_file(root, failure)
        .filter(|path| path != defining)
        .or_else(|| referenced_file(root, &failure.context_excerpt, defining));
    let Some(target) = target else {
        debug!(symbol, "no target file");
        return Ok(None);
    };

    let import_line = format!("from {} import {symbol}", module_path(defining));
    let path = root.join(&target);
    let original = match fs::read_to_string(&path) {
        Ok(original) => original,
        Err(err) => {
            warn!(file = %target, err = %err, "cannot read target");
            return Ok(None);
        }
    };
    if original.lines().any(|line| line.trim() == import_line) {
        debug!(file = %target, import_line = %import_line, "import already present");
        return Ok(None);
    }
    let after = match symbols::import_block_end(&original) {
        Ok(after) => after,
        Err(err) => {
            warn!(file = %target, err = %err, "cannot parse target");
            return Ok(None);
        }
    };
    Ok(Some(PatchCandidate {
        diff: insertion_diff(&target, &original, after, &import_line),
        target_file: target,
        confidence,
    }))
}

fn unique_definition<'a>(index: &'a SymbolIndex, symbol: &str) -> Option<&'a String> {
    let files = index.get(symbol)?;
    if files.len() == 1 { files.iter().next() } else { None }
}

fn build_index(root: &Path) -> SymbolIndex {
    let mut index = SymbolIndex::new();
    for path in tree_files(root) {
        let Some(rel) = relative(root, &path) else {
            continue;
        };
        if !rel.ends_with(".py") || is_test_path(&rel) {
            continue;
        }
        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };
        match symbols::top_level_definitions(&content) {
            Ok(names) => {
                for name in names {
                    index.entry(name).or_default().insert(rel.clone());
                }
            }
            Err(err) => debug!(file = %rel, err = %err, "skip unparsable file"),
        }
    }
    index
}

fn relative(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    Some(rel.to_str()?.replace('\\', "/"))
}

/// Test modules and anything under test directories.
fn is_test_path(rel: &str) -> bool {
    let mut parts = rel.split('/').peekable();
    while let Some(part) = parts.next() {
        if parts.peek().is_none() {
            return part.starts_with("test_") || part.ends_with("_test.py") || part == "conftest.py";
        }
        if matches!(part, "test" | "tests" | "testing") {
            return true;
        }
    }
    false
}

/// Dotted module for a tree-relative Python path.
fn module_path(rel: &str) -> String {
    let trimmed = rel.strip_prefix("src/").unwrap_or(rel);
    let trimmed = trimmed.strip_suffix(".py").unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix("/__init__").unwrap_or(trimmed);
    trimmed.replace('/', ".")
}

/// File of the module a symbol was imported from, when it lives in the tree.
fn owner_file(root: &Path, failure: &FailureRecord) -> Option<String> {
    if failure.kind != FailureKind::ImportError {
        return None;
    }
    let module = failure.owner.as_deref()?.replace('.', "/");
    [
        format!("{module}.py"),
        format!("{module}/__init__.py"),
        format!("src/{module}.py"),
        format!("src/{module}/__init__.py"),
    ]
    .into_iter()
    .find(|rel| root.join(rel).is_file())
}

/// Last Python file named in `excerpt` that exists in the tree and is not `exclude`.
fn referenced_file(root: &Path, excerpt: &str, exclude: &str) -> Option<String> {
    let mut mentions: Vec<(usize, &str)> = [&*TRACEBACK_FILE_RE, &*LOCATION_RE, &*COLLECTING_RE]
        .iter()
        .flat_map(|re| re.captures_iter(excerpt))
        .filter_map(|caps| caps.get(1).map(|m| (m.start(), m.as_str())))
        .collect();
    mentions.sort_by_key(|(pos, _)| *pos);
    mentions.into_iter().rev().find_map(|(_, raw)| {
        let path = Path::new(raw);
        let rel = if path.is_absolute() {
            relative(root, path)?
        } else {
            raw.trim_start_matches("./").to_string()
        };
        (rel != exclude && root.join(&rel).is_file()).then_some(rel)
    })
}
