//! Failure classification over raw test-run output.
//!
//! Signatures are matched independently; one run may yield several records.
//! An empty result means "cause unknown", never success.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{FailureKind, FailureRecord};

const EXCERPT_LINES_BEFORE: usize = 20;
const EXCERPT_LINES_AFTER: usize = 2;
const EXCERPT_MAX_BYTES: usize = 2_000;

static NO_MODULE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"No module named ['"]([^'"]+)['"]"#).unwrap());
static CANNOT_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"cannot import name ['"]([^'"]+)['"](?: from ['"]([^'"]+)['"])?"#).unwrap()
});
static MISSING_PLUGIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Missing required plugins:\s*(\S+)").unwrap());
static ATTRIBUTE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"AttributeError: (?:module |type object )?'([^']+)'(?: object)? has no attribute '([^']+)'",
    )
    .unwrap()
});
static MODULE_NOT_FOUND_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ModuleNotFoundError[^\n']*'([^']+)'").unwrap());
static TYPE_ERROR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"TypeError: ([^\n]+)").unwrap());

/// Join stderr and stdout the way the classifier expects them.
pub fn combine_output(stdout: &str, stderr: &str) -> String {
    format!("{stderr}\n{stdout}")
}

/// Classify a failed run's output.
pub fn classify(stdout: &str, stderr: &str) -> Vec<FailureRecord> {
    classify_text(&combine_output(stdout, stderr))
}

/// Classify already-combined output.
pub fn classify_text(combined: &str) -> Vec<FailureRecord> {
    let mut records = Vec::new();
    classify_imports(combined, &mut records);
    classify_attributes(combined, &mut records);

    if let Some(pos) = combined.find("AssertionError") {
        records.push(FailureRecord {
            kind: FailureKind::AssertionError,
            message: "Test assertion failed".to_string(),
            subject: None,
            owner: None,
            context_excerpt: excerpt(combined, pos),
        });
    }

    if let Some(caps) = TYPE_ERROR_RE.captures(combined) {
        let whole = caps.get(0).map_or(0, |m| m.start());
        records.push(FailureRecord {
            kind: FailureKind::TypeError,
            message: caps[1].trim().to_string(),
            subject: None,
            owner: None,
            context_excerpt: excerpt(combined, whole),
        });
    }
    records
}

/// Top-level names of every module reported missing in `text`.
pub fn missing_top_level_modules(text: &str) -> BTreeSet<String> {
    NO_MODULE_RE
        .captures_iter(text)
        .chain(MODULE_NOT_FOUND_RE.captures_iter(text))
        .filter_map(|caps| caps[1].split('.').next().map(str::to_string))
        .filter(|name| !name.is_empty())
        .collect()
}

fn classify_imports(combined: &str, records: &mut Vec<FailureRecord>) {
    let mut matched = false;

    if let Some(caps) = NO_MODULE_RE.captures(combined) {
        let module = caps[1].to_string();
        records.push(FailureRecord {
            kind: FailureKind::ImportError,
            message: format!("Missing module: {module}"),
            subject: Some(module),
            owner: None,
            context_excerpt: excerpt(combined, match_start(&caps)),
        });
        matched = true;
    }

    if let Some(caps) = CANNOT_IMPORT_RE.captures(combined) {
        let symbol = caps[1].to_string();
        let source = caps.get(2).map(|m| m.as_str().to_string());
        let message = match &source {
            Some(module) => format!("Missing symbol: {symbol} (from {module})"),
            None => format!("Missing symbol: {symbol}"),
        };
        records.push(FailureRecord {
            kind: FailureKind::ImportError,
            message,
            subject: Some(symbol),
            owner: source,
            context_excerpt: excerpt(combined, match_start(&caps)),
        });
        matched = true;
    }

    if let Some(caps) = MISSING_PLUGIN_RE.captures(combined) {
        let plugin = caps[1].trim_end_matches(',').to_string();
        records.push(FailureRecord {
            kind: FailureKind::ImportError,
            message: format!("Missing pytest plugin: {plugin}"),
            subject: Some(plugin),
            owner: None,
            context_excerpt: excerpt(combined, match_start(&caps)),
        });
        matched = true;
    }

    if !matched {
        let generic = ["ModuleNotFoundError", "ImportError"]
            .iter()
            .filter_map(|needle| combined.find(needle))
            .min();
        if let Some(pos) = generic {
            records.push(FailureRecord {
                kind: FailureKind::ImportError,
                message: "Import/module error detected".to_string(),
                subject: None,
                owner: None,
                context_excerpt: excerpt(combined, pos),
            });
        }
    }
}

fn classify_attributes(combined: &str, records: &mut Vec<FailureRecord>) {
    if let Some(caps) = ATTRIBUTE_RE.captures(combined) {
        let owner = caps[1].to_string();
        let attribute = caps[2].to_string();
        records.push(FailureRecord {
            kind: FailureKind::AttributeError,
            message: format!("{owner}.{attribute}"),
            subject: Some(attribute),
            owner: Some(owner),
            context_excerpt: excerpt(combined, match_start(&caps)),
        });
    } else if let Some(pos) = combined.find("AttributeError") {
        records.push(FailureRecord {
            kind: FailureKind::AttributeError,
            message: "AttributeError detected".to_string(),
            subject: None,
            owner: None,
            context_excerpt: excerpt(combined, pos),
        });
    }
}

fn match_start(caps: &regex::Captures<'_>) -> usize {
    caps.get(0).map_or(0, |m| m.start())
}

/// Lines surrounding byte offset `pos`, bounded in size.
fn excerpt(text: &str, pos: usize) -> String {
    let line_index = text[..pos.min(text.len())].matches('\n').count();
    let lines: Vec<&str> = text.lines().collect();
    let start = line_index.saturating_sub(EXCERPT_LINES_BEFORE);
    let end = (line_index + EXCERPT_LINES_AFTER + 1).min(lines.len());
    let window = lines.get(start..end).unwrap_or_default().join("\n");
    if window.len() <= EXCERPT_MAX_BYTES {
        return window;
    }
    // Keep the tail: the matched line sits at the end of the window.
    let mut cut = window.len() - EXCERPT_MAX_BYTES;
    while !window.is_char_boundary(cut) {
        cut += 1;
    }
    window[cut..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_not_found_yields_single_import_error() {
        let records = classify("", "ModuleNotFoundError: No module named 'foo'");
        let imports: Vec<_> = records
            .iter()
            .filter(|r| r.kind == FailureKind::ImportError)
            .collect();
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].subject.as_deref(), Some("foo"));
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn missing_plugin_is_tagged_import_error() {
        let records = classify_text("ERROR: Missing required plugins: pytest-qt");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, FailureKind::ImportError);
        assert_eq!(records[0].subject.as_deref(), Some("pytest-qt"));
    }

    #[test]
    fn cannot_import_name_captures_symbol_and_source() {
        let records =
            classify_text("ImportError: cannot import name 'parse_args' from 'tool.cli' (x.py)");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].subject.as_deref(), Some("parse_args"));
        assert_eq!(records[0].owner.as_deref(), Some("tool.cli"));
    }

    #[test]
    fn signatures_co_occur() {
        let output = "E   AttributeError: 'Config' object has no attribute 'timeout'\n\
                      E   AssertionError: expected 3\n\
                      E   TypeError: add() missing 1 required positional argument: 'b'\n";
        let records = classify(output, "");
        let kinds: Vec<_> = records.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                FailureKind::AttributeError,
                FailureKind::AssertionError,
                FailureKind::TypeError,
            ]
        );
        assert_eq!(records[0].owner.as_deref(), Some("Config"));
        assert_eq!(records[0].subject.as_deref(), Some("timeout"));
        assert_eq!(
            records[2].message,
            "add() missing 1 required positional argument: 'b'"
        );
    }

    #[test]
    fn module_attribute_error_is_captured() {
        let records = classify_text("AttributeError: module 'utils' has no attribute 'slugify'");
        assert_eq!(records[0].owner.as_deref(), Some("utils"));
        assert_eq!(records[0].subject.as_deref(), Some("slugify"));
    }

    #[test]
    fn generic_import_error_without_capture() {
        let records = classify_text("ImportError while importing test module");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].subject, None);
    }

    #[test]
    fn unknown_output_yields_nothing() {
        assert!(classify("1 failed in 0.1s", "").is_empty());
        assert!(classify("", "").is_empty());
    }

    #[test]
    fn missing_modules_are_reduced_to_top_level() {
        let output = "E   ModuleNotFoundError: No module named 'six.moves'\n\
                      E   ModuleNotFoundError: No module named \"yaml\"\n\
                      ImportError: No module named 'six'\n";
        let modules: Vec<_> = missing_top_level_modules(output).into_iter().collect();
        assert_eq!(modules, vec!["six".to_string(), "yaml".to_string()]);
    }

    #[test]
    fn excerpt_keeps_preceding_traceback() {
        let mut output = String::new();
        for i in 0..30 {
            output.push_str(&format!("line {i}\n"));
        }
        output.push_str("  File \"pkg/app.py\", line 3, in <module>\n");
        output.push_str("ModuleNotFoundError: No module named 'helpers'\n");
        let records = classify_text(&output);
        let excerpt = &records[0].context_excerpt;
        assert!(excerpt.contains("File \"pkg/app.py\""));
        assert!(!excerpt.contains("line 0\n"));
    }
}
