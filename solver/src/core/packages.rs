//! Package-name canonicalisation and manifest line parsing.
//!
//! Everything here is text in, names out. Reading the files is `io::manifests`'s job.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

static PLUGIN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"pytest-[\w\-]+").unwrap());
static SEPARATOR_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[-_.]+").unwrap());

/// Deduplicated canonical package names discovered for one tree.
pub type DependencySet = BTreeSet<String>;

/// Strip extras, markers and version specifiers from a requirement string.
///
/// Returns `None` for comments, options (`-r`, `-e`, `--index-url`), URLs and
/// blank input.
pub fn requirement_name(raw: &str) -> Option<String> {
    let line = raw.split('#').next().unwrap_or_default().trim();
    if line.is_empty() || line.starts_with('-') || line.contains("://") {
        return None;
    }
    let end = line
        .find(|ch: char| matches!(ch, '<' | '>' | '=' | '!' | '~' | '[' | ';' | '@' | ' ' | '(' | ','))
        .unwrap_or(line.len());
    let name = line[..end].trim().trim_matches(|ch| ch == '"' || ch == '\'');
    if name.is_empty() || !name.chars().all(|ch| ch.is_ascii_alphanumeric() || "-_.".contains(ch)) {
        return None;
    }
    Some(name.to_string())
}

/// Canonical form used for set membership: lowercase, separator runs collapsed to `-`.
pub fn canonical_name(name: &str) -> String {
    SEPARATOR_RUN_RE
        .replace_all(&name.trim().to_lowercase(), "-")
        .into_owned()
}

/// Canonical requirement name, or `None` when the line declares nothing.
pub fn canonical_requirement(raw: &str) -> Option<String> {
    requirement_name(raw).map(|name| canonical_name(&name))
}

/// Parse a requirements file body.
pub fn parse_requirements(contents: &str) -> DependencySet {
    contents.lines().filter_map(canonical_requirement).collect()
}

/// `pytest-*` plugin names mentioned anywhere in `text`.
pub fn plugin_names(text: &str) -> DependencySet {
    PLUGIN_RE
        .find_iter(text)
        .map(|m| canonical_name(m.as_str()))
        .collect()
}

/// True for pytest plugin packages.
pub fn is_pytest_plugin(name: &str) -> bool {
    name.to_lowercase().contains("pytest")
}

/// Minimal INI reader sufficient for `setup.cfg`, `tox.ini` and `pytest.ini`.
///
/// Returns `(section, key, value)` triples; continuation lines are appended to
/// the previous value separated by newlines.
pub fn ini_entries(contents: &str) -> Vec<(String, String, String)> {
    let mut entries: Vec<(String, String, String)> = Vec::new();
    let mut section = String::new();
    for raw in contents.lines() {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }
        if trimmed.starts_with('[') && trimmed.ends_with(']') {
            section = trimmed[1..trimmed.len() - 1].trim().to_string();
            continue;
        }
        let continuation = raw.starts_with(' ') || raw.starts_with('\t');
        if continuation && let Some(last) = entries.last_mut() {
            last.2.push('\n');
            last.2.push_str(trimmed);
            continue;
        }
        if let Some((key, value)) = trimmed.split_once('=') {
            entries.push((
                section.clone(),
                key.trim().to_string(),
                value.trim().to_string(),
            ));
        }
    }
    entries
}

/// Requirements declared in `setup.cfg`.
pub fn setup_cfg_requirements(contents: &str) -> DependencySet {
    let mut deps = DependencySet::new();
    for (section, key, value) in ini_entries(contents) {
        let wanted = (section == "options"
            && matches!(key.as_str(), "install_requires" | "tests_require"))
            || section == "options.extras_require";
        if wanted {
            deps.extend(value.lines().filter_map(canonical_requirement));
        }
    }
    deps
}

/// Requirements declared in `deps =` blocks of `tox.ini`.
pub fn tox_requirements(contents: &str) -> DependencySet {
    let mut deps = DependencySet::new();
    for (section, key, value) in ini_entries(contents) {
        if !section.starts_with("testenv") || key != "deps" {
            continue;
        }
        for line in value.lines() {
            if line.contains('{') {
                continue;
            }
            // Factor-conditional lines look like `py38: pytest`.
            let line = match line.split_once(": ") {
                Some((_, rest)) => rest,
                None => line,
            };
            deps.extend(canonical_requirement(line));
        }
    }
    deps
}

/// Plugin names from pytest configuration sections of an INI file.
pub fn ini_pytest_plugins(contents: &str) -> DependencySet {
    let mut plugins = DependencySet::new();
    for (section, key, value) in ini_entries(contents) {
        let pytest_section = section == "pytest" || section == "tool:pytest";
        if pytest_section && matches!(key.as_str(), "addopts" | "plugins" | "required_plugins") {
            plugins.extend(plugin_names(&value));
        }
    }
    plugins
}

/// Module paths from `require` directives of a `go.mod` file.
pub fn go_mod_requirements(contents: &str) -> DependencySet {
    let mut deps = DependencySet::new();
    let mut in_block = false;
    for raw in contents.lines() {
        let line = raw.split("//").next().unwrap_or_default().trim();
        if in_block {
            if line == ")" {
                in_block = false;
            } else if let Some(module) = line.split_whitespace().next() {
                deps.insert(module.to_string());
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("require") {
            let rest = rest.trim();
            if rest == "(" {
                in_block = true;
            } else if let Some(module) = rest.split_whitespace().next() {
                deps.insert(module.to_string());
            }
        }
    }
    deps
}
