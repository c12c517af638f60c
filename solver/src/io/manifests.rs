//! Dependency manifest discovery per language.
//!
//! Unreadable or malformed manifests contribute nothing; discovery never fails.

use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::core::packages::{
    self, DependencySet, canonical_name, canonical_requirement, go_mod_requirements,
    ini_pytest_plugins, parse_requirements, setup_cfg_requirements, tox_requirements,
};
use crate::core::types::Language;
use crate::io::symbols;

const REQUIREMENT_FILES: [&str; 4] = [
    "requirements.txt",
    "requirements-dev.txt",
    "requirements-test.txt",
    "test-requirements.txt",
];

fn read(root: &Path, name: &str) -> Option<String> {
    fs::read_to_string(root.join(name)).ok()
}

/// Declared dependencies of `root` for `language`.
pub fn discover(root: &Path, language: Language) -> DependencySet {
    let deps = match language {
        Language::Python => python_dependencies(root),
        Language::Javascript => javascript_dependencies(root),
        Language::Go => go_dependencies(root),
    };
    debug!(count = deps.len(), %language, "discovered dependencies");
    deps
}

pub fn python_dependencies(root: &Path) -> DependencySet {
    let mut deps = DependencySet::new();
    for name in REQUIREMENT_FILES {
        if let Some(contents) = read(root, name) {
            deps.extend(parse_requirements(&contents));
        }
    }
    if let Some(contents) = read(root, "setup.cfg") {
        deps.extend(setup_cfg_requirements(&contents));
    }
    if let Some(contents) = read(root, "tox.ini") {
        deps.extend(tox_requirements(&contents));
    }
    if let Some(contents) = read(root, "setup.py") {
        match symbols::setup_py_requirements(&contents) {
            Ok(found) => deps.extend(found.iter().filter_map(|raw| canonical_requirement(raw))),
            Err(err) => warn!(err = %err, "skip setup.py"),
        }
    }
    if let Some(contents) = read(root, "pyproject.toml") {
        deps.extend(pyproject_requirements(&contents));
    }
    deps.extend(pytest_plugins(root));
    deps
}

/// `pytest-*` plugins named by pytest configuration in `root`.
pub fn pytest_plugins(root: &Path) -> DependencySet {
    let mut plugins = DependencySet::new();
    for name in ["pytest.ini", "setup.cfg", "tox.ini"] {
        if let Some(contents) = read(root, name) {
            plugins.extend(ini_pytest_plugins(&contents));
        }
    }
    if let Some(contents) = read(root, "pyproject.toml")
        && let Ok(doc) = toml::from_str::<toml::Table>(&contents)
        && let Some(options) = lookup(&doc, &["tool", "pytest", "ini_options"])
    {
        let flattened = serde_json::to_string(options).unwrap_or_default();
        plugins.extend(packages::plugin_names(&flattened));
    }
    plugins
}

fn lookup<'a>(table: &'a toml::Table, path: &[&str]) -> Option<&'a toml::Value> {
    let (first, rest) = path.split_first()?;
    let mut value = table.get(*first)?;
    for key in rest {
        value = value.as_table()?.get(*key)?;
    }
    Some(value)
}

/// Requirements from PEP 621, PEP 735 and Poetry tables.
pub fn pyproject_requirements(contents: &str) -> DependencySet {
    let mut deps = DependencySet::new();
    let doc = match toml::from_str::<toml::Table>(contents) {
        Ok(doc) => doc,
        Err(err) => {
            warn!(err = %err, "skip malformed pyproject.toml");
            return deps;
        }
    };

    let string_items = |value: &toml::Value| -> Vec<String> {
        value
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.as_str())
                    .filter_map(canonical_requirement)
                    .collect()
            })
            .unwrap_or_default()
    };

    if let Some(value) = lookup(&doc, &["project", "dependencies"]) {
        deps.extend(string_items(value));
    }
    for path in [
        &["project", "optional-dependencies"][..],
        &["dependency-groups"][..],
    ] {
        if let Some(groups) = lookup(&doc, path).and_then(|v| v.as_table()) {
            for value in groups.values() {
                deps.extend(string_items(value));
            }
        }
    }

    let poetry_keys = |value: &toml::Value| -> Vec<String> {
        value
            .as_table()
            .map(|table| {
                table
                    .keys()
                    .filter(|name| name.as_str() != "python")
                    .map(|name| canonical_name(name))
                    .collect()
            })
            .unwrap_or_default()
    };
    for path in [
        &["tool", "poetry", "dependencies"][..],
        &["tool", "poetry", "dev-dependencies"][..],
    ] {
        if let Some(value) = lookup(&doc, path) {
            deps.extend(poetry_keys(value));
        }
    }
    if let Some(groups) = lookup(&doc, &["tool", "poetry", "group"]).and_then(|v| v.as_table()) {
        for group in groups.values() {
            if let Some(value) = group.as_table().and_then(|g| g.get("dependencies")) {
                deps.extend(poetry_keys(value));
            }
        }
    }
    deps
}

/// Names from `dependencies` and `devDependencies` of `package.json`.
pub fn javascript_dependencies(root: &Path) -> DependencySet {
    let mut deps = DependencySet::new();
    let Some(manifest) = crate::io::probe::read_package_json(root) else {
        return deps;
    };
    for section in ["dependencies", "devDependencies"] {
        if let Some(table) = manifest.get(section).and_then(|v| v.as_object()) {
            deps.extend(table.keys().cloned());
        }
    }
    deps
}

pub fn go_dependencies(root: &Path) -> DependencySet {
    read(root, "go.mod")
        .map(|contents| go_mod_requirements(&contents))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestTree;

    #[test]
    fn unions_python_sources() {
        let tree = TestTree::new();
        tree.write("requirements.txt", "requests>=2\n-r requirements-dev.txt\n");
        tree.write("requirements-dev.txt", "Black==24.1\n");
        tree.write(
            "setup.py",
            "setup(install_requires=['six'], tests_require=['pytest-mock'])\n",
        );
        tree.write("pytest.ini", "[pytest]\naddopts = -p pytest-randomly\n");
        let deps = discover(tree.path(), Language::Python);
        let names: Vec<_> = deps.into_iter().collect();
        assert_eq!(
            names,
            vec!["black", "pytest-mock", "pytest-randomly", "requests", "six"]
        );
    }

    #[test]
    fn pyproject_tables() {
        let pyproject = r#"
[project]
dependencies = ["httpx>=0.27", "attrs"]

[project.optional-dependencies]
test = ["pytest-asyncio"]

[dependency-groups]
lint = ["ruff"]

[tool.poetry.dependencies]
python = "^3.10"
Django = "^5.0"

[tool.poetry.group.dev.dependencies]
factory_boy = "*"
"#;
        let deps = pyproject_requirements(pyproject);
        let names: Vec<_> = deps.into_iter().collect();
        assert_eq!(
            names,
            vec!["attrs", "django", "factory-boy", "httpx", "pytest-asyncio", "ruff"]
        );
    }

    #[test]
    fn pyproject_pytest_options_name_plugins() {
        let tree = TestTree::new();
        tree.write(
            "pyproject.toml",
            "[tool.pytest.ini_options]\nrequired_plugins = [\"pytest-django\"]\n",
        );
        assert!(pytest_plugins(tree.path()).contains("pytest-django"));
    }

    #[test]
    fn malformed_manifests_contribute_nothing() {
        let tree = TestTree::new();
        tree.write("pyproject.toml", "[project\n");
        tree.write("setup.py", "setup(install_requires=[\n");
        assert!(discover(tree.path(), Language::Python).is_empty());
    }

    #[test]
    fn package_json_dependency_keys() {
        let tree = TestTree::new();
        tree.write(
            "package.json",
            r#"{"dependencies":{"react":"^18"},"devDependencies":{"jest":"^29"},"peerDependencies":{"x":"1"}}"#,
        );
        let names: Vec<_> = discover(tree.path(), Language::Javascript)
            .into_iter()
            .collect();
        assert_eq!(names, vec!["jest", "react"]);
    }

    #[test]
    fn go_mod_requires() {
        let tree = TestTree::new();
        tree.write(
            "go.mod",
            "module x\n\nrequire (\n\tgithub.com/a/b v1.0.0\n)\n",
        );
        assert!(discover(tree.path(), Language::Go).contains("github.com/a/b"));
    }
}
