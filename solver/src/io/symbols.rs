//! Python syntax-tree scans backed by tree-sitter.

use std::cell::RefCell;

use anyhow::{Result, anyhow};
use tree_sitter::{Node, Parser, Tree};

const SETUP_KEYWORDS: [&str; 3] = ["install_requires", "tests_require", "extras_require"];

thread_local! {
    static PYTHON_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        // A language version mismatch surfaces as a parse failure below.
        let _ = p.set_language(&tree_sitter_python::LANGUAGE.into());
        p
    });
}

fn parse(content: &str) -> Result<Tree> {
    PYTHON_PARSER
        .with(|p| p.borrow_mut().parse(content, None))
        .ok_or_else(|| anyhow!("parse python source"))
}

fn node_text<'a>(node: &Node<'_>, content: &'a str) -> &'a str {
    content.get(node.byte_range()).unwrap_or_default()
}

/// Names of module-level `def`/`class` statements, decorated ones included.
pub fn top_level_definitions(content: &str) -> Result<Vec<String>> {
    let tree = parse(content)?;
    let root = tree.root_node();
    let mut names = Vec::new();
    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
        let definition = if child.kind() == "decorated_definition" {
            child.child_by_field_name("definition")
        } else {
            Some(child)
        };
        let Some(definition) = definition else {
            continue;
        };
        if matches!(definition.kind(), "function_definition" | "class_definition")
            && let Some(name) = definition.child_by_field_name("name")
        {
            names.push(node_text(&name, content).to_string());
        }
    }
    Ok(names)
}

/// Number of lines up to and including the last module-level import, or 0.
pub fn import_block_end(content: &str) -> Result<usize> {
    let tree = parse(content)?;
    let root = tree.root_node();
    let mut cursor = root.walk();
    let end = root
        .named_children(&mut cursor)
        .filter(|node| {
            matches!(
                node.kind(),
                "import_statement" | "import_from_statement" | "future_import_statement"
            )
        })
        .map(|node| node.end_position().row + 1)
        .max()
        .unwrap_or(0);
    Ok(end)
}

/// Requirement strings passed to `install_requires`, `tests_require` or
/// `extras_require` anywhere in a `setup.py`.
///
/// List values and dict-of-list values are read; anything computed is skipped.
pub fn setup_py_requirements(content: &str) -> Result<Vec<String>> {
    let tree = parse(content)?;
    let mut found = Vec::new();
    let mut cursor = tree.walk();

    loop {
        let node = cursor.node();
        if node.kind() == "keyword_argument"
            && let Some(name) = node.child_by_field_name("name")
            && SETUP_KEYWORDS.contains(&node_text(&name, content))
            && let Some(value) = node.child_by_field_name("value")
        {
            collect_requirement_strings(&value, content, &mut found);
        }

        if cursor.goto_first_child() {
            continue;
        }
        while !cursor.goto_next_sibling() {
            if !cursor.goto_parent() {
                return Ok(found);
            }
        }
    }
}

fn collect_requirement_strings(value: &Node<'_>, content: &str, out: &mut Vec<String>) {
    let mut cursor = value.walk();
    match value.kind() {
        "list" | "tuple" => {
            for item in value.named_children(&mut cursor) {
                if item.kind() == "string" {
                    out.push(string_literal(node_text(&item, content)));
                }
            }
        }
        "dictionary" => {
            for pair in value.named_children(&mut cursor) {
                if pair.kind() == "pair"
                    && let Some(list) = pair.child_by_field_name("value")
                {
                    collect_requirement_strings(&list, content, out);
                }
            }
        }
        _ => {}
    }
}

fn string_literal(raw: &str) -> String {
    raw.trim_start_matches(|ch: char| ch.is_ascii_alphabetic())
        .trim_matches(|ch| ch == '"' || ch == '\'')
        .to_string()
}
