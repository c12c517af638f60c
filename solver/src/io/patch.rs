//! Atomic application of unified diffs to a working tree.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::io::git::Git;

/// Apply `diff` to the tree at `root` only if a dry run accepts it.
///
/// Returns `false` for empty diffs, rejected dry runs, timeouts and spawn
/// errors. The tree is only written after a clean dry run.
#[instrument(skip_all, fields(root = %root.display(), diff_bytes = diff.len()))]
pub fn apply_patch(root: &Path, diff: &str, timeout: Duration) -> bool {
    if diff.trim().is_empty() {
        debug!("empty diff");
        return false;
    }
    let mut diff = diff.to_string();
    if !diff.ends_with('\n') {
        diff.push('\n');
    }
    let git = Git::new(root);
    match git.apply_check(&diff, timeout) {
        Ok(true) => {}
        Ok(false) => {
            debug!("dry run rejected diff");
            return false;
        }
        Err(err) => {
            warn!(err = %err, "dry run failed");
            return false;
        }
    }
    match git.apply(&diff, timeout) {
        Ok(()) => true,
        Err(err) => {
            warn!(err = %err, "apply failed after clean dry run");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestTree;

    const TIMEOUT: Duration = Duration::from_secs(30);

    fn repo() -> TestTree {
        let tree = TestTree::new();
        tree.write("calc.py", "def add(a, b):\n    return a - b\n");
        tree.write("notes.txt", "one\ntwo\nthree\n");
        tree.commit_all("init");
        tree
    }

    const FIX: &str = "diff --git a/calc.py b/calc.py
--- a/calc.py
+++ b/calc.py
@@ -1,2 +1,2 @@
 def add(a, b):
-    return a - b
+    return a + b
";

    #[test]
    fn clean_diff_applies_every_hunk_once() {
        let tree = repo();
        let two_files = format!(
            "{FIX}diff --git a/notes.txt b/notes.txt
--- a/notes.txt
+++ b/notes.txt
@@ -1,3 +1,4 @@
 one
+one and a half
 two
 three
"
        );
        assert!(apply_patch(tree.path(), &two_files, TIMEOUT));
        assert_eq!(tree.read("calc.py"), "def add(a, b):\n    return a + b\n");
        assert_eq!(tree.read("notes.txt"), "one\none and a half\ntwo\nthree\n");
        // A second application no longer matches.
        assert!(!apply_patch(tree.path(), &two_files, TIMEOUT));
        assert_eq!(tree.read("notes.txt"), "one\none and a half\ntwo\nthree\n");
    }

    #[test]
    fn rejected_diff_leaves_tree_byte_identical() {
        let tree = repo();
        let half_bad = format!(
            "{FIX}diff --git a/notes.txt b/notes.txt
--- a/notes.txt
+++ b/notes.txt
@@ -1,3 +1,3 @@
 one
-zwei
+deux
 three
"
        );
        assert!(!apply_patch(tree.path(), &half_bad, TIMEOUT));
        assert_eq!(tree.read("calc.py"), "def add(a, b):\n    return a - b\n");
        assert_eq!(tree.read("notes.txt"), "one\ntwo\nthree\n");
        assert!(Git::new(tree.path()).status_porcelain().expect("status").is_empty());
    }

    #[test]
    fn missing_trailing_newline_is_tolerated() {
        let tree = repo();
        assert!(apply_patch(tree.path(), FIX.trim_end(), TIMEOUT));
        assert_eq!(tree.read("calc.py"), "def add(a, b):\n    return a + b\n");
    }

    #[test]
    fn empty_or_garbage_diff_is_rejected() {
        let tree = repo();
        assert!(!apply_patch(tree.path(), "", TIMEOUT));
        assert!(!apply_patch(tree.path(), "not a diff at all", TIMEOUT));
        assert!(Git::new(tree.path()).status_porcelain().expect("status").is_empty());
    }
}
