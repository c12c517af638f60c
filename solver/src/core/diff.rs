//! Unified-diff synthesis for single-line insertions.

const CONTEXT_LINES: usize = 3;
const NO_NEWLINE: &str = "\\ No newline at end of file\n";

/// Build a `git apply`-compatible diff that inserts `inserted` after the first
/// `after_line` lines of `original`.
///
/// `after_line` is clamped to the file length. A final line without a trailing
/// newline is rewritten when the insertion lands after it.
pub fn insertion_diff(path: &str, original: &str, after_line: usize, inserted: &str) -> String {
    let lines: Vec<&str> = original.split_inclusive('\n').collect();
    let after = after_line.min(lines.len());
    let ctx_start = after.saturating_sub(CONTEXT_LINES);
    let ctx_end = (after + CONTEXT_LINES).min(lines.len());
    let old_len = ctx_end - ctx_start;
    let new_len = old_len + 1;
    let old_start = if old_len == 0 { 0 } else { ctx_start + 1 };
    let new_start = ctx_start + 1;

    let mut out = String::new();
    out.push_str(&format!("diff --git a/{path} b/{path}\n"));
    out.push_str(&format!("--- a/{path}\n+++ b/{path}\n"));
    out.push_str(&format!(
        "@@ -{old_start},{old_len} +{new_start},{new_len} @@\n"
    ));

    for (offset, line) in lines[ctx_start..after].iter().enumerate() {
        let is_last = ctx_start + offset + 1 == lines.len();
        if is_last && !line.ends_with('\n') {
            out.push('-');
            out.push_str(line);
            out.push('\n');
            out.push_str(NO_NEWLINE);
            out.push('+');
            out.push_str(line);
            out.push('\n');
        } else {
            out.push(' ');
            out.push_str(line);
        }
    }

    out.push('+');
    out.push_str(inserted.trim_end_matches('\n'));
    out.push('\n');

    for line in &lines[after..ctx_end] {
        out.push(' ');
        out.push_str(line);
        if !line.ends_with('\n') {
            out.push('\n');
            out.push_str(NO_NEWLINE);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserts_after_import_block_with_context() {
        let original = "import os\nimport sys\n\n\ndef main():\n    pass\n";
        let diff = insertion_diff("pkg/app.py", original, 2, "from pkg.util import helper");
        let expected = concat!(
            "diff --git a/pkg/app.py b/pkg/app.py\n",
            "--- a/pkg/app.py\n",
            "+++ b/pkg/app.py\n",
            "@@ -1,5 +1,6 @@\n",
            " import os\n",
            " import sys\n",
            "+from pkg.util import helper\n",
            " \n",
            " \n",
            " def main():\n",
        );
        assert_eq!(diff, expected);
    }

    #[test]
    fn inserts_into_empty_file() {
        let diff = insertion_diff("a.py", "", 0, "import x");
        assert!(diff.contains("@@ -0,0 +1,1 @@\n+import x\n"));
    }

    #[test]
    fn rewrites_unterminated_last_line() {
        let diff = insertion_diff("a.py", "import os", 1, "import sys");
        assert!(diff.contains("@@ -1,1 +1,2 @@\n-import os\n\\ No newline at end of file\n+import os\n+import sys\n"));
    }

    #[test]
    fn marks_unterminated_trailing_context() {
        let diff = insertion_diff("a.py", "import os\nx = 1", 1, "import sys");
        assert!(diff.ends_with(" x = 1\n\\ No newline at end of file\n"));
    }
}
