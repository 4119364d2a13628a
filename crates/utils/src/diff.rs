use similar::TextDiff;

/// Produce a unified diff between two versions of a file, with `a/` and `b/`
/// headers. Returns an empty string when the contents are identical.
pub fn create_unified_diff(file_path: &str, old: &str, new: &str) -> String {
    if old == new {
        return String::new();
    }

    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{file_path}"), &format!("b/{file_path}"))
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::create_unified_diff;

    #[test]
    fn identical_contents_produce_empty_diff() {
        assert_eq!(create_unified_diff("src/main.ts", "a\nb\n", "a\nb\n"), "");
    }

    #[test]
    fn changed_line_appears_with_headers() {
        let diff = create_unified_diff("src/App.tsx", "old line\n", "new line\n");
        assert!(diff.contains("--- a/src/App.tsx"));
        assert!(diff.contains("+++ b/src/App.tsx"));
        assert!(diff.contains("-old line"));
        assert!(diff.contains("+new line"));
    }

    #[test]
    fn new_file_is_a_full_add() {
        let diff = create_unified_diff("src/new.ts", "", "line one\nline two\n");
        assert!(diff.contains("+line one"));
        assert!(diff.contains("+line two"));
        assert!(!diff.lines().any(|l| l.starts_with('-') && !l.starts_with("---")));
    }
}
