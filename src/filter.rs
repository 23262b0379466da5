//! Depot path pattern matching.
//!
//! Filter patterns use depot wildcard syntax: `...` matches any sequence of
//! characters including path separators (recursive), `*` matches any sequence
//! within a single path segment. Everything else matches literally.

/// Check whether a single depot wildcard pattern matches a depot path.
pub fn pattern_matches(pattern: &str, path: &str) -> bool {
    match_bytes(pattern.as_bytes(), path.as_bytes())
}

/// Check whether any of the given patterns matches the path.
pub fn matches_any(patterns: &[String], path: &str) -> bool {
    patterns.iter().any(|p| pattern_matches(p, path))
}

fn match_bytes(pat: &[u8], text: &[u8]) -> bool {
    if pat.is_empty() {
        return text.is_empty();
    }

    if pat.starts_with(b"...") {
        let rest = &pat[3..];
        // `...` may consume any number of characters, separators included.
        return (0..=text.len()).any(|i| match_bytes(rest, &text[i..]));
    }

    if pat[0] == b'*' {
        let rest = &pat[1..];
        for i in 0..=text.len() {
            if match_bytes(rest, &text[i..]) {
                return true;
            }
            // `*` stops at a path separator.
            if i < text.len() && text[i] == b'/' {
                return false;
            }
        }
        return false;
    }

    !text.is_empty() && pat[0] == text[0] && match_bytes(&pat[1..], &text[1..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("//depot/main/....cs", "//depot/main/src/Foo.cs", true)]
    #[case("//depot/main/....cs", "//depot/main/Foo.cs", true)]
    #[case("//depot/main/....cs", "//depot/main/src/Foo.txt", false)]
    #[case("//depot/main/....cs", "//depot/other/Bar.cs", false)]
    #[case("//depot/...", "//depot/a/b/c.bin", true)]
    #[case("//depot/...", "//other/a.bin", false)]
    #[case("//depot/main/*.cs", "//depot/main/Foo.cs", true)]
    #[case("//depot/main/*.cs", "//depot/main/src/Foo.cs", false)]
    #[case("//depot/main/*/Foo.cs", "//depot/main/src/Foo.cs", true)]
    #[case("//depot/main/*/Foo.cs", "//depot/main/a/b/Foo.cs", false)]
    #[case("//depot/main/a.txt", "//depot/main/a.txt", true)]
    #[case("//depot/main/a.txt", "//depot/main/a.txt.bak", false)]
    fn wildcard_matching(#[case] pattern: &str, #[case] path: &str, #[case] expected: bool) {
        assert_eq!(
            pattern_matches(pattern, path),
            expected,
            "{pattern} vs {path}"
        );
    }

    #[test]
    fn matches_any_over_pattern_list() {
        let patterns = vec![
            "//depot/main/....cs".to_string(),
            "//depot/main/....txt".to_string(),
        ];
        assert!(matches_any(&patterns, "//depot/main/readme.txt"));
        assert!(matches_any(&patterns, "//depot/main/src/App.cs"));
        assert!(!matches_any(&patterns, "//depot/main/logo.png"));
    }

    #[test]
    fn empty_pattern_only_matches_empty_path() {
        assert!(pattern_matches("", ""));
        assert!(!pattern_matches("", "//depot/a"));
    }

    #[test]
    fn consecutive_wildcards() {
        assert!(pattern_matches("//depot/.../*.cs", "//depot/x/y/Foo.cs"));
        // The slash after `...` still has to be present.
        assert!(!pattern_matches("//depot/.../*.cs", "//depot/Foo.cs"));
    }
}
