use regex::Regex;
use std::sync::LazyLock;

/// Patterns that are never allowed in any argument string.
///
/// Each entry is `(regex, description)`. Order matters only for which
/// description is reported when several patterns match.
const DANGEROUS_PATTERNS: &[(&str, &str)] = &[
    (r"\.\./", "path traversal '../'"),
    (r"/\.\./", "path traversal '/../'"),
    (r"^\.\.", "relative parent path '..'"),
    (r";", "command separator ';'"),
    (r"\|", "pipe '|'"),
    (r"&", "background/chaining '&'"),
    (r"`", "backtick substitution"),
    (r"\$\(", "command substitution '$('"),
    (r">", "output redirection '>'"),
    (r"<", "input redirection '<'"),
];

/// Number of leading entries in `DANGEROUS_PATTERNS` that deal with parent
/// directories. Path confinement handles those itself.
const PARENT_DIR_PATTERNS: usize = 3;

static COMPILED: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    DANGEROUS_PATTERNS
        .iter()
        .map(|(pattern, description)| {
            let re = Regex::new(pattern).expect("dangerous pattern must compile");
            (re, *description)
        })
        .collect()
});

/// Return the description of the first dangerous pattern found in `text`.
pub fn find_dangerous_pattern(text: &str) -> Option<&'static str> {
    COMPILED
        .iter()
        .find(|(re, _)| re.is_match(text))
        .map(|(_, description)| *description)
}

/// Check if text contains any dangerous pattern
pub fn contains_dangerous_pattern(text: &str) -> bool {
    find_dangerous_pattern(text).is_some()
}

/// Like [`find_dangerous_pattern`] but ignores the parent-directory patterns.
pub fn find_shell_metacharacter(text: &str) -> Option<&'static str> {
    COMPILED
        .iter()
        .skip(PARENT_DIR_PATTERNS)
        .find(|(re, _)| re.is_match(text))
        .map(|(_, description)| *description)
}

pub fn contains_shell_metacharacter(text: &str) -> bool {
    find_shell_metacharacter(text).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_patterns_compile() {
        assert_eq!(COMPILED.len(), DANGEROUS_PATTERNS.len());
    }

    #[test]
    fn test_shell_metacharacters_detected() {
        for text in [
            "all; rm -rf /",
            "log | sh",
            "status && ls",
            "status &",
            "status `whoami`",
            "status $(whoami)",
            "status > /tmp/out",
            "status < /etc/passwd",
        ] {
            assert!(contains_dangerous_pattern(text), "should reject: {}", text);
            assert!(contains_shell_metacharacter(text), "should reject: {}", text);
        }
    }

    #[test]
    fn test_parent_directory_patterns() {
        assert!(contains_dangerous_pattern("../etc/passwd"));
        assert!(contains_dangerous_pattern("foo/../../bar"));
        assert!(contains_dangerous_pattern(".."));
        assert!(contains_dangerous_pattern("-l ../"));
    }

    #[test]
    fn test_parent_directory_not_a_metacharacter() {
        assert!(!contains_shell_metacharacter("../etc/passwd"));
        assert!(!contains_shell_metacharacter(".."));
    }

    #[test]
    fn test_safe_strings() {
        for text in ["status", "log --oneline -5", "-la build/", "CFLAGS=-O2 all", "diff HEAD~1..HEAD"] {
            assert!(!contains_dangerous_pattern(text), "should accept: {}", text);
        }
    }

    #[test]
    fn test_redirect_in_message_still_rejected() {
        // No pattern is context-sensitive
        assert!(contains_dangerous_pattern("log --grep='a > b'"));
    }

    #[test]
    fn test_reports_description() {
        assert_eq!(find_dangerous_pattern("a;b"), Some("command separator ';'"));
        assert_eq!(find_shell_metacharacter("../a"), None);
    }
}
