//! Glob-like matching used for project path filters.
//!
//! `*` matches any run of characters, including `/`, so `a/*` selects the
//! whole subtree below `a`. `?` matches exactly one character. Matching is
//! case-insensitive because patterns come straight from user-facing filters.

/// Match `text` against a wildcard `pattern`.
#[must_use]
pub fn matches(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().flat_map(char::to_lowercase).collect();
    let text: Vec<char> = text.chars().flat_map(char::to_lowercase).collect();

    let (mut p, mut t) = (0, 0);
    // Position of the last `*` seen and the text index it is currently absorbing up to.
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&c) if c == '?' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, absorbed)) => {
                    p = star + 1;
                    t = absorbed + 1;
                    backtrack = Some((star, absorbed + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_spans_path_segments() {
        assert!(matches("a/*", "a/b"));
        assert!(matches("a/*", "a/b/c"));
        assert!(matches("*/c", "a/b/c"));
        assert!(!matches("a/*", "a"));
    }

    #[test]
    fn literal_patterns_require_full_match() {
        assert!(matches("a/b", "a/b"));
        assert!(!matches("a/b", "a/b/c"));
        assert!(!matches("a/b", "a"));
    }

    #[test]
    fn question_mark_matches_single_character() {
        assert!(matches("proj?", "proj1"));
        assert!(!matches("proj?", "proj"));
        assert!(!matches("proj?", "proj12"));
    }

    #[test]
    fn matching_ignores_case() {
        assert!(matches("Backend/*", "backend/API"));
    }

    #[test]
    fn repeated_stars_and_empty_inputs() {
        assert!(matches("**", ""));
        assert!(matches("*", ""));
        assert!(!matches("", "a"));
        assert!(matches("a**b", "ab"));
        assert!(matches("*b*d", "abcd"));
        assert!(!matches("*b*e", "abcd"));
    }
}
