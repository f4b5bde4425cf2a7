//! Space separated include/exclude pattern lists used by ref protections.

use std::collections::BTreeSet;
use std::fmt;

/// Parsed pattern list such as `main "release *" -wip`.
///
/// A leading `-` marks an exclude. Patterns containing whitespace are double quoted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternSet {
    includes: BTreeSet<String>,
    excludes: BTreeSet<String>,
}

impl PatternSet {
    /// Parse a pattern list. Unterminated quotes run to the end of input.
    #[must_use]
    pub fn parse(input: &str) -> Self {
        let mut set = Self::default();
        for token in tokenize(input) {
            if let Some(excluded) = token.strip_prefix('-') {
                if !excluded.is_empty() {
                    set.excludes.insert(excluded.to_owned());
                }
            } else {
                set.includes.insert(token);
            }
        }
        set
    }

    /// Included patterns.
    #[must_use]
    pub const fn includes(&self) -> &BTreeSet<String> {
        &self.includes
    }

    /// Excluded patterns.
    #[must_use]
    pub const fn excludes(&self) -> &BTreeSet<String> {
        &self.excludes
    }

    /// Drop `pattern` from both the include and exclude lists.
    ///
    /// Returns true when anything was removed.
    pub fn remove(&mut self, pattern: &str) -> bool {
        let included = self.includes.remove(pattern);
        let excluded = self.excludes.remove(pattern);
        included || excluded
    }

    /// Whether neither includes nor excludes remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.includes.is_empty() && self.excludes.is_empty()
    }
}

impl fmt::Display for PatternSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .includes
            .iter()
            .map(|p| quote(p))
            .chain(self.excludes.iter().map(|p| format!("-{}", quote(p))))
            .collect::<Vec<_>>()
            .join(" ");
        f.write_str(&rendered)
    }
}

fn quote(pattern: &str) -> String {
    if pattern.chars().any(char::is_whitespace) {
        format!("\"{pattern}\"")
    } else {
        pattern.to_owned()
    }
}

fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for c in input.chars() {
        match c {
            '"' => quoted = !quoted,
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}
