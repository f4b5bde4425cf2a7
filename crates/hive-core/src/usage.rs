//! Collected references that block deletion of a project.

use thiserror::Error;

/// List of places still referring to something about to be deleted.
///
/// Entries are breadcrumb paths like `administration / issue setting / board "Sprint"`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Usage {
    entries: Vec<String>,
}

impl Usage {
    /// Empty usage.
    #[must_use]
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Usage with a single entry.
    pub fn of(entry: impl Into<String>) -> Self {
        Self {
            entries: vec![entry.into()],
        }
    }

    /// Record one more referencing location.
    pub fn add(&mut self, other: Self) -> &mut Self {
        self.entries.extend(other.entries);
        self
    }

    /// Prepend a breadcrumb segment to every entry.
    #[must_use]
    pub fn prefix(mut self, segment: &str) -> Self {
        for entry in &mut self.entries {
            *entry = format!("{segment} / {entry}");
        }
        self
    }

    /// Referencing locations.
    #[must_use]
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Whether nothing references the subject.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fail when anything still references `subject`.
    ///
    /// # Errors
    /// Returns [`InUse`] naming every referencing location.
    pub fn check_in_use(&self, subject: &str) -> Result<(), InUse> {
        if self.entries.is_empty() {
            Ok(())
        } else {
            Err(InUse {
                subject: subject.to_owned(),
                usages: self.entries.clone(),
            })
        }
    }
}

/// Deletion blocked by remaining references.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{subject} is still in use: {}", .usages.join("; "))]
pub struct InUse {
    /// What was about to be deleted.
    pub subject: String,
    /// Where it is still referenced.
    pub usages: Vec<String>,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::*;

    #[test]
    fn prefix_builds_breadcrumbs() {
        let usage = Usage::of("link \"Parent\"")
            .prefix("issue setting")
            .prefix("administration");
        assert_eq!(
            usage.entries(),
            &["administration / issue setting / link \"Parent\"".to_owned()]
        );
    }

    #[test]
    fn check_in_use_names_all_usages() {
        let mut usage = Usage::new();
        assert!(usage.check_in_use("Project 'a'").is_ok());

        usage.add(Usage::of("job executor"));
        usage.add(Usage::of("service desk"));
        let err = usage
            .check_in_use("Project 'a'")
            .expect_err("usage must block");
        assert_eq!(err.usages.len(), 2);
        assert_eq!(
            err.to_string(),
            "Project 'a' is still in use: job executor; service desk"
        );
    }
}
