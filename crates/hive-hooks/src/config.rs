//! Hook configuration

use crate::{HookError, Result};
use serde::{Deserialize, Serialize};

/// Configuration for receive hook scripts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HooksConfig {
    /// Shared secret the server expects from hook callbacks
    pub token: String,

    /// Base URL the scripts post ref updates to
    pub callback_url: String,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            callback_url: "http://localhost:6610".into(),
        }
    }
}

impl HooksConfig {
    /// Construct a configuration with the given token and callback URL
    pub fn new(token: impl Into<String>, callback_url: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            callback_url: callback_url.into(),
        }
    }

    /// Reject values that cannot be embedded in a single-quoted shell string
    ///
    /// # Errors
    ///
    /// Returns `HookError::Config` when the token is empty or either value contains
    /// a quote or line break.
    pub fn validate(&self) -> Result<()> {
        if self.token.trim().is_empty() {
            return Err(HookError::Config("hook token must not be empty".into()));
        }
        for (key, value) in [("token", &self.token), ("callback_url", &self.callback_url)] {
            if value.contains(['\'', '\n', '\r']) {
                return Err(HookError::Config(format!(
                    "hook {key} must not contain quotes or line breaks"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_empty_or_quoted_values() {
        assert!(HooksConfig::default().validate().is_err());
        assert!(HooksConfig::new("s3cr'et", "http://x").validate().is_err());
        assert!(HooksConfig::new("secret", "http://x\n").validate().is_err());
        assert!(HooksConfig::new("secret", "http://x").validate().is_ok());
    }
}
