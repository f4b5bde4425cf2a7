//! Hook kinds

/// Receive hooks managed in every repository.
///
/// Both scripts share one template; they differ only in the callback endpoint
/// they post ref updates to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReceiveHook {
    /// Runs before refs are updated and may reject the push.
    PreReceive,
    /// Runs after refs are updated; used for notifications.
    PostReceive,
}

impl ReceiveHook {
    /// Every managed hook.
    pub const ALL: [Self; 2] = [Self::PreReceive, Self::PostReceive];

    /// File name under `hooks/`.
    #[must_use]
    pub const fn script_name(self) -> &'static str {
        match self {
            Self::PreReceive => "pre-receive",
            Self::PostReceive => "post-receive",
        }
    }

    /// Server endpoint the script posts to.
    #[must_use]
    pub const fn callback(self) -> &'static str {
        match self {
            Self::PreReceive => "git-prereceive-callback",
            Self::PostReceive => "git-postreceive-callback",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_names_match_git_conventions() {
        let names: Vec<_> = ReceiveHook::ALL.iter().map(|hook| hook.script_name()).collect();
        assert_eq!(names, vec!["pre-receive", "post-receive"]);
        assert_ne!(
            ReceiveHook::PreReceive.callback(),
            ReceiveHook::PostReceive.callback()
        );
    }
}
