//! Hook script rendering and repair

use crate::{HookError, HooksConfig, ReceiveHook, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

const HOOKS_DIR: &str = "hooks";

const TEMPLATE: &str = r#"#!/usr/bin/env bash
# Managed by hive. Local edits are overwritten.
HIVE_HOOK_TOKEN='{token}'

unset http_proxy
unset https_proxy

input=""
while read -r old_commit new_commit ref_name; do
  input="${input}${old_commit} ${new_commit} ${ref_name}"$'\n'
done

exec curl --silent --show-error --fail \
  -H "X-Hive-Hook-Token: ${HIVE_HOOK_TOKEN}" \
  -H "X-Hive-User: ${HIVE_USER_ID:-}" \
  --data-binary "${input}" \
  '{callback_url}/{callback}/'"${HIVE_PROJECT_ID:-}"
"#;

/// Writes and validates receive hooks for a repository
#[derive(Debug, Clone)]
pub struct HookInstaller {
    config: HooksConfig,
}

impl HookInstaller {
    /// Create an installer
    ///
    /// # Errors
    ///
    /// Returns `HookError::Config` when the configuration cannot be embedded in a script.
    pub fn new(config: HooksConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Script content for the given hook
    #[must_use]
    pub fn render(&self, hook: ReceiveHook) -> String {
        TEMPLATE
            .replace("{token}", &self.config.token)
            .replace("{callback_url}", self.config.callback_url.trim_end_matches('/'))
            .replace("{callback}", hook.callback())
    }

    /// Path of the hook script inside `git_dir`
    #[must_use]
    pub fn script_path(git_dir: &Path, hook: ReceiveHook) -> PathBuf {
        git_dir.join(HOOKS_DIR).join(hook.script_name())
    }

    /// Whether the script exists, matches the current rendering and is executable
    ///
    /// # Errors
    ///
    /// Returns `HookError::Io` when an existing script cannot be read.
    pub fn is_valid(&self, git_dir: &Path, hook: ReceiveHook) -> Result<bool> {
        let path = Self::script_path(git_dir, hook);
        if !path.exists() {
            return Ok(false);
        }
        let content = fs::read_to_string(&path).map_err(|err| HookError::io(&path, err))?;
        if content != self.render(hook) {
            return Ok(false);
        }
        is_executable(&path)
    }

    /// Rewrite both hooks unless every one of them is already valid
    ///
    /// Returns true when the scripts were (re)written.
    ///
    /// # Errors
    ///
    /// Returns `HookError::Io` when a script cannot be read, written or made executable.
    pub fn ensure(&self, git_dir: &Path) -> Result<bool> {
        let mut valid = true;
        for hook in ReceiveHook::ALL {
            if !self.is_valid(git_dir, hook)? {
                valid = false;
                break;
            }
        }
        if valid {
            return Ok(false);
        }

        let hooks_dir = git_dir.join(HOOKS_DIR);
        fs::create_dir_all(&hooks_dir).map_err(|err| HookError::io(&hooks_dir, err))?;
        for hook in ReceiveHook::ALL {
            let path = Self::script_path(git_dir, hook);
            fs::write(&path, self.render(hook)).map_err(|err| HookError::io(&path, err))?;
            set_executable(&path)?;
        }
        info!(git_dir = %git_dir.display(), "Installed receive hooks");
        Ok(true)
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> Result<bool> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = fs::metadata(path).map_err(|err| HookError::io(path, err))?;
    Ok(metadata.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> Result<bool> {
    Ok(true)
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = fs::metadata(path)
        .map_err(|err| HookError::io(path, err))?
        .permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).map_err(|err| HookError::io(path, err))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn installer(token: &str) -> HookInstaller {
        installer_at(token, "http://localhost:6610/")
    }

    fn installer_at(token: &str, callback_url: &str) -> HookInstaller {
        HookInstaller::new(HooksConfig::new(token, callback_url))
            .unwrap_or_else(|err| panic!("valid hook config: {err}"))
    }

    #[test]
    fn render_embeds_token_and_callback() {
        let script = installer("s3cret").render(ReceiveHook::PostReceive);
        assert!(script.starts_with("#!/usr/bin/env bash"));
        assert!(script.contains("HIVE_HOOK_TOKEN='s3cret'"));
        assert!(script.contains("'http://localhost:6610/git-postreceive-callback/'"));
        assert!(script.contains("${HIVE_PROJECT_ID:-}"));
    }

    #[test]
    fn ensure_installs_then_is_idempotent() -> Result<()> {
        let dir = TempDir::new().map_err(|err| HookError::io("tempdir", err))?;
        let installer = installer("s3cret");

        assert!(installer.ensure(dir.path())?);
        for hook in ReceiveHook::ALL {
            assert!(installer.is_valid(dir.path(), hook)?);
        }
        assert!(!installer.ensure(dir.path())?);
        Ok(())
    }

    #[test]
    fn token_rotation_rewrites_both_hooks() -> Result<()> {
        let dir = TempDir::new().map_err(|err| HookError::io("tempdir", err))?;
        installer("old").ensure(dir.path())?;

        let rotated = installer("new");
        assert!(!rotated.is_valid(dir.path(), ReceiveHook::PreReceive)?);
        assert!(rotated.ensure(dir.path())?);
        assert!(rotated.is_valid(dir.path(), ReceiveHook::PreReceive)?);
        assert!(rotated.is_valid(dir.path(), ReceiveHook::PostReceive)?);
        Ok(())
    }

    #[test]
    fn moved_callback_rewrites_hooks() -> Result<()> {
        let dir = TempDir::new().map_err(|err| HookError::io("tempdir", err))?;
        installer("s3cret").ensure(dir.path())?;

        let moved = installer_at("s3cret", "http://hive.internal:8810");
        assert!(!moved.is_valid(dir.path(), ReceiveHook::PostReceive)?);
        assert!(moved.ensure(dir.path())?);
        let path = HookInstaller::script_path(dir.path(), ReceiveHook::PostReceive);
        let script = fs::read_to_string(&path).map_err(|err| HookError::io(&path, err))?;
        assert!(script.contains("'http://hive.internal:8810/git-postreceive-callback/'"));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn non_executable_hook_is_repaired() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().map_err(|err| HookError::io("tempdir", err))?;
        let installer = installer("s3cret");
        installer.ensure(dir.path())?;

        let path = HookInstaller::script_path(dir.path(), ReceiveHook::PostReceive);
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644))
            .map_err(|err| HookError::io(&path, err))?;
        assert!(!installer.is_valid(dir.path(), ReceiveHook::PostReceive)?);

        assert!(installer.ensure(dir.path())?);
        assert!(installer.is_valid(dir.path(), ReceiveHook::PostReceive)?);
        Ok(())
    }
}
