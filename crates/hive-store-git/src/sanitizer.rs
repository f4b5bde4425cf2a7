//! Startup repair of project repositories.

use crate::{RepoError, Result};
use git2::{ConfigLevel, Repository};
use hive_hooks::HookInstaller;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

const DIFF_ALGORITHM_KEY: &str = "diff.algorithm";
const DIFF_ALGORITHM: &str = "histogram";
const ALLOW_ANY_SHA1_KEY: &str = "uploadpack.allowAnySHA1InWant";

/// What [`RepositorySanitizer::ensure_valid`] had to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SanitizeReport {
    /// A fresh repository was created in a missing or empty directory.
    pub initialized: bool,
    /// Invalid content was wiped before re-initializing.
    pub wiped: bool,
    /// Hook scripts were rewritten.
    pub hooks_rewritten: bool,
    /// Repository-local settings were changed.
    pub config_changed: bool,
}

impl SanitizeReport {
    /// Whether the repository was already in the expected state.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        !(self.initialized || self.wiped || self.hooks_rewritten || self.config_changed)
    }
}

/// Brings a repository directory into a valid bare state with current hooks and settings.
#[derive(Debug, Clone)]
pub struct RepositorySanitizer {
    hooks: HookInstaller,
}

impl RepositorySanitizer {
    /// Sanitizer installing hooks through `hooks`.
    #[must_use]
    pub const fn new(hooks: HookInstaller) -> Self {
        Self { hooks }
    }

    /// Hook installer in use.
    #[must_use]
    pub const fn hooks(&self) -> &HookInstaller {
        &self.hooks
    }

    /// Repair `git_dir`. Running it twice leaves the second run with nothing to do.
    ///
    /// Non-empty directories that do not hold a bare repository are wiped.
    ///
    /// # Errors
    /// Returns an error when the directory cannot be read or written, or git fails.
    pub fn ensure_valid(&self, git_dir: &Path) -> Result<SanitizeReport> {
        let mut report = SanitizeReport::default();

        fs::create_dir_all(git_dir).map_err(|err| RepoError::io(git_dir, err))?;
        let repo = if is_empty_dir(git_dir)? {
            info!(git_dir = %git_dir.display(), "Initializing bare repository");
            report.initialized = true;
            Repository::init_bare(git_dir)?
        } else if let Some(repo) = open_valid(git_dir) {
            repo
        } else {
            warn!(
                git_dir = %git_dir.display(),
                "Directory does not hold a valid bare repository, wiping and re-initializing"
            );
            clean_dir(git_dir)?;
            report.wiped = true;
            Repository::init_bare(git_dir)?
        };

        report.hooks_rewritten = self.hooks.ensure(git_dir)?;
        report.config_changed = ensure_config(&repo)?;
        if report.config_changed {
            info!(git_dir = %git_dir.display(), "Updated repository settings");
        }
        Ok(report)
    }
}

fn open_valid(git_dir: &Path) -> Option<Repository> {
    Repository::open_bare(git_dir)
        .ok()
        .filter(Repository::is_bare)
}

fn ensure_config(repo: &Repository) -> Result<bool> {
    let config = repo.config()?;
    let diff_ok = config
        .get_string(DIFF_ALGORITHM_KEY)
        .is_ok_and(|value| value == DIFF_ALGORITHM);
    let any_sha1_ok = config.get_bool(ALLOW_ANY_SHA1_KEY).unwrap_or(false);
    if diff_ok && any_sha1_ok {
        return Ok(false);
    }

    let mut local = config.open_level(ConfigLevel::Local)?;
    if !diff_ok {
        local.set_str(DIFF_ALGORITHM_KEY, DIFF_ALGORITHM)?;
    }
    if !any_sha1_ok {
        local.set_bool(ALLOW_ANY_SHA1_KEY, true)?;
    }
    Ok(true)
}

fn is_empty_dir(dir: &Path) -> Result<bool> {
    let mut entries = fs::read_dir(dir).map_err(|err| RepoError::io(dir, err))?;
    Ok(entries.next().is_none())
}

/// Remove everything inside `dir`, keeping the directory itself.
pub(crate) fn clean_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        return fs::create_dir_all(dir).map_err(|err| RepoError::io(dir, err));
    }
    for entry in fs::read_dir(dir).map_err(|err| RepoError::io(dir, err))? {
        let path = entry.map_err(|err| RepoError::io(dir, err))?.path();
        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.map_err(|err| RepoError::io(&path, err))?;
    }
    Ok(())
}
