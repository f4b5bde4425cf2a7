//! Mirror cloning of whole repositories.

use crate::sanitizer::clean_dir;
use crate::Result;
use git2::build::RepoBuilder;
use git2::Repository;
use std::path::Path;
use tracing::info;

const MIRROR_REFSPEC: &str = "+refs/*:refs/*";

/// Replace `target` with a bare mirror of `source_url`, copying every ref.
///
/// `source_url` may be a remote URL or a local repository path. HEAD follows
/// the source default branch.
///
/// # Errors
/// Returns an error when the target cannot be cleaned or the fetch fails.
pub fn mirror_clone(source_url: &str, target: &Path) -> Result<Repository> {
    clean_dir(target)?;

    let mut builder = RepoBuilder::new();
    builder.bare(true);
    builder.remote_create(|repo, name, url| {
        let remote = repo.remote_with_fetch(name, url, MIRROR_REFSPEC)?;
        repo.config()?.set_bool(&format!("remote.{name}.mirror"), true)?;
        Ok(remote)
    });
    let repo = builder.clone(source_url, target)?;
    info!(source = source_url, target = %target.display(), "Mirrored repository");
    Ok(repo)
}
