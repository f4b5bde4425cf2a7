//! Branch and tag enumeration, deletion, and a small ref target cache.

use crate::{RepoError, Result};
use git2::{ObjectType, Oid, Repository};
use hive_core::{ObjectId, ProjectId};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};

/// Prefix of branch refs.
pub const BRANCH_PREFIX: &str = "refs/heads/";
/// Prefix of tag refs.
pub const TAG_PREFIX: &str = "refs/tags/";

const DEFAULT_REF_CACHE_CAPACITY: usize = 4096;

/// Ref and the commit it resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefInfo {
    /// Full ref name.
    pub name: String,
    /// Peeled target.
    pub target: Oid,
}

/// Full ref name of `branch`.
#[must_use]
pub fn branch_ref(branch: &str) -> String {
    format!("{BRANCH_PREFIX}{branch}")
}

/// Full ref name of `tag`.
#[must_use]
pub fn tag_ref(tag: &str) -> String {
    format!("{TAG_PREFIX}{tag}")
}

/// Convert a git object id into its library-independent form.
///
/// # Errors
/// Returns [`RepoError::InvalidObjectId`] for ids that are not SHA-1.
pub fn object_id(oid: Oid) -> Result<ObjectId> {
    let hex = oid.to_string();
    hex.parse().map_err(|_| RepoError::InvalidObjectId(hex))
}

/// Branch refs sorted by name.
///
/// # Errors
/// Returns an error when refs cannot be listed or resolved.
pub fn branch_refs(repo: &Repository) -> Result<Vec<RefInfo>> {
    collect_refs(repo, BRANCH_PREFIX)
}

/// Tag refs sorted by name, annotated tags peeled to their target.
///
/// # Errors
/// Returns an error when refs cannot be listed or resolved.
pub fn tag_refs(repo: &Repository) -> Result<Vec<RefInfo>> {
    collect_refs(repo, TAG_PREFIX)
}

fn collect_refs(repo: &Repository, prefix: &str) -> Result<Vec<RefInfo>> {
    let mut infos = Vec::new();
    for reference in repo.references_glob(&format!("{prefix}*"))? {
        let reference = reference?;
        let Some(name) = reference.name() else {
            continue;
        };
        let target = reference.peel(ObjectType::Any)?.id();
        infos.push(RefInfo {
            name: name.to_owned(),
            target,
        });
    }
    infos.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(infos)
}

/// Delete `branch` and return the commit it pointed at.
///
/// # Errors
/// Returns [`RepoError::RefNotFound`] when the branch does not exist.
pub fn delete_branch(repo: &Repository, branch: &str) -> Result<Oid> {
    let name = branch_ref(branch);
    let mut reference = repo
        .find_reference(&name)
        .map_err(|_| RepoError::RefNotFound(name.clone()))?;
    let old = reference.peel(ObjectType::Commit)?.id();
    reference.delete()?;
    Ok(old)
}

/// Delete `tag` and return the commit it resolved to.
///
/// # Errors
/// Returns [`RepoError::RefNotFound`] when the tag does not exist.
pub fn delete_tag(repo: &Repository, tag: &str) -> Result<Oid> {
    let name = tag_ref(tag);
    let old = repo
        .find_reference(&name)
        .map_err(|_| RepoError::RefNotFound(name.clone()))?
        .peel(ObjectType::Commit)?
        .id();
    repo.tag_delete(tag)?;
    Ok(old)
}

/// Bounded cache of ref targets; `None` records a ref known to be absent.
#[derive(Debug)]
pub struct RefCache {
    entries: Mutex<LruCache<(ProjectId, String), Option<Oid>>>,
}

impl RefCache {
    /// Cache holding up to `capacity` refs (a zero capacity falls back to the default).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .or_else(|| NonZeroUsize::new(DEFAULT_REF_CACHE_CAPACITY))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Cached target of `ref_name`. The outer `None` means unknown.
    #[must_use]
    pub fn get(&self, project: ProjectId, ref_name: &str) -> Option<Option<Oid>> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(project, ref_name.to_owned()))
            .copied()
    }

    /// Record the target of `ref_name`.
    pub fn put(&self, project: ProjectId, ref_name: impl Into<String>, target: Option<Oid>) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put((project, ref_name.into()), target);
    }

    /// Drop every entry of `project`.
    pub fn invalidate_project(&self, project: ProjectId) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let stale: Vec<_> = entries
            .iter()
            .filter(|((owner, _), _)| *owner == project)
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            entries.pop(&key);
        }
    }
}

impl Default for RefCache {
    fn default() -> Self {
        Self::new(DEFAULT_REF_CACHE_CAPACITY)
    }
}
