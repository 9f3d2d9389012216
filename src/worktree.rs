// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Ephemeral worktree management.
//!
//! Deploying never checks out the deploy branch in the user's working tree,
//! because doing so would swap every file under the host's file watchers.
//! Instead, the deploy branch is checked out into a throwaway __worktree__ in
//! a temporary directory, used for one commit and push, then destroyed.
//!
//! # Stale Worktrees
//!
//! A deploy that crashes mid-way leaves its worktree registered in git's
//! metadata. Git then refuses to check out the same branch anywhere else,
//! complaining that it is "already checked out" (or "already used by
//! worktree", depending on git version) at the old path. The
//! [`add_with_recovery`] routine recognizes that complaint through
//! [`STALE_WORKTREE_PATTERNS`], clears the stale worktree, and retries once.
//!
//! The pattern table is a contract with git's CLI wording, which changes
//! between versions. It is meant to grow. Unrecognized phrasing that still
//! looks like a conflict is logged so new patterns can be added.
//!
//! # Cleanup
//!
//! Cleanup happens after the deploy result is already reported, so it is
//! best-effort. Failures are logged, never returned.

use crate::git::{GitError, GitPort};

use rand::Rng;
use regex::Regex;
use std::{
    path::{Path, PathBuf},
    sync::LazyLock,
    time::Duration,
};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

/// Default deadline for worktree cleanup.
///
/// Too short a deadline aborts a removal that is still in progress, which
/// itself leaves a stale worktree behind.
pub const CLEANUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Prefix of every worktree directory name.
pub const WORKTREE_PREFIX: &str = "moss-gh-pages";

/// Known git phrasings of a branch being held by another worktree.
///
/// The first capture group of each pattern is the path of the conflicting
/// worktree.
pub static STALE_WORKTREE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"already checked out at '([^']+)'",
        r"already used by worktree at '([^']+)'",
        r"'([^']+)' is a missing but (?:already registered|locked) worktree",
    ]
    .into_iter()
    .map(|pattern| Regex::new(pattern).expect("valid stale worktree pattern"))
    .collect()
});

/// Extract path of conflicting worktree from a git error message.
pub fn parse_stale_worktree(message: &str) -> Option<PathBuf> {
    STALE_WORKTREE_PATTERNS.iter().find_map(|pattern| {
        pattern
            .captures(message)
            .and_then(|captures| captures.get(1))
            .map(|path| PathBuf::from(path.as_str()))
    })
}

fn looks_like_conflict(message: &str) -> bool {
    message.contains("already checked out") || message.contains("already used by")
}

/// Construct unique worktree path under base directory.
///
/// Uniqueness comes from a millisecond timestamp plus a random suffix. This
/// is not a security boundary.
pub fn unique_worktree_path(base: impl AsRef<Path>) -> PathBuf {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix: u32 = rand::thread_rng().gen_range(0..0x0100_0000);
    base.as_ref()
        .join(format!("{WORKTREE_PREFIX}-{millis}-{suffix:06x}"))
}

/// Clear leftovers of a crashed run before creating a new worktree.
///
/// Prunes worktree metadata, then removes anything registered or sitting at
/// `path`. Every step is best-effort.
#[instrument(skip(git), level = "debug")]
pub async fn prepare<G>(git: &G, path: &Path)
where
    G: GitPort,
{
    if let Err(error) = git.worktree_prune().await {
        debug!("prune before deploy failed: {error}");
    }

    if let Err(error) = git.worktree_remove(path, true).await {
        debug!("nothing to remove at {:?}: {error}", path.display());
    }

    if let Err(error) = git.remove_dir(path).await {
        debug!("failed to delete {:?}: {error}", path.display());
    }
}

/// Add worktree for branch, recovering from a stale worktree once.
///
/// # Errors
///
/// - Return [`WorktreeError::Add`] if git refuses for any reason other than a
///   recognized stale worktree.
/// - Return [`WorktreeError::Retry`] if the retry after recovery fails too.
#[instrument(skip(git), level = "debug")]
pub async fn add_with_recovery<G>(git: &G, path: &Path, branch: &str) -> Result<()>
where
    G: GitPort,
{
    let error = match git.worktree_add(path, branch).await {
        Ok(()) => return Ok(()),
        Err(error) => error,
    };

    let message = error.message();
    let Some(stale) = parse_stale_worktree(&message) else {
        if looks_like_conflict(&message) {
            warn!("unrecognized worktree conflict, not recovering: {message}");
        }
        return Err(WorktreeError::Add(error));
    };

    if !is_disposable(git, &stale).await {
        warn!(
            "branch {branch} is checked out at {:?}, which moss-deploy does not own",
            stale.display()
        );
        return Err(WorktreeError::Add(error));
    }

    warn!(
        "branch {branch} held by stale worktree at {:?}, recovering",
        stale.display()
    );
    if let Err(error) = git.worktree_remove(&stale, true).await {
        debug!("failed to remove stale worktree: {error}");
    }
    if let Err(error) = git.remove_dir(&stale).await {
        debug!("failed to delete stale worktree directory: {error}");
    }
    if let Err(error) = git.worktree_prune().await {
        debug!("failed to prune worktrees: {error}");
    }

    git.worktree_add(path, branch)
        .await
        .map_err(|retry| WorktreeError::Retry {
            stale,
            original: error,
            retry,
        })
}

/// Check if conflicting worktree is one of ours, and safe to delete.
///
/// Only directories named with [`WORKTREE_PREFIX`] qualify, and never one
/// that is, or contains, the repository itself, e.g., the user's main working
/// tree with the deploy branch checked out.
async fn is_disposable<G>(git: &G, stale: &Path) -> bool
where
    G: GitPort,
{
    let owned = stale
        .file_name()
        .is_some_and(|name| name.to_string_lossy().starts_with(WORKTREE_PREFIX));
    if !owned {
        return false;
    }

    let repo = canonical(git.repo()).await;
    let stale = canonical(stale).await;
    !repo.starts_with(&stale)
}

async fn canonical(path: &Path) -> PathBuf {
    tokio::fs::canonicalize(path)
        .await
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Tear worktree down, best-effort and bounded by a deadline.
///
/// Tries `git worktree remove --force` first, falls back to deleting the
/// directory, then always prunes. Never fails.
#[instrument(skip(git), level = "debug")]
pub async fn cleanup_worktree<G>(git: &G, path: &Path, deadline: Duration)
where
    G: GitPort,
{
    match timeout(deadline, git.worktree_remove(path, true)).await {
        Ok(Ok(())) => debug!("removed worktree {:?}", path.display()),
        Ok(Err(error)) => {
            warn!("failed to remove worktree {:?}: {error}", path.display());
            force_delete(git, path, deadline).await;
        }
        Err(_) => {
            warn!(
                "worktree removal timed out after {}s: {:?}",
                deadline.as_secs(),
                path.display()
            );
            force_delete(git, path, deadline).await;
        }
    }

    match timeout(deadline, git.worktree_prune()).await {
        Ok(Ok(())) => info!("cleaned up worktree {:?}", path.display()),
        Ok(Err(error)) => warn!("failed to prune worktrees: {error}"),
        Err(_) => warn!("worktree prune timed out after {}s", deadline.as_secs()),
    }
}

async fn force_delete<G>(git: &G, path: &Path, deadline: Duration)
where
    G: GitPort,
{
    match timeout(deadline, git.remove_dir(path)).await {
        Ok(Ok(())) => debug!("deleted worktree directory {:?}", path.display()),
        Ok(Err(error)) => warn!("failed to delete {:?}: {error}", path.display()),
        Err(_) => warn!("deleting {:?} timed out", path.display()),
    }
}

/// Worktree management error types.
#[derive(Debug, thiserror::Error)]
pub enum WorktreeError {
    /// Worktree could not be added.
    #[error("failed to add worktree")]
    Add(#[source] GitError),

    /// Worktree could not be added even after clearing a stale worktree.
    #[error("failed to add worktree after clearing stale worktree at {:?}: {original}", stale.display())]
    Retry {
        stale: PathBuf,
        original: GitError,
        #[source]
        retry: GitError,
    },
}

/// Friendly result alias :3
pub type Result<T, E = WorktreeError> = std::result::Result<T, E>;
