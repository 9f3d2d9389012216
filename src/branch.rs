// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Branch inspection and creation.
//!
//! # Orphan Branches Through Plumbing
//!
//! The deploy branch starts life as an __orphan__ branch, i.e., a branch with
//! no parent commit and no file history. Porcelain offers `checkout --orphan`
//! for this, but that switches the user's working tree over to the new branch,
//! which is exactly what moss-deploy must never do. Not every git build handles
//! `--orphan` reliably in automated contexts either. So we build the branch
//! out of plumbing instead:
//!
//! 1. Take the well-known empty tree object [`EMPTY_TREE_SHA`].
//! 2. `git commit-tree` a parentless commit on top of it.
//! 3. `git update-ref` the new branch at that commit.
//!
//! The checked out branch, index, and HEAD are never touched.

use crate::git::{GitError, GitPort};

use tracing::{debug, info, instrument};

/// SHA-1 of the empty tree object. A constant of git itself.
pub const EMPTY_TREE_SHA: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

/// Branch used when nothing better can be detected.
pub const DEFAULT_BRANCH: &str = "main";

/// Detect repository's default branch.
///
/// Prefers the checked out branch. With nothing checked out, probes for
/// "main" then "master", and falls back to "main" if neither exists.
///
/// # Errors
///
/// - Return [`GitError`] if current branch cannot be queried.
#[instrument(skip(git), level = "debug")]
pub async fn detect_branch<G>(git: &G) -> Result<String>
where
    G: GitPort,
{
    if let Some(branch) = git.current_branch().await? {
        return Ok(branch);
    }

    for candidate in ["main", "master"] {
        if git.ref_exists(&format!("refs/heads/{candidate}")).await {
            return Ok(candidate.to_string());
        }
    }

    debug!("no branch detected, default to {DEFAULT_BRANCH}");
    Ok(DEFAULT_BRANCH.to_string())
}

/// Check if branch exists locally, or as a remote-tracking branch.
pub async fn branch_exists<G>(git: &G, remote: &str, name: &str) -> bool
where
    G: GitPort,
{
    git.ref_exists(&format!("refs/heads/{name}")).await
        || git
            .ref_exists(&format!("refs/remotes/{remote}/{name}"))
            .await
}

/// Create orphan branch without checking it out.
///
/// Returns SHA of the branch's root commit.
///
/// # Errors
///
/// - Return [`GitError`] if commit or reference cannot be created.
#[instrument(skip(git), level = "debug")]
pub async fn create_orphan_branch<G>(git: &G, branch: &str, message: &str) -> Result<String>
where
    G: GitPort,
{
    info!("create orphan branch {branch}");
    let commit = git.commit_tree(EMPTY_TREE_SHA, message).await?;
    git.update_ref(&format!("refs/heads/{branch}"), &commit)
        .await?;

    Ok(commit)
}

/// Make sure repository exists, initializing it when needed.
///
/// Returns `true` if a new repository had to be initialized.
///
/// # Errors
///
/// - Return [`GitError`] if repository cannot be initialized.
#[instrument(skip(git), level = "debug")]
pub async fn ensure_repository<G>(git: &G, initial_branch: &str) -> Result<bool>
where
    G: GitPort,
{
    if git.is_repository().await {
        return Ok(false);
    }

    info!("initialize repository at {:?}", git.repo().display());
    git.init(initial_branch).await?;

    Ok(true)
}

/// Friendly result alias :3
type Result<T, E = GitError> = std::result::Result<T, E>;
