// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Remote configuration.
//!
//! The user is free to rewire their remotes out-of-band at any time. Thus,
//! moss-deploy never trusts a remote to still point where it did last time,
//! and re-checks it before every deploy through [`ensure_remote`].

use crate::git::{GitError, GitPort};

use regex::Regex;
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    sync::LazyLock,
};
use tracing::{info, instrument};

/// What [`ensure_remote`] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteChange {
    /// Remote already pointed at desired URL.
    Unchanged,

    /// Remote existed, but pointed somewhere else.
    Updated,

    /// Remote did not exist.
    Added,
}

impl Display for RemoteChange {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Unchanged => fmt.write_str("unchanged"),
            Self::Updated => fmt.write_str("updated"),
            Self::Added => fmt.write_str("added"),
        }
    }
}

/// Make sure named remote points at target URL.
///
/// Idempotent. Calling it again with the same URL performs no mutation.
///
/// # Errors
///
/// - Return [`GitError`] if remote cannot be added or rewritten.
#[instrument(skip(git), level = "debug")]
pub async fn ensure_remote<G>(git: &G, name: &str, url: &str) -> Result<RemoteChange>
where
    G: GitPort,
{
    match git.remote_url(name).await? {
        Some(current) if current == url => Ok(RemoteChange::Unchanged),
        Some(current) => {
            info!("point remote {name} from {current} to {url}");
            git.remote_set_url(name, url).await?;
            Ok(RemoteChange::Updated)
        }
        None => {
            info!("add remote {name} at {url}");
            git.remote_add(name, url).await?;
            Ok(RemoteChange::Added)
        }
    }
}

static GITHUB_REMOTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:https?://(?:[^@/]+@)?github\.com/|ssh://git@github\.com/|git@github\.com:)([^/]+)/([^/]+?)(?:\.git)?/?$",
    )
    .expect("valid GitHub remote pattern")
});

/// Derive public GitHub Pages URL from a GitHub remote URL.
///
/// A repository named `<owner>.github.io` is a user site served from the
/// root. Every other repository is a project site served under its own name.
/// Returns [`None`] for remotes that do not live on GitHub.
pub fn pages_url(remote_url: &str) -> Option<String> {
    let captures = GITHUB_REMOTE.captures(remote_url.trim())?;
    let owner = captures.get(1)?.as_str();
    let repo = captures.get(2)?.as_str();
    let host = format!("{}.github.io", owner.to_lowercase());

    if repo.eq_ignore_ascii_case(&host) {
        return Some(format!("https://{host}/"));
    }

    Some(format!("https://{host}/{repo}/"))
}

/// Friendly result alias :3
type Result<T, E = GitError> = std::result::Result<T, E>;
