// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Pushing with retries.
//!
//! Only transient network trouble is worth retrying. Anything else, e.g., an
//! authentication rejection, or a non-fast-forward, fails the same way no
//! matter how often it is retried, so it is surfaced immediately.

use crate::git::{GitError, GitPort};

use std::{path::Path, time::Duration};
use tokio::time::sleep;
use tracing::{info, instrument, warn};

/// Failure messages that mark a network hiccup worth retrying.
pub const TRANSIENT_NETWORK_ERRORS: &[&str] = &[
    "Could not resolve host",
    "Connection refused",
    "Connection timed out",
    "Failed to connect",
    "unable to access",
    "Could not read from remote",
];

/// Check if failure message describes a transient network failure.
pub fn is_transient_network_error(message: &str) -> bool {
    TRANSIENT_NETWORK_ERRORS
        .iter()
        .any(|pattern| message.contains(pattern))
}

/// Exponential backoff policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first.
    pub attempts: u32,

    /// Delay after the first failed attempt. Doubles after each further one.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt`, counting from 1.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

/// Where and how to push.
#[derive(Debug, Clone, Copy)]
pub struct PushTarget<'a> {
    /// Worktree holding the branch to push.
    pub worktree: &'a Path,

    /// Remote to push to.
    pub remote: &'a str,

    /// Branch to push.
    pub branch: &'a str,

    /// Overwrite remote history.
    pub force: bool,
}

/// Push branch, retrying transient network failures with backoff.
///
/// Pushes with `-u` to establish upstream tracking when the branch has none.
///
/// # Errors
///
/// - Return [`GitError`] of the last attempt if every attempt fails, or of
///   the first attempt that fails for a non-network reason.
#[instrument(skip(git, target), fields(branch = target.branch), level = "debug")]
pub async fn push<G>(
    git: &G,
    target: PushTarget<'_>,
    has_upstream: bool,
    policy: RetryPolicy,
) -> Result<()>
where
    G: GitPort,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        let result = git
            .push(
                target.worktree,
                target.remote,
                target.branch,
                !has_upstream,
                target.force,
            )
            .await;

        let error = match result {
            Ok(()) => {
                info!("pushed {} to {}", target.branch, target.remote);
                return Ok(());
            }
            Err(error) => error,
        };

        if attempt >= attempts || !is_transient_network_error(&error.message()) {
            return Err(error);
        }

        let delay = policy.delay_for(attempt);
        warn!(
            "push attempt {attempt}/{attempts} failed, retry in {}ms: {error}",
            delay.as_millis()
        );
        sleep(delay).await;
        attempt += 1;
    }
}

/// Friendly result alias :3
type Result<T, E = GitError> = std::result::Result<T, E>;
