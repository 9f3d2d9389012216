// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Zero-config GitHub Pages deployment.
//!
//! Publishes a compiled static site to the deploy branch without ever
//! checking that branch out in the user's working tree. The sequence is
//! strictly ordered, since each step relies on the previous one:
//!
//! 1. Clear leftovers of a crashed run at this run's worktree path.
//! 2. Create the deploy branch as an orphan if it does not exist yet.
//! 3. Add a worktree for the deploy branch, recovering from stale worktrees.
//! 4. Empty the worktree, except for `.git`.
//! 5. Copy the compiled site into the worktree.
//! 6. Stage everything. Nothing staged, and nothing left unpushed by an
//!    earlier failed run, means nothing to deploy.
//! 7. Commit, and force-push the deploy branch.
//!
//! Force-pushing is fine here. The deploy branch history is disposable, and
//! can always be regenerated from the site sources.
//!
//! # Deferred Cleanup
//!
//! The worktree is torn down _after_ the result is handed to the caller, so a
//! slow `git worktree remove` never delays reporting a deploy. The result
//! therefore carries an explicit [`Cleanup`] action that the caller either
//! awaits or detaches. If the sequence fails part way, cleanup is detached
//! before the error is returned, so a failure never leaks a worktree short of
//! the process being killed.

use crate::{
    branch::{branch_exists, create_orphan_branch},
    config::DeployConfig,
    fingerprint::{diff, local_fingerprint, remote_fingerprint, FingerprintDiff},
    git::{GitCli, GitError, GitPort},
    push::{push, PushTarget},
    remote::ensure_remote,
    worktree::{self, add_with_recovery, cleanup_worktree, unique_worktree_path},
};

use futures::future::BoxFuture;
use indicatif::ProgressBar;
use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    future::Future,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

/// Deferred worktree teardown.
///
/// Must be either awaited through [`Cleanup::run`], or detached through
/// [`Cleanup::detach`]. Never fails.
#[must_use = "worktree is leaked unless cleanup is run or detached"]
pub struct Cleanup {
    worktree: PathBuf,
    task: BoxFuture<'static, ()>,
}

impl Cleanup {
    fn new(worktree: PathBuf, task: impl Future<Output = ()> + Send + 'static) -> Self {
        Self {
            worktree,
            task: Box::pin(task),
        }
    }

    /// Path of worktree this cleanup tears down.
    pub fn worktree(&self) -> &Path {
        self.worktree.as_path()
    }

    /// Tear worktree down, and wait for it.
    pub async fn run(self) {
        self.task.await
    }

    /// Tear worktree down in the background.
    pub fn detach(self) -> JoinHandle<()> {
        tokio::spawn(self.task)
    }
}

impl Debug for Cleanup {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.debug_struct("Cleanup")
            .field("worktree", &self.worktree)
            .finish_non_exhaustive()
    }
}

/// Result of a deploy.
#[derive(Debug)]
pub struct DeployOutcome {
    /// SHA of deployed commit. Empty if there was nothing to deploy.
    pub commit_sha: String,

    /// Deferred worktree teardown.
    pub cleanup: Cleanup,
}

impl DeployOutcome {
    /// Check if deploy found nothing to commit.
    pub fn is_noop(&self) -> bool {
        self.commit_sha.is_empty()
    }
}

/// Deploy engine.
///
/// Owns its Git access exclusively. The host is expected to run at most one
/// deploy per repository at a time, the engine itself takes no locks.
#[derive(Debug)]
pub struct Deployer<G = GitCli>
where
    G: GitPort,
{
    git: Arc<G>,
    config: DeployConfig,
    progress: ProgressBar,
}

impl<G> Deployer<G>
where
    G: GitPort,
{
    /// Construct new deployer with hidden progress reporting.
    pub fn new(git: G, config: DeployConfig) -> Self {
        Self {
            git: Arc::new(git),
            config,
            progress: ProgressBar::hidden(),
        }
    }

    /// Report coarse progress through target progress bar.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Git access used by deployer.
    pub fn git(&self) -> &G {
        self.git.as_ref()
    }

    /// Configuration used by deployer.
    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    /// Compare site directory against the published deploy branch.
    ///
    /// Compares against the remote-tracking branch only. The local branch may
    /// hold commits that never made it to the remote. Returns [`None`] if
    /// either side cannot be fingerprinted, e.g., nothing was published yet.
    #[instrument(skip(self), level = "debug")]
    pub async fn pending_changes(&self, site_dir: &Path) -> Option<FingerprintDiff> {
        let git = self.git.as_ref();
        let treeish = self.published_ref();
        if !git.ref_exists(&treeish).await {
            debug!("nothing published at {treeish} to compare against");
            return None;
        }

        let remote = match remote_fingerprint(git, &treeish).await {
            Ok(fingerprint) => fingerprint,
            Err(error) => {
                debug!("failed to fingerprint {treeish}: {error}");
                return None;
            }
        };
        let local = local_fingerprint(git, site_dir).await?;

        Some(diff(&local, &remote))
    }

    /// Check if deploying site directory would change anything.
    ///
    /// Errs on the side of deploying whenever a comparison is impossible.
    pub async fn needs_deploy(&self, site_dir: &Path) -> bool {
        self.pending_changes(site_dir)
            .await
            .is_none_or(|changes| changes.has_changes())
    }

    /// Deploy site directory to the deploy branch.
    ///
    /// Returns SHA of the deployed commit, or an empty SHA if the deploy
    /// branch already matched the site, along with the deferred cleanup.
    ///
    /// # Errors
    ///
    /// - Return [`DeployError::MissingSite`] if site directory does not exist.
    /// - Return [`DeployError::Git`] if any git step fails unrecoverably.
    /// - Return [`DeployError::Worktree`] if worktree cannot be added.
    #[instrument(skip(self), level = "debug")]
    pub async fn deploy_to_gh_pages(&self, site_dir: &Path) -> Result<DeployOutcome> {
        let is_dir = tokio::fs::metadata(site_dir)
            .await
            .map(|metadata| metadata.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(DeployError::MissingSite(site_dir.to_path_buf()));
        }

        if let Some(url) = &self.config.remote.url {
            ensure_remote(self.git.as_ref(), &self.config.remote.name, url).await?;
        }

        let worktree = unique_worktree_path(&self.config.deploy.worktree_dir);
        let cleanup = self.cleanup_for(&worktree);

        match self.publish(site_dir, &worktree).await {
            Ok(commit_sha) => {
                if commit_sha.is_empty() {
                    self.progress.finish_with_message("nothing to deploy");
                } else {
                    self.progress
                        .finish_with_message(format!("deployed {commit_sha}"));
                }
                Ok(DeployOutcome { commit_sha, cleanup })
            }
            Err(error) => {
                self.progress.abandon_with_message("deploy failed");
                drop(cleanup.detach());
                Err(error)
            }
        }
    }

    async fn publish(&self, site_dir: &Path, worktree: &Path) -> Result<String> {
        let git = self.git.as_ref();
        let remote = self.config.remote.name.as_str();
        let branch = self.config.deploy.branch.as_str();

        self.progress.set_message("clearing stale worktrees");
        worktree::prepare(git, worktree).await;

        if branch_exists(git, remote, branch).await {
            self.progress.set_message(format!("checking out {branch}"));
        } else {
            self.progress.set_message(format!("creating {branch}"));
            create_orphan_branch(git, branch, &format!("Create {branch}")).await?;
        }
        add_with_recovery(git, worktree, branch).await?;

        self.progress.set_message("copying site");
        git.clear_dir(worktree).await?;
        git.copy_dir_contents(site_dir, worktree).await?;

        self.progress.set_message("committing");
        git.add_all(worktree).await?;
        let commit_sha = if git.status_porcelain(worktree).await?.trim().is_empty() {
            // INVARIANT: Local branch may be ahead of the remote if an earlier
            // push failed. Only report a no-op once the remote has it too.
            let head = git.head_sha(worktree).await?;
            if git.resolve_ref(&self.published_ref()).await.as_deref() == Some(head.as_str()) {
                info!("{branch} already matches {:?}", site_dir.display());
                return Ok(String::new());
            }

            info!("{branch} at {head} was never published, pushing it");
            head
        } else {
            git.commit(worktree, &self.config.deploy.message).await?;
            git.head_sha(worktree).await?
        };

        self.progress.set_message(format!("pushing {branch}"));
        let has_upstream = git.has_upstream(branch).await;
        let target = PushTarget {
            worktree,
            remote,
            branch,
            force: true,
        };
        push(git, target, has_upstream, self.config.retry_policy()).await?;

        info!("deployed {commit_sha} to {remote}/{branch}");
        Ok(commit_sha)
    }

    fn published_ref(&self) -> String {
        format!(
            "refs/remotes/{}/{}",
            self.config.remote.name, self.config.deploy.branch
        )
    }

    fn cleanup_for(&self, worktree: &Path) -> Cleanup {
        let git = Arc::clone(&self.git);
        let path = worktree.to_path_buf();
        let deadline = self.config.cleanup_timeout();

        Cleanup::new(worktree.to_path_buf(), async move {
            cleanup_worktree(git.as_ref(), &path, deadline).await;
        })
    }
}

/// Deploy error types.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// Compiled site directory is missing.
    #[error("site directory {:?} does not exist", .0.display())]
    MissingSite(PathBuf),

    /// Git step failed.
    #[error(transparent)]
    Git(#[from] GitError),

    /// Worktree could not be added.
    #[error(transparent)]
    Worktree(#[from] worktree::WorktreeError),
}

/// Friendly result alias :3
pub type Result<T, E = DeployError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        branch::EMPTY_TREE_SHA,
        runner::CommandOutput,
        testing::ScriptedRunner,
    };
    use pretty_assertions::assert_eq;

    const SHA: &str = "0123456789abcdef0123456789abcdef01234567";

    fn first_deploy(line: &str) -> CommandOutput {
        if line.starts_with("rev-parse --verify") || line.starts_with("rev-parse --abbrev-ref") {
            return CommandOutput::failed(1, "");
        }
        if line.starts_with("commit-tree") {
            return CommandOutput::ok("1111111111111111111111111111111111111111\n");
        }
        if line.starts_with("status --porcelain") {
            return CommandOutput::ok("A  index.html\nA  about.html\n");
        }
        if line == "rev-parse HEAD" {
            return CommandOutput::ok(format!("{SHA}\n"));
        }
        CommandOutput::ok("")
    }

    fn published(line: &str) -> CommandOutput {
        if line == "rev-parse HEAD"
            || line == "rev-parse --verify --quiet refs/remotes/origin/gh-pages"
        {
            return CommandOutput::ok(format!("{SHA}\n"));
        }
        CommandOutput::ok("")
    }

    fn deployer(runner: Arc<ScriptedRunner>) -> Deployer<GitCli<Arc<ScriptedRunner>>> {
        let mut config = DeployConfig::default();
        config.deploy.worktree_dir = PathBuf::from("/tmp/moss-test");
        Deployer::new(GitCli::new("/work/site", runner), config)
    }

    async fn settle(runner: &ScriptedRunner) {
        for _ in 0..100 {
            if runner.lines().last().is_some_and(|line| line == "worktree prune") {
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn first_deploy_creates_orphan_branch() -> anyhow::Result<()> {
        let site = tempfile::tempdir()?;
        let runner = ScriptedRunner::new(first_deploy);
        let deployer = deployer(runner.clone());

        let outcome = deployer.deploy_to_gh_pages(site.path()).await?;
        assert_eq!(outcome.commit_sha, SHA);
        assert!(outcome.cleanup.worktree().starts_with("/tmp/moss-test"));

        let lines = runner.lines();
        let wt = outcome.cleanup.worktree().display().to_string();
        assert_eq!(
            lines[..3],
            [
                "worktree prune".to_string(),
                format!("worktree remove {wt} --force"),
                format!("rm -rf {wt}"),
            ]
        );
        let position = |expect: &str| lines.iter().position(|line| line == expect);
        let orphan = position(&format!("commit-tree {EMPTY_TREE_SHA} -m Create gh-pages"));
        let add = position(&format!("worktree add {wt} gh-pages"));
        let commit = position("commit -m Deploy to GitHub Pages");
        let pushed = position("push --force -u origin gh-pages");
        assert!(orphan.is_some() && add.is_some() && commit.is_some() && pushed.is_some());
        assert!(orphan < add && add < commit && commit < pushed);
        assert!(!lines.iter().any(|line| line.starts_with("checkout")));

        outcome.cleanup.run().await;
        assert_eq!(runner.lines().last().map(String::as_str), Some("worktree prune"));
        assert!(runner
            .lines()
            .contains(&format!("worktree remove {wt} --force")));

        Ok(())
    }

    #[tokio::test]
    async fn unchanged_site_is_noop() -> anyhow::Result<()> {
        let site = tempfile::tempdir()?;
        let runner = ScriptedRunner::new(published);
        let deployer = deployer(runner.clone());

        let outcome = deployer.deploy_to_gh_pages(site.path()).await?;
        assert!(outcome.is_noop());
        assert!(!runner.lines().iter().any(|line| line.starts_with("commit")));
        assert!(!runner.lines().iter().any(|line| line.starts_with("push")));
        outcome.cleanup.run().await;

        Ok(())
    }

    #[tokio::test]
    async fn unpushed_commit_is_published_without_new_commit() -> anyhow::Result<()> {
        let site = tempfile::tempdir()?;
        let runner = ScriptedRunner::new(|line| {
            if line.starts_with("rev-parse --verify --quiet refs/remotes")
                || line.starts_with("rev-parse --abbrev-ref")
            {
                return CommandOutput::failed(1, "");
            }
            published(line)
        });
        let deployer = deployer(runner.clone());

        let outcome = deployer.deploy_to_gh_pages(site.path()).await?;
        assert_eq!(outcome.commit_sha, SHA);
        let lines = runner.lines();
        assert!(!lines.iter().any(|line| line.starts_with("commit")));
        assert!(lines.contains(&"push --force -u origin gh-pages".to_string()));
        outcome.cleanup.run().await;

        Ok(())
    }

    #[tokio::test]
    async fn failure_still_cleans_up() -> anyhow::Result<()> {
        let site = tempfile::tempdir()?;
        let runner = ScriptedRunner::new(|line| {
            if line.starts_with("commit -m") {
                return CommandOutput::failed(1, "fatal: unable to auto-detect email address");
            }
            first_deploy(line)
        });
        let deployer = deployer(runner.clone());

        let result = deployer.deploy_to_gh_pages(site.path()).await;
        assert!(matches!(result, Err(DeployError::Git(_))));

        settle(&runner).await;
        let lines = runner.lines();
        let commit = lines.iter().position(|line| line.starts_with("commit -m"));
        let remove = lines.iter().rposition(|line| line.starts_with("worktree remove"));
        assert!(commit < remove);
        assert_eq!(lines.last().map(String::as_str), Some("worktree prune"));

        Ok(())
    }

    #[tokio::test]
    async fn missing_site_fails_before_touching_git() {
        let runner = ScriptedRunner::succeeding();
        let deployer = deployer(runner.clone());
        let result = deployer
            .deploy_to_gh_pages(Path::new("/no/such/moss/site"))
            .await;

        assert!(matches!(result, Err(DeployError::MissingSite(_))));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn configured_remote_is_ensured_first() -> anyhow::Result<()> {
        let site = tempfile::tempdir()?;
        let runner = ScriptedRunner::new(|line| {
            if line.starts_with("remote get-url") {
                return CommandOutput::failed(2, "error: No such remote 'origin'");
            }
            published(line)
        });
        let mut config = DeployConfig::default();
        config.remote.url = Some("https://github.com/moss/site.git".into());
        let deployer = Deployer::new(GitCli::new("/work/site", runner.clone()), config);

        let outcome = deployer.deploy_to_gh_pages(site.path()).await?;
        outcome.cleanup.run().await;
        let lookups = runner
            .lines()
            .iter()
            .filter(|line| line.starts_with("remote get-url"))
            .count();
        assert_eq!(lookups, 1);
        assert_eq!(
            runner.lines()[..2],
            [
                "remote get-url origin".to_string(),
                "remote add origin https://github.com/moss/site.git".to_string(),
            ]
        );

        Ok(())
    }

    #[tokio::test]
    async fn pending_changes_without_branch_is_unknown() -> anyhow::Result<()> {
        let site = tempfile::tempdir()?;
        let runner = ScriptedRunner::new(|_| CommandOutput::failed(1, ""));
        let deployer = deployer(runner);

        assert_eq!(deployer.pending_changes(site.path()).await, None);
        assert!(deployer.needs_deploy(site.path()).await);

        Ok(())
    }

    #[tokio::test]
    async fn pending_changes_ignores_unpublished_local_branch() -> anyhow::Result<()> {
        let site = tempfile::tempdir()?;
        let runner = ScriptedRunner::new(|line| {
            if line.starts_with("rev-parse --verify --quiet refs/remotes") {
                return CommandOutput::failed(1, "");
            }
            CommandOutput::ok("")
        });
        let deployer = deployer(runner.clone());

        assert_eq!(deployer.pending_changes(site.path()).await, None);
        assert!(!runner.lines().iter().any(|line| line.contains("ls-tree")));

        Ok(())
    }
}
