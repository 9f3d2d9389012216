// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Narrow port to Git and the file system.
//!
//! All higher level deploy logic depends on [`GitPort`] alone. The only
//! production implementation is [`GitCli`], which shells out to the `git`
//! binary, plus a handful of POSIX utilities (`find`, `cp`, `rm`), through a
//! [`CommandRunner`].
//!
//! # Why the CLI?
//!
//! Deployment leans heavily on worktrees, plumbing commands, and push
//! transport behavior that users already configured for their own `git`
//! binary, e.g., credential helpers and SSH agents. Going through the CLI means
//! moss-deploy behaves exactly like the user's own git would.
//!
//! Every repository command is issued as `git -C <dir> ...`, so nothing ever
//! depends on the current directory of the process.

use crate::runner::{CommandError, CommandRequest, CommandRunner, ProcessRunner, Timeouts};

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Operations moss-deploy needs from Git and the file system.
#[async_trait]
pub trait GitPort: Send + Sync + 'static {
    /// Path to repository being deployed from.
    fn repo(&self) -> &Path;

    /// Current URL of named remote, if the remote exists.
    async fn remote_url(&self, name: &str) -> Result<Option<String>>;

    /// Add a new remote.
    async fn remote_add(&self, name: &str, url: &str) -> Result<()>;

    /// Point an existing remote at a new URL.
    async fn remote_set_url(&self, name: &str, url: &str) -> Result<()>;

    /// Name of checked out branch, if any.
    async fn current_branch(&self) -> Result<Option<String>>;

    /// Check if a fully qualified reference resolves.
    async fn ref_exists(&self, reference: &str) -> bool;

    /// SHA a fully qualified reference resolves to, if it resolves.
    async fn resolve_ref(&self, reference: &str) -> Option<String>;

    /// Check if branch has upstream tracking configured.
    async fn has_upstream(&self, branch: &str) -> bool;

    /// Check if repository path is inside a Git repository.
    async fn is_repository(&self) -> bool;

    /// Initialize repository with target initial branch.
    async fn init(&self, initial_branch: &str) -> Result<()>;

    /// Create commit object for tree without parents, returning its SHA.
    async fn commit_tree(&self, tree: &str, message: &str) -> Result<String>;

    /// Point reference at target object.
    async fn update_ref(&self, reference: &str, target: &str) -> Result<()>;

    /// Run `git worktree add <path> <branch>`.
    async fn worktree_add(&self, path: &Path, branch: &str) -> Result<()>;

    /// Run `git worktree remove <path>`.
    async fn worktree_remove(&self, path: &Path, force: bool) -> Result<()>;

    /// Run `git worktree prune`.
    async fn worktree_prune(&self) -> Result<()>;

    /// Recursive tree listing of target tree-ish with unquoted paths.
    async fn ls_tree(&self, treeish: &str) -> Result<String>;

    /// Hash file contents in one batch.
    ///
    /// Paths are relative to `dir`. Hashes come back in the same order.
    /// Contents pass through the same clean filters `git add` applies, so
    /// hashes match the blobs a commit would record.
    async fn hash_objects(&self, dir: &Path, paths: &[String]) -> Result<Vec<String>>;

    /// Stage every change in worktree.
    async fn add_all(&self, worktree: &Path) -> Result<()>;

    /// Porcelain status of worktree.
    async fn status_porcelain(&self, worktree: &Path) -> Result<String>;

    /// Commit staged changes of worktree.
    async fn commit(&self, worktree: &Path, message: &str) -> Result<()>;

    /// SHA of worktree's HEAD commit.
    async fn head_sha(&self, worktree: &Path) -> Result<String>;

    /// Push branch of worktree to remote.
    async fn push(
        &self,
        worktree: &Path,
        remote: &str,
        branch: &str,
        set_upstream: bool,
        force: bool,
    ) -> Result<()>;

    /// List every regular file under directory, recursively.
    async fn list_files(&self, dir: &Path) -> Result<Vec<String>>;

    /// Forcefully delete directory and its contents.
    async fn remove_dir(&self, path: &Path) -> Result<()>;

    /// Delete everything at top-level of directory except `.git`.
    async fn clear_dir(&self, path: &Path) -> Result<()>;

    /// Copy contents of one directory into another.
    async fn copy_dir_contents(&self, from: &Path, to: &Path) -> Result<()>;
}

/// Git access through the `git` binary.
#[derive(Debug, Clone)]
pub struct GitCli<R = ProcessRunner>
where
    R: CommandRunner,
{
    runner: R,
    repo: PathBuf,
    timeouts: Timeouts,
}

impl GitCli<ProcessRunner> {
    /// Construct Git access for repository through OS processes.
    pub fn open(repo: impl Into<PathBuf>) -> Self {
        Self::new(repo, ProcessRunner::new())
    }
}

impl<R> GitCli<R>
where
    R: CommandRunner,
{
    /// Construct Git access for repository through target runner.
    pub fn new(repo: impl Into<PathBuf>, runner: R) -> Self {
        Self {
            runner,
            repo: repo.into(),
            timeouts: Timeouts::default(),
        }
    }

    /// Replace default command deadlines.
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    fn git_request(&self, dir: &Path, args: &[&str]) -> CommandRequest {
        CommandRequest::new("git")
            .args(["-C".to_string(), path_arg(dir)])
            .args(args.iter().copied())
            .timeout(self.timeouts.git)
    }

    async fn git_in(&self, dir: &Path, args: &[&str]) -> Result<String> {
        let output = self
            .runner
            .execute_checked(self.git_request(dir, args))
            .await?;
        Ok(output.stdout)
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        self.git_in(&self.repo, args).await
    }

    async fn probe(&self, args: &[&str]) -> bool {
        let request = self.git_request(&self.repo, args).timeout(self.timeouts.probe);
        self.runner.execute(request).await.success
    }

    async fn shell(&self, program: &str, args: &[&str]) -> Result<String> {
        let request = CommandRequest::new(program)
            .args(args.iter().copied())
            .timeout(self.timeouts.fs);
        let output = self.runner.execute_checked(request).await?;
        Ok(output.stdout)
    }
}

#[async_trait]
impl<R> GitPort for GitCli<R>
where
    R: CommandRunner + 'static,
{
    fn repo(&self) -> &Path {
        self.repo.as_path()
    }

    async fn remote_url(&self, name: &str) -> Result<Option<String>> {
        let request = self.git_request(&self.repo, &["remote", "get-url", name]);
        let output = self.runner.execute(request).await;
        if !output.success {
            debug!("remote {name:?} not found: {}", output.stderr.trim());
            return Ok(None);
        }

        Ok(Some(output.stdout.trim().to_string()))
    }

    async fn remote_add(&self, name: &str, url: &str) -> Result<()> {
        self.git(&["remote", "add", name, url]).await?;
        Ok(())
    }

    async fn remote_set_url(&self, name: &str, url: &str) -> Result<()> {
        self.git(&["remote", "set-url", name, url]).await?;
        Ok(())
    }

    async fn current_branch(&self) -> Result<Option<String>> {
        let branch = self.git(&["branch", "--show-current"]).await?;
        let branch = branch.trim();
        if branch.is_empty() {
            return Ok(None);
        }

        Ok(Some(branch.to_string()))
    }

    async fn ref_exists(&self, reference: &str) -> bool {
        self.probe(&["rev-parse", "--verify", "--quiet", reference])
            .await
    }

    async fn resolve_ref(&self, reference: &str) -> Option<String> {
        let request = self
            .git_request(&self.repo, &["rev-parse", "--verify", "--quiet", reference])
            .timeout(self.timeouts.probe);
        let output = self.runner.execute(request).await;
        let sha = output.stdout.trim();
        if !output.success || sha.is_empty() {
            return None;
        }

        Some(sha.to_string())
    }

    async fn has_upstream(&self, branch: &str) -> bool {
        let upstream = format!("{branch}@{{upstream}}");
        self.probe(&["rev-parse", "--abbrev-ref", upstream.as_str()])
            .await
    }

    async fn is_repository(&self) -> bool {
        self.probe(&["rev-parse", "--git-dir"]).await
    }

    async fn init(&self, initial_branch: &str) -> Result<()> {
        self.git(&["init", "-b", initial_branch]).await?;
        Ok(())
    }

    async fn commit_tree(&self, tree: &str, message: &str) -> Result<String> {
        let sha = self.git(&["commit-tree", tree, "-m", message]).await?;
        non_empty_sha("commit-tree", sha)
    }

    async fn update_ref(&self, reference: &str, target: &str) -> Result<()> {
        self.git(&["update-ref", reference, target]).await?;
        Ok(())
    }

    async fn worktree_add(&self, path: &Path, branch: &str) -> Result<()> {
        let path = path_arg(path);
        self.git(&["worktree", "add", path.as_str(), branch]).await?;
        Ok(())
    }

    async fn worktree_remove(&self, path: &Path, force: bool) -> Result<()> {
        let path = path_arg(path);
        let mut args = vec!["worktree", "remove", path.as_str()];
        if force {
            args.push("--force");
        }
        self.git(&args).await?;
        Ok(())
    }

    async fn worktree_prune(&self) -> Result<()> {
        self.git(&["worktree", "prune"]).await?;
        Ok(())
    }

    async fn ls_tree(&self, treeish: &str) -> Result<String> {
        self.git(&["-c", "core.quotepath=false", "ls-tree", "-r", treeish])
            .await
    }

    async fn hash_objects(&self, dir: &Path, paths: &[String]) -> Result<Vec<String>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }

        let mut payload = paths.join("\n");
        payload.push('\n');
        let request = self
            .git_request(dir, &["hash-object", "--stdin-paths"])
            .stdin(payload);
        let output = self.runner.execute_checked(request).await?;
        let hashes = output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>();

        if hashes.len() != paths.len() {
            return Err(GitError::UnexpectedOutput {
                command: "hash-object".into(),
                output: format!("expected {} hashes, got {}", paths.len(), hashes.len()),
            });
        }

        Ok(hashes)
    }

    async fn add_all(&self, worktree: &Path) -> Result<()> {
        self.git_in(worktree, &["add", "-A"]).await?;
        Ok(())
    }

    async fn status_porcelain(&self, worktree: &Path) -> Result<String> {
        self.git_in(worktree, &["status", "--porcelain"]).await
    }

    async fn commit(&self, worktree: &Path, message: &str) -> Result<()> {
        self.git_in(worktree, &["commit", "-m", message]).await?;
        Ok(())
    }

    async fn head_sha(&self, worktree: &Path) -> Result<String> {
        let sha = self.git_in(worktree, &["rev-parse", "HEAD"]).await?;
        non_empty_sha("rev-parse", sha)
    }

    async fn push(
        &self,
        worktree: &Path,
        remote: &str,
        branch: &str,
        set_upstream: bool,
        force: bool,
    ) -> Result<()> {
        let mut args = vec!["push"];
        if force {
            args.push("--force");
        }
        if set_upstream {
            args.push("-u");
        }
        args.extend([remote, branch]);
        self.git_in(worktree, &args).await?;
        Ok(())
    }

    async fn list_files(&self, dir: &Path) -> Result<Vec<String>> {
        let dir = path_arg(dir);
        let listing = self.shell("find", &[dir.as_str(), "-type", "f"]).await?;
        Ok(listing
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn remove_dir(&self, path: &Path) -> Result<()> {
        let path = path_arg(path);
        self.shell("rm", &["-rf", path.as_str()]).await?;
        Ok(())
    }

    async fn clear_dir(&self, path: &Path) -> Result<()> {
        let path = path_arg(path);
        self.shell(
            "find",
            &[
                path.as_str(),
                "-mindepth",
                "1",
                "-maxdepth",
                "1",
                "!",
                "-name",
                ".git",
                "-exec",
                "rm",
                "-rf",
                "{}",
                "+",
            ],
        )
        .await?;
        Ok(())
    }

    async fn copy_dir_contents(&self, from: &Path, to: &Path) -> Result<()> {
        // INVARIANT: Trailing "/." copies contents, including dotfiles, not
        // the directory itself.
        let from = format!("{}/.", path_arg(from).trim_end_matches('/'));
        let to = path_arg(to);
        self.shell("cp", &["-R", from.as_str(), to.as_str()]).await?;
        Ok(())
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn non_empty_sha(command: &str, output: String) -> Result<String> {
    let sha = output.trim();
    if sha.is_empty() {
        return Err(GitError::UnexpectedOutput {
            command: command.into(),
            output,
        });
    }

    Ok(sha.to_string())
}

/// Git access error types.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GitError {
    /// Underlying command failed.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Command succeeded, but its output makes no sense.
    #[error("unexpected output from git {command}: {output:?}")]
    UnexpectedOutput { command: String, output: String },
}

impl GitError {
    /// Failure message used for error classification.
    pub fn message(&self) -> String {
        match self {
            Self::Command(error) => error.message().to_string(),
            Self::UnexpectedOutput { .. } => self.to_string(),
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = GitError> = std::result::Result<T, E>;
