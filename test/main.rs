// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT


use moss_deploy::{config::DeployConfig, git::GitCli, Deployer};

use anyhow::Result;
use git2::{
    build::CheckoutBuilder, ObjectType, Repository, RepositoryInitOptions, TreeWalkMode,
    TreeWalkResult,
};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tempfile::TempDir;

/// Project repository with a bare repository acting as its `origin`.
///
/// Everything lives under one temporary directory:
///
/// - `project/`: the user's repository, with `main` checked out.
/// - `origin.git/`: bare remote that receives deploys.
/// - `site/`: compiled site to deploy.
/// - `worktrees/`: where deploy worktrees are created.
pub(crate) struct SiteFixture {
    root: TempDir,
    repo: Repository,
    origin: Repository,
}

impl SiteFixture {
    pub(crate) fn new() -> Result<Self> {
        let root = tempfile::tempdir()?;

        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("main");
        let repo = Repository::init_opts(root.path().join("project"), &opts)?;

        // INVARIANT: Always provide valid name and email.
        //   - Git will complain if this is not set in CI/CD environments.
        let mut config = repo.config()?;
        config.set_str("user.name", "John Doe")?;
        config.set_str("user.email", "john@doe.com")?;

        let origin = Repository::init_bare(root.path().join("origin.git"))?;
        fs::create_dir_all(root.path().join("site"))?;
        fs::create_dir_all(root.path().join("worktrees"))?;

        Ok(Self { root, repo, origin })
    }

    pub(crate) fn repo_path(&self) -> PathBuf {
        self.root.path().join("project")
    }

    pub(crate) fn site_dir(&self) -> PathBuf {
        self.root.path().join("site")
    }

    pub(crate) fn worktree_dir(&self) -> PathBuf {
        self.root.path().join("worktrees")
    }

    pub(crate) fn origin_url(&self) -> String {
        self.root
            .path()
            .join("origin.git")
            .to_string_lossy()
            .into_owned()
    }

    pub(crate) fn config(&self) -> DeployConfig {
        let mut config = DeployConfig::default();
        config.remote.url = Some(self.origin_url());
        config.deploy.worktree_dir = self.worktree_dir();
        config
    }

    pub(crate) fn deployer(&self) -> Deployer {
        Deployer::new(GitCli::open(self.repo_path()), self.config())
    }

    /// Write file into compiled site, creating parent directories.
    pub(crate) fn write_site(&self, path: impl AsRef<Path>, contents: &str) -> Result<()> {
        let path = self.site_dir().join(path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        Ok(())
    }

    pub(crate) fn remove_site(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::remove_file(self.site_dir().join(path))?;
        Ok(())
    }

    /// Commit file to checked out branch of project, through working tree.
    pub(crate) fn commit_file(&self, filename: impl AsRef<Path>, contents: &str) -> Result<()> {
        fs::write(self.repo_path().join(filename.as_ref()), contents)?;

        // INVARIANT: Always use new tree produced by index after staging new entry.
        let mut index = self.repo.index()?;
        index.add_path(filename.as_ref())?;
        index.write()?;
        let tree = self.repo.find_tree(index.write_tree()?)?;

        // INVARIANT: Always determine latest parent commits to append to.
        let signature = self.repo.signature()?;
        let mut parents = Vec::new();
        if let Some(parent) = self.repo.head().ok().and_then(|head| head.target()) {
            parents.push(self.repo.find_commit(parent)?);
        }
        let parents = parents.iter().collect::<Vec<_>>();

        self.repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            format!("chore: add {:?}", filename.as_ref()).as_ref(),
            &tree,
            &parents,
        )?;

        Ok(())
    }

    /// Check out local branch in project's own working tree.
    pub(crate) fn checkout(&self, branch: &str) -> Result<()> {
        self.repo.set_head(&format!("refs/heads/{branch}"))?;
        self.repo
            .checkout_head(Some(CheckoutBuilder::new().force()))?;
        Ok(())
    }

    /// Wait for detached cleanup to leave no worktree behind.
    pub(crate) async fn settle_worktrees(&self) -> Result<bool> {
        for _ in 0..100 {
            if self.registered_worktrees()? == 0
                && fs::read_dir(self.worktree_dir())?.next().is_none()
            {
                return Ok(true);
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }

        Ok(false)
    }

    /// Shorthand name of project's checked out branch.
    pub(crate) fn head_branch(&self) -> Result<String> {
        Ok(self
            .repo
            .head()?
            .shorthand()
            .unwrap_or_default()
            .to_string())
    }

    /// Number of worktrees registered in project, excluding the main one.
    pub(crate) fn registered_worktrees(&self) -> Result<usize> {
        Ok(self.repo.worktrees()?.len())
    }

    /// Sorted file paths and contents of `gh-pages` as the origin sees it.
    pub(crate) fn published(&self) -> Result<Vec<(String, String)>> {
        let commit = self
            .origin
            .find_reference("refs/heads/gh-pages")?
            .peel_to_commit()?;
        let tree = commit.tree()?;

        let mut files = Vec::new();
        tree.walk(TreeWalkMode::PreOrder, |root, entry| {
            if entry.kind() == Some(ObjectType::Blob) {
                let path = format!("{root}{}", entry.name().unwrap_or_default());
                let contents = self
                    .origin
                    .find_blob(entry.id())
                    .map(|blob| String::from_utf8_lossy(blob.content()).into_owned())
                    .unwrap_or_default();
                files.push((path, contents));
            }
            TreeWalkResult::Ok
        })?;
        files.sort();

        Ok(files)
    }

    /// SHA of `gh-pages` tip as the origin sees it.
    pub(crate) fn published_sha(&self) -> Result<String> {
        let commit = self
            .origin
            .find_reference("refs/heads/gh-pages")?
            .peel_to_commit()?;
        Ok(commit.id().to_string())
    }

    /// Parent counts along `gh-pages` history, tip first.
    pub(crate) fn published_history(&self) -> Result<Vec<usize>> {
        let mut commit = self
            .origin
            .find_reference("refs/heads/gh-pages")?
            .peel_to_commit()?;
        let mut parents = vec![commit.parent_count()];
        while commit.parent_count() > 0 {
            commit = commit.parent(0)?;
            parents.push(commit.parent_count());
        }

        Ok(parents)
    }
}

pub(crate) fn pairs(entries: &[(&str, &str)]) -> Vec<(String, String)> {
    entries
        .iter()
        .map(|(path, contents)| (path.to_string(), contents.to_string()))
        .collect()
}
