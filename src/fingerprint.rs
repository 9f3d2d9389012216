// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Content fingerprints.
//!
//! A __fingerprint__ maps relative file paths to content hashes. Comparing
//! the fingerprint of the deploy branch to the fingerprint of the freshly
//! built site tells whether a deploy would change anything at all, without
//! paying for a worktree, a commit, and a push.
//!
//! Fingerprints are always compared as maps, never as joined or sorted
//! strings. Different platforms and locales enumerate and sort non-ASCII
//! names, e.g., CJK filenames, in different orders, so any string form of a
//! fingerprint is unstable.

use crate::git::{GitError, GitPort};

use std::{
    collections::{hash_map, HashMap},
    path::Path,
};
use tracing::{debug, instrument, warn};

/// Mapping of relative file path to content hash.
///
/// # Invariant
///
/// - Each path maps to exactly one hash.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Fingerprint(HashMap<String, String>);

impl Fingerprint {
    /// Construct new empty fingerprint.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse output of `git ls-tree -r`.
    ///
    /// Each line looks like `<mode> <type> <hash>\t<path>`. Splits on the
    /// first tab only, since paths may contain spaces but the metadata fields
    /// never contain tabs. Lines without a tab, or without a hash field, are
    /// skipped.
    pub fn parse_ls_tree(listing: &str) -> Self {
        let mut fingerprint = Self::new();
        for line in listing.lines() {
            let Some((meta, path)) = line.split_once('\t') else {
                continue;
            };

            match meta.split(' ').nth(2) {
                Some(hash) if !hash.is_empty() && !path.is_empty() => {
                    fingerprint.insert(path, hash);
                }
                _ => debug!("skip malformed ls-tree line: {line:?}"),
            }
        }

        fingerprint
    }

    /// Record hash of a path, replacing any previous hash.
    pub fn insert(&mut self, path: impl Into<String>, hash: impl Into<String>) {
        self.0.insert(path.into(), hash.into());
    }

    /// Hash recorded for a path.
    pub fn get(&self, path: &str) -> Option<&str> {
        self.0.get(path).map(String::as_str)
    }

    /// Number of paths in fingerprint.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if fingerprint has no paths.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over path and hash pairs in arbitrary order.
    pub fn iter(&self) -> hash_map::Iter<'_, String, String> {
        self.0.iter()
    }
}

impl<P, H> FromIterator<(P, H)> for Fingerprint
where
    P: Into<String>,
    H: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (P, H)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(path, hash)| (path.into(), hash.into()))
                .collect(),
        )
    }
}

/// Difference between local and remote fingerprints.
///
/// # Invariant
///
/// - `added`, `modified`, and `deleted` are disjoint.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FingerprintDiff {
    /// Paths only present locally.
    pub added: Vec<String>,

    /// Paths present on both sides with differing hashes.
    pub modified: Vec<String>,

    /// Paths only present remotely.
    pub deleted: Vec<String>,
}

impl FingerprintDiff {
    /// Check if anything differs at all.
    pub fn has_changes(&self) -> bool {
        !self.added.is_empty() || !self.modified.is_empty() || !self.deleted.is_empty()
    }

    /// Total number of differing paths.
    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len()
    }

    /// Check if no path differs.
    pub fn is_empty(&self) -> bool {
        !self.has_changes()
    }
}

/// Diff local fingerprint against remote fingerprint.
///
/// Single pass over the local entries against a working copy of the remote
/// map. Entries with equal hashes are removed from the copy, and whatever
/// remains afterwards was deleted locally. Linear in file count, no sorting.
pub fn diff(local: &Fingerprint, remote: &Fingerprint) -> FingerprintDiff {
    let mut remaining = remote.0.clone();
    let mut result = FingerprintDiff::default();

    for (path, hash) in local.iter() {
        match remaining.remove(path) {
            None => result.added.push(path.clone()),
            Some(remote_hash) if remote_hash != *hash => result.modified.push(path.clone()),
            Some(_) => {}
        }
    }

    result.deleted = remaining.into_keys().collect();
    result
}

/// Fingerprint a branch or any other tree-ish.
///
/// # Errors
///
/// - Return [`GitError`] if tree-ish cannot be listed, e.g., it does not
///   exist.
#[instrument(skip(git), level = "debug")]
pub async fn remote_fingerprint<G>(git: &G, treeish: &str) -> Result<Fingerprint>
where
    G: GitPort,
{
    let listing = git.ls_tree(treeish).await?;
    Ok(Fingerprint::parse_ls_tree(&listing))
}

/// Fingerprint every file under site directory.
///
/// Hashes all files in one batched call instead of one process per file.
/// Returns [`None`] if listing or hashing fails, rather than partial data.
#[instrument(skip(git), level = "debug")]
pub async fn local_fingerprint<G>(git: &G, site_dir: &Path) -> Option<Fingerprint>
where
    G: GitPort,
{
    let files = match git.list_files(site_dir).await {
        Ok(files) => files,
        Err(error) => {
            warn!("failed to list {:?}: {error}", site_dir.display());
            return None;
        }
    };

    let root = site_dir.to_string_lossy();
    let prefix = format!("{}/", root.trim_end_matches('/'));
    let paths = files
        .iter()
        .map(|file| file.strip_prefix(prefix.as_str()).unwrap_or(file).to_string())
        .collect::<Vec<_>>();

    let hashes = match git.hash_objects(site_dir, &paths).await {
        Ok(hashes) => hashes,
        Err(error) => {
            warn!("failed to hash {:?}: {error}", site_dir.display());
            return None;
        }
    };

    Some(paths.into_iter().zip(hashes).collect())
}

/// Friendly result alias :3
type Result<T, E = GitError> = std::result::Result<T, E>;
