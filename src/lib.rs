// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Zero-config GitHub Pages deployment for moss.
//!
//! Publishes a compiled static site to a `gh-pages` branch through an
//! ephemeral Git worktree, so the user's checked out branch, index, and files
//! are never touched while a deploy is in flight.
//!
//! Everything talks to Git through the [`git::GitPort`] trait, which in turn
//! runs commands through [`runner::CommandRunner`]. The main entry point is
//! [`deploy::Deployer`].

pub mod branch;
pub mod config;
pub mod deploy;
pub mod fingerprint;
pub mod git;
pub mod path;
pub mod push;
pub mod remote;
pub mod runner;
pub mod worktree;

#[cfg(test)]
mod testing;

pub use deploy::{Cleanup, DeployError, DeployOutcome, Deployer};
