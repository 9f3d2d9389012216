// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the deploy configuration file to simplify
//! serialization and deserialization. Every field has a default, so an empty
//! file, or no file at all, is a valid configuration.

use crate::{path::default_worktree_dir, push::RetryPolicy, runner::Timeouts};

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::read_to_string,
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use tracing::debug;

/// Deploy configuration layout.
///
/// # General Layout
///
/// Four sections: the remote to deploy through, the deploy branch itself,
/// push retry behavior, and command deadlines.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Remote to deploy through.
    pub remote: RemoteSettings,

    /// Deploy branch settings.
    pub deploy: DeploySettings,

    /// Push retry settings.
    pub push: PushSettings,

    /// Command deadlines in seconds.
    pub timeouts: TimeoutSettings,
}

impl DeployConfig {
    /// Load configuration file, falling back to defaults if it is missing.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if file exists but cannot be read.
    /// - Return [`ConfigError::Deserialize`] if file is not valid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match read_to_string(path) {
            Ok(data) => data.parse(),
            Err(error) if error.kind() == ErrorKind::NotFound => {
                debug!("no configuration at {:?}, use defaults", path.display());
                Ok(Self::default())
            }
            Err(error) => Err(ConfigError::Read {
                source: error,
                path: path.to_path_buf(),
            }),
        }
    }

    /// Push retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.push.attempts,
            base_delay: Duration::from_millis(self.push.base_delay_ms),
        }
    }

    /// Command deadlines for the command runner.
    pub fn command_timeouts(&self) -> Timeouts {
        Timeouts {
            git: Duration::from_secs(self.timeouts.git_secs),
            fs: Duration::from_secs(self.timeouts.fs_secs),
            probe: Duration::from_secs(self.timeouts.probe_secs),
        }
    }

    /// Deadline of worktree cleanup.
    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.cleanup_secs)
    }
}

impl FromStr for DeployConfig {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut config: DeployConfig = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on worktree directory field.
        config.deploy.worktree_dir = PathBuf::from(
            shellexpand::full(config.deploy.worktree_dir.to_string_lossy().as_ref())
                .map_err(ConfigError::ShellExpansion)?
                .into_owned(),
        );

        Ok(config)
    }
}

impl Display for DeployConfig {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Remote settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RemoteSettings {
    /// Name of remote.
    pub name: String,

    /// URL the remote must point at. Left alone when unset.
    pub url: Option<String>,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            name: "origin".into(),
            url: None,
        }
    }
}

/// Deploy branch settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeploySettings {
    /// Branch that receives the compiled site.
    pub branch: String,

    /// Commit message of each deploy.
    pub message: String,

    /// Directory that holds temporary worktrees.
    pub worktree_dir: PathBuf,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            branch: "gh-pages".into(),
            message: "Deploy to GitHub Pages".into(),
            worktree_dir: default_worktree_dir(),
        }
    }
}

/// Push retry settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PushSettings {
    /// Total number of push attempts.
    pub attempts: u32,

    /// Delay after the first failed attempt in milliseconds.
    pub base_delay_ms: u64,
}

impl Default for PushSettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            attempts: policy.attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
        }
    }
}

/// Command deadlines in seconds.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub git_secs: u64,
    pub fs_secs: u64,
    pub probe_secs: u64,
    pub cleanup_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        let timeouts = Timeouts::default();
        Self {
            git_secs: timeouts.git.as_secs(),
            fs_secs: timeouts.fs.as_secs(),
            probe_secs: timeouts.probe.as_secs(),
            cleanup_secs: crate::worktree::CLEANUP_TIMEOUT.as_secs(),
        }
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read configuration at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
