// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! External program execution.
//!
//! Every other piece of moss-deploy talks to the outside world through a
//! [`CommandRunner`]. A runner takes a [`CommandRequest`], runs it to
//! completion, and hands back a [`CommandOutput`]. A nonzero exit status is
//! _not_ an error at this layer. Callers inspect [`CommandOutput::success`],
//! or use [`CommandRunner::execute_checked`] when success is required inline.
//!
//! No retry logic lives here. Retrying is a policy that is layered on top of a
//! runner, e.g., see [`crate::push`].

use async_trait::async_trait;
use std::{
    process::{Output, Stdio},
    sync::Arc,
    time::Duration,
};
use tokio::{io::AsyncWriteExt, process::Command, time::timeout};
use tracing::{debug, warn};

/// Standard error text of a command that ran past its deadline.
pub const TIMED_OUT: &str = "timed out";

/// Per-command deadlines.
///
/// General git operations get the most room. File system helpers like `cp`
/// and `rm` get less, and lightweight existence checks get very little.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub git: Duration,
    pub fs: Duration,
    pub probe: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            git: Duration::from_secs(60),
            fs: Duration::from_secs(30),
            probe: Duration::from_secs(5),
        }
    }
}

/// Request to run an external program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
    pub timeout: Duration,
}

impl CommandRequest {
    /// Construct new request for target program with default git timeout.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            timeout: Timeouts::default().git,
        }
    }

    /// Append a single argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append a listing of arguments.
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Feed payload through standard input.
    pub fn stdin(mut self, payload: impl Into<String>) -> Self {
        self.stdin = Some(payload.into());
        self
    }

    /// Set deadline for the command.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = duration;
        self
    }

    /// Render request as a single shell-like line for logging.
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }

        line
    }
}

/// Result of running an external program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with given standard output.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with given exit code and standard error.
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Output of a command that ran past its deadline.
    pub fn timed_out() -> Self {
        Self::failed(-1, TIMED_OUT)
    }

    /// Turn failed output into a [`CommandError`].
    ///
    /// The error message is the trimmed standard error, or "exit code N" if
    /// standard error is empty.
    ///
    /// # Errors
    ///
    /// - Return [`CommandError::Failed`] if output is not successful.
    pub fn into_result(self, program: impl Into<String>) -> Result<Self> {
        if self.success {
            return Ok(self);
        }

        let stderr = self.stderr.trim();
        let message = if stderr.is_empty() {
            format!("exit code {}", self.exit_code)
        } else {
            stderr.to_string()
        };

        Err(CommandError::Failed {
            program: program.into(),
            message,
        })
    }
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            success: output.status.success(),
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// Run external programs.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run program to completion.
    ///
    /// Never fails for a nonzero exit status. A command that runs past its
    /// deadline is reported as failed output with standard error
    /// [`TIMED_OUT`].
    async fn execute(&self, request: CommandRequest) -> CommandOutput;

    /// Run program to completion, and require success.
    ///
    /// # Errors
    ///
    /// - Return [`CommandError::Failed`] if program does not succeed.
    async fn execute_checked(&self, request: CommandRequest) -> Result<CommandOutput> {
        let program = request.program.clone();
        self.execute(request).await.into_result(program)
    }
}

#[async_trait]
impl<T> CommandRunner for Arc<T>
where
    T: CommandRunner + ?Sized,
{
    async fn execute(&self, request: CommandRequest) -> CommandOutput {
        (**self).execute(request).await
    }
}

/// Command runner backed by OS processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl ProcessRunner {
    /// Construct new process runner.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn execute(&self, request: CommandRequest) -> CommandOutput {
        debug!("run {}", request.display());

        let mut command = Command::new(&request.program);
        command
            .args(&request.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if request.stdin.is_some() {
            command.stdin(Stdio::piped());
        } else {
            command.stdin(Stdio::null());
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(error) => {
                debug!("failed to spawn {:?}: {error}", request.program);
                return CommandOutput::failed(-1, error.to_string());
            }
        };

        // INVARIANT: Feed stdin while output is drained, or a chatty program
        // blocks on a full stdout pipe before reading all of its input.
        if let (Some(mut pipe), Some(payload)) = (child.stdin.take(), request.stdin.clone()) {
            tokio::spawn(async move {
                if let Err(error) = pipe.write_all(payload.as_bytes()).await {
                    debug!("failed to write stdin: {error}");
                }
            });
        }

        match timeout(request.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => CommandOutput::from(output),
            Ok(Err(error)) => CommandOutput::failed(-1, error.to_string()),
            Err(_) => {
                warn!(
                    "command timed out after {}ms: {}",
                    request.timeout.as_millis(),
                    request.display()
                );
                CommandOutput::timed_out()
            }
        }
    }
}

/// Command execution error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// Program did not succeed.
    #[error("{program} failed: {message}")]
    Failed { program: String, message: String },
}

impl CommandError {
    /// Human readable failure message without program name.
    pub fn message(&self) -> &str {
        match self {
            Self::Failed { message, .. } => message.as_str(),
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = CommandError> = std::result::Result<T, E>;
