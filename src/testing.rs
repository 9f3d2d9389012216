// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Scripted command runner for unit tests.

use crate::runner::{CommandOutput, CommandRequest, CommandRunner};

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

type Responder = dyn Fn(&str) -> CommandOutput + Send + Sync;
type Staller = dyn Fn(&str) -> bool + Send + Sync;

/// Invocation recorded by [`ScriptedRunner`].
#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub(crate) request: CommandRequest,
    pub(crate) at: Instant,
}

impl Call {
    /// Arguments after the `-C <dir>` prefix git requests carry.
    pub(crate) fn git_args(&self) -> &[String] {
        match self.request.args.first().map(String::as_str) {
            Some("-C") => &self.request.args[2..],
            _ => &self.request.args,
        }
    }

    /// Git arguments space-joined, or the full command line for other
    /// programs.
    pub(crate) fn line(&self) -> String {
        if self.request.program == "git" {
            self.git_args().join(" ")
        } else {
            self.request.display()
        }
    }
}

/// Fake runner that answers every request through a closure.
///
/// The closure sees each request as [`Call::line`]. Every request is recorded
/// in order, including requests that stall and never answer.
pub(crate) struct ScriptedRunner {
    responder: Box<Responder>,
    staller: Box<Staller>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedRunner {
    pub(crate) fn new(
        responder: impl Fn(&str) -> CommandOutput + Send + Sync + 'static,
    ) -> Arc<Self> {
        Self::stalling(|_| false, responder)
    }

    /// Runner that never answers requests matching `stall`.
    pub(crate) fn stalling(
        stall: impl Fn(&str) -> bool + Send + Sync + 'static,
        responder: impl Fn(&str) -> CommandOutput + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            responder: Box::new(responder),
            staller: Box::new(stall),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Runner that succeeds with empty output for everything.
    pub(crate) fn succeeding() -> Arc<Self> {
        Self::new(|_| CommandOutput::ok(""))
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn lines(&self) -> Vec<String> {
        self.calls().iter().map(Call::line).collect()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn execute(&self, request: CommandRequest) -> CommandOutput {
        let call = Call {
            request,
            at: Instant::now(),
        };
        let line = call.line();
        self.calls.lock().unwrap().push(call);
        if (self.staller)(&line) {
            std::future::pending::<()>().await;
        }

        (self.responder)(&line)
    }
}
