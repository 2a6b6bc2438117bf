// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::command::CommandSpec;
use crate::app::errors::AppResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One complete line read from the running process.
#[derive(Debug, Clone)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub line: String,
}

impl OutputLine {
    pub fn stdout(line: impl Into<String>) -> Self {
        Self {
            stream: OutputStream::Stdout,
            line: line.into(),
        }
    }

    pub fn stderr(line: impl Into<String>) -> Self {
        Self {
            stream: OutputStream::Stderr,
            line: line.into(),
        }
    }
}

/// A running command on the compute host. Owned by one job for the duration
/// of a single execution phase and released afterwards.
///
/// `poll_output` must drain both streams on every call; letting one stream
/// back up while the other is read can stall the process behind a full
/// transport buffer.
#[async_trait]
pub trait ExecChannel: Send {
    /// Returns every complete line written since the last poll, both streams
    /// interleaved in arrival order. Never waits for the process.
    async fn poll_output(&mut self) -> AppResult<Vec<OutputLine>>;

    /// True once the process has exited and all of its output has been
    /// handed out by `poll_output`.
    fn is_finished(&self) -> bool;

    /// Valid only once `is_finished` returns true.
    fn exit_code(&self) -> Option<i32>;

    /// Requests termination: graceful (SIGTERM) when `forceful` is false,
    /// forced (SIGKILL) otherwise.
    async fn terminate(&mut self, forceful: bool) -> AppResult<()>;

    /// Releases the underlying channel or process handle. Safe to call
    /// whether or not the process has exited.
    async fn disconnect(&mut self);
}

/// Opens execution channels on the selected compute host. Connection or
/// authentication problems surface here, before any resource is created.
#[async_trait]
pub trait ChannelOpener: Send + Sync {
    async fn open(&self, command: &CommandSpec) -> AppResult<Box<dyn ExecChannel>>;
}
