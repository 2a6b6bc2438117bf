// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use crate::app::command::CommandSpec;
use crate::app::errors::{AppError, AppResult};
use crate::app::ports::{ChannelOpener, ExecChannel, OutputLine, OutputStream, Staging};
use crate::app::tracker::ResourceTracker;

/// Runs commands as child processes on this machine. The command is passed
/// as a literal argument vector; no shell is involved.
#[derive(Clone, Default)]
pub struct LocalAdapter;

impl LocalAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ChannelOpener for LocalAdapter {
    async fn open(&self, command: &CommandSpec) -> AppResult<Box<dyn ExecChannel>> {
        let child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                AppError::execution(format!("could not start '{}': {}", command.program, err))
            })?;
        Ok(Box::new(LocalChannel::new(child)))
    }
}

struct LocalChannel {
    child: Child,
    lines: mpsc::UnboundedReceiver<OutputLine>,
    exit_code: Option<i32>,
    readers_closed: bool,
}

impl LocalChannel {
    fn new(mut child: Child) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            spawn_line_reader(stdout, OutputStream::Stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_reader(stderr, OutputStream::Stderr, tx);
        }
        Self {
            child,
            lines: rx,
            exit_code: None,
            readers_closed: false,
        }
    }
}

fn spawn_line_reader<R>(reader: R, stream: OutputStream, tx: mpsc::UnboundedSender<OutputLine>)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(OutputLine { stream, line }).is_err() {
                break;
            }
        }
    });
}

fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    // Shell convention for signal deaths, so SIGTERM reads as 143.
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1)
}

#[async_trait]
impl ExecChannel for LocalChannel {
    async fn poll_output(&mut self) -> AppResult<Vec<OutputLine>> {
        let mut out = Vec::new();
        loop {
            match self.lines.try_recv() {
                Ok(line) => out.push(line),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.readers_closed = true;
                    break;
                }
            }
        }
        if self.exit_code.is_none() {
            match self.child.try_wait() {
                Ok(Some(status)) => self.exit_code = Some(exit_code_of(status)),
                Ok(None) => {}
                Err(err) => {
                    return Err(AppError::execution(format!(
                        "could not poll child process: {}",
                        err
                    )));
                }
            }
        }
        Ok(out)
    }

    fn is_finished(&self) -> bool {
        // Both pipes at EOF and the exit status reaped: nothing more can
        // arrive from this process.
        self.exit_code.is_some() && self.readers_closed
    }

    fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    async fn terminate(&mut self, forceful: bool) -> AppResult<()> {
        if forceful {
            match self.child.start_kill() {
                Ok(()) => Ok(()),
                // Already reaped.
                Err(err) if err.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
                Err(err) => Err(AppError::execution(format!("kill failed: {}", err))),
            }
        } else {
            let Some(pid) = self.child.id() else {
                return Ok(());
            };
            let rc = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
            if rc == 0 {
                Ok(())
            } else {
                let errno = std::io::Error::last_os_error();
                Err(AppError::execution(format!(
                    "SIGTERM to pid {} failed: {}",
                    pid, errno
                )))
            }
        }
    }

    async fn disconnect(&mut self) {
        // Reap if the process already exited; kill_on_drop covers the rest.
        let _ = self.child.try_wait();
    }
}

/// Staging on the local filesystem, used when the compute binary runs on
/// this machine and by callers placing the packed blob into the process
/// folder.
#[derive(Clone, Default)]
pub struct LocalStaging;

impl LocalStaging {
    pub fn new() -> Self {
        Self
    }
}

/// Ancestor directories of `path` that do not exist yet, outermost first.
fn missing_ancestors(path: &Path) -> Vec<PathBuf> {
    let mut missing = Vec::new();
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir.as_os_str().is_empty() || dir.exists() {
            break;
        }
        missing.push(dir.to_path_buf());
        current = dir.parent();
    }
    missing.reverse();
    missing
}

#[async_trait]
impl Staging for LocalStaging {
    async fn upload(
        &self,
        local: &Path,
        remote: &str,
        tracker: &ResourceTracker,
    ) -> AppResult<()> {
        let dest = Path::new(remote);
        for dir in missing_ancestors(dest) {
            tracker.track_dir(dir.to_string_lossy().into_owned());
            tokio::fs::create_dir(&dir).await.map_err(|err| {
                AppError::staging(format!("could not create {}: {}", dir.display(), err))
            })?;
        }
        tracker.track_file(remote);
        tokio::fs::copy(local, dest).await.map_err(|err| {
            AppError::staging(format!(
                "could not copy {} to {}: {}",
                local.display(),
                remote,
                err
            ))
        })?;
        Ok(())
    }

    async fn download(&self, remote: &str, local: &Path) -> AppResult<()> {
        if let Some(parent) = local.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|err| {
                AppError::staging(format!("could not create {}: {}", parent.display(), err))
            })?;
        }
        tokio::fs::copy(remote, local).await.map_err(|err| {
            AppError::staging(format!(
                "could not copy {} to {}: {}",
                remote,
                local.display(),
                err
            ))
        })?;
        Ok(())
    }

    async fn remove_file(&self, path: &str) -> AppResult<()> {
        tokio::fs::remove_file(path)
            .await
            .map_err(|err| AppError::staging(format!("could not remove {}: {}", path, err)))
    }

    async fn remove_dir(&self, path: &str) -> AppResult<()> {
        tokio::fs::remove_dir(path)
            .await
            .map_err(|err| AppError::staging(format!("could not remove {}: {}", path, err)))
    }
}
