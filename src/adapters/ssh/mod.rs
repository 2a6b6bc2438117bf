// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::app::command::CommandSpec;
use crate::app::errors::{AppError, AppResult};
use crate::app::ports::{ChannelOpener, ExecChannel, Staging};
use crate::app::tracker::ResourceTracker;

mod error;
mod exec;
mod session;
mod sftp;

pub use error::AuthenticationFailure;
pub use session::{SessionManager, SshParams};

/// Executes commands and stages files on a remote host over one shared SSH
/// session. One exec or transfer channel is open at a time per job; the
/// session itself is not multiplexed.
#[derive(Clone)]
pub struct SshAdapter {
    session: Arc<SessionManager>,
}

impl SshAdapter {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }

    pub fn connect(params: SshParams) -> Self {
        Self::new(Arc::new(SessionManager::new(params)))
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }
}

fn map_connect_error(err: anyhow::Error) -> AppError {
    if err.chain().any(|cause| cause.is::<AuthenticationFailure>()) {
        AppError::connectivity(format!(
            "ssh authentication failed: {:#}",
            err
        ))
    } else {
        AppError::connectivity(format!("ssh connect failed: {:#}", err))
    }
}

fn map_staging_error(err: anyhow::Error) -> AppError {
    AppError::staging(format!("{:#}", err))
}

#[async_trait]
impl ChannelOpener for SshAdapter {
    async fn open(&self, command: &CommandSpec) -> AppResult<Box<dyn ExecChannel>> {
        let channel = self
            .session
            .open_exec(&command.shell_line())
            .await
            .map_err(map_connect_error)?;
        Ok(Box::new(channel))
    }
}

#[async_trait]
impl Staging for SshAdapter {
    async fn upload(
        &self,
        local: &Path,
        remote: &str,
        tracker: &ResourceTracker,
    ) -> AppResult<()> {
        self.session
            .upload_file(local, remote, tracker)
            .await
            .map_err(map_staging_error)
    }

    async fn download(&self, remote: &str, local: &Path) -> AppResult<()> {
        self.session
            .download_file(remote, local)
            .await
            .map_err(map_staging_error)
    }

    async fn remove_file(&self, path: &str) -> AppResult<()> {
        self.session
            .remove_remote_file(path)
            .await
            .map_err(map_staging_error)
    }

    async fn remove_dir(&self, path: &str) -> AppResult<()> {
        self.session
            .remove_remote_dir(path)
            .await
            .map_err(map_staging_error)
    }
}
