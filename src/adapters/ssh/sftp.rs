// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::{FileAttributes, OpenFlags};
use tokio::fs as tokiofs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::app::tracker::ResourceTracker;

use super::session::SessionManager;

const TRANSFER_BLOCK_SIZE: usize = 1024 * 1024;

/// Every ancestor path of `remote` (excluding the file itself), outermost
/// first: `/a/b/c.h5` yields `/a` and `/a/b`.
pub(crate) fn dir_prefixes(remote: &str) -> Vec<String> {
    let mut prefixes = Vec::new();
    let Some((parent, _file)) = remote.rsplit_once('/') else {
        return prefixes;
    };
    let mut current = String::new();
    for part in parent.split('/').filter(|p| !p.is_empty()) {
        current.push('/');
        current.push_str(part);
        prefixes.push(current.clone());
    }
    prefixes
}

impl SessionManager {
    async fn sftp(&self) -> Result<SftpSession> {
        let channel = self.open_session_channel().await?;
        channel.request_subsystem(true, "sftp").await?;
        let sftp = SftpSession::new(channel.into_stream()).await?;
        Ok(sftp)
    }

    /// Uploads `local` to `remote`, creating missing ancestor directories.
    /// Directories and the destination file are recorded in `tracker` the
    /// moment they start to exist, so an interrupted transfer still leaves
    /// an accurate rollback record.
    pub async fn upload_file(
        &self,
        local: &Path,
        remote: &str,
        tracker: &ResourceTracker,
    ) -> Result<()> {
        let sftp = self.sftp().await?;
        for dir in dir_prefixes(remote) {
            match sftp.metadata(&dir).await {
                Ok(meta) => {
                    if !meta.is_dir() {
                        return Err(anyhow!("remote path exists but is not a directory: {}", dir));
                    }
                }
                Err(_) => {
                    tracker.track_dir(&dir);
                    sftp.create_dir(&dir)
                        .await
                        .context(format!("creating path {}", &dir))?;
                    let attrs = FileAttributes {
                        permissions: Some(0o700),
                        ..Default::default()
                    };
                    if let Err(e) = sftp.set_metadata(&dir, attrs).await {
                        log::debug!("could not set permissions on {}: {}", &dir, e);
                    }
                }
            }
        }

        tracker.track_file(remote);
        log::debug!(
            "uploading over sftp: {} -> {}",
            local.to_string_lossy(),
            remote
        );
        let mut lf = tokiofs::File::open(local)
            .await
            .with_context(|| format!("opening local file {}", local.display()))?;
        let flags = OpenFlags::WRITE
            .union(OpenFlags::CREATE)
            .union(OpenFlags::TRUNCATE);
        let mut rfile = sftp
            .open_with_flags(remote, flags)
            .await
            .with_context(|| format!("opening remote file {}", remote))?;
        let mut buf = vec![0u8; TRANSFER_BLOCK_SIZE];
        loop {
            let n = lf.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            rfile
                .write_all(&buf[..n])
                .await
                .with_context(|| format!("writing to {}", remote))?;
        }
        rfile.flush().await?;
        rfile.shutdown().await?;
        Ok(())
    }

    pub async fn download_file(&self, remote: &str, local: &Path) -> Result<()> {
        let sftp = self.sftp().await?;
        if let Some(parent) = local.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokiofs::create_dir_all(parent).await?;
        }
        let mut rfile = sftp
            .open(remote)
            .await
            .with_context(|| format!("opening remote file {}", remote))?;
        let mut lfile = tokiofs::File::create(local)
            .await
            .with_context(|| format!("creating local file {}", local.display()))?;
        tokio::io::copy(&mut rfile, &mut lfile).await?;
        lfile.flush().await?;
        Ok(())
    }

    pub async fn remove_remote_file(&self, remote: &str) -> Result<()> {
        let sftp = self.sftp().await?;
        sftp.remove_file(remote)
            .await
            .with_context(|| format!("removing remote file {}", remote))?;
        Ok(())
    }

    /// Fails when the directory is still non-empty; callers treat that as a
    /// recorded cleanup outcome, not a fatal error.
    pub async fn remove_remote_dir(&self, remote: &str) -> Result<()> {
        let sftp = self.sftp().await?;
        sftp.remove_dir(remote)
            .await
            .with_context(|| format!("removing remote directory {}", remote))?;
        Ok(())
    }
}
