// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;

use async_trait::async_trait;

use crate::app::errors::AppResult;
use crate::app::tracker::ResourceTracker;

/// File transfer and removal on the compute host: SFTP for remote jobs, the
/// local filesystem otherwise.
#[async_trait]
pub trait Staging: Send + Sync {
    /// Transfers `local` to the host path `remote`, creating missing parent
    /// directories. Every directory created and the destination file itself
    /// are appended to `tracker` as they come into existence, so a failure
    /// mid-transfer still leaves an accurate rollback record.
    async fn upload(&self, local: &Path, remote: &str, tracker: &ResourceTracker)
        -> AppResult<()>;

    /// Retrieves the host path `remote` into the local file `local`.
    async fn download(&self, remote: &str, local: &Path) -> AppResult<()>;

    async fn remove_file(&self, path: &str) -> AppResult<()>;

    async fn remove_dir(&self, path: &str) -> AppResult<()>;
}
