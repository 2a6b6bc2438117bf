// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Mutex;

use crate::app::errors::{AppError, AppResult};
use crate::app::ports::Staging;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResourceKind {
    File,
    Dir,
}

#[derive(Debug, Default)]
struct TrackerState {
    resources: Vec<(ResourceKind, String)>,
    drained: bool,
}

/// Per-job ledger of artifacts created on the compute host, recorded in
/// creation order and removed best-effort during cleanup.
#[derive(Debug, Default)]
pub struct ResourceTracker {
    state: Mutex<TrackerState>,
}

/// Result of one removal attempt during cleanup.
pub type RemovalOutcome = (String, AppResult<()>);

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track_file(&self, path: impl Into<String>) {
        let mut state = self.state.lock().unwrap();
        state.resources.push((ResourceKind::File, path.into()));
    }

    pub fn track_dir(&self, path: impl Into<String>) {
        let mut state = self.state.lock().unwrap();
        state.resources.push((ResourceKind::Dir, path.into()));
    }

    pub fn tracked_paths(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .resources
            .iter()
            .map(|(_, path)| path.clone())
            .collect()
    }

    pub fn is_drained(&self) -> bool {
        self.state.lock().unwrap().drained
    }

    /// Attempts to remove every tracked path exactly once: files first, then
    /// directories, never stopping on a failure. The second call on the same
    /// tracker is a no-op. Directory removal is expected to fail when a
    /// sibling file removal failed and left the directory non-empty; that
    /// failure is part of the returned outcomes, not a reason to abort.
    pub async fn remove_all(&self, staging: &dyn Staging) -> Vec<RemovalOutcome> {
        let resources = {
            let mut state = self.state.lock().unwrap();
            if state.drained {
                return Vec::new();
            }
            state.drained = true;
            std::mem::take(&mut state.resources)
        };

        let mut outcomes = Vec::with_capacity(resources.len());
        for (kind, path) in resources
            .iter()
            .filter(|(kind, _)| *kind == ResourceKind::File)
            .chain(resources.iter().filter(|(kind, _)| *kind == ResourceKind::Dir))
        {
            let result = match kind {
                ResourceKind::File => staging.remove_file(path).await,
                ResourceKind::Dir => staging.remove_dir(path).await,
            };
            let result = result.map_err(|e| {
                AppError::cleanup(format!("could not remove {}: {}", path, e.message()))
            });
            outcomes.push((path.clone(), result));
        }
        outcomes
    }
}
