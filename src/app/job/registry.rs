// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::app::ports::{JobObserver, JobUpdate};

/// Observer that forwards every notification into an unbounded channel. The
/// send never blocks the job worker; a closed receiver just drops updates.
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<JobUpdate>,
}

impl JobObserver for ChannelObserver {
    fn status_changed(&self, update: JobUpdate) {
        let _ = self.tx.send(update);
    }

    fn progress_changed(&self, update: JobUpdate) {
        let _ = self.tx.send(update);
    }
}

/// Concurrent map from job id to its latest snapshot. Workers never expose
/// live state; they post updates through a `ChannelObserver` and a
/// background task folds them in here.
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<Mutex<HashMap<String, JobUpdate>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an observer feeding this registry and spawns the task that
    /// applies its updates.
    pub fn subscribe(&self) -> Arc<ChannelObserver> {
        let (tx, mut rx) = mpsc::unbounded_channel::<JobUpdate>();
        let jobs = Arc::clone(&self.jobs);
        tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                log::debug!(
                    "job {}: phase={} progress={} status={}",
                    update.id,
                    update.phase,
                    update.progress,
                    update.status.label
                );
                jobs.lock().unwrap().insert(update.id.clone(), update);
            }
        });
        Arc::new(ChannelObserver { tx })
    }

    pub fn snapshot(&self, id: &str) -> Option<JobUpdate> {
        self.jobs.lock().unwrap().get(id).cloned()
    }

    pub fn jobs(&self) -> Vec<JobUpdate> {
        self.jobs.lock().unwrap().values().cloned().collect()
    }

    /// Drops a finished job from the listing once its owner is done with it.
    pub fn remove(&self, id: &str) -> Option<JobUpdate> {
        self.jobs.lock().unwrap().remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::types::{JobPhase, ProgressStatus};
    use std::time::Duration;

    fn update(id: &str, phase: JobPhase, progress: u32) -> JobUpdate {
        JobUpdate {
            id: id.to_string(),
            phase,
            status: ProgressStatus::indeterminate("working"),
            progress,
        }
    }

    async fn settle() {
        // Let the registry task drain the channel.
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn registry_keeps_the_latest_snapshot() {
        let registry = JobRegistry::new();
        let observer = registry.subscribe();

        observer.status_changed(update("seg-a", JobPhase::Uploading, 1));
        observer.progress_changed(update("seg-a", JobPhase::Executing, 42));
        observer.status_changed(update("seg-b", JobPhase::Init, 0));
        settle().await;

        let snapshot = registry.snapshot("seg-a").unwrap();
        assert_eq!(snapshot.phase, JobPhase::Executing);
        assert_eq!(snapshot.progress, 42);
        assert_eq!(registry.jobs().len(), 2);
    }

    #[tokio::test]
    async fn removed_jobs_disappear_from_the_listing() {
        let registry = JobRegistry::new();
        let observer = registry.subscribe();

        observer.status_changed(update("seg-a", JobPhase::Done, 100));
        settle().await;

        assert!(registry.remove("seg-a").is_some());
        assert!(registry.snapshot("seg-a").is_none());
        assert!(registry.jobs().is_empty());
    }
}
