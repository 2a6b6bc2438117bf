// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::app::command::{
    binary_probe_command, predict_command, weights_check_command, CommandSpec,
};
use crate::app::errors::{AppError, AppResult};
use crate::app::job::cancel::{terminate_with_grace, TerminationPolicy};
use crate::app::ports::{ChannelOpener, ExecChannel, JobObserver, JobUpdate, OutputStream, Staging};
use crate::app::progress::{parse_progress_line, JobProgress};
use crate::app::tracker::ResourceTracker;
use crate::app::types::{
    ExecMode, ExecutionResult, JobId, JobParameters, JobPhase, ProgressStatus,
    EXIT_GENERIC_FAILURE, EXIT_WEIGHTS_RESUPPLY, EXIT_WEIGHTS_UPLOAD_FAILED,
};

/// One segmentation run. Mutated only by the `JobRunner` driving it; every
/// external consumer sees immutable `JobUpdate` snapshots.
pub struct Job {
    id: JobId,
    mode: ExecMode,
    params: JobParameters,
    phase: JobPhase,
    status: ProgressStatus,
    progress: JobProgress,
    tracker: ResourceTracker,
}

impl Job {
    pub fn new(mode: ExecMode, params: JobParameters) -> Self {
        Self {
            id: JobId::generate(),
            mode,
            params,
            phase: JobPhase::Init,
            status: ProgressStatus::indeterminate("Queued"),
            progress: JobProgress::new(),
            tracker: ResourceTracker::new(),
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn mode(&self) -> ExecMode {
        self.mode
    }

    pub fn phase(&self) -> JobPhase {
        self.phase
    }

    pub fn params(&self) -> &JobParameters {
        &self.params
    }

    pub fn progress(&self) -> u32 {
        self.progress.overall()
    }

    pub fn tracker(&self) -> &ResourceTracker {
        &self.tracker
    }

    /// Snapshot for observers.
    pub fn update(&self) -> JobUpdate {
        JobUpdate {
            id: self.id.to_string(),
            phase: self.phase,
            status: self.status.clone(),
            progress: self.progress.overall(),
        }
    }

    fn process_folder(&self) -> &str {
        self.params.process_folder.trim_end_matches('/')
    }

    /// Host path of the uploaded model definition.
    pub fn remote_model_path(&self) -> String {
        format!("{}/{}_model.h5", self.process_folder(), self.id)
    }

    /// Host path of the packed input blob (also the output, overwritten in
    /// place by the binary).
    pub fn remote_input_path(&self) -> String {
        format!("{}/{}.h5", self.process_folder(), self.id)
    }
}

/// Terminal state of a driven job. Cancellation is a normal way for a job to
/// end, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Finished,
    Canceled,
}

/// Drives a job through stage-inputs, execute, stage-outputs and cleanup.
pub struct JobRunner {
    opener: Arc<dyn ChannelOpener>,
    staging: Arc<dyn Staging>,
    observer: Arc<dyn JobObserver>,
    output_poll: Duration,
    termination: TerminationPolicy,
}

impl JobRunner {
    pub fn new(
        opener: Arc<dyn ChannelOpener>,
        staging: Arc<dyn Staging>,
        observer: Arc<dyn JobObserver>,
    ) -> Self {
        Self {
            opener,
            staging,
            observer,
            output_poll: Duration::from_millis(100),
            termination: TerminationPolicy::default(),
        }
    }

    /// Overrides the polling cadence and the termination protocol timing.
    pub fn with_timing(mut self, output_poll: Duration, termination: TerminationPolicy) -> Self {
        self.output_poll = output_poll;
        self.termination = termination;
        self
    }

    /// Runs `job` to a terminal state. `input_artifact` is the already
    /// packed input blob on the local filesystem. Blocks the calling task
    /// until the job finished, failed or was canceled; failure and
    /// cancellation both run cleanup before returning.
    pub async fn run(
        &self,
        job: &mut Job,
        input_artifact: &Path,
        mut cancel: watch::Receiver<bool>,
    ) -> AppResult<JobOutcome> {
        self.set_status(job, ProgressStatus::indeterminate("Initializing segmentation"));
        match self.pipeline(job, input_artifact, &mut cancel).await {
            Ok(()) => {
                self.set_status(job, ProgressStatus::new("Ready", 100, 100));
                self.set_phase(job, JobPhase::Done);
                Ok(JobOutcome::Finished)
            }
            Err(err) if err.is_canceled() => {
                log::info!("job {} canceled, cleaning up", job.id);
                if job.phase != JobPhase::Cancelling {
                    self.set_phase(job, JobPhase::Cancelling);
                }
                self.cleanup(job).await;
                Ok(JobOutcome::Canceled)
            }
            Err(err) => {
                log::error!("job {} failed: {}", job.id, err);
                self.set_status(job, ProgressStatus::indeterminate(err.message()));
                self.set_phase(job, JobPhase::Failed);
                self.cleanup(job).await;
                Err(err)
            }
        }
    }

    /// Releases a finished job's host-side artifacts once the caller has
    /// pulled the result. Idempotent, like the failure-path cleanup.
    pub async fn finish(&self, job: &mut Job) {
        self.cleanup(job).await;
    }

    async fn cleanup(&self, job: &mut Job) {
        if job.phase == JobPhase::CleanedUp {
            return;
        }
        let outcomes = job.tracker.remove_all(self.staging.as_ref()).await;
        for (path, result) in &outcomes {
            match result {
                Ok(()) => log::debug!("job {}: removed {}", job.id, path),
                Err(err) => log::warn!("job {}: {}", job.id, err),
            }
        }
        self.set_phase(job, JobPhase::CleanedUp);
    }

    async fn pipeline(
        &self,
        job: &mut Job,
        input_artifact: &Path,
        cancel: &mut watch::Receiver<bool>,
    ) -> AppResult<()> {
        self.probe_binary(job, cancel).await?;

        let (infile, model_path) = match job.mode {
            ExecMode::Remote => {
                self.set_phase(job, JobPhase::Uploading);
                let model_path = job.remote_model_path();
                self.set_status(job, ProgressStatus::indeterminate("Uploading model definition"));
                self.staging
                    .upload(&job.params.model_file, &model_path, &job.tracker)
                    .await?;
                self.progress_to(job, 1);
                self.check_cancel(job, cancel)?;

                self.ensure_weights(job, &model_path, cancel).await?;
                // The caller packed the input blob before handing it over.
                self.progress_to(job, 2);
                self.check_cancel(job, cancel)?;

                job.progress.set_range(3, 10);
                let input_path = job.remote_input_path();
                self.set_status(job, ProgressStatus::indeterminate("Uploading input blob"));
                self.staging
                    .upload(input_artifact, &input_path, &job.tracker)
                    .await?;
                self.progress_to(job, 10);
                self.check_cancel(job, cancel)?;
                (input_path, model_path)
            }
            ExecMode::Local => {
                let model_path = job.params.model_file.to_string_lossy().into_owned();
                self.ensure_weights(job, &model_path, cancel).await?;
                self.progress_to(job, 2);
                self.check_cancel(job, cancel)?;
                (input_artifact.to_string_lossy().into_owned(), model_path)
            }
        };

        self.set_phase(job, JobPhase::Executing);
        match job.mode {
            ExecMode::Remote => job.progress.set_range(11, 90),
            ExecMode::Local => job.progress.set_range(3, 100),
        }
        let command = predict_command(&job.params, &infile, &model_path);
        log::info!("job {}: {}", job.id, command.shell_line());
        let result = self.run_command(job, &command, cancel, true).await?;
        if !result.is_success() {
            log::error!("job {}: {}", job.id, result.stderr.trim_end());
            return Err(AppError::execution(format!(
                "segmentation failed with exit status {}",
                result.exit_status
            ))
            .with_context(result.stderr.trim_end().to_string()));
        }

        match job.mode {
            ExecMode::Remote => {
                self.progress_to(job, 90);
                self.check_cancel(job, cancel)?;
                self.set_phase(job, JobPhase::Downloading);
                job.progress.set_range(91, 100);
                self.set_status(job, ProgressStatus::indeterminate("Retrieving result blob"));
                self.staging.download(&infile, input_artifact).await?;
                self.progress_to(job, 100);
            }
            ExecMode::Local => {
                self.progress_to(job, 100);
            }
        }
        Ok(())
    }

    /// Verifies that the compute binary exists and is runnable on the
    /// selected host before any resource is created.
    async fn probe_binary(
        &self,
        job: &mut Job,
        cancel: &mut watch::Receiver<bool>,
    ) -> AppResult<()> {
        self.set_status(job, ProgressStatus::indeterminate("Checking compute binary"));
        let probe = binary_probe_command(&job.params);
        let result = self.run_command(job, &probe, cancel, false).await?;
        if !result.is_success() {
            return Err(AppError::execution(format!(
                "compute binary '{}' was not found on the execution host",
                job.params.binary
            ))
            .with_context(result.stderr.trim_end().to_string()));
        }
        Ok(())
    }

    /// Checks that model and weights fit together on the execution host,
    /// uploading the caller-supplied local weights once if the check fails.
    async fn ensure_weights(
        &self,
        job: &mut Job,
        model_path: &str,
        cancel: &mut watch::Receiver<bool>,
    ) -> AppResult<()> {
        self.set_status(job, ProgressStatus::indeterminate("Checking model and weights"));
        let check = weights_check_command(&job.params, model_path);
        let first = self.run_command(job, &check, cancel, false).await?;
        if first.is_success() {
            return Ok(());
        }

        let result = match &job.params.local_weights {
            Some(local) => {
                log::info!(
                    "job {}: weights missing on the execution host, uploading {}",
                    job.id,
                    local.display()
                );
                // Uploaded weights are a durable asset at a caller-chosen
                // path, not a job temp; they survive cleanup.
                let scratch = ResourceTracker::new();
                match self
                    .staging
                    .upload(local, &job.params.weights_path, &scratch)
                    .await
                {
                    Ok(()) => {
                        self.check_cancel(job, cancel)?;
                        let retry = self.run_command(job, &check, cancel, false).await?;
                        if retry.is_success() {
                            return Ok(());
                        }
                        ExecutionResult::failed(
                            EXIT_GENERIC_FAILURE,
                            "Model/weights check failed",
                            retry.stderr,
                        )
                    }
                    Err(err) => ExecutionResult::failed(
                        EXIT_WEIGHTS_UPLOAD_FAILED,
                        "Weight upload failed",
                        err.to_string(),
                    ),
                }
            }
            None => ExecutionResult::failed(
                EXIT_WEIGHTS_RESUPPLY,
                "Weight file must be resupplied",
                format!(
                    "weight file {} not found on the execution host",
                    job.params.weights_path
                ),
            ),
        };
        Err(AppError::execution(format!(
            "{} (exit status {})",
            result.short_error, result.exit_status
        ))
        .with_context(result.stderr))
    }

    /// Opens a channel for `command` and drives it to completion, draining
    /// stdout and stderr on every iteration. With `track_progress` set,
    /// stdout lines feed the job's progress; otherwise stdout is ignored.
    async fn run_command(
        &self,
        job: &mut Job,
        command: &CommandSpec,
        cancel: &mut watch::Receiver<bool>,
        track_progress: bool,
    ) -> AppResult<ExecutionResult> {
        let mut channel = self.opener.open(command).await?;
        self.drive_channel(job, channel.as_mut(), cancel, track_progress)
            .await
    }

    async fn drive_channel(
        &self,
        job: &mut Job,
        channel: &mut dyn ExecChannel,
        cancel: &mut watch::Receiver<bool>,
        track_progress: bool,
    ) -> AppResult<ExecutionResult> {
        let mut stderr_text = String::new();
        loop {
            let lines = match channel.poll_output().await {
                Ok(lines) => lines,
                Err(err) => {
                    channel.disconnect().await;
                    return Err(err);
                }
            };
            for line in lines {
                match line.stream {
                    OutputStream::Stdout if track_progress => {
                        match parse_progress_line(&line.line) {
                            Ok(Some(event)) => {
                                job.status = ProgressStatus::new(
                                    event.status_label(),
                                    event.linear().0,
                                    event.linear().1,
                                );
                                job.progress.apply_event(&event);
                                self.observer.progress_changed(job.update());
                            }
                            Ok(None) => {}
                            Err(err) => {
                                log::debug!(
                                    "job {}: ignoring unparseable progress line: {}",
                                    job.id,
                                    err
                                );
                            }
                        }
                    }
                    OutputStream::Stdout => {}
                    OutputStream::Stderr => {
                        stderr_text.push_str(&line.line);
                        stderr_text.push('\n');
                    }
                }
            }

            if channel.is_finished() {
                let exit_status = channel.exit_code().unwrap_or(-1);
                channel.disconnect().await;
                return Ok(ExecutionResult {
                    exit_status,
                    short_error: String::new(),
                    stderr: stderr_text,
                });
            }

            if *cancel.borrow() {
                self.set_phase(job, JobPhase::Cancelling);
                self.set_status(job, ProgressStatus::indeterminate("Terminating..."));
                terminate_with_grace(channel, &self.termination).await;
                return Err(AppError::canceled());
            }

            // The sleep is interruptible: a cancellation signal wakes the
            // loop immediately instead of waiting out the interval.
            tokio::select! {
                _ = tokio::time::sleep(self.output_poll) => {}
                _ = cancel.changed() => {}
            }
        }
    }

    fn check_cancel(&self, job: &mut Job, cancel: &watch::Receiver<bool>) -> AppResult<()> {
        if *cancel.borrow() {
            self.set_phase(job, JobPhase::Cancelling);
            Err(AppError::canceled())
        } else {
            Ok(())
        }
    }

    fn set_phase(&self, job: &mut Job, phase: JobPhase) {
        if job.phase == phase {
            return;
        }
        log::debug!("job {}: {} -> {}", job.id, job.phase, phase);
        job.phase = phase;
        self.observer.status_changed(job.update());
    }

    fn set_status(&self, job: &mut Job, status: ProgressStatus) {
        log::info!("job {}: {}", job.id, status.label);
        job.status = status;
        self.observer.status_changed(job.update());
    }

    fn progress_to(&self, job: &mut Job, value: u32) {
        job.progress.set_overall(value);
        self.observer.progress_changed(job.update());
    }
}
