// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use rand::Rng;
use rand::distr::Alphanumeric;

use crate::app::errors::AppError;

/// Process-unique opaque job identifier, stable for the job's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobId(String);

impl JobId {
    pub fn generate() -> Self {
        let suffix: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(10)
            .map(char::from)
            .collect();
        JobId(format!("seg-{}", suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where the segmentation process runs. Set once at job start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    Local,
    Remote,
}

/// Phases of the job pipeline. `Cancelling` and `Failed` are reachable from
/// any phase; `CleanedUp` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Init,
    Uploading,
    Executing,
    Downloading,
    Done,
    Cancelling,
    Failed,
    CleanedUp,
}

impl JobPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::Init => "init",
            JobPhase::Uploading => "uploading",
            JobPhase::Executing => "executing",
            JobPhase::Downloading => "downloading",
            JobPhase::Done => "done",
            JobPhase::Cancelling => "cancelling",
            JobPhase::Failed => "failed",
            JobPhase::CleanedUp => "cleaned_up",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobPhase::CleanedUp)
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current task status as shown to observers. `indeterminate` holds exactly
/// when `progress_max == 0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressStatus {
    pub label: String,
    pub progress: u64,
    pub progress_max: u64,
    pub indeterminate: bool,
}

impl ProgressStatus {
    pub fn new(label: impl Into<String>, progress: u64, progress_max: u64) -> Self {
        Self {
            label: label.into(),
            progress: if progress_max == 0 {
                progress
            } else {
                progress.min(progress_max)
            },
            progress_max,
            indeterminate: progress_max == 0,
        }
    }

    pub fn indeterminate(label: impl Into<String>) -> Self {
        Self::new(label, 0, 0)
    }
}

pub const EXIT_GENERIC_FAILURE: i32 = 1;
/// A required artifact is missing on the execution host and the caller must
/// resupply it (e.g. the trained weights).
pub const EXIT_WEIGHTS_RESUPPLY: i32 = 2;
pub const EXIT_WEIGHTS_UPLOAD_FAILED: i32 = 3;

/// Outcome of one external command run. `exit_status == 0` means success.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    pub exit_status: i32,
    pub short_error: String,
    pub stderr: String,
}

impl ExecutionResult {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn failed(exit_status: i32, short_error: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_status,
            short_error: short_error.into(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_status == 0
    }
}

/// GPU selection for the segmentation binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GpuSelector {
    #[default]
    None,
    All,
    Index(u8),
}

impl GpuSelector {
    /// Extra arguments for the compute binary; empty when no GPU is used.
    pub fn as_args(&self) -> Vec<String> {
        match self {
            GpuSelector::None => Vec::new(),
            GpuSelector::All => vec!["-gpu".to_string(), "all".to_string()],
            GpuSelector::Index(n) => vec!["-gpu".to_string(), n.to_string()],
        }
    }
}

impl FromStr for GpuSelector {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "none" | "" => Ok(GpuSelector::None),
            "all" => Ok(GpuSelector::All),
            other => {
                let n: u8 = other.parse().map_err(|_| {
                    AppError::invalid_argument(format!(
                        "invalid gpu selector '{}': expected none, all, or 0-7",
                        other
                    ))
                })?;
                if n > 7 {
                    return Err(AppError::invalid_argument(format!(
                        "invalid gpu selector '{}': index out of range",
                        other
                    )));
                }
                Ok(GpuSelector::Index(n))
            }
        }
    }
}

/// One flag/value pair taken from the model metadata (e.g. `-n_tiles 4`).
/// Opaque to the engine; only the shape is validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TilingParam {
    pub flag: String,
    pub value: String,
}

impl TilingParam {
    pub fn new(flag: impl Into<String>, value: impl Into<String>) -> Result<Self, AppError> {
        let flag = flag.into();
        let value = value.into();
        if !flag.starts_with('-') || flag.len() < 2 {
            return Err(AppError::invalid_argument(format!(
                "invalid tiling flag '{}': must start with '-'",
                flag
            )));
        }
        if value.is_empty() {
            return Err(AppError::invalid_argument("tiling value must not be empty"));
        }
        Ok(Self { flag, value })
    }
}

impl FromStr for TilingParam {
    type Err = AppError;

    /// Parses the `"<flag> <value>"` form stored in model metadata.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let flag = parts
            .next()
            .ok_or_else(|| AppError::invalid_argument("empty tiling parameter"))?;
        let value = parts
            .next()
            .ok_or_else(|| AppError::invalid_argument("tiling parameter is missing a value"))?;
        if parts.next().is_some() {
            return Err(AppError::invalid_argument(format!(
                "tiling parameter '{}' has trailing tokens",
                s
            )));
        }
        TilingParam::new(flag, value)
    }
}

/// Immutable inputs for one segmentation run, resolved before the job starts.
#[derive(Debug, Clone)]
pub struct JobParameters {
    /// Segmentation binary name or path on the execution host.
    pub binary: String,
    /// Local model definition file (uploaded for remote jobs).
    pub model_file: PathBuf,
    /// Path to the trained weights on the execution host.
    pub weights_path: String,
    /// Local weights file offered for on-the-fly upload when the weights are
    /// missing on the execution host.
    pub local_weights: Option<PathBuf>,
    /// Scratch folder for job files on the execution host.
    pub process_folder: String,
    pub gpu: GpuSelector,
    pub tiling: TilingParam,
    pub keep_original: bool,
    pub output_scores: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_ids_are_unique_and_prefixed() {
        let a = JobId::generate();
        let b = JobId::generate();
        assert!(a.as_str().starts_with("seg-"));
        assert_eq!(a.as_str().len(), "seg-".len() + 10);
        assert_ne!(a, b);
    }

    #[test]
    fn progress_status_indeterminate_iff_max_is_zero() {
        let status = ProgressStatus::new("starting", 5, 0);
        assert!(status.indeterminate);
        let status = ProgressStatus::new("working", 5, 10);
        assert!(!status.indeterminate);
        assert_eq!(status.progress, 5);
    }

    #[test]
    fn progress_status_clamps_to_max() {
        let status = ProgressStatus::new("working", 15, 10);
        assert_eq!(status.progress, 10);
    }

    #[test]
    fn gpu_selector_parses_and_formats() {
        assert_eq!("none".parse::<GpuSelector>().unwrap(), GpuSelector::None);
        assert_eq!("all".parse::<GpuSelector>().unwrap(), GpuSelector::All);
        assert_eq!("3".parse::<GpuSelector>().unwrap(), GpuSelector::Index(3));
        assert!("9".parse::<GpuSelector>().is_err());
        assert!("fast".parse::<GpuSelector>().is_err());

        assert!(GpuSelector::None.as_args().is_empty());
        assert_eq!(GpuSelector::All.as_args(), vec!["-gpu", "all"]);
        assert_eq!(GpuSelector::Index(2).as_args(), vec!["-gpu", "2"]);
    }

    #[test]
    fn tiling_param_requires_flag_shape() {
        let param = "-n_tiles 4".parse::<TilingParam>().unwrap();
        assert_eq!(param.flag, "-n_tiles");
        assert_eq!(param.value, "4");
        assert!("n_tiles 4".parse::<TilingParam>().is_err());
        assert!("-n_tiles".parse::<TilingParam>().is_err());
        assert!("-n_tiles 4 extra".parse::<TilingParam>().is_err());
    }
}
