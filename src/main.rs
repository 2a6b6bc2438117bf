// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use log::LevelFilter;
use tokio::sync::watch;

use tilerun::adapters::local::{LocalAdapter, LocalStaging};
use tilerun::adapters::ssh::{SshAdapter, SshParams};
use tilerun::app::job::{Job, JobOutcome, JobRegistry, JobRunner};
use tilerun::app::ports::{ChannelOpener, Staging};
use tilerun::app::types::{ExecMode, JobParameters, TilingParam};
use tilerun::config;

#[derive(Debug, Parser)]
#[command(
    name = "tilerun",
    about = "Run a tiled neural-network segmentation pass locally or on a remote GPU host"
)]
struct Opts {
    /// Input image blob, already packed as HDF5.
    input: PathBuf,

    /// Where to store the segmented result blob.
    output: PathBuf,

    /// Model definition file (.h5).
    #[arg(long)]
    model: PathBuf,

    /// Path to the trained weights on the execution host.
    #[arg(long)]
    weights: String,

    /// Local weights file to upload if the weights are missing on the
    /// execution host.
    #[arg(long)]
    upload_weights: Option<PathBuf>,

    /// Tiling parameter handed to the binary, e.g. "-n_tiles 4".
    #[arg(long, default_value = "-n_tiles 4")]
    tiling: String,

    /// GPU selector: none, all, or an index 0-7.
    #[arg(long)]
    gpu: Option<String>,

    /// Segmentation binary name or path on the execution host.
    #[arg(long)]
    binary: Option<String>,

    /// Scratch folder for job files on the execution host.
    #[arg(long)]
    process_folder: Option<String>,

    /// Config file (default: ~/.config/tilerun/tilerun.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run on this machine even if a remote host is configured.
    #[arg(long)]
    local: bool,

    /// Keep the original image untouched; refuse in-place overwrites.
    #[arg(long)]
    keep_original: bool,

    /// Keep the per-class score channels in the result blob.
    #[arg(long)]
    output_scores: bool,

    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let mut builder = env_logger::builder();
    builder.format_timestamp_secs();
    if verbose {
        builder.filter_level(LevelFilter::Debug);
    } else {
        builder
            .filter_level(LevelFilter::Off)
            .filter_module("tilerun", LevelFilter::Info);
    }
    builder.init();
}

/// Stand-in for the image packer: the input is expected to be a packed HDF5
/// blob already, so packing reduces to copying it into a scratch file the
/// job may overwrite in place.
async fn pack_input_blob(input: &std::path::Path, packed: &std::path::Path) -> anyhow::Result<()> {
    tokio::fs::copy(input, packed)
        .await
        .with_context(|| format!("failed to read input blob {}", input.display()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    init_logging(opts.verbose);

    if opts.keep_original && opts.output == opts.input {
        anyhow::bail!(
            "refusing to overwrite {} with the result while --keep-original is set",
            opts.input.display()
        );
    }

    let config = config::load(
        opts.config,
        config::Overrides {
            binary: opts.binary,
            process_folder: opts.process_folder,
            gpu: opts.gpu,
            force_local: opts.local,
        },
    )?;
    if let Some(path) = &config.config_path {
        log::debug!("config path: {}", path.display());
    }

    let params = JobParameters {
        binary: config.binary.clone(),
        model_file: opts.model,
        weights_path: opts.weights,
        local_weights: opts.upload_weights,
        process_folder: config.process_folder.clone(),
        gpu: config.gpu,
        tiling: opts
            .tiling
            .parse::<TilingParam>()
            .map_err(|e| anyhow::anyhow!("{}", e))?,
        keep_original: opts.keep_original,
        output_scores: opts.output_scores,
    };

    let registry = JobRegistry::new();
    let observer = registry.subscribe();

    let mut ssh: Option<SshAdapter> = None;
    let (mode, opener, staging): (ExecMode, Arc<dyn ChannelOpener>, Arc<dyn Staging>) =
        match &config.remote {
            Some(remote) => {
                let adapter = SshAdapter::connect(SshParams {
                    host: remote.host.clone(),
                    port: remote.port,
                    username: remote.username.clone(),
                    identity_path: remote.identity_path.clone(),
                    keepalive_secs: remote.keepalive_secs,
                });
                ssh = Some(adapter.clone());
                (
                    ExecMode::Remote,
                    Arc::new(adapter.clone()),
                    Arc::new(adapter),
                )
            }
            None => (
                ExecMode::Local,
                Arc::new(LocalAdapter::new()),
                Arc::new(LocalStaging::new()),
            ),
        };

    let runner = JobRunner::new(opener, staging, observer);
    let mut job = Job::new(mode, params);
    match (&config.remote, mode) {
        (Some(remote), ExecMode::Remote) => {
            log::info!("job {} started on {}", job.id(), remote.host)
        }
        _ => log::info!("job {} started locally", job.id()),
    }

    let workdir = tempfile::TempDir::new().context("failed to create scratch directory")?;
    let packed = workdir.path().join(format!("{}.h5", job.id()));
    pack_input_blob(&opts.input, &packed).await?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("interrupt received, canceling the job");
            let _ = cancel_tx.send(true);
        }
    });

    let outcome = runner.run(&mut job, &packed, cancel_rx).await;
    let job_id = job.id().to_string();

    let exit_code = match outcome {
        Ok(JobOutcome::Finished) => {
            tokio::fs::copy(&packed, &opts.output)
                .await
                .with_context(|| {
                    format!("failed to store the result at {}", opts.output.display())
                })?;
            runner.finish(&mut job).await;
            if opts.output_scores {
                log::info!("result blob keeps the per-class score channels");
            }
            log::info!(
                "job {} finished, result stored at {}",
                job_id,
                opts.output.display()
            );
            0
        }
        Ok(JobOutcome::Canceled) => {
            log::info!("job {} canceled", job_id);
            130
        }
        Err(err) => {
            log::error!("job {} failed: {}", job_id, err);
            1
        }
    };

    registry.remove(&job_id);
    if let Some(adapter) = ssh {
        adapter.session().shutdown().await;
    }
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}
