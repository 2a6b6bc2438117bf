// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::app::types::GpuSelector;

const APP_DIR_NAME: &str = "tilerun";
const CONFIG_FILE_NAME: &str = "tilerun.toml";
const DEFAULT_BINARY: &str = "caffe_unet";
const DEFAULT_KEEPALIVE_SECS: u64 = 15;

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    binary: Option<String>,
    process_folder: Option<String>,
    gpu: Option<String>,
    remote: Option<RemoteFileConfig>,
}

#[derive(Debug, Deserialize)]
struct RemoteFileConfig {
    host: String,
    port: Option<u16>,
    username: String,
    identity_path: String,
    keepalive_secs: Option<u64>,
}

/// Remote host section; its presence selects remote execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub identity_path: String,
    pub keepalive_secs: u64,
}

#[derive(Debug)]
pub struct Config {
    pub binary: String,
    /// Scratch folder on the execution host. Kept verbatim for remote hosts;
    /// tilde-expanded locally otherwise.
    pub process_folder: String,
    pub gpu: GpuSelector,
    pub remote: Option<RemoteConfig>,
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct Overrides {
    pub binary: Option<String>,
    pub process_folder: Option<String>,
    pub gpu: Option<String>,
    /// Ignore any configured remote host and run on this machine.
    pub force_local: bool,
}

pub fn load(config_path_override: Option<PathBuf>, overrides: Overrides) -> Result<Config> {
    let required = config_path_override.is_some();
    let config_path = match config_path_override {
        Some(path) => Some(expand_path(path)),
        None => default_config_path().ok(),
    };

    let file_config = match config_path.as_deref() {
        Some(path) => read_config_file(path, required)?,
        None => FileConfig::default(),
    };

    let remote = if overrides.force_local {
        None
    } else {
        file_config.remote.map(|remote| RemoteConfig {
            host: remote.host,
            port: remote.port.unwrap_or(22),
            username: remote.username,
            identity_path: expand_str(&remote.identity_path),
            keepalive_secs: remote.keepalive_secs.unwrap_or(DEFAULT_KEEPALIVE_SECS),
        })
    };

    let process_folder = match overrides.process_folder.or(file_config.process_folder) {
        Some(raw) => {
            if remote.is_some() {
                raw
            } else {
                expand_str(&raw)
            }
        }
        None => {
            if remote.is_some() {
                anyhow::bail!(
                    "process_folder is required when a remote host is configured; \
                     set it in the config file or pass --process-folder"
                );
            }
            default_process_folder()
                .context("failed to resolve default process folder; pass --process-folder")?
                .to_string_lossy()
                .into_owned()
        }
    };

    let gpu_raw = overrides.gpu.or(file_config.gpu);
    let gpu = match gpu_raw.as_deref() {
        Some(raw) => raw
            .parse::<GpuSelector>()
            .map_err(|e| anyhow::anyhow!("{}", e))?,
        None => GpuSelector::None,
    };

    Ok(Config {
        binary: overrides
            .binary
            .or(file_config.binary)
            .unwrap_or_else(|| DEFAULT_BINARY.to_string()),
        process_folder,
        gpu,
        remote,
        config_path,
    })
}

fn read_config_file(path: &Path, required: bool) -> Result<FileConfig> {
    if !path.exists() {
        if required {
            anyhow::bail!("config file not found at {}", path.display());
        }
        return Ok(FileConfig::default());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

fn expand_str(raw: &str) -> String {
    shellexpand::tilde(raw).into_owned()
}

fn expand_path(path: PathBuf) -> PathBuf {
    let path_string = path.to_string_lossy().to_string();
    let expanded = shellexpand::tilde(&path_string);
    PathBuf::from(expanded.as_ref())
}

fn default_config_path() -> Result<PathBuf> {
    let base = dirs::config_dir().context("failed to resolve config directory")?;
    Ok(base.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}

fn default_process_folder() -> Result<PathBuf> {
    let base = dirs::cache_dir().context("failed to resolve cache directory")?;
    Ok(base.join(APP_DIR_NAME))
}
