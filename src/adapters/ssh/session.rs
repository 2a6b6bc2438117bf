// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use russh::client::{AuthResult, Config};
use russh::keys::PrivateKeyWithHashAlg;
use tokio::sync::Mutex;

use super::AuthenticationFailure;

/// Minimal russh client handler. We rely on default implementations.
/// TODO: add actual server key verification
#[derive(Clone, Debug, Default)]
pub(crate) struct ClientHandler;

impl russh::client::Handler for ClientHandler {
    type Error = anyhow::Error;
    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Parameters for establishing the SSH connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SshParams {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub identity_path: String,
    /// Send TCP keepalives to keep long connections healthy.
    pub keepalive_secs: u64,
}

/// Manager that owns a single long-lived SSH connection. Command channels
/// are opened one at a time; the handle mutex serializes their creation.
pub struct SessionManager {
    params: SshParams,
    config: Arc<Config>,
    pub(crate) handle: Arc<Mutex<Option<russh::client::Handle<ClientHandler>>>>,
    keepalive_task_handle: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl SessionManager {
    pub fn new(params: SshParams) -> Self {
        let cfg = Config {
            inactivity_timeout: Some(Duration::from_secs(30)),
            keepalive_interval: Some(Duration::from_secs(params.keepalive_secs)),
            // reasonable channel buffer and window sizes for streaming
            channel_buffer_size: 64,
            window_size: 1024 * 1024,
            ..Default::default()
        };
        Self {
            params,
            config: Arc::new(cfg),
            handle: Arc::new(Mutex::new(None)),
            keepalive_task_handle: Arc::new(Mutex::new(None)),
        }
    }

    pub fn host(&self) -> &str {
        &self.params.host
    }

    pub async fn needs_connect(&self) -> bool {
        let handle_field = self.handle.lock().await;
        match handle_field.as_ref() {
            None => true,
            Some(h) if h.is_closed() => true,
            Some(_) => false,
        }
    }

    /// Ensure we have a connected & authenticated handle. Authentication is
    /// publickey only; the daemonless CLI has nobody to answer interactive
    /// prompts.
    pub async fn ensure_connected(&self) -> Result<()> {
        let mut handle_field = self.handle.lock().await;

        // If handle exists but is closed, drop it so we reconnect.
        let needs_connect = match handle_field.as_ref() {
            None => true,
            Some(h) if h.is_closed() => true,
            Some(_) => false,
        };
        if !needs_connect {
            return Ok(());
        }

        log::info!(
            "establishing connection with {}@{}:{}",
            &self.params.username,
            &self.params.host,
            self.params.port
        );
        let addr = (self.params.host.as_str(), self.params.port);
        let mut handle = russh::client::connect(self.config.clone(), addr, ClientHandler)
            .await
            .context("SSH connect failed")?;

        let key = russh::keys::load_secret_key(&self.params.identity_path, None)
            .with_context(|| {
                format!("failed to load secret key at {}", self.params.identity_path)
            })?;
        let key = Arc::new(key);
        // Prefer SHA-256 for RSA if applicable (ignored for non-RSA keys)
        let pk = PrivateKeyWithHashAlg::new(key, handle.best_supported_rsa_hash().await?.flatten());
        let result = handle
            .authenticate_publickey(self.params.username.clone(), pk)
            .await?;
        match result {
            AuthResult::Success => {}
            AuthResult::Failure { .. } => return Err(AuthenticationFailure.into()),
        }

        *handle_field = Some(handle);

        // Start a keepalive pinger in the background
        if let Some(interval) = self.config.keepalive_interval {
            let handle_clone = self.handle.clone();
            let want_reply = true;
            let jh = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval / 2);
                loop {
                    ticker.tick().await;
                    let guard = handle_clone.lock().await;
                    let Some(handle) = guard.as_ref() else {
                        continue;
                    };
                    if handle.is_closed() {
                        log::debug!("keepalive handle is closed");
                        break;
                    }
                    if let Err(e) = handle.send_keepalive(want_reply).await {
                        log::debug!("error when sending a keepalive: {}", e);
                    }
                }
            });
            *self.keepalive_task_handle.lock().await = Some(jh);
        }

        Ok(())
    }

    pub async fn shutdown(&self) {
        if let Some(task) = self.keepalive_task_handle.lock().await.take() {
            task.abort();
        }
        let mut handle_field = self.handle.lock().await;
        let _ = handle_field.take();
    }

    pub(crate) async fn open_session_channel(
        &self,
    ) -> Result<russh::Channel<russh::client::Msg>> {
        self.ensure_connected().await?;
        let guard = self.handle.lock().await;
        let handle = guard
            .as_ref()
            .ok_or_else(|| anyhow!("SSH handle lost after connect"))?;
        let chan = handle
            .channel_open_session()
            .await
            .context("open session")?;
        Ok(chan)
    }
}
