// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result};
use async_trait::async_trait;
use russh::ChannelMsg;
use tokio::sync::mpsc;

use crate::app::errors::{AppError, AppResult};
use crate::app::ports::{ExecChannel, OutputLine};

use super::session::SessionManager;

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ChannelEvent {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    Exit(i32),
    Closed,
}

enum ChannelCtl {
    Signal(russh::Sig),
    Disconnect,
}

pub(crate) fn translate_channel_msg(msg: &ChannelMsg) -> (Option<ChannelEvent>, bool) {
    match msg {
        ChannelMsg::Data { data } => (Some(ChannelEvent::Stdout(data.to_vec())), false),
        ChannelMsg::ExtendedData { data, ext } if *ext == 1 => {
            (Some(ChannelEvent::Stderr(data.to_vec())), false)
        }
        ChannelMsg::ExitStatus { exit_status } => {
            (Some(ChannelEvent::Exit(*exit_status as i32)), false)
        }
        ChannelMsg::Close => (Some(ChannelEvent::Closed), true),
        _ => (None, false),
    }
}

/// Splits a byte stream into complete lines. Bytes after the last newline
/// stay buffered until the next push or the final flush.
#[derive(Default)]
pub(crate) struct LineAssembler {
    buf: Vec<u8>,
}

impl LineAssembler {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    pub(crate) fn flush(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// One running command on the remote host. A background pump owns the russh
/// channel, forwarding its messages into an in-memory queue the job worker
/// drains without blocking; termination signals travel the other way.
pub struct RemoteChannel {
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    ctl: mpsc::UnboundedSender<ChannelCtl>,
    pump: Option<tokio::task::JoinHandle<()>>,
    stdout: LineAssembler,
    stderr: LineAssembler,
    exit_code: Option<i32>,
    closed: bool,
}

impl SessionManager {
    /// Opens an exec channel for `command_line` and starts its pump. The
    /// remote shell is responsible for parsing the command line.
    pub async fn open_exec(&self, command_line: &str) -> Result<RemoteChannel> {
        let mut chan = self.open_session_channel().await?;
        log::debug!("executing '{}'", command_line);
        chan.exec(true, command_line).await.context("exec request")?;

        let (evt_tx, evt_rx) = mpsc::unbounded_channel();
        let (ctl_tx, mut ctl_rx) = mpsc::unbounded_channel::<ChannelCtl>();
        let pump = tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = chan.wait() => {
                        let Some(msg) = msg else {
                            let _ = evt_tx.send(ChannelEvent::Closed);
                            break;
                        };
                        let (event, should_break) = translate_channel_msg(&msg);
                        if let Some(event) = event {
                            let _ = evt_tx.send(event);
                        }
                        if should_break {
                            break;
                        }
                    }
                    ctl = ctl_rx.recv() => {
                        match ctl {
                            Some(ChannelCtl::Signal(sig)) => {
                                if let Err(e) = chan.signal(sig).await {
                                    log::warn!("could not signal remote process: {}", e);
                                }
                            }
                            Some(ChannelCtl::Disconnect) | None => {
                                let _ = evt_tx.send(ChannelEvent::Closed);
                                break;
                            }
                        }
                    }
                }
            }
            // Be tidy
            let _ = chan.eof().await;
            let _ = chan.close().await;
        });

        Ok(RemoteChannel {
            events: evt_rx,
            ctl: ctl_tx,
            pump: Some(pump),
            stdout: LineAssembler::default(),
            stderr: LineAssembler::default(),
            exit_code: None,
            closed: false,
        })
    }
}

impl RemoteChannel {
    fn apply_event(&mut self, event: ChannelEvent, out: &mut Vec<OutputLine>) {
        match event {
            ChannelEvent::Stdout(bytes) => {
                for line in self.stdout.push(&bytes) {
                    out.push(OutputLine::stdout(line));
                }
            }
            ChannelEvent::Stderr(bytes) => {
                for line in self.stderr.push(&bytes) {
                    out.push(OutputLine::stderr(line));
                }
            }
            ChannelEvent::Exit(code) => self.exit_code = Some(code),
            ChannelEvent::Closed => {
                if let Some(rest) = self.stdout.flush() {
                    out.push(OutputLine::stdout(rest));
                }
                if let Some(rest) = self.stderr.flush() {
                    out.push(OutputLine::stderr(rest));
                }
                self.closed = true;
            }
        }
    }
}

#[async_trait]
impl ExecChannel for RemoteChannel {
    async fn poll_output(&mut self) -> AppResult<Vec<OutputLine>> {
        let mut out = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(event) => self.apply_event(event, &mut out),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    if !self.closed {
                        self.apply_event(ChannelEvent::Closed, &mut out);
                    }
                    break;
                }
            }
        }
        Ok(out)
    }

    fn is_finished(&self) -> bool {
        self.closed
    }

    fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    async fn terminate(&mut self, forceful: bool) -> AppResult<()> {
        let sig = if forceful {
            russh::Sig::KILL
        } else {
            russh::Sig::TERM
        };
        self.ctl
            .send(ChannelCtl::Signal(sig))
            .map_err(|_| AppError::execution("remote channel is gone"))
    }

    async fn disconnect(&mut self) {
        let _ = self.ctl.send(ChannelCtl::Disconnect);
        if let Some(pump) = self.pump.take() {
            let _ = pump.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ports::OutputStream;
    use russh::CryptoVec;

    #[test]
    fn translate_channel_msg_maps_streams() {
        let msg = ChannelMsg::Data {
            data: CryptoVec::from_slice(b"hi"),
        };
        let (event, should_break) = translate_channel_msg(&msg);
        assert!(!should_break);
        assert_eq!(event, Some(ChannelEvent::Stdout(b"hi".to_vec())));

        let msg = ChannelMsg::ExtendedData {
            data: CryptoVec::from_slice(b"err"),
            ext: 1,
        };
        let (event, should_break) = translate_channel_msg(&msg);
        assert!(!should_break);
        assert_eq!(event, Some(ChannelEvent::Stderr(b"err".to_vec())));

        let msg = ChannelMsg::ExtendedData {
            data: CryptoVec::from_slice(b"skip"),
            ext: 2,
        };
        let (event, should_break) = translate_channel_msg(&msg);
        assert!(!should_break);
        assert_eq!(event, None);

        let msg = ChannelMsg::ExitStatus { exit_status: 7 };
        let (event, should_break) = translate_channel_msg(&msg);
        assert!(!should_break);
        assert_eq!(event, Some(ChannelEvent::Exit(7)));

        let msg = ChannelMsg::Close;
        let (event, should_break) = translate_channel_msg(&msg);
        assert!(should_break);
        assert_eq!(event, Some(ChannelEvent::Closed));
    }

    #[test]
    fn line_assembler_buffers_partial_lines() {
        let mut assembler = LineAssembler::default();
        assert!(assembler.push(b"Processing ba").is_empty());
        assert_eq!(
            assembler.push(b"tch 1/2, tile 1/4\nnext"),
            vec!["Processing batch 1/2, tile 1/4"]
        );
        assert_eq!(assembler.flush(), Some("next".to_string()));
        assert_eq!(assembler.flush(), None);
    }

    #[test]
    fn line_assembler_strips_carriage_returns() {
        let mut assembler = LineAssembler::default();
        assert_eq!(assembler.push(b"one\r\ntwo\n"), vec!["one", "two"]);
    }

    #[test]
    fn line_assembler_splits_multiple_lines_in_one_chunk() {
        let mut assembler = LineAssembler::default();
        assert_eq!(assembler.push(b"a\nb\nc\n"), vec!["a", "b", "c"]);
        assert_eq!(assembler.flush(), None);
    }

    #[tokio::test]
    async fn remote_channel_drains_events_in_order() {
        let (evt_tx, evt_rx) = mpsc::unbounded_channel();
        let (ctl_tx, _ctl_rx) = mpsc::unbounded_channel();
        let mut channel = RemoteChannel {
            events: evt_rx,
            ctl: ctl_tx,
            pump: None,
            stdout: LineAssembler::default(),
            stderr: LineAssembler::default(),
            exit_code: None,
            closed: false,
        };

        evt_tx
            .send(ChannelEvent::Stdout(b"Processing batch 1/1, tile 1/1\n".to_vec()))
            .unwrap();
        evt_tx.send(ChannelEvent::Stderr(b"warning\n".to_vec())).unwrap();
        evt_tx.send(ChannelEvent::Exit(0)).unwrap();
        evt_tx.send(ChannelEvent::Closed).unwrap();

        let lines = channel.poll_output().await.unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].stream, OutputStream::Stdout);
        assert_eq!(lines[0].line, "Processing batch 1/1, tile 1/1");
        assert_eq!(lines[1].stream, OutputStream::Stderr);
        assert_eq!(lines[1].line, "warning");
        assert!(channel.is_finished());
        assert_eq!(channel.exit_code(), Some(0));
    }

    #[tokio::test]
    async fn trailing_output_without_newline_is_flushed_on_close() {
        let (evt_tx, evt_rx) = mpsc::unbounded_channel();
        let (ctl_tx, _ctl_rx) = mpsc::unbounded_channel();
        let mut channel = RemoteChannel {
            events: evt_rx,
            ctl: ctl_tx,
            pump: None,
            stdout: LineAssembler::default(),
            stderr: LineAssembler::default(),
            exit_code: None,
            closed: false,
        };

        evt_tx.send(ChannelEvent::Stderr(b"no newline".to_vec())).unwrap();
        evt_tx.send(ChannelEvent::Exit(1)).unwrap();
        drop(evt_tx);

        let lines = channel.poll_output().await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].line, "no newline");
        assert!(channel.is_finished());
        assert_eq!(channel.exit_code(), Some(1));
    }
}
