// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::time::Duration;

use crate::app::ports::ExecChannel;

/// Two-phase termination: a graceful request, a bounded wait, then a forced
/// kill for processes that ignored the first request.
#[derive(Debug, Clone, Copy)]
pub struct TerminationPolicy {
    pub grace_period: Duration,
    pub poll_interval: Duration,
}

impl Default for TerminationPolicy {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Stops the process behind `channel` and releases the channel handle.
///
/// Termination requests can themselves fail (the process may be gone, the
/// transport may have dropped); those failures are logged and the protocol
/// continues, because the handle must be released either way.
pub async fn terminate_with_grace(channel: &mut dyn ExecChannel, policy: &TerminationPolicy) {
    // Pick up anything that arrived since the last poll so a process that
    // already exited is recognized without sending a signal.
    let _ = channel.poll_output().await;

    if !channel.is_finished() {
        if let Err(err) = channel.terminate(false).await {
            log::warn!("graceful termination request failed: {}", err);
        }
        let mut elapsed = Duration::ZERO;
        while elapsed < policy.grace_period {
            tokio::time::sleep(policy.poll_interval).await;
            elapsed += policy.poll_interval;
            let _ = channel.poll_output().await;
            if channel.is_finished() {
                break;
            }
        }
        if !channel.is_finished() {
            log::warn!("process ignored the graceful termination request, killing it");
            if let Err(err) = channel.terminate(true).await {
                log::warn!("forced termination request failed: {}", err);
            }
        }
    }

    channel.disconnect().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::errors::AppResult;
    use crate::app::ports::{ExecChannel, OutputLine};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;

    /// Channel whose process exits after a configurable number of polls once
    /// a graceful request was seen, or only on a forced kill.
    struct StubbornChannel {
        polls_until_exit: Option<u32>,
        polls_since_term: u32,
        term_seen: bool,
        finished: bool,
        graceful_requests: Arc<AtomicU32>,
        forceful_requests: Arc<AtomicU32>,
        disconnected: Arc<AtomicBool>,
    }

    impl StubbornChannel {
        fn new(polls_until_exit: Option<u32>) -> Self {
            Self {
                polls_until_exit,
                polls_since_term: 0,
                term_seen: false,
                finished: false,
                graceful_requests: Arc::new(AtomicU32::new(0)),
                forceful_requests: Arc::new(AtomicU32::new(0)),
                disconnected: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    #[async_trait]
    impl ExecChannel for StubbornChannel {
        async fn poll_output(&mut self) -> AppResult<Vec<OutputLine>> {
            if self.term_seen {
                self.polls_since_term += 1;
                if let Some(limit) = self.polls_until_exit {
                    if self.polls_since_term >= limit {
                        self.finished = true;
                    }
                }
            }
            Ok(Vec::new())
        }

        fn is_finished(&self) -> bool {
            self.finished
        }

        fn exit_code(&self) -> Option<i32> {
            self.finished.then_some(143)
        }

        async fn terminate(&mut self, forceful: bool) -> AppResult<()> {
            if forceful {
                self.forceful_requests.fetch_add(1, Ordering::SeqCst);
                self.finished = true;
            } else {
                self.graceful_requests.fetch_add(1, Ordering::SeqCst);
                self.term_seen = true;
            }
            Ok(())
        }

        async fn disconnect(&mut self) {
            self.disconnected.store(true, Ordering::SeqCst);
        }
    }

    fn fast_policy() -> TerminationPolicy {
        TerminationPolicy {
            grace_period: Duration::from_millis(50),
            poll_interval: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn graceful_exit_avoids_the_forced_kill() {
        let mut channel = StubbornChannel::new(Some(2));
        let graceful = Arc::clone(&channel.graceful_requests);
        let forceful = Arc::clone(&channel.forceful_requests);
        let disconnected = Arc::clone(&channel.disconnected);

        terminate_with_grace(&mut channel, &fast_policy()).await;

        assert_eq!(graceful.load(Ordering::SeqCst), 1);
        assert_eq!(forceful.load(Ordering::SeqCst), 0);
        assert!(disconnected.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn stubborn_process_is_killed_after_the_grace_period() {
        let mut channel = StubbornChannel::new(None);
        let graceful = Arc::clone(&channel.graceful_requests);
        let forceful = Arc::clone(&channel.forceful_requests);
        let disconnected = Arc::clone(&channel.disconnected);

        let started = std::time::Instant::now();
        terminate_with_grace(&mut channel, &fast_policy()).await;

        assert_eq!(graceful.load(Ordering::SeqCst), 1);
        assert_eq!(forceful.load(Ordering::SeqCst), 1);
        assert!(disconnected.load(Ordering::SeqCst));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn finished_process_is_only_disconnected() {
        let mut channel = StubbornChannel::new(Some(0));
        channel.finished = true;
        let graceful = Arc::clone(&channel.graceful_requests);
        let forceful = Arc::clone(&channel.forceful_requests);
        let disconnected = Arc::clone(&channel.disconnected);

        terminate_with_grace(&mut channel, &fast_policy()).await;

        assert_eq!(graceful.load(Ordering::SeqCst), 0);
        assert_eq!(forceful.load(Ordering::SeqCst), 0);
        assert!(disconnected.load(Ordering::SeqCst));
    }
}
