// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Progress reporting and cooperative cancellation
//!
//! Decouples "something is happening during session construction" from the
//! host UI. The channel forwards progress reports to a subscribed sink and
//! translates a consumer-side cancel request into the cancellation token
//! threaded through session construction and generation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

use crate::error::{QuillError, Result};

/// Cooperative cancellation token
///
/// A boolean flag plus an abort notifier. Created fresh per logical
/// operation; long-running steps poll it at phase boundaries.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    abort: Arc<Notify>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag and wake any task waiting on the abort notifier
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.abort.notify_waiters();
    }

    /// Clear the flag so the token can back a fresh operation
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Cooperative checkpoint: surfaces the distinguished cancellation outcome
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(QuillError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Wait until the token is cancelled
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            self.abort.notified().await;
        }
    }
}

/// Status attached to a progress report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStatus {
    Loading,
    Complete,
    Error,
    Cancelled,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::Loading => "loading",
            ProgressStatus::Complete => "complete",
            ProgressStatus::Error => "error",
            ProgressStatus::Cancelled => "cancelled",
        }
    }
}

/// One progress report delivered to the consumer sink
///
/// `percent` is `None` when the phase has no meaningful completion fraction.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressReport {
    pub message: String,
    pub percent: Option<f32>,
    pub status: ProgressStatus,
}

/// Consumer-side sink for progress reports
pub type ProgressSink = Arc<dyn Fn(ProgressReport) + Send + Sync>;

struct ChannelState {
    open: bool,
    last: Option<(String, ProgressStatus)>,
    sink: Option<ProgressSink>,
    token: CancelToken,
}

/// Bidirectional progress/cancellation channel
///
/// The construction phase runs while the host toggles the channel, so every
/// mutation must stay safe after `close()`: a no-op, not an error.
#[derive(Clone)]
pub struct ProgressChannel {
    inner: Arc<Mutex<ChannelState>>,
}

impl Default for ProgressChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressChannel {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ChannelState {
                open: false,
                last: None,
                sink: None,
                token: CancelToken::new(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, ChannelState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!(target: "quill.progress", "channel lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Register the consumer sink that receives reports
    pub fn subscribe(&self, sink: ProgressSink) {
        self.state().sink = Some(sink);
    }

    /// Begin a logical reporting session
    ///
    /// Idempotent: calling while already open just resets the cancellation
    /// state of the attached token.
    pub fn open(&self) {
        let mut state = self.state();
        if !state.open {
            state.open = true;
            state.last = None;
        }
        state.token.reset();
    }

    /// End the reporting session; later mutations become no-ops
    pub fn close(&self) {
        self.state().open = false;
    }

    pub fn is_open(&self) -> bool {
        self.state().open
    }

    /// Emit a report while open, collapsing consecutive duplicate loading text
    ///
    /// Terminal statuses (complete/error/cancelled) are never suppressed,
    /// even when textually identical to the preceding report.
    pub fn send_progress(&self, message: &str, percent: Option<f32>, status: ProgressStatus) {
        let (sink, report) = {
            let mut state = self.state();
            if !state.open {
                return;
            }

            if status == ProgressStatus::Loading {
                if let Some((last_message, last_status)) = &state.last {
                    if last_message == message && *last_status == ProgressStatus::Loading {
                        return;
                    }
                }
            }

            state.last = Some((message.to_string(), status));
            let report = ProgressReport {
                message: message.to_string(),
                percent,
                status,
            };
            (state.sink.clone(), report)
        };

        tracing::debug!(
            target: "quill.progress",
            status = status.as_str(),
            percent = ?report.percent,
            message = %report.message,
            "progress report"
        );

        if let Some(sink) = sink {
            sink(report);
        }
    }

    /// Consumer-side cancel request; trips the attached token
    pub fn request_cancel(&self) {
        let token = self.state().token.clone();
        tracing::info!(target: "quill.progress", "cancel requested");
        token.cancel();
    }

    /// Attach the token backing the current operation
    pub fn attach_token(&self, token: &CancelToken) {
        self.state().token = token.clone();
    }

    /// Token currently attached to the channel
    pub fn token(&self) -> CancelToken {
        self.state().token.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn collecting_channel() -> (ProgressChannel, Arc<StdMutex<Vec<ProgressReport>>>) {
        let channel = ProgressChannel::new();
        let seen: Arc<StdMutex<Vec<ProgressReport>>> = Arc::new(StdMutex::new(vec![]));
        let sink_seen = seen.clone();
        channel.subscribe(Arc::new(move |report| {
            sink_seen.lock().unwrap().push(report);
        }));
        (channel, seen)
    }

    // ===== CancelToken Tests =====

    #[test]
    fn test_token_starts_clear() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert!(token.check().is_ok());
    }

    #[test]
    fn test_token_cancel_and_check() {
        let token = CancelToken::new();
        token.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(QuillError::Cancelled)));
    }

    #[test]
    fn test_token_clone_shares_flag() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_token_reset() {
        let token = CancelToken::new();
        token.cancel();
        token.reset();
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn test_token_cancelled_wait() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
            true
        });
        token.cancel();
        assert!(handle.await.unwrap());
    }

    // ===== ProgressChannel Tests =====

    #[test]
    fn test_send_while_closed_is_noop() {
        let (channel, seen) = collecting_channel();
        channel.send_progress("loading model", None, ProgressStatus::Loading);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_loading_suppressed() {
        let (channel, seen) = collecting_channel();
        channel.open();
        channel.send_progress("downloading", Some(0.5), ProgressStatus::Loading);
        channel.send_progress("downloading", Some(0.5), ProgressStatus::Loading);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_terminal_status_never_suppressed() {
        let (channel, seen) = collecting_channel();
        channel.open();
        channel.send_progress("ready", None, ProgressStatus::Loading);
        channel.send_progress("ready", None, ProgressStatus::Complete);
        channel.send_progress("ready", None, ProgressStatus::Complete);

        let reports = seen.lock().unwrap();
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[1].status, ProgressStatus::Complete);
        assert_eq!(reports[2].status, ProgressStatus::Complete);
    }

    #[test]
    fn test_distinct_loading_messages_delivered() {
        let (channel, seen) = collecting_channel();
        channel.open();
        channel.send_progress("downloading 10%", Some(0.1), ProgressStatus::Loading);
        channel.send_progress("downloading 20%", Some(0.2), ProgressStatus::Loading);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_close_then_mutate_is_safe() {
        let (channel, seen) = collecting_channel();
        channel.open();
        channel.close();
        channel.close();
        channel.send_progress("late", None, ProgressStatus::Loading);
        channel.request_cancel();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_reopen_resets_cancellation() {
        let channel = ProgressChannel::new();
        channel.open();
        channel.request_cancel();
        assert!(channel.token().is_cancelled());

        channel.open();
        assert!(!channel.token().is_cancelled());
    }

    #[test]
    fn test_request_cancel_trips_attached_token() {
        let channel = ProgressChannel::new();
        let token = CancelToken::new();
        channel.open();
        channel.attach_token(&token);
        channel.request_cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_status_as_str() {
        assert_eq!(ProgressStatus::Loading.as_str(), "loading");
        assert_eq!(ProgressStatus::Complete.as_str(), "complete");
        assert_eq!(ProgressStatus::Error.as_str(), "error");
        assert_eq!(ProgressStatus::Cancelled.as_str(), "cancelled");
    }
}
