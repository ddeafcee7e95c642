//! Recording multiplexer used by tests
//!
//! Implements the full verb set against an in-memory call log, hands out
//! synthetic window ids, and shrinks the grace period to zero so the
//! graceful-close protocol can be asserted without waiting.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{Multiplexer, MuxError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MuxCall {
    NewWindow { name: String, command: String },
    KillWindow(String),
    Select(u32),
    Hide(String),
    SendLine { window: String, text: String },
    SetOption { window: String, key: String, value: String },
    UnsetOption { window: String, key: String },
    KillSession,
}

impl MuxCall {
    pub fn verb(&self) -> &'static str {
        match self {
            MuxCall::NewWindow { .. } => "new_window",
            MuxCall::KillWindow(_) => "kill_window",
            MuxCall::Select(_) => "select",
            MuxCall::Hide(_) => "hide",
            MuxCall::SendLine { .. } => "send_line",
            MuxCall::SetOption { .. } => "set_option",
            MuxCall::UnsetOption { .. } => "unset_option",
            MuxCall::KillSession => "kill_session",
        }
    }
}

#[derive(Default)]
pub struct RecordingMux {
    calls: Mutex<Vec<MuxCall>>,
    next_window: AtomicU32,
}

impl RecordingMux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<MuxCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Only the option pushes for a given window, in order.
    pub fn option_calls(&self, window: &str) -> Vec<MuxCall> {
        self.calls()
            .into_iter()
            .filter(|c| match c {
                MuxCall::SetOption { window: w, .. } | MuxCall::UnsetOption { window: w, .. } => {
                    w == window
                }
                _ => false,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, call: MuxCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Multiplexer for RecordingMux {
    async fn session_exists(&self) -> bool {
        true
    }

    async fn create_session(&self, _window_name: &str, _command: &str) -> Result<(), MuxError> {
        Ok(())
    }

    async fn attach(&self) -> Result<(), MuxError> {
        Ok(())
    }

    async fn new_window(&self, name: &str, command: &str) -> Result<String, MuxError> {
        self.record(MuxCall::NewWindow {
            name: name.to_string(),
            command: command.to_string(),
        });
        let id = self.next_window.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("@{}", id))
    }

    async fn kill_window(&self, window_id: &str) -> Result<(), MuxError> {
        self.record(MuxCall::KillWindow(window_id.to_string()));
        Ok(())
    }

    async fn select_window(&self, index: u32) -> Result<(), MuxError> {
        self.record(MuxCall::Select(index));
        Ok(())
    }

    async fn hide_window(&self, window_id: &str) -> Result<(), MuxError> {
        self.record(MuxCall::Hide(window_id.to_string()));
        Ok(())
    }

    async fn send_line(&self, window_id: &str, text: &str) -> Result<(), MuxError> {
        self.record(MuxCall::SendLine {
            window: window_id.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn set_window_option(
        &self,
        window_id: &str,
        key: &str,
        value: &str,
    ) -> Result<(), MuxError> {
        self.record(MuxCall::SetOption {
            window: window_id.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    async fn unset_window_option(&self, window_id: &str, key: &str) -> Result<(), MuxError> {
        self.record(MuxCall::UnsetOption {
            window: window_id.to_string(),
            key: key.to_string(),
        });
        Ok(())
    }

    async fn kill_session(&self) -> Result<(), MuxError> {
        self.record(MuxCall::KillSession);
        Ok(())
    }

    fn grace_period(&self) -> Duration {
        Duration::ZERO
    }
}
