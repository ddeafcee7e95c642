//! Per-session signal channels
//!
//! Each active session owns a trio of depth-1 channels: `suspend` and
//! `self_drop` carry lifecycle requests from the UI and the tool layer,
//! `done` carries the process-exit notification posted by the
//! `_session-ended` cleanup tail. Sends are try-sends: a duplicate request
//! while one is pending coalesces to `false` instead of blocking.

use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Receive halves handed to the session's lifecycle watcher.
pub struct SessionSignals {
    pub suspend: mpsc::Receiver<()>,
    pub self_drop: mpsc::Receiver<()>,
    pub done: mpsc::Receiver<()>,
}

struct SignalSenders {
    suspend: mpsc::Sender<()>,
    self_drop: mpsc::Sender<()>,
    done: mpsc::Sender<()>,
}

/// Map of `session id → signal senders`. Entries exist only while the
/// session is `active`.
#[derive(Default)]
pub struct SessionControl {
    senders: Mutex<HashMap<Uuid, SignalSenders>>,
}

impl SessionControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the signal channels for a session, returning the receive
    /// halves. A prior registration for the same id is replaced.
    pub fn register(&self, id: Uuid) -> SessionSignals {
        let (suspend_tx, suspend_rx) = mpsc::channel(1);
        let (self_drop_tx, self_drop_rx) = mpsc::channel(1);
        let (done_tx, done_rx) = mpsc::channel(1);
        self.senders.lock().unwrap().insert(
            id,
            SignalSenders {
                suspend: suspend_tx,
                self_drop: self_drop_tx,
                done: done_tx,
            },
        );
        SessionSignals {
            suspend: suspend_rx,
            self_drop: self_drop_rx,
            done: done_rx,
        }
    }

    /// Request a suspend. `false` when a request is already pending or the
    /// id is unknown.
    pub fn request_suspend(&self, id: Uuid) -> bool {
        self.try_send(id, |s| &s.suspend)
    }

    /// Request a self-drop (the agent is done and wants a clean end).
    pub fn request_self_drop(&self, id: Uuid) -> bool {
        self.try_send(id, |s| &s.self_drop)
    }

    /// Report that the agent process ended.
    pub fn notify_done(&self, id: Uuid) -> bool {
        self.try_send(id, |s| &s.done)
    }

    /// Drop the entry for a session that left `active`.
    pub fn clear(&self, id: Uuid) -> bool {
        self.senders.lock().unwrap().remove(&id).is_some()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.senders.lock().unwrap().contains_key(&id)
    }

    fn try_send(&self, id: Uuid, pick: impl Fn(&SignalSenders) -> &mpsc::Sender<()>) -> bool {
        let senders = self.senders.lock().unwrap();
        match senders.get(&id) {
            Some(entry) => pick(entry).try_send(()).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_suspend_coalesces_while_pending() {
        let control = SessionControl::new();
        let id = Uuid::new_v4();
        let mut signals = control.register(id);

        assert!(control.request_suspend(id));
        assert!(!control.request_suspend(id));

        signals.suspend.recv().await.unwrap();
        // consumed: a new request goes through again
        assert!(control.request_suspend(id));
    }

    #[tokio::test]
    async fn test_signals_are_independent() {
        let control = SessionControl::new();
        let id = Uuid::new_v4();
        let _signals = control.register(id);

        assert!(control.request_suspend(id));
        assert!(control.request_self_drop(id));
        assert!(control.notify_done(id));
    }

    #[test]
    fn test_unknown_session_returns_false() {
        let control = SessionControl::new();
        assert!(!control.request_suspend(Uuid::new_v4()));
        assert!(!control.request_self_drop(Uuid::new_v4()));
        assert!(!control.notify_done(Uuid::new_v4()));
    }

    #[test]
    fn test_clear_removes_entry() {
        let control = SessionControl::new();
        let id = Uuid::new_v4();
        let _signals = control.register(id);
        assert!(control.contains(id));
        assert!(control.clear(id));
        assert!(!control.contains(id));
        assert!(!control.request_suspend(id));
    }
}
