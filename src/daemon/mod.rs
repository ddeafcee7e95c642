//! Daemon: the local HTTP/SSE bus
//!
//! One listener on `127.0.0.1:<port>` serves three audiences: agents
//! (SSE tool transport), hook scripts (state POSTs), and popup
//! subcommands (REST snapshots and verbs). All session mutation funnels
//! through here.

pub mod routes;
pub mod sse;
pub mod tools;

use anyhow::{Context, Result};
use axum::Router;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::ProjectConfig;
use crate::kb::KnowledgeBase;
use crate::profile::ProfileRegistry;
use crate::session::control::SessionControl;
use crate::session::{Session, SessionStore};
use crate::tmux::Multiplexer;
use crate::utils::paths;

/// Capacity of each observability ring buffer.
const RING_CAPACITY: usize = 256;

/// One tool dispatch, for the log viewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolTrace {
    pub at: DateTime<Utc>,
    pub session: Uuid,
    pub tool: String,
    pub ok: bool,
    pub summary: String,
}

/// One reported mode change, for the log viewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeTransition {
    pub at: DateTime<Utc>,
    pub session: Uuid,
    pub mode: String,
    pub indicator: Option<String>,
}

/// Registered SSE connection for a session.
pub(crate) struct SseConn {
    pub tx: tokio::sync::mpsc::Sender<axum::response::sse::Event>,
    pub kb_tools: bool,
}

/// Shared daemon state. Everything the handlers touch lives here.
pub struct DaemonState {
    pub port: u16,
    pub socket_name: String,
    pub project_root: PathBuf,
    pub install_dir: PathBuf,
    pub installed_profile_dir: PathBuf,
    pub user_profile_dir: PathBuf,
    pub config: ProjectConfig,
    /// Extra agent flags given to `vee start`, forwarded to every spawn.
    pub passthrough: Vec<String>,
    pub store: SessionStore,
    pub control: SessionControl,
    pub mux: Arc<dyn Multiplexer>,
    pub kb: Arc<dyn KnowledgeBase>,
    pub(crate) sse: DashMap<Uuid, SseConn>,
    traces: Mutex<VecDeque<ToolTrace>>,
    transitions: Mutex<VecDeque<ModeTransition>>,
    pub ingest_active: AtomicUsize,
    pub shutdown: CancellationToken,
}

impl DaemonState {
    pub fn new(
        port: u16,
        socket_name: impl Into<String>,
        project_root: PathBuf,
        config: ProjectConfig,
        mux: Arc<dyn Multiplexer>,
        kb: Arc<dyn KnowledgeBase>,
        passthrough: Vec<String>,
    ) -> Self {
        Self {
            port,
            socket_name: socket_name.into(),
            project_root,
            install_dir: paths::install_dir(),
            installed_profile_dir: paths::installed_profile_dir(),
            user_profile_dir: paths::user_profile_dir(),
            config,
            passthrough,
            store: SessionStore::new(),
            control: SessionControl::new(),
            mux,
            kb,
            sse: DashMap::new(),
            traces: Mutex::new(VecDeque::new()),
            transitions: Mutex::new(VecDeque::new()),
            ingest_active: AtomicUsize::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    /// Re-read the profile registry from disk (picker semantics).
    pub fn load_profiles(&self) -> Result<ProfileRegistry> {
        ProfileRegistry::load(&self.installed_profile_dir, &self.user_profile_dir)
    }

    pub fn record_trace(&self, session: Uuid, tool: &str, ok: bool, summary: impl Into<String>) {
        let mut traces = self.traces.lock().unwrap();
        if traces.len() >= RING_CAPACITY {
            traces.pop_front();
        }
        traces.push_back(ToolTrace {
            at: Utc::now(),
            session,
            tool: tool.to_string(),
            ok,
            summary: summary.into(),
        });
    }

    pub fn record_transition(&self, session: Uuid, mode: &str, indicator: Option<String>) {
        let mut transitions = self.transitions.lock().unwrap();
        if transitions.len() >= RING_CAPACITY {
            transitions.pop_front();
        }
        transitions.push_back(ModeTransition {
            at: Utc::now(),
            session,
            mode: mode.to_string(),
            indicator,
        });
    }

    pub fn traces(&self) -> Vec<ToolTrace> {
        self.traces.lock().unwrap().iter().cloned().collect()
    }

    pub fn transitions(&self) -> Vec<ModeTransition> {
        self.transitions.lock().unwrap().iter().cloned().collect()
    }

    /// Push the indicator options for a session's window. Store updates
    /// for a session always precede this call.
    pub async fn sync_indicators(&self, id: Uuid) {
        if let Some(session) = self.store.get(id) {
            if let Err(e) = crate::indicator::sync(self.mux.as_ref(), &session).await {
                warn!(session = %id, error = %e, "indicator push failed");
            }
        }
    }

    /// Whether knowledge ingestion is enabled (config default: on).
    pub fn kb_ingest_enabled(&self) -> bool {
        self.config.kb_ingest.unwrap_or(true)
    }

    /// Spawn the background ingestion task for a finished session.
    pub fn spawn_ingest(self: &Arc<Self>, session: Session) {
        if !self.kb_ingest_enabled() {
            return;
        }
        let state = Arc::clone(self);
        state.ingest_active.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            let window = session.window_target.clone();
            if let Some(w) = &window {
                let _ = crate::indicator::set_kb_ingest(state.mux.as_ref(), w, true).await;
            }
            crate::kb::ingest::ingest_or_report(state.kb.clone(), &session).await;
            if let Some(w) = &window {
                let _ = crate::indicator::set_kb_ingest(state.mux.as_ref(), w, false).await;
            }
            state.ingest_active.fetch_sub(1, Ordering::SeqCst);
        });
    }
}

/// Build the daemon router.
pub fn router(state: Arc<DaemonState>) -> Router {
    routes::router(state).layer(CorsLayer::permissive())
}

/// Serve until the shutdown token fires.
pub async fn serve(state: Arc<DaemonState>, listener: TcpListener) -> Result<()> {
    let token = state.shutdown.clone();
    let app = router(state);
    info!(addr = %listener.local_addr()?, "daemon listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
        .context("daemon HTTP server")?;
    Ok(())
}

/// Bind the daemon listener. A configured port is authoritative; without
/// one the OS assigns a free port and the bound address is read back.
pub async fn bind(config_port: Option<u16>) -> Result<(TcpListener, u16)> {
    let port = config_port.unwrap_or(0);
    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .with_context(|| format!("binding daemon port {}", port))?;
    let port = listener.local_addr()?.port();
    Ok((listener, port))
}

/// Graceful orchestrator shutdown: signal every active watcher, wait for
/// them (bounded by the close grace period), then take the multiplexer
/// session down and stop the daemon.
pub async fn shutdown(state: Arc<DaemonState>) {
    let active = state.store.active();
    info!(sessions = active.len(), "shutting down");
    for session in &active {
        state.control.request_suspend(session.id);
    }

    let deadline = tokio::time::Instant::now()
        + state.mux.grace_period()
        + std::time::Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline && !state.store.active().is_empty() {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }
    if !state.store.active().is_empty() {
        error!("sessions still active at shutdown deadline");
    }

    if let Err(e) = state.mux.kill_session().await {
        warn!(error = %e, "killing multiplexer session failed");
    }
    state.shutdown.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kb::MemoryKb;
    use crate::tmux::recording::RecordingMux;

    fn test_state() -> Arc<DaemonState> {
        Arc::new(DaemonState::new(
            7331,
            "default",
            PathBuf::from("/tmp/project"),
            ProjectConfig::default(),
            Arc::new(RecordingMux::new()),
            Arc::new(MemoryKb::new()),
            Vec::new(),
        ))
    }

    #[test]
    fn test_ring_buffer_bounded() {
        let state = test_state();
        let id = Uuid::new_v4();
        for i in 0..(RING_CAPACITY + 10) {
            state.record_trace(id, "kb_query", true, format!("q{}", i));
        }
        let traces = state.traces();
        assert_eq!(traces.len(), RING_CAPACITY);
        // oldest entries dropped
        assert_eq!(traces[0].summary, "q10");
    }

    #[tokio::test]
    async fn test_shutdown_signals_active_sessions() {
        let state = test_state();
        let id = Uuid::new_v4();
        state
            .store
            .create(id, "normal", "x", "hi", false, Some("@1".into()), String::new());
        let mut signals = state.control.register(id);

        let task = tokio::spawn(shutdown(Arc::clone(&state)));
        signals.suspend.recv().await.unwrap();
        // watcher acknowledges by leaving active
        state
            .store
            .set_status(id, crate::session::SessionStatus::Suspended)
            .unwrap();
        state.control.clear(id);
        task.await.unwrap();
        assert!(state.shutdown.is_cancelled());
    }
}
