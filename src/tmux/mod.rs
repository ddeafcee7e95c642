//! Multiplexer control plane
//!
//! A thin verb layer over an external tmux server running on a private
//! socket, so several orchestrator instances coexist. The `Multiplexer`
//! trait carries the verbs the daemon and lifecycle watchers need; the
//! startup-only plumbing (status bar, key bindings) lives on `TmuxClient`
//! directly.

pub mod recording;

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// How long an agent gets to honour `/exit` before the window is killed.
pub const GRACE_PERIOD: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    #[error("tmux not found or not installed")]
    NotFound,
    #[error("tmux command failed: {0}")]
    CommandFailed(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The verb set any window multiplexer must provide.
#[async_trait]
pub trait Multiplexer: Send + Sync {
    async fn session_exists(&self) -> bool;
    /// Create the orchestrator session with its initial (dashboard) window.
    async fn create_session(&self, window_name: &str, command: &str) -> Result<(), MuxError>;
    /// Foreground attach; blocks until the client detaches.
    async fn attach(&self) -> Result<(), MuxError>;
    /// Open a window running a shell command; returns the stable window id.
    async fn new_window(&self, name: &str, command: &str) -> Result<String, MuxError>;
    async fn kill_window(&self, window_id: &str) -> Result<(), MuxError>;
    async fn select_window(&self, index: u32) -> Result<(), MuxError>;
    /// Move a window to the hidden drain session so it leaves the status
    /// bar immediately.
    async fn hide_window(&self, window_id: &str) -> Result<(), MuxError>;
    /// Type a literal line into a window and press Enter.
    async fn send_line(&self, window_id: &str, text: &str) -> Result<(), MuxError>;
    async fn set_window_option(
        &self,
        window_id: &str,
        key: &str,
        value: &str,
    ) -> Result<(), MuxError>;
    async fn unset_window_option(&self, window_id: &str, key: &str) -> Result<(), MuxError>;
    /// Kill the whole orchestrator session.
    async fn kill_session(&self) -> Result<(), MuxError>;

    fn grace_period(&self) -> Duration {
        GRACE_PERIOD
    }

    /// Graceful termination protocol: hide the window, restore focus to
    /// the dashboard, type `/exit` so the agent can flush its session
    /// index, then kill unconditionally after the grace period.
    async fn graceful_close(&self, window_id: &str) -> Result<(), MuxError> {
        if let Err(e) = self.hide_window(window_id).await {
            warn!(window_id, error = %e, "hide before close failed");
        }
        if let Err(e) = self.select_window(0).await {
            debug!(error = %e, "dashboard select failed");
        }
        if let Err(e) = self.send_line(window_id, "/exit").await {
            warn!(window_id, error = %e, "sending /exit failed");
        }
        tokio::time::sleep(self.grace_period()).await;
        if let Err(e) = self.kill_window(window_id).await {
            // the agent honoured /exit and the window is already gone
            debug!(window_id, error = %e, "window gone before kill");
        }
        Ok(())
    }
}

/// tmux driven over its CLI on a per-instance socket.
pub struct TmuxClient {
    socket: PathBuf,
    session: String,
    drain: String,
}

impl TmuxClient {
    pub fn new(socket: PathBuf, session: impl Into<String>) -> Self {
        let session = session.into();
        let drain = format!("{}-drain", session);
        Self {
            socket,
            session,
            drain,
        }
    }

    /// Whether the tmux binary is present at all. Its absence is
    /// unrecoverable for the orchestrator.
    pub async fn available() -> bool {
        Command::new("tmux")
            .arg("-V")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    async fn run(&self, args: &[&str]) -> Result<String, MuxError> {
        let output = Command::new("tmux")
            .arg("-S")
            .arg(&self.socket)
            .args(args)
            .output()
            .await
            .map_err(|_| MuxError::NotFound)?;
        if !output.status.success() {
            return Err(MuxError::CommandFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn ensure_drain(&self) -> Result<(), MuxError> {
        if self.run(&["has-session", "-t", &self.drain]).await.is_err() {
            self.run(&["new-session", "-d", "-s", &self.drain]).await?;
        }
        Ok(())
    }

    /// Configure the status bar to interpolate the per-window indicator
    /// options, and bind the prefix keys to the popup verbs. Done once at
    /// startup; the daemon only pushes option values afterwards.
    pub async fn configure(&self, port: u16, socket_name: &str) -> Result<(), MuxError> {
        let badge = "#{?@vee-working,#[fg=yellow]⚙ #[default],#{?@vee-notif,#[fg=red]● #[default],}}\
#{?@vee-perm,#[fg=cyan][#{@vee-perm}]#[default],}\
#{?@vee-ephemeral,#[fg=blue]⬚#[default],}\
#{?@vee-kb-ingest,#[fg=magenta]◆#[default],}";
        let fmt = format!("#I:#W {}", badge);
        let current = format!("#[bold]#I:#W#[default] {}", badge);
        self.run(&["set-option", "-g", "window-status-format", &fmt])
            .await?;
        self.run(&["set-option", "-g", "window-status-current-format", &current])
            .await?;
        self.run(&["set-option", "-g", "status-interval", "2"]).await?;

        let popup = |verb: &str| {
            format!(
                "display-popup -E -w 80% -h 80% 'vee {verb} --port {port} --socket {socket_name}'"
            )
        };
        let window_verb = |verb: &str| {
            format!("run-shell \"vee {verb} --port {port} --window '#{{window_id}}'\"")
        };
        let bindings = [
            ("n", popup("_session-picker")),
            ("r", popup("_resume-menu")),
            ("l", popup("_log-viewer")),
            ("k", popup("_kb-explorer")),
            ("i", popup("_issue-resolver")),
            (
                "p",
                format!(
                    "display-popup -E -w 80% -h 80% \"vee _prompt-viewer --port {port} --window '#{{window_id}}'\""
                ),
            ),
            ("q", window_verb("_suspend-window")),
            ("d", window_verb("_complete-window")),
            ("Q", format!("run-shell 'vee _shutdown --port {port}'")),
        ];
        for (key, action) in &bindings {
            self.run(&["bind-key", "-T", "prefix", *key, action.as_str()])
                .await?;
        }
        Ok(())
    }

    pub async fn kill_server(&self) -> Result<(), MuxError> {
        self.run(&["kill-server"]).await.map(|_| ())
    }
}

#[async_trait]
impl Multiplexer for TmuxClient {
    async fn session_exists(&self) -> bool {
        self.run(&["has-session", "-t", &self.session]).await.is_ok()
    }

    async fn create_session(&self, window_name: &str, command: &str) -> Result<(), MuxError> {
        if let Some(dir) = self.socket.parent() {
            std::fs::create_dir_all(dir)?;
        }
        self.run(&[
            "new-session",
            "-d",
            "-s",
            &self.session,
            "-n",
            window_name,
            command,
        ])
        .await
        .map(|_| ())
    }

    async fn attach(&self) -> Result<(), MuxError> {
        let status = Command::new("tmux")
            .arg("-S")
            .arg(&self.socket)
            .args(["attach-session", "-t", &self.session])
            .status()
            .await
            .map_err(|_| MuxError::NotFound)?;
        if !status.success() {
            return Err(MuxError::CommandFailed("attach-session failed".to_string()));
        }
        Ok(())
    }

    async fn new_window(&self, name: &str, command: &str) -> Result<String, MuxError> {
        let target = format!("{}:", self.session);
        let id = self
            .run(&[
                "new-window",
                "-t",
                &target,
                "-n",
                name,
                "-P",
                "-F",
                "#{window_id}",
                command,
            ])
            .await?;
        Ok(id.trim().to_string())
    }

    async fn kill_window(&self, window_id: &str) -> Result<(), MuxError> {
        self.run(&["kill-window", "-t", window_id]).await.map(|_| ())
    }

    async fn select_window(&self, index: u32) -> Result<(), MuxError> {
        let target = format!("{}:{}", self.session, index);
        self.run(&["select-window", "-t", &target]).await.map(|_| ())
    }

    async fn hide_window(&self, window_id: &str) -> Result<(), MuxError> {
        self.ensure_drain().await?;
        let target = format!("{}:", self.drain);
        self.run(&["move-window", "-s", window_id, "-t", &target])
            .await
            .map(|_| ())
    }

    async fn send_line(&self, window_id: &str, text: &str) -> Result<(), MuxError> {
        self.run(&["send-keys", "-t", window_id, "-l", "--", text])
            .await?;
        self.run(&["send-keys", "-t", window_id, "Enter"]).await.map(|_| ())
    }

    async fn set_window_option(
        &self,
        window_id: &str,
        key: &str,
        value: &str,
    ) -> Result<(), MuxError> {
        self.run(&["set-option", "-w", "-t", window_id, key, value])
            .await
            .map(|_| ())
    }

    async fn unset_window_option(&self, window_id: &str, key: &str) -> Result<(), MuxError> {
        self.run(&["set-option", "-w", "-u", "-t", window_id, key])
            .await
            .map(|_| ())
    }

    async fn kill_session(&self) -> Result<(), MuxError> {
        self.run(&["kill-session", "-t", &self.session]).await.map(|_| ())
    }
}

/// Socket path helper shared by every subcommand that targets the same
/// orchestrator instance.
pub fn socket_for(name: &str) -> PathBuf {
    crate::utils::paths::socket_path(name)
}

/// Validate a socket/session name: it becomes a filesystem path component.
pub fn valid_socket_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use recording::RecordingMux;

    #[test]
    fn test_valid_socket_name() {
        assert!(valid_socket_name("default"));
        assert!(valid_socket_name("work_2"));
        assert!(!valid_socket_name(""));
        assert!(!valid_socket_name("../escape"));
        assert!(!valid_socket_name("a b"));
    }

    #[tokio::test]
    async fn test_graceful_close_protocol_order() {
        let mux = RecordingMux::new();
        let id = mux.new_window("agent", "claude").await.unwrap();
        mux.graceful_close(&id).await.unwrap();

        let calls = mux.calls();
        let names: Vec<String> = calls.iter().map(|c| c.verb().to_string()).collect();
        // hide, focus dashboard, /exit, then the unconditional kill
        assert_eq!(
            names,
            vec!["new_window", "hide", "select", "send_line", "kill_window"]
        );
    }

    #[tokio::test]
    async fn test_graceful_close_kills_exactly_once() {
        let mux = RecordingMux::new();
        let id = mux.new_window("agent", "claude").await.unwrap();
        mux.graceful_close(&id).await.unwrap();
        let kills = mux
            .calls()
            .iter()
            .filter(|c| c.verb() == "kill_window")
            .count();
        assert_eq!(kills, 1);
    }
}
