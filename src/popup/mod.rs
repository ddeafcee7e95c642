//! Popup subcommands
//!
//! Internal verbs spawned by multiplexer key bindings. Each runs as its
//! own process inside a fullscreen popup, reads state over the daemon's
//! HTTP API, and may POST verbs back.

pub mod kb;
pub mod menu;
pub mod picker;
pub mod viewer;

use anyhow::{Context, Result};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use std::io::Stdout;
use uuid::Uuid;

use crate::daemon::routes::{ProfilesResponse, ResumeRequest, SpawnRequest, StateSnapshot};
use crate::kb::{KbIssue, KbStatement};
use crate::session::Session;

/// HTTP client for the daemon API.
pub struct ApiClient {
    base: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(port: u16) -> Self {
        Self {
            base: format!("http://127.0.0.1:{}", port),
            http: reqwest::Client::new(),
        }
    }

    pub async fn state(&self) -> Result<StateSnapshot> {
        Ok(self
            .http
            .get(format!("{}/api/state", self.base))
            .send()
            .await
            .context("daemon unreachable")?
            .error_for_status()?
            .json()
            .await?)
    }

    pub async fn profiles(&self) -> Result<ProfilesResponse> {
        let resp = self
            .http
            .get(format!("{}/api/profiles", self.base))
            .send()
            .await
            .context("daemon unreachable")?;
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("profile load failed: {}", body);
        }
        Ok(resp.json().await?)
    }

    pub async fn spawn(&self, profile: &str, prompt: &str, ephemeral: bool) -> Result<Session> {
        let resp = self
            .http
            .post(format!("{}/api/spawn", self.base))
            .json(&SpawnRequest {
                profile: profile.to_string(),
                prompt: prompt.to_string(),
                ephemeral,
            })
            .send()
            .await
            .context("daemon unreachable")?;
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("spawn failed: {}", body);
        }
        Ok(resp.json().await?)
    }

    pub async fn resume(&self, session: Uuid) -> Result<Session> {
        let resp = self
            .http
            .post(format!("{}/api/resume", self.base))
            .json(&ResumeRequest { session })
            .send()
            .await
            .context("daemon unreachable")?;
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("resume failed: {}", body);
        }
        Ok(resp.json().await?)
    }

    async fn signal_window(&self, verb: &str, window: &str) -> Result<bool> {
        let resp = self
            .http
            .post(format!("{}/api/{}", self.base, verb))
            .json(&serde_json::json!({"window": window}))
            .send()
            .await
            .context("daemon unreachable")?
            .error_for_status()?;
        let body: serde_json::Value = resp.json().await?;
        Ok(body["delivered"].as_bool().unwrap_or(false))
    }

    pub async fn request_suspend_window(&self, window: &str) -> Result<bool> {
        self.signal_window("request_suspend", window).await
    }

    pub async fn request_self_drop_window(&self, window: &str) -> Result<bool> {
        self.signal_window("request_self_drop", window).await
    }

    pub async fn prompt_for_window(&self, window: &str) -> Result<String> {
        let body: serde_json::Value = self
            .http
            .get(format!("{}/api/session/prompt", self.base))
            .query(&[("window", window)])
            .send()
            .await
            .context("daemon unreachable")?
            .error_for_status()?
            .json()
            .await?;
        Ok(body["prompt"].as_str().unwrap_or_default().to_string())
    }

    pub async fn log(&self) -> Result<serde_json::Value> {
        Ok(self
            .http
            .get(format!("{}/api/log", self.base))
            .send()
            .await
            .context("daemon unreachable")?
            .error_for_status()?
            .json()
            .await?)
    }

    pub async fn kb_query(&self, q: &str) -> Result<Vec<KbStatement>> {
        Ok(self
            .http
            .post(format!("{}/api/kb/query", self.base))
            .json(&serde_json::json!({"q": q}))
            .send()
            .await
            .context("daemon unreachable")?
            .error_for_status()?
            .json()
            .await?)
    }

    pub async fn kb_issues(&self) -> Result<Vec<KbIssue>> {
        Ok(self
            .http
            .get(format!("{}/api/kb/issues", self.base))
            .send()
            .await
            .context("daemon unreachable")?
            .error_for_status()?
            .json()
            .await?)
    }

    pub async fn resolve_issue(&self, id: Uuid) -> Result<()> {
        self.http
            .post(format!("{}/api/kb/issues/resolve", self.base))
            .json(&serde_json::json!({"id": id}))
            .send()
            .await
            .context("daemon unreachable")?
            .error_for_status()?;
        Ok(())
    }

    pub async fn session_ended(&self, session: Uuid) -> Result<()> {
        self.http
            .post(format!("{}/api/session_ended", self.base))
            .json(&serde_json::json!({"session": session}))
            .send()
            .await
            .context("daemon unreachable")?
            .error_for_status()?;
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.http
            .post(format!("{}/api/shutdown", self.base))
            .send()
            .await
            .context("daemon unreachable")?
            .error_for_status()?;
        Ok(())
    }
}

pub type PopupTerminal = Terminal<CrosstermBackend<Stdout>>;

/// Enter raw mode and hand back a terminal for the popup's lifetime.
pub fn init_terminal() -> Result<PopupTerminal> {
    enable_raw_mode().context("enabling raw mode")?;
    let backend = CrosstermBackend::new(std::io::stdout());
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

pub fn restore_terminal(terminal: &mut PopupTerminal) {
    let _ = disable_raw_mode();
    let _ = terminal.show_cursor();
}
