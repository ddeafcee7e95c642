//! REST surface of the daemon

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::process::Stdio;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{error, info};
use uuid::Uuid;

use super::sse;
use super::DaemonState;
use crate::ephemeral;
use crate::kb::{KbIssue, KbStatement};
use crate::profile::Profile;
use crate::session::{runner, FlagUpdate, Session};

pub fn router(state: Arc<DaemonState>) -> Router {
    Router::new()
        .route("/sse", get(sse::sse_get).post(sse::sse_post))
        .route("/api/state", get(get_state))
        .route("/api/config", get(get_config))
        .route("/api/profiles", get(get_profiles))
        .route("/api/session/prompt", get(get_session_prompt))
        .route("/api/hook/window-state", post(post_window_state))
        .route("/api/mode", post(post_mode))
        .route("/api/kb/query", post(kb_query))
        .route("/api/kb/fetch", get(kb_fetch))
        .route("/api/kb/issues", get(kb_issues))
        .route("/api/kb/issues/resolve", post(kb_resolve))
        .route("/api/gpg/sign", post(gpg_sign))
        .route("/api/request_suspend", post(request_suspend))
        .route("/api/request_self_drop", post(request_self_drop))
        .route("/api/spawn", post(spawn_session))
        .route("/api/resume", post(resume_session))
        .route("/api/session_ended", post(session_ended))
        .route("/api/log", get(get_log))
        .route("/api/shutdown", post(post_shutdown))
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

type Rejection = (StatusCode, Json<ErrorBody>);

fn reject(status: StatusCode, code: &str, error: impl Into<String>) -> Rejection {
    (
        status,
        Json(ErrorBody {
            error: error.into(),
            code: code.to_string(),
        }),
    )
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub active: Vec<Session>,
    pub suspended: Vec<Session>,
    pub completed: Vec<Session>,
    pub ingest_tasks: usize,
    pub open_issues: usize,
}

async fn get_state(State(state): State<Arc<DaemonState>>) -> Json<StateSnapshot> {
    let open_issues = state.kb.open_issue_count().await.unwrap_or(0);
    Json(StateSnapshot {
        active: state.store.active(),
        suspended: state.store.suspended(),
        completed: state.store.completed(),
        ingest_tasks: state.ingest_active.load(Ordering::SeqCst),
        open_issues,
    })
}

async fn get_config(State(state): State<Arc<DaemonState>>) -> Json<Value> {
    Json(json!({
        "project_root": state.project_root,
        "socket": state.socket_name,
        "config": state.config,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProfilesResponse {
    pub profiles: Vec<Profile>,
    pub ephemeral_available: bool,
}

async fn get_profiles(
    State(state): State<Arc<DaemonState>>,
) -> Result<Json<ProfilesResponse>, Rejection> {
    let registry = state.load_profiles().map_err(|e| {
        reject(
            StatusCode::INTERNAL_SERVER_ERROR,
            "PROFILE_LOAD_FAILED",
            format!("{:#}", e),
        )
    })?;
    if registry.is_empty() {
        return Err(reject(
            StatusCode::INTERNAL_SERVER_ERROR,
            "NO_PROFILES",
            "no profiles found in either profile directory",
        ));
    }
    let ephemeral_available =
        ephemeral::ephemeral_available(state.config.ephemeral.as_ref()).await;
    Ok(Json(ProfilesResponse {
        profiles: registry.ordered().into_iter().cloned().collect(),
        ephemeral_available,
    }))
}

#[derive(Debug, Deserialize)]
struct WindowQuery {
    window: String,
}

async fn get_session_prompt(
    State(state): State<Arc<DaemonState>>,
    Query(params): Query<WindowQuery>,
) -> Result<Json<Value>, Rejection> {
    let session = state
        .store
        .find_by_window_target(&params.window)
        .ok_or_else(|| {
            reject(
                StatusCode::NOT_FOUND,
                "NO_SESSION_FOR_WINDOW",
                format!("no session bound to window {}", params.window),
            )
        })?;
    Ok(Json(json!({
        "session": session.id,
        "profile": session.profile,
        "prompt": session.system_prompt,
    })))
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    session: Uuid,
}

/// Hook scripts POST flag objects here; unknown fields from the original
/// hook payload ride along and are ignored.
async fn post_window_state(
    State(state): State<Arc<DaemonState>>,
    Query(params): Query<SessionQuery>,
    Json(body): Json<Value>,
) -> Result<StatusCode, Rejection> {
    let update: FlagUpdate = serde_json::from_value(body).map_err(|e| {
        reject(StatusCode::BAD_REQUEST, "BAD_FLAGS", e.to_string())
    })?;
    state
        .store
        .update_flags(params.session, &update)
        .map_err(|e| reject(StatusCode::NOT_FOUND, "SESSION_NOT_FOUND", e.to_string()))?;
    state.sync_indicators(params.session).await;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct ModeRequest {
    session: Uuid,
    mode: String,
    #[serde(default)]
    indicator: Option<String>,
}

/// Manual mode change (legacy path kept for older hook settings).
async fn post_mode(
    State(state): State<Arc<DaemonState>>,
    Json(req): Json<ModeRequest>,
) -> Result<StatusCode, Rejection> {
    state.record_transition(req.session, &req.mode, req.indicator);
    let mode = req
        .mode
        .parse()
        .map_err(|_| reject(StatusCode::BAD_REQUEST, "BAD_MODE", "unknown permission mode"))?;
    state
        .store
        .update_flags(
            req.session,
            &FlagUpdate {
                permission_mode: Some(mode),
                ..Default::default()
            },
        )
        .map_err(|e| reject(StatusCode::NOT_FOUND, "SESSION_NOT_FOUND", e.to_string()))?;
    state.sync_indicators(req.session).await;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct KbQueryRequest {
    q: String,
    #[serde(default)]
    limit: Option<usize>,
}

async fn kb_query(
    State(state): State<Arc<DaemonState>>,
    Json(req): Json<KbQueryRequest>,
) -> Result<Json<Vec<KbStatement>>, Rejection> {
    let hits = state
        .kb
        .query(&req.q, req.limit.unwrap_or(20))
        .await
        .map_err(|e| reject(StatusCode::BAD_GATEWAY, "KB_UNAVAILABLE", e.to_string()))?;
    Ok(Json(hits))
}

#[derive(Debug, Deserialize)]
struct KbFetchQuery {
    id: Uuid,
}

async fn kb_fetch(
    State(state): State<Arc<DaemonState>>,
    Query(params): Query<KbFetchQuery>,
) -> Result<Json<KbStatement>, Rejection> {
    let statement = state
        .kb
        .fetch(params.id)
        .await
        .map_err(|e| reject(StatusCode::BAD_GATEWAY, "KB_UNAVAILABLE", e.to_string()))?
        .ok_or_else(|| {
            reject(
                StatusCode::NOT_FOUND,
                "STATEMENT_NOT_FOUND",
                format!("no statement {}", params.id),
            )
        })?;
    Ok(Json(statement))
}

async fn kb_issues(
    State(state): State<Arc<DaemonState>>,
) -> Result<Json<Vec<KbIssue>>, Rejection> {
    let issues = state
        .kb
        .issues()
        .await
        .map_err(|e| reject(StatusCode::BAD_GATEWAY, "KB_UNAVAILABLE", e.to_string()))?;
    Ok(Json(issues))
}

#[derive(Debug, Deserialize)]
struct KbResolveRequest {
    id: Uuid,
}

async fn kb_resolve(
    State(state): State<Arc<DaemonState>>,
    Json(req): Json<KbResolveRequest>,
) -> Result<StatusCode, Rejection> {
    state
        .kb
        .resolve_issue(req.id)
        .await
        .map_err(|e| reject(StatusCode::BAD_GATEWAY, "KB_UNAVAILABLE", e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

/// Detached signing for sandboxed agents. The raw payload arrives as the
/// body; the armored signature goes back as the body.
async fn gpg_sign(
    State(_state): State<Arc<DaemonState>>,
    body: String,
) -> Result<String, Rejection> {
    let mut child = tokio::process::Command::new("gpg")
        .args(["--batch", "--yes", "--detach-sign", "--armor"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| reject(StatusCode::BAD_GATEWAY, "GPG_UNAVAILABLE", e.to_string()))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(body.as_bytes())
            .await
            .map_err(|e| reject(StatusCode::BAD_GATEWAY, "GPG_IO", e.to_string()))?;
    }
    let output = child
        .wait_with_output()
        .await
        .map_err(|e| reject(StatusCode::BAD_GATEWAY, "GPG_IO", e.to_string()))?;
    if !output.status.success() {
        return Err(reject(
            StatusCode::BAD_GATEWAY,
            "GPG_FAILED",
            String::from_utf8_lossy(&output.stderr).to_string(),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

#[derive(Debug, Deserialize)]
struct SignalRequest {
    #[serde(default)]
    session: Option<Uuid>,
    #[serde(default)]
    window: Option<String>,
}

fn resolve_signal_target(
    state: &DaemonState,
    req: &SignalRequest,
) -> Result<Uuid, Rejection> {
    if let Some(id) = req.session {
        return Ok(id);
    }
    if let Some(window) = &req.window {
        return state
            .store
            .find_by_window_target(window)
            .map(|s| s.id)
            .ok_or_else(|| {
                reject(
                    StatusCode::NOT_FOUND,
                    "NO_SESSION_FOR_WINDOW",
                    format!("no session bound to window {}", window),
                )
            });
    }
    Err(reject(
        StatusCode::BAD_REQUEST,
        "MISSING_TARGET",
        "need 'session' or 'window'",
    ))
}

async fn request_suspend(
    State(state): State<Arc<DaemonState>>,
    Json(req): Json<SignalRequest>,
) -> Result<Json<Value>, Rejection> {
    let id = resolve_signal_target(&state, &req)?;
    let delivered = state.control.request_suspend(id);
    Ok(Json(json!({"session": id, "delivered": delivered})))
}

async fn request_self_drop(
    State(state): State<Arc<DaemonState>>,
    Json(req): Json<SignalRequest>,
) -> Result<Json<Value>, Rejection> {
    let id = resolve_signal_target(&state, &req)?;
    let delivered = state.control.request_self_drop(id);
    Ok(Json(json!({"session": id, "delivered": delivered})))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SpawnRequest {
    pub profile: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub ephemeral: bool,
}

async fn spawn_session(
    State(state): State<Arc<DaemonState>>,
    Json(req): Json<SpawnRequest>,
) -> Result<Json<Session>, Rejection> {
    let registry = state.load_profiles().map_err(|e| {
        reject(
            StatusCode::INTERNAL_SERVER_ERROR,
            "PROFILE_LOAD_FAILED",
            format!("{:#}", e),
        )
    })?;
    let profile = registry.get(&req.profile).ok_or_else(|| {
        reject(
            StatusCode::BAD_REQUEST,
            "UNKNOWN_PROFILE",
            format!("no profile named '{}'", req.profile),
        )
    })?;
    let session = runner::spawn(&state, profile, &req.prompt, req.ephemeral)
        .await
        .map_err(|e| {
            error!(error = %format!("{:#}", e), profile = %req.profile, "spawn failed");
            reject(
                StatusCode::INTERNAL_SERVER_ERROR,
                "SPAWN_FAILED",
                format!("{:#}", e),
            )
        })?;
    info!(session = %session.id, profile = %session.profile, "session spawned");
    Ok(Json(session))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResumeRequest {
    pub session: Uuid,
}

async fn resume_session(
    State(state): State<Arc<DaemonState>>,
    Json(req): Json<ResumeRequest>,
) -> Result<Json<Session>, Rejection> {
    let session = runner::resume(&state, req.session).await.map_err(|e| {
        reject(
            StatusCode::INTERNAL_SERVER_ERROR,
            "RESUME_FAILED",
            format!("{:#}", e),
        )
    })?;
    info!(session = %session.id, "session resumed");
    Ok(Json(session))
}

async fn session_ended(
    State(state): State<Arc<DaemonState>>,
    Json(req): Json<SessionQuery>,
) -> StatusCode {
    state.control.notify_done(req.session);
    StatusCode::NO_CONTENT
}

async fn get_log(State(state): State<Arc<DaemonState>>) -> Json<Value> {
    Json(json!({
        "traces": state.traces(),
        "transitions": state.transitions(),
    }))
}

async fn post_shutdown(State(state): State<Arc<DaemonState>>) -> StatusCode {
    tokio::spawn(super::shutdown(Arc::clone(&state)));
    StatusCode::ACCEPTED
}
