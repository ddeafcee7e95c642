//! SSE transport for the agent tool bus
//!
//! An agent connects with `GET /sse?session=<uuid>`, which registers a
//! fresh per-session tool server and opens the event stream. Inbound
//! JSON-RPC travels over `POST /sse?session=<uuid>`; responses are pushed
//! down the stream. A keepalive comment goes out every 30 s so the MCP
//! client does not time out on idle, serialized with real event writes by
//! the SSE writer.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};
use uuid::Uuid;

use super::tools::ToolServer;
use super::{DaemonState, SseConn};
use crate::mcp;

pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
const CHANNEL_DEPTH: usize = 32;

#[derive(Debug, Deserialize)]
pub struct SseParams {
    pub session: Uuid,
}

/// `GET /sse?session=` — open the event stream for an agent.
pub async fn sse_get(
    State(state): State<Arc<DaemonState>>,
    Query(params): Query<SseParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    let session = state
        .store
        .get(params.session)
        .ok_or(StatusCode::NOT_FOUND)?;

    // tool exposure follows the profile at connect time
    let kb_tools = state
        .load_profiles()
        .ok()
        .and_then(|r| r.get(&session.profile).map(|p| p.kb_tools))
        .unwrap_or(true);

    let (tx, rx) = tokio::sync::mpsc::channel(CHANNEL_DEPTH);
    state.sse.insert(params.session, SseConn { tx, kb_tools });
    debug!(session = %params.session, kb_tools, "sse connected");

    // MCP SSE handshake: tell the client where to POST
    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("/sse?session={}", params.session));
    let stream = tokio_stream::once(Ok::<_, Infallible>(endpoint))
        .chain(ReceiverStream::new(rx).map(Ok::<_, Infallible>));

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEPALIVE_INTERVAL)
            .text("keepalive"),
    ))
}

/// `POST /sse?session=` — inbound JSON-RPC from the agent.
pub async fn sse_post(
    State(state): State<Arc<DaemonState>>,
    Query(params): Query<SseParams>,
    Json(message): Json<mcp::Message>,
) -> StatusCode {
    let Some(conn) = state.sse.get(&params.session) else {
        return StatusCode::NOT_FOUND;
    };
    let kb_tools = conn.kb_tools;
    let tx = conn.tx.clone();
    drop(conn);

    match message {
        mcp::Message::Request(request) => {
            let response = dispatch(&state, params.session, kb_tools, request).await;
            let data = match serde_json::to_string(&response) {
                Ok(data) => data,
                Err(e) => {
                    warn!(error = %e, "serializing rpc response");
                    return StatusCode::INTERNAL_SERVER_ERROR;
                }
            };
            let event = Event::default().event("message").data(data);
            if tx.send(event).await.is_err() {
                // stream gone: the agent disconnected; it reconnects on
                // its own, the session stays active
                state.sse.remove(&params.session);
                return StatusCode::GONE;
            }
            StatusCode::ACCEPTED
        }
        mcp::Message::Notification(note) => {
            debug!(method = %note.method, "rpc notification");
            StatusCode::ACCEPTED
        }
        mcp::Message::Response(_) => StatusCode::ACCEPTED,
    }
}

async fn dispatch(
    state: &Arc<DaemonState>,
    session: Uuid,
    kb_tools: bool,
    request: mcp::Request,
) -> mcp::Response {
    let server = ToolServer::new(session, kb_tools);
    match request.method.as_str() {
        "initialize" => mcp::Response::success(
            request.id,
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {"tools": {}},
                "serverInfo": {
                    "name": "vee-daemon",
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }),
        ),
        "ping" => mcp::Response::success(request.id, json!({})),
        "tools/list" => {
            mcp::Response::success(request.id, json!({"tools": server.definitions()}))
        }
        "tools/call" => {
            let params = request.params.unwrap_or(Value::Null);
            let Some(name) = params.get("name").and_then(Value::as_str) else {
                return mcp::Response::failure(
                    request.id,
                    mcp::RpcError::invalid_params("missing tool name"),
                );
            };
            let empty = json!({});
            let arguments = params.get("arguments").unwrap_or(&empty);
            let output = server.call(state, name, arguments).await;
            mcp::Response::success(request.id, output.into_result_value())
        }
        other => mcp::Response::failure(request.id, mcp::RpcError::method_not_found(other)),
    }
}
