//! Tool registry for the SSE bus
//!
//! Tools are the server-side callables an agent invokes over JSON-RPC.
//! Each SSE connection gets a tool server scoped to its session; the
//! knowledge tools are exposed only when the session's profile enables
//! them.

use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use super::DaemonState;
use crate::session::FlagUpdate;

/// Result of one tool invocation, in MCP content shape.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub text: String,
    pub is_error: bool,
}

impl ToolOutput {
    fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    fn err(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }

    pub fn into_result_value(self) -> Value {
        json!({
            "content": [{"type": "text", "text": self.text}],
            "isError": self.is_error,
        })
    }
}

/// Per-connection tool dispatcher.
pub struct ToolServer {
    session_id: Uuid,
    kb_tools: bool,
}

impl ToolServer {
    pub fn new(session_id: Uuid, kb_tools: bool) -> Self {
        Self {
            session_id,
            kb_tools,
        }
    }

    /// Tool definitions advertised over `tools/list`.
    pub fn definitions(&self) -> Vec<Value> {
        let mut tools = vec![
            json!({
                "name": "report_mode_change",
                "description": "Report that the agent switched operating modes (plan, acceptEdits, default).",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "mode": {"type": "string", "enum": ["default", "plan", "acceptEdits"]},
                        "indicator": {"type": "string", "description": "Optional glyph for the new mode"}
                    },
                    "required": ["mode"]
                }
            }),
            json!({
                "name": "request_suspend",
                "description": "Ask the orchestrator to park this session for later resumption.",
                "inputSchema": {"type": "object", "properties": {}}
            }),
            json!({
                "name": "self_drop",
                "description": "Declare the task finished and end this session cleanly.",
                "inputSchema": {"type": "object", "properties": {}}
            }),
        ];
        if self.kb_tools {
            tools.extend([
                json!({
                    "name": "kb_remember",
                    "description": "Store a durable observation in the knowledge base.",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "statement": {"type": "string"},
                            "source": {"type": "string", "description": "Where the observation came from"}
                        },
                        "required": ["statement"]
                    }
                }),
                json!({
                    "name": "kb_query",
                    "description": "Search the knowledge base for relevant observations.",
                    "inputSchema": {
                        "type": "object",
                        "properties": {"q": {"type": "string"}},
                        "required": ["q"]
                    }
                }),
                json!({
                    "name": "kb_touch",
                    "description": "Mark a knowledge base statement as used, refreshing its recency.",
                    "inputSchema": {
                        "type": "object",
                        "properties": {"id": {"type": "string", "description": "Statement id"}},
                        "required": ["id"]
                    }
                }),
            ]);
        }
        tools
    }

    /// Dispatch one `tools/call`.
    pub async fn call(&self, state: &Arc<DaemonState>, name: &str, args: &Value) -> ToolOutput {
        let output = match name {
            "report_mode_change" => self.report_mode_change(state, args).await,
            "request_suspend" => {
                let delivered = state.control.request_suspend(self.session_id);
                if delivered {
                    ToolOutput::ok("suspend requested")
                } else {
                    ToolOutput::ok("suspend already pending")
                }
            }
            "self_drop" => {
                let delivered = state.control.request_self_drop(self.session_id);
                if delivered {
                    ToolOutput::ok("session will end")
                } else {
                    ToolOutput::ok("drop already pending")
                }
            }
            "kb_remember" if self.kb_tools => self.kb_remember(state, args).await,
            "kb_query" if self.kb_tools => self.kb_query(state, args).await,
            "kb_touch" if self.kb_tools => self.kb_touch(state, args).await,
            other => ToolOutput::err(format!("unknown tool: {}", other)),
        };
        state.record_trace(
            self.session_id,
            name,
            !output.is_error,
            output.text.clone(),
        );
        output
    }

    async fn report_mode_change(&self, state: &Arc<DaemonState>, args: &Value) -> ToolOutput {
        let Some(mode) = args.get("mode").and_then(Value::as_str) else {
            return ToolOutput::err("missing 'mode'");
        };
        let indicator = args
            .get("indicator")
            .and_then(Value::as_str)
            .map(str::to_string);
        state.record_transition(self.session_id, mode, indicator);

        let Ok(permission_mode) = mode.parse() else {
            return ToolOutput::err(format!("unknown mode '{}'", mode));
        };
        let update = FlagUpdate {
            permission_mode: Some(permission_mode),
            ..Default::default()
        };
        match state.store.update_flags(self.session_id, &update) {
            Ok(_) => {
                state.sync_indicators(self.session_id).await;
                ToolOutput::ok("mode recorded")
            }
            Err(e) => ToolOutput::err(e.to_string()),
        }
    }

    async fn kb_remember(&self, state: &Arc<DaemonState>, args: &Value) -> ToolOutput {
        let Some(statement) = args.get("statement").and_then(Value::as_str) else {
            return ToolOutput::err("missing 'statement'");
        };
        let session_source = format!("session {}", self.session_id);
        let source = args
            .get("source")
            .and_then(Value::as_str)
            .unwrap_or(&session_source);
        match state.kb.add_statement(statement, source).await {
            Ok(record) => ToolOutput::ok(format!("remembered as {}", record.id)),
            Err(e) => ToolOutput::err(e.to_string()),
        }
    }

    async fn kb_query(&self, state: &Arc<DaemonState>, args: &Value) -> ToolOutput {
        let Some(q) = args.get("q").and_then(Value::as_str) else {
            return ToolOutput::err("missing 'q'");
        };
        match state.kb.query(q, 10).await {
            Ok(hits) if hits.is_empty() => ToolOutput::ok("no matching statements"),
            Ok(hits) => {
                let lines: Vec<String> = hits
                    .iter()
                    .map(|s| format!("{}: {}", s.id, s.statement))
                    .collect();
                ToolOutput::ok(lines.join("\n"))
            }
            Err(e) => ToolOutput::err(e.to_string()),
        }
    }

    async fn kb_touch(&self, state: &Arc<DaemonState>, args: &Value) -> ToolOutput {
        let Some(id) = args
            .get("id")
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
        else {
            return ToolOutput::err("missing or invalid 'id'");
        };
        match state.kb.touch(id).await {
            Ok(()) => ToolOutput::ok("touched"),
            Err(e) => ToolOutput::err(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectConfig;
    use crate::kb::{KnowledgeBase, MemoryKb};
    use crate::session::PermissionMode;
    use crate::tmux::recording::RecordingMux;
    use std::path::PathBuf;

    fn state_with_session() -> (Arc<DaemonState>, Uuid) {
        let state = Arc::new(DaemonState::new(
            7331,
            "default",
            PathBuf::from("/tmp/p"),
            ProjectConfig::default(),
            Arc::new(RecordingMux::new()),
            Arc::new(MemoryKb::new()),
            Vec::new(),
        ));
        let id = Uuid::new_v4();
        state
            .store
            .create(id, "normal", "x", "hi", false, Some("@1".into()), String::new());
        state.control.register(id);
        (state, id)
    }

    #[test]
    fn test_kb_tools_gated_by_profile() {
        let with = ToolServer::new(Uuid::new_v4(), true);
        let without = ToolServer::new(Uuid::new_v4(), false);
        assert_eq!(with.definitions().len(), 6);
        assert_eq!(without.definitions().len(), 3);
    }

    #[tokio::test]
    async fn test_request_suspend_coalesces() {
        let (state, id) = state_with_session();
        let server = ToolServer::new(id, true);
        let first = server.call(&state, "request_suspend", &json!({})).await;
        let second = server.call(&state, "request_suspend", &json!({})).await;
        assert_eq!(first.text, "suspend requested");
        assert_eq!(second.text, "suspend already pending");
    }

    #[tokio::test]
    async fn test_report_mode_change_updates_session() {
        let (state, id) = state_with_session();
        let server = ToolServer::new(id, true);
        let out = server
            .call(&state, "report_mode_change", &json!({"mode": "plan", "indicator": "📋"}))
            .await;
        assert!(!out.is_error);
        assert_eq!(
            state.store.get(id).unwrap().permission_mode,
            PermissionMode::Plan
        );
        assert_eq!(state.transitions().len(), 1);
        assert_eq!(state.transitions()[0].mode, "plan");
    }

    #[tokio::test]
    async fn test_kb_remember_and_query() {
        let (state, id) = state_with_session();
        let server = ToolServer::new(id, true);
        let out = server
            .call(&state, "kb_remember", &json!({"statement": "uses tokio"}))
            .await;
        assert!(!out.is_error);
        let out = server.call(&state, "kb_query", &json!({"q": "tokio"})).await;
        assert!(out.text.contains("uses tokio"));

        // every dispatch leaves a trace
        assert_eq!(state.traces().len(), 2);
    }

    #[tokio::test]
    async fn test_kb_tools_rejected_when_gated_off() {
        let (state, id) = state_with_session();
        let server = ToolServer::new(id, false);
        let out = server
            .call(&state, "kb_remember", &json!({"statement": "x"}))
            .await;
        assert!(out.is_error);
        assert!(state.kb.query("x", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error() {
        let (state, id) = state_with_session();
        let server = ToolServer::new(id, true);
        let out = server.call(&state, "explode", &json!({})).await;
        assert!(out.is_error);
    }
}
