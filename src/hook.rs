//! `_hook` — the host-side hook helper
//!
//! The agent's hook settings invoke this with the hook's JSON on stdin.
//! It merges the flag object in and POSTs the result to the daemon.
//! Delivery failures are reported but never propagate: a hook that fails
//! hard would wedge the agent.

use anyhow::Result;
use serde_json::{json, Value};
use std::io::Read;
use tracing::warn;
use uuid::Uuid;

pub async fn run(
    port: u16,
    session: Uuid,
    working: Option<bool>,
    notification: Option<bool>,
) -> Result<()> {
    let mut stdin = String::new();
    let _ = std::io::stdin().read_to_string(&mut stdin);
    let mut payload: Value = serde_json::from_str(&stdin).unwrap_or_else(|_| json!({}));

    if let Some(obj) = payload.as_object_mut() {
        if let Some(working) = working {
            obj.insert("working".to_string(), json!(working));
        }
        if let Some(notification) = notification {
            obj.insert("notification".to_string(), json!(notification));
        }
    }

    let url = format!(
        "http://127.0.0.1:{}/api/hook/window-state?session={}",
        port, session
    );
    let result = reqwest::Client::new()
        .post(&url)
        .json(&payload)
        .send()
        .await
        .and_then(|r| r.error_for_status());
    if let Err(e) = result {
        warn!(session = %session, error = %e, "hook delivery failed");
    }
    Ok(())
}
