//! Background knowledge ingestion
//!
//! When a session completes, the daemon distils it into knowledge-base
//! statements by asking a local sub-LLM. The call is bounded at 60 s;
//! failures become knowledge-base issues instead of taking the core down.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::KnowledgeBase;
use crate::session::Session;
use crate::utils::command;

/// Bound on the sub-LLM call.
pub const INGEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Distil one finished session into statements. Returns how many were
/// stored.
pub async fn ingest_session(kb: Arc<dyn KnowledgeBase>, session: &Session) -> Result<usize> {
    let prompt = format!(
        "A coding agent session just finished.\n\
Profile: {}\nInitial prompt: {}\n\n\
Write up to three short, durable observations about this project that \
would help a future session, one per line. Write nothing else. If there \
is nothing durable to note, write nothing.",
        session.profile, session.preview
    );

    let output = command::run_with_timeout(
        "claude",
        &["-p", &prompt, "--max-turns", "1"],
        None,
        INGEST_TIMEOUT,
    )
    .await
    .context("knowledge ingestion sub-LLM call")?;

    let source = format!("session {}", session.id);
    let mut stored = 0;
    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        kb.add_statement(line, &source).await?;
        stored += 1;
    }
    debug!(session = %session.id, stored, "knowledge ingestion finished");
    Ok(stored)
}

/// Run ingestion, degrading failures to a knowledge-base issue.
pub async fn ingest_or_report(kb: Arc<dyn KnowledgeBase>, session: &Session) -> usize {
    match ingest_session(kb.clone(), session).await {
        Ok(stored) => stored,
        Err(e) => {
            warn!(session = %session.id, error = %e, "knowledge ingestion failed");
            let _ = kb
                .add_issue(
                    &format!("ingestion failed for session {}", session.id),
                    &format!("{:#}", e),
                )
                .await;
            0
        }
    }
}
