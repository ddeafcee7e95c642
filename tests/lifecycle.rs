//! Session lifecycle scenarios: spawn, self-drop, suspend, resume, and
//! signal coalescing, driven end-to-end against a recording multiplexer.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use vee::config::ProjectConfig;
use vee::daemon::DaemonState;
use vee::kb::MemoryKb;
use vee::profile::BASE_PROMPT;
use vee::session::{runner, SessionStatus};
use vee::tmux::recording::{MuxCall, RecordingMux};

const NORMAL_PROFILE: &str =
    "---\nindicator: \"🦊\"\ndescription: day-to-day coding\npriority: 10\n---\nWork through tasks one at a time.\n";

struct Harness {
    state: Arc<DaemonState>,
    mux: Arc<RecordingMux>,
    _profiles: TempDir,
}

fn harness() -> Harness {
    let profiles = TempDir::new().unwrap();
    fs::write(profiles.path().join("normal.md"), NORMAL_PROFILE).unwrap();

    let mux = Arc::new(RecordingMux::new());
    let mut config = ProjectConfig::default();
    // keep the sub-LLM out of tests
    config.kb_ingest = Some(false);

    let mut state = DaemonState::new(
        7331,
        "default",
        PathBuf::from("/tmp/vee-test-project"),
        config,
        mux.clone(),
        Arc::new(MemoryKb::new()),
        Vec::new(),
    );
    state.installed_profile_dir = profiles.path().to_path_buf();
    state.user_profile_dir = PathBuf::from("/nonexistent");

    Harness {
        state: Arc::new(state),
        mux,
        _profiles: profiles,
    }
}

async fn wait_for_status(
    state: &Arc<DaemonState>,
    id: uuid::Uuid,
    status: SessionStatus,
) -> bool {
    for _ in 0..100 {
        if state.store.get(id).map(|s| s.status) == Some(status) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn spawn_then_self_drop_completes_session() {
    let h = harness();
    let registry = h.state.load_profiles().unwrap();
    let profile = registry.get("normal").unwrap();

    let session = runner::spawn(&h.state, profile, "hello", false).await.unwrap();

    // active with a bound window and a control entry
    assert_eq!(session.status, SessionStatus::Active);
    let window = session.window_target.clone().unwrap();
    assert!(h.state.control.contains(session.id));
    assert_eq!(session.preview, "hello");

    // the composed prompt carries the base prompt and the scripted body
    assert!(session.system_prompt.starts_with(BASE_PROMPT));
    assert!(session.system_prompt.contains("<script>"));
    assert!(session.system_prompt.contains("Work through tasks one at a time."));

    // the agent finishes and calls the self_drop tool
    assert!(h.state.control.request_self_drop(session.id));
    assert!(wait_for_status(&h.state, session.id, SessionStatus::Completed).await);

    let done = h.state.store.get(session.id).unwrap();
    assert!(done.window_target.is_none());
    assert!(!h.state.control.contains(session.id));

    // graceful close ran against the old window: /exit then a kill
    let calls = h.mux.calls();
    assert!(calls.contains(&MuxCall::SendLine {
        window: window.clone(),
        text: "/exit".into()
    }));
    assert!(calls.contains(&MuxCall::KillWindow(window)));
}

#[tokio::test]
async fn suspend_then_resume_reuses_session_id() {
    let h = harness();
    let registry = h.state.load_profiles().unwrap();
    let profile = registry.get("normal").unwrap();

    let session = runner::spawn(&h.state, profile, "long task", false).await.unwrap();
    let first_window = session.window_target.clone().unwrap();

    assert!(h.state.control.request_suspend(session.id));
    assert!(wait_for_status(&h.state, session.id, SessionStatus::Suspended).await);

    // the resume menu sees it, window unbound
    let suspended = h.state.store.suspended();
    assert_eq!(suspended.len(), 1);
    assert_eq!(suspended[0].id, session.id);
    assert!(suspended[0].window_target.is_none());
    assert!(!h.state.control.contains(session.id));

    let resumed = runner::resume(&h.state, session.id).await.unwrap();
    assert_eq!(resumed.id, session.id);
    assert_eq!(resumed.status, SessionStatus::Active);
    let second_window = resumed.window_target.clone().unwrap();
    assert_ne!(first_window, second_window);

    // the re-spawned agent is invoked with --resume <same uuid>
    let resume_command = h
        .mux
        .calls()
        .iter()
        .filter_map(|c| match c {
            MuxCall::NewWindow { command, .. } => Some(command.clone()),
            _ => None,
        })
        .nth(1)
        .unwrap();
    assert!(resume_command.contains(&format!("--resume {}", session.id)));
}

#[tokio::test]
async fn duplicate_suspend_requests_coalesce() {
    let h = harness();
    let registry = h.state.load_profiles().unwrap();
    let profile = registry.get("normal").unwrap();

    let session = runner::spawn(&h.state, profile, "x", false).await.unwrap();

    assert!(h.state.control.request_suspend(session.id));
    assert!(!h.state.control.request_suspend(session.id));

    assert!(wait_for_status(&h.state, session.id, SessionStatus::Suspended).await);
    // exactly one graceful close happened
    let kills = h
        .mux
        .calls()
        .iter()
        .filter(|c| c.verb() == "kill_window")
        .count();
    assert_eq!(kills, 1);
}

#[tokio::test]
async fn process_exit_completes_active_session() {
    let h = harness();
    let registry = h.state.load_profiles().unwrap();
    let profile = registry.get("normal").unwrap();

    let session = runner::spawn(&h.state, profile, "quick", false).await.unwrap();

    // the window command always ends with the _session-ended tail
    let spawn_command = h
        .mux
        .calls()
        .iter()
        .find_map(|c| match c {
            MuxCall::NewWindow { command, .. } => Some(command.clone()),
            _ => None,
        })
        .unwrap();
    assert!(spawn_command.contains("vee _session-ended"));
    assert!(spawn_command.contains(&format!("--session-id {}", session.id)));

    // the tail fires: daemon marks the process done
    assert!(h.state.control.notify_done(session.id));
    assert!(wait_for_status(&h.state, session.id, SessionStatus::Completed).await);
    assert!(!h.state.control.contains(session.id));
}

#[tokio::test]
async fn spawn_with_unconfigured_ephemeral_fails() {
    let h = harness();
    let registry = h.state.load_profiles().unwrap();
    let profile = registry.get("normal").unwrap();

    let result = runner::spawn(&h.state, profile, "x", true).await;
    assert!(result.is_err());
    assert!(h.state.store.active().is_empty());
}
