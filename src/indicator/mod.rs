//! Status indicator engine
//!
//! Translates session state into per-window user options the multiplexer
//! interpolates into its status bar. Pushes are idempotent; the daemon
//! calls `sync` after every store mutation for the session, under the
//! ordering guarantee that the store update precedes the push.

use crate::session::Session;
use crate::tmux::{Multiplexer, MuxError};

pub const OPT_EPHEMERAL: &str = "@vee-ephemeral";
pub const OPT_KB_INGEST: &str = "@vee-kb-ingest";
pub const OPT_WORKING: &str = "@vee-working";
pub const OPT_NOTIF: &str = "@vee-notif";
pub const OPT_PERM: &str = "@vee-perm";

/// Push the full option set for a session's window. Sessions without a
/// window (suspended, completed) have nothing to update.
pub async fn sync(mux: &dyn Multiplexer, session: &Session) -> Result<(), MuxError> {
    let Some(window) = session.window_target.as_deref() else {
        return Ok(());
    };

    if session.ephemeral {
        mux.set_window_option(window, OPT_EPHEMERAL, "1").await?;
    } else {
        mux.unset_window_option(window, OPT_EPHEMERAL).await?;
    }

    // working and notification are mutually exclusive in display;
    // working wins
    if session.working {
        mux.set_window_option(window, OPT_WORKING, "1").await?;
        mux.unset_window_option(window, OPT_NOTIF).await?;
    } else if session.has_notification {
        mux.set_window_option(window, OPT_NOTIF, "1").await?;
        mux.unset_window_option(window, OPT_WORKING).await?;
    } else {
        mux.unset_window_option(window, OPT_WORKING).await?;
        mux.unset_window_option(window, OPT_NOTIF).await?;
    }

    match session.permission_mode.badge() {
        Some(badge) => mux.set_window_option(window, OPT_PERM, badge).await?,
        None => mux.unset_window_option(window, OPT_PERM).await?,
    }

    Ok(())
}

/// Toggle the knowledge-ingest badge on a window, independent of the
/// session flags (the ingest task outlives some of them).
pub async fn set_kb_ingest(
    mux: &dyn Multiplexer,
    window: &str,
    ingesting: bool,
) -> Result<(), MuxError> {
    if ingesting {
        mux.set_window_option(window, OPT_KB_INGEST, "1").await
    } else {
        mux.unset_window_option(window, OPT_KB_INGEST).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{PermissionMode, SessionStore};
    use crate::tmux::recording::{MuxCall, RecordingMux};
    use uuid::Uuid;

    fn session(store: &SessionStore) -> crate::session::Session {
        let id = Uuid::new_v4();
        store.create(id, "normal", "🦊", "hi", false, Some("@1".into()), String::new())
    }

    fn working_notif_calls(mux: &RecordingMux) -> Vec<(String, bool)> {
        mux.option_calls("@1")
            .into_iter()
            .filter_map(|c| match c {
                MuxCall::SetOption { key, .. }
                    if key == OPT_WORKING || key == OPT_NOTIF =>
                {
                    Some((key, true))
                }
                MuxCall::UnsetOption { key, .. }
                    if key == OPT_WORKING || key == OPT_NOTIF =>
                {
                    Some((key, false))
                }
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_working_wins_over_notification() {
        let store = SessionStore::new();
        let mut s = session(&store);
        s.working = true;
        s.has_notification = true;

        let mux = RecordingMux::new();
        sync(&mux, &s).await.unwrap();
        let calls = working_notif_calls(&mux);
        assert!(calls.contains(&(OPT_WORKING.to_string(), true)));
        assert!(calls.contains(&(OPT_NOTIF.to_string(), false)));
    }

    #[tokio::test]
    async fn test_hook_transition_sequence() {
        let store = SessionStore::new();
        let mut s = session(&store);
        let mux = RecordingMux::new();

        // working:true, notification:false
        s.working = true;
        sync(&mux, &s).await.unwrap();
        assert_eq!(
            working_notif_calls(&mux),
            vec![(OPT_WORKING.to_string(), true), (OPT_NOTIF.to_string(), false)]
        );

        // working:false
        mux.clear_calls();
        s.working = false;
        sync(&mux, &s).await.unwrap();
        assert_eq!(
            working_notif_calls(&mux),
            vec![(OPT_WORKING.to_string(), false), (OPT_NOTIF.to_string(), false)]
        );

        // notification:true
        mux.clear_calls();
        s.has_notification = true;
        sync(&mux, &s).await.unwrap();
        assert_eq!(
            working_notif_calls(&mux),
            vec![(OPT_NOTIF.to_string(), true), (OPT_WORKING.to_string(), false)]
        );
    }

    #[tokio::test]
    async fn test_permission_badge() {
        let store = SessionStore::new();
        let mut s = session(&store);
        let mux = RecordingMux::new();

        s.permission_mode = PermissionMode::Plan;
        sync(&mux, &s).await.unwrap();
        assert!(mux.option_calls("@1").contains(&MuxCall::SetOption {
            window: "@1".into(),
            key: OPT_PERM.into(),
            value: "plan".into(),
        }));

        mux.clear_calls();
        s.permission_mode = PermissionMode::Default;
        sync(&mux, &s).await.unwrap();
        assert!(mux.option_calls("@1").contains(&MuxCall::UnsetOption {
            window: "@1".into(),
            key: OPT_PERM.into(),
        }));
    }

    #[tokio::test]
    async fn test_no_window_no_push() {
        let store = SessionStore::new();
        let mut s = session(&store);
        s.window_target = None;
        let mux = RecordingMux::new();
        sync(&mux, &s).await.unwrap();
        assert!(mux.calls().is_empty());
    }

    #[tokio::test]
    async fn test_sync_idempotent_payload() {
        let store = SessionStore::new();
        let mut s = session(&store);
        s.working = true;
        let mux = RecordingMux::new();
        sync(&mux, &s).await.unwrap();
        let first = mux.calls();
        mux.clear_calls();
        sync(&mux, &s).await.unwrap();
        assert_eq!(first, mux.calls());
    }
}
