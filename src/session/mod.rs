//! Session records and the in-memory session store

pub mod control;
pub mod runner;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// Longest preview kept from the initial prompt.
pub const PREVIEW_LIMIT: usize = 80;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Agent running in a bound window.
    Active,
    /// Agent killed, reachable through the resume menu.
    Suspended,
    /// Agent finished (self-drop or process exit).
    Completed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Suspended => write!(f, "suspended"),
            SessionStatus::Completed => write!(f, "completed"),
        }
    }
}

/// Agent permission mode, reported over the hook/tool channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionMode {
    #[default]
    #[serde(rename = "default")]
    Default,
    #[serde(rename = "plan")]
    Plan,
    #[serde(rename = "acceptEdits")]
    AcceptEdits,
}

impl PermissionMode {
    /// Badge text shown in the window indicator; `None` means no badge.
    pub fn badge(&self) -> Option<&'static str> {
        match self {
            PermissionMode::Default => None,
            PermissionMode::Plan => Some("plan"),
            PermissionMode::AcceptEdits => Some("acceptEdits"),
        }
    }
}

impl std::str::FromStr for PermissionMode {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(PermissionMode::Default),
            "plan" => Ok(PermissionMode::Plan),
            "acceptEdits" => Ok(PermissionMode::AcceptEdits),
            other => Err(StoreError::InvalidMode(other.to_string())),
        }
    }
}

/// One agent from spawn to terminal state. Mutated only by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub profile: String,
    pub indicator: String,
    pub started_at: DateTime<Utc>,
    pub preview: String,
    pub status: SessionStatus,
    pub window_target: Option<String>,
    pub working: bool,
    pub has_notification: bool,
    pub permission_mode: PermissionMode,
    pub ephemeral: bool,
    pub system_prompt: String,
}

/// Partial flag update carried by hook POSTs. Unknown JSON fields are
/// ignored so hook pipelines may pass the original payload through.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlagUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<PermissionMode>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("session {0} not found")]
    NotFound(Uuid),
    #[error("invalid permission mode '{0}'")]
    InvalidMode(String),
}

/// Concurrent keyed container owning all `Session` records.
///
/// Readers get defensive clones; every mutation happens under the write
/// lock so indicator pushes observe a consistent record.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new `active` session.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        &self,
        id: Uuid,
        profile: &str,
        indicator: &str,
        preview: &str,
        ephemeral: bool,
        window_target: Option<String>,
        system_prompt: String,
    ) -> Session {
        let session = Session {
            id,
            profile: profile.to_string(),
            indicator: indicator.to_string(),
            started_at: Utc::now(),
            preview: truncate_preview(preview),
            status: SessionStatus::Active,
            window_target,
            working: false,
            has_notification: false,
            permission_mode: PermissionMode::Default,
            ephemeral,
            system_prompt,
        };
        self.sessions
            .write()
            .unwrap()
            .insert(id, session.clone());
        session
    }

    pub fn get(&self, id: Uuid) -> Option<Session> {
        self.sessions.read().unwrap().get(&id).cloned()
    }

    /// Transition a session. Leaving `active` also clears the window
    /// binding: suspended and completed sessions never hold a window.
    pub fn set_status(&self, id: Uuid, status: SessionStatus) -> Result<Session, StoreError> {
        let mut sessions = self.sessions.write().unwrap();
        let session = sessions.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        session.status = status;
        if status != SessionStatus::Active {
            session.window_target = None;
        }
        Ok(session.clone())
    }

    /// Remove a session entirely.
    pub fn remove(&self, id: Uuid) -> Option<Session> {
        self.sessions.write().unwrap().remove(&id)
    }

    pub fn set_window_target(
        &self,
        id: Uuid,
        target: Option<String>,
    ) -> Result<Session, StoreError> {
        let mut sessions = self.sessions.write().unwrap();
        let session = sessions.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        session.window_target = target;
        Ok(session.clone())
    }

    pub fn find_by_window_target(&self, target: &str) -> Option<Session> {
        self.sessions
            .read()
            .unwrap()
            .values()
            .find(|s| s.window_target.as_deref() == Some(target))
            .cloned()
    }

    /// Merge a partial flag update and return the updated record.
    pub fn update_flags(&self, id: Uuid, update: &FlagUpdate) -> Result<Session, StoreError> {
        let mut sessions = self.sessions.write().unwrap();
        let session = sessions.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if let Some(working) = update.working {
            session.working = working;
        }
        if let Some(notification) = update.notification {
            session.has_notification = notification;
        }
        if let Some(mode) = update.permission_mode {
            session.permission_mode = mode;
        }
        Ok(session.clone())
    }

    pub fn active(&self) -> Vec<Session> {
        self.filtered(SessionStatus::Active)
    }

    /// Suspended sessions, oldest first.
    pub fn suspended(&self) -> Vec<Session> {
        let mut sessions = self.filtered(SessionStatus::Suspended);
        sessions.sort_by_key(|s| s.started_at);
        sessions
    }

    /// Completed sessions, oldest first.
    pub fn completed(&self) -> Vec<Session> {
        let mut sessions = self.filtered(SessionStatus::Completed);
        sessions.sort_by_key(|s| s.started_at);
        sessions
    }

    fn filtered(&self, status: SessionStatus) -> Vec<Session> {
        self.sessions
            .read()
            .unwrap()
            .values()
            .filter(|s| s.status == status)
            .cloned()
            .collect()
    }
}

fn truncate_preview(prompt: &str) -> String {
    let line = prompt.lines().next().unwrap_or_default();
    line.chars().take(PREVIEW_LIMIT).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_session() -> (SessionStore, Uuid) {
        let store = SessionStore::new();
        let id = Uuid::new_v4();
        store.create(id, "normal", "🦊", "hello", false, Some("@1".into()), String::new());
        (store, id)
    }

    #[test]
    fn test_create_defaults() {
        let (store, id) = store_with_session();
        let s = store.get(id).unwrap();
        assert_eq!(s.status, SessionStatus::Active);
        assert_eq!(s.window_target.as_deref(), Some("@1"));
        assert!(!s.working);
        assert!(!s.has_notification);
        assert_eq!(s.permission_mode, PermissionMode::Default);
    }

    #[test]
    fn test_preview_truncation_respects_char_boundaries() {
        let store = SessionStore::new();
        let id = Uuid::new_v4();
        let prompt = "é".repeat(200);
        let s = store.create(id, "normal", "x", &prompt, false, None, String::new());
        assert_eq!(s.preview.chars().count(), PREVIEW_LIMIT);
    }

    #[test]
    fn test_preview_keeps_first_line_only() {
        let store = SessionStore::new();
        let id = Uuid::new_v4();
        let s = store.create(id, "normal", "x", "one\ntwo", false, None, String::new());
        assert_eq!(s.preview, "one");
    }

    #[test]
    fn test_leaving_active_clears_window_target() {
        let (store, id) = store_with_session();
        store.set_status(id, SessionStatus::Suspended).unwrap();
        let s = store.get(id).unwrap();
        assert_eq!(s.status, SessionStatus::Suspended);
        assert!(s.window_target.is_none());
    }

    #[test]
    fn test_find_by_window_target() {
        let (store, id) = store_with_session();
        assert_eq!(store.find_by_window_target("@1").unwrap().id, id);
        assert!(store.find_by_window_target("@2").is_none());
    }

    #[test]
    fn test_update_flags_is_partial_and_idempotent() {
        let (store, id) = store_with_session();
        let update = FlagUpdate {
            working: Some(true),
            ..Default::default()
        };
        let first = store.update_flags(id, &update).unwrap();
        let second = store.update_flags(id, &update).unwrap();
        assert!(first.working && second.working);
        assert_eq!(first.has_notification, second.has_notification);

        store
            .update_flags(
                id,
                &FlagUpdate {
                    notification: Some(true),
                    ..Default::default()
                },
            )
            .unwrap();
        let s = store.get(id).unwrap();
        // working untouched by a notification-only update
        assert!(s.working);
        assert!(s.has_notification);
    }

    #[test]
    fn test_update_flags_unknown_session() {
        let store = SessionStore::new();
        let err = store
            .update_flags(Uuid::new_v4(), &FlagUpdate::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_suspended_sorted_by_start_time() {
        let store = SessionStore::new();
        let mut ids = Vec::new();
        for i in 0..3 {
            let id = Uuid::new_v4();
            store.create(id, "normal", "x", &format!("p{}", i), false, None, String::new());
            store.set_status(id, SessionStatus::Suspended).unwrap();
            ids.push(id);
        }
        let listed: Vec<Uuid> = store.suspended().iter().map(|s| s.id).collect();
        assert_eq!(listed, ids);
    }

    #[test]
    fn test_flag_update_ignores_unknown_fields() {
        let update: FlagUpdate =
            serde_json::from_str(r#"{"working":true,"is_interrupt":false}"#).unwrap();
        assert_eq!(update.working, Some(true));
        assert!(update.notification.is_none());
    }

    #[test]
    fn test_permission_mode_serde_names() {
        let update: FlagUpdate =
            serde_json::from_str(r#"{"permission_mode":"acceptEdits"}"#).unwrap();
        assert_eq!(update.permission_mode, Some(PermissionMode::AcceptEdits));
        assert_eq!(PermissionMode::Plan.badge(), Some("plan"));
        assert_eq!(PermissionMode::Default.badge(), None);
    }
}
