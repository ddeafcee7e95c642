//! Well-known filesystem locations

use std::path::PathBuf;
use uuid::Uuid;

/// Runtime directory holding the multiplexer socket and per-session files.
///
/// `$XDG_RUNTIME_DIR/vee`, falling back to a per-user directory under the
/// system temp dir when the variable is unset (e.g. inside containers).
pub fn runtime_dir() -> PathBuf {
    match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(dir) => PathBuf::from(dir).join("vee"),
        None => std::env::temp_dir().join("vee"),
    }
}

/// Multiplexer socket path for a named orchestrator instance.
pub fn socket_path(socket_name: &str) -> PathBuf {
    runtime_dir().join(socket_name)
}

/// Per-session directory for transient files (MCP config, hook settings,
/// gitconfig, gpg wrapper).
pub fn session_dir(id: Uuid) -> PathBuf {
    runtime_dir().join("sessions").join(id.to_string())
}

/// Persistent state directory (`~/.local/state/vee`).
pub fn state_dir() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join("vee")
}

/// Default knowledge base location.
pub fn kb_path() -> PathBuf {
    state_dir().join("kb.db")
}

/// User configuration directory (`~/.config/vee`).
pub fn user_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("vee")
}

/// User profile directory (`~/.config/vee/profiles`).
pub fn user_profile_dir() -> PathBuf {
    user_config_dir().join("profiles")
}

/// Installation tree. `$VEE_PATH` when set, otherwise the directory the
/// running binary lives in.
pub fn install_dir() -> PathBuf {
    if let Some(p) = std::env::var_os("VEE_PATH") {
        return PathBuf::from(p);
    }
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Installed profile directory.
pub fn installed_profile_dir() -> PathBuf {
    install_dir().join("profiles")
}

/// Shipped agent plugin tree, always passed to the agent via `--plugin-dir`.
pub fn plugin_dir() -> PathBuf {
    install_dir().join("plugins")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_dir_is_under_runtime_dir() {
        let id = Uuid::new_v4();
        let dir = session_dir(id);
        assert!(dir.starts_with(runtime_dir()));
        assert!(dir.ends_with(id.to_string()));
    }

    #[test]
    fn test_socket_path_uses_name() {
        assert!(socket_path("default").ends_with("vee/default"));
    }
}
