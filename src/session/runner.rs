//! Session runner
//!
//! Turns a profile + prompt into a running agent: composes the system
//! prompt, writes the per-session MCP and hook files, builds the agent
//! command (local or containerised), opens the multiplexer window, and
//! parks a lifecycle watcher on the session's signal channels.

use anyhow::{bail, Context, Result};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::control::SessionSignals;
use super::{Session, SessionStatus};
use crate::daemon::DaemonState;
use crate::ephemeral::{self, EphemeralSpec};
use crate::profile::Profile;
use crate::utils::command::shell_join;
use crate::utils::paths;

/// Spawn a new session for a profile.
pub async fn spawn(
    state: &Arc<DaemonState>,
    profile: &Profile,
    prompt: &str,
    ephemeral: bool,
) -> Result<Session> {
    if ephemeral && state.config.ephemeral.is_none() {
        bail!("ephemeral requested but the project has no [ephemeral] config");
    }

    let id = Uuid::new_v4();
    let initial_prompt = profile.resolve_initial_prompt(prompt);
    let composed = compose_system_prompt(state, profile, ephemeral).await;
    let (composed, passthrough) = merge_append_system_prompt(&state.passthrough, composed);

    let session_dir = paths::session_dir(id);
    std::fs::create_dir_all(&session_dir)
        .with_context(|| format!("creating session dir {}", session_dir.display()))?;
    write_transient_files(state, id, &session_dir, ephemeral)?;

    let mut args = Vec::new();
    if !initial_prompt.is_empty() {
        args.push(initial_prompt.clone());
    }
    args.extend(agent_flags(state, id, &session_dir, &composed, ephemeral, false));
    args.extend(passthrough);

    let command = build_window_command(state, id, &session_dir, ephemeral, &args).await?;

    state.store.create(
        id,
        &profile.name,
        &profile.indicator,
        &initial_prompt,
        ephemeral,
        None,
        composed,
    );
    let signals = state.control.register(id);

    let window = open_window(state, id, &profile.name, &command).await?;
    let session = state
        .store
        .set_window_target(id, Some(window))
        .context("binding window")?;
    state.sync_indicators(id).await;

    tokio::spawn(watch(Arc::clone(state), id, signals));
    Ok(session)
}

/// Re-spawn a suspended session in a new window, reusing its uuid so the
/// agent picks its history back up via `--resume`.
pub async fn resume(state: &Arc<DaemonState>, id: Uuid) -> Result<Session> {
    let session = state
        .store
        .get(id)
        .with_context(|| format!("no session {}", id))?;
    if session.status != SessionStatus::Suspended {
        bail!("session {} is {}, not suspended", id, session.status);
    }

    let session_dir = paths::session_dir(id);
    std::fs::create_dir_all(&session_dir)
        .with_context(|| format!("creating session dir {}", session_dir.display()))?;
    write_transient_files(state, id, &session_dir, session.ephemeral)?;

    let (composed, passthrough) =
        merge_append_system_prompt(&state.passthrough, session.system_prompt.clone());
    let mut args = agent_flags(state, id, &session_dir, &composed, session.ephemeral, true);
    args.extend(passthrough);

    let command =
        build_window_command(state, id, &session_dir, session.ephemeral, &args).await?;

    state.store.set_status(id, SessionStatus::Active)?;
    let signals = state.control.register(id);
    let window = open_window(state, id, &session.profile, &command).await?;
    let session = state
        .store
        .set_window_target(id, Some(window))
        .context("binding window")?;
    state.sync_indicators(id).await;

    tokio::spawn(watch(Arc::clone(state), id, signals));
    Ok(session)
}

async fn open_window(
    state: &Arc<DaemonState>,
    id: Uuid,
    name: &str,
    command: &str,
) -> Result<String> {
    match state.mux.new_window(name, command).await {
        Ok(window) => Ok(window),
        Err(e) => {
            // a session that never got a window is dropped entirely
            state.store.remove(id);
            state.control.clear(id);
            let _ = std::fs::remove_dir_all(paths::session_dir(id));
            Err(e).context("opening multiplexer window")
        }
    }
}

/// The flags every agent invocation carries (§6.1 contract).
fn agent_flags(
    state: &Arc<DaemonState>,
    id: Uuid,
    session_dir: &Path,
    composed: &str,
    ephemeral: bool,
    resume: bool,
) -> Vec<String> {
    let mut args = vec![
        "--append-system-prompt".to_string(),
        composed.to_string(),
    ];
    if resume {
        args.push("--resume".to_string());
    } else {
        args.push("--session-id".to_string());
    }
    args.push(id.to_string());
    args.push("--mcp-config".to_string());
    args.push(session_dir.join("mcp.json").display().to_string());
    args.push("--settings".to_string());
    args.push(session_dir.join("settings.json").display().to_string());
    args.push("--plugin-dir".to_string());
    args.push(paths::plugin_dir().display().to_string());
    for dir in &state.config.plugin_dirs {
        args.push("--plugin-dir".to_string());
        args.push(dir.clone());
    }
    if ephemeral {
        args.push("--dangerously-skip-permissions".to_string());
    }
    args
}

/// Build the shell command the window runs. Both paths end with the
/// `_session-ended` tail so the daemon hears about process exit.
async fn build_window_command(
    state: &Arc<DaemonState>,
    id: Uuid,
    session_dir: &Path,
    ephemeral: bool,
    args: &[String],
) -> Result<String> {
    if ephemeral {
        let config = state
            .config
            .ephemeral
            .as_ref()
            .context("ephemeral config vanished")?;
        let identity = ephemeral::detect_git_identity(&state.project_root).await;
        let gitconfig = if identity.is_empty() {
            None
        } else {
            let wrapper = if identity.gpg_sign {
                let wrapper_path = session_dir.join("gpg-wrapper.sh");
                write_executable(&wrapper_path, &ephemeral::gpg_wrapper_script(state.port))?;
                Some(wrapper_path)
            } else {
                None
            };
            let gitconfig_path = session_dir.join("gitconfig");
            std::fs::write(
                &gitconfig_path,
                ephemeral::render_gitconfig(&identity, wrapper.as_deref()),
            )?;
            Some(gitconfig_path)
        };
        let spec = EphemeralSpec {
            config,
            project_root: &state.project_root,
            session_id: id,
            session_dir,
            install_dir: &state.install_dir,
            port: state.port,
            socket_name: &state.socket_name,
            gitconfig: gitconfig.as_deref(),
            agent_args: args,
        };
        Ok(spec.build())
    } else {
        let mut command = String::from("claude ");
        command.push_str(&shell_join(args.iter().map(String::as_str)));
        command.push_str(" ; ");
        command.push_str(&ephemeral::session_ended_tail(
            state.port,
            &state.socket_name,
            id,
        ));
        Ok(command)
    }
}

fn write_executable(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

/// Write the per-session MCP config and hook settings. Inside a sandbox
/// the daemon is reached through `host.docker.internal` and the hook
/// pipeline uses `jq | curl`; locally both use the loopback address and
/// the orchestrator's own binary.
fn write_transient_files(
    state: &Arc<DaemonState>,
    id: Uuid,
    session_dir: &Path,
    sandbox: bool,
) -> Result<()> {
    let host = if sandbox {
        "host.docker.internal"
    } else {
        "127.0.0.1"
    };
    let mcp = json!({
        "mcpServers": {
            "vee-daemon": {
                "type": "sse",
                "url": format!("http://{}:{}/sse?session={}", host, state.port, id),
            }
        }
    });
    std::fs::write(
        session_dir.join("mcp.json"),
        serde_json::to_string_pretty(&mcp)?,
    )?;

    let settings = json!({
        "hooks": {
            "UserPromptSubmit": hook_entry(state.port, id, host, sandbox, Some(true), Some(false)),
            "Stop": hook_entry(state.port, id, host, sandbox, Some(false), None),
            "PostToolUseFailure": hook_entry(state.port, id, host, sandbox, Some(false), None),
            "Notification": hook_entry(state.port, id, host, sandbox, None, Some(true)),
        }
    });
    std::fs::write(
        session_dir.join("settings.json"),
        serde_json::to_string_pretty(&settings)?,
    )?;
    debug!(session = %id, dir = %session_dir.display(), "transient files written");
    Ok(())
}

fn hook_entry(
    port: u16,
    id: Uuid,
    host: &str,
    sandbox: bool,
    working: Option<bool>,
    notification: Option<bool>,
) -> serde_json::Value {
    let command = if sandbox {
        let mut fields = Vec::new();
        if let Some(w) = working {
            fields.push(format!("\"working\":{}", w));
        }
        if let Some(n) = notification {
            fields.push(format!("\"notification\":{}", n));
        }
        format!(
            "jq -c '. + {{{fields}}}' | curl -sf -X POST -H 'Content-Type: application/json' \
--data-binary @- '{url}'",
            fields = fields.join(","),
            url = format!("http://{}:{}/api/hook/window-state?session={}", host, port, id),
        )
    } else {
        let mut command = format!("vee _hook --port {} --session {}", port, id);
        if let Some(w) = working {
            command.push_str(&format!(" --working {}", w));
        }
        if let Some(n) = notification {
            command.push_str(&format!(" --notification {}", n));
        }
        command
    };
    json!([{"hooks": [{"type": "command", "command": command}]}])
}

/// Compose the full system prompt: profile prompt, identity rule,
/// platform rule, project configuration, and — for ephemeral sessions
/// with a compose stack — the compose file so the agent knows what is
/// running next to it.
async fn compose_system_prompt(
    state: &Arc<DaemonState>,
    profile: &Profile,
    ephemeral: bool,
) -> String {
    let mut prompt = profile.prompt.clone();

    let identity = ephemeral::detect_git_identity(&state.project_root).await;
    if !identity.is_empty() {
        let who = match (&identity.name, &identity.email) {
            (Some(name), Some(email)) => format!("{} <{}>", name, email),
            (Some(name), None) => name.clone(),
            (None, Some(email)) => email.clone(),
            (None, None) => unreachable!(),
        };
        prompt.push_str(&format!(
            "\n\n<rule name=\"Identity\">Commits you create are authored by {}. \
Do not change git identity settings.</rule>",
            who
        ));
    }

    prompt.push_str(&format!(
        "\n\n<rule name=\"Platform\">You are in a {} window managed by vee; \
the window may be suspended and resumed, and your session survives that.</rule>",
        std::env::consts::OS
    ));

    if let Some(eph) = &state.config.ephemeral {
        if ephemeral {
            if let Some(compose) = &eph.compose {
                let compose_path = state.project_root.join(compose);
                match std::fs::read_to_string(&compose_path) {
                    Ok(contents) => {
                        prompt.push_str(&format!(
                            "\n\n<compose>\nServices running alongside this \
session:\n{}\n</compose>",
                            contents
                        ));
                    }
                    Err(e) => {
                        warn!(path = %compose_path.display(), error = %e, "compose file unreadable");
                    }
                }
            }
            prompt.push_str(
                "\n\n<rule name=\"Sandbox\">You are inside a disposable container. \
Changes outside the mounted project tree do not survive the session.</rule>",
            );
        }
    }
    prompt
}

/// Splice user-supplied `--append-system-prompt` values into the composed
/// prompt (concatenation, never replacement) and return the remaining
/// passthrough flags.
fn merge_append_system_prompt(
    passthrough: &[String],
    mut composed: String,
) -> (String, Vec<String>) {
    let mut rest = Vec::new();
    let mut iter = passthrough.iter();
    while let Some(arg) = iter.next() {
        if arg == "--append-system-prompt" {
            if let Some(value) = iter.next() {
                composed.push_str("\n\n");
                composed.push_str(value);
            }
        } else if let Some(value) = arg.strip_prefix("--append-system-prompt=") {
            composed.push_str("\n\n");
            composed.push_str(value);
        } else {
            rest.push(arg.clone());
        }
    }
    (composed, rest)
}

enum Outcome {
    Suspend,
    SelfDrop,
    Done,
    Orphaned,
}

/// Lifecycle watcher: one per active session, parked on the signal
/// channels until the session leaves `active`.
async fn watch(state: Arc<DaemonState>, id: Uuid, mut signals: SessionSignals) {
    let outcome = tokio::select! {
        r = signals.suspend.recv() => r.map(|_| Outcome::Suspend).unwrap_or(Outcome::Orphaned),
        r = signals.self_drop.recv() => r.map(|_| Outcome::SelfDrop).unwrap_or(Outcome::Orphaned),
        r = signals.done.recv() => r.map(|_| Outcome::Done).unwrap_or(Outcome::Orphaned),
    };

    let window = state.store.get(id).and_then(|s| s.window_target);
    match outcome {
        Outcome::Suspend => {
            if let Some(window) = &window {
                if let Err(e) = state.mux.graceful_close(window).await {
                    warn!(session = %id, error = %e, "graceful close failed");
                }
            }
            if let Err(e) = state.store.set_status(id, SessionStatus::Suspended) {
                warn!(session = %id, error = %e, "suspend transition failed");
            }
            state.control.clear(id);
            info!(session = %id, "session suspended");
        }
        Outcome::SelfDrop => {
            if let Some(window) = &window {
                if let Err(e) = state.mux.graceful_close(window).await {
                    warn!(session = %id, error = %e, "graceful close failed");
                }
            }
            finish(&state, id).await;
            info!(session = %id, "session completed (self drop)");
        }
        Outcome::Done => {
            if let Some(window) = &window {
                // the process already exited; the window is closing or
                // closed on its own
                let _ = state.mux.kill_window(window).await;
            }
            finish(&state, id).await;
            info!(session = %id, "session completed (process exit)");
        }
        Outcome::Orphaned => {
            debug!(session = %id, "watcher orphaned; channels re-registered");
        }
    }
}

async fn finish(state: &Arc<DaemonState>, id: Uuid) {
    let completed = state.store.set_status(id, SessionStatus::Completed);
    state.control.clear(id);
    let _ = std::fs::remove_dir_all(paths::session_dir(id));
    if let Ok(session) = completed {
        state.spawn_ingest(session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_append_system_prompt_concatenates() {
        let passthrough = vec![
            "--model".to_string(),
            "opus".to_string(),
            "--append-system-prompt".to_string(),
            "extra rules".to_string(),
        ];
        let (composed, rest) =
            merge_append_system_prompt(&passthrough, "base prompt".to_string());
        assert_eq!(composed, "base prompt\n\nextra rules");
        assert_eq!(rest, vec!["--model", "opus"]);
    }

    #[test]
    fn test_merge_append_system_prompt_equals_form() {
        let passthrough = vec!["--append-system-prompt=more".to_string()];
        let (composed, rest) = merge_append_system_prompt(&passthrough, "base".to_string());
        assert_eq!(composed, "base\n\nmore");
        assert!(rest.is_empty());
    }

    #[test]
    fn test_hook_entry_sandbox_uses_jq_curl() {
        let id = Uuid::new_v4();
        let entry = hook_entry(7331, id, "host.docker.internal", true, Some(true), Some(false));
        let command = entry[0]["hooks"][0]["command"].as_str().unwrap();
        assert!(command.starts_with("jq -c"));
        assert!(command.contains("\"working\":true"));
        assert!(command.contains("\"notification\":false"));
        assert!(command.contains(&format!(
            "http://host.docker.internal:7331/api/hook/window-state?session={}",
            id
        )));
    }

    #[test]
    fn test_hook_entry_host_uses_helper_binary() {
        let id = Uuid::new_v4();
        let entry = hook_entry(7331, id, "127.0.0.1", false, None, Some(true));
        let command = entry[0]["hooks"][0]["command"].as_str().unwrap();
        assert!(command.starts_with("vee _hook"));
        assert!(command.contains("--notification true"));
        assert!(!command.contains("--working"));
    }
}
