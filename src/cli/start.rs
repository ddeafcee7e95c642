//! Top-level control: boot the daemon, configure the multiplexer, attach.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::ProjectConfig;
use crate::daemon::{self, DaemonState};
use crate::kb;
use crate::tmux::{self, Multiplexer, TmuxClient};
use crate::utils::paths;

const SESSION_NAME: &str = "vee";

async fn build_state(
    port: Option<u16>,
    socket: Option<String>,
    passthrough: Vec<String>,
) -> Result<(Arc<DaemonState>, tokio::net::TcpListener, Arc<TmuxClient>)> {
    if !TmuxClient::available().await {
        bail!("tmux is not installed; vee cannot run without its multiplexer");
    }

    let project_root = std::env::current_dir().context("resolving project root")?;
    let config = ProjectConfig::load(&project_root)?;

    let socket_name = socket
        .or_else(|| config.socket.clone())
        .unwrap_or_else(|| "default".to_string());
    if !tmux::valid_socket_name(&socket_name) {
        bail!("invalid socket name '{}'", socket_name);
    }

    let (listener, port) = daemon::bind(port.or(config.daemon_port)).await?;
    let kb = kb::open(&paths::kb_path())?;
    let mux = Arc::new(TmuxClient::new(
        paths::socket_path(&socket_name),
        SESSION_NAME,
    ));

    let state = Arc::new(DaemonState::new(
        port,
        socket_name,
        project_root,
        config,
        mux.clone(),
        kb,
        passthrough,
    ));

    // refuse to proceed when no profiles load at all
    let registry = state
        .load_profiles()
        .context("loading profile directories")?;
    if registry.is_empty() {
        bail!(
            "no profiles found in {} or {}",
            state.installed_profile_dir.display(),
            state.user_profile_dir.display()
        );
    }
    info!(profiles = registry.len(), port, "orchestrator ready");

    Ok((state, listener, mux))
}

/// `vee start`: daemon task + multiplexer session + foreground attach.
pub async fn run(
    port: Option<u16>,
    socket: Option<String>,
    passthrough: Vec<String>,
) -> Result<()> {
    let (state, listener, mux) = build_state(port, socket, passthrough).await?;
    let port = state.port;
    let socket_name = state.socket_name.clone();

    let daemon_task = tokio::spawn(daemon::serve(Arc::clone(&state), listener));

    if !mux.session_exists().await {
        let dashboard = format!("vee _log-viewer --port {} --follow", port);
        mux.create_session("dashboard", &dashboard)
            .await
            .context("creating multiplexer session")?;
    }
    mux.configure(port, &socket_name)
        .await
        .context("configuring multiplexer")?;

    // blocks until the user detaches or the session dies
    if let Err(e) = mux.attach().await {
        warn!(error = %e, "attach ended with error");
    }

    if mux.session_exists().await {
        // plain detach: agents keep running, the daemon stays up until
        // the _shutdown verb takes the session down
        info!("detached; daemon keeps serving until shutdown");
    } else {
        daemon::shutdown(Arc::clone(&state)).await;
    }
    match daemon_task.await {
        Ok(result) => result,
        Err(e) => bail!("daemon task panicked: {}", e),
    }
}

/// `vee daemon`: the HTTP bus alone, until interrupted.
pub async fn run_daemon_only(port: Option<u16>, socket: Option<String>) -> Result<()> {
    let (state, listener, _mux) = build_state(port, socket, Vec::new()).await?;

    let token = state.shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    daemon::serve(state, listener).await
}
