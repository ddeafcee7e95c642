//! CLI surface
//!
//! Two public subcommands (`start`, `daemon`) plus the internal
//! underscore verbs the multiplexer key bindings spawn. Exit codes:
//! 0 normal, 1 usage, 2 runtime error.

mod start;

use anyhow::Result;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::popup::{self, ApiClient};

/// vee - terminal session orchestrator for AI coding agents
#[derive(Parser)]
#[command(name = "vee")]
#[command(about = "Terminal session orchestrator for concurrent AI coding agents")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Boot the orchestrator: daemon, multiplexer, and a foreground attach
    Start {
        /// Daemon port (default: config, else OS-assigned)
        #[arg(long)]
        port: Option<u16>,

        /// Multiplexer socket name under $XDG_RUNTIME_DIR/vee
        #[arg(long)]
        socket: Option<String>,

        /// Extra flags forwarded to every agent invocation
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        passthrough: Vec<String>,
    },

    /// Run the daemon alone (no multiplexer configuration, no attach)
    Daemon {
        #[arg(long)]
        port: Option<u16>,

        #[arg(long)]
        socket: Option<String>,
    },

    #[command(name = "_session-picker", hide = true)]
    SessionPicker {
        #[arg(long)]
        port: u16,
        #[arg(long, default_value = "default")]
        socket: String,
    },

    #[command(name = "_new-pane", hide = true)]
    NewPane {
        #[arg(long)]
        port: u16,
        #[arg(long)]
        profile: String,
        #[arg(long, default_value = "")]
        prompt: String,
        #[arg(long)]
        ephemeral: bool,
    },

    #[command(name = "_resume-menu", hide = true)]
    ResumeMenu {
        #[arg(long)]
        port: u16,
        #[arg(long, default_value = "default")]
        socket: String,
    },

    #[command(name = "_shutdown", hide = true)]
    Shutdown {
        #[arg(long)]
        port: u16,
    },

    #[command(name = "_suspend-window", hide = true)]
    SuspendWindow {
        #[arg(long)]
        port: u16,
        #[arg(long)]
        window: String,
    },

    #[command(name = "_complete-window", hide = true)]
    CompleteWindow {
        #[arg(long)]
        port: u16,
        #[arg(long)]
        window: String,
    },

    #[command(name = "_log-viewer", hide = true)]
    LogViewer {
        #[arg(long)]
        port: u16,
        #[arg(long, default_value = "default")]
        socket: String,
        /// Keep refreshing (dashboard mode)
        #[arg(long)]
        follow: bool,
    },

    #[command(name = "_kb-explorer", hide = true)]
    KbExplorer {
        #[arg(long)]
        port: u16,
        #[arg(long, default_value = "default")]
        socket: String,
    },

    #[command(name = "_prompt-viewer", hide = true)]
    PromptViewer {
        #[arg(long)]
        port: u16,
        #[arg(long)]
        window: String,
    },

    #[command(name = "_issue-resolver", hide = true)]
    IssueResolver {
        #[arg(long)]
        port: u16,
        #[arg(long, default_value = "default")]
        socket: String,
    },

    #[command(name = "_hook", hide = true)]
    Hook {
        #[arg(long)]
        port: u16,
        #[arg(long)]
        session: Uuid,
        #[arg(long)]
        working: Option<bool>,
        #[arg(long)]
        notification: Option<bool>,
    },

    #[command(name = "_session-ended", hide = true)]
    SessionEnded {
        #[arg(long)]
        port: u16,
        #[arg(long)]
        tmux_socket: String,
        #[arg(long)]
        session_id: Uuid,
    },
}

pub async fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Start {
            port,
            socket,
            passthrough,
        } => start::run(port, socket, passthrough).await,
        Commands::Daemon { port, socket } => start::run_daemon_only(port, socket).await,
        Commands::SessionPicker { port, .. } => popup::picker::run(port).await,
        Commands::NewPane {
            port,
            profile,
            prompt,
            ephemeral,
        } => {
            ApiClient::new(port).spawn(&profile, &prompt, ephemeral).await?;
            Ok(())
        }
        Commands::ResumeMenu { port, .. } => popup::menu::run(port).await,
        Commands::Shutdown { port } => ApiClient::new(port).shutdown().await,
        Commands::SuspendWindow { port, window } => {
            // a false return is a coalesced duplicate, not a failure
            ApiClient::new(port).request_suspend_window(&window).await?;
            Ok(())
        }
        Commands::CompleteWindow { port, window } => {
            ApiClient::new(port).request_self_drop_window(&window).await?;
            Ok(())
        }
        Commands::LogViewer { port, follow, .. } => popup::viewer::run_log(port, follow).await,
        Commands::KbExplorer { port, .. } => popup::kb::run_explorer(port).await,
        Commands::PromptViewer { port, window } => {
            popup::viewer::run_prompt(port, &window).await
        }
        Commands::IssueResolver { port, .. } => popup::kb::run_issues(port).await,
        Commands::Hook {
            port,
            session,
            working,
            notification,
        } => crate::hook::run(port, session, working, notification).await,
        Commands::SessionEnded {
            port, session_id, ..
        } => ApiClient::new(port).session_ended(session_id).await,
    }
}
