//! Ephemeral execution environment builder
//!
//! Assembles the single shell command that builds the project image,
//! optionally starts a compose stack, runs the agent inside a container
//! with overlay mounts and identity forwarding, and always reports
//! termination back to the daemon. The command string is a pure function
//! of its inputs so re-invocations hit the build cache.

use sha2::{Digest, Sha256};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use uuid::Uuid;

use crate::config::{EphemeralConfig, MountMode};
use crate::utils::command::{binary_exists, shell_join, shell_quote};

/// Deterministic image tag for a project: two projects never share a tag,
/// re-invocation within a project reuses the docker build cache.
pub fn image_tag(project_root: &Path) -> String {
    let digest = Sha256::digest(project_root.as_os_str().as_encoded_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("vee-ephemeral-{}", &hex[..12])
}

/// Compose project name for a session. Uuids are lowercase hex plus
/// hyphens, so the result satisfies `^[a-z0-9][a-z0-9_-]*$`.
pub fn compose_project_name(session_id: Uuid) -> String {
    format!("vee-{}", session_id)
}

/// Whether ephemeral sessions can run at all. There is no local fallback:
/// the picker hides the toggle when this is false.
pub async fn ephemeral_available(config: Option<&EphemeralConfig>) -> bool {
    let Some(config) = config else {
        return false;
    };
    if !binary_exists("docker").await {
        return false;
    }
    if config.compose.is_some() {
        let compose_ok = Command::new("docker")
            .args(["compose", "version"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false);
        if !compose_ok {
            return false;
        }
    }
    true
}

/// Host git identity forwarded into the container.
#[derive(Debug, Clone, Default)]
pub struct GitIdentity {
    pub name: Option<String>,
    pub email: Option<String>,
    pub gpg_sign: bool,
}

impl GitIdentity {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.email.is_none()
    }
}

/// Read the host git identity for a project.
pub async fn detect_git_identity(project_root: &Path) -> GitIdentity {
    async fn get(root: &Path, key: &str) -> Option<String> {
        let output = Command::new("git")
            .args(["config", "--get", key])
            .current_dir(root)
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!value.is_empty()).then_some(value)
    }

    GitIdentity {
        name: get(project_root, "user.name").await,
        email: get(project_root, "user.email").await,
        gpg_sign: get(project_root, "commit.gpgsign").await.as_deref() == Some("true"),
    }
}

/// Minimal gitconfig mounted at `/etc/gitconfig` inside the container.
pub fn render_gitconfig(identity: &GitIdentity, gpg_wrapper: Option<&Path>) -> String {
    let mut out = String::from("[user]\n");
    if let Some(name) = &identity.name {
        out.push_str(&format!("\tname = {}\n", name));
    }
    if let Some(email) = &identity.email {
        out.push_str(&format!("\temail = {}\n", email));
    }
    if identity.gpg_sign {
        out.push_str("[commit]\n\tgpgsign = true\n");
        if let Some(wrapper) = gpg_wrapper {
            out.push_str(&format!("[gpg]\n\tprogram = {}\n", wrapper.display()));
        }
    }
    out
}

/// Wrapper script standing in for gpg inside the sandbox: it tunnels the
/// payload to the host daemon, which signs with the user's real keys.
pub fn gpg_wrapper_script(port: u16) -> String {
    format!(
        "#!/bin/sh\n\
# git calls this in place of gpg; signing happens on the host\n\
sig=$(curl -sf -X POST --data-binary @- \
\"http://host.docker.internal:{port}/api/gpg/sign\") || exit 1\n\
printf '%s\\n' \"$sig\"\n\
echo \"[GNUPG:] SIG_CREATED \" >&2\n"
    )
}

/// Inputs for one ephemeral session command.
pub struct EphemeralSpec<'a> {
    pub config: &'a EphemeralConfig,
    pub project_root: &'a Path,
    pub session_id: Uuid,
    pub session_dir: &'a Path,
    pub install_dir: &'a Path,
    pub port: u16,
    pub socket_name: &'a str,
    /// Host-side gitconfig to bind to `/etc/gitconfig`, when identity
    /// forwarding applies.
    pub gitconfig: Option<&'a Path>,
    /// Full agent argv, `claude` excluded.
    pub agent_args: &'a [String],
}

impl EphemeralSpec<'_> {
    /// Assemble the complete shell pipeline:
    /// `show-cursor; [compose up &&] build && run ; cleanup`.
    pub fn build(&self) -> String {
        let tag = image_tag(self.project_root);
        let compose_project = compose_project_name(self.session_id);
        let root = self.project_root.display().to_string();

        let mut pipeline = String::from("tput cnorm; ");

        if let Some(compose) = &self.config.compose {
            pipeline.push_str(&format!(
                "docker compose -p {} -f {} up -d && ",
                compose_project,
                shell_quote(compose)
            ));
        }

        let dockerfile = self.config.dockerfile.as_deref().unwrap_or("Dockerfile");
        pipeline.push_str(&format!(
            "docker build -t {} -f {} {} && ",
            tag,
            shell_quote(dockerfile),
            shell_quote(&root)
        ));

        let mut run = vec![
            "docker".to_string(),
            "run".to_string(),
            "--rm".to_string(),
            "-it".to_string(),
            "--init".to_string(),
            "--add-host".to_string(),
            "host.docker.internal:host-gateway".to_string(),
        ];

        let mut setup: Vec<String> = Vec::new();
        let mut overlay_index = 0usize;
        for mount in &self.config.mounts {
            let source = expand_home(&mount.source);
            match mount.mode {
                MountMode::Ro => {
                    run.push("-v".into());
                    run.push(format!("{}:{}:ro", source, mount.target));
                }
                MountMode::Rw => {
                    run.push("-v".into());
                    run.push(format!("{}:{}", source, mount.target));
                }
                MountMode::Overlay => {
                    let base = format!("/overlay/{}", overlay_index);
                    run.push("--mount".into());
                    run.push(format!("type=tmpfs,destination={}", base));
                    run.push("-v".into());
                    run.push(format!("{}:{}/lower:ro", source, base));
                    setup.push(format!(
                        "mkdir -p {base}/upper {base}/work {target} && \
mount -t overlay overlay -o \
lowerdir={base}/lower,upperdir={base}/upper,workdir={base}/work {target}",
                        base = base,
                        target = mount.target
                    ));
                    overlay_index += 1;
                }
            }
        }
        if overlay_index > 0 {
            run.push("--cap-add".into());
            run.push("SYS_ADMIN".into());
        }

        // the session dir holds the MCP and hook configs, which reference
        // each other by absolute path: mount it at the identical path
        let session_dir = self.session_dir.display().to_string();
        run.push("-v".into());
        run.push(format!("{}:{}:ro", session_dir, session_dir));
        let install = self.install_dir.display().to_string();
        run.push("-v".into());
        run.push(format!("{}:{}:ro", install, install));
        run.push("-v".into());
        run.push(format!("{}:{}", root, root));
        run.push("-w".into());
        run.push(root.clone());

        if let Some(gitconfig) = self.gitconfig {
            run.push("-v".into());
            run.push(format!("{}:/etc/gitconfig:ro", gitconfig.display()));
        }

        for env in &self.config.env {
            run.push("-e".into());
            run.push(env.clone());
        }
        run.extend(self.config.extra_args.iter().cloned());
        run.push(tag);

        if let Some(script) = &self.config.startup_script {
            setup.push(format!("sh {}", shell_quote(script)));
        }

        pipeline.push_str(&shell_join(run.iter().map(String::as_str)));
        if setup.is_empty() {
            pipeline.push_str(" claude ");
            pipeline.push_str(&shell_join(self.agent_args.iter().map(String::as_str)));
        } else {
            // overlayfs must be assembled before the agent starts
            let script = format!("{} && exec \"$@\"", setup.join(" && "));
            pipeline.push_str(&format!(" sh -c {} _ claude ", shell_quote(&script)));
            pipeline.push_str(&shell_join(self.agent_args.iter().map(String::as_str)));
        }

        pipeline.push_str(" ; ");
        if let Some(compose) = &self.config.compose {
            pipeline.push_str(&format!(
                "docker compose -p {} -f {} down --remove-orphans ; ",
                compose_project,
                shell_quote(compose)
            ));
        }
        pipeline.push_str(&session_ended_tail(
            self.port,
            self.socket_name,
            self.session_id,
        ));
        pipeline
    }
}

/// Cleanup tail shared by ephemeral and local sessions: tells the daemon
/// the agent process is gone.
pub fn session_ended_tail(port: u16, socket_name: &str, session_id: Uuid) -> String {
    format!(
        "vee _session-ended --port {} --tmux-socket {} --session-id {}",
        port, socket_name, session_id
    )
}

fn expand_home(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest).display().to_string();
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MountSpec;
    use regex::Regex;
    use std::path::PathBuf;

    fn spec_config() -> EphemeralConfig {
        EphemeralConfig {
            dockerfile: Some(".vee/Dockerfile".into()),
            compose: None,
            startup_script: None,
            env: vec![],
            extra_args: vec![],
            mounts: vec!["~/.claude:/root/.claude".parse::<MountSpec>().unwrap()],
        }
    }

    fn build(config: &EphemeralConfig, id: Uuid) -> String {
        EphemeralSpec {
            config,
            project_root: Path::new("/home/user/project"),
            session_id: id,
            session_dir: Path::new("/run/user/1000/vee/sessions/abc"),
            install_dir: Path::new("/opt/vee"),
            port: 7331,
            socket_name: "default",
            gitconfig: None,
            agent_args: &["--session-id".to_string(), id.to_string()],
        }
        .build()
    }

    #[test]
    fn test_image_tag_is_deterministic() {
        let a = image_tag(Path::new("/home/user/project"));
        let b = image_tag(Path::new("/home/user/project"));
        let c = image_tag(Path::new("/home/user/other"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("vee-ephemeral-"));
        assert_eq!(a.len(), "vee-ephemeral-".len() + 12);
    }

    #[test]
    fn test_compose_project_name_charset() {
        let re = Regex::new("^[a-z0-9][a-z0-9_-]*$").unwrap();
        for _ in 0..16 {
            assert!(re.is_match(&compose_project_name(Uuid::new_v4())));
        }
    }

    #[test]
    fn test_command_invariants() {
        let config = spec_config();
        let id = Uuid::new_v4();
        let cmd = build(&config, id);

        assert!(cmd.starts_with("tput cnorm; "));
        assert!(cmd.contains(&format!(
            "docker build -t {}",
            image_tag(Path::new("/home/user/project"))
        )));
        assert!(cmd.contains("--cap-add SYS_ADMIN"));
        assert!(cmd.contains("--add-host host.docker.internal:host-gateway"));
        assert!(cmd.contains("docker run --rm -it --init"));
        assert!(cmd.contains(
            "mount -t overlay overlay -o lowerdir=/overlay/0/lower,\
upperdir=/overlay/0/upper,workdir=/overlay/0/work /root/.claude"
        ));
        assert!(cmd.contains("exec \"$@\""));
        assert!(cmd.contains(&format!(
            "vee _session-ended --port 7331 --tmux-socket default --session-id {}",
            id
        )));
    }

    #[test]
    fn test_session_dir_mounted_at_identical_path() {
        let cmd = build(&spec_config(), Uuid::new_v4());
        assert!(cmd.contains(
            "/run/user/1000/vee/sessions/abc:/run/user/1000/vee/sessions/abc:ro"
        ));
        assert!(cmd.contains("/opt/vee:/opt/vee:ro"));
    }

    #[test]
    fn test_plain_mount_modes() {
        let mut config = spec_config();
        config.mounts = vec![
            "/data:/data:ro".parse::<MountSpec>().unwrap(),
            "/scratch:/scratch:rw".parse::<MountSpec>().unwrap(),
        ];
        let cmd = build(&config, Uuid::new_v4());
        assert!(cmd.contains("-v /data:/data:ro"));
        assert!(cmd.contains("-v /scratch:/scratch"));
        // no overlays: the agent runs bare, without the sh -c wrapper
        assert!(!cmd.contains("--cap-add SYS_ADMIN"));
        assert!(!cmd.contains("exec \"$@\""));
    }

    #[test]
    fn test_compose_wraps_pipeline() {
        let mut config = spec_config();
        config.compose = Some(".vee/compose.yaml".into());
        let id = Uuid::new_v4();
        let cmd = build(&config, id);
        let name = compose_project_name(id);
        assert!(cmd.contains(&format!("docker compose -p {} -f .vee/compose.yaml up -d &&", name)));
        assert!(cmd.contains(&format!(
            "docker compose -p {} -f .vee/compose.yaml down --remove-orphans",
            name
        )));
    }

    #[test]
    fn test_startup_script_forces_wrapper() {
        let mut config = spec_config();
        config.mounts.clear();
        config.startup_script = Some(".vee/startup.sh".into());
        let cmd = build(&config, Uuid::new_v4());
        assert!(cmd.contains("sh .vee/startup.sh && exec \"$@\""));
    }

    #[test]
    fn test_render_gitconfig() {
        let identity = GitIdentity {
            name: Some("Dev".into()),
            email: Some("dev@example.com".into()),
            gpg_sign: true,
        };
        let out = render_gitconfig(&identity, Some(Path::new("/tmp/gpg-wrapper.sh")));
        assert!(out.contains("name = Dev"));
        assert!(out.contains("email = dev@example.com"));
        assert!(out.contains("gpgsign = true"));
        assert!(out.contains("program = /tmp/gpg-wrapper.sh"));

        let plain = render_gitconfig(
            &GitIdentity {
                name: Some("Dev".into()),
                email: None,
                gpg_sign: false,
            },
            None,
        );
        assert!(!plain.contains("gpgsign"));
    }

    #[test]
    fn test_env_and_extra_args_forwarded() {
        let mut config = spec_config();
        config.env = vec!["RUST_LOG=debug".into()];
        config.extra_args = vec!["--network".into(), "host".into()];
        let cmd = build(&config, Uuid::new_v4());
        assert!(cmd.contains("-e RUST_LOG=debug"));
        assert!(cmd.contains("--network host"));
    }

    #[test]
    fn test_gpg_wrapper_targets_daemon() {
        let script = gpg_wrapper_script(7331);
        assert!(script.starts_with("#!/bin/sh"));
        assert!(script.contains("http://host.docker.internal:7331/api/gpg/sign"));
    }

    #[test]
    fn test_expand_home() {
        let home = dirs::home_dir().unwrap_or(PathBuf::from("/root"));
        assert_eq!(
            expand_home("~/.claude"),
            home.join(".claude").display().to_string()
        );
        assert_eq!(expand_home("/abs"), "/abs");
    }
}
