//! Project and user configuration
//!
//! Vee reads a git-style section/key format from `~/.config/vee/config`
//! and the per-project `.vee/config` (project wins, later values
//! override, repeatable keys append). `[include] path=…` splices another
//! file in place; `[includeIf "gitdir:<glob>"] path=…` does so only when
//! the glob matches the project root. Globs support `**` path-component
//! wildcards.

use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::utils::paths;

const MAX_INCLUDE_DEPTH: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{path}:{line}: {msg}")]
    Parse {
        path: PathBuf,
        line: usize,
        msg: String,
    },
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("include depth exceeded at {0}")]
    IncludeDepth(PathBuf),
    #[error("invalid mount spec '{0}': expected source:target[:mode]")]
    Mount(String),
}

/// Access mode for an `[ephemeral]` mount entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MountMode {
    /// Read-only lower layer with a tmpfs upper, assembled with overlayfs
    /// inside the container.
    #[default]
    Overlay,
    Ro,
    Rw,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountSpec {
    pub source: String,
    pub target: String,
    pub mode: MountMode,
}

impl std::str::FromStr for MountSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let (source, target, mode) = match parts.as_slice() {
            [source, target] => (source, target, MountMode::Overlay),
            [source, target, mode] => {
                let mode = match *mode {
                    "overlay" => MountMode::Overlay,
                    "ro" => MountMode::Ro,
                    "rw" => MountMode::Rw,
                    _ => return Err(ConfigError::Mount(s.to_string())),
                };
                (source, target, mode)
            }
            _ => return Err(ConfigError::Mount(s.to_string())),
        };
        if source.is_empty() || target.is_empty() {
            return Err(ConfigError::Mount(s.to_string()));
        }
        Ok(MountSpec {
            source: source.to_string(),
            target: target.to_string(),
            mode,
        })
    }
}

/// The `[ephemeral]` section of a project config.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EphemeralConfig {
    pub dockerfile: Option<String>,
    pub compose: Option<String>,
    pub startup_script: Option<String>,
    pub env: Vec<String>,
    pub extra_args: Vec<String>,
    pub mounts: Vec<MountSpec>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProjectConfig {
    pub daemon_port: Option<u16>,
    pub socket: Option<String>,
    pub plugin_dirs: Vec<String>,
    pub kb_ingest: Option<bool>,
    pub ephemeral: Option<EphemeralConfig>,
}

impl ProjectConfig {
    /// Load the merged configuration for a project: user config first,
    /// project `.vee/config` second.
    pub fn load(project_root: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for path in [
            paths::user_config_dir().join("config"),
            project_root.join(".vee").join("config"),
        ] {
            if path.exists() {
                parse_file(&mut config, &path, project_root, 0)?;
            }
        }
        Ok(config)
    }

    fn apply(
        &mut self,
        section: &str,
        subsection: Option<&str>,
        key: &str,
        value: &str,
    ) -> Result<(), String> {
        match (section, key) {
            ("daemon", "port") => {
                self.daemon_port = Some(value.parse().map_err(|_| "invalid port".to_string())?);
            }
            ("daemon", "socket") => self.socket = Some(value.to_string()),
            ("agent", "plugin_dir") => self.plugin_dirs.push(value.to_string()),
            ("kb", "ingest") => {
                self.kb_ingest =
                    Some(value.parse().map_err(|_| "expected true/false".to_string())?);
            }
            ("ephemeral", _) => {
                let eph = self.ephemeral.get_or_insert_with(EphemeralConfig::default);
                match key {
                    "dockerfile" => eph.dockerfile = Some(value.to_string()),
                    "compose" => eph.compose = Some(value.to_string()),
                    "startup_script" => eph.startup_script = Some(value.to_string()),
                    "env" => eph.env.push(value.to_string()),
                    "extra_args" => eph.extra_args.push(value.to_string()),
                    "mounts" => eph
                        .mounts
                        .push(value.parse().map_err(|e: ConfigError| e.to_string())?),
                    other => debug!(section, key = other, "ignoring unknown ephemeral key"),
                }
            }
            _ => {
                let _ = subsection;
                debug!(section, key, "ignoring unknown config key");
            }
        }
        Ok(())
    }
}

fn parse_file(
    config: &mut ProjectConfig,
    path: &Path,
    project_root: &Path,
    depth: usize,
) -> Result<(), ConfigError> {
    if depth > MAX_INCLUDE_DEPTH {
        return Err(ConfigError::IncludeDepth(path.to_path_buf()));
    }
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let base_dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
    parse_str(config, &text, path, &base_dir, project_root, depth)
}

/// Parse one config document, applying entries in order and expanding
/// includes in place.
fn parse_str(
    config: &mut ProjectConfig,
    text: &str,
    path: &Path,
    base_dir: &Path,
    project_root: &Path,
    depth: usize,
) -> Result<(), ConfigError> {
    let mut section = String::new();
    let mut subsection: Option<String> = None;

    for (idx, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(header) = line.strip_prefix('[') {
            let header = header.strip_suffix(']').ok_or_else(|| ConfigError::Parse {
                path: path.to_path_buf(),
                line: idx + 1,
                msg: "unterminated section header".to_string(),
            })?;
            let (name, sub) = match header.split_once(' ') {
                Some((name, rest)) => {
                    let sub = rest.trim().trim_matches('"').to_string();
                    (name.trim(), Some(sub))
                }
                None => (header.trim(), None),
            };
            section = name.to_ascii_lowercase();
            subsection = sub;
            continue;
        }

        let (key, value) = line.split_once('=').ok_or_else(|| ConfigError::Parse {
            path: path.to_path_buf(),
            line: idx + 1,
            msg: "expected 'key = value'".to_string(),
        })?;
        let key = key.trim().to_ascii_lowercase();
        let value = unquote(value.trim());

        if section == "include" || section == "includeif" {
            if key != "path" {
                continue;
            }
            let applies = match (section.as_str(), subsection.as_deref()) {
                ("include", _) => true,
                ("includeif", Some(cond)) => include_condition_matches(cond, project_root),
                ("includeif", None) => false,
                _ => unreachable!(),
            };
            if applies {
                let target = expand_tilde(&value);
                let target = if target.is_absolute() {
                    target
                } else {
                    base_dir.join(target)
                };
                parse_file(config, &target, project_root, depth + 1)?;
            }
            continue;
        }

        config
            .apply(&section, subsection.as_deref(), &key, &value)
            .map_err(|msg| ConfigError::Parse {
                path: path.to_path_buf(),
                line: idx + 1,
                msg,
            })?;
    }
    Ok(())
}

fn unquote(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        return value[1..value.len() - 1].to_string();
    }
    // unquoted values end at the first comment character
    match value.find(['#', ';']) {
        Some(pos) => value[..pos].trim_end().to_string(),
        None => value.to_string(),
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Evaluate an `includeIf` condition. Only `gitdir:<glob>` is understood;
/// the glob is matched against the absolute project root.
fn include_condition_matches(condition: &str, project_root: &Path) -> bool {
    let Some(glob) = condition.strip_prefix("gitdir:") else {
        return false;
    };
    let pattern = expand_tilde(glob).to_string_lossy().into_owned();
    let Some(re) = glob_to_regex(&pattern) else {
        return false;
    };
    let mut subject = project_root.to_string_lossy().into_owned();
    if !subject.ends_with('/') {
        subject.push('/');
    }
    re.is_match(&subject)
}

/// Translate a gitdir glob to an anchored regex. `**` crosses path
/// components, `*` and `?` stay within one.
fn glob_to_regex(glob: &str) -> Option<Regex> {
    let mut pattern = String::from("^");
    if !glob.starts_with('/') {
        pattern.push_str("(?:.*/)?");
    }
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    pattern.push_str(".*");
                } else {
                    pattern.push_str("[^/]*");
                }
            }
            '?' => pattern.push_str("[^/]"),
            c if "\\.+()|[]{}^$".contains(c) => {
                pattern.push('\\');
                pattern.push(c);
            }
            c => pattern.push(c),
        }
    }
    // a trailing slash means "this directory and everything below"
    if pattern.ends_with('/') {
        pattern.push_str(".*");
    }
    pattern.push('$');
    Regex::new(&pattern).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn parse(text: &str, project_root: &Path) -> Result<ProjectConfig, ConfigError> {
        let mut config = ProjectConfig::default();
        parse_str(
            &mut config,
            text,
            Path::new("test.conf"),
            Path::new("."),
            project_root,
            0,
        )?;
        Ok(config)
    }

    #[test]
    fn test_sections_and_keys() {
        let config = parse(
            "[daemon]\n  port = 7331\n  socket = work\n[kb]\n  ingest = false\n",
            Path::new("/p"),
        )
        .unwrap();
        assert_eq!(config.daemon_port, Some(7331));
        assert_eq!(config.socket.as_deref(), Some("work"));
        assert_eq!(config.kb_ingest, Some(false));
    }

    #[test]
    fn test_repeatable_keys_append() {
        let config = parse(
            "[ephemeral]\n  env = A=1\n  env = B=2\n  extra_args = --network\n  extra_args = host\n",
            Path::new("/p"),
        )
        .unwrap();
        let eph = config.ephemeral.unwrap();
        assert_eq!(eph.env, vec!["A=1", "B=2"]);
        assert_eq!(eph.extra_args, vec!["--network", "host"]);
    }

    #[test]
    fn test_comments_and_quotes() {
        let config = parse(
            "# leading\n[daemon]\n  socket = \"my socket\" \n  port = 80 ; trailing\n",
            Path::new("/p"),
        )
        .unwrap();
        assert_eq!(config.socket.as_deref(), Some("my socket"));
        assert_eq!(config.daemon_port, Some(80));
    }

    #[test]
    fn test_mount_spec_modes() {
        let spec: MountSpec = "~/.claude:/root/.claude".parse().unwrap();
        assert_eq!(spec.mode, MountMode::Overlay);
        let spec: MountSpec = "/a:/b:ro".parse().unwrap();
        assert_eq!(spec.mode, MountMode::Ro);
        let spec: MountSpec = "/a:/b:rw".parse().unwrap();
        assert_eq!(spec.mode, MountMode::Rw);
        assert!("justone".parse::<MountSpec>().is_err());
        assert!("/a:/b:rx".parse::<MountSpec>().is_err());
    }

    #[test]
    fn test_bad_port_is_a_parse_error_with_line() {
        let err = parse("[daemon]\nport = many\n", Path::new("/p")).unwrap_err();
        assert!(err.to_string().contains(":2:"));
    }

    #[test]
    fn test_include_splices_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("extra.conf"), "[daemon]\nport = 9000\n").unwrap();
        let main = dir.path().join("config");
        fs::write(&main, "[include]\npath = extra.conf\n").unwrap();

        let mut config = ProjectConfig::default();
        parse_file(&mut config, &main, Path::new("/p"), 0).unwrap();
        assert_eq!(config.daemon_port, Some(9000));
    }

    #[test]
    fn test_include_if_gitdir_glob() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("work.conf"), "[daemon]\nsocket = work\n").unwrap();
        let main = dir.path().join("config");
        fs::write(
            &main,
            "[includeIf \"gitdir:/home/user/work/**\"]\npath = work.conf\n",
        )
        .unwrap();

        let mut config = ProjectConfig::default();
        parse_file(&mut config, &main, Path::new("/home/user/work/api/backend"), 0).unwrap();
        assert_eq!(config.socket.as_deref(), Some("work"));

        let mut other = ProjectConfig::default();
        parse_file(&mut other, &main, Path::new("/home/user/play/api"), 0).unwrap();
        assert!(other.socket.is_none());
    }

    #[test]
    fn test_glob_double_star_crosses_components() {
        let re = glob_to_regex("/work/**/api/").unwrap();
        assert!(re.is_match("/work/a/b/api/"));
        assert!(!re.is_match("/play/a/api/"));

        let re = glob_to_regex("/work/*").unwrap();
        assert!(re.is_match("/work/a"));
        assert!(!re.is_match("/work/a/b"));
    }

    #[test]
    fn test_unterminated_section_header() {
        let err = parse("[daemon\nport = 1\n", Path::new("/p")).unwrap_err();
        assert!(err.to_string().contains("unterminated"));
    }
}
