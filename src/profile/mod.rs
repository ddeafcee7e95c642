//! Profile definitions and registry
//!
//! Profiles are markdown files with a YAML frontmatter block. The installed
//! directory ships the defaults; the user directory overrides by filename
//! stem. The registry is re-read from disk on every picker open so edits
//! take effect without restarting the orchestrator.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Base system prompt every agent receives, regardless of profile.
pub const BASE_PROMPT: &str = "\
You are running inside vee, a terminal session orchestrator. Other agent \
sessions may be active alongside yours; stay inside the task you were \
given. The orchestrator tracks your state through the connected vee-daemon \
MCP server: call report_mode_change when you switch operating modes, \
request_suspend when you want to be parked for later, and self_drop when \
your task is finished and the session should end cleanly.";

/// A named operating mode for an agent session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub indicator: String,
    pub description: String,
    /// Ascending sort key; `None` sorts last.
    pub priority: Option<u32>,
    /// Fully composed system prompt (base prompt + wrapped body).
    pub prompt: String,
    /// Initial-prompt template; an embedded `{}` takes the typed prompt.
    pub default_prompt: String,
    /// Hint shown in the picker's prompt editor.
    pub prompt_placeholder: String,
    /// Whether the knowledge-base tools are exposed to this profile.
    pub kb_tools: bool,
}

impl Profile {
    /// Resolve the initial user prompt from the template and typed input.
    pub fn resolve_initial_prompt(&self, input: &str) -> String {
        if self.default_prompt.is_empty() {
            return input.to_string();
        }
        if self.default_prompt.contains("{}") {
            return self.default_prompt.replace("{}", input);
        }
        if input.is_empty() {
            return self.default_prompt.clone();
        }
        input.to_string()
    }

    fn sort_key(&self) -> (u32, &str) {
        (self.priority.unwrap_or(u32::MAX), self.name.as_str())
    }
}

#[derive(Debug, Default, Deserialize)]
struct Frontmatter {
    #[serde(default)]
    indicator: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    priority: Option<u32>,
    #[serde(default)]
    default_prompt: String,
    #[serde(default)]
    prompt_placeholder: String,
    #[serde(default = "default_true")]
    kb_tools: bool,
}

fn default_true() -> bool {
    true
}

/// Wrap a profile body in the rule blocks the agent is instructed with:
/// a `Script` rule binding it to the body, an `Indicator` rule naming the
/// glyph, then the body inside a `<script>` block.
pub fn wrap(indicator: &str, body: &str) -> String {
    format!(
        "<rule name=\"Script\">The script below defines how you operate for \
this entire session. Follow it.</rule>\n\
<rule name=\"Indicator\">Prefix every message you write with {indicator} \
so the operator can tell sessions apart at a glance.</rule>\n\
<script>\n{body}\n</script>",
        indicator = indicator,
        body = body.trim()
    )
}

/// Compose the full profile prompt. An empty body yields the base prompt
/// alone.
pub fn compose_prompt(indicator: &str, body: &str) -> String {
    if body.trim().is_empty() {
        return BASE_PROMPT.to_string();
    }
    format!("{}\n\n{}", BASE_PROMPT, wrap(indicator, body))
}

fn split_frontmatter(raw: &str) -> Result<(&str, &str)> {
    let rest = raw
        .strip_prefix("---\n")
        .or_else(|| raw.strip_prefix("---\r\n"))
        .context("missing opening '---' frontmatter delimiter")?;
    let end = rest
        .find("\n---")
        .context("missing closing '---' frontmatter delimiter")?;
    let front = &rest[..end];
    let body = rest[end + 4..].trim_start_matches(['-']).trim_start_matches(['\r', '\n']);
    Ok((front, body))
}

fn parse_profile(name: &str, raw: &str) -> Result<Profile> {
    let (front, body) = split_frontmatter(raw)?;
    let meta: Frontmatter = serde_yaml::from_str(front).context("malformed frontmatter YAML")?;
    Ok(Profile {
        name: name.to_string(),
        prompt: compose_prompt(&meta.indicator, body),
        indicator: meta.indicator,
        description: meta.description,
        priority: meta.priority,
        default_prompt: meta.default_prompt,
        prompt_placeholder: meta.prompt_placeholder,
        kb_tools: meta.kb_tools,
    })
}

/// Merged, ordered set of profiles.
#[derive(Debug, Default)]
pub struct ProfileRegistry {
    profiles: HashMap<String, Profile>,
    order: Vec<String>,
}

impl ProfileRegistry {
    /// Load and merge both profile directories; entries from `user_dir`
    /// win by name. A missing directory is skipped, a malformed file
    /// fails the whole load with the path in the error.
    pub fn load(installed_dir: &Path, user_dir: &Path) -> Result<Self> {
        let mut profiles = HashMap::new();
        for dir in [installed_dir, user_dir] {
            debug!(dir = %dir.display(), "scanning profile directory");
            for (name, raw) in read_profile_files(dir)? {
                let profile = parse_profile(&name, &raw)
                    .with_context(|| format!("profile {}", dir.join(&name).display()))?;
                profiles.insert(name, profile);
            }
        }

        let mut order: Vec<String> = profiles.keys().cloned().collect();
        order.sort_by(|a, b| profiles[a].sort_key().cmp(&profiles[b].sort_key()));
        Ok(Self { profiles, order })
    }

    pub fn get(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }

    /// Profiles in display order: priority ascending, name tiebreak.
    pub fn ordered(&self) -> Vec<&Profile> {
        self.order.iter().filter_map(|n| self.profiles.get(n)).collect()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

fn read_profile_files(dir: &Path) -> Result<Vec<(String, String)>> {
    let mut files = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
        Err(e) => {
            return Err(e).with_context(|| format!("reading profile dir {}", dir.display()))
        }
    };
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading profile {}", path.display()))?;
        files.push((stem.to_string(), raw));
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const NORMAL: &str = "---\nindicator: \"🦊\"\ndescription: day-to-day coding\npriority: 10\n---\nWork through tasks one at a time.\n";

    fn write_profile(dir: &Path, name: &str, contents: &str) {
        fs::write(dir.join(format!("{name}.md")), contents).unwrap();
    }

    #[test]
    fn test_parse_profile_fields() {
        let profile = parse_profile("normal", NORMAL).unwrap();
        assert_eq!(profile.indicator, "🦊");
        assert_eq!(profile.description, "day-to-day coding");
        assert_eq!(profile.priority, Some(10));
        assert!(profile.kb_tools);
    }

    #[test]
    fn test_wrap_round_trip() {
        let profile = parse_profile("normal", NORMAL).unwrap();
        // the composed prompt carries the base prompt, the indicator, and
        // the body inside the script block
        assert!(profile.prompt.starts_with(BASE_PROMPT));
        assert!(profile.prompt.contains("🦊"));
        assert!(profile.prompt.contains("<script>\nWork through tasks one at a time."));
        assert!(profile.prompt.contains("<rule name=\"Script\">"));
    }

    #[test]
    fn test_empty_body_uses_base_prompt_only() {
        let raw = "---\nindicator: x\n---\n\n";
        let profile = parse_profile("bare", raw).unwrap();
        assert_eq!(profile.prompt, BASE_PROMPT);
    }

    #[test]
    fn test_missing_opening_delimiter() {
        let err = parse_profile("bad", "indicator: x\n---\nbody").unwrap_err();
        assert!(err.to_string().contains("opening"));
    }

    #[test]
    fn test_missing_closing_delimiter() {
        let err = parse_profile("bad", "---\nindicator: x\n").unwrap_err();
        assert!(err.to_string().contains("closing"));
    }

    #[test]
    fn test_malformed_yaml_fails_with_path() {
        let dir = TempDir::new().unwrap();
        write_profile(dir.path(), "broken", "---\nindicator: [unclosed\n---\nbody");
        let err = ProfileRegistry::load(dir.path(), Path::new("/nonexistent")).unwrap_err();
        assert!(format!("{:#}", err).contains("broken"));
    }

    #[test]
    fn test_user_override_wins() {
        let installed = TempDir::new().unwrap();
        let user = TempDir::new().unwrap();
        write_profile(installed.path(), "normal", NORMAL);
        write_profile(
            user.path(),
            "normal",
            "---\nindicator: \"🐱\"\npriority: 5\n---\nbody\n",
        );
        write_profile(
            installed.path(),
            "review",
            "---\nindicator: \"🔍\"\npriority: 10\n---\nbody\n",
        );

        let registry = ProfileRegistry::load(installed.path(), user.path()).unwrap();
        assert_eq!(registry.len(), 2);
        let normal = registry.get("normal").unwrap();
        assert_eq!(normal.indicator, "🐱");
        assert_eq!(normal.priority, Some(5));
        // priority 5 sorts before every priority-10 entry
        assert_eq!(registry.ordered()[0].name, "normal");
    }

    #[test]
    fn test_order_priority_then_name() {
        let dir = TempDir::new().unwrap();
        write_profile(dir.path(), "bravo", "---\npriority: 1\n---\nb\n");
        write_profile(dir.path(), "alpha", "---\npriority: 1\n---\na\n");
        write_profile(dir.path(), "zulu", "---\ndescription: unprioritized\n---\nz\n");
        write_profile(dir.path(), "early", "---\npriority: 0\n---\ne\n");

        let registry = ProfileRegistry::load(dir.path(), Path::new("/nonexistent")).unwrap();
        let names: Vec<&str> = registry.ordered().iter().map(|p| p.name.as_str()).collect();
        // missing priority maps to the end
        assert_eq!(names, vec!["early", "alpha", "bravo", "zulu"]);
    }

    #[test]
    fn test_resolve_initial_prompt() {
        let mut profile = parse_profile("normal", NORMAL).unwrap();
        assert_eq!(profile.resolve_initial_prompt("do it"), "do it");

        profile.default_prompt = "Review {} carefully".to_string();
        assert_eq!(
            profile.resolve_initial_prompt("src/lib.rs"),
            "Review src/lib.rs carefully"
        );

        profile.default_prompt = "Standing orders".to_string();
        assert_eq!(profile.resolve_initial_prompt(""), "Standing orders");
        assert_eq!(profile.resolve_initial_prompt("override"), "override");
    }
}
