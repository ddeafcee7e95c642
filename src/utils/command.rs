//! Subprocess execution helpers

use anyhow::{Context, Result};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Run a command and return its stdout, failing on a non-zero exit status.
pub async fn run(cmd: &str, args: &[&str], dir: Option<&Path>) -> Result<String> {
    let mut command = Command::new(cmd);
    command.args(args);

    if let Some(dir) = dir {
        command.current_dir(dir);
    }

    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let output = command
        .output()
        .await
        .with_context(|| format!("failed to execute: {} {}", cmd, args.join(" ")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!(
            "command failed: {} {}\nstderr: {}",
            cmd,
            args.join(" "),
            stderr.trim()
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Run a command, bounding its execution time.
pub async fn run_with_timeout(
    cmd: &str,
    args: &[&str],
    dir: Option<&Path>,
    timeout: Duration,
) -> Result<String> {
    tokio::time::timeout(timeout, run(cmd, args, dir))
        .await
        .with_context(|| format!("command timed out: {}", cmd))?
}

/// Whether a binary is resolvable on PATH.
pub async fn binary_exists(cmd: &str) -> bool {
    Command::new(cmd)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Quote a string for POSIX shell interpolation.
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./=:@,".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Join arguments into a single shell command line, quoting each.
pub fn shell_join<I, S>(args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    args.into_iter()
        .map(|a| shell_quote(a.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote_plain() {
        assert_eq!(shell_quote("claude"), "claude");
        assert_eq!(shell_quote("/usr/bin/env"), "/usr/bin/env");
        assert_eq!(shell_quote("a=b"), "a=b");
    }

    #[test]
    fn test_shell_quote_special() {
        assert_eq!(shell_quote("hello world"), "'hello world'");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_shell_join() {
        assert_eq!(
            shell_join(["claude", "fix the bug"]),
            "claude 'fix the bug'"
        );
    }

    #[tokio::test]
    async fn test_run_captures_stdout() {
        let out = run("echo", &["hi"], None).await.unwrap();
        assert_eq!(out.trim(), "hi");
    }

    #[tokio::test]
    async fn test_run_fails_on_nonzero() {
        assert!(run("false", &[], None).await.is_err());
    }
}
