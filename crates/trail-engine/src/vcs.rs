//! Version-control access through the `git` CLI.
//!
//! Read operations never fail: an unreachable repository yields `"unknown"` or
//! an empty collection. Writes (`create_branch`, `commit`) return `Err`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::EngineError;

pub const UNKNOWN_BRANCH: &str = "unknown";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

const FIELD_SEP: char = '\u{1f}';
const RECORD_SEP: char = '\u{1e}';
const LOG_FORMAT: &str = "--format=%x1e%H%x1f%an%x1f%aI%x1f%s";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub hash: String,
    pub author: String,
    pub date: String,
    pub message: String,
    /// Paths touched by the commit, from `--name-only`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
}

impl Commit {
    /// One-line rendering used in prompt context.
    pub fn oneline(&self) -> String {
        let short: String = self.hash.chars().take(7).collect();
        format!("{short} {}", self.message)
    }
}

#[async_trait]
pub trait VcsClient: Send + Sync {
    async fn current_branch(&self) -> String;

    /// Newest first.
    async fn recent_commits(&self, n: usize) -> Vec<Commit>;

    /// Paths with staged, unstaged or untracked changes.
    async fn uncommitted_changes(&self) -> Vec<String>;

    /// Working-tree diff against HEAD.
    async fn diff(&self) -> String;

    /// A single commit with its file list, `None` when it cannot be read.
    async fn show_commit(&self, hash: &str) -> Option<Commit>;

    /// Patch introduced by `hash`. Empty when unavailable.
    async fn commit_diff(&self, hash: &str) -> String;

    async fn create_branch(&self, name: &str) -> Result<(), EngineError>;

    /// Stages `files` (when non-empty), commits, and returns the new HEAD hash.
    async fn commit(&self, message: &str, files: &[String]) -> Result<String, EngineError>;
}

pub struct GitCli {
    root: PathBuf,
    timeout: Duration,
}

impl GitCli {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn run(&self, args: &[&str]) -> Result<String, EngineError> {
        let output = tokio::time::timeout(
            self.timeout,
            tokio::process::Command::new("git")
                .args(args)
                .current_dir(&self.root)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| EngineError::Vcs(format!("git {} timed out after {:?}", args.join(" "), self.timeout)))?
        .map_err(|e| EngineError::Vcs(format!("failed to spawn git: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Vcs(format!(
                "git {} exited with {}: {}",
                args.join(" "),
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Read helper: failures are logged at debug and mapped to `None`.
    async fn read(&self, args: &[&str]) -> Option<String> {
        match self.run(args).await {
            Ok(out) => Some(out),
            Err(e) => {
                debug!(error = %e, "git read failed");
                None
            }
        }
    }
}

#[async_trait]
impl VcsClient for GitCli {
    async fn current_branch(&self) -> String {
        match self.read(&["rev-parse", "--abbrev-ref", "HEAD"]).await {
            Some(out) if !out.trim().is_empty() => out.trim().to_string(),
            _ => UNKNOWN_BRANCH.to_string(),
        }
    }

    async fn recent_commits(&self, n: usize) -> Vec<Commit> {
        if n == 0 {
            return Vec::new();
        }
        let limit = format!("-n{n}");
        self.read(&["log", &limit, "--name-only", LOG_FORMAT])
            .await
            .map(|out| parse_log(&out))
            .unwrap_or_default()
    }

    async fn uncommitted_changes(&self) -> Vec<String> {
        self.read(&["status", "--porcelain"])
            .await
            .map(|out| parse_porcelain(&out))
            .unwrap_or_default()
    }

    async fn diff(&self) -> String {
        self.read(&["diff", "HEAD"]).await.unwrap_or_default()
    }

    async fn show_commit(&self, hash: &str) -> Option<Commit> {
        if !is_commit_hash(hash) {
            return None;
        }
        let out = self.read(&["log", "-n1", "--name-only", LOG_FORMAT, hash, "--"]).await?;
        parse_log(&out).into_iter().next()
    }

    async fn commit_diff(&self, hash: &str) -> String {
        if !is_commit_hash(hash) {
            return String::new();
        }
        self.read(&["show", "--format=", "--patch", hash, "--"])
            .await
            .map(|out| out.trim_start().to_string())
            .unwrap_or_default()
    }

    async fn create_branch(&self, name: &str) -> Result<(), EngineError> {
        validate_branch_name(name)?;
        self.run(&["checkout", "-b", name]).await?;
        Ok(())
    }

    async fn commit(&self, message: &str, files: &[String]) -> Result<String, EngineError> {
        if message.trim().is_empty() {
            return Err(EngineError::Vcs("commit message is empty".into()));
        }
        if !files.is_empty() {
            let mut args = vec!["add", "--"];
            args.extend(files.iter().map(String::as_str));
            self.run(&args).await?;
        }
        self.run(&["commit", "-m", message]).await?;
        let head = self.run(&["rev-parse", "HEAD"]).await?;
        let hash = head.trim().to_string();
        if hash.is_empty() {
            warn!("git rev-parse returned no hash after commit");
        }
        Ok(hash)
    }
}

fn validate_branch_name(name: &str) -> Result<(), EngineError> {
    let invalid = name.is_empty()
        || name.starts_with('-')
        || name.contains("..")
        || name.chars().any(|c| c.is_whitespace() || c.is_control() || "~^:?*[\\".contains(c));
    if invalid {
        return Err(EngineError::Vcs(format!("invalid branch name: {name:?}")));
    }
    Ok(())
}

fn is_commit_hash(hash: &str) -> bool {
    (4..=64).contains(&hash.len()) && hash.chars().all(|c| c.is_ascii_hexdigit())
}

/// Parse `git log --name-only` output written with [`LOG_FORMAT`].
///
/// Each record is a header line followed by the touched paths. Malformed
/// records are skipped.
pub fn parse_log(output: &str) -> Vec<Commit> {
    output
        .split(RECORD_SEP)
        .filter_map(|record| {
            let mut lines = record.lines();
            let mut parts = lines.next()?.splitn(4, FIELD_SEP);
            let hash = parts.next()?.trim();
            let author = parts.next()?;
            let date = parts.next()?;
            let message = parts.next()?;
            if hash.is_empty() {
                return None;
            }
            Some(Commit {
                hash: hash.to_string(),
                author: author.to_string(),
                date: date.to_string(),
                message: message.to_string(),
                files: lines
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(String::from)
                    .collect(),
            })
        })
        .collect()
}

/// Paths from `git status --porcelain`. Renames report the destination.
pub fn parse_porcelain(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.get(3..))
        .filter(|path| !path.is_empty())
        .map(|path| {
            let path = path.rsplit(" -> ").next().unwrap_or(path);
            path.trim_matches('"').to_string()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_log_records_with_files() {
        let out = "\u{1e}abc1234def\u{1f}Ada\u{1f}2026-01-02T03:04:05+00:00\u{1f}fix: auth token refresh\n\n\
                   src/auth.rs\nsrc/token.rs\n\
                   \u{1e}9876fed\u{1f}Grace\u{1f}2026-01-01T00:00:00+00:00\u{1f}feat: add parser\u{1f}with sep\n\
                   \u{1e}garbage record\n";
        let commits = parse_log(out);
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].author, "Ada");
        assert_eq!(commits[0].message, "fix: auth token refresh");
        assert_eq!(commits[0].oneline(), "abc1234 fix: auth token refresh");
        assert_eq!(commits[0].files, vec!["src/auth.rs", "src/token.rs"]);
        assert_eq!(commits[1].message, "feat: add parser\u{1f}with sep");
        assert!(commits[1].files.is_empty());
    }

    #[test]
    fn only_hex_hashes_reach_git() {
        assert!(is_commit_hash("1a2b3c4"));
        assert!(!is_commit_hash("--output=x"));
        assert!(!is_commit_hash("HEAD"));
        assert!(!is_commit_hash("abc"));
    }

    #[test]
    fn parses_porcelain_status() {
        let out = " M src/lib.rs\n?? notes/new.md\nR  old.rs -> src/new.rs\nA  \"with space.rs\"\n";
        assert_eq!(
            parse_porcelain(out),
            vec!["src/lib.rs", "notes/new.md", "src/new.rs", "with space.rs"]
        );
    }

    #[test]
    fn rejects_bad_branch_names() {
        assert!(validate_branch_name("feature/login").is_ok());
        assert!(validate_branch_name("").is_err());
        assert!(validate_branch_name("-x").is_err());
        assert!(validate_branch_name("a b").is_err());
        assert!(validate_branch_name("a..b").is_err());
    }

    #[tokio::test]
    async fn outside_a_repository_reads_degrade() {
        let dir = tempfile::tempdir().unwrap();
        let git = GitCli::new(dir.path()).with_timeout(Duration::from_secs(5));
        assert_eq!(git.current_branch().await, UNKNOWN_BRANCH);
        assert!(git.recent_commits(10).await.is_empty());
        assert!(git.uncommitted_changes().await.is_empty());
        assert!(git.diff().await.is_empty());
        assert!(git.show_commit("1a2b3c4").await.is_none());
        assert!(git.commit_diff("1a2b3c4").await.is_empty());
    }

    #[tokio::test]
    async fn reads_commit_files_and_patch() {
        let dir = tempfile::tempdir().unwrap();
        let git = GitCli::new(dir.path()).with_timeout(Duration::from_secs(10));
        let setup = [
            vec!["init", "-q"],
            vec!["config", "user.email", "dev@example.com"],
            vec!["config", "user.name", "Dev"],
            vec!["config", "commit.gpgsign", "false"],
        ];
        for args in &setup {
            if git.run(args).await.is_err() {
                // No usable git on this machine.
                return;
            }
        }
        std::fs::write(dir.path().join("auth.rs"), "fn login() {}\n").unwrap();
        let hash = git.commit("add login", &["auth.rs".to_string()]).await.unwrap();

        let commit = git.show_commit(&hash).await.unwrap();
        assert_eq!(commit.message, "add login");
        assert_eq!(commit.files, vec!["auth.rs"]);
        assert_eq!(git.recent_commits(5).await[0].files, vec!["auth.rs"]);
        assert!(git.commit_diff(&hash).await.contains("+fn login() {}"));
    }

    #[tokio::test]
    async fn writes_fail_outside_a_repository() {
        let dir = tempfile::tempdir().unwrap();
        let git = GitCli::new(dir.path());
        assert!(matches!(git.create_branch("topic").await, Err(EngineError::Vcs(_))));
        assert!(matches!(git.commit("", &[]).await, Err(EngineError::Vcs(_))));
    }
}
