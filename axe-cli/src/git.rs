//! Thin git wrapper for auto-commit and undo.

use std::path::Path;
use tokio::process::Command;

async fn git(dir: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

pub async fn is_repo(dir: &Path) -> bool {
    git(dir, &["rev-parse", "--git-dir"]).await.is_some()
}

pub async fn has_changes(dir: &Path) -> bool {
    git(dir, &["status", "--porcelain"])
        .await
        .is_some_and(|out| !out.is_empty())
}

pub async fn has_commits(dir: &Path) -> bool {
    git(dir, &["rev-parse", "HEAD"]).await.is_some()
}

/// Stage everything and commit with a summary-derived message; returns the
/// short hash.
pub async fn auto_commit(dir: &Path, summary: &str) -> Option<String> {
    git(dir, &["add", "-A"]).await?;
    let summary: String = summary.chars().take(50).collect();
    git(dir, &["commit", "-m", &format!("axe: {summary}")]).await?;
    git(dir, &["rev-parse", "--short", "HEAD"]).await
}

/// Drop the last commit, keeping its changes unstaged.
pub async fn undo(dir: &Path) -> Option<String> {
    let subject = git(dir, &["log", "-1", "--format=%h %s"]).await?;
    git(dir, &["reset", "--mixed", "HEAD~1"]).await?;
    Some(subject)
}
