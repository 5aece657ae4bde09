//! Source-control snapshot capture for run reproducibility.

use std::path::Path;
use std::process::Command;

use crate::domain::error::{Result, RunlogError};

/// Captured source-control state: current branch, short revision id, and
/// working-tree diff text (empty when the tree is clean).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSnapshot {
    pub branch: String,
    pub short_revision: String,
    pub diff: String,
}

/// Capability for capturing a [`SourceSnapshot`] from a repository path.
///
/// Injected into the session so the lifecycle logic is testable without a
/// real source-control repository present.
pub trait SnapshotSource {
    fn capture(&self, repo_dir: &Path) -> Result<SourceSnapshot>;
}

/// Production snapshot source backed by the `git` binary.
///
/// Runs three independent queries against the repository. Returns an error
/// if the directory is not inside a git repository or if git is not
/// available; failures are never suppressed or defaulted.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitSnapshotSource;

impl GitSnapshotSource {
    fn git_output(repo_dir: &Path, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .arg("-C")
            .arg(repo_dir)
            .args(args)
            .output()
            .map_err(|e| RunlogError::Snapshot(format!("failed to run git: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RunlogError::Snapshot(format!(
                "git {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }

        String::from_utf8(output.stdout)
            .map_err(|e| RunlogError::Snapshot(format!("git {} output not UTF-8: {e}", args.join(" "))))
    }
}

impl SnapshotSource for GitSnapshotSource {
    fn capture(&self, repo_dir: &Path) -> Result<SourceSnapshot> {
        let branch = Self::git_output(repo_dir, &["rev-parse", "--abbrev-ref", "HEAD"])?
            .trim()
            .to_string();
        let short_revision = Self::git_output(repo_dir, &["describe", "--always"])?
            .trim()
            .to_string();
        // diff is not trimmed: patch text is applied verbatim
        let diff = Self::git_output(repo_dir, &["diff"])?;
        Ok(SourceSnapshot {
            branch,
            short_revision,
            diff,
        })
    }
}

/// Check whether a directory is inside a git work tree.
pub fn is_git_repo(dir: &Path) -> bool {
    Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(["rev-parse", "--is-inside-work-tree"])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}
