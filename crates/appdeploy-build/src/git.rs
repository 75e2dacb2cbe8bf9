use std::path::Path;
use std::process::Command;

use appdeploy_core::{RepoState, RevisionProbe};

/// Reads repository state by shelling out to `git`.
#[derive(Debug, Default, Clone, Copy)]
pub struct GitProbe;

impl GitProbe {
    /// Whether `dir` lives inside a git working tree.
    pub fn is_repository(&self, dir: &Path) -> bool {
        git(dir, &["rev-parse", "--is-inside-work-tree"])
            .map(|out| out.trim() == "true")
            .unwrap_or(false)
    }

    /// Short hash of HEAD.
    pub fn head_revision(&self, dir: &Path) -> Result<String, GitError> {
        git(dir, &["rev-parse", "--short", "HEAD"]).map(|out| out.trim().to_owned())
    }

    /// Full hash of HEAD.
    pub fn head_revision_full(&self, dir: &Path) -> Result<String, GitError> {
        git(dir, &["rev-parse", "HEAD"]).map(|out| out.trim().to_owned())
    }

    /// Checks whether the working tree has uncommitted changes.
    pub fn is_dirty(&self, dir: &Path) -> Result<bool, GitError> {
        git(dir, &["status", "--porcelain"]).map(|out| !out.trim().is_empty())
    }

    /// URL of the `origin` remote, or of the first remote when there is no origin.
    pub fn remote_url(&self, dir: &Path) -> Result<Option<String>, GitError> {
        if let Ok(url) = git(dir, &["remote", "get-url", "origin"]) {
            return Ok(Some(url.trim().to_owned()));
        }
        let remotes = git(dir, &["remote"])?;
        match remotes.lines().map(str::trim).find(|r| !r.is_empty()) {
            Some(name) => git(dir, &["remote", "get-url", name]).map(|u| Some(u.trim().to_owned())),
            None => Ok(None),
        }
    }
}

impl RevisionProbe for GitProbe {
    fn repo_state(&self, dir: &Path) -> RepoState {
        if !self.is_repository(dir) {
            return RepoState::NotARepository;
        }
        match self.is_dirty(dir) {
            Ok(true) => return RepoState::Dirty,
            Ok(false) => {}
            Err(e) => {
                tracing::debug!(dir = %dir.display(), error = %e, "git status failed");
                return RepoState::Unresolved;
            }
        }
        match self.head_revision(dir) {
            Ok(sha) if !sha.is_empty() => RepoState::Head(sha),
            Ok(_) => RepoState::Unresolved,
            Err(e) => {
                tracing::debug!(dir = %dir.display(), error = %e, "HEAD is not resolvable");
                RepoState::Unresolved
            }
        }
    }
}

fn git(dir: &Path, args: &[&str]) -> Result<String, GitError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(|e| GitError::Command {
            detail: format!("failed to execute git {}", args.join(" ")),
            source: e,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(GitError::Failed {
            detail: format!(
                "git {} exited with {}: {}",
                args.join(" "),
                output.status,
                stderr.trim()
            ),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("git command failed: {detail}")]
    Command {
        detail: String,
        source: std::io::Error,
    },
    #[error("git failed: {detail}")]
    Failed { detail: String },
}
