use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;

/// Every fatal condition a sync run can hit.
///
/// Non-fatal results (nothing to commit, mirror remote not configured yet)
/// are not errors; they are reported as [`crate::StageOutcome`] values.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid repository state at {}: {reason}", .path.display())]
    RepoState { path: PathBuf, reason: String },

    #[error("reconciliation failed at {}: {source}", .path.display())]
    Reconcile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("push to {remote} ({branch}) failed: {reason}")]
    Push {
        remote: String,
        branch: String,
        reason: String,
        remediation: String,
    },

    #[error("git {action} failed in {}: {source}", .path.display())]
    Git {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: git2::Error,
    },
}

impl SyncError {
    pub(crate) fn repo_state(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        SyncError::RepoState {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn reconcile(path: impl Into<PathBuf>, source: impl Into<io::Error>) -> Self {
        SyncError::Reconcile {
            path: path.into(),
            source: source.into(),
        }
    }

    pub(crate) fn git(action: &'static str, path: impl Into<PathBuf>, source: git2::Error) -> Self {
        SyncError::Git {
            action,
            path: path.into(),
            source,
        }
    }

    /// Actionable hint shown below the error line.
    pub fn remediation(&self) -> Option<&str> {
        match self {
            SyncError::Config(_) => {
                Some("set the missing keys in the .env file or the environment, then re-run")
            }
            SyncError::RepoState { .. } => Some(
                "run from inside a git working tree with a branch checked out (git switch <branch>)",
            ),
            SyncError::Reconcile { .. } => {
                Some("nothing was committed to the mirror; fix the file access problem and re-run")
            }
            SyncError::Push { remediation, .. } => Some(remediation.as_str()),
            SyncError::Git { .. } => None,
        }
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
