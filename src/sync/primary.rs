use git2::Repository;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::outcome::StageOutcome;
use crate::error::{Result, SyncError};
use crate::git::{
    PushFailure, RepoState, commit_tree, needs_push, push_branch, remote_url, set_upstream,
    stage_all, upstream_of,
};

/// Commit and push the source repository.
///
/// Returns `(commit outcome, push outcome)`. Failures before a commit exists
/// are returned as `Err`; a push failure is returned as a
/// [`StageOutcome::Failed`] push outcome so the commit is still reported.
///
/// `keep_out` lists paths that must never be committed to the source (a
/// mirror directory nested in the tree, the configuration file). Entries
/// outside the working tree are ignored.
///
/// The push authenticates through the ssh agent or git's credential helper.
///
/// # Errors
/// Returns [`SyncError::Git`] when the repository cannot be opened, staged
/// or committed.
pub fn push_primary(
    state: &RepoState,
    message: &str,
    keep_out: &[PathBuf],
) -> Result<(StageOutcome, StageOutcome)> {
    let repo =
        Repository::open(&state.root).map_err(|e| SyncError::git("open", &state.root, e))?;
    let skip = inside_root(&state.root, keep_out);
    let committed = commit_all(&repo, &state.root, message, &skip)?;
    let pushed = push_current(&repo, state).unwrap_or_else(StageOutcome::Failed);
    Ok((committed, pushed))
}

/// `paths` rewritten relative to `root`, dropping those outside it.
fn inside_root(root: &Path, paths: &[PathBuf]) -> Vec<PathBuf> {
    let real_root = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    paths
        .iter()
        .filter_map(|p| {
            if let Ok(rel) = p.strip_prefix(root) {
                return Some(rel.to_path_buf());
            }
            let real = fs::canonicalize(p).ok()?;
            real.strip_prefix(&real_root).ok().map(Path::to_path_buf)
        })
        .filter(|rel| !rel.as_os_str().is_empty())
        .collect()
}

/// Stage everything except `skip` and commit it with `message`. Never
/// creates an empty commit.
pub(super) fn commit_all(
    repo: &Repository,
    root: &Path,
    message: &str,
    skip: &[PathBuf],
) -> Result<StageOutcome> {
    let Some(tree) = stage_all(repo, skip).map_err(|e| SyncError::git("add", root, e))? else {
        debug!(root = %root.display(), "nothing to commit");
        return Ok(StageOutcome::NoOp);
    };
    let id = commit_tree(repo, tree, message).map_err(|e| SyncError::git("commit", root, e))?;
    info!(root = %root.display(), commit = %id, "committed");
    Ok(StageOutcome::Committed { id: id.to_string() })
}

fn push_current(repo: &Repository, state: &RepoState) -> Result<StageOutcome> {
    let branch = state.branch.as_str();
    let (remote, remote_branch, tracked) = match upstream_of(repo, branch) {
        Some((r, b)) => (r, b, true),
        None => ("origin".to_string(), branch.to_string(), false),
    };

    let url = remote_url(repo, &remote).map_err(|e| SyncError::git("read remote", &state.root, e))?;
    if url.is_none() {
        return Err(SyncError::Push {
            remote: remote.clone(),
            branch: branch.to_string(),
            reason: "remote is not configured".to_string(),
            remediation: format!(
                "add the primary remote (git remote add {} <url>) or set an upstream for {}",
                remote, branch
            ),
        });
    }

    // Re-drives a push that failed on an earlier run.
    let ahead = needs_push(repo, branch, &remote, &remote_branch)
        .map_err(|e| SyncError::git("compare with remote", &state.root, e))?;
    if !ahead {
        debug!(remote = %remote, branch, "primary already up to date");
        return Ok(StageOutcome::NoOp);
    }

    push_branch(repo, &remote, branch, &remote_branch, None)
        .map_err(|f| push_error(&remote, branch, f))?;
    if !tracked {
        set_upstream(repo, branch, &remote, &remote_branch)
            .map_err(|e| SyncError::git("set upstream", &state.root, e))?;
    }
    info!(remote = %remote, branch = %remote_branch, "pushed primary");
    Ok(StageOutcome::Pushed {
        remote,
        branch: remote_branch,
    })
}

fn push_error(remote: &str, branch: &str, failure: PushFailure) -> SyncError {
    let remediation = match &failure {
        PushFailure::Rejected(_) => format!(
            "{} has commits that are not in the local branch; integrate them manually \
             (git pull --rebase {} {}) and re-run. No force push is attempted",
            remote, remote, branch
        ),
        PushFailure::Auth(_) => {
            "check the credentials for the primary remote (ssh agent or git credential helper)"
                .to_string()
        }
        PushFailure::Transport(_) => format!(
            "check that {} is reachable and the repository exists, then re-run",
            remote
        ),
    };
    SyncError::Push {
        remote: remote.to_string(),
        branch: branch.to_string(),
        reason: failure.to_string(),
        remediation,
    }
}
