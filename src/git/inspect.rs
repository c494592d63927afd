use git2::Repository;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::git2_backend::{has_changes, head_branch, remote_url, upstream_of};
use crate::error::{Result, SyncError};

/// Snapshot of a working tree taken at the start of a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoState {
    /// Working-tree root of the nearest enclosing repository.
    pub root: PathBuf,
    /// URL of the branch's upstream remote (or `origin`), if any.
    pub remote_url: Option<String>,
    /// Never empty.
    pub branch: String,
    /// Anything staged, modified or untracked relative to HEAD.
    pub has_changes: bool,
}

impl RepoState {
    /// Last component of the root, used as the default mirror repository name.
    pub fn name(&self) -> String {
        self.root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "repository".to_string())
    }
}

/// Inspect the repository enclosing `path`.
///
/// # Errors
/// - [`SyncError::RepoState`] if `path` is not inside a repository, the
///   repository is bare, or HEAD is detached.
/// - [`SyncError::Git`] if reading the status fails.
pub fn inspect(path: &Path) -> Result<RepoState> {
    let repo = Repository::discover(path).map_err(|e| {
        SyncError::repo_state(path, format!("not inside a git repository ({})", e.message()))
    })?;
    let root = repo
        .workdir()
        .ok_or_else(|| SyncError::repo_state(path, "bare repository has no working tree"))?
        .to_path_buf();

    let branch = head_branch(&repo)
        .map_err(|e| SyncError::git("read HEAD", &root, e))?
        .ok_or_else(|| {
            SyncError::repo_state(&root, "HEAD is detached; check out a named branch first")
        })?;

    let remote = upstream_of(&repo, &branch)
        .map(|(r, _)| r)
        .unwrap_or_else(|| "origin".to_string());
    let remote_url = remote_url(&repo, &remote).map_err(|e| SyncError::git("read remote", &root, e))?;
    let has_changes = has_changes(&repo).map_err(|e| SyncError::git("status", &root, e))?;

    debug!(root = %root.display(), branch = %branch, has_changes, "inspected repository");
    Ok(RepoState {
        root,
        remote_url,
        branch,
        has_changes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::git2_backend::{commit_tree, open_or_init, stage_all};
    use std::fs;
    use tempfile::tempdir;

    fn repo_with_commit(dir: &Path) -> Repository {
        let (repo, _) = open_or_init(dir, Some("main")).unwrap();
        {
            let mut cfg = repo.config().unwrap();
            cfg.set_str("user.name", "Test").unwrap();
            cfg.set_str("user.email", "test@example.com").unwrap();
        }
        fs::write(dir.join("README.md"), "# x").unwrap();
        let tree = stage_all(&repo, &[]).unwrap().unwrap();
        commit_tree(&repo, tree, "init").unwrap();
        repo
    }

    #[test]
    fn finds_root_from_subdirectory() {
        let td = tempdir().unwrap();
        let _repo = repo_with_commit(td.path());
        let sub = td.path().join("a").join("b");
        fs::create_dir_all(&sub).unwrap();

        let st = inspect(&sub).unwrap();
        assert_eq!(
            fs::canonicalize(&st.root).unwrap(),
            fs::canonicalize(td.path()).unwrap()
        );
        assert_eq!(st.branch, "main");
        assert!(!st.has_changes);
        assert_eq!(st.remote_url, None);
    }

    #[test]
    fn untracked_file_counts_as_change() {
        let td = tempdir().unwrap();
        let _repo = repo_with_commit(td.path());
        fs::write(td.path().join("new.txt"), "n").unwrap();
        assert!(inspect(td.path()).unwrap().has_changes);
    }

    #[test]
    fn reports_origin_url() {
        let td = tempdir().unwrap();
        let repo = repo_with_commit(td.path());
        repo.remote("origin", "https://gitea.example/me/site.git").unwrap();
        assert_eq!(
            inspect(td.path()).unwrap().remote_url.as_deref(),
            Some("https://gitea.example/me/site.git")
        );
    }

    #[test]
    fn outside_a_repository_is_a_repo_state_error() {
        let td = tempdir().unwrap();
        let err = inspect(td.path()).unwrap_err();
        assert!(matches!(err, SyncError::RepoState { .. }), "got {:?}", err);
    }

    #[test]
    fn detached_head_is_a_repo_state_error() {
        let td = tempdir().unwrap();
        let repo = repo_with_commit(td.path());
        let id = repo.head().unwrap().target().unwrap();
        repo.set_head_detached(id).unwrap();
        let err = inspect(td.path()).unwrap_err();
        assert!(err.to_string().contains("detached"));
    }

    #[test]
    fn name_is_the_root_directory_name() {
        let st = RepoState {
            root: PathBuf::from("/srv/site/"),
            remote_url: None,
            branch: "main".into(),
            has_changes: false,
        };
        assert_eq!(st.name(), "site");
    }
}
