//! Git integration layer.
//!
//! This module wraps the backend implementation (`git2_backend`, based on
//! the `git2` crate) and the repository inspector, and re-exports the
//! operations the sync stages need. Other modules should go through these
//! re-exports instead of depending on `git2_backend` directly.

mod git2_backend;
mod inspect;

pub use git2_backend::{
    PushFailure, commit_tree, ensure_identity, head_branch, head_commit, identity, needs_push,
    open_or_init, point_unborn_head, push_branch, redact_url, remote_url, set_upstream,
    stage_all, switch_branch, upsert_remote, upstream_of,
};
pub use inspect::{RepoState, inspect};
