//! Crate entry point for **mirrorsync (msync)**.
//!
//! This library provides the implementation behind the `msync` CLI, which
//! commits a working tree, pushes it to its primary remote, and replicates
//! the same tree into a separate mirror repository with its own history.
//! Each submodule encapsulates one responsibility (configuration, git
//! access, the sync pipeline). The `pub use` re-exports make the pipeline
//! entry points available from the crate root.
//!
//! This file is primarily intended for developers hacking on `msync`.

mod config;
mod error;
mod git;
mod sync;

/// Re-export commonly used types and commands so they can be accessed from `mirrorsync::*`.
pub use config::{
    ConfigError, Credential, CredentialSource, EnvMap, Overrides, Settings, SyncPolicy, Transport,
    load_env_file, parse_env,
};
pub use error::SyncError;
pub use git::{RepoState, inspect};
pub use sync::{
    ExcludeSet, MirrorTarget, PipelineOutcome, ReconcileReport, Stage, StageOutcome, SyncOptions,
    cmd_sync, default_message, push_mirror, push_primary, reconcile, run_pipeline,
};
