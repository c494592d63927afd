mod mirror;
mod outcome;
mod primary;
mod progress;
mod reconcile;

use chrono::Local;
use git2::Repository;
use indicatif::ProgressBar;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::{self, ConfigError, EXCLUDE_KEY, Overrides, Settings};
use crate::error::{Result, SyncError};
use crate::git::{RepoState, identity, inspect};

pub use mirror::{MirrorTarget, push_mirror};
pub use outcome::{PipelineOutcome, Stage, StageOutcome};
pub use primary::push_primary;
pub use reconcile::{ExcludeSet, ReconcileReport, reconcile};

use mirror::{mirror_message, resolve_target};
use progress::Mark;

/// Everything a single `msync` invocation needs besides the environment.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Any path inside the source working tree.
    pub repo_path: PathBuf,
    /// Explicit configuration file; defaults to `.env` at the repository root.
    pub config_path: Option<PathBuf>,
    /// Commit message; defaults to [`default_message`].
    pub message: Option<String>,
    pub overrides: Overrides,
}

/// `Auto-commit <YYYY-MM-DD HH:MM:SS>` in local time.
pub fn default_message() -> String {
    format!("Auto-commit {}", Local::now().format("%Y-%m-%d %H:%M:%S"))
}

/// Resolve configuration, then run the whole pipeline.
///
/// High-level flow:
/// 1. Load the `.env` file (if any) and the process environment into
///    [`Settings`]. Any missing or invalid key stops the run here, before
///    a repository is touched.
/// 2. Hand over to [`run_pipeline`].
///
/// Never panics and never returns early without an outcome; the caller maps
/// the result to an exit status with [`PipelineOutcome::exit_code`].
pub fn cmd_sync(opts: &SyncOptions) -> PipelineOutcome {
    let explicit = opts.config_path.is_some();
    let config_path = opts
        .config_path
        .clone()
        .unwrap_or_else(|| default_config_path(&opts.repo_path));

    let settings = match config::load(&config_path, explicit, &opts.overrides) {
        Ok(s) => s,
        Err(e) => {
            let mut out = PipelineOutcome::default();
            out.record(Stage::Config, StageOutcome::Failed(e.into()));
            return out;
        }
    };

    let message = opts
        .message
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(String::from)
        .unwrap_or_else(default_message);
    run_pipeline(&settings, &opts.repo_path, &message)
}

/// `.env` at the root of the working tree containing `repo_path`, or in
/// `repo_path` itself when it is not inside one (inspection reports that).
fn default_config_path(repo_path: &Path) -> PathBuf {
    Repository::discover(repo_path)
        .ok()
        .and_then(|repo| repo.workdir().map(Path::to_path_buf))
        .unwrap_or_else(|| repo_path.to_path_buf())
        .join(".env")
}

/// Run every stage in order and record what each one did.
///
/// 1. Inspect the source repository (branch, remote, pending changes).
/// 2. Commit and push the source to its upstream, keeping a nested mirror
///    and the configuration file out of the commit.
/// 3. Reconcile the mirror working tree with the source tree.
/// 4. Commit the mirror and push it to the branch of the same name.
///
/// The first failure is recorded under its stage and ends the run; nothing
/// already pushed is rolled back. A later run picks up where this one
/// stopped.
pub fn run_pipeline(settings: &Settings, repo_path: &Path, message: &str) -> PipelineOutcome {
    let mut out = PipelineOutcome::default();
    run_stages(settings, repo_path, message, &mut out);
    out
}

fn run_stages(settings: &Settings, repo_path: &Path, message: &str, out: &mut PipelineOutcome) {
    let pb = progress::start(format!("inspecting {}", repo_path.display()));
    let state = match inspect(repo_path) {
        Ok(s) => s,
        Err(e) => return fail(&pb, out, Stage::Inspect, e),
    };
    pb.finish_and_clear();

    let mirror_dir = mirror_dir(settings, &state);
    let mut keep_out = vec![mirror_dir.clone()];
    keep_out.extend(settings.config_path.iter().cloned());

    let pb = progress::start(format!("committing {} ({})", state.name(), state.branch));
    match push_primary(&state, message, &keep_out) {
        Ok((committed, pushed)) => {
            let stop = pushed.is_failure();
            settle(&pb, "primary", &[&committed, &pushed]);
            out.record(Stage::PrimaryCommit, committed);
            out.record(Stage::PrimaryPush, pushed);
            if stop {
                return;
            }
        }
        Err(e) => return fail(&pb, out, Stage::PrimaryCommit, e),
    }

    let pb = progress::start(format!("reconciling {}", mirror_dir.display()));
    match reconcile_mirror(settings, &state, &mirror_dir) {
        Ok(report) => {
            let o = StageOutcome::Reconciled(report);
            settle(&pb, "reconcile", &[&o]);
            out.record(Stage::Reconcile, o);
        }
        Err(e) => return fail(&pb, out, Stage::Reconcile, e),
    }

    let pb = progress::start(format!("committing mirror ({})", state.branch));
    match sync_mirror(settings, &state, mirror_dir, message) {
        Ok((committed, pushed)) => {
            settle(&pb, "mirror", &[&committed, &pushed]);
            out.record(Stage::MirrorCommit, committed);
            out.record(Stage::MirrorPush, pushed);
        }
        Err(e) => fail(&pb, out, Stage::MirrorCommit, e),
    }
}

/// Configured mirror directory (relative paths are taken from the source
/// root), or `<source-parent>/<name>-mirror`.
fn mirror_dir(settings: &Settings, state: &RepoState) -> PathBuf {
    match &settings.mirror_dir {
        Some(d) if d.is_absolute() => d.clone(),
        Some(d) => state.root.join(d),
        None => {
            let parent = state.root.parent().unwrap_or(&state.root);
            parent.join(format!("{}-mirror", state.name()))
        }
    }
}

fn reconcile_mirror(settings: &Settings, state: &RepoState, mirror_dir: &Path) -> Result<ReconcileReport> {
    let mut excludes = ExcludeSet::new(&settings.policy.exclude_patterns).map_err(|e| {
        SyncError::from(ConfigError {
            invalid: vec![format!("{}: {}", EXCLUDE_KEY, e)],
            ..ConfigError::default()
        })
    })?;
    if let Some(p) = &settings.config_path {
        excludes.exclude_path(&state.root, p);
    }
    let report = reconcile(
        &state.root,
        mirror_dir,
        &excludes,
        settings.policy.delete_on_reconcile,
    )?;
    info!(
        copied = report.copied,
        unchanged = report.unchanged,
        removed = report.removed,
        "mirror tree reconciled"
    );
    Ok(report)
}

fn sync_mirror(
    settings: &Settings,
    state: &RepoState,
    mirror_dir: PathBuf,
    message: &str,
) -> Result<(StageOutcome, StageOutcome)> {
    let repo_name = settings.repo_name.clone().unwrap_or_else(|| state.name());
    let target = resolve_target(mirror_dir, &state.branch, settings, &repo_name)?;
    let source_identity = match Repository::open(&state.root) {
        Ok(repo) => identity(&repo),
        Err(e) => {
            warn!(error = %e, "could not read source identity");
            None
        }
    };
    push_mirror(
        &target,
        &settings.policy,
        settings.credential.as_ref(),
        source_identity,
        &mirror_message(&settings.primary_label, message),
    )
}

fn fail(pb: &ProgressBar, out: &mut PipelineOutcome, stage: Stage, err: SyncError) {
    progress::finish(pb, Mark::Failed, format!("{} (error: {})", stage, err));
    out.record(stage, StageOutcome::Failed(err));
}

fn settle(pb: &ProgressBar, label: &str, outcomes: &[&StageOutcome]) {
    let mark = if outcomes.iter().any(|o| o.is_failure()) {
        Mark::Failed
    } else if outcomes
        .iter()
        .any(|o| matches!(o, StageOutcome::AwaitingRemoteSetup { .. }))
    {
        Mark::Attention
    } else {
        Mark::Done
    };
    let parts: Vec<String> = outcomes.iter().map(|o| o.describe()).collect();
    progress::finish(pb, mark, format!("{}: {}", label, parts.join(", ")));
}
