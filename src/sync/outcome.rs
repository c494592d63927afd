use colored::Colorize;
use std::fmt;

use super::reconcile::ReconcileReport;
use crate::error::SyncError;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Config,
    Inspect,
    PrimaryCommit,
    PrimaryPush,
    Reconcile,
    MirrorCommit,
    MirrorPush,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Config => "config",
            Stage::Inspect => "inspect",
            Stage::PrimaryCommit => "primary commit",
            Stage::PrimaryPush => "primary push",
            Stage::Reconcile => "reconcile",
            Stage::MirrorCommit => "mirror commit",
            Stage::MirrorPush => "mirror push",
        })
    }
}

/// Result of a single stage.
#[derive(Debug)]
pub enum StageOutcome {
    /// Nothing to commit, or nothing to push.
    NoOp,
    Committed { id: String },
    Pushed { remote: String, branch: String },
    Reconciled(ReconcileReport),
    /// The mirror commit exists locally but there is no remote to push to.
    AwaitingRemoteSetup { command: String },
    Failed(SyncError),
}

impl StageOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, StageOutcome::Failed(_))
    }

    /// One-line description without stage name or colour.
    pub fn describe(&self) -> String {
        match self {
            StageOutcome::NoOp => "nothing to do".to_string(),
            StageOutcome::Committed { id } => format!("committed {}", short(id)),
            StageOutcome::Pushed { remote, branch } => format!("pushed {} to {}", branch, remote),
            StageOutcome::Reconciled(r) => format!(
                "{} copied, {} unchanged, {} removed",
                r.copied, r.unchanged, r.removed
            ),
            StageOutcome::AwaitingRemoteSetup { .. } => {
                "committed locally; mirror remote not configured yet".to_string()
            }
            StageOutcome::Failed(e) => e.to_string(),
        }
    }
}

fn short(id: &str) -> &str {
    id.get(..7).unwrap_or(id)
}

/// Ordered per-stage results of one run.
///
/// This is the only place that decides the process exit status.
#[derive(Debug, Default)]
pub struct PipelineOutcome {
    stages: Vec<(Stage, StageOutcome)>,
}

impl PipelineOutcome {
    pub fn record(&mut self, stage: Stage, outcome: StageOutcome) {
        self.stages.push((stage, outcome));
    }

    pub fn stages(&self) -> &[(Stage, StageOutcome)] {
        &self.stages
    }

    /// Latest outcome recorded for `stage`.
    pub fn get(&self, stage: Stage) -> Option<&StageOutcome> {
        self.stages
            .iter()
            .rev()
            .find(|(s, _)| *s == stage)
            .map(|(_, o)| o)
    }

    pub fn failure(&self) -> Option<(Stage, &SyncError)> {
        self.stages.iter().find_map(|(s, o)| match o {
            StageOutcome::Failed(e) => Some((*s, e)),
            _ => None,
        })
    }

    /// `1` if any stage failed, otherwise `0`.
    pub fn exit_code(&self) -> u8 {
        if self.failure().is_some() { 1 } else { 0 }
    }

    /// Plain-text report: one line per stage, then remediation or setup
    /// instructions when there are any.
    pub fn summary(&self) -> String {
        let mut lines: Vec<String> = self
            .stages
            .iter()
            .map(|(s, o)| format!("{}: {}", s, o.describe()))
            .collect();
        for (_, o) in &self.stages {
            match o {
                StageOutcome::AwaitingRemoteSetup { command } => {
                    lines.push("add the mirror remote once, then re-run:".to_string());
                    lines.push(format!("  {}", command));
                }
                StageOutcome::Failed(e) => {
                    if let Some(hint) = e.remediation() {
                        lines.push(format!("hint: {}", hint));
                    }
                }
                _ => {}
            }
        }
        lines.join("\n")
    }

    /// Print the final report to stderr with colours.
    ///
    /// Per-stage lines are skipped when `with_stages` is false (the
    /// spinners already left them on screen).
    pub fn print(&self, with_stages: bool) {
        if with_stages {
            for (s, o) in &self.stages {
                let line = format!("{}: {}", s, o.describe());
                match o {
                    StageOutcome::Failed(_) => eprintln!("{} {}", "✘".red(), line.red()),
                    StageOutcome::AwaitingRemoteSetup { .. } => {
                        eprintln!("{} {}", "!".yellow(), line.yellow())
                    }
                    _ => eprintln!("{} {}", "✔".green(), line),
                }
            }
        }
        for (_, o) in &self.stages {
            if let StageOutcome::AwaitingRemoteSetup { command } = o {
                eprintln!("add the mirror remote once, then re-run:");
                eprintln!("  {}", command.bold());
            }
        }
        if let Some((stage, e)) = self.failure() {
            eprintln!("{} {} failed", "error:".red().bold(), stage);
            if let Some(hint) = e.remediation() {
                eprintln!("{} {}", "hint:".yellow().bold(), hint);
            }
        }
    }
}
