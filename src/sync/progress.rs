use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

const FRAMES: &[&str] = &["⣾", "⣽", "⣻", "⢿", "⡿", "⣟", "⣯", "⣷"];

/// How a finished stage line is marked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    Done,
    /// Succeeded, but the user has something to do (mirror remote missing).
    Attention,
    Failed,
}

impl Mark {
    fn glyph(self) -> String {
        match self {
            Mark::Done => "✔".green().to_string(),
            Mark::Attention => "!".yellow().to_string(),
            Mark::Failed => "✘".red().to_string(),
        }
    }
}

fn line_style(prefix: &str) -> ProgressStyle {
    ProgressStyle::with_template(&format!("{} {{wide_msg}}", prefix))
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Start a spinner for one stage.
pub fn start(message: impl Into<String>) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let spinning = format!("{}", "{spinner}".yellow());
    pb.set_style(line_style(&spinning).tick_strings(FRAMES));
    pb.set_message(message.into());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Replace the spinner with `mark` and leave `message` on screen.
pub fn finish(pb: &ProgressBar, mark: Mark, message: String) {
    pb.set_style(line_style(&mark.glyph()));
    pb.finish_with_message(message);
}
