//! Progress display for installs
//!
//! One spinner is shared between the progress callback (stage and step
//! transitions) and the [`SystemRunner`](crate::runner::SystemRunner)
//! (heartbeats of long commands). Finished stages are printed above it.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use provision::{ProgressCallback, StageOutcome, StepState};
use std::time::Duration;

/// Spinner for a stage run, hidden when quiet
pub fn spinner(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{pos}/{len}] {prefix:.bold} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// Reports stage and step transitions on a shared spinner
pub struct StageProgress {
    pb: ProgressBar,
    total_stages: usize,
    stage_num: usize,
}

impl StageProgress {
    pub fn new(pb: ProgressBar, total_stages: usize) -> Self {
        Self {
            pb,
            total_stages,
            stage_num: 0,
        }
    }

    fn line(&self, mark: colored::ColoredString, stage: &str, detail: &str) {
        self.pb.suspend(|| {
            println!(
                "{} {} {} {}",
                format!("[{}/{}]", self.stage_num, self.total_stages)
                    .blue()
                    .bold(),
                mark,
                stage,
                detail.dimmed()
            );
        });
    }
}

impl ProgressCallback for StageProgress {
    fn on_stage_start(&mut self, stage: &str, steps: usize) {
        self.stage_num += 1;
        self.pb.reset();
        self.pb.set_length(steps as u64);
        self.pb.set_prefix(stage.to_string());
        self.pb.set_message("");
    }

    fn on_step_start(&mut self, _stage: &str, step: &str) {
        self.pb.set_message(step.to_string());
    }

    fn on_step_complete(&mut self, _stage: &str, step: &str, state: StepState) {
        log::debug!("step '{step}' {state}");
        self.pb.inc(1);
    }

    fn on_stage_complete(&mut self, stage: &str, outcome: &StageOutcome) {
        match outcome {
            StageOutcome::AlreadyCompleted => {
                self.stage_num += 1;
                self.line("✓".dimmed(), stage, "(already completed)");
            }
            StageOutcome::Completed { executed, skipped } => {
                let detail = format!("({executed} run, {skipped} already satisfied)");
                self.line("✓".green(), stage, &detail);
            }
            StageOutcome::Planned {
                would_run,
                satisfied,
            } => {
                let detail = format!("({would_run} would run, {satisfied} already satisfied)");
                self.line("○".yellow(), stage, &detail);
            }
        }
    }

    fn on_stage_failed(&mut self, stage: &str, error: &str) {
        log::debug!("stage '{stage}' failed: {error}");
        self.line("✗".red(), stage, "(failed)");
    }
}

impl Drop for StageProgress {
    fn drop(&mut self) {
        self.pb.finish_and_clear();
    }
}
