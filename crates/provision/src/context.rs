//! Collaborator traits
//!
//! These traits keep the engine free of process spawning, terminal UI and
//! prompting. The binary supplies real implementations; tests supply
//! scripted ones.

use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::confirm::{Confirmation, ConfirmationToken};
use crate::disk::PlanSummary;
use crate::types::{CommandOutput, CommandSpec, RunLimits, StageOutcome, StepState};

/// Runs external commands on behalf of the engine
///
/// Implementations capture stdout and stderr, feed `spec.stdin` if set,
/// kill the process when `limits.timeout` elapses (reporting
/// `timed_out`), and report liveness every `limits.heartbeat` while the
/// command runs. An `Err` means the command could not be run at all.
pub trait CommandRunner {
    fn run(&self, spec: &CommandSpec, limits: &RunLimits) -> Result<CommandOutput>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, spec: &CommandSpec, limits: &RunLimits) -> Result<CommandOutput> {
        (**self).run(spec, limits)
    }
}

/// Supplies consent for irreversible actions
///
/// The only interactive component. Called at most once per run, before the
/// first irreversible stage, and only when no valid token is at hand.
pub trait ConfirmationGate {
    fn request_confirmation(&mut self, summary: &PlanSummary) -> Result<Confirmation>;
}

/// Gate that approves every plan (`--yes`)
pub struct AutoApprove;

impl ConfirmationGate for AutoApprove {
    fn request_confirmation(&mut self, summary: &PlanSummary) -> Result<Confirmation> {
        Ok(Confirmation::Granted(ConfirmationToken::issue(summary)))
    }
}

/// Gate that denies every plan
pub struct AutoDeny;

impl ConfirmationGate for AutoDeny {
    fn request_confirmation(&mut self, _summary: &PlanSummary) -> Result<Confirmation> {
        Ok(Confirmation::Denied)
    }
}

/// Progress callback for execution
///
/// Implement this trait to receive stage and step transitions.
pub trait ProgressCallback {
    /// Called when a stage starts running
    fn on_stage_start(&mut self, stage: &str, steps: usize);

    /// Called before a step's pre-check
    fn on_step_start(&mut self, stage: &str, step: &str);

    /// Called with the step's final state
    fn on_step_complete(&mut self, stage: &str, step: &str, state: StepState);

    /// Called when a stage finishes successfully
    fn on_stage_complete(&mut self, stage: &str, outcome: &StageOutcome);

    /// Called when a stage halts with an error
    fn on_stage_failed(&mut self, _stage: &str, _error: &str) {}
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_stage_start(&mut self, _stage: &str, _steps: usize) {}
    fn on_step_start(&mut self, _stage: &str, _step: &str) {}
    fn on_step_complete(&mut self, _stage: &str, _step: &str, _state: StepState) {}
    fn on_stage_complete(&mut self, _stage: &str, _outcome: &StageOutcome) {}
}

/// Cooperative cancellation flag
///
/// Raised from a signal handler; the executor polls it before each stage
/// and between steps, never while a command runs.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared flag, for registering with a signal handler
    pub fn handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::{DiskIntent, DiskPlan, Firmware};

    #[test]
    fn test_auto_gates() {
        let intent = DiskIntent::new("/dev/sda", Firmware::Uefi);
        let plan = DiskPlan::from_intent(&intent, 8192).unwrap();
        let summary = plan.summary();

        let granted = AutoApprove.request_confirmation(&summary).unwrap();
        let token = granted.into_token().unwrap();
        assert!(token.authorizes(&plan.digest()));

        let denied = AutoDeny.request_confirmation(&summary).unwrap();
        assert_eq!(denied, Confirmation::Denied);
    }

    #[test]
    fn test_cancel_flag_shared() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());
        flag.handle().store(true, Ordering::SeqCst);
        assert!(clone.is_cancelled());
    }
}
