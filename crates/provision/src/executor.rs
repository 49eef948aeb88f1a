//! Stage execution with persisted progress
//!
//! [`StepExecutor`] runs stages one at a time. Each step's post-condition is
//! checked first and the command only runs when it does not already hold,
//! then the check is repeated to verify the command did what it claimed.
//! Stage and step transitions are written to the [`ProgressRecord`] as they
//! happen, so an interrupted install picks up at the first stage that is not
//! Completed.

use crate::confirm::{Confirmation, ConfirmationToken, PlanDigest};
use crate::context::{
    CancelFlag, CommandRunner, ConfirmationGate, NoProgress, ProgressCallback,
};
use crate::disk::PlanSummary;
use crate::error::{ExecError, RecordError};
use crate::graph::{Stage, StageGraph};
use crate::record::{ProgressRecord, RecordStore};
use crate::step::{CheckOutcome, Step};
use crate::types::{
    ExecuteOptions, RunLimits, RunSummary, StageOutcome, StageState, StepState,
};

/// Runs stages against a [`CommandRunner`], recording progress
pub struct StepExecutor<R: CommandRunner> {
    runner: R,
    summary: PlanSummary,
    store: Option<RecordStore>,
    record: ProgressRecord,
    token: Option<ConfirmationToken>,
    gate: Option<Box<dyn ConfirmationGate>>,
    gate_asked: bool,
    cancel: CancelFlag,
    options: ExecuteOptions,
    progress: Box<dyn ProgressCallback>,
}

impl<R: CommandRunner> StepExecutor<R> {
    /// Executor for the plan described by `summary`, with an in-memory record
    pub fn new(runner: R, summary: PlanSummary) -> Self {
        let record = ProgressRecord {
            plan_digest: Some(summary.digest.clone()),
            ..Default::default()
        };
        Self {
            runner,
            summary,
            store: None,
            record,
            token: None,
            gate: None,
            gate_asked: false,
            cancel: CancelFlag::new(),
            options: ExecuteOptions::default(),
            progress: Box::new(NoProgress),
        }
    }

    /// Load and persist progress through `store`
    pub fn with_store(mut self, store: RecordStore) -> Result<Self, RecordError> {
        let mut record = store.load()?;
        let digest = &self.summary.digest;
        if let Some(previous) = &record.plan_digest
            && previous != digest
        {
            log::warn!(
                "Progress record was written for plan {}, current plan is {}; \
                 changed stages will be re-checked",
                previous.short(),
                digest.short()
            );
        }
        record.plan_digest = Some(digest.clone());
        self.record = record;
        self.store = Some(store);
        Ok(self)
    }

    /// Use a token obtained earlier (e.g. by `rootstrap confirm`)
    pub fn with_token(mut self, token: ConfirmationToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Gate to ask when an irreversible stage has no valid token
    pub fn with_gate(mut self, gate: Box<dyn ConfirmationGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_options(mut self, options: ExecuteOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_progress(mut self, progress: Box<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn record(&self) -> &ProgressRecord {
        &self.record
    }

    pub fn plan_digest(&self) -> &PlanDigest {
        &self.summary.digest
    }

    /// Token currently held, if any
    pub fn token(&self) -> Option<&ConfirmationToken> {
        self.token.as_ref()
    }

    /// Whether `stage` is Completed under its current definition
    pub fn is_completed(&self, stage: &Stage) -> bool {
        self.record.stage(&stage.name).is_some_and(|r| {
            r.state == StageState::Completed && r.fingerprint == stage.fingerprint()
        })
    }

    /// First stage in graph order that is not Completed
    pub fn resume<'g>(&self, graph: &'g StageGraph) -> Option<&'g Stage> {
        graph.stages().iter().find(|s| !self.is_completed(s))
    }

    /// Run one stage
    ///
    /// A stage already Completed is a no-op that runs no commands, except
    /// that a [volatile](Stage::volatile) one runs its read-only checks and
    /// is run again when one no longer holds. A stage left Failed by an
    /// earlier run is refused until [`retry_failed`] or a reset clears it.
    ///
    /// [`retry_failed`]: Self::retry_failed
    pub fn run(&mut self, stage: &Stage) -> Result<StageOutcome, ExecError> {
        if self.is_completed(stage) {
            if stage.volatile && !self.still_holds(stage)? {
                log::warn!(
                    "Stage '{}' completed earlier but its effects are gone; running it again",
                    stage.name
                );
            } else {
                log::debug!("Stage '{}' already completed", stage.name);
                let outcome = StageOutcome::AlreadyCompleted;
                self.progress.on_stage_complete(&stage.name, &outcome);
                return Ok(outcome);
            }
        }

        if self.options.dry_run {
            return self.plan_stage(stage);
        }

        if let Some(record) = self.record.stage(&stage.name)
            && record.fingerprint == stage.fingerprint()
        {
            match record.state {
                StageState::Failed => {
                    return Err(ExecError::StageFailed {
                        stage: stage.name.clone(),
                        last_error: record.last_error.clone(),
                    });
                }
                StageState::Running => {
                    log::info!(
                        "Stage '{}' was interrupted; re-checking its steps",
                        stage.name
                    );
                }
                StageState::Pending | StageState::Completed => {}
            }
        }

        if self.cancel.is_cancelled() {
            return Err(ExecError::Cancelled {
                stage: stage.name.clone(),
            });
        }

        if stage.is_irreversible() {
            self.authorize(stage)?;
        }

        log::info!("Starting stage '{}' ({} steps)", stage.name, stage.steps.len());
        self.record.set_stage(stage, StageState::Running);
        self.persist()?;
        self.progress.on_stage_start(&stage.name, stage.steps.len());

        let mut executed = 0;
        let mut skipped = 0;

        for step in &stage.steps {
            if self.cancel.is_cancelled() {
                log::warn!("Cancelled during stage '{}'", stage.name);
                self.record.set_stage(stage, StageState::Pending);
                self.persist_after_error();
                let error = ExecError::Cancelled {
                    stage: stage.name.clone(),
                };
                self.progress.on_stage_failed(&stage.name, &error.to_string());
                return Err(error);
            }

            self.progress.on_step_start(&stage.name, &step.name);
            self.record
                .set_step(&stage.name, &step.name, StepState::Running);
            self.persist()?;

            match self.run_step(stage, step) {
                Ok(state) => {
                    match state {
                        StepState::Skipped => skipped += 1,
                        _ => executed += 1,
                    }
                    self.record.set_step(&stage.name, &step.name, state);
                    self.persist()?;
                    self.progress
                        .on_step_complete(&stage.name, &step.name, state);
                }
                Err(error) => {
                    log::error!("{error}");
                    self.record
                        .set_step(&stage.name, &step.name, StepState::Failed);
                    self.record.set_failed(stage, error.to_string());
                    self.persist_after_error();
                    self.progress
                        .on_step_complete(&stage.name, &step.name, StepState::Failed);
                    self.progress.on_stage_failed(&stage.name, &error.to_string());
                    return Err(error);
                }
            }
        }

        self.record.set_stage(stage, StageState::Completed);
        self.persist()?;
        log::info!(
            "Stage '{}' completed ({executed} executed, {skipped} already satisfied)",
            stage.name
        );

        let outcome = StageOutcome::Completed { executed, skipped };
        self.progress.on_stage_complete(&stage.name, &outcome);
        Ok(outcome)
    }

    /// Run every stage of `graph` in order, starting at the resume point
    ///
    /// Completed stages are skipped without running commands. When every
    /// stage completes the record is deleted.
    pub fn run_plan(&mut self, graph: &StageGraph) -> Result<RunSummary, ExecError> {
        let reset = self.record.reconcile(graph);
        if !reset.is_empty() && !self.options.dry_run {
            self.persist()?;
        }

        match self.resume(graph) {
            Some(stage) if graph.position(&stage.name) != Some(0) => {
                log::info!("Resuming at stage '{}'", stage.name);
            }
            Some(_) => {}
            None => log::info!("All stages already completed"),
        }

        let mut summary = RunSummary::default();
        for stage in graph.stages() {
            let outcome = self.run(stage)?;
            summary.add(&stage.name, &outcome);
        }

        if !self.options.dry_run {
            self.finish()?;
        }
        Ok(summary)
    }

    /// Clear a Failed stage so the next run retries it
    ///
    /// Returns whether the stage was Failed.
    pub fn retry_failed(&mut self, stage: &str) -> Result<bool, ExecError> {
        if self.record.state_of(stage) != StageState::Failed {
            return Ok(false);
        }
        log::info!("Retrying failed stage '{stage}'");
        self.record.reset_stage(stage);
        self.persist()?;
        Ok(true)
    }

    /// Clear every Failed stage; returns their names
    pub fn retry_all_failed(&mut self) -> Result<Vec<String>, ExecError> {
        let failed: Vec<String> = self
            .record
            .stages
            .iter()
            .filter(|(_, r)| r.state == StageState::Failed)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &failed {
            self.retry_failed(name)?;
        }
        Ok(failed)
    }

    /// Forget recorded progress for one stage
    pub fn reset_stage(&mut self, stage: &str) -> Result<bool, ExecError> {
        let existed = self.record.reset_stage(stage);
        self.persist()?;
        Ok(existed)
    }

    /// Forget all recorded progress
    pub fn reset(&mut self) -> Result<(), ExecError> {
        self.record = ProgressRecord {
            plan_digest: Some(self.summary.digest.clone()),
            ..Default::default()
        };
        if let Some(store) = &self.store {
            store.remove()?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), ExecError> {
        log::info!("All stages completed; removing progress record");
        if let Some(store) = &self.store {
            store.remove()?;
        }
        Ok(())
    }

    /// Ensure a token for this exact plan is held, asking the gate once
    fn authorize(&mut self, stage: &Stage) -> Result<(), ExecError> {
        let digest = &self.summary.digest;
        if self.token.as_ref().is_some_and(|t| t.authorizes(digest)) {
            return Ok(());
        }
        if let Some(token) = &self.token {
            log::warn!(
                "Confirmation token is for plan {}, not {}",
                token.plan_digest().short(),
                digest.short()
            );
        }

        if let Some(gate) = self.gate.as_mut()
            && !self.gate_asked
        {
            self.gate_asked = true;
            match gate.request_confirmation(&self.summary) {
                Ok(Confirmation::Granted(token)) if token.authorizes(digest) => {
                    log::info!("Plan {} confirmed", digest.short());
                    self.token = Some(token);
                    return Ok(());
                }
                Ok(Confirmation::Granted(_)) => {
                    log::warn!("Gate returned a token for a different plan");
                }
                Ok(Confirmation::Denied) => log::info!("Confirmation denied"),
                Err(e) => log::warn!("Could not obtain confirmation: {e:#}"),
            }
        }

        Err(ExecError::ConfirmationRequired {
            stage: stage.name.clone(),
            plan_digest: digest.to_string(),
        })
    }

    fn run_step(&self, stage: &Stage, step: &Step) -> Result<StepState, ExecError> {
        let heartbeat = self.options.heartbeat;

        if self.check(stage, step)?.is_satisfied() {
            log::debug!("Step '{}' already satisfied", step.name);
            return Ok(StepState::Skipped);
        }

        let command = step.command.to_string();
        log::info!("Running: {command}");
        let limits = RunLimits {
            timeout: step.timeout,
            heartbeat,
        };

        let output = self
            .runner
            .run(&step.command, &limits)
            .map_err(|e| ExecError::Runner {
                stage: stage.name.clone(),
                step: step.name.clone(),
                command: command.clone(),
                message: format!("{e:#}"),
            })?;

        if output.timed_out {
            return Err(ExecError::TimedOut {
                stage: stage.name.clone(),
                step: step.name.clone(),
                command,
                timeout_secs: step.timeout.map_or(0, |t| t.as_secs()),
                output: output.combined(),
            });
        }

        if !output.succeeded(&step.command) {
            return Err(ExecError::CommandFailed {
                stage: stage.name.clone(),
                step: step.name.clone(),
                command,
                exit_code: output.exit_code,
                output: output.combined(),
            });
        }

        match self.check(stage, step)? {
            CheckOutcome::Satisfied => Ok(StepState::Completed),
            CheckOutcome::Unsatisfied(detail) => Err(ExecError::VerificationFailed {
                stage: stage.name.clone(),
                step: step.name.clone(),
                command,
                detail,
                output: output.combined(),
            }),
        }
    }

    fn check(&self, stage: &Stage, step: &Step) -> Result<CheckOutcome, ExecError> {
        step.check
            .evaluate(&self.runner, self.options.heartbeat)
            .map_err(|e| ExecError::Runner {
                stage: stage.name.clone(),
                step: step.name.clone(),
                command: format!("check for '{}'", step.name),
                message: format!("{e:#}"),
            })
    }

    /// Whether every step check of a completed stage still holds
    fn still_holds(&self, stage: &Stage) -> Result<bool, ExecError> {
        for step in &stage.steps {
            if !self.check(stage, step)?.is_satisfied() {
                log::debug!("Step '{}' no longer holds", step.name);
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Dry run of one stage: evaluate checks only
    fn plan_stage(&mut self, stage: &Stage) -> Result<StageOutcome, ExecError> {
        self.progress.on_stage_start(&stage.name, stage.steps.len());
        let mut would_run = 0;
        let mut satisfied = 0;

        for step in &stage.steps {
            self.progress.on_step_start(&stage.name, &step.name);
            let state = if self.check(stage, step)?.is_satisfied() {
                satisfied += 1;
                StepState::Skipped
            } else {
                would_run += 1;
                log::info!("[dry-run] would run: {}", step.command);
                StepState::Pending
            };
            self.progress.on_step_complete(&stage.name, &step.name, state);
        }

        let outcome = StageOutcome::Planned {
            would_run,
            satisfied,
        };
        self.progress.on_stage_complete(&stage.name, &outcome);
        Ok(outcome)
    }

    fn persist(&self) -> Result<(), ExecError> {
        if self.options.dry_run {
            return Ok(());
        }
        if let Some(store) = &self.store {
            store.save(&self.record)?;
        }
        Ok(())
    }

    /// Persist while already reporting another error
    fn persist_after_error(&self) {
        if let Err(e) = self.persist() {
            log::warn!("Could not save progress record: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{AutoApprove, AutoDeny};
    use crate::disk::{DiskIntent, DiskPlan, Filesystem, Firmware, PlanSummary};
    use crate::step::PostCondition;
    use crate::testing::{ScriptedRunner, fact_holds, fact_step, set_fact};
    use crate::types::{CommandOutput, CommandSpec};

    fn summary(device: &str) -> PlanSummary {
        DiskPlan::from_intent(&DiskIntent::new(device, Firmware::Uefi), 8192)
            .unwrap()
            .summary()
    }

    fn chain(names: &[&str]) -> StageGraph {
        let mut stages = Vec::new();
        let mut previous: Option<&str> = None;
        for name in names {
            let mut stage = Stage::new(*name).step(fact_step(name));
            if let Some(prev) = previous {
                stage = stage.after(prev);
            }
            stages.push(stage);
            previous = Some(*name);
        }
        StageGraph::new(stages).unwrap()
    }

    fn store(dir: &tempfile::TempDir) -> RecordStore {
        RecordStore::new(dir.path().join("progress.toml"))
    }

    #[test]
    fn test_step_skipped_when_check_holds() {
        let runner = ScriptedRunner::new().with_fact("format");
        let graph = chain(&["format"]);
        let mut exec = StepExecutor::new(&runner, summary("/dev/sda"));

        let outcome = exec.run(&graph.stages()[0]).unwrap();
        assert_eq!(outcome, StageOutcome::Completed { executed: 0, skipped: 1 });
        assert!(runner.actions().is_empty());
    }

    #[test]
    fn test_completed_stage_issues_no_commands() {
        let runner = ScriptedRunner::new();
        let graph = chain(&["partition", "format"]);
        let mut exec = StepExecutor::new(&runner, summary("/dev/sda"));

        let stage = &graph.stages()[0];
        assert_eq!(
            exec.run(stage).unwrap(),
            StageOutcome::Completed { executed: 1, skipped: 0 }
        );
        runner.clear_calls();

        assert_eq!(exec.run(stage).unwrap(), StageOutcome::AlreadyCompleted);
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_resume_starts_after_last_completed_stage() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new()
            .respond("fact-set mount", CommandOutput::failed(32, "mount: no such device"));
        let graph = chain(&["partition", "format", "mount", "bootstrap"]);

        let mut exec = StepExecutor::new(&runner, summary("/dev/sda"))
            .with_store(store(&dir))
            .unwrap();
        let err = exec.run_plan(&graph).unwrap_err();
        assert!(matches!(
            err,
            ExecError::CommandFailed { ref stage, exit_code: Some(32), .. } if stage == "mount"
        ));
        assert!(err.marks_stage_failed());

        // A fresh executor sees the persisted record.
        let runner = ScriptedRunner::new().with_fact("partition").with_fact("format");
        let mut exec = StepExecutor::new(&runner, summary("/dev/sda"))
            .with_store(store(&dir))
            .unwrap();
        assert_eq!(exec.resume(&graph).map(|s| s.name.as_str()), Some("mount"));
        assert_eq!(exec.record().state_of("mount"), StageState::Failed);
        assert_eq!(exec.record().state_of("bootstrap"), StageState::Pending);

        let err = exec.run_plan(&graph).unwrap_err();
        assert!(matches!(err, ExecError::StageFailed { ref stage, .. } if stage == "mount"));
        assert!(runner.calls().is_empty());

        assert!(exec.retry_failed("mount").unwrap());
        let summary = exec.run_plan(&graph).unwrap();
        assert_eq!(summary.already_completed, vec!["partition", "format"]);
        assert_eq!(summary.completed, vec!["mount", "bootstrap"]);
        assert_eq!(runner.actions(), vec!["fact-set mount", "fact-set bootstrap"]);
        assert!(!store(&dir).exists());
    }

    #[test]
    fn test_token_for_other_plan_is_rejected() {
        let runner = ScriptedRunner::new();
        let stage = Stage::new("partition").step(fact_step("label").irreversible());
        let plan_a = summary("/dev/sda");
        let plan_b = summary("/dev/sdb");

        let token_a = ConfirmationToken::issue(&plan_a);
        let mut exec = StepExecutor::new(&runner, plan_b).with_token(token_a.clone());
        let err = exec.run(&stage).unwrap_err();
        assert!(matches!(err, ExecError::ConfirmationRequired { .. }));
        assert!(runner.calls().is_empty());
        assert_eq!(exec.record().state_of("partition"), StageState::Pending);

        let mut exec = StepExecutor::new(&runner, plan_a).with_token(token_a);
        assert!(exec.run(&stage).is_ok());
        assert!(runner.has_fact("label"));
    }

    #[test]
    fn test_gate_asked_once_at_irreversible_boundary() {
        let runner = ScriptedRunner::new();
        let graph = StageGraph::new(vec![
            Stage::new("preflight").step(fact_step("preflight")),
            Stage::new("partition")
                .after("preflight")
                .step(fact_step("label").irreversible()),
            Stage::new("format")
                .after("partition")
                .step(fact_step("mkfs").irreversible()),
        ])
        .unwrap();

        let mut exec =
            StepExecutor::new(&runner, summary("/dev/sda")).with_gate(Box::new(AutoDeny));
        let err = exec.run_plan(&graph).unwrap_err();
        assert!(matches!(
            err,
            ExecError::ConfirmationRequired { ref stage, .. } if stage == "partition"
        ));
        assert_eq!(exec.record().state_of("preflight"), StageState::Completed);
        assert!(!runner.has_fact("label"));

        let mut exec =
            StepExecutor::new(&runner, summary("/dev/sda")).with_gate(Box::new(AutoApprove));
        exec.run_plan(&graph).unwrap();
        assert!(runner.has_fact("mkfs"));
        assert!(exec.token().is_some());
    }

    #[test]
    fn test_format_verification_failure_marks_stage_failed() {
        let dir = tempfile::tempdir().unwrap();
        let device = "/dev/sda3";
        let blkid = CommandSpec::new("blkid").args(["-s", "TYPE", "-o", "value", device]);
        let mkfs = Filesystem::Ext4.mkfs_command(device);
        let format = Stage::new("format").step(
            Step::new("format root", mkfs, PostCondition::output_equals(blkid, "ext4"))
                .irreversible(),
        );
        let graph = StageGraph::new(vec![
            format,
            Stage::new("mount").after("format").step(fact_step("mount")),
        ])
        .unwrap();

        // mkfs exits 0 but the device still has no signature.
        let runner = ScriptedRunner::new().respond("blkid", CommandOutput::ok(""));
        let plan = summary("/dev/sda");
        let token = ConfirmationToken::issue(&plan);
        let mut exec = StepExecutor::new(&runner, plan)
            .with_token(token)
            .with_store(store(&dir))
            .unwrap();

        let err = exec.run_plan(&graph).unwrap_err();
        match &err {
            ExecError::VerificationFailed { stage, step, command, .. } => {
                assert_eq!(stage, "format");
                assert_eq!(step, "format root");
                assert_eq!(command, "mkfs.ext4 -F /dev/sda3");
            }
            other => panic!("unexpected error: {other}"),
        }

        let record = store(&dir).load().unwrap();
        let format = record.stage("format").unwrap();
        assert_eq!(format.state, StageState::Failed);
        assert_eq!(format.steps["format root"], StepState::Failed);
        assert!(format.last_error.as_deref().unwrap().contains("post-condition"));
        assert!(record.stage("mount").is_none());
        assert!(!runner.has_fact("mount"));
    }

    #[test]
    fn test_timeout_and_missing_program() {
        let stage = Stage::new("bootstrap").step(
            Step::new("pacstrap", CommandSpec::new("pacstrap").arg("/mnt"), fact_holds("base"))
                .timeout(std::time::Duration::from_secs(5)),
        );

        let runner = ScriptedRunner::new().respond(
            "pacstrap",
            CommandOutput {
                timed_out: true,
                ..Default::default()
            },
        );
        let mut exec = StepExecutor::new(&runner, summary("/dev/sda"));
        let err = exec.run(&stage).unwrap_err();
        assert!(matches!(err, ExecError::TimedOut { timeout_secs: 5, .. }));

        let runner = ScriptedRunner::new().unrunnable("pacstrap");
        let mut exec = StepExecutor::new(&runner, summary("/dev/sda"));
        let err = exec.run(&stage).unwrap_err();
        assert!(matches!(
            err,
            ExecError::Runner { ref message, .. } if message.contains("not found")
        ));
        assert_eq!(exec.record().state_of("bootstrap"), StageState::Failed);
    }

    #[test]
    fn test_cancel_between_steps_returns_stage_to_pending() {
        let runner = ScriptedRunner::new();
        let cancel = CancelFlag::new();
        let stage = Stage::new("configure")
            .step(fact_step("hostname"))
            .step(fact_step("locale"));

        let mut exec =
            StepExecutor::new(&runner, summary("/dev/sda")).with_cancel(cancel.clone());
        cancel.cancel();
        let err = exec.run(&stage).unwrap_err();
        assert!(matches!(err, ExecError::Cancelled { .. }));
        assert!(runner.calls().is_empty());
        assert_eq!(exec.record().state_of("configure"), StageState::Pending);
    }

    #[test]
    fn test_dry_run_executes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new().with_fact("partition");
        let graph = chain(&["partition", "format"]);
        let mut exec = StepExecutor::new(&runner, summary("/dev/sda"))
            .with_store(store(&dir))
            .unwrap()
            .with_options(ExecuteOptions {
                dry_run: true,
                ..Default::default()
            });

        let summary = exec.run_plan(&graph).unwrap();
        assert_eq!(summary.steps_executed, 1);
        assert_eq!(summary.steps_skipped, 1);
        assert!(runner.actions().is_empty());
        assert!(!store(&dir).exists());
    }

    #[test]
    fn test_changed_stage_is_rerun() {
        let runner = ScriptedRunner::new();
        let mut exec = StepExecutor::new(&runner, summary("/dev/sda"));
        exec.run_plan(&chain(&["configure"])).unwrap();
        assert_eq!(exec.record().state_of("configure"), StageState::Completed);

        let edited = StageGraph::new(vec![
            Stage::new("configure").step(Step::new(
                "hostname",
                set_fact("hostname"),
                fact_holds("hostname"),
            )),
        ])
        .unwrap();
        runner.clear_calls();
        exec.run_plan(&edited).unwrap();
        assert_eq!(runner.actions(), vec!["fact-set hostname"]);
    }

    #[test]
    fn test_interrupted_stage_skips_steps_already_done() {
        let dir = tempfile::tempdir().unwrap();
        let stage = Stage::new("configure")
            .step(fact_step("a"))
            .step(fact_step("b"));

        // Killed after `a` ran but before its state was written.
        let mut record = ProgressRecord::default();
        record.set_stage(&stage, StageState::Running);
        record.set_step("configure", "a", StepState::Running);
        store(&dir).save(&record).unwrap();

        let runner = ScriptedRunner::new().with_fact("a");
        let mut exec = StepExecutor::new(&runner, summary("/dev/sda"))
            .with_store(store(&dir))
            .unwrap();
        assert_eq!(exec.record().state_of("configure"), StageState::Running);

        let outcome = exec.run(&stage).unwrap();
        assert_eq!(outcome, StageOutcome::Completed { executed: 1, skipped: 1 });
        assert_eq!(runner.actions(), vec!["fact-set b"]);

        let saved = store(&dir).load().unwrap();
        let configure = saved.stage("configure").unwrap();
        assert_eq!(configure.state, StageState::Completed);
        assert_eq!(configure.steps["a"], StepState::Skipped);
        assert_eq!(configure.steps["b"], StepState::Completed);
    }

    #[test]
    fn test_volatile_stage_rechecked_after_reboot() {
        let dir = tempfile::tempdir().unwrap();
        let mount = Stage::new("mount").step(fact_step("mnt")).volatile();
        let bootstrap = Stage::new("bootstrap").step(fact_step("base"));

        let runner = ScriptedRunner::new();
        let mut exec = StepExecutor::new(&runner, summary("/dev/sda"))
            .with_store(store(&dir))
            .unwrap();
        exec.run(&mount).unwrap();
        exec.run(&bootstrap).unwrap();

        // Still mounted: only checks run.
        let runner = ScriptedRunner::new().with_fact("mnt");
        let mut exec = StepExecutor::new(&runner, summary("/dev/sda"))
            .with_store(store(&dir))
            .unwrap();
        assert_eq!(exec.run(&mount).unwrap(), StageOutcome::AlreadyCompleted);
        assert_eq!(runner.calls(), vec!["fact-test mnt"]);

        // Rebooted: the mount is gone, the base system on disk is not.
        let runner = ScriptedRunner::new();
        let mut exec = StepExecutor::new(&runner, summary("/dev/sda"))
            .with_store(store(&dir))
            .unwrap();
        assert_eq!(
            exec.run(&mount).unwrap(),
            StageOutcome::Completed { executed: 1, skipped: 0 }
        );
        assert_eq!(exec.run(&bootstrap).unwrap(), StageOutcome::AlreadyCompleted);
        assert_eq!(runner.actions(), vec!["fact-set mnt"]);
    }

    #[test]
    fn test_reset_forgets_progress() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new();
        let graph = chain(&["partition", "format"]);
        let mut exec = StepExecutor::new(&runner, summary("/dev/sda"))
            .with_store(store(&dir))
            .unwrap();
        for stage in graph.stages() {
            exec.run(stage).unwrap();
        }

        assert!(exec.reset_stage("format").unwrap());
        assert!(!exec.reset_stage("format").unwrap());
        let saved = store(&dir).load().unwrap();
        assert_eq!(saved.state_of("partition"), StageState::Completed);
        assert_eq!(saved.state_of("format"), StageState::Pending);
        assert_eq!(exec.resume(&graph).map(|s| s.name.as_str()), Some("format"));

        exec.reset().unwrap();
        assert!(!store(&dir).exists());
        assert_eq!(exec.resume(&graph).map(|s| s.name.as_str()), Some("partition"));
    }
}
