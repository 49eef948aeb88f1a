use anyhow::Result;
use colored::Colorize;
use provision::{
    AutoApprove, ConfirmationGate, ExecError, ExecuteOptions, RunSummary, StepExecutor,
};
use std::io::IsTerminal;
use std::time::Duration;

use super::Prepared;
use crate::Context;
use crate::cli::RunArgs;
use crate::gate::TerminalGate;
use crate::privilege;
use crate::progress::{self, StageProgress};
use crate::runner::SystemRunner;
use crate::ui;

/// Lines of captured output shown in a failure report
const OUTPUT_TAIL_LINES: usize = 20;

/// `rootstrap run`
pub fn run(ctx: &Context, args: RunArgs) -> Result<()> {
    execute(ctx, &args, false)
}

/// `rootstrap resume`: clear Failed stages, then run
pub fn resume(ctx: &Context, args: RunArgs) -> Result<()> {
    execute(ctx, &args, true)
}

fn execute(ctx: &Context, args: &RunArgs, retry_failed: bool) -> Result<()> {
    if !args.dry_run {
        privilege::require_root("install")?;
    }
    let prepared = super::prepare(ctx)?;
    let summary = prepared.plan.summary();
    let store = prepared.record_store();
    let token_file = prepared.token_file();

    if retry_failed && !store.exists() {
        ui::warn("No progress recorded yet; starting from the first stage");
    }

    let spinner = progress::spinner(ctx.quiet);
    let runner = SystemRunner::with_spinner(spinner.clone());
    let mut executor = StepExecutor::new(runner, summary.clone())
        .with_store(store)?
        .with_cancel(ctx.cancel.clone())
        .with_options(ExecuteOptions {
            dry_run: args.dry_run,
            heartbeat: Duration::from_secs(prepared.config.engine.heartbeat_secs),
        })
        .with_progress(Box::new(StageProgress::new(spinner, prepared.graph.len())));

    let stored = token_file.load_valid(&summary.digest, prepared.token_ttl()?)?;
    if let Some(token) = stored.clone() {
        log::info!("Using stored confirmation for plan {}", summary.digest.short());
        executor = executor.with_token(token);
    }
    if let Some(gate) = confirmation_gate(args.yes) {
        executor = executor.with_gate(gate);
    }

    if retry_failed && !args.dry_run {
        for stage in executor.retry_all_failed()? {
            ui::info(&format!("Retrying failed stage '{stage}'"));
        }
    }

    if !ctx.quiet {
        header(&prepared, args.dry_run);
    }

    let result = executor.run_plan(&prepared.graph);

    // Keep consent obtained during this run for a later resume
    if !args.dry_run
        && let Some(token) = executor.token()
        && stored.as_ref() != Some(token)
    {
        token_file.save(token)?;
    }
    drop(executor);

    let outcome = result?;
    if !args.dry_run {
        token_file.remove()?;
    }
    report_success(&outcome, args.dry_run, &prepared);
    Ok(())
}

/// Gate for irreversible stages without a stored token
///
/// Without a terminal there is nobody to ask, so the run stops with
/// ConfirmationRequired instead.
fn confirmation_gate(yes: bool) -> Option<Box<dyn ConfirmationGate>> {
    if yes {
        Some(Box::new(AutoApprove))
    } else if std::io::stdin().is_terminal() {
        Some(Box::new(TerminalGate))
    } else {
        log::debug!("stdin is not a terminal; not prompting for confirmation");
        None
    }
}

fn header(prepared: &Prepared, dry_run: bool) {
    let title = if dry_run {
        format!("Dry run on {}", prepared.plan.device)
    } else {
        format!("Installing to {}", prepared.plan.device)
    };
    ui::header(&title);
    ui::kv("Plan", prepared.plan.digest().short());
    ui::kv("Target root", &prepared.config.target_root().display().to_string());
    ui::kv("Stages", &prepared.graph.len().to_string());
    println!();
}

fn report_success(outcome: &RunSummary, dry_run: bool, prepared: &Prepared) {
    println!();
    if dry_run {
        ui::info("Dry run complete. No changes made.");
        return;
    }

    ui::success(&format!(
        "Install complete: {} stages run, {} already done ({} steps run, {} already satisfied)",
        outcome.completed.len(),
        outcome.already_completed.len(),
        outcome.steps_executed,
        outcome.steps_skipped
    ));
    ui::dim(&format!("{} can be rebooted into the new system", prepared.plan.device));
}

/// Print what failed and how to continue
pub fn report_failure(err: &ExecError) {
    eprintln!();
    ui::header("Install stopped");

    if let Some(stage) = err.stage() {
        ui::kv("Stage", stage);
    }
    if let Some(step) = err.step() {
        ui::kv("Step", step);
    }
    if let Some((command, output)) = err.last_command() {
        ui::kv("Command", command);
        if !output.trim().is_empty() {
            println!("  {}", "Output:".dimmed());
            ui::output_tail(output, OUTPUT_TAIL_LINES);
        }
    }

    println!();
    match err {
        ExecError::ConfirmationRequired { .. } => {
            println!("  {}", "Approve the plan, then run again:".dimmed());
            ui::command("sudo rootstrap confirm");
            ui::command("sudo rootstrap run");
        }
        ExecError::StageFailed { .. } => {
            println!("  {}", "Fix the cause, then retry the failed stage:".dimmed());
            ui::command("sudo rootstrap resume");
            println!("  {}", "or start that stage over:".dimmed());
            if let Some(stage) = err.stage() {
                ui::command(&format!("sudo rootstrap reset {stage}"));
            }
        }
        ExecError::Record(_) => {
            println!("  {}", "Check the state directory, then:".dimmed());
            ui::command("sudo rootstrap status");
        }
        _ => {
            let hint = if err.marks_stage_failed() {
                "Fix the cause, then continue from the failed stage:"
            } else {
                "Continue where the install stopped:"
            };
            println!("  {}", hint.dimmed());
            ui::command("sudo rootstrap resume");
        }
    }
}
