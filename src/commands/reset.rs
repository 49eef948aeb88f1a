use anyhow::{Context as _, Result, bail};
use dialoguer::Confirm;
use provision::{CommandRunner, StepExecutor};

use crate::Context;
use crate::cli::ResetArgs;
use crate::runner::SystemRunner;
use crate::state::TokenFile;
use crate::ui;

/// Forget recorded progress, for one stage or entirely
///
/// Only the record changes; nothing on disk is undone. The next run
/// re-checks every forgotten stage and skips steps that already hold.
pub fn run(ctx: &Context, args: ResetArgs) -> Result<()> {
    let prepared = super::prepare(ctx)?;
    let store = prepared.record_store();
    let token_file = prepared.token_file();

    if !store.exists() && args.stage.is_some() {
        ui::info("No progress recorded. Nothing to reset.");
        return Ok(());
    }

    let prompt = match &args.stage {
        Some(stage) => format!("Forget recorded progress of stage '{stage}'?"),
        None => "Forget all recorded progress and the stored confirmation?".to_string(),
    };
    if !args.yes
        && !Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()
            .context("Failed to read user input")?
    {
        ui::info("Aborted. Nothing changed.");
        return Ok(());
    }

    let mut executor =
        StepExecutor::new(SystemRunner::default(), prepared.plan.summary()).with_store(store)?;
    forget(&mut executor, &token_file, args.stage.as_deref())?;

    match &args.stage {
        Some(stage) => ui::success(&format!("Stage '{stage}' will run again")),
        None => ui::success("Progress and confirmation cleared"),
    }
    Ok(())
}

/// Drop one stage's progress, or all progress and the stored token
fn forget<R: CommandRunner>(
    executor: &mut StepExecutor<R>,
    token_file: &TokenFile,
    stage: Option<&str>,
) -> Result<()> {
    match stage {
        Some(stage) => {
            if !executor.reset_stage(stage)? {
                bail!("stage '{stage}' has no recorded progress");
            }
        }
        None => {
            executor.reset()?;
            token_file.remove()?;
        }
    }
    Ok(())
}
