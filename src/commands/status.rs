use anyhow::Result;
use colored::Colorize;
use provision::{
    CommandRunner, ProgressRecord, RecordStore, Stage, StageGraph, StageState, StepExecutor,
    StepState,
};

use crate::Context;
use crate::paths;
use crate::runner::SystemRunner;
use crate::ui;

/// Print the progress record and the next stage to run
///
/// Works without a usable disk: if the plan cannot be built, the raw
/// record is shown in its stored order.
pub fn run(ctx: &Context) -> Result<()> {
    let config = super::load_config(ctx)?;
    let state_dir = super::state_dir(&config)?;
    let store = RecordStore::new(paths::progress_file(&state_dir));

    ui::header("Install Progress");
    ui::kv("Record", &store.path().display().to_string());

    if !store.exists() {
        println!();
        ui::info("No progress recorded. Nothing has run yet, or the last install finished.");
        return Ok(());
    }
    let record = store.load()?;

    if let Some(digest) = &record.plan_digest {
        ui::kv("Plan", digest.short());
    }
    if let Some(updated) = record.updated_at {
        ui::kv("Updated", &updated.format("%Y-%m-%d %H:%M:%S UTC").to_string());
    }

    let prepared = match super::prepare(ctx) {
        Ok(prepared) => prepared,
        Err(e) => {
            log::info!("Could not build the current plan: {e:#}");
            ui::section("Stages");
            for name in record.stages.keys() {
                print_stage(name, &record, false);
            }
            return Ok(());
        }
    };

    let executor =
        StepExecutor::new(SystemRunner::default(), prepared.plan.summary()).with_store(store)?;
    ui::section("Stages");
    print_graph(&prepared.graph, executor.record());

    println!();
    match next_stage(&executor, &prepared.graph) {
        Next::Retry(stage) => {
            ui::warn(&format!("Stage '{}' failed; retry it with:", stage.name));
            ui::command("sudo rootstrap resume");
        }
        Next::Run(stage) => {
            ui::info(&format!("Next stage: {}", stage.name.bold()));
            ui::command("sudo rootstrap resume");
        }
        Next::Done => ui::success("All stages completed"),
    }
    Ok(())
}

/// What `resume` would do next
#[derive(Debug, PartialEq, Eq)]
enum Next<'g> {
    Run(&'g Stage),
    Retry(&'g Stage),
    Done,
}

fn next_stage<'g, R: CommandRunner>(executor: &StepExecutor<R>, graph: &'g StageGraph) -> Next<'g> {
    match executor.resume(graph) {
        Some(stage) if executor.record().state_of(&stage.name) == StageState::Failed => {
            Next::Retry(stage)
        }
        Some(stage) => Next::Run(stage),
        None => Next::Done,
    }
}

fn print_graph(graph: &StageGraph, record: &ProgressRecord) {
    for stage in graph.stages() {
        let changed = record.stage(&stage.name).is_some_and(|r| {
            r.state != StageState::Pending && r.fingerprint != stage.fingerprint()
        });
        print_stage(&stage.name, record, changed);
    }

    let unknown: Vec<&String> = record
        .stages
        .keys()
        .filter(|name| graph.get(name).is_none())
        .collect();
    if !unknown.is_empty() {
        ui::dim(&format!(
            "ignoring recorded stages no longer in the plan: {}",
            unknown.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
        ));
    }
}

fn print_stage(name: &str, record: &ProgressRecord, changed: bool) {
    let state = record.state_of(name);
    let when = record
        .stage(name)
        .and_then(|r| r.updated_at)
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_default();
    let note = if changed {
        " (changed, will re-run)".yellow().to_string()
    } else {
        String::new()
    };

    println!("  {:<12} {:<12} {}{note}", name, ui::stage_state(state), when.dimmed());

    let Some(stage) = record.stage(name) else {
        return;
    };
    if let Some(error) = &stage.last_error {
        println!("      {}", error.red());
    }
    if state != StageState::Completed {
        for (step, step_state) in &stage.steps {
            if matches!(step_state, StepState::Failed | StepState::Running) {
                println!("      {} {}", format!("{step_state}:").dimmed(), step);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::install::tests::{config, plan};
    use provision::{CommandSpec, PostCondition, Step};

    fn graph(format: Stage) -> StageGraph {
        StageGraph::new(vec![
            Stage::new("partition"),
            format.after("partition"),
            Stage::new("mount").after("format"),
        ])
        .unwrap()
    }

    fn executor_for(
        dir: &tempfile::TempDir,
        record: &ProgressRecord,
    ) -> StepExecutor<SystemRunner> {
        let store = RecordStore::new(dir.path().join("progress.toml"));
        store.save(record).unwrap();
        StepExecutor::new(SystemRunner::default(), plan(&config()).summary())
            .with_store(store)
            .unwrap()
    }

    #[test]
    fn test_next_stage_follows_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let graph = graph(Stage::new("format"));
        let mut record = ProgressRecord::default();
        record.set_stage(&graph.stages()[0], StageState::Completed);
        record.set_failed(&graph.stages()[1], "mkfs failed");

        let executor = executor_for(&dir, &record);
        assert_eq!(next_stage(&executor, &graph), Next::Retry(&graph.stages()[1]));

        record.set_stage(&graph.stages()[1], StageState::Completed);
        let executor = executor_for(&dir, &record);
        assert_eq!(next_stage(&executor, &graph), Next::Run(&graph.stages()[2]));

        record.set_stage(&graph.stages()[2], StageState::Completed);
        let executor = executor_for(&dir, &record);
        assert_eq!(next_stage(&executor, &graph), Next::Done);
    }

    #[test]
    fn test_changed_stage_is_next_even_if_completed() {
        let dir = tempfile::tempdir().unwrap();
        let mut record = ProgressRecord::default();
        for stage in graph(Stage::new("format")).stages() {
            record.set_stage(stage, StageState::Completed);
        }

        let edited = graph(Stage::new("format").step(Step::new(
            "format root",
            CommandSpec::new("mkfs.ext4").arg("/dev/sda3"),
            PostCondition::path_exists("/dev/sda3"),
        )));
        let executor = executor_for(&dir, &record);
        assert_eq!(next_stage(&executor, &edited), Next::Run(&edited.stages()[1]));
    }
}
