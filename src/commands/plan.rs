use anyhow::{Context as _, Result};
use colored::Colorize;

use crate::Context;
use crate::cli::PlanArgs;
use crate::gate;
use crate::ui;

pub fn run(ctx: &Context, args: PlanArgs) -> Result<()> {
    let prepared = super::prepare(ctx)?;

    if args.json {
        let json = serde_json::to_string_pretty(&prepared.plan)
            .context("Failed to serialize plan to JSON")?;
        println!("{json}");
        return Ok(());
    }

    let summary = prepared.plan.summary();
    gate::show_plan(&summary);

    ui::section("Detected Hardware");
    ui::kv("CPU", &prepared.capabilities.cpu.to_string());
    let gpus: Vec<String> = prepared
        .capabilities
        .gpus
        .iter()
        .map(ToString::to_string)
        .collect();
    ui::kv("GPU", &gpus.join(", "));

    ui::section("Stages");
    let total = prepared.graph.len();
    for (i, stage) in prepared.graph.stages().iter().enumerate() {
        let marker = if stage.is_irreversible() {
            " (destroys data)".red().to_string()
        } else {
            String::new()
        };
        ui::step(
            i + 1,
            total,
            &format!("{} - {} steps{marker}", stage.name.bold(), stage.steps.len()),
        );
        if args.commands {
            for step in &stage.steps {
                ui::dim(&step.name);
                ui::command(&step.command.to_string());
            }
        }
    }

    if !ctx.quiet {
        println!();
        ui::info(&format!(
            "Approve this plan with {} or pass {} to {}",
            "rootstrap confirm".cyan(),
            "--yes".cyan(),
            "rootstrap run".cyan()
        ));
    }
    Ok(())
}
