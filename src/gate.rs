//! Interactive confirmation on the terminal

use anyhow::{Context, Result};
use colored::Colorize;
use dialoguer::{Confirm, Input};
use provision::{Confirmation, ConfirmationGate, ConfirmationToken, PlanSummary};

use crate::ui;

/// Asks the operator to approve a plan
///
/// The operator must type the target device path, then answer a final
/// yes/no question. Anything else is a denial.
pub struct TerminalGate;

impl ConfirmationGate for TerminalGate {
    fn request_confirmation(&mut self, summary: &PlanSummary) -> Result<Confirmation> {
        show_plan(summary);

        println!();
        println!(
            "  {} This will {}!",
            "WARNING:".red().bold(),
            format!("destroy all data on {}", summary.device).red().bold()
        );
        println!();

        let typed: String = Input::new()
            .with_prompt(format!("Type {} to continue", summary.device))
            .allow_empty(true)
            .interact_text()
            .context("Failed to read user input")?;

        if typed.trim() != summary.device {
            ui::info("Device path did not match. No changes made.");
            return Ok(Confirmation::Denied);
        }

        let sure = Confirm::new()
            .with_prompt(format!(
                "Are you ABSOLUTELY SURE you want to repartition {}?",
                summary.device
            ))
            .default(false)
            .interact()
            .context("Failed to read user input")?;

        if !sure {
            ui::info("Aborted. No changes made.");
            return Ok(Confirmation::Denied);
        }

        Ok(Confirmation::Granted(ConfirmationToken::issue(summary)))
    }
}

/// Print the layout the operator is approving
pub fn show_plan(summary: &PlanSummary) {
    ui::header(&format!("Disk plan for {}", summary.device));
    ui::kv("Firmware", &summary.firmware.to_string());
    ui::kv("Partition table", summary.table.as_str());
    ui::kv("Disk size", &provision::disk::format_mib(summary.disk_size_mib));
    ui::kv("Plan digest", summary.digest.short());
    println!();

    println!(
        "  {:<16} {:<5} {:<6} {:>10} {:>10}  {}",
        "DEVICE".dimmed(),
        "ROLE".dimmed(),
        "FS".dimmed(),
        "START".dimmed(),
        "END".dimmed(),
        "MOUNT".dimmed()
    );
    for line in &summary.partitions {
        println!(
            "  {:<16} {:<5} {:<6} {:>10} {:>10}  {}",
            line.device,
            line.role.as_str(),
            line.filesystem.blkid_type(),
            format!("{}MiB", line.start_mib),
            format!("{}MiB", line.end_mib),
            line.mountpoint.as_deref().unwrap_or("-")
        );
    }
}
