use anyhow::Result;
use provision::{AutoApprove, Confirmation, ConfirmationGate, ExecError};

use crate::Context;
use crate::cli::ConfirmArgs;
use crate::gate::{self, TerminalGate};
use crate::privilege;
use crate::ui;

/// Ask for consent now and store the token for a later `run`
pub fn run(ctx: &Context, args: ConfirmArgs) -> Result<()> {
    privilege::require_root("confirm")?;
    let prepared = super::prepare(ctx)?;
    let summary = prepared.plan.summary();

    let confirmation = if args.yes {
        gate::show_plan(&summary);
        AutoApprove.request_confirmation(&summary)?
    } else {
        TerminalGate.request_confirmation(&summary)?
    };

    let Confirmation::Granted(token) = confirmation else {
        let stage = prepared
            .graph
            .stages()
            .iter()
            .find(|s| s.is_irreversible())
            .map_or_else(String::new, |s| s.name.clone());
        return Err(ExecError::ConfirmationRequired {
            stage,
            plan_digest: summary.digest.to_string(),
        }
        .into());
    };

    let file = prepared.token_file();
    file.save(&token)?;

    println!();
    ui::success(&format!(
        "Plan {} confirmed for {} minutes",
        summary.digest.short(),
        prepared.config.engine.confirmation_ttl_minutes
    ));
    ui::kv("Token", &file.path().display().to_string());
    Ok(())
}
