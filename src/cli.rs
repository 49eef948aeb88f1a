use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rootstrap")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Resumable, idempotent installer for a Linux desktop system", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Install config (default: $ROOTSTRAP_CONFIG_DIR/install.toml or /etc/rootstrap/install.toml)
    #[arg(short, long, global = true, env = "ROOTSTRAP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show the disk plan and the stages that would run
    Plan(PlanArgs),

    /// Approve the current disk plan ahead of `run`
    Confirm(ConfirmArgs),

    /// Install, skipping stages that already completed
    Run(RunArgs),

    /// Retry failed stages and continue the install
    Resume(RunArgs),

    /// Show recorded progress
    Status,

    /// Forget recorded progress
    Reset(ResetArgs),

    /// Check that this machine can run the install
    Doctor,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct PlanArgs {
    /// Print the disk plan as JSON
    #[arg(long)]
    pub json: bool,

    /// List every step's command
    #[arg(long)]
    pub commands: bool,
}

#[derive(Args)]
pub struct ConfirmArgs {
    /// Approve without prompting
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args)]
pub struct RunArgs {
    /// Approve the disk plan without prompting
    #[arg(short, long)]
    pub yes: bool,

    /// Evaluate checks only; change nothing
    #[arg(short = 'n', long)]
    pub dry_run: bool,
}

#[derive(Args)]
pub struct ResetArgs {
    /// Only forget this stage
    pub stage: Option<String>,

    /// Do not ask for confirmation
    #[arg(short, long)]
    pub yes: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::try_parse_from(["rootstrap", "-vv", "run", "--yes", "--dry-run"]).unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Run(args) => {
                assert!(args.yes);
                assert!(args.dry_run);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_parse_reset_stage() {
        let cli = Cli::try_parse_from(["rootstrap", "reset", "format", "-y"]).unwrap();
        match cli.command {
            Command::Reset(args) => {
                assert_eq!(args.stage.as_deref(), Some("format"));
                assert!(args.yes);
            }
            _ => panic!("expected reset"),
        }
    }
}
