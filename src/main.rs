mod cli;
mod commands;
mod config;
mod detect;
mod gate;
mod install;
mod paths;
mod privilege;
mod progress;
mod runner;
mod state;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use provision::{CancelFlag, ExecError, GraphError, PlanError};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

/// Exit code for an invalid disk plan or stage graph
const EXIT_PLAN: u8 = 2;
/// Exit code when an irreversible stage was not confirmed
const EXIT_CONFIRMATION: u8 = 3;
/// Exit code when a stage failed or was cancelled
const EXIT_EXEC: u8 = 4;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    /// `--config` override
    pub config: Option<PathBuf>,
    /// Raised by SIGINT/SIGTERM; checked between steps
    pub cancel: CancelFlag,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        config: cli.config,
        cancel: CancelFlag::new(),
    };

    if let Err(e) = register_signals(&ctx.cancel) {
        log::warn!("Could not install signal handlers: {e}");
    }

    match dispatch(&ctx, cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(exec) = err.downcast_ref::<ExecError>() {
                commands::run::report_failure(exec);
            }
            ui::error(&format!("{err:#}"));
            ExitCode::from(exit_code(&err))
        }
    }
}

fn dispatch(ctx: &Context, command: Command) -> Result<()> {
    log::trace!("verbosity {}", ctx.verbose);
    match command {
        Command::Plan(args) => commands::plan::run(ctx, args),
        Command::Confirm(args) => commands::confirm::run(ctx, args),
        Command::Run(args) => commands::run::run(ctx, args),
        Command::Resume(args) => commands::run::resume(ctx, args),
        Command::Status => commands::status::run(ctx),
        Command::Reset(args) => commands::reset::run(ctx, args),
        Command::Doctor => commands::doctor::run(ctx),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(shell, &mut cmd, name, &mut io::stdout());
            Ok(())
        }
    }
}

/// First SIGINT/SIGTERM asks the executor to stop between steps; a second
/// one exits immediately.
fn register_signals(cancel: &CancelFlag) -> io::Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::flag;

    for signal in [SIGINT, SIGTERM] {
        flag::register_conditional_shutdown(signal, 130, cancel.handle())?;
        flag::register(signal, cancel.handle())?;
    }
    Ok(())
}

/// Map an error to the process exit code
fn exit_code(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if cause.is::<PlanError>() || cause.is::<GraphError>() {
            return EXIT_PLAN;
        }
        if let Some(exec) = cause.downcast_ref::<ExecError>() {
            return match exec {
                ExecError::ConfirmationRequired { .. } => EXIT_CONFIRMATION,
                _ => EXIT_EXEC,
            };
        }
    }
    1
}
