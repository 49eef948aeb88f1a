//! Core types shared by the planner, the graph and the executor

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Descriptor of one external command
///
/// The engine never spawns processes itself. It hands these to a
/// [`CommandRunner`](crate::context::CommandRunner) and interprets the
/// returned [`CommandOutput`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Exit codes treated as success
    #[serde(default = "default_exit_codes")]
    pub allowed_exit_codes: Vec<i32>,
    /// Data written to the child's stdin, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,
}

fn default_exit_codes() -> Vec<i32> {
    vec![0]
}

impl CommandSpec {
    /// Create a command expecting exit code 0
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            allowed_exit_codes: default_exit_codes(),
            stdin: None,
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Feed `input` to the command's stdin
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Also accept `code` as a successful exit
    pub fn allow_exit_code(mut self, code: i32) -> Self {
        if !self.allowed_exit_codes.contains(&code) {
            self.allowed_exit_codes.push(code);
        }
        self
    }

    /// Whether `code` counts as success for this command
    pub fn accepts(&self, code: i32) -> bool {
        self.allowed_exit_codes.contains(&code)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", quote(arg))?;
        }
        Ok(())
    }
}

/// Quote an argument for display so the printed command can be pasted into a shell
fn quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,%+@".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Output captured from a finished (or killed) command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if the process was killed by a signal or timed out
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Build a successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    /// Build a failed output with the given exit code and stderr
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(code),
            stderr: stderr.into(),
            ..Default::default()
        }
    }

    /// Whether the command exited with one of the codes `spec` accepts
    pub fn succeeded(&self, spec: &CommandSpec) -> bool {
        !self.timed_out && self.exit_code.is_some_and(|code| spec.accepts(code))
    }

    /// Stdout and stderr joined for error reports
    pub fn combined(&self) -> String {
        match (self.stdout.trim(), self.stderr.trim()) {
            ("", "") => String::new(),
            (out, "") => out.to_string(),
            ("", err) => err.to_string(),
            (out, err) => format!("{out}\n{err}"),
        }
    }
}

/// Limits the runner applies to a single invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLimits {
    /// Kill the command after this long; `None` means unbounded
    pub timeout: Option<Duration>,
    /// Interval between liveness reports while the command runs
    pub heartbeat: Duration,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            timeout: None,
            heartbeat: Duration::from_secs(30),
        }
    }
}

/// Lifecycle of a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl StageState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Lifecycle of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    /// Post-condition already held, command not run
    Skipped,
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Result of running one stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// Stage was already Completed in the record; nothing was run
    AlreadyCompleted,
    /// Stage ran to completion
    Completed { executed: usize, skipped: usize },
    /// Dry run: `would_run` steps need their command, the rest already hold
    Planned { would_run: usize, satisfied: usize },
}

/// Options for execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Evaluate checks only; never run commands or write the record
    pub dry_run: bool,
    /// Heartbeat interval passed to the runner
    pub heartbeat: Duration,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            heartbeat: Duration::from_secs(30),
        }
    }
}

/// Summary of a full plan run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Stages run to completion during this invocation
    pub completed: Vec<String>,
    /// Stages found already Completed and not re-entered
    pub already_completed: Vec<String>,
    pub steps_executed: usize,
    pub steps_skipped: usize,
}

impl RunSummary {
    pub fn add(&mut self, stage: &str, outcome: &StageOutcome) {
        match outcome {
            StageOutcome::AlreadyCompleted => self.already_completed.push(stage.to_string()),
            StageOutcome::Completed { executed, skipped } => {
                self.completed.push(stage.to_string());
                self.steps_executed += executed;
                self.steps_skipped += skipped;
            }
            StageOutcome::Planned {
                would_run,
                satisfied,
            } => {
                self.steps_executed += would_run;
                self.steps_skipped += satisfied;
            }
        }
    }
}
