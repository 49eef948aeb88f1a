//! Error types for planning, ordering and execution.
//!
//! Errors are split by the phase that raises them. [`PlanError`] and
//! [`GraphError`] are produced before any device is touched; [`ExecError`]
//! halts the stage that raised it and leaves earlier stages recorded.

use std::path::PathBuf;
use thiserror::Error;

/// Invalid disk layout, caught before any side effect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// The plan has no partitions
    #[error("disk plan for {device} has no partitions")]
    Empty { device: String },

    /// A partition starts before the previous one ends
    #[error("partition {index} ({role}) starts at {start_mib}MiB, overlapping the previous partition ending at {previous_end_mib}MiB")]
    Overlap {
        index: usize,
        role: String,
        start_mib: u64,
        previous_end_mib: u64,
    },

    /// A partition starts after the previous one ends
    #[error("partition {index} ({role}) starts at {start_mib}MiB, leaving a gap after {previous_end_mib}MiB")]
    Gap {
        index: usize,
        role: String,
        start_mib: u64,
        previous_end_mib: u64,
    },

    /// The layout needs more space than the disk has
    #[error("layout needs {required_mib}MiB but {device} has {available_mib}MiB")]
    InsufficientSpace {
        device: String,
        required_mib: u64,
        available_mib: u64,
    },

    /// UEFI mode without an EFI system partition
    #[error("UEFI mode requires an EFI system partition")]
    MissingEsp,

    /// More than one EFI system partition
    #[error("exactly one EFI system partition is allowed, found {count}")]
    MultipleEsp { count: usize },

    /// No root partition
    #[error("disk plan has no root partition")]
    MissingRoot,

    /// More than one root partition
    #[error("exactly one root partition is allowed, found {count}")]
    MultipleRoot { count: usize },

    /// Root partition below the configured minimum
    #[error("root partition is {size_mib}MiB, below the minimum of {min_mib}MiB")]
    RootTooSmall { size_mib: u64, min_mib: u64 },

    /// Only the last partition may extend to the end of the disk
    #[error("partition {index} ({role}) extends to the end of the disk but is not last")]
    RemainderNotLast { index: usize, role: String },

    /// Filesystem not usable for the partition's role
    #[error("{role} partition cannot use filesystem {filesystem}")]
    FilesystemMismatch { role: String, filesystem: String },

    /// Zero-sized partition or unparsable size
    #[error("invalid size: {message}")]
    InvalidSize { message: String },
}

/// Structural problem in the stage list, caught before execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// Stages depend on each other in a loop
    #[error("dependency cycle: {}", .path.join(" -> "))]
    Cycle {
        /// Stage names along the cycle, first name repeated at the end
        path: Vec<String>,
    },

    /// A stage depends on a name that is not in the list
    #[error("stage '{stage}' depends on unknown stage '{dependency}'")]
    UnknownDependency { stage: String, dependency: String },

    /// Two stages share a name
    #[error("stage '{stage}' is declared more than once")]
    DuplicateStage { stage: String },
}

/// Failure reading or writing the persisted progress record.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("failed to read progress record {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write progress record {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("progress record {} is not valid TOML: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize progress record: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Failure while executing a stage.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Irreversible stage without a token for this exact plan
    #[error("stage '{stage}' is irreversible and needs a confirmation token for plan {plan_digest}")]
    ConfirmationRequired { stage: String, plan_digest: String },

    /// External command exited with a code not allowed by its descriptor
    #[error("step '{step}' in stage '{stage}' failed: `{command}` exited with {}", .exit_code.map_or_else(|| "no exit code".to_string(), |c| c.to_string()))]
    CommandFailed {
        stage: String,
        step: String,
        command: String,
        exit_code: Option<i32>,
        output: String,
    },

    /// Command reported success but the post-condition does not hold
    #[error("step '{step}' in stage '{stage}' ran `{command}` but its post-condition does not hold: {detail}")]
    VerificationFailed {
        stage: String,
        step: String,
        command: String,
        detail: String,
        output: String,
    },

    /// Command exceeded its timeout and was killed
    #[error("step '{step}' in stage '{stage}' timed out after {timeout_secs}s running `{command}`")]
    TimedOut {
        stage: String,
        step: String,
        command: String,
        timeout_secs: u64,
        output: String,
    },

    /// Runner could not execute the command at all
    #[error("step '{step}' in stage '{stage}' could not run `{command}`: {message}")]
    Runner {
        stage: String,
        step: String,
        command: String,
        message: String,
    },

    /// Stage previously failed and has not been retried or reset
    #[error("stage '{stage}' previously failed ({}); retry it with resume or start over with reset", .last_error.as_deref().unwrap_or("no error recorded"))]
    StageFailed {
        stage: String,
        last_error: Option<String>,
    },

    /// Cancellation flag was raised between steps
    #[error("cancelled before stage '{stage}' finished")]
    Cancelled { stage: String },

    #[error(transparent)]
    Record(#[from] RecordError),
}

impl ExecError {
    /// Stage the error belongs to, if any
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::ConfirmationRequired { stage, .. }
            | Self::CommandFailed { stage, .. }
            | Self::VerificationFailed { stage, .. }
            | Self::TimedOut { stage, .. }
            | Self::Runner { stage, .. }
            | Self::StageFailed { stage, .. }
            | Self::Cancelled { stage } => Some(stage),
            Self::Record(_) => None,
        }
    }

    /// Step that was running, for step-level failures
    pub fn step(&self) -> Option<&str> {
        match self {
            Self::CommandFailed { step, .. }
            | Self::VerificationFailed { step, .. }
            | Self::TimedOut { step, .. }
            | Self::Runner { step, .. } => Some(step),
            _ => None,
        }
    }

    /// Last command attempted and its captured output, for failure reports
    pub fn last_command(&self) -> Option<(&str, &str)> {
        match self {
            Self::CommandFailed {
                command, output, ..
            }
            | Self::VerificationFailed {
                command, output, ..
            }
            | Self::TimedOut {
                command, output, ..
            } => Some((command, output)),
            Self::Runner {
                command, message, ..
            } => Some((command, message)),
            _ => None,
        }
    }

    /// Whether the stage was left Failed in the record
    pub fn marks_stage_failed(&self) -> bool {
        matches!(
            self,
            Self::CommandFailed { .. }
                | Self::VerificationFailed { .. }
                | Self::TimedOut { .. }
                | Self::Runner { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_path() {
        let err = GraphError::Cycle {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle: a -> b -> a");
    }

    #[test]
    fn test_last_command_reports_output() {
        let err = ExecError::CommandFailed {
            stage: "format".into(),
            step: "mkfs root".into(),
            command: "mkfs.ext4 -F /dev/sda3".into(),
            exit_code: Some(1),
            output: "device busy".into(),
        };
        assert_eq!(err.stage(), Some("format"));
        assert_eq!(
            err.last_command(),
            Some(("mkfs.ext4 -F /dev/sda3", "device busy"))
        );
        assert!(err.marks_stage_failed());
        assert!(err.to_string().contains("exited with 1"));
    }

    #[test]
    fn test_confirmation_required_does_not_fail_stage() {
        let err = ExecError::ConfirmationRequired {
            stage: "partition".into(),
            plan_digest: "abc".into(),
        };
        assert!(!err.marks_stage_failed());
        assert_eq!(err.last_command(), None);
    }
}
