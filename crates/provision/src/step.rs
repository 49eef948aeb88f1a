//! Steps and their post-conditions
//!
//! A step wraps exactly one external command and a read-only check of the
//! state that command is meant to produce. The executor evaluates the check
//! before running the command (skipping it when the state already holds)
//! and again afterwards (failing the stage when it does not).

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::context::CommandRunner;
use crate::disk::probe::{self, ExpectedPartition, PartedTable};
use crate::disk::TableLabel;
use crate::types::{CommandSpec, RunLimits};

/// Time allowed for a check command
const CHECK_TIMEOUT: Duration = Duration::from_secs(60);

/// What a check command's output must look like
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Expect {
    /// Exit code accepted by the command
    Succeeds,
    /// Exit accepted and trimmed stdout equals the value
    Equals(String),
    /// Exit accepted and stdout contains the value
    Contains(String),
    /// Exit accepted and one stdout line, trimmed, equals the value
    Line(String),
}

/// Read-only verification of a step's intended effect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PostCondition {
    /// Run a read-only command and match its result
    Command { command: CommandSpec, expect: Expect },
    /// A path exists
    PathExists { path: PathBuf },
    /// A file exists and contains `needle`
    FileContains { path: PathBuf, needle: String },
    /// `path` is a symlink pointing at `target`
    LinkTarget { path: PathBuf, target: PathBuf },
    /// Device has a `label` table whose partitions are a prefix of `layout`
    PartitionTable {
        device: String,
        label: TableLabel,
        layout: Vec<ExpectedPartition>,
    },
    /// Device has a partition matching `expected`
    Partition {
        device: String,
        expected: ExpectedPartition,
    },
    /// Partition `number` on device carries `flag`
    PartitionFlag {
        device: String,
        number: usize,
        flag: String,
    },
    /// Inner condition does not hold
    Not { condition: Box<PostCondition> },
    /// Every inner condition holds
    All { conditions: Vec<PostCondition> },
    /// At least one inner condition holds
    Any { conditions: Vec<PostCondition> },
}

/// Result of evaluating a post-condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Satisfied,
    /// Not satisfied, with a short reason for reports
    Unsatisfied(String),
}

impl CheckOutcome {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied)
    }

    fn from_bool(ok: bool, reason: impl FnOnce() -> String) -> Self {
        if ok {
            Self::Satisfied
        } else {
            Self::Unsatisfied(reason())
        }
    }
}

impl PostCondition {
    /// Command check with [`Expect::Succeeds`]
    pub fn succeeds(command: CommandSpec) -> Self {
        Self::Command {
            command,
            expect: Expect::Succeeds,
        }
    }

    /// Command check with [`Expect::Equals`]
    pub fn output_equals(command: CommandSpec, value: impl Into<String>) -> Self {
        Self::Command {
            command,
            expect: Expect::Equals(value.into()),
        }
    }

    /// Command check with [`Expect::Contains`]
    pub fn output_contains(command: CommandSpec, value: impl Into<String>) -> Self {
        Self::Command {
            command,
            expect: Expect::Contains(value.into()),
        }
    }

    /// Command check with [`Expect::Line`]
    pub fn output_has_line(command: CommandSpec, value: impl Into<String>) -> Self {
        Self::Command {
            command,
            expect: Expect::Line(value.into()),
        }
    }

    pub fn path_exists(path: impl Into<PathBuf>) -> Self {
        Self::PathExists { path: path.into() }
    }

    pub fn file_contains(path: impl Into<PathBuf>, needle: impl Into<String>) -> Self {
        Self::FileContains {
            path: path.into(),
            needle: needle.into(),
        }
    }

    pub fn negate(self) -> Self {
        Self::Not {
            condition: Box::new(self),
        }
    }

    pub fn all(conditions: Vec<PostCondition>) -> Self {
        Self::All { conditions }
    }

    pub fn any(conditions: Vec<PostCondition>) -> Self {
        Self::Any { conditions }
    }

    /// Evaluate against the live system
    ///
    /// Returns `Err` only when a check command cannot be run at all; a
    /// command that runs and fails simply means "not satisfied".
    pub fn evaluate(
        &self,
        runner: &dyn CommandRunner,
        heartbeat: Duration,
    ) -> Result<CheckOutcome> {
        let limits = RunLimits {
            timeout: Some(CHECK_TIMEOUT),
            heartbeat,
        };

        let outcome = match self {
            Self::Command { command, expect } => {
                let output = runner.run(command, &limits)?;
                if !output.succeeded(command) {
                    CheckOutcome::Unsatisfied(format!(
                        "`{command}` exited with {}",
                        output
                            .exit_code
                            .map_or_else(|| "no exit code".to_string(), |c| c.to_string())
                    ))
                } else {
                    match expect {
                        Expect::Succeeds => CheckOutcome::Satisfied,
                        Expect::Equals(value) => {
                            let actual = output.stdout.trim();
                            CheckOutcome::from_bool(actual == value, || {
                                format!("`{command}` printed '{actual}', expected '{value}'")
                            })
                        }
                        Expect::Contains(value) => {
                            CheckOutcome::from_bool(output.stdout.contains(value.as_str()), || {
                                format!("`{command}` output does not contain '{value}'")
                            })
                        }
                        Expect::Line(value) => {
                            let found = output.stdout.lines().any(|line| line.trim() == value);
                            CheckOutcome::from_bool(found, || {
                                format!("`{command}` printed no line '{value}'")
                            })
                        }
                    }
                }
            }
            Self::PathExists { path } => CheckOutcome::from_bool(path.exists(), || {
                format!("{} does not exist", path.display())
            }),
            Self::FileContains { path, needle } => match std::fs::read_to_string(path) {
                Ok(content) => CheckOutcome::from_bool(content.contains(needle.as_str()), || {
                    format!("{} does not contain '{needle}'", path.display())
                }),
                Err(e) => CheckOutcome::Unsatisfied(format!("cannot read {}: {e}", path.display())),
            },
            Self::LinkTarget { path, target } => match std::fs::read_link(path) {
                Ok(actual) => CheckOutcome::from_bool(&actual == target, || {
                    format!(
                        "{} points at {}, expected {}",
                        path.display(),
                        actual.display(),
                        target.display()
                    )
                }),
                Err(_) => CheckOutcome::Unsatisfied(format!("{} is not a symlink", path.display())),
            },
            Self::PartitionTable {
                device,
                label,
                layout,
            } => match read_table(runner, device, &limits)? {
                Some(table) => match table.matches_prefix(label.as_str(), layout) {
                    Ok(()) => CheckOutcome::Satisfied,
                    Err(reason) => CheckOutcome::Unsatisfied(reason),
                },
                None => CheckOutcome::Unsatisfied(format!("{device} has no partition table")),
            },
            Self::Partition { device, expected } => match read_table(runner, device, &limits)? {
                Some(table) => {
                    let found = table.partition(expected.number);
                    CheckOutcome::from_bool(found.is_some_and(|p| expected.matches(p)), || {
                        format!(
                            "partition {} on {device} missing or at the wrong offsets",
                            expected.number
                        )
                    })
                }
                None => CheckOutcome::Unsatisfied(format!("{device} has no partition table")),
            },
            Self::PartitionFlag {
                device,
                number,
                flag,
            } => {
                let has_flag = read_table(runner, device, &limits)?
                    .and_then(|t| t.partition(*number).map(|p| p.flags.contains(flag)))
                    .unwrap_or(false);
                CheckOutcome::from_bool(has_flag, || {
                    format!("partition {number} on {device} lacks the {flag} flag")
                })
            }
            Self::Not { condition } => match condition.evaluate(runner, heartbeat)? {
                CheckOutcome::Satisfied => {
                    CheckOutcome::Unsatisfied("condition unexpectedly holds".to_string())
                }
                CheckOutcome::Unsatisfied(_) => CheckOutcome::Satisfied,
            },
            Self::All { conditions } => {
                for condition in conditions {
                    let outcome = condition.evaluate(runner, heartbeat)?;
                    if !outcome.is_satisfied() {
                        return Ok(outcome);
                    }
                }
                CheckOutcome::Satisfied
            }
            Self::Any { conditions } => {
                let mut reasons = Vec::new();
                for condition in conditions {
                    match condition.evaluate(runner, heartbeat)? {
                        CheckOutcome::Satisfied => return Ok(CheckOutcome::Satisfied),
                        CheckOutcome::Unsatisfied(reason) => reasons.push(reason),
                    }
                }
                CheckOutcome::Unsatisfied(reasons.join("; "))
            }
        };

        Ok(outcome)
    }
}

fn read_table(
    runner: &dyn CommandRunner,
    device: &str,
    limits: &RunLimits,
) -> Result<Option<PartedTable>> {
    let command = probe::print_command(device);
    let output = runner.run(&command, limits)?;
    if !output.succeeded(&command) {
        return Ok(None);
    }
    Ok(PartedTable::parse(&output.stdout))
}

/// One idempotent provisioning action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub command: CommandSpec,
    pub check: PostCondition,
    /// Destroys data; needs a confirmation token
    #[serde(default)]
    pub irreversible: bool,
    /// Kill the command after this long; `None` runs unbounded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl Step {
    pub fn new(name: impl Into<String>, command: CommandSpec, check: PostCondition) -> Self {
        Self {
            name: name.into(),
            command,
            check,
            irreversible: false,
            timeout: None,
        }
    }

    /// Mark as destructive
    pub fn irreversible(mut self) -> Self {
        self.irreversible = true;
        self
    }

    /// Bound the command's run time
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Stable hash of the step's intended effect
    ///
    /// Derived from the command and the check only, so renaming a step does
    /// not change its identity.
    pub fn idempotency_key(&self) -> String {
        let encoded = serde_json::to_vec(&(&self.command, &self.check))
            .unwrap_or_else(|_| format!("{:?}{:?}", self.command, self.check).into_bytes());
        blake3::hash(&encoded).to_hex()[..16].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;
    use crate::types::CommandOutput;

    fn blkid(device: &str) -> CommandSpec {
        CommandSpec::new("blkid").args(["-s", "TYPE", "-o", "value", device])
    }

    #[test]
    fn test_command_equals() {
        let runner = ScriptedRunner::new().respond("blkid", CommandOutput::ok("ext4\n"));
        let check = PostCondition::output_equals(blkid("/dev/sda3"), "ext4");
        let outcome = check.evaluate(&runner, Duration::from_secs(1)).unwrap();
        assert_eq!(outcome, CheckOutcome::Satisfied);

        let check = PostCondition::output_equals(blkid("/dev/sda3"), "xfs");
        let outcome = check.evaluate(&runner, Duration::from_secs(1)).unwrap();
        assert!(matches!(outcome, CheckOutcome::Unsatisfied(reason) if reason.contains("'ext4'")));
    }

    #[test]
    fn test_failed_check_command_is_unsatisfied() {
        let runner = ScriptedRunner::new().respond("blkid", CommandOutput::failed(2, ""));
        let check = PostCondition::output_equals(blkid("/dev/sda3"), "ext4");
        assert!(!check.evaluate(&runner, Duration::from_secs(1)).unwrap().is_satisfied());
    }

    #[test]
    fn test_file_checks() {
        let dir = tempfile::tempdir().unwrap();
        let hostname = dir.path().join("hostname");
        std::fs::write(&hostname, "box\n").unwrap();
        let runner = ScriptedRunner::new();

        assert!(PostCondition::path_exists(&hostname)
            .evaluate(&runner, Duration::from_secs(1))
            .unwrap()
            .is_satisfied());
        assert!(PostCondition::file_contains(&hostname, "box")
            .evaluate(&runner, Duration::from_secs(1))
            .unwrap()
            .is_satisfied());
        assert!(!PostCondition::file_contains(dir.path().join("missing"), "box")
            .evaluate(&runner, Duration::from_secs(1))
            .unwrap()
            .is_satisfied());
        assert!(PostCondition::path_exists(dir.path().join("missing"))
            .negate()
            .evaluate(&runner, Duration::from_secs(1))
            .unwrap()
            .is_satisfied());
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_partition_checks_read_parted() {
        let table = concat!(
            "BYT;\n",
            "/dev/sda:8192MiB:scsi:512:512:gpt:Disk:;\n",
            "1:1.00MiB:513MiB:512MiB:fat32:esp:boot, esp;\n",
        );
        let runner = ScriptedRunner::new().respond("parted", CommandOutput::ok(table));
        let expected = ExpectedPartition {
            number: 1,
            start_mib: 1,
            end_mib: Some(513),
        };

        let heartbeat = Duration::from_secs(1);
        let check = PostCondition::Partition {
            device: "/dev/sda".into(),
            expected,
        };
        assert!(check.evaluate(&runner, heartbeat).unwrap().is_satisfied());

        let check = PostCondition::PartitionFlag {
            device: "/dev/sda".into(),
            number: 1,
            flag: "esp".into(),
        };
        assert!(check.evaluate(&runner, heartbeat).unwrap().is_satisfied());

        let check = PostCondition::Partition {
            device: "/dev/sda".into(),
            expected: ExpectedPartition {
                number: 2,
                start_mib: 513,
                end_mib: None,
            },
        };
        assert!(!check.evaluate(&runner, heartbeat).unwrap().is_satisfied());
    }

    #[test]
    fn test_all_stops_at_first_failure() {
        let runner = ScriptedRunner::new().respond("blkid", CommandOutput::ok("swap"));
        let check = PostCondition::all(vec![
            PostCondition::output_equals(blkid("/dev/sda2"), "swap"),
            PostCondition::output_equals(blkid("/dev/sda3"), "ext4"),
        ]);
        assert!(!check.evaluate(&runner, Duration::from_secs(1)).unwrap().is_satisfied());
        assert_eq!(runner.calls().len(), 2);
    }

    #[test]
    fn test_line_match_is_whole_line() {
        let swaps = || CommandSpec::new("swapon").args(["--show=NAME", "--noheadings"]);
        let runner = ScriptedRunner::new().respond("swapon", CommandOutput::ok("/dev/sda10\n"));
        let heartbeat = Duration::from_secs(1);

        let check = PostCondition::output_has_line(swaps(), "/dev/sda1");
        assert!(!check.evaluate(&runner, heartbeat).unwrap().is_satisfied());
        assert!(check.clone().negate().evaluate(&runner, heartbeat).unwrap().is_satisfied());

        let runner = ScriptedRunner::new()
            .respond("swapon", CommandOutput::ok("/dev/sda10\n/dev/sda1  \n"));
        assert!(check.evaluate(&runner, heartbeat).unwrap().is_satisfied());
    }

    #[test]
    fn test_any_holds_when_one_alternative_does() {
        let runner = ScriptedRunner::new().with_fact("group");
        let check = PostCondition::any(vec![
            crate::testing::fact_holds("package"),
            crate::testing::fact_holds("group"),
        ]);
        let heartbeat = Duration::from_secs(1);
        assert!(check.evaluate(&runner, heartbeat).unwrap().is_satisfied());

        let check = PostCondition::any(vec![
            crate::testing::fact_holds("package"),
            crate::testing::fact_holds("other"),
        ]);
        let outcome = check.evaluate(&runner, heartbeat).unwrap();
        assert!(matches!(outcome, CheckOutcome::Unsatisfied(reason) if reason.contains("; ")));
    }

    #[test]
    fn test_idempotency_key_ignores_name() {
        let check = PostCondition::output_equals(blkid("/dev/sda3"), "ext4");
        let mkfs = |device: &str| CommandSpec::new("mkfs.ext4").arg(device);
        let a = Step::new("format root", mkfs("/dev/sda3"), check.clone());
        let b = Step::new("mkfs", mkfs("/dev/sda3"), check.clone());
        let c = Step::new("format root", mkfs("/dev/sdb3"), check);

        assert_eq!(a.idempotency_key(), b.idempotency_key());
        assert_ne!(a.idempotency_key(), c.idempotency_key());
        assert_eq!(a.idempotency_key().len(), 16);
    }
}
