//! # Provision
//!
//! Resumable, idempotent provisioning of a target disk.
//!
//! This crate plans a disk layout, orders installation stages by their
//! dependencies, and executes them step by step with a persisted progress
//! record, so an interrupted install resumes where it stopped instead of
//! repeating destructive operations.
//!
//! ## Core Concepts
//!
//! - **DiskPlan**: Immutable partition layout for one device, validated
//!   before anything touches the disk
//! - **Stage**: Named group of steps with explicit dependencies
//! - **Step**: One external command plus the post-condition it establishes
//! - **StageGraph**: Stages in dependency order
//! - **StepExecutor**: Runs stages, skipping steps whose post-condition
//!   already holds, and records progress after every transition
//! - **ConfirmationToken**: Consent for irreversible steps, bound to the
//!   digest of one exact plan
//!
//! ## Example
//!
//! ```ignore
//! use provision::{
//!     AutoApprove, DiskIntent, DiskPlan, Firmware, RecordStore, Stage, StageGraph,
//!     Step, StepExecutor, PostCondition, render, validate,
//! };
//!
//! let plan = DiskPlan::from_intent(&DiskIntent::new("/dev/sda", Firmware::Uefi), 8192)?;
//! validate(&plan)?;
//!
//! let partition = Stage::new("partition").steps(
//!     render(&plan)
//!         .into_iter()
//!         .map(|cmd| Step::new(cmd.to_string(), cmd, PostCondition::path_exists("/dev/sda1"))
//!             .irreversible()),
//! );
//! let graph = StageGraph::new(vec![partition])?;
//!
//! let summary = StepExecutor::new(runner, plan.summary())
//!     .with_store(RecordStore::new("/var/lib/rootstrap/progress.toml"))?
//!     .with_gate(Box::new(AutoApprove))
//!     .run_plan(&graph)?;
//! ```
//!
//! ## Provider Traits
//!
//! - [`CommandRunner`]: Spawns external commands
//! - [`ConfirmationGate`]: Supplies consent for irreversible steps
//! - [`ProgressCallback`]: Receives stage and step transitions
//!
//! The engine never spawns processes or prompts by itself, which keeps it
//! testable with scripted collaborators.

pub mod confirm;
pub mod context;
pub mod disk;
pub mod error;
pub mod executor;
pub mod graph;
pub mod record;
pub mod step;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export main types at crate root
pub use confirm::{Confirmation, ConfirmationToken, PlanDigest};
pub use context::{
    AutoApprove, AutoDeny, CancelFlag, CommandRunner, ConfirmationGate, NoProgress,
    ProgressCallback,
};
pub use disk::{
    DataIntent, DiskIntent, DiskPlan, Filesystem, Firmware, PartitionRole, PartitionSpec,
    PlanSummary, SizeSpec, TableLabel, render, validate,
};
pub use error::{ExecError, GraphError, PlanError, RecordError};
pub use executor::StepExecutor;
pub use graph::{Stage, StageGraph, order};
pub use record::{ProgressRecord, RecordStore, StageRecord};
pub use step::{CheckOutcome, Expect, PostCondition, Step};
pub use types::{
    CommandOutput, CommandSpec, ExecuteOptions, RunLimits, RunSummary, StageOutcome, StageState,
    StepState,
};
