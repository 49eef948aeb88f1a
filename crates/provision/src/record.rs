//! Persisted progress record
//!
//! The record maps each stage name to its last known state. It is written
//! after every stage and step transition so an interrupted install resumes
//! at the first stage that is not Completed. Unknown fields are ignored on
//! load, keeping older and newer records readable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::confirm::PlanDigest;
use crate::error::RecordError;
use crate::graph::{Stage, StageGraph};
use crate::types::{StageState, StepState};

/// Progress of every stage seen so far
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    /// Digest of the plan this record was written for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_digest: Option<PlanDigest>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub stages: BTreeMap<String, StageRecord>,
}

/// Recorded state of one stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    #[serde(default)]
    pub state: StageState,

    /// [`Stage::fingerprint`] when the state was recorded
    #[serde(default)]
    pub fingerprint: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    /// Error that left the stage Failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Step name to state
    #[serde(default)]
    pub steps: BTreeMap<String, StepState>,
}

impl ProgressRecord {
    /// Recorded state of `stage`, Pending if never seen
    pub fn state_of(&self, stage: &str) -> StageState {
        self.stages.get(stage).map(|s| s.state).unwrap_or_default()
    }

    pub fn stage(&self, stage: &str) -> Option<&StageRecord> {
        self.stages.get(stage)
    }

    fn entry(&mut self, stage: &str) -> &mut StageRecord {
        self.updated_at = Some(Utc::now());
        self.stages.entry(stage.to_string()).or_default()
    }

    /// Move `stage` to `state`, clearing step detail when starting over
    pub fn set_stage(&mut self, stage: &Stage, state: StageState) {
        let fingerprint = stage.fingerprint();
        let record = self.entry(&stage.name);
        if state == StageState::Running && record.state != StageState::Running {
            record.steps.clear();
        }
        if state != StageState::Failed {
            record.last_error = None;
        }
        record.state = state;
        record.fingerprint = fingerprint;
        record.updated_at = Some(Utc::now());
    }

    /// Mark `stage` Failed with the error that stopped it
    pub fn set_failed(&mut self, stage: &Stage, error: impl Into<String>) {
        self.set_stage(stage, StageState::Failed);
        self.entry(&stage.name).last_error = Some(error.into());
    }

    pub fn set_step(&mut self, stage: &str, step: &str, state: StepState) {
        let record = self.entry(stage);
        record.steps.insert(step.to_string(), state);
        record.updated_at = Some(Utc::now());
    }

    /// Drop what is recorded for `stage`; returns whether anything was there
    pub fn reset_stage(&mut self, stage: &str) -> bool {
        self.updated_at = Some(Utc::now());
        self.stages.remove(stage).is_some()
    }

    /// Reset every recorded stage whose definition changed
    ///
    /// A stage that completed or failed under a different fingerprint is
    /// Pending again; its post-conditions decide what still needs to run.
    /// Returns the names of the stages that were reset.
    pub fn reconcile(&mut self, graph: &StageGraph) -> Vec<String> {
        let mut reset = Vec::new();
        for stage in graph.stages() {
            let Some(record) = self.stages.get(&stage.name) else {
                continue;
            };
            if record.state != StageState::Pending && record.fingerprint != stage.fingerprint() {
                log::info!(
                    "Stage '{}' changed since it was {}; treating it as pending",
                    stage.name,
                    record.state
                );
                reset.push(stage.name.clone());
            }
        }
        for name in &reset {
            self.reset_stage(name);
        }
        reset
    }

    /// Whether every stage in `graph` is Completed
    pub fn is_complete(&self, graph: &StageGraph) -> bool {
        graph
            .names()
            .all(|name| self.state_of(name) == StageState::Completed)
    }
}

/// Loads and saves a [`ProgressRecord`] at a fixed path
#[derive(Debug, Clone)]
pub struct RecordStore {
    path: PathBuf,
}

impl RecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the record, or an empty one if the file does not exist
    pub fn load(&self) -> Result<ProgressRecord, RecordError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("No progress record at {}, starting fresh", self.path.display());
                return Ok(ProgressRecord::default());
            }
            Err(source) => {
                return Err(RecordError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let record = toml::from_str(&content).map_err(|source| RecordError::Parse {
            path: self.path.clone(),
            source,
        })?;

        log::debug!("Loaded progress record from {}", self.path.display());
        Ok(record)
    }

    /// Write the record atomically (temporary file, then rename)
    pub fn save(&self, record: &ProgressRecord) -> Result<(), RecordError> {
        let write_err = |source| RecordError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir).map_err(write_err)?;
        }

        let content = toml::to_string_pretty(record)?;
        let tmp = self.path.with_extension("toml.tmp");
        fs::write(&tmp, content).map_err(write_err)?;
        fs::rename(&tmp, &self.path).map_err(write_err)?;

        log::debug!("Saved progress record to {}", self.path.display());
        Ok(())
    }

    /// Delete the record; a missing file is not an error
    pub fn remove(&self) -> Result<(), RecordError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                log::debug!("Removed progress record {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(RecordError::Write {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{PostCondition, Step};
    use crate::types::CommandSpec;

    fn stage(name: &str, arg: &str) -> Stage {
        Stage::new(name).step(Step::new(
            "touch",
            CommandSpec::new("touch").arg(arg),
            PostCondition::path_exists(arg),
        ))
    }

    #[test]
    fn test_state_transitions() {
        let format = stage("format", "/a");
        let mut record = ProgressRecord::default();
        assert_eq!(record.state_of("format"), StageState::Pending);

        record.set_stage(&format, StageState::Running);
        record.set_step("format", "touch", StepState::Completed);
        record.set_failed(&format, "boom");
        let entry = record.stage("format").unwrap();
        assert_eq!(entry.state, StageState::Failed);
        assert_eq!(entry.last_error.as_deref(), Some("boom"));
        assert_eq!(entry.steps["touch"], StepState::Completed);

        record.set_stage(&format, StageState::Running);
        let entry = record.stage("format").unwrap();
        assert!(entry.steps.is_empty());
        assert!(entry.last_error.is_none());
    }

    #[test]
    fn test_reconcile_resets_changed_stages() {
        let mut record = ProgressRecord::default();
        record.set_stage(&stage("partition", "/a"), StageState::Completed);
        record.set_stage(&stage("format", "/b"), StageState::Completed);

        let graph = StageGraph::new(vec![stage("partition", "/a"), stage("format", "/c")]).unwrap();
        assert_eq!(record.reconcile(&graph), vec!["format".to_string()]);
        assert_eq!(record.state_of("partition"), StageState::Completed);
        assert_eq!(record.state_of("format"), StageState::Pending);
        assert!(!record.is_complete(&graph));
    }

    #[test]
    fn test_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path().join("state").join("progress.toml"));
        assert_eq!(store.load().unwrap(), ProgressRecord::default());

        let mut record = ProgressRecord {
            plan_digest: Some(PlanDigest::of(b"plan")),
            ..Default::default()
        };
        record.set_stage(&stage("partition", "/a"), StageState::Completed);
        store.save(&record).unwrap();
        assert!(store.exists());
        assert!(!store.path().with_extension("toml.tmp").exists());

        let loaded = store.load().unwrap();
        assert_eq!(loaded, record);

        store.remove().unwrap();
        assert!(!store.exists());
        store.remove().unwrap();
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.toml");
        fs::write(
            &path,
            "schema = 7\n\n[stages.partition]\nstate = \"completed\"\nfingerprint = \"abc\"\nfuture = true\n",
        )
        .unwrap();

        let record = RecordStore::new(&path).load().unwrap();
        assert_eq!(record.state_of("partition"), StageState::Completed);
    }

    #[test]
    fn test_corrupt_record_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.toml");
        fs::write(&path, "stages = [").unwrap();

        let err = RecordStore::new(&path).load().unwrap_err();
        assert!(matches!(err, RecordError::Parse { .. }));
    }
}
