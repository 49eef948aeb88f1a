//! Stage ordering

use std::collections::HashSet;

use crate::error::GraphError;
use crate::step::Step;

/// A named group of steps with explicit dependencies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub name: String,
    pub steps: Vec<Step>,
    /// Names of stages that must complete first
    pub depends_on: Vec<String>,
    /// Effects do not survive a reboot (mounts, swap); re-checked even
    /// when the record says Completed
    pub volatile: bool,
}

impl Stage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            depends_on: Vec::new(),
            volatile: false,
        }
    }

    /// Mark the stage's effects as lost on reboot
    pub fn volatile(mut self) -> Self {
        self.volatile = true;
        self
    }

    /// Add a dependency
    pub fn after(mut self, stage: impl Into<String>) -> Self {
        self.depends_on.push(stage.into());
        self
    }

    /// Append a step
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Append several steps
    pub fn steps(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.steps.extend(steps);
        self
    }

    /// Whether any step destroys data
    pub fn is_irreversible(&self) -> bool {
        self.steps.iter().any(|s| s.irreversible)
    }

    /// Hash of the stage's steps and dependencies
    ///
    /// Stored in the progress record so an edited stage is not mistaken for
    /// the one that completed or failed earlier.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for step in &self.steps {
            hasher.update(step.idempotency_key().as_bytes());
            hasher.update(if step.irreversible { b"!" } else { b"." });
        }
        hasher.update(b"|");
        for dep in &self.depends_on {
            hasher.update(dep.as_bytes());
            hasher.update(b",");
        }
        hasher.finalize().to_hex()[..16].to_string()
    }
}

/// Order stages so every stage comes after its dependencies
///
/// Among stages that are ready at the same time, the one listed first in
/// the input goes first, so the result is deterministic.
pub fn order(stages: Vec<Stage>) -> Result<Vec<Stage>, GraphError> {
    let mut names = HashSet::new();
    for stage in &stages {
        if !names.insert(stage.name.as_str()) {
            return Err(GraphError::DuplicateStage {
                stage: stage.name.clone(),
            });
        }
    }
    for stage in &stages {
        if let Some(dep) = stage.depends_on.iter().find(|d| !names.contains(d.as_str())) {
            return Err(GraphError::UnknownDependency {
                stage: stage.name.clone(),
                dependency: dep.clone(),
            });
        }
    }

    let mut remaining: Vec<Option<Stage>> = stages.into_iter().map(Some).collect();
    let mut placed: HashSet<String> = HashSet::new();
    let mut ordered = Vec::with_capacity(remaining.len());

    while ordered.len() < remaining.len() {
        let ready = remaining.iter().position(|slot| {
            slot.as_ref()
                .is_some_and(|s| s.depends_on.iter().all(|d| placed.contains(d)))
        });

        let Some(index) = ready else {
            return Err(GraphError::Cycle {
                path: find_cycle(&remaining, &placed),
            });
        };

        if let Some(stage) = remaining[index].take() {
            placed.insert(stage.name.clone());
            ordered.push(stage);
        }
    }

    Ok(ordered)
}

/// Walk unplaced dependencies until a stage repeats
///
/// Every unplaced stage has at least one unplaced dependency, otherwise it
/// would have been ready, so the walk always closes a loop.
fn find_cycle(remaining: &[Option<Stage>], placed: &HashSet<String>) -> Vec<String> {
    let unplaced: Vec<&Stage> = remaining.iter().flatten().collect();

    let mut path: Vec<String> = Vec::new();
    let mut current = unplaced.first().copied();

    while let Some(stage) = current {
        if let Some(start) = path.iter().position(|n| *n == stage.name) {
            let mut cycle = path.split_off(start);
            cycle.push(stage.name.clone());
            return cycle;
        }
        path.push(stage.name.clone());
        current = stage
            .depends_on
            .iter()
            .find(|d| !placed.contains(*d))
            .and_then(|d| unplaced.iter().find(|s| s.name == *d).copied());
    }

    path
}

/// Stages in execution order
#[derive(Debug, Clone)]
pub struct StageGraph {
    stages: Vec<Stage>,
}

impl StageGraph {
    /// Order and validate `stages`
    pub fn new(stages: Vec<Stage>) -> Result<Self, GraphError> {
        Ok(Self {
            stages: order(stages)?,
        })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn get(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Index of `name` in execution order
    pub fn position(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name == name)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|s| s.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::PostCondition;
    use crate::types::CommandSpec;

    fn names(stages: &[Stage]) -> Vec<&str> {
        stages.iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn test_order_respects_dependencies() {
        let stages = vec![
            Stage::new("mount").after("format"),
            Stage::new("partition"),
            Stage::new("format").after("partition"),
        ];
        let ordered = order(stages).unwrap();
        assert_eq!(names(&ordered), vec!["partition", "format", "mount"]);
    }

    #[test]
    fn test_independent_stages_keep_input_order() {
        let stages = vec![
            Stage::new("base"),
            Stage::new("desktop").after("base"),
            Stage::new("bootloader").after("base"),
            Stage::new("finalize").after("desktop").after("bootloader"),
        ];
        let ordered = order(stages).unwrap();
        assert_eq!(
            names(&ordered),
            vec!["base", "desktop", "bootloader", "finalize"]
        );
    }

    #[test]
    fn test_cycle_reports_path() {
        let stages = vec![
            Stage::new("partition"),
            Stage::new("a").after("partition").after("c"),
            Stage::new("b").after("a"),
            Stage::new("c").after("b"),
        ];
        let err = order(stages).unwrap_err();
        assert_eq!(
            err,
            GraphError::Cycle {
                path: vec!["a".into(), "c".into(), "b".into(), "a".into()]
            }
        );
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let err = order(vec![Stage::new("a").after("a")]).unwrap_err();
        assert_eq!(
            err,
            GraphError::Cycle {
                path: vec!["a".into(), "a".into()]
            }
        );
    }

    #[test]
    fn test_unknown_and_duplicate_stages() {
        let err = order(vec![Stage::new("format").after("partition")]).unwrap_err();
        assert!(matches!(
            err,
            GraphError::UnknownDependency { dependency, .. } if dependency == "partition"
        ));

        let err = order(vec![Stage::new("a"), Stage::new("a")]).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateStage { stage } if stage == "a"));
    }

    #[test]
    fn test_graph_lookup() {
        let graph = StageGraph::new(vec![
            Stage::new("format").after("partition"),
            Stage::new("partition"),
        ])
        .unwrap();
        assert_eq!(graph.position("partition"), Some(0));
        assert_eq!(graph.position("format"), Some(1));
        assert!(graph.get("mount").is_none());
        assert_eq!(graph.names().collect::<Vec<_>>(), vec!["partition", "format"]);
    }

    #[test]
    fn test_fingerprint_tracks_steps() {
        let step = |dev: &str| {
            Step::new(
                "mkfs",
                CommandSpec::new("mkfs.ext4").arg(dev),
                PostCondition::path_exists(dev),
            )
        };
        let a = Stage::new("format").step(step("/dev/sda3"));
        let b = Stage::new("format").step(step("/dev/sda3"));
        let c = Stage::new("format").step(step("/dev/sdb3"));
        let d = Stage::new("format").step(step("/dev/sda3").irreversible());

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_ne!(a.fingerprint(), d.fingerprint());
        assert!(d.is_irreversible());
        assert!(!a.is_irreversible());
    }
}
