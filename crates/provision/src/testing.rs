//! Scripted command runner for engine tests
//!
//! Responses are matched by prefix of the rendered command line; the most
//! recently added matching rule wins. A rule given several outputs returns
//! them in turn and then repeats the last one.
//!
//! The runner also keeps a set of "facts" so tests can model state that a
//! command creates and a check observes: `fact-set NAME` records a fact,
//! `fact-test NAME` succeeds only when it is recorded.

use anyhow::{Result, bail};
use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};

use crate::context::CommandRunner;
use crate::step::{PostCondition, Step};
use crate::types::{CommandOutput, CommandSpec, RunLimits};

struct Rule {
    prefix: String,
    outputs: VecDeque<CommandOutput>,
}

#[derive(Default)]
pub struct ScriptedRunner {
    rules: RefCell<Vec<Rule>>,
    unrunnable: RefCell<HashSet<String>>,
    facts: RefCell<HashSet<String>>,
    calls: RefCell<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands starting with `prefix` with `output`
    pub fn respond(self, prefix: &str, output: CommandOutput) -> Self {
        self.respond_seq(prefix, vec![output])
    }

    /// Answer commands starting with `prefix` with each output in turn
    pub fn respond_seq(self, prefix: &str, outputs: Vec<CommandOutput>) -> Self {
        self.rules.borrow_mut().push(Rule {
            prefix: prefix.to_string(),
            outputs: outputs.into(),
        });
        self
    }

    /// Make `program` fail to start
    pub fn unrunnable(self, program: &str) -> Self {
        self.unrunnable.borrow_mut().insert(program.to_string());
        self
    }

    /// Record a fact up front, as if an earlier run had created it
    pub fn with_fact(self, name: &str) -> Self {
        self.facts.borrow_mut().insert(name.to_string());
        self
    }

    pub fn has_fact(&self, name: &str) -> bool {
        self.facts.borrow().contains(name)
    }

    /// Every command line run so far, checks included
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    /// Command lines run so far that change state (no `fact-test`)
    pub fn actions(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter(|c| !c.starts_with("fact-test"))
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, spec: &CommandSpec, _limits: &RunLimits) -> Result<CommandOutput> {
        let line = spec.to_string();
        self.calls.borrow_mut().push(line.clone());

        if self.unrunnable.borrow().contains(&spec.program) {
            bail!("{}: command not found", spec.program);
        }

        let mut rules = self.rules.borrow_mut();
        if let Some(rule) = rules.iter_mut().rev().find(|r| line.starts_with(&r.prefix)) {
            let output = if rule.outputs.len() > 1 {
                rule.outputs.pop_front()
            } else {
                rule.outputs.front().cloned()
            };
            return Ok(output.unwrap_or_else(|| CommandOutput::ok("")));
        }
        drop(rules);

        let fact = spec.args.first().cloned().unwrap_or_default();
        match spec.program.as_str() {
            "fact-set" => {
                self.facts.borrow_mut().insert(fact);
                Ok(CommandOutput::ok(""))
            }
            "fact-test" if self.has_fact(&fact) => Ok(CommandOutput::ok("")),
            "fact-test" => Ok(CommandOutput::failed(1, "")),
            _ => Ok(CommandOutput::ok("")),
        }
    }
}

/// Command recording `name` as a fact
pub fn set_fact(name: &str) -> CommandSpec {
    CommandSpec::new("fact-set").arg(name)
}

/// Check that `name` is a recorded fact
pub fn fact_holds(name: &str) -> PostCondition {
    PostCondition::succeeds(CommandSpec::new("fact-test").arg(name))
}

/// Step that creates fact `name` and checks for it
pub fn fact_step(name: &str) -> Step {
    Step::new(name, set_fact(name), fact_holds(name))
}
