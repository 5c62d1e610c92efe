use std::collections::HashSet;
use std::fmt;

use crate::cpu::CpuSet;
use crate::error::{ActionError, ConfigError};
use crate::predicate::{Predicate, StateRef};
use crate::sampler::{Kind, Sampler};
use crate::state::StateModel;
use crate::sysfs::SysfsIo;

/// Side effect executed once when a rule enters its state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Write a max frequency to every CPU
    SetMaxFrequency(u64),
    /// Run a shell command, ignoring its output
    RunCommand(String),
}

impl Action {
    pub fn run(&self, io: &dyn SysfsIo, cpus: &CpuSet) -> Result<(), ActionError> {
        match self {
            Self::SetMaxFrequency(hz) => cpus.set_all_max_frequency(io, *hz)?,
            Self::RunCommand(command) => {
                let output = io.run_command(command)?;
                tracing::debug!(%command, output = output.trim(), "command finished");
            }
        }
        Ok(())
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetMaxFrequency(hz) => write!(f, "set max frequency {hz}"),
            Self::RunCommand(command) => write!(f, "run `{command}`"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    /// Value predicates first, then state predicates
    pub predicates: Vec<Predicate>,
    pub target: StateRef,
    pub action: Action,
}

impl Rule {
    /// Build a rule from predicate strings such as `ac_status=off`
    pub fn new(name: &str, conditions: &[&str], target: &str, action: Action) -> Result<Self, ConfigError> {
        let mut predicates = conditions
            .iter()
            .map(|c| c.parse::<Predicate>())
            .collect::<Result<Vec<_>, _>>()?;
        // stable: keeps declaration order within each class
        predicates.sort_by_key(Predicate::is_state);

        Ok(Self {
            name: name.to_string(),
            predicates,
            target: target.parse()?,
            action,
        })
    }
}

/// One group changing its active member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub group: String,
    pub from: Option<String>,
    pub to: String,
}

/// What happened during one evaluation
#[derive(Debug, Default)]
pub struct TickOutcome {
    pub transitions: Vec<Transition>,
    pub fired: Vec<String>,
    pub failures: Vec<(String, ActionError)>,
}

/// Ordered rule table driving the state groups
pub struct Evaluator {
    rules: Vec<Rule>,
    states: StateModel,
    current: Vec<Transition>,
}

impl Evaluator {
    /// Check every rule against the declared quantities and states
    pub fn new(rules: Vec<Rule>, sampler: &Sampler) -> Result<Self, ConfigError> {
        let mut states = StateModel::default();
        for rule in &rules {
            states.declare(&rule.target.group, &rule.target.member);
        }

        for rule in &rules {
            let reject = |reason: String| ConfigError::Rule {
                rule: rule.name.clone(),
                reason,
            };
            for predicate in &rule.predicates {
                match predicate {
                    Predicate::Compare { quantity, .. } => match sampler.kind_of(quantity) {
                        None => return Err(reject(format!("unknown quantity `{quantity}`"))),
                        Some(Kind::Sensor) => {
                            return Err(reject(format!("`{predicate}` compares sensor `{quantity}` numerically")));
                        }
                        Some(Kind::Gauge) => {}
                    },
                    Predicate::Equals { quantity, .. } => {
                        if sampler.kind_of(quantity).is_none() {
                            return Err(reject(format!("unknown quantity `{quantity}`")));
                        }
                    }
                    Predicate::Entered { group, to } => check_state(&states, group, &[to]).map_err(reject)?,
                    Predicate::Moved { group, from, to } => {
                        check_state(&states, group, &[from, to]).map_err(reject)?
                    }
                    Predicate::Exited { group, from } => check_state(&states, group, &[from]).map_err(reject)?,
                }
            }
        }

        Ok(Self {
            rules,
            states,
            current: Vec::new(),
        })
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn active(&self, group: &str) -> Option<&str> {
        self.states.active(group)
    }

    pub fn states(&self) -> &StateModel {
        &self.states
    }

    /// Run one evaluation pass over the rule table
    ///
    /// The first rule whose predicates hold claims its group for the tick,
    /// even when its target is already active; later rules for that group
    /// are not considered. Transitions are visible to every rule of the same
    /// tick; passes repeat until no rule fires, which is bounded by the
    /// number of groups.
    pub fn evaluate(&mut self, io: &dyn SysfsIo, cpus: &CpuSet, sampler: &Sampler) -> TickOutcome {
        let Self {
            rules,
            states,
            current,
        } = self;
        current.clear();
        let mut claimed: HashSet<&str> = HashSet::new();
        let mut outcome = TickOutcome::default();

        loop {
            let mut fired = false;
            for rule in rules.iter() {
                let group = rule.target.group.as_str();
                let member = rule.target.member.as_str();
                if claimed.contains(group) {
                    continue;
                }
                if !rule.predicates.iter().all(|p| holds(p, sampler, current)) {
                    continue;
                }
                claimed.insert(group);
                if states.active(group) == Some(member) {
                    continue;
                }

                let from = states.activate(group, member);
                tracing::info!(
                    rule = %rule.name,
                    from = from.as_deref().unwrap_or("-"),
                    to = %rule.target,
                    action = %rule.action,
                    "state entered"
                );
                let transition = Transition {
                    group: group.to_string(),
                    from,
                    to: member.to_string(),
                };
                current.push(transition.clone());
                outcome.transitions.push(transition);
                outcome.fired.push(rule.name.clone());
                fired = true;

                if let Err(e) = rule.action.run(io, cpus) {
                    tracing::error!(rule = %rule.name, error = %e, "action failed");
                    outcome.failures.push((rule.name.clone(), e));
                }
            }
            if !fired {
                break;
            }
        }

        outcome
    }

    /// Evaluate one predicate against the latest samples and the last tick's transitions
    pub fn holds(&self, predicate: &Predicate, sampler: &Sampler) -> bool {
        holds(predicate, sampler, &self.current)
    }
}

fn holds(predicate: &Predicate, sampler: &Sampler, transitions: &[Transition]) -> bool {
    match predicate {
        Predicate::Compare { quantity, .. } | Predicate::Equals { quantity, .. } => {
            predicate.matches_value(sampler.latest(quantity))
        }
        Predicate::Entered { group, to } => transitions
            .iter()
            .any(|t| &t.group == group && &t.to == to),
        Predicate::Moved { group, from, to } => transitions
            .iter()
            .any(|t| &t.group == group && t.from.as_ref() == Some(from) && &t.to == to),
        Predicate::Exited { group, from } => transitions
            .iter()
            .any(|t| &t.group == group && t.from.as_ref() == Some(from) && &t.to != from),
    }
}

fn check_state(states: &StateModel, group: &str, members: &[&String]) -> Result<(), String> {
    if !states.has_group(group) {
        return Err(format!("unknown state group `{group}`"));
    }
    match members.iter().find(|m| !states.has_member(group, m)) {
        Some(m) => Err(format!("`{group}` has no state `{m}`")),
        None => Ok(()),
    }
}
