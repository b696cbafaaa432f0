//! Dynamically described action graphs.
//!
//! A [`PlanNode`] tree is plain data, usually deserialized from the `plans`
//! table of a [`FlowConfig`](crate::config::FlowConfig). [`PlanBuilder`]
//! turns it into an [`Operand`] using the public combinators, so a plan obeys
//! exactly the same contract as a graph built in code: `together` members are
//! checked while building, everything else is checked when it runs.

use crate::action::{instantly, instantly_with, Action, Operand};
use crate::collections::{any, sequence, together};
use crate::common::lock;
use crate::control::{branch, repeat_until, repeat_while, unless, when};
use crate::error::PlanError;
use crate::handlers::EventBindings;
use crate::timing::{delay_on, wait_on, Timer, TokioTimer};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

/// One node of a plan, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanNode {
    /// Logs `message` at `info` level.
    Log { message: String },
    /// Waits `ms` milliseconds.
    Wait { ms: u64 },
    /// Waits `ms` milliseconds, then runs `step`.
    Delay { ms: u64, step: Box<PlanNode> },
    Sequence { steps: Vec<PlanNode> },
    Together { steps: Vec<PlanNode> },
    Any { steps: Vec<PlanNode> },
    /// Adds `by` (default 1) to a counter.
    Increment {
        counter: String,
        #[serde(default = "default_increment")]
        by: i64,
    },
    Branch {
        condition: Condition,
        then: Box<PlanNode>,
        #[serde(rename = "else")]
        otherwise: Box<PlanNode>,
    },
    When { condition: Condition, step: Box<PlanNode> },
    Unless { condition: Condition, step: Box<PlanNode> },
    RepeatWhile { condition: Condition, body: Box<PlanNode> },
    RepeatUntil { condition: Condition, body: Box<PlanNode> },
    /// Binds a handler that logs `message` (if any) and completes on the
    /// first matching trigger.
    On {
        selector: String,
        event: String,
        #[serde(default)]
        message: Option<String>,
    },
    /// Detaches every handler for the pair.
    Off { selector: String, event: String },
    /// A named action registered on the builder.
    Ref { name: String },
}

fn default_increment() -> i64 {
    1
}

/// A test of a named counter against a constant.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Condition {
    pub counter: String,
    pub op: Comparison,
    pub value: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Lt,
    Le,
    Eq,
    Ne,
    Ge,
    Gt,
    DivisibleBy,
    NotDivisibleBy,
}

impl Comparison {
    pub fn holds(self, left: i64, right: i64) -> bool {
        match self {
            Comparison::Lt => left < right,
            Comparison::Le => left <= right,
            Comparison::Eq => left == right,
            Comparison::Ne => left != right,
            Comparison::Ge => left >= right,
            Comparison::Gt => left > right,
            Comparison::DivisibleBy => left.checked_rem(right) == Some(0),
            Comparison::NotDivisibleBy => left.checked_rem(right).is_some_and(|rem| rem != 0),
        }
    }
}

/// Named integer counters shared by every plan built from the same builder.
/// Missing counters read as 0.
#[derive(Debug, Clone, Default)]
pub struct Counters {
    values: Arc<Mutex<BTreeMap<String, i64>>>,
}

impl Counters {
    pub fn new(initial: BTreeMap<String, i64>) -> Self {
        Self {
            values: Arc::new(Mutex::new(initial)),
        }
    }

    pub fn get(&self, name: &str) -> i64 {
        lock(&self.values).get(name).copied().unwrap_or(0)
    }

    /// Adds `by` to the counter and returns its new value.
    /// Counters saturate at the bounds of `i64`.
    pub fn add(&self, name: &str, by: i64) -> i64 {
        let mut values = lock(&self.values);
        let value = values.entry(name.to_string()).or_insert(0);
        *value = value.saturating_add(by);
        *value
    }

    pub fn set(&self, name: &str, value: i64) {
        lock(&self.values).insert(name.to_string(), value);
    }

    pub fn snapshot(&self) -> BTreeMap<String, i64> {
        lock(&self.values).clone()
    }

    fn predicate(&self, condition: &Condition) -> impl Fn() -> bool + Send + Sync + 'static {
        let counters = self.clone();
        let Condition { counter, op, value } = condition.clone();
        move || op.holds(counters.get(&counter), value)
    }
}

/// Builds operands from plan trees.
pub struct PlanBuilder {
    timer: Arc<dyn Timer>,
    counters: Counters,
    bindings: EventBindings,
    registry: HashMap<String, Action>,
}

impl PlanBuilder {
    pub fn new(counters: Counters, bindings: EventBindings) -> Self {
        Self {
            timer: Arc::new(TokioTimer),
            counters,
            bindings,
            registry: HashMap::new(),
        }
    }

    /// Schedules every `wait` and `delay` node through `timer`.
    pub fn with_timer(mut self, timer: Arc<dyn Timer>) -> Self {
        self.timer = timer;
        self
    }

    /// Makes `action` available to `ref` nodes under `name`.
    pub fn register(&mut self, name: impl Into<String>, action: Action) -> &mut Self {
        self.registry.insert(name.into(), action);
        self
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn bindings(&self) -> &EventBindings {
        &self.bindings
    }

    /// Builds the operand for `node`.
    ///
    /// A `ref` to an unregistered name becomes an inert operand. Whether that
    /// fails here or at run time depends on the combinator it sits in.
    pub fn build(&self, node: &PlanNode) -> Result<Operand, PlanError> {
        let action = match node {
            PlanNode::Log { message } => {
                instantly_with(|message: &String| info!("[PLAN] {}", message), message.clone())
            }
            PlanNode::Wait { ms } => wait_on(Arc::clone(&self.timer), Duration::from_millis(*ms)),
            PlanNode::Delay { ms, step } => delay_on(
                Arc::clone(&self.timer),
                self.build(step)?,
                Duration::from_millis(*ms),
            ),
            PlanNode::Sequence { steps } => sequence(self.build_all(steps)?)?,
            PlanNode::Together { steps } => together(self.build_all(steps)?)?,
            PlanNode::Any { steps } => any(self.build_all(steps)?)?,
            PlanNode::Increment { counter, by } => {
                let counters = self.counters.clone();
                let (counter, by) = (counter.clone(), *by);
                instantly(move || {
                    counters.add(&counter, by);
                })
            }
            PlanNode::Branch {
                condition,
                then,
                otherwise,
            } => branch(
                self.counters.predicate(condition),
                self.build(then)?,
                self.build(otherwise)?,
            ),
            PlanNode::When { condition, step } => {
                when(self.counters.predicate(condition), self.build(step)?)
            }
            PlanNode::Unless { condition, step } => {
                unless(self.counters.predicate(condition), self.build(step)?)
            }
            PlanNode::RepeatWhile { condition, body } => {
                repeat_while(self.counters.predicate(condition), self.build(body)?)
            }
            PlanNode::RepeatUntil { condition, body } => {
                repeat_until(self.counters.predicate(condition), self.build(body)?)
            }
            PlanNode::On {
                selector,
                event,
                message,
            } => {
                let message = message.clone();
                self.bindings.add_handler(selector.clone(), event.clone(), move |event| {
                    if let Some(message) = &message {
                        info!("[EVENT] {} on {}: {}", event.name, event.selector, message);
                    }
                })
            }
            PlanNode::Off { selector, event } => {
                self.bindings.remove_handler(selector.clone(), event.clone())
            }
            PlanNode::Ref { name } => match self.registry.get(name) {
                Some(action) => action.clone(),
                None => return Ok(Operand::inert(format!("unknown action `{name}`"))),
            },
        };
        Ok(Operand::Action(action))
    }

    fn build_all(&self, nodes: &[PlanNode]) -> Result<Vec<Operand>, PlanError> {
        nodes.iter().map(|node| self.build(node)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::run;
    use crate::error::ActionError;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    fn builder() -> PlanBuilder {
        PlanBuilder::new(Counters::default(), EventBindings::new())
    }

    fn increment(counter: &str, by: i64) -> PlanNode {
        PlanNode::Increment {
            counter: counter.to_string(),
            by,
        }
    }

    fn condition(counter: &str, op: Comparison, value: i64) -> Condition {
        Condition {
            counter: counter.to_string(),
            op,
            value,
        }
    }

    #[test]
    fn comparisons() {
        assert!(Comparison::Lt.holds(1, 2));
        assert!(Comparison::Ge.holds(2, 2));
        assert!(Comparison::DivisibleBy.holds(9, 3));
        assert!(Comparison::NotDivisibleBy.holds(4, 3));
        assert!(!Comparison::DivisibleBy.holds(4, 0));
        assert!(!Comparison::NotDivisibleBy.holds(4, 0));
    }

    #[test]
    fn counters_saturate_instead_of_overflowing() {
        let counters = Counters::default();
        counters.set("n", i64::MAX - 1);
        assert_eq!(counters.add("n", 5), i64::MAX);
        counters.set("m", i64::MIN);
        assert_eq!(counters.add("m", -1), i64::MIN);
    }

    #[test]
    fn sequence_plan_runs_in_order() {
        let builder = builder();
        let plan = PlanNode::Sequence {
            steps: vec![increment("n", 2), increment("n", 6), increment("n", -4)],
        };
        run(builder.build(&plan).unwrap()).unwrap();
        assert_eq!(builder.counters().get("n"), 4);
    }

    #[test]
    fn repeat_while_plan_counts_up() {
        let builder = builder();
        builder.counters().set("value", 1);
        let plan = PlanNode::RepeatWhile {
            condition: condition("value", Comparison::NotDivisibleBy, 3),
            body: Box::new(increment("value", 1)),
        };
        run(builder.build(&plan).unwrap()).unwrap();
        assert_eq!(builder.counters().get("value"), 3);
    }

    #[test]
    fn branch_plan_picks_a_side() {
        let builder = builder();
        let plan = PlanNode::Branch {
            condition: condition("flag", Comparison::Eq, 0),
            then: Box::new(increment("then", 1)),
            otherwise: Box::new(increment("else", 1)),
        };
        run(builder.build(&plan).unwrap()).unwrap();
        assert_eq!(builder.counters().get("then"), 1);
        assert_eq!(builder.counters().get("else"), 0);
    }

    #[test]
    fn registered_refs_resolve() {
        let mut builder = builder();
        let counters = builder.counters().clone();
        builder.register(
            "bump",
            instantly(move || {
                counters.add("bumped", 1);
            }),
        );
        let plan = PlanNode::Ref {
            name: "bump".to_string(),
        };
        run(builder.build(&plan).unwrap()).unwrap();
        assert_eq!(builder.counters().get("bumped"), 1);
    }

    #[test]
    fn unknown_ref_in_together_fails_while_building() {
        let builder = builder();
        let plan = PlanNode::Together {
            steps: vec![
                increment("n", 1),
                PlanNode::Ref {
                    name: "missing".to_string(),
                },
            ],
        };
        let err = builder.build(&plan).unwrap_err();
        assert!(matches!(
            err,
            PlanError::Action(ActionError::NotInvocable {
                position: Some(1),
                ..
            })
        ));
        assert_eq!(builder.counters().get("n"), 0);
    }

    #[test]
    fn unknown_ref_in_sequence_fails_when_reached() {
        let builder = builder();
        let plan = PlanNode::Sequence {
            steps: vec![
                increment("n", 1),
                PlanNode::Ref {
                    name: "missing".to_string(),
                },
                increment("n", 1),
            ],
        };
        let operand = builder.build(&plan).unwrap();
        let outcome = catch_unwind(AssertUnwindSafe(|| run(operand)));
        assert!(outcome.is_err());
        assert_eq!(builder.counters().get("n"), 1);
    }

    #[test]
    fn empty_collection_plan_is_rejected() {
        let err = builder()
            .build(&PlanNode::Any { steps: Vec::new() })
            .unwrap_err();
        assert!(matches!(
            err,
            PlanError::Action(ActionError::Empty { combinator: "any" })
        ));
    }

    #[test]
    fn on_plan_waits_for_the_event() {
        let builder = builder();
        let plan = PlanNode::Sequence {
            steps: vec![
                PlanNode::On {
                    selector: "#go".to_string(),
                    event: "click".to_string(),
                    message: None,
                },
                increment("clicked", 1),
                PlanNode::Off {
                    selector: "#go".to_string(),
                    event: "click".to_string(),
                },
            ],
        };
        run(builder.build(&plan).unwrap()).unwrap();
        assert_eq!(builder.counters().get("clicked"), 0);

        builder.bindings().trigger("#go", "click", None);
        assert_eq!(builder.counters().get("clicked"), 1);
        assert!(builder.bindings().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn delay_plan_uses_the_builder_timer() {
        let builder = builder().with_timer(Arc::new(crate::timing::ScaledTimer::new(0.1)));
        let plan = PlanNode::Delay {
            ms: 1000,
            step: Box::new(increment("n", 1)),
        };
        let start = tokio::time::Instant::now();
        run(builder.build(&plan).unwrap()).unwrap().await;
        assert!(start.elapsed() < Duration::from_millis(200));
        assert_eq!(builder.counters().get("n"), 1);
    }
}
