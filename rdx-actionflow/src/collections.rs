//! Combinators that turn a collection of actions into one action.
//!
//! - [`any`] races its members and completes with the first one.
//! - [`sequence`] runs its members one after another.
//! - [`together`] runs its members concurrently and completes when all are done.
//!
//! All three refuse an empty collection with [`ActionError::Empty`].

use crate::action::{raise, Action, Continuation, Operand};
use crate::common::lock;
use crate::error::ActionError;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use tracing::{debug, trace};

/// The record `together` keeps for each member once it has completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    /// The member's position in the argument list.
    pub index: usize,
    /// The member's finishing position, starting at 0 for the first to complete.
    pub rank: usize,
    /// When the member's continuation fired.
    pub settled_at: DateTime<Utc>,
}

/// Creates an action that starts every member at once and completes as soon
/// as any one of them completes.
///
/// The remaining members are not stopped. They keep running to their own
/// completion with no effect on the composite; mutual cancellation is up to
/// the caller.
///
/// Every member is started before the composite completes, even when an
/// early member finishes synchronously. Members are checked as they are
/// started. An inert member raises the invocation-type error at that point,
/// after the members before it have already started, and the composite never
/// completes.
pub fn any<I>(operands: I) -> Result<Action, ActionError>
where
    I: IntoIterator,
    I::Item: Into<Operand>,
{
    let operands: Vec<Operand> = operands.into_iter().map(Into::into).collect();
    if operands.is_empty() {
        return Err(ActionError::Empty { combinator: "any" });
    }
    Ok(Action::new(move |continuation| {
        let race = Arc::new(Mutex::new(Race::new(continuation)));
        for (index, operand) in operands.iter().enumerate() {
            let action = match operand.clone().into_action(Some(index)) {
                Ok(action) => action,
                Err(err) => {
                    lock(&race).continuation.take();
                    raise(err);
                }
            };
            let race = Arc::clone(&race);
            action.invoke(Box::new(move || {
                let won = lock(&race).finish(index);
                if let Some(continuation) = won {
                    continuation();
                }
            }));
        }
        let won = lock(&race).started();
        if let Some(continuation) = won {
            continuation();
        }
    }))
}

/// Shared bookkeeping for one run of an `any` composite.
struct Race {
    continuation: Option<Continuation>,
    /// Set until every member has been started.
    starting: bool,
    winner: Option<usize>,
}

impl Race {
    fn new(continuation: Continuation) -> Self {
        Self {
            continuation: Some(continuation),
            starting: true,
            winner: None,
        }
    }

    /// Records member `index` as finished.
    /// Returns the continuation if it won and every member has been started.
    fn finish(&mut self, index: usize) -> Option<Continuation> {
        if self.winner.is_some() {
            return None;
        }
        self.winner = Some(index);
        debug!(index, "Race won.");
        if self.starting {
            return None;
        }
        self.continuation.take()
    }

    /// Marks the start loop as done.
    /// Returns the continuation if a member already won while starting.
    fn started(&mut self) -> Option<Continuation> {
        self.starting = false;
        if self.winner.is_none() {
            return None;
        }
        self.continuation.take()
    }
}

/// Creates an action that runs the members strictly one after another.
///
/// Member `k + 1` is not started until member `k` has called its
/// continuation, and the composite completes when the last member does.
///
/// No member is checked up front. An inert member raises the invocation-type
/// error only when the chain reaches it, after every member before it has
/// run.
pub fn sequence<I>(operands: I) -> Result<Action, ActionError>
where
    I: IntoIterator,
    I::Item: Into<Operand>,
{
    let mut operands = operands.into_iter().map(Into::<Operand>::into);
    let first = operands
        .next()
        .ok_or(ActionError::Empty {
            combinator: "sequence",
        })?
        .into_lazy(Some(0));
    // Fold pairwise, left to right, so the chain nests as ((a, b), c).
    Ok(operands
        .enumerate()
        .fold(first, |chain, (index, next)| {
            in_order(chain, next.into_lazy(Some(index + 1)))
        }))
}

/// Runs `first`, then `second` once `first` has completed.
pub(crate) fn in_order(first: Action, second: Action) -> Action {
    Action::new(move |continuation| {
        let second = second.clone();
        first.invoke(Box::new(move || second.invoke(continuation)));
    })
}

/// Creates an action that starts every member at once and completes after all
/// of them have completed.
///
/// Every member is checked when `together` is called, before anything runs:
/// a single inert member fails the whole call with
/// [`ActionError::NotInvocable`].
pub fn together<I>(operands: I) -> Result<Action, ActionError>
where
    I: IntoIterator,
    I::Item: Into<Operand>,
{
    together_with(operands, |_| {})
}

/// Like [`together`], but hands the settlement records to `report` just
/// before the composite completes.
///
/// The records are in argument order regardless of the order in which the
/// members finished.
pub fn together_with<I, R>(operands: I, report: R) -> Result<Action, ActionError>
where
    I: IntoIterator,
    I::Item: Into<Operand>,
    R: Fn(Vec<Settlement>) + Send + Sync + 'static,
{
    let actions = operands
        .into_iter()
        .enumerate()
        .map(|(index, operand)| Into::<Operand>::into(operand).into_action(Some(index)))
        .collect::<Result<Vec<Action>, ActionError>>()?;
    if actions.is_empty() {
        return Err(ActionError::Empty {
            combinator: "together",
        });
    }

    let report = Arc::new(report);
    Ok(Action::new(move |continuation| {
        let join = Arc::new(Mutex::new(Join::new(actions.len(), continuation)));
        for (index, action) in actions.iter().enumerate() {
            let join = Arc::clone(&join);
            let report = Arc::clone(&report);
            action.invoke(Box::new(move || {
                let finished = lock(&join).settle(index);
                if let Some((settlements, continuation)) = finished {
                    report(settlements);
                    continuation();
                }
            }));
        }
    }))
}

/// Shared bookkeeping for one run of a `together` composite.
struct Join {
    settlements: Vec<Option<Settlement>>,
    settled: usize,
    continuation: Option<Continuation>,
}

impl Join {
    fn new(members: usize, continuation: Continuation) -> Self {
        Self {
            settlements: vec![None; members],
            settled: 0,
            continuation: Some(continuation),
        }
    }

    /// Records member `index` as settled.
    /// Returns the records and the continuation once every member has settled.
    fn settle(&mut self, index: usize) -> Option<(Vec<Settlement>, Continuation)> {
        self.settlements[index] = Some(Settlement {
            index,
            rank: self.settled,
            settled_at: Utc::now(),
        });
        self.settled += 1;
        trace!(index, settled = self.settled, "Join member settled.");
        if self.settled < self.settlements.len() {
            return None;
        }
        let continuation = self.continuation.take()?;
        let settlements = self.settlements.iter_mut().filter_map(Option::take).collect();
        Some((settlements, continuation))
    }
}
