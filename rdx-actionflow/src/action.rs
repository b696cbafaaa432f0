//! The action contract and the primitives that bridge it to plain Rust.
//!
//! An [`Action`] receives a [`Continuation`] and must call it exactly once,
//! either before returning or from some later turn of the runtime. Building an
//! action performs no work; [`run`] is the only thing that starts a graph.

use crate::error::ActionError;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::{error, trace, warn};

/// The zero-argument completion callback handed to an action.
///
/// Being `FnOnce`, a continuation cannot fire twice. Firing it at all is the
/// action's obligation.
pub type Continuation = Box<dyn FnOnce() + Send + 'static>;

/// A composable unit of work that signals completion through a continuation.
///
/// Actions are inert descriptions: cloning one is cheap and invoking it again
/// starts the work again, which is what loop and branch combinators rely on.
#[derive(Clone)]
pub struct Action {
    body: Arc<dyn Fn(Continuation) + Send + Sync>,
}

impl Action {
    /// Wraps a continuation-accepting closure as an action.
    ///
    /// The closure must call the continuation exactly once. Nothing checks
    /// this; combinators built from a misbehaving action inherit the fault.
    pub fn new(body: impl Fn(Continuation) + Send + Sync + 'static) -> Self {
        Self {
            body: Arc::new(body),
        }
    }

    /// Starts the action, handing it `continuation`.
    pub fn invoke(&self, continuation: Continuation) {
        (self.body)(continuation)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action").finish_non_exhaustive()
    }
}

/// A value handed to a combinator in place of an action.
///
/// Statically built graphs only ever contain `Operand::Action`. `Inert`
/// appears in dynamically described graphs (see [`crate::plan`]) and stands
/// for a value that turned out not to be invocable.
#[derive(Clone, Debug)]
pub enum Operand {
    Action(Action),
    Inert(String),
}

impl Operand {
    /// An operand that cannot be invoked, described by `found`.
    pub fn inert(found: impl Into<String>) -> Self {
        Operand::Inert(found.into())
    }

    pub fn is_invocable(&self) -> bool {
        matches!(self, Operand::Action(_))
    }

    /// Returns the action, or the invocation-type error for an inert operand.
    pub fn into_action(self, position: Option<usize>) -> Result<Action, ActionError> {
        match self {
            Operand::Action(action) => Ok(action),
            Operand::Inert(found) => Err(ActionError::NotInvocable { position, found }),
        }
    }

    /// Converts the operand into an action that defers validation to invocation.
    ///
    /// An inert operand becomes an action that raises the invocation-type
    /// error the moment something invokes it.
    pub(crate) fn into_lazy(self, position: Option<usize>) -> Action {
        match self.into_action(position) {
            Ok(action) => action,
            Err(err) => Action::new(move |_| raise(err.clone())),
        }
    }
}

impl From<Action> for Operand {
    fn from(action: Action) -> Self {
        Operand::Action(action)
    }
}

/// Raises an invocation-type error in a context that has no return channel.
///
/// This is the lazy half of the validation contract: the error unwinds to
/// whatever invoked the graph, or kills the timer task that resumed it.
pub(crate) fn raise(err: ActionError) -> ! {
    error!("{}", err);
    panic!("{}", err)
}

/// Starts `operand` and returns a future that settles when it completes.
///
/// This is the prime mover: no action graph does any work until it is passed
/// here. The invocation-type check happens before anything is started, so an
/// inert operand is reported as an `Err` rather than a completion that never
/// settles.
///
/// Pure compositions of [`instantly`] complete before `run` returns; the
/// returned completion is then already settled.
pub fn run(operand: impl Into<Operand>) -> Result<Completion, ActionError> {
    let action = Into::<Operand>::into(operand).into_action(None)?;
    let (sender, receiver) = oneshot::channel();
    trace!("Starting action graph.");
    action.invoke(Box::new(move || {
        trace!("Action graph settled.");
        sender.send(()).ok();
    }));
    Ok(Completion {
        receiver,
        abandoned: false,
    })
}

/// The awaitable completion signal of an action started with [`run`].
///
/// Dropping a `Completion` does not stop the action.
#[derive(Debug)]
pub struct Completion {
    receiver: oneshot::Receiver<()>,
    abandoned: bool,
}

impl Future for Completion {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.abandoned {
            return Poll::Pending;
        }
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(())) => Poll::Ready(()),
            Poll::Ready(Err(_)) => {
                // The continuation was dropped without being called, so this
                // completion can never settle.
                warn!("Action dropped its continuation; completion will never settle.");
                self.abandoned = true;
                Poll::Pending
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Lifts a plain procedure into an action.
///
/// The resulting action calls `procedure` and then its continuation, both
/// synchronously.
pub fn instantly(procedure: impl Fn() + Send + Sync + 'static) -> Action {
    Action::new(move |continuation| {
        procedure();
        continuation();
    })
}

/// Lifts a procedure together with the arguments to pass it on every run.
pub fn instantly_with<A>(procedure: impl Fn(&A) + Send + Sync + 'static, args: A) -> Action
where
    A: Send + Sync + 'static,
{
    Action::new(move |continuation| {
        procedure(&args);
        continuation();
    })
}

/// An action that completes immediately without doing anything.
pub fn noop() -> Action {
    Action::new(|continuation| continuation())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting() -> (Arc<AtomicUsize>, Action) {
        let calls = Arc::new(AtomicUsize::new(0));
        let action = {
            let calls = calls.clone();
            instantly(move || {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        (calls, action)
    }

    #[test]
    fn run_starts_the_action() {
        let (calls, action) = counting();
        run(action).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn building_an_action_does_no_work() {
        let (calls, action) = counting();
        let _again = action.clone();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn run_rejects_inert_operand_synchronously() {
        let err = run(Operand::inert("5")).unwrap_err();
        assert_eq!(
            err,
            ActionError::NotInvocable {
                position: None,
                found: "5".to_string()
            }
        );
    }

    #[test]
    fn instantly_runs_procedure_before_continuation() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let action = {
            let order = order.clone();
            instantly(move || order.lock().unwrap().push("procedure"))
        };
        let continuation_order = order.clone();
        action.invoke(Box::new(move || {
            continuation_order.lock().unwrap().push("continuation")
        }));
        assert_eq!(*order.lock().unwrap(), vec!["procedure", "continuation"]);
    }

    #[test]
    fn instantly_with_passes_curried_arguments() {
        let seen = Arc::new(std::sync::Mutex::new(String::new()));
        let action = {
            let seen = seen.clone();
            instantly_with(
                move |(word, times): &(String, usize)| {
                    seen.lock().unwrap().push_str(&word.repeat(*times))
                },
                ("ab".to_string(), 2),
            )
        };
        run(action.clone()).unwrap();
        run(action).unwrap();
        assert_eq!(*seen.lock().unwrap(), "abababab");
    }

    #[tokio::test]
    async fn completion_settles_for_synchronous_graphs() {
        let (calls, action) = counting();
        run(action).unwrap().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_continuation_never_settles() {
        let completion = run(Action::new(|_continuation| {})).unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(60), completion).await;
        assert!(outcome.is_err());
    }

    #[test]
    fn lazy_inert_operand_raises_on_invoke() {
        let lazy = Operand::inert("a string").into_lazy(Some(3));
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            lazy.invoke(Box::new(|| {}))
        }));
        let payload = outcome.unwrap_err();
        let message = payload.downcast_ref::<String>().unwrap();
        assert_eq!(message, "operand #3 is not an action (found a string)");
    }
}
