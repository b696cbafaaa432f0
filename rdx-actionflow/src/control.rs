//! Conditional and looping combinators.
//!
//! Predicates are evaluated synchronously, with no arguments, every time the
//! combinator runs. Nothing is memoized, so a branch nested in a loop sees
//! fresh state on each pass.

use crate::action::{noop, Action, Continuation, Operand};
use crate::common::{lock, Predicate};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Creates an action that runs `consequent` if `predicate` holds and
/// `alternate` otherwise.
///
/// The composite completes exactly when the chosen branch does.
pub fn branch(
    predicate: impl Fn() -> bool + Send + Sync + 'static,
    consequent: impl Into<Operand>,
    alternate: impl Into<Operand>,
) -> Action {
    let consequent = Into::<Operand>::into(consequent).into_lazy(None);
    let alternate = Into::<Operand>::into(alternate).into_lazy(None);
    Action::new(move |continuation| {
        if predicate() {
            consequent.invoke(continuation)
        } else {
            alternate.invoke(continuation)
        }
    })
}

/// Runs `operand` only if `predicate` holds; otherwise completes immediately.
pub fn when(
    predicate: impl Fn() -> bool + Send + Sync + 'static,
    operand: impl Into<Operand>,
) -> Action {
    branch(predicate, operand, noop())
}

/// Runs `operand` only if `predicate` does not hold; otherwise completes immediately.
pub fn unless(
    predicate: impl Fn() -> bool + Send + Sync + 'static,
    operand: impl Into<Operand>,
) -> Action {
    branch(predicate, noop(), operand)
}

/// Creates a pre-checked asynchronous loop: while `predicate` holds, run
/// `body` and wait for it to complete.
///
/// The predicate is checked before every pass, including the first, so a
/// loop whose predicate starts out false completes without running the body.
/// Bodies may defer their completion; the loop resumes from wherever the
/// body's continuation fires. Stack depth does not grow with the number of
/// iterations.
pub fn repeat_while(
    predicate: impl Fn() -> bool + Send + Sync + 'static,
    body: impl Into<Operand>,
) -> Action {
    let predicate: Predicate = Arc::new(predicate);
    let body = Into::<Operand>::into(body).into_lazy(None);
    Action::new(move |continuation| {
        drive(Arc::new(Loop {
            predicate: Arc::clone(&predicate),
            body: body.clone(),
            continuation: Mutex::new(Some(continuation)),
            iterations: AtomicUsize::new(0),
        }))
    })
}

/// Like [`repeat_while`], but runs `body` while `predicate` does *not* hold.
pub fn repeat_until(
    predicate: impl Fn() -> bool + Send + Sync + 'static,
    body: impl Into<Operand>,
) -> Action {
    repeat_while(move || !predicate(), body)
}

/// Per-run state of a loop.
struct Loop {
    predicate: Predicate,
    body: Action,
    continuation: Mutex<Option<Continuation>>,
    iterations: AtomicUsize,
}

// States of a single pass of the body.
const RUNNING: u8 = 0;
const COMPLETED_IN_PLACE: u8 = 1;
const SUSPENDED: u8 = 2;

/// Drives the loop until the body defers or the predicate fails.
///
/// A body that completes before `invoke` returns hands control back to this
/// frame, which keeps looping. A body that completes later finds the pass
/// suspended and re-enters `drive` from its own context.
fn drive(state: Arc<Loop>) {
    while (state.predicate)() {
        let pass = Arc::new(AtomicU8::new(RUNNING));
        let resume: Continuation = {
            let pass = Arc::clone(&pass);
            let state = Arc::clone(&state);
            Box::new(move || {
                if pass
                    .compare_exchange(RUNNING, COMPLETED_IN_PLACE, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    drive(state);
                }
            })
        };
        state.iterations.fetch_add(1, Ordering::Relaxed);
        state.body.invoke(resume);
        if pass
            .compare_exchange(RUNNING, SUSPENDED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return;
        }
    }

    debug!(
        iterations = state.iterations.load(Ordering::Relaxed),
        "Loop finished."
    );
    let continuation = lock(&state.continuation).take();
    if let Some(continuation) = continuation {
        continuation();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{instantly, run};
    use crate::timing::delay;
    use std::sync::atomic::AtomicI64;
    use std::time::Duration;

    struct Spy {
        calls: Arc<AtomicUsize>,
        action: Action,
    }

    impl Spy {
        fn new() -> Self {
            let calls = Arc::new(AtomicUsize::new(0));
            let action = {
                let calls = calls.clone();
                instantly(move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                })
            };
            Self { calls, action }
        }

        fn called(&self) -> bool {
            self.calls.load(Ordering::SeqCst) > 0
        }
    }

    fn is_even(value: &Arc<AtomicI64>) -> impl Fn() -> bool + Send + Sync + 'static {
        let value = value.clone();
        move || value.load(Ordering::SeqCst) % 2 == 0
    }

    fn adder(value: &Arc<AtomicI64>, addend: i64) -> Action {
        let value = value.clone();
        instantly(move || {
            value.fetch_add(addend, Ordering::SeqCst);
        })
    }

    #[test]
    fn branch_runs_consequent_when_predicate_holds() {
        let value = Arc::new(AtomicI64::new(0));
        let (consequent, alternate) = (Spy::new(), Spy::new());
        run(branch(is_even(&value), consequent.action.clone(), alternate.action.clone())).unwrap();
        assert!(consequent.called());
        assert!(!alternate.called());
    }

    #[test]
    fn branch_runs_alternate_when_predicate_fails() {
        let value = Arc::new(AtomicI64::new(1));
        let (consequent, alternate) = (Spy::new(), Spy::new());
        run(branch(is_even(&value), consequent.action.clone(), alternate.action.clone())).unwrap();
        assert!(!consequent.called());
        assert!(alternate.called());
    }

    #[test]
    fn branch_reevaluates_the_predicate_on_every_run() {
        let value = Arc::new(AtomicI64::new(0));
        let (consequent, alternate) = (Spy::new(), Spy::new());
        let choice = branch(is_even(&value), consequent.action.clone(), alternate.action.clone());
        run(choice.clone()).unwrap();
        value.store(1, Ordering::SeqCst);
        run(choice).unwrap();
        assert_eq!(consequent.calls.load(Ordering::SeqCst), 1);
        assert_eq!(alternate.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn when_runs_only_if_predicate_holds() {
        let value = Arc::new(AtomicI64::new(0));
        let spy = Spy::new();
        run(when(is_even(&value), spy.action.clone())).unwrap();
        assert!(spy.called());

        let value = Arc::new(AtomicI64::new(1));
        let spy = Spy::new();
        run(when(is_even(&value), spy.action.clone())).unwrap();
        assert!(!spy.called());
    }

    #[test]
    fn unless_runs_only_if_predicate_fails() {
        let value = Arc::new(AtomicI64::new(0));
        let spy = Spy::new();
        run(unless(is_even(&value), spy.action.clone())).unwrap();
        assert!(!spy.called());

        let value = Arc::new(AtomicI64::new(1));
        let spy = Spy::new();
        run(unless(is_even(&value), spy.action.clone())).unwrap();
        assert!(spy.called());
    }

    #[test]
    fn when_and_unless_are_complements() {
        for start in 0..4 {
            let value = Arc::new(AtomicI64::new(start));
            let (on_true, on_false) = (Spy::new(), Spy::new());
            run(when(is_even(&value), on_true.action.clone())).unwrap();
            run(unless(is_even(&value), on_false.action.clone())).unwrap();
            assert_ne!(on_true.called(), on_false.called());
        }
    }

    #[test]
    fn repeat_while_stops_once_predicate_fails() {
        let value = Arc::new(AtomicI64::new(1));
        let passes = Spy::new();
        let body = crate::collections::sequence([adder(&value, 1), passes.action.clone()]).unwrap();
        let predicate = {
            let value = value.clone();
            move || value.load(Ordering::SeqCst) % 3 != 0
        };
        run(repeat_while(predicate, body)).unwrap();
        assert_eq!(value.load(Ordering::SeqCst), 3);
        assert_eq!(passes.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn repeat_until_stops_once_predicate_holds() {
        let value = Arc::new(AtomicI64::new(1));
        let predicate = {
            let value = value.clone();
            move || value.load(Ordering::SeqCst) % 3 == 0
        };
        run(repeat_until(predicate, adder(&value, 1))).unwrap();
        assert_eq!(value.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn loops_check_the_predicate_before_the_first_pass() {
        let spy = Spy::new();
        run(repeat_while(|| false, spy.action.clone())).unwrap();
        run(repeat_until(|| true, spy.action.clone())).unwrap();
        assert!(!spy.called());
    }

    #[test]
    fn synchronous_loops_do_not_grow_the_stack() {
        let value = Arc::new(AtomicI64::new(0));
        let predicate = {
            let value = value.clone();
            move || value.load(Ordering::SeqCst) < 200_000
        };
        run(repeat_while(predicate, adder(&value, 1))).unwrap();
        assert_eq!(value.load(Ordering::SeqCst), 200_000);
    }

    #[tokio::test(start_paused = true)]
    async fn loops_wait_for_deferred_bodies() {
        let value = Arc::new(AtomicI64::new(0));
        let predicate = {
            let value = value.clone();
            move || value.load(Ordering::SeqCst) >= 5
        };
        let body = delay(adder(&value, 1), Duration::from_millis(10));
        let start = tokio::time::Instant::now();
        run(repeat_until(predicate, body)).unwrap().await;
        assert_eq!(value.load(Ordering::SeqCst), 5);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn loop_body_completing_on_another_thread_resumes_the_loop() {
        let value = Arc::new(AtomicI64::new(0));
        let predicate = {
            let value = value.clone();
            move || value.load(Ordering::SeqCst) < 3
        };
        let body = {
            let value = value.clone();
            Action::new(move |continuation| {
                let value = value.clone();
                std::thread::spawn(move || {
                    value.fetch_add(1, Ordering::SeqCst);
                    continuation();
                });
            })
        };
        let (sender, receiver) = std::sync::mpsc::channel();
        repeat_while(predicate, body).invoke(Box::new(move || {
            sender.send(()).ok();
        }));
        receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(value.load(Ordering::SeqCst), 3);
    }

    fn raises(action: &Action) -> bool {
        let action = action.clone();
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            action.invoke(Box::new(|| {}))
        }))
        .is_err()
    }

    #[test]
    fn branch_raises_only_when_the_inert_side_is_chosen() {
        let value = Arc::new(AtomicI64::new(0));
        let choice = branch(is_even(&value), noop(), Operand::inert("5"));
        assert!(!raises(&choice));
        value.store(1, Ordering::SeqCst);
        assert!(raises(&choice));
    }

    #[test]
    fn when_raises_only_when_the_predicate_holds() {
        let value = Arc::new(AtomicI64::new(1));
        let guarded = when(is_even(&value), Operand::inert("5"));
        assert!(!raises(&guarded));
        value.store(2, Ordering::SeqCst);
        assert!(raises(&guarded));
    }

    #[test]
    fn repeat_while_raises_only_when_a_pass_runs() {
        let value = Arc::new(AtomicI64::new(1));
        let looping = repeat_while(is_even(&value), Operand::inert("5"));
        assert!(!raises(&looping));
        value.store(0, Ordering::SeqCst);
        assert!(raises(&looping));
    }
}
