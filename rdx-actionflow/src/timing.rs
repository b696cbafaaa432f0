//! Timing combinators and the deferred-execution seam they are built on.

use crate::action::{Action, Continuation, Operand};
use crate::collections::in_order;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Schedules a continuation to run no earlier than a given duration from now.
pub trait Timer: Send + Sync {
    fn defer(&self, after: Duration, continuation: Continuation);
}

/// The default timer: a tokio task that sleeps, then calls the continuation.
///
/// # Panics
/// `defer` must be called from within a tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

impl Timer for TokioTimer {
    fn defer(&self, after: Duration, continuation: Continuation) {
        trace!(?after, "Deferring continuation.");
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            continuation();
        });
    }
}

/// A timer that stretches or shrinks every duration by a fixed factor
/// before handing it to an inner timer.
#[derive(Debug, Clone)]
pub struct ScaledTimer<T = TokioTimer> {
    inner: T,
    scale: f64,
}

impl ScaledTimer {
    /// Scales durations onto the default [`TokioTimer`].
    ///
    /// # Panics
    /// Panics if `scale` is not finite and positive.
    pub fn new(scale: f64) -> Self {
        Self::with_timer(TokioTimer, scale)
    }
}

impl<T: Timer> ScaledTimer<T> {
    /// Scales durations onto `inner`.
    ///
    /// # Panics
    /// Panics if `scale` is not finite and positive.
    pub fn with_timer(inner: T, scale: f64) -> Self {
        assert!(
            scale.is_finite() && scale > 0.0,
            "time scale must be finite and positive, got {scale}"
        );
        Self { inner, scale }
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }
}

impl<T: Timer> Timer for ScaledTimer<T> {
    fn defer(&self, after: Duration, continuation: Continuation) {
        // Scaled durations past `Duration::MAX` saturate.
        let scaled = Duration::try_from_secs_f64(after.as_secs_f64() * self.scale)
            .unwrap_or(Duration::MAX);
        self.inner.defer(scaled, continuation);
    }
}

/// Creates an action that completes `duration` after it is invoked.
///
/// # Panics
/// Invoking the action outside a tokio runtime panics.
pub fn wait(duration: Duration) -> Action {
    wait_on(Arc::new(TokioTimer), duration)
}

/// Like [`wait`], scheduling through `timer`.
pub fn wait_on(timer: Arc<dyn Timer>, duration: Duration) -> Action {
    Action::new(move |continuation| timer.defer(duration, continuation))
}

/// Creates an action that waits for `duration`, then runs `operand`.
///
/// This is a two-member sequence of [`wait`] and `operand`: the operand does
/// not start until the wait has elapsed, and the composite completes when the
/// operand does.
pub fn delay(operand: impl Into<Operand>, duration: Duration) -> Action {
    delay_on(Arc::new(TokioTimer), operand, duration)
}

/// Like [`delay`], scheduling through `timer`.
pub fn delay_on(timer: Arc<dyn Timer>, operand: impl Into<Operand>, duration: Duration) -> Action {
    in_order(
        wait_on(timer, duration),
        Into::<Operand>::into(operand).into_lazy(Some(1)),
    )
}
