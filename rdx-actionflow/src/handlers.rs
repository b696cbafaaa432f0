//! Actions that wait for named events raised on an in-process registry.
//!
//! An [`EventBindings`] registry maps a `(selector, event)` pair to handlers.
//! [`EventBindings::add_handler`] produces an action that binds a handler and
//! completes the first time the event is triggered; the handler itself stays
//! bound, and keeps running on later triggers, until
//! [`EventBindings::remove_handler`] detaches it.

use crate::action::{Action, Continuation};
use crate::common::{lock, HandlerId};
use slotmap::SlotMap;
use std::any::Any;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// A type-erased event payload. Receivers downcast it to the concrete type.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// A function closure called every time its bound event is triggered.
pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// An event delivered to bound handlers.
#[derive(Debug, Clone)]
pub struct Event {
    pub selector: String,
    pub name: String,
    pub payload: Option<Payload>,
}

impl Event {
    /// Returns the payload downcast to `T`, if there is one of that type.
    pub fn payload_as<T: Any>(&self) -> Option<&T> {
        self.payload.as_deref().and_then(|payload| payload.downcast_ref())
    }
}

/// A summary of one live binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingInfo {
    pub id: HandlerId,
    pub selector: String,
    pub event: String,
    /// Whether the binding's action has already completed.
    pub fired: bool,
}

struct Binding {
    selector: String,
    event: String,
    handler: Handler,
    continuation: Option<Continuation>,
}

impl Binding {
    fn matches(&self, selector: &str, event: &str) -> bool {
        self.selector == selector && self.event == event
    }
}

/// A shared registry of event bindings. Clones refer to the same registry.
#[derive(Clone, Default)]
pub struct EventBindings {
    bindings: Arc<Mutex<SlotMap<HandlerId, Binding>>>,
}

impl EventBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an action that binds `handler` to `event` on `selector`.
    ///
    /// The action completes the first time the event is triggered, right
    /// after `handler` has run. Each run of the action adds a new binding.
    pub fn add_handler(
        &self,
        selector: impl Into<String>,
        event: impl Into<String>,
        handler: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Action {
        let registry = self.clone();
        let selector = selector.into();
        let event = event.into();
        let handler: Handler = Arc::new(handler);
        Action::new(move |continuation| {
            let id = lock(&registry.bindings).insert(Binding {
                selector: selector.clone(),
                event: event.clone(),
                handler: Arc::clone(&handler),
                continuation: Some(continuation),
            });
            debug!(?id, %selector, %event, "Handler bound.");
        })
    }

    /// Shorthand for [`add_handler`](Self::add_handler) on the `click` event.
    pub fn click_handler(
        &self,
        selector: impl Into<String>,
        handler: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Action {
        self.add_handler(selector, "click", handler)
    }

    /// Creates an action that detaches every handler bound to `event` on
    /// `selector`, then completes immediately.
    ///
    /// Bindings whose action had not completed yet are dropped with it, so
    /// those actions never complete.
    pub fn remove_handler(&self, selector: impl Into<String>, event: impl Into<String>) -> Action {
        let registry = self.clone();
        let selector = selector.into();
        let event = event.into();
        Action::new(move |continuation| {
            let removed = {
                let mut bindings = lock(&registry.bindings);
                let before = bindings.len();
                bindings.retain(|_, binding| !binding.matches(&selector, &event));
                before - bindings.len()
            };
            debug!(%selector, %event, removed, "Handlers removed.");
            continuation();
        })
    }

    /// Triggers `event` on `selector`.
    ///
    /// Every matching handler runs, in binding order; a binding whose action
    /// has not completed yet completes right after its handler. Returns the
    /// number of handlers that ran. Handlers and continuations run outside the
    /// registry lock and may bind or remove handlers themselves.
    pub fn trigger(&self, selector: &str, event: &str, payload: Option<Payload>) -> usize {
        let fired: Vec<(Handler, Option<Continuation>)> = lock(&self.bindings)
            .values_mut()
            .filter(|binding| binding.matches(selector, event))
            .map(|binding| (Arc::clone(&binding.handler), binding.continuation.take()))
            .collect();

        let delivered = Event {
            selector: selector.to_string(),
            name: event.to_string(),
            payload,
        };
        debug!(selector, event, handlers = fired.len(), "Event triggered.");
        let count = fired.len();
        for (handler, continuation) in fired {
            handler(&delivered);
            if let Some(continuation) = continuation {
                continuation();
            }
        }
        count
    }

    /// Lists the live bindings.
    pub fn bindings(&self) -> Vec<BindingInfo> {
        lock(&self.bindings)
            .iter()
            .map(|(id, binding)| BindingInfo {
                id,
                selector: binding.selector.clone(),
                event: binding.event.clone(),
                fired: binding.continuation.is_none(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.bindings).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
