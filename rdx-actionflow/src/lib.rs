//! # Actionflow
//!
//! Structured, continuation-passing control flow for asynchronous work.
//!
//! Actionflow lets an application describe a composite piece of asynchronous
//! work as a tree of small *actions* and then start the whole tree with a
//! single call. Nothing runs while the tree is being built.
//!
//! ## Core Concepts
//!
//! - **Action**: A unit of work that receives a continuation and calls it
//!   exactly once when it is done, either synchronously or from a later turn.
//! - **Bridge**: [`run`] is the prime mover. It starts an action graph and
//!   hands back a [`Completion`] future that settles when the root continuation
//!   fires.
//! - **Combinators**: [`sequence`], [`any`] and [`together`] combine
//!   collections of actions; [`wait`] and [`delay`] add time; [`branch`],
//!   [`when`], [`unless`], [`repeat_while`] and [`repeat_until`] add
//!   conditionals and loops.
//! - **Plans**: A [`plan::PlanNode`] tree, usually loaded from a TOML file via
//!   [`config::FlowConfig`], describes an action graph dynamically.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use actionflow::prelude::*;
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let counter = Arc::new(AtomicU32::new(0));
//!
//!     // 1. Describe the work. Nothing runs yet.
//!     let bump = {
//!         let counter = counter.clone();
//!         instantly(move || {
//!             counter.fetch_add(1, Ordering::Relaxed);
//!         })
//!     };
//!     let graph = sequence([bump.clone(), delay(bump, Duration::from_millis(250))])?;
//!
//!     // 2. Start it and wait for the completion signal.
//!     run(graph)?.await;
//!     assert_eq!(counter.load(Ordering::Relaxed), 2);
//!     Ok(())
//! }
//! ```

pub const LIBRARY_NAME: &str = "Actionflow";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Declare all the modules in the crate.
pub mod action;
pub mod collections;
pub mod common;
pub mod config;
pub mod control;
pub mod error;
pub mod handlers;
pub mod plan;
pub mod timing;

pub use action::{instantly, instantly_with, noop, run, Action, Completion, Continuation, Operand};
pub use collections::{any, sequence, together, together_with, Settlement};
pub use control::{branch, repeat_until, repeat_while, unless, when};
pub use error::{ActionError, PlanError};
pub use timing::{delay, delay_on, wait, wait_on, ScaledTimer, Timer, TokioTimer};

/// A prelude module for easy importing of the most common Actionflow types.
pub mod prelude {
    pub use crate::action::{instantly, instantly_with, noop, run, Action, Completion, Operand};
    pub use crate::collections::{any, sequence, together, together_with, Settlement};
    pub use crate::common::{HandlerId, Predicate};
    pub use crate::config::FlowConfig;
    pub use crate::control::{branch, repeat_until, repeat_while, unless, when};
    pub use crate::error::{ActionError, PlanError};
    pub use crate::handlers::{Event, EventBindings};
    pub use crate::plan::{Counters, PlanBuilder, PlanNode};
    pub use crate::timing::{delay, wait, Timer, TokioTimer};
}
