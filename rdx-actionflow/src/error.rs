//! Error types for the action combinators and the plan layer.

use thiserror::Error;

/// Errors raised while composing or starting actions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    /// A value handed over in place of an action cannot be invoked.
    #[error("{} is not an action (found {})", position_label(.position), .found)]
    NotInvocable {
        /// Argument index inside the combinator, when there is one.
        position: Option<usize>,
        /// A description of the value that was found instead.
        found: String,
    },

    /// A collection combinator was called with no actions at all.
    #[error("`{combinator}` needs at least one action")]
    Empty { combinator: &'static str },
}

/// Errors raised while loading configuration or building a plan.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error(transparent)]
    Action(#[from] ActionError),

    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no plan named `{0}`")]
    UnknownPlan(String),
}

fn position_label(position: &Option<usize>) -> String {
    match position {
        Some(index) => format!("operand #{index}"),
        None => "value".to_string(),
    }
}
