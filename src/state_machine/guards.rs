use crate::context::Context;
use crate::handler::Outcome;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Which handler outcomes a transition rule responds to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "on", content = "reason", rename_all = "snake_case")]
pub enum OutcomeMatcher {
    Handled,
    PassThrough,
    /// Any rejection, whatever the reason
    Rejected,
    /// A rejection with exactly this reason
    RejectedWith(String),
    /// Any non-fault outcome
    Any,
}

impl OutcomeMatcher {
    pub fn matches(&self, outcome: &Outcome) -> bool {
        match (self, outcome) {
            (Self::Handled, Outcome::Handled) => true,
            (Self::PassThrough, Outcome::PassThrough) => true,
            (Self::Rejected, Outcome::Reject(_)) => true,
            (Self::RejectedWith(expected), Outcome::Reject(reason)) => expected == reason,
            (Self::Any, Outcome::Handled | Outcome::PassThrough | Outcome::Reject(_)) => true,
            _ => false,
        }
    }
}

type GuardFn = dyn Fn(&Context) -> bool + Send + Sync;

/// Pure predicate over the context that a transition must also satisfy.
#[derive(Clone)]
pub struct TransitionGuard {
    description: String,
    check: Arc<GuardFn>,
}

impl TransitionGuard {
    pub fn new<F>(description: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            check: Arc::new(check),
        }
    }

    /// Guard that holds when `key` is present and truthy.
    pub fn flag(key: impl Into<String>) -> Self {
        let key = key.into();
        Self::new(format!("'{key}' must be set"), move |ctx: &Context| {
            ctx.get_bool(&key).unwrap_or(false)
        })
    }

    pub fn check(&self, context: &Context) -> bool {
        (self.check)(context)
    }

    /// Get a description of this guard for logging
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Debug for TransitionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionGuard")
            .field("description", &self.description)
            .finish()
    }
}
