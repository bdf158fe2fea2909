//! # Handler Units
//!
//! The atomic behavior behind every dispatch shape: a named predicate plus an
//! action over a [`Context`]. Chains, state machines, subscribers and queued
//! commands all hold handlers through the same [`Handler`] trait.
//!
//! Handlers can be plain structs implementing [`Handler`], or closures wrapped
//! in a [`HandlerUnit`]:
//!
//! ```rust
//! use dispatch_core::{Context, HandlerUnit, Verdict};
//!
//! let basic = HandlerUnit::new(
//!     "Basic",
//!     |ctx: &Context| ctx.get_str("issue") == Some("Basic"),
//!     |ctx: &mut Context| {
//!         ctx.insert("resolved_by", "Basic");
//!         Ok(Verdict::Handled)
//!     },
//! );
//! # let _ = basic;
//! ```

use crate::context::Context;
use crate::error::HandlerFault;
use crate::trace::TraceEntry;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Result of a handler action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "reason", rename_all = "snake_case")]
pub enum Verdict {
    /// The handler took responsibility; chains stop here
    Handled,
    /// The handler declined or contributed partially; chains continue
    PassThrough,
    /// Expected business rejection with a recorded reason
    Reject(String),
}

impl Verdict {
    pub fn reject(reason: impl Into<String>) -> Self {
        Self::Reject(reason.into())
    }
}

/// Outcome of a dispatch step, a run, or a single notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "reason", rename_all = "snake_case")]
pub enum Outcome {
    Handled,
    PassThrough,
    Reject(String),
    /// A defect inside a handler action
    Fault(String),
    /// Stopped between steps by a cancellation token or deadline
    Cancelled,
}

impl Outcome {
    /// Short label used in traces and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Handled => "Handled",
            Self::PassThrough => "PassThrough",
            Self::Reject(_) => "Reject",
            Self::Fault(_) => "Fault",
            Self::Cancelled => "Cancelled",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Reject(reason) | Self::Fault(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn is_handled(&self) -> bool {
        matches!(self, Self::Handled)
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Fault(_))
    }

    /// Cancelled runs may be retried; faults should not be retried blindly.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<Verdict> for Outcome {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Handled => Self::Handled,
            Verdict::PassThrough => Self::PassThrough,
            Verdict::Reject(reason) => Self::Reject(reason),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason() {
            Some(reason) => write!(f, "{}({reason})", self.label()),
            None => write!(f, "{}", self.label()),
        }
    }
}

/// A polymorphic behavior unit.
///
/// `applies` must be pure and cheap; it may be called speculatively. `handle`
/// works on a staged copy of the context: its changes are kept only when it
/// returns `Handled` or `PassThrough`.
pub trait Handler: Send + Sync {
    /// Unique identity used for lookup, logging and deduplication
    fn name(&self) -> &str;

    fn applies(&self, _context: &Context) -> bool {
        true
    }

    fn handle(&self, context: &mut Context) -> Result<Verdict, HandlerFault>;

    /// Get a description of this handler for logging
    fn description(&self) -> &str {
        self.name()
    }
}

/// Shared handle to a registered handler.
pub type HandlerRef = Arc<dyn Handler>;

type PredicateFn = dyn Fn(&Context) -> bool + Send + Sync;
type ActionFn = dyn Fn(&mut Context) -> Result<Verdict, HandlerFault> + Send + Sync;

/// Closure-backed [`Handler`].
#[derive(Clone)]
pub struct HandlerUnit {
    name: String,
    description: Option<String>,
    predicate: Arc<PredicateFn>,
    action: Arc<ActionFn>,
}

impl HandlerUnit {
    pub fn new<P, A>(name: impl Into<String>, predicate: P, action: A) -> Self
    where
        P: Fn(&Context) -> bool + Send + Sync + 'static,
        A: Fn(&mut Context) -> Result<Verdict, HandlerFault> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: None,
            predicate: Arc::new(predicate),
            action: Arc::new(action),
        }
    }

    /// Unit whose predicate always matches.
    pub fn always<A>(name: impl Into<String>, action: A) -> Self
    where
        A: Fn(&mut Context) -> Result<Verdict, HandlerFault> + Send + Sync + 'static,
    {
        Self::new(name, |_: &Context| true, action)
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn into_ref(self) -> HandlerRef {
        Arc::new(self)
    }
}

impl Handler for HandlerUnit {
    fn name(&self) -> &str {
        &self.name
    }

    fn applies(&self, context: &Context) -> bool {
        (self.predicate)(context)
    }

    fn handle(&self, context: &mut Context) -> Result<Verdict, HandlerFault> {
        (self.action)(context)
    }

    fn description(&self) -> &str {
        self.description.as_deref().unwrap_or(&self.name)
    }
}

impl fmt::Debug for HandlerUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerUnit")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("predicate", &"<Fn(&Context) -> bool>")
            .field("action", &"<Fn(&mut Context) -> Verdict>")
            .finish()
    }
}

/// Evaluate one handler against a context.
///
/// Returns the trace entry and, when the predicate matched, the outcome. The
/// context is replaced by the staged copy only for `Handled` and
/// `PassThrough`, so a rejected or faulted action leaves no trace in it.
pub(crate) fn invoke(
    handler: &dyn Handler,
    context: &mut Context,
    catch_panics: bool,
) -> (TraceEntry, Option<Outcome>) {
    let name = handler.name();
    let revision_before = context.revision();

    let matched = match guarded(catch_panics, || handler.applies(context)) {
        Ok(matched) => matched,
        Err(panic) => {
            warn!(handler = name, panic = %panic, "Handler predicate panicked");
            let outcome = Outcome::Fault(format!("predicate panicked: {panic}"));
            return (
                TraceEntry::evaluated(name, false, &outcome, revision_before, revision_before),
                Some(outcome),
            );
        }
    };

    if !matched {
        trace!(handler = name, "Predicate did not match, skipping");
        return (TraceEntry::skipped(name, revision_before), None);
    }

    let mut staged = context.clone();
    let outcome = match guarded(catch_panics, || handler.handle(&mut staged)) {
        Ok(Ok(verdict @ (Verdict::Handled | Verdict::PassThrough))) => {
            *context = staged;
            Outcome::from(verdict)
        }
        Ok(Ok(Verdict::Reject(reason))) => Outcome::Reject(reason),
        Ok(Err(fault)) => Outcome::Fault(fault.reason),
        Err(panic) => Outcome::Fault(format!("action panicked: {panic}")),
    };

    debug!(
        handler = name,
        outcome = %outcome,
        revision_before,
        revision_after = context.revision(),
        "Handler evaluated"
    );

    (
        TraceEntry::evaluated(name, true, &outcome, revision_before, context.revision()),
        Some(outcome),
    )
}

pub(crate) fn guarded<T>(catch_panics: bool, f: impl FnOnce() -> T) -> Result<T, String> {
    if !catch_panics {
        return Ok(f());
    }
    catch_unwind(AssertUnwindSafe(f)).map_err(panic_message)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Escalate;

    impl Handler for Escalate {
        fn name(&self) -> &str {
            "escalate"
        }

        fn applies(&self, context: &Context) -> bool {
            context.get_i64("severity").unwrap_or(0) > 3
        }

        fn handle(&self, context: &mut Context) -> Result<Verdict, HandlerFault> {
            context.insert("escalated", true);
            Ok(Verdict::Handled)
        }

        fn description(&self) -> &str {
            "Escalate high-severity issues"
        }
    }

    #[test]
    fn test_struct_handler() {
        let handler = Escalate;
        let mut ctx = Context::new().with("severity", 5);

        let (entry, outcome) = invoke(&handler, &mut ctx, true);
        assert!(entry.matched);
        assert_eq!(outcome, Some(Outcome::Handled));
        assert_eq!(ctx.get_bool("escalated"), Some(true));
        assert_eq!(ctx.revision(), 1);
        assert_eq!(handler.description(), "Escalate high-severity issues");
    }

    #[test]
    fn test_unmatched_handler_is_skipped() {
        let mut ctx = Context::new().with("severity", 1);
        let (entry, outcome) = invoke(&Escalate, &mut ctx, true);
        assert!(!entry.matched);
        assert!(outcome.is_none());
        assert_eq!(ctx.revision(), 0);
    }

    #[test]
    fn test_reject_discards_staged_changes() {
        let unit = HandlerUnit::always("validator", |ctx: &mut Context| {
            ctx.insert("half_written", true);
            ctx.emit("validated", json!({}));
            Ok(Verdict::reject("amount must be positive"))
        });

        let mut ctx = Context::new();
        let (entry, outcome) = invoke(&unit, &mut ctx, true);
        assert_eq!(outcome, Some(Outcome::Reject("amount must be positive".to_string())));
        assert_eq!(entry.revision_before, entry.revision_after);
        assert!(!ctx.contains_key("half_written"));
        assert!(ctx.emitted_events().is_empty());
    }

    #[test]
    fn test_fault_and_panic_become_fault_outcomes() {
        let failing = HandlerUnit::always("failing", |_: &mut Context| {
            Err(HandlerFault::new("precondition violated"))
        });
        let mut ctx = Context::new();
        let (_, outcome) = invoke(&failing, &mut ctx, true);
        assert_eq!(outcome, Some(Outcome::Fault("precondition violated".to_string())));

        let panicking = HandlerUnit::always("panicking", |_: &mut Context| -> Result<Verdict, HandlerFault> {
            panic!("exploded")
        });
        let (entry, outcome) = invoke(&panicking, &mut ctx, true);
        assert!(entry.matched);
        assert_eq!(outcome, Some(Outcome::Fault("action panicked: exploded".to_string())));
    }

    #[test]
    fn test_outcome_labels_and_display() {
        assert_eq!(Outcome::Handled.to_string(), "Handled");
        assert_eq!(Outcome::Reject("no".to_string()).to_string(), "Reject(no)");
        assert_eq!(Outcome::Cancelled.label(), "Cancelled");
        assert!(Outcome::Cancelled.is_retryable());
        assert!(!Outcome::Fault("x".to_string()).is_retryable());
    }

    #[test]
    fn test_outcome_serde() {
        let json = serde_json::to_value(Outcome::Reject("too large".to_string())).unwrap();
        assert_eq!(json, json!({"type": "reject", "reason": "too large"}));

        let parsed: Outcome = serde_json::from_value(json!({"type": "pass_through"})).unwrap();
        assert_eq!(parsed, Outcome::PassThrough);
    }

    #[test]
    fn test_unit_description_defaults_to_name() {
        let unit = HandlerUnit::always("noop", |_: &mut Context| Ok(Verdict::PassThrough));
        assert_eq!(unit.description(), "noop");
        let described = unit.with_description("Does nothing");
        assert_eq!(described.description(), "Does nothing");
    }
}
