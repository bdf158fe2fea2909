//! # Handler Chain
//!
//! Ordered handlers with first-match-wins semantics, covering both Strategy
//! selection and Chain-of-Responsibility.
//!
//! ## Dispatch Flow
//!
//! ```text
//! for each handler, in order:
//!     cancelled?          -> Cancelled
//!     predicate false     -> skip
//!     Handled             -> stop
//!     PassThrough         -> continue
//!     Reject(reason)      -> stop
//!     Fault               -> stop
//! exhausted               -> PassThrough
//! ```
//!
//! Chains are immutable values. [`Chain::with_unit`] and
//! [`Chain::without_unit`] return new chains and leave the original intact, so
//! a chain can be shared across threads without locking.

use crate::cancellation::CancellationToken;
use crate::context::Context;
use crate::error::{DispatchError, DispatchResult};
use crate::handler::{invoke, Handler, HandlerRef, Outcome};
use crate::trace::Trace;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Clone)]
pub struct Chain {
    name: String,
    units: Vec<HandlerRef>,
}

impl Chain {
    /// Build a chain, rejecting duplicate handler identities.
    pub fn new(name: impl Into<String>, units: Vec<HandlerRef>) -> DispatchResult<Self> {
        let name = name.into();
        let mut seen = HashSet::new();
        for unit in &units {
            if !seen.insert(unit.name().to_string()) {
                return Err(DispatchError::DuplicateHandler {
                    chain: name,
                    handler: unit.name().to_string(),
                });
            }
        }
        Ok(Self { name, units })
    }

    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            units: Vec::new(),
        }
    }

    /// New chain with `unit` appended.
    pub fn with_unit(&self, unit: HandlerRef) -> DispatchResult<Self> {
        let mut units = self.units.clone();
        units.push(unit);
        Self::new(self.name.clone(), units)
    }

    /// New chain without the handler called `handler`.
    #[must_use]
    pub fn without_unit(&self, handler: &str) -> Self {
        Self {
            name: self.name.clone(),
            units: self
                .units
                .iter()
                .filter(|unit| unit.name() != handler)
                .cloned()
                .collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn contains(&self, handler: &str) -> bool {
        self.units.iter().any(|unit| unit.name() == handler)
    }

    pub fn handler_names(&self) -> Vec<&str> {
        self.units.iter().map(|unit| unit.name()).collect()
    }

    /// True when both chains hold the very same handler instances in order.
    pub fn same_units(&self, other: &Chain) -> bool {
        self.units.len() == other.units.len()
            && self
                .units
                .iter()
                .zip(&other.units)
                .all(|(a, b)| Arc::ptr_eq(a, b))
    }

    /// Dispatch a context through the chain.
    pub fn dispatch(&self, context: Context) -> (Context, Outcome, Trace) {
        self.dispatch_with(context, &CancellationToken::new())
    }

    /// Dispatch with a cancellation token checked before every handler.
    pub fn dispatch_with(
        &self,
        mut context: Context,
        token: &CancellationToken,
    ) -> (Context, Outcome, Trace) {
        let mut trace = Trace::new();
        let outcome = self.execute(&mut context, &mut trace, token, true);
        (context, outcome, trace)
    }

    pub(crate) fn execute(
        &self,
        context: &mut Context,
        trace: &mut Trace,
        token: &CancellationToken,
        catch_panics: bool,
    ) -> Outcome {
        for unit in &self.units {
            if token.is_cancelled() {
                debug!(chain = %self.name, next = unit.name(), "Chain cancelled between handlers");
                return Outcome::Cancelled;
            }

            let (entry, outcome) = invoke(unit.as_ref(), context, catch_panics);
            trace.push(entry);

            match outcome {
                None | Some(Outcome::PassThrough) => continue,
                Some(outcome) => {
                    debug!(
                        chain = %self.name,
                        handler = unit.name(),
                        outcome = %outcome,
                        "Chain stopped"
                    );
                    return outcome;
                }
            }
        }

        trace!(chain = %self.name, "Chain exhausted without a handler taking responsibility");
        Outcome::PassThrough
    }

    pub fn stats(&self) -> ChainStats {
        ChainStats {
            name: self.name.clone(),
            handler_count: self.units.len(),
            handler_names: self
                .handler_names()
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("name", &self.name)
            .field("units", &self.handler_names())
            .finish()
    }
}

/// Statistics about a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainStats {
    pub name: String,
    pub handler_count: usize,
    /// Handler names in dispatch order
    pub handler_names: Vec<String>,
}
