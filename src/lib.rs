#![allow(clippy::doc_markdown)] // Allow technical terms in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Dispatch Core
//!
//! In-process behavior dispatch: predicate-guarded handler units composed into
//! ordered chains, outcome-driven state machines, and event fan-out.
//!
//! ## Overview
//!
//! Every behavior is a [`Handler`]: a pure applicability predicate plus an
//! action that mutates a [`Context`] and returns a verdict. The same primitive
//! backs strategy selection, chain-of-responsibility, state handlers, observers
//! and queued commands.
//!
//! ## Key Features
//!
//! - **First-match-wins chains**: immutable, shareable across threads
//! - **Validated state machines**: undefined targets rejected at build time
//! - **Copy-on-notify fan-out**: subscribers may subscribe from inside a delivery
//! - **Revisioned contexts**: the revision only moves on an effective change
//! - **Auditable runs**: every evaluated handler lands in a serializable [`Trace`]
//! - **Fault isolation**: action errors and panics become `Fault`, never a crash
//!
//! ## Module Organization
//!
//! - [`handler`] - Handler trait, closure-backed units, outcomes
//! - [`context`] - Revisioned key/value blackboard
//! - [`chain`] - Ordered first-match-wins dispatch
//! - [`state_machine`] - Machine definitions, guards, per-session instances
//! - [`registry`] - Handler, subscriber and command registries
//! - [`dispatcher`] - Façade tying the above together
//! - [`trace`] - Per-run audit log
//! - [`cancellation`] - Cooperative cancellation and deadlines
//! - [`config`] - Layered configuration
//! - [`logging`] - Structured logging setup and helpers
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust
//! use dispatch_core::{Context, Dispatcher, HandlerUnit, Outcome, Verdict};
//!
//! # fn main() -> Result<(), dispatch_core::DispatchError> {
//! let dispatcher = Dispatcher::new();
//!
//! for issue in ["Basic", "Intermediate"] {
//!     dispatcher.register_handler(
//!         HandlerUnit::new(
//!             issue,
//!             move |ctx: &Context| ctx.get_str("issue") == Some(issue),
//!             move |ctx: &mut Context| {
//!                 ctx.insert("resolved_by", issue);
//!                 Ok(Verdict::Handled)
//!             },
//!         )
//!         .into_ref(),
//!     );
//! }
//! dispatcher.build_chain("support", &["Basic", "Intermediate"])?;
//!
//! let report = dispatcher.run("support", Context::new().with("issue", "Intermediate"))?;
//! assert_eq!(report.outcome, Outcome::Handled);
//! assert_eq!(report.context.get_str("resolved_by"), Some("Intermediate"));
//! # Ok(())
//! # }
//! ```

pub mod cancellation;
pub mod chain;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod logging;
pub mod registry;
pub mod state_machine;
pub mod trace;

pub use cancellation::CancellationToken;
pub use chain::{Chain, ChainStats};
pub use config::{ConfigLoader, DispatcherConfig, LoggingConfig};
pub use context::{Context, ContextValues, EmittedEvent};
pub use dispatcher::{BranchReport, Definition, Dispatcher, FanOutReport, RunReport};
pub use error::{DispatchError, DispatchResult, HandlerFault};
pub use handler::{Handler, HandlerRef, HandlerUnit, Outcome, Verdict};
pub use logging::init_structured_logging;
pub use registry::{
    CommandQueue, CommandReceipt, HandlerRegistry, Notification, SubscriberRegistry,
    SubscriberStats,
};
pub use state_machine::{
    OutcomeMatcher, StateDefinition, StateMachine, StateMachineBuilder, StateMachineInstance,
    TransitionGuard, TransitionRule,
};
pub use trace::{Trace, TraceEntry};
