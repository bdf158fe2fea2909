// State machine module for behavior dispatch
//
// A machine definition is an immutable table of named states, each bound to one
// handler, linked by outcome-keyed transition rules. Sessions run through a
// StateMachineInstance, which owns the context and the current state.

pub mod definition;
pub mod guards;
pub mod instance;

// Re-export main types for convenient access
pub use definition::{StateDefinition, StateMachine, StateMachineBuilder, TransitionRule};
pub use guards::{OutcomeMatcher, TransitionGuard};
pub use instance::StateMachineInstance;
