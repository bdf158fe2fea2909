//! Error types for the dispatch core.
//!
//! Expected outcomes (`Reject`, an unmatched chain, a terminal state) are data
//! and never appear here. This module only carries defects raised by handler
//! actions and malformed definitions or configuration.

use crate::trace::Trace;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// A handler action failed; the run was aborted at that handler.
    #[error("Handler '{handler}' faulted: {reason}")]
    Fault {
        handler: String,
        reason: String,
        /// Trace up to and including the faulting handler
        trace: Trace,
    },

    #[error("Handler '{0}' is not registered")]
    UnknownHandler(String),

    #[error("No chain or state machine named '{0}'")]
    UnknownDefinition(String),

    #[error("Definition '{0}' already exists")]
    DefinitionExists(String),

    #[error("Chain '{chain}' lists handler '{handler}' more than once")]
    DuplicateHandler { chain: String, handler: String },

    #[error("State machine '{machine}' has no states")]
    EmptyStateMachine { machine: String },

    #[error("State machine '{machine}' defines state '{state}' more than once")]
    DuplicateState { machine: String, state: String },

    #[error("State machine '{machine}': transition declared from undefined state '{state}'")]
    UnknownSourceState { machine: String, state: String },

    #[error("State machine '{machine}': initial state '{state}' is not defined")]
    InvalidInitialState { machine: String, state: String },

    #[error("State machine '{machine}': transition from '{from}' targets undefined state '{to}'")]
    UndefinedState {
        machine: String,
        from: String,
        to: String,
    },

    #[error("State machine '{machine}' exceeded {limit} steps without reaching a terminal state")]
    StepLimitExceeded { machine: String, limit: usize },

    #[error("Revision conflict: fork taken at revision {forked_at:?}, context is at revision {current}")]
    RevisionConflict { forked_at: Option<u64>, current: u64 },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DispatchError {
    /// True for construction-time and configuration errors.
    pub fn is_definition_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownHandler(_)
                | Self::UnknownDefinition(_)
                | Self::DefinitionExists(_)
                | Self::DuplicateHandler { .. }
                | Self::EmptyStateMachine { .. }
                | Self::DuplicateState { .. }
                | Self::UnknownSourceState { .. }
                | Self::InvalidInitialState { .. }
                | Self::UndefinedState { .. }
                | Self::Configuration(_)
        )
    }

    /// Name of the faulting handler, if this is a fault.
    pub fn faulting_handler(&self) -> Option<&str> {
        match self {
            Self::Fault { handler, .. } => Some(handler),
            _ => None,
        }
    }
}

impl From<config::ConfigError> for DispatchError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

/// Error returned by a handler action to signal a defect.
///
/// This is not a business rejection. Use `Verdict::Reject` for those.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct HandlerFault {
    pub reason: String,
}

impl HandlerFault {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Fault for a context key the action requires but did not find.
    pub fn missing_key(key: &str) -> Self {
        Self::new(format!("required context key '{key}' is missing"))
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = DispatchError::UndefinedState {
            machine: "order".to_string(),
            from: "start".to_string(),
            to: "nowhere".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "State machine 'order': transition from 'start' targets undefined state 'nowhere'"
        );

        let fault = HandlerFault::missing_key("issue");
        assert_eq!(fault.to_string(), "required context key 'issue' is missing");
    }

    #[test]
    fn test_error_classification() {
        assert!(DispatchError::UnknownHandler("x".to_string()).is_definition_error());
        assert!(DispatchError::Configuration("bad".to_string()).is_definition_error());

        let fault = DispatchError::Fault {
            handler: "payments".to_string(),
            reason: "boom".to_string(),
            trace: Trace::default(),
        };
        assert!(!fault.is_definition_error());
        assert_eq!(fault.faulting_handler(), Some("payments"));
    }
}
