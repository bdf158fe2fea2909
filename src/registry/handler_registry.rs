//! # Handler Registry
//!
//! Thread-safe name-to-handler bindings backed by `DashMap`.
//!
//! Handlers are immutable once registered. Registering a new handler under an
//! existing name atomically replaces the binding; definitions built earlier
//! keep the handler instance they resolved at build time.

use crate::error::{DispatchError, DispatchResult};
use crate::handler::{Handler, HandlerRef};
use crate::logging::log_registry_operation;
use dashmap::DashMap;

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, HandlerRef>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` under its own name, returning the handler it superseded.
    pub fn register(&self, handler: HandlerRef) -> Option<HandlerRef> {
        let name = handler.name().to_string();
        let previous = self.handlers.insert(name.clone(), handler);

        let status = if previous.is_some() {
            "superseded"
        } else {
            "registered"
        };
        log_registry_operation("register_handler", None, Some(&name), status, None);

        previous
    }

    pub fn get(&self, name: &str) -> Option<HandlerRef> {
        self.handlers.get(name).map(|entry| entry.value().clone())
    }

    /// Resolve handler names in order, failing on the first unknown name.
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> DispatchResult<Vec<HandlerRef>> {
        names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                self.get(name)
                    .ok_or_else(|| DispatchError::UnknownHandler(name.to_string()))
            })
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}
