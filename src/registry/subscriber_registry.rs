//! # Subscriber Registry
//!
//! Observer-style fan-out: event types map to insertion-ordered subscriber
//! lists.
//!
//! ## Key Features
//!
//! - **Idempotent subscription**: one entry per handler name per event type
//! - **Copy-on-notify**: each notify snapshots its subscriber list under the
//!   read lock, then delivers without holding it, so subscribers may subscribe
//!   or unsubscribe from inside their own action
//! - **Best-effort delivery**: every subscriber in the snapshot is invoked once,
//!   whatever the others returned
//!
//! A subscriber's predicate acts as a filter: when it does not match, the
//! notification records `PassThrough` with `matched: false`.

use crate::context::Context;
use crate::handler::{invoke, Handler, HandlerRef, Outcome};
use crate::logging::log_registry_operation;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

/// Result of delivering one event to one subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub subscriber: String,
    pub event_type: String,
    pub matched: bool,
    pub outcome: Outcome,
}

pub struct SubscriberRegistry {
    subscriptions: RwLock<HashMap<String, Vec<HandlerRef>>>,
    catch_panics: bool,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            catch_panics: true,
        }
    }

    /// Control whether subscriber panics are captured as faults.
    #[must_use]
    pub fn with_panic_capture(mut self, catch_panics: bool) -> Self {
        self.catch_panics = catch_panics;
        self
    }

    /// Subscribe `unit` to `event_type`. Returns false if a unit with the same
    /// name was already subscribed.
    pub fn subscribe(&self, event_type: &str, unit: HandlerRef) -> bool {
        let name = unit.name().to_string();
        let added = {
            let mut subscriptions = self.subscriptions.write();
            let subscribers = subscriptions.entry(event_type.to_string()).or_default();
            if subscribers.iter().any(|existing| existing.name() == name) {
                false
            } else {
                subscribers.push(unit);
                true
            }
        };

        let status = if added { "subscribed" } else { "already_subscribed" };
        log_registry_operation("subscribe", Some(event_type), Some(&name), status, None);
        added
    }

    /// Remove the subscriber called `name`. Returns false if it was not present.
    pub fn unsubscribe(&self, event_type: &str, name: &str) -> bool {
        let removed = {
            let mut subscriptions = self.subscriptions.write();
            match subscriptions.get_mut(event_type) {
                Some(subscribers) => {
                    let before = subscribers.len();
                    subscribers.retain(|existing| existing.name() != name);
                    let removed = subscribers.len() != before;
                    if subscribers.is_empty() {
                        subscriptions.remove(event_type);
                    }
                    removed
                }
                None => false,
            }
        };

        let status = if removed { "unsubscribed" } else { "not_subscribed" };
        log_registry_operation("unsubscribe", Some(event_type), Some(name), status, None);
        removed
    }

    /// Deliver `payload` to every subscriber of `event_type`.
    ///
    /// Each subscriber receives its own context seeded from the payload.
    /// Outcomes are returned in subscription order.
    pub fn notify(&self, event_type: &str, payload: Value) -> Vec<Notification> {
        let snapshot = self.snapshot(event_type);

        if snapshot.is_empty() {
            debug!(event_type, "No subscribers found for event type");
            return Vec::new();
        }

        let mut notifications = Vec::with_capacity(snapshot.len());
        for subscriber in snapshot {
            let mut context = Context::from_payload(payload.clone());
            let (entry, outcome) = invoke(subscriber.as_ref(), &mut context, self.catch_panics);

            let outcome = outcome.unwrap_or(Outcome::PassThrough);
            if let Outcome::Fault(reason) = &outcome {
                warn!(
                    event_type,
                    subscriber = subscriber.name(),
                    reason = %reason,
                    "Subscriber faulted, continuing delivery"
                );
            }

            notifications.push(Notification {
                subscriber: subscriber.name().to_string(),
                event_type: event_type.to_string(),
                matched: entry.matched,
                outcome,
            });
        }

        debug!(
            event_type,
            delivered = notifications.len(),
            "Event delivered to subscribers"
        );
        notifications
    }

    fn snapshot(&self, event_type: &str) -> Vec<HandlerRef> {
        self.subscriptions
            .read()
            .get(event_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Subscriber names for `event_type`, in delivery order.
    pub fn subscribers(&self, event_type: &str) -> Vec<String> {
        self.snapshot(event_type)
            .iter()
            .map(|subscriber| subscriber.name().to_string())
            .collect()
    }

    pub fn is_subscribed(&self, event_type: &str, name: &str) -> bool {
        self.subscriptions
            .read()
            .get(event_type)
            .is_some_and(|subscribers| subscribers.iter().any(|s| s.name() == name))
    }

    /// Get subscription statistics
    pub fn stats(&self) -> SubscriberStats {
        let subscriptions = self.subscriptions.read();

        let mut details: Vec<SubscriberDetail> = subscriptions
            .iter()
            .map(|(event_type, subscribers)| SubscriberDetail {
                event_type: event_type.clone(),
                subscribers: subscribers.iter().map(|s| s.name().to_string()).collect(),
            })
            .collect();
        details.sort_by(|a, b| a.event_type.cmp(&b.event_type));

        SubscriberStats {
            total_event_types: subscriptions.len(),
            total_subscriptions: subscriptions.values().map(Vec::len).sum(),
            details,
        }
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("stats", &self.stats())
            .field("catch_panics", &self.catch_panics)
            .finish()
    }
}

/// Statistics about subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberStats {
    pub total_event_types: usize,
    pub total_subscriptions: usize,
    /// Sorted by event type
    pub details: Vec<SubscriberDetail>,
}

/// Subscribers of one event type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberDetail {
    pub event_type: String,
    pub subscribers: Vec<String>,
}
