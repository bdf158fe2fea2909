//! # Registry Infrastructure
//!
//! Registries for handler units, event subscribers, and queued commands.
//!
//! ## Available Registries
//!
//! - **HandlerRegistry**: Name-to-handler bindings; re-registering supersedes
//! - **SubscriberRegistry**: Event-type fan-out with copy-on-notify snapshots
//! - **CommandQueue**: FIFO of deferred handler invocations
//!
//! ## Architecture
//!
//! ```text
//! Registry Infrastructure
//! ├── HandlerRegistry       (DashMap, lock-free reads)
//! ├── SubscriberRegistry    (RwLock, snapshot then fan out unlocked)
//! └── CommandQueue          (Mutex, take batch then run unlocked)
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use dispatch_core::registry::SubscriberRegistry;
//! use dispatch_core::{Context, HandlerUnit, Verdict};
//!
//! let registry = SubscriberRegistry::new();
//! let audit = HandlerUnit::always("audit", |ctx: &mut Context| {
//!     ctx.insert("audited", true);
//!     Ok(Verdict::Handled)
//! });
//!
//! registry.subscribe("order.placed", audit.into_ref());
//! let notifications = registry.notify("order.placed", serde_json::json!({"order_id": 7}));
//! assert_eq!(notifications.len(), 1);
//! ```

pub mod command_queue;
pub mod handler_registry;
pub mod subscriber_registry;

// Re-export main types for easy access
pub use command_queue::{CommandQueue, CommandReceipt};
pub use handler_registry::HandlerRegistry;
pub use subscriber_registry::{Notification, SubscriberDetail, SubscriberRegistry, SubscriberStats};
