//! Shared fixtures and proptest strategies for integration tests.
#![allow(dead_code)]

pub mod strategies;

use dispatch_core::{Context, Dispatcher, HandlerFault, HandlerRef, HandlerUnit, Verdict};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Unit that matches when `issue` equals its own name and records itself.
pub fn issue_handler(issue: &'static str) -> HandlerRef {
    HandlerUnit::new(
        issue,
        move |ctx: &Context| ctx.get_str("issue") == Some(issue),
        move |ctx: &mut Context| {
            ctx.insert("resolved_by", issue);
            Ok(Verdict::Handled)
        },
    )
    .into_ref()
}

/// Always-matching unit that increments `key` and returns `verdict`.
pub fn counting_handler(name: &str, key: &'static str, verdict: Verdict) -> HandlerRef {
    HandlerUnit::always(name, move |ctx: &mut Context| {
        let count = ctx.get_i64(key).unwrap_or(0);
        ctx.insert(key, count + 1);
        Ok(verdict.clone())
    })
    .into_ref()
}

/// Always-matching unit that counts its invocations outside the context.
pub fn call_counter(name: &str, calls: &Arc<AtomicUsize>) -> HandlerRef {
    let calls = Arc::clone(calls);
    HandlerUnit::always(name, move |_: &mut Context| {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(Verdict::Handled)
    })
    .into_ref()
}

pub fn faulting_handler(name: &str, reason: &'static str) -> HandlerRef {
    HandlerUnit::always(name, move |_: &mut Context| Err(HandlerFault::new(reason))).into_ref()
}

/// Dispatcher with `Basic` and `Intermediate` registered and chained as `support`.
pub fn support_dispatcher() -> Dispatcher {
    let dispatcher = Dispatcher::new();
    dispatcher.register_handler(issue_handler("Basic"));
    dispatcher.register_handler(issue_handler("Intermediate"));
    dispatcher
        .build_chain("support", &["Basic", "Intermediate"])
        .expect("support chain should build");
    dispatcher
}
