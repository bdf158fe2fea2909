//! Cooperative cancellation checked between handler invocations.
//!
//! Actions are atomic from the dispatcher's point of view, so a token is only
//! consulted before each step, never while an action is running.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancellationToken {
    /// Token that only fires when [`cancel`](Self::cancel) is called.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that also fires once `timeout` has elapsed from now.
    ///
    /// A timeout too large to represent as an `Instant` means no deadline.
    pub fn with_deadline(timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => Self::deadline_at(deadline),
            None => Self::new(),
        }
    }

    pub fn deadline_at(deadline: Instant) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Some(deadline),
        }
    }

    /// Cancel this token and every clone of it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_propagates_to_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());

        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_deadline() {
        let expired = CancellationToken::deadline_at(Instant::now());
        assert!(expired.is_cancelled());

        let distant = CancellationToken::with_deadline(Duration::from_secs(3600));
        assert!(!distant.is_cancelled());
        assert!(distant.deadline().is_some());
    }

    #[test]
    fn test_unrepresentable_deadline_never_fires() {
        let token = CancellationToken::with_deadline(Duration::MAX);
        assert!(token.deadline().is_none());
        assert!(!token.is_cancelled());

        token.cancel();
        assert!(token.is_cancelled());
    }
}
