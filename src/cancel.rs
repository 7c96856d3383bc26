//! Hierarchical cancellation
//!
//! Every worker thread (sender, receive loops, watchdogs) holds a child of the
//! session's root token. Cancelling a token cancels all of its descendants;
//! descendants never cancel their ancestors.
//!
//! Blocking points (sleeps, socket receives) wake at least every
//! [`CANCEL_POLL`] to observe the signal.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Upper bound on how long a sliced sleep waits before re-checking the token
pub const CANCEL_POLL: Duration = Duration::from_millis(10);

/// Clonable cancellation handle with an optional deadline
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    deadline: Option<Instant>,
    parent: Option<CancelToken>,
}

impl CancelToken {
    /// Create a new root token
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a token cancelled together with this one
    pub fn child(&self) -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                deadline: None,
                parent: Some(self.clone()),
            }),
        }
    }

    /// Derive a token that additionally expires at `deadline`
    pub fn child_with_deadline(&self, deadline: Instant) -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                deadline: Some(deadline),
                parent: Some(self.clone()),
            }),
        }
    }

    /// Cancel this token and every token derived from it
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
    }

    /// True once this token or an ancestor was cancelled or its deadline passed
    pub fn is_cancelled(&self) -> bool {
        if self.inner.cancelled.load(Ordering::Acquire) {
            return true;
        }
        if let Some(deadline) = self.inner.deadline
            && Instant::now() >= deadline
        {
            return true;
        }
        self.inner
            .parent
            .as_ref()
            .is_some_and(|parent| parent.is_cancelled())
    }

    /// Earliest deadline along the ancestor chain
    pub fn deadline(&self) -> Option<Instant> {
        let parent = self.inner.parent.as_ref().and_then(|p| p.deadline());
        match (self.inner.deadline, parent) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Sleep for `duration` unless cancelled first
    ///
    /// Returns `true` if the full duration elapsed, `false` on cancellation.
    pub fn sleep(&self, duration: Duration) -> bool {
        self.sleep_until(Instant::now() + duration)
    }

    /// Sleep until `instant` (monotonic clock) unless cancelled first
    pub fn sleep_until(&self, instant: Instant) -> bool {
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= instant {
                return true;
            }
            thread::sleep((instant - now).min(CANCEL_POLL));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_follows_parent() {
        let root = CancelToken::new();
        let child = root.child();
        let grandchild = child.child();
        assert!(!grandchild.is_cancelled());

        root.cancel();
        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
    }

    #[test]
    fn test_child_does_not_cancel_parent() {
        let root = CancelToken::new();
        let child = root.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!root.is_cancelled());
    }

    #[test]
    fn test_deadline_expires() {
        let root = CancelToken::new();
        let token = root.child_with_deadline(Instant::now() + Duration::from_millis(20));
        assert!(!token.is_cancelled());
        thread::sleep(Duration::from_millis(30));
        assert!(token.is_cancelled());
        assert!(!root.is_cancelled());
    }

    #[test]
    fn test_earliest_deadline_wins() {
        let now = Instant::now();
        let outer = CancelToken::new().child_with_deadline(now + Duration::from_secs(1));
        let inner = outer.child_with_deadline(now + Duration::from_secs(5));
        assert_eq!(inner.deadline(), Some(now + Duration::from_secs(1)));
        assert_eq!(CancelToken::new().deadline(), None);
    }

    #[test]
    fn test_sleep_interrupted() {
        let token = CancelToken::new();
        let canceller = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            canceller.cancel();
        });

        let start = Instant::now();
        assert!(!token.sleep(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
        handle.join().unwrap();
    }

    #[test]
    fn test_sleep_completes() {
        let token = CancelToken::new();
        let start = Instant::now();
        assert!(token.sleep(Duration::from_millis(25)));
        assert!(start.elapsed() >= Duration::from_millis(25));
    }
}
