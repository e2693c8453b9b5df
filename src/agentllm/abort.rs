//! Cooperative cancellation primitives.
//!
//! An [`AbortController`] owns the cancel side; the [`AbortSignal`] it hands
//! out is cheaply cloneable and is threaded through request options into HTTP
//! calls, SSE read loops, rate-limiter queues, and the agent engine's
//! iteration boundaries.  Cancellation is cooperative: holders of a signal
//! poll [`AbortSignal::is_aborted`] at their suspension points or await
//! [`AbortSignal::cancelled`] inside a `select!`.
//!
//! # Example
//!
//! ```rust
//! use agentllm::abort::AbortController;
//!
//! let controller = AbortController::new();
//! let signal = controller.signal();
//! assert!(!signal.is_aborted());
//!
//! controller.abort("user pressed ctrl-c");
//! assert!(signal.is_aborted());
//! assert_eq!(signal.reason().as_deref(), Some("user pressed ctrl-c"));
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct AbortInner {
    aborted: AtomicBool,
    reason: Mutex<Option<String>>,
    notify: Notify,
}

/// Cloneable handle observed by cancellable operations.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    inner: Arc<AbortInner>,
}

impl AbortSignal {
    /// Whether the controller has fired.
    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    /// The reason passed to [`AbortController::abort`], if any.
    pub fn reason(&self) -> Option<String> {
        self.inner.reason.lock().unwrap().clone()
    }

    /// Resolve once the signal fires. Returns immediately when already
    /// aborted.
    pub async fn cancelled(&self) {
        loop {
            // Register interest before re-checking so a concurrent abort
            // between the check and the await cannot be missed.
            let notified = self.inner.notify.notified();
            if self.is_aborted() {
                return;
            }
            notified.await;
        }
    }
}

/// Owner side of an abort pair.
#[derive(Debug, Clone, Default)]
pub struct AbortController {
    signal: AbortSignal,
}

impl AbortController {
    pub fn new() -> Self {
        Self::default()
    }

    /// A signal wired to this controller.
    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    /// Fire the signal. Later calls keep the first reason.
    pub fn abort(&self, reason: impl Into<String>) {
        {
            let mut slot = self.signal.inner.reason.lock().unwrap();
            if slot.is_none() {
                *slot = Some(reason.into());
            }
        }
        self.signal.inner.aborted.store(true, Ordering::SeqCst);
        self.signal.inner.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_signal_starts_clear() {
        let controller = AbortController::new();
        assert!(!controller.signal().is_aborted());
        assert_eq!(controller.signal().reason(), None);
    }

    #[test]
    fn test_abort_sets_flag_and_reason() {
        let controller = AbortController::new();
        let signal = controller.signal();
        controller.abort("done");
        assert!(signal.is_aborted());
        assert_eq!(signal.reason().as_deref(), Some("done"));
    }

    #[test]
    fn test_first_reason_wins() {
        let controller = AbortController::new();
        controller.abort("first");
        controller.abort("second");
        assert_eq!(controller.signal().reason().as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_cancelled_resolves_on_abort() {
        let controller = AbortController::new();
        let signal = controller.signal();

        let waiter = tokio::spawn(async move {
            signal.cancelled().await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        controller.abort("stop");

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("cancelled() should resolve")
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_resolves_immediately_when_pre_aborted() {
        let controller = AbortController::new();
        controller.abort("early");
        tokio::time::timeout(Duration::from_millis(100), controller.signal().cancelled())
            .await
            .expect("pre-aborted signal should resolve at once");
    }
}
