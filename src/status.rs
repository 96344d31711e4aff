//! [`StatusRequest`]: the cross-task (and ISR-safe) signaling primitive.
//!
//! Per spec §4.2/§9, only `signal()` is required to be safe to call from
//! a context other than the scheduling loop (e.g. an interrupt handler).
//! That is why the counter and status code live behind atomics rather
//! than a `RefCell` or similar: `signal()` never needs `&mut self` and
//! never touches a task chain.

use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;

/// Default status code meaning "OK" (spec §7: "0 OK, negative = error /
/// cancel / abort / timeout; values are opaque to the scheduler").
pub const STATUS_OK: i32 = 0;

#[derive(Debug)]
struct Inner {
    /// Number of outstanding signals still required before `signaled`.
    count: AtomicU32,
    /// Last status code passed to `signal`/`signal_complete`.
    status: AtomicI32,
}

/// An event object that tasks can wait on.
///
/// A `StatusRequest` is cheap to clone (it is a reference-counted handle
/// to shared atomic state), which is how it is shared between the task
/// that owns it and any number of tasks `wait_for`-ing it, matching the
/// "many-to-many weak relation" the Design Notes call for: nothing here
/// keeps a `Task` alive, and clones can be dropped freely.
#[derive(Debug, Clone)]
pub struct StatusRequest(Arc<Inner>);

impl StatusRequest {
    /// Creates a new request, initially signaled (no pending waiters).
    pub fn new() -> Self {
        Self(Arc::new(Inner {
            count: AtomicU32::new(0),
            status: AtomicI32::new(STATUS_OK),
        }))
    }

    /// Re-arms the request: `n` signals (at least one) are now required
    /// before it is considered signaled again, and the status code is
    /// cleared back to [`STATUS_OK`].
    pub fn set_waiting(&self, n: u32) {
        self.0.count.store(n.max(1), Ordering::SeqCst);
        self.0.status.store(STATUS_OK, Ordering::SeqCst);
        tracing::trace!(pending = n.max(1), "status_request.set_waiting");
    }

    /// Signals the request once, decrementing the pending count.
    ///
    /// Safe to call from an interrupt handler or any other context that
    /// must not touch a task chain: this only performs atomic stores.
    /// A no-op if the request is already signaled (count already zero) —
    /// re-arm with [`Self::set_waiting`] first.
    pub fn signal(&self, status: i32) {
        let prev = self
            .0
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| {
                if c == 0 {
                    None
                } else {
                    Some(c - 1)
                }
            });
        if let Ok(prev) = prev {
            if prev == 1 {
                self.0.status.store(status, Ordering::SeqCst);
                tracing::debug!(status, "status_request.signaled");
            }
        }
    }

    /// Forces the request into the signaled state immediately, regardless
    /// of how many signals were still outstanding.
    pub fn signal_complete(&self, status: i32) {
        self.0.count.store(0, Ordering::SeqCst);
        self.0.status.store(status, Ordering::SeqCst);
        tracing::debug!(status, "status_request.signal_complete");
    }

    /// Whether the request currently has zero pending signals.
    #[inline]
    pub fn is_signaled(&self) -> bool {
        self.0.count.load(Ordering::SeqCst) == 0
    }

    /// The status code from the most recent completing signal.
    #[inline]
    pub fn status(&self) -> i32 {
        self.0.status.load(Ordering::SeqCst)
    }

    /// Number of signals still outstanding before this request is
    /// signaled.
    #[inline]
    pub fn pending(&self) -> u32 {
        self.0.count.load(Ordering::SeqCst)
    }
}

impl Default for StatusRequest {
    fn default() -> Self {
        Self::new()
    }
}
