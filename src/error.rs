//! Ambient error type for the fallible *construction-time* surface.
//!
//! Runtime scheduling decisions are deliberately exception-free (spec
//! §7): disabling an already-disabled task, deleting an unchained task,
//! signaling a request with no waiters, and counter wraparound are all
//! absorbed silently, matching the spec. `SchedulerError` only covers
//! the handful of places where a caller can hand the builder a
//! genuinely invalid configuration, or a handle that does not belong to
//! the scheduler it was passed to.

use crate::task::TaskHandle;
use thiserror::Error;

/// Errors raised while building or wiring up scheduling objects.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerError {
    /// An explicit, finite iteration count of zero can never run; use
    /// `Iterations::FOREVER` or a positive count.
    #[error("iterations must be non-zero (use Iterations::FOREVER for unbounded tasks)")]
    ZeroIterations,

    /// The given [`TaskHandle`] was not produced by this [`Scheduler`](crate::Scheduler)
    /// (or the task it named has since been removed).
    #[error("task handle {0:?} is not live in this scheduler")]
    UnknownTask(TaskHandle),
}
