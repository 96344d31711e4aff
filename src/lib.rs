#![warn(clippy::all)]
#![warn(rust_2018_idioms)]

//! # tick-scheduler
//!
//! A cooperative, non-preemptive, tick-driven task scheduler for
//! single-threaded host loops.
//!
//! There is no thread per task and no preemption: a host calls
//! [`Scheduler::execute`] once per loop iteration ("tick") with the
//! current time, and the scheduler runs to completion whichever tasks
//! are due — in chain order, synchronously, on the caller's stack.
//! Nothing here spawns a thread or blocks; the host owns the loop.
//!
//! ## Key Components
//!
//! - **[`Scheduler`]**: owns a chain of tasks and drives dispatch passes.
//! - **[`Task`]** / **[`TaskBuilder`]**: the scheduled unit of work,
//!   built via a fluent, construct-then-validate builder.
//! - **[`TaskHandle`]**: a small, `Copy`, generation-checked reference
//!   used to address a task after it has been added to a scheduler.
//! - **[`StatusRequest`]**: an ISR-safe signal object tasks can gate
//!   their dispatch on, or use to hand off results to each other.
//! - **[`Clock`]**: the host-supplied monotonic time source.
//!
//! ## Example
//!
//! ```rust
//! use tick_scheduler::prelude::*;
//!
//! let mut scheduler = Scheduler::new();
//! let blink = scheduler.add_task(
//!     TaskBuilder::new(500, Iterations::FOREVER, |_ctx| {
//!         // toggle an LED, poll a sensor, whatever the tick is for
//!     })
//!     .build()
//!     .unwrap(),
//! );
//!
//! let mut clock = ManualClock::new();
//! scheduler.enable(blink, clock.now()).unwrap();
//!
//! clock.advance(500);
//! scheduler.execute(clock.now());
//! assert_eq!(scheduler.run_counter(blink), Some(1));
//! ```

pub mod error;
pub mod scheduler;
pub mod status;
pub mod task;
pub mod time;

pub use error::SchedulerError;
pub use scheduler::{Scheduler, TaskContext};
pub use status::{StatusRequest, STATUS_OK};
pub use task::{Callback, Iterations, ScheduleOption, Task, TaskBuilder, TaskHandle, TaskInfo};
pub use time::{is_due, wrapping_diff, Clock, ManualClock, SignedTick, SystemClock, Tick, IMMEDIATE, NO_TIMEOUT};

/// Common imports for crates embedding a scheduler.
pub mod prelude {
    pub use crate::{
        status::StatusRequest,
        scheduler::{Scheduler, TaskContext},
        task::{Callback, Iterations, ScheduleOption, TaskBuilder, TaskHandle, TaskInfo},
        time::{Clock, ManualClock, SystemClock, Tick},
        SchedulerError,
    };
}
