//! [`Task`]: the scheduled unit of work, and the [`TaskBuilder`] used to
//! assemble one before it is handed to a [`crate::Scheduler`].
//!
//! A `Task` never lives outside a `Scheduler`'s arena once added — per
//! the Design Notes, chain membership is represented as an index into
//! an arena the `Scheduler` owns, rather than an intrusive pointer the
//! `Task` carries itself. [`TaskHandle`] is the (generation-checked)
//! address callers use afterwards; `Task` itself stays private to this
//! crate.

use crate::scheduler::TaskContext;
use crate::status::StatusRequest;
use crate::time::{Tick, SignedTick, IMMEDIATE, NO_TIMEOUT};
use crate::error::SchedulerError;

/// Opaque, generation-checked reference to a task living inside a
/// [`crate::Scheduler`]'s arena.
///
/// Stale handles (from a task that has since been removed, whose slot
/// was reused by a later `add_task`) are detected via the generation
/// counter and treated as absent rather than aliasing the wrong task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// Remaining-iteration counter.
///
/// A newtype rather than a bare `u32` so that the `FOREVER` sentinel
/// (spec §6: "reserved sentinel values") can't be confused with an
/// ordinary large count at the type level while still matching the
/// spec's own vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Iterations(pub u32);

impl Iterations {
    /// Never decrements; the task only stops via `disable()`.
    pub const FOREVER: Iterations = Iterations(u32::MAX);
    /// Runs exactly once, then auto-disables.
    pub const ONCE: Iterations = Iterations(1);

    #[inline]
    pub fn is_forever(self) -> bool {
        self.0 == Self::FOREVER.0
    }

    /// Count down by one. No-op if this is `FOREVER`. Returns the new
    /// remaining count.
    #[inline]
    fn decrement(self) -> Self {
        if self.is_forever() || self.0 == 0 {
            self
        } else {
            Iterations(self.0 - 1)
        }
    }

    /// Whether this decrement would reach zero (used for
    /// `isLastIteration`).
    #[inline]
    fn is_last(self) -> bool {
        !self.is_forever() && self.0 == 1
    }
}

/// Catch-up policy for a late dispatch. See spec §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScheduleOption {
    /// Advance the anchor by exactly one interval per run; if the host
    /// falls behind, back-to-back dispatches catch the schedule up.
    #[default]
    Schedule,
    /// Re-anchor to `now - overrun`; skips rather than bursts.
    #[cfg(feature = "schedule-options")]
    ScheduleNc,
    /// Re-anchor to exactly `now`; next run is `interval` after the
    /// actual dispatch instant, not the nominal one.
    #[cfg(feature = "schedule-options")]
    Interval,
}

type OnEnableHook = Box<dyn FnMut(&TaskInfo<'_>) -> bool>;
type OnDisableHook = Box<dyn FnMut(&TaskInfo<'_>)>;
type BoxedCallback = Box<dyn FnMut(&mut TaskContext<'_>)>;

/// A task's main body of work.
///
/// Both a bare function pointer and a capturing closure are supported
/// (Design Notes: "the source supports both plain function pointers and
/// closures that capture state"); the function-pointer variant needs no
/// allocation, the closure variant is boxed.
pub enum Callback {
    None,
    Fn(fn(&mut TaskContext<'_>)),
    Boxed(BoxedCallback),
}

impl Callback {
    pub(crate) fn invoke(&mut self, ctx: &mut TaskContext<'_>) {
        match self {
            Callback::None => {}
            Callback::Fn(f) => f(ctx),
            Callback::Boxed(f) => f(ctx),
        }
    }
}

impl std::fmt::Debug for Callback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Callback::None => write!(f, "Callback::None"),
            Callback::Fn(_) => write!(f, "Callback::Fn(..)"),
            Callback::Boxed(_) => write!(f, "Callback::Boxed(..)"),
        }
    }
}

/// Read-only view of a [`Task`] passed to `onEnable`/`onDisable` hooks.
///
/// These hooks fire outside of a scheduler pass (synchronously from
/// `enable`/`disable`), so unlike the main callback they are not given
/// mutable access to the scheduler — they can observe the task's own
/// state and veto enabling, but not reach into sibling tasks.
pub struct TaskInfo<'a>(pub(crate) &'a Task);

impl<'a> TaskInfo<'a> {
    pub fn run_counter(&self) -> u32 {
        self.0.run_counter
    }

    pub fn is_first_iteration(&self) -> bool {
        self.0.run_counter == 1
    }

    #[cfg(feature = "timeout")]
    pub fn timed_out(&self) -> bool {
        self.0.timed_out
    }

    #[cfg(feature = "ids")]
    pub fn id(&self) -> i32 {
        self.0.id
    }

    #[cfg(feature = "ids")]
    pub fn control_point(&self) -> i32 {
        self.0.control_point
    }
}

/// The scheduled unit of work. See spec §3 "Data model".
pub struct Task {
    pub(crate) interval: Tick,
    pub(crate) iterations: Iterations,
    pub(crate) iterations_initial: Iterations,
    pub(crate) run_counter: u32,
    pub(crate) enabled: bool,
    pub(crate) previous: Tick,
    pub(crate) delay: Tick,
    pub(crate) option: ScheduleOption,
    pub(crate) callback: Callback,
    pub(crate) on_enable: Option<OnEnableHook>,
    pub(crate) on_disable: Option<OnDisableHook>,

    #[cfg(feature = "status-request")]
    pub(crate) status_request: Option<StatusRequest>,
    #[cfg(feature = "status-request")]
    pub(crate) status_gate_consumed: bool,
    pub(crate) internal_status: StatusRequest,

    #[cfg(feature = "ids")]
    pub(crate) id: i32,
    #[cfg(feature = "ids")]
    pub(crate) control_point: i32,

    #[cfg(feature = "local-storage")]
    pub(crate) local_storage: Option<*mut ()>,

    #[cfg(feature = "timeout")]
    pub(crate) timeout: Tick,
    #[cfg(feature = "timeout")]
    pub(crate) enable_time: Tick,
    #[cfg(feature = "timeout")]
    pub(crate) timed_out: bool,

    #[cfg(feature = "overrun")]
    pub(crate) overrun: SignedTick,
    #[cfg(feature = "overrun")]
    pub(crate) start_delay: SignedTick,
}

impl Task {
    #[inline]
    pub(crate) fn is_first_iteration(&self) -> bool {
        self.run_counter == 1
    }

    #[inline]
    pub(crate) fn is_last_iteration(&self) -> bool {
        self.iterations.is_last()
    }

    /// The moment this task is next due, in the scheduler's time domain.
    #[inline]
    pub(crate) fn scheduled_at(&self) -> Tick {
        self.previous.wrapping_add(self.delay)
    }

    #[cfg(feature = "status-request")]
    #[inline]
    pub(crate) fn status_gate_open(&self) -> bool {
        match &self.status_request {
            Some(sr) if !self.status_gate_consumed => sr.is_signaled(),
            _ => true,
        }
    }

    #[cfg(not(feature = "status-request"))]
    #[inline]
    pub(crate) fn status_gate_open(&self) -> bool {
        true
    }

    pub(crate) fn run_on_enable(&mut self) -> bool {
        match self.on_enable.take() {
            Some(mut hook) => {
                let result = hook(&TaskInfo(self));
                self.on_enable = Some(hook);
                result
            }
            None => true,
        }
    }

    pub(crate) fn run_on_disable(&mut self) {
        if let Some(mut hook) = self.on_disable.take() {
            hook(&TaskInfo(self));
            self.on_disable = Some(hook);
        }
    }

    /// Common body shared by `enable`/`enable_delayed`/`restart`/
    /// `restart_delayed`/`wait_for`: transition disabled -> enabled,
    /// anchor the schedule, and (per the Open Question resolution in
    /// DESIGN.md) fire `onEnable` exactly once on this transition.
    pub(crate) fn enable_with_anchor(&mut self, now: Tick, previous: Tick, delay: Tick, reset_iterations: bool) {
        let was_enabled = self.enabled;
        if reset_iterations {
            self.iterations = self.iterations_initial;
        }
        self.previous = previous;
        self.delay = delay;
        // Spec §4.1: "enable() ... reset runCounter to 0" is unconditional,
        // and P4 ties isFirstIteration to the first callback after "(re)enable" —
        // so every enable/restart (even of an already-enabled task) starts the
        // run counter over. Only `onEnable` itself is gated to the
        // disabled->enabled transition (Open Question decision 1 below).
        self.run_counter = 0;
        #[cfg(feature = "status-request")]
        {
            self.status_gate_consumed = false;
        }
        #[cfg(feature = "timeout")]
        {
            self.enable_time = now;
            self.timed_out = false;
        }
        let _ = now;
        self.enabled = true;
        if !was_enabled && !self.run_on_enable() {
            self.enabled = false;
            self.run_on_disable();
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("interval", &self.interval)
            .field("iterations", &self.iterations)
            .field("run_counter", &self.run_counter)
            .field("enabled", &self.enabled)
            .field("previous", &self.previous)
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

/// Construct-then-validate builder for a [`Task`], mirroring the
/// teacher's `DescriptorBuilder` shape: set fields with the fluent
/// methods, then call [`Self::build`] to get a `Task` ready for
/// `Scheduler::add_task`.
pub struct TaskBuilder {
    interval: Tick,
    iterations: Iterations,
    option: ScheduleOption,
    callback: Callback,
    on_enable: Option<OnEnableHook>,
    on_disable: Option<OnDisableHook>,
    #[cfg(feature = "status-request")]
    status_request: Option<StatusRequest>,
    #[cfg(feature = "ids")]
    id: i32,
    #[cfg(feature = "ids")]
    control_point: i32,
}

impl TaskBuilder {
    /// Starts building a task with the given interval, iteration count,
    /// and function-pointer callback.
    pub fn new(interval: Tick, iterations: Iterations, callback: fn(&mut TaskContext<'_>)) -> Self {
        Self {
            interval,
            iterations,
            option: ScheduleOption::default(),
            callback: Callback::Fn(callback),
            on_enable: None,
            on_disable: None,
            #[cfg(feature = "status-request")]
            status_request: None,
            #[cfg(feature = "ids")]
            id: 0,
            #[cfg(feature = "ids")]
            control_point: 0,
        }
    }

    /// Starts building a task whose body is a capturing closure.
    pub fn with_closure(
        interval: Tick,
        iterations: Iterations,
        callback: impl FnMut(&mut TaskContext<'_>) + 'static,
    ) -> Self {
        Self {
            interval,
            iterations,
            option: ScheduleOption::default(),
            callback: Callback::Boxed(Box::new(callback)),
            on_enable: None,
            on_disable: None,
            #[cfg(feature = "status-request")]
            status_request: None,
            #[cfg(feature = "ids")]
            id: 0,
            #[cfg(feature = "ids")]
            control_point: 0,
        }
    }

    #[cfg(feature = "schedule-options")]
    pub fn option(mut self, option: ScheduleOption) -> Self {
        self.option = option;
        self
    }

    pub fn on_enable(mut self, hook: impl FnMut(&TaskInfo<'_>) -> bool + 'static) -> Self {
        self.on_enable = Some(Box::new(hook));
        self
    }

    pub fn on_disable(mut self, hook: impl FnMut(&TaskInfo<'_>) + 'static) -> Self {
        self.on_disable = Some(Box::new(hook));
        self
    }

    #[cfg(feature = "status-request")]
    pub fn wait_for(mut self, sr: StatusRequest) -> Self {
        self.status_request = Some(sr);
        self
    }

    #[cfg(feature = "ids")]
    pub fn id(mut self, id: i32) -> Self {
        self.id = id;
        self
    }

    #[cfg(feature = "ids")]
    pub fn control_point(mut self, control_point: i32) -> Self {
        self.control_point = control_point;
        self
    }

    /// Validates the configuration and builds the (still disabled) task.
    ///
    /// Disabled means the task is inert until `Scheduler::enable` (or
    /// one of its variants) is called on the handle `add_task` returns.
    pub fn build(self) -> Result<Task, SchedulerError> {
        if self.iterations.0 == 0 {
            return Err(SchedulerError::ZeroIterations);
        }
        Ok(Task {
            interval: self.interval,
            iterations: self.iterations,
            iterations_initial: self.iterations,
            run_counter: 0,
            enabled: false,
            previous: IMMEDIATE,
            delay: IMMEDIATE,
            option: self.option,
            callback: self.callback,
            on_enable: self.on_enable,
            on_disable: self.on_disable,
            #[cfg(feature = "status-request")]
            status_request: self.status_request,
            #[cfg(feature = "status-request")]
            status_gate_consumed: false,
            internal_status: StatusRequest::new(),
            #[cfg(feature = "ids")]
            id: self.id,
            #[cfg(feature = "ids")]
            control_point: self.control_point,
            #[cfg(feature = "local-storage")]
            local_storage: None,
            #[cfg(feature = "timeout")]
            timeout: NO_TIMEOUT,
            #[cfg(feature = "timeout")]
            enable_time: IMMEDIATE,
            #[cfg(feature = "timeout")]
            timed_out: false,
            #[cfg(feature = "overrun")]
            overrun: 0,
            #[cfg(feature = "overrun")]
            start_delay: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_iterations_rejected() {
        let err = TaskBuilder::new(10, Iterations(0), |_| {}).build().unwrap_err();
        assert_eq!(err, SchedulerError::ZeroIterations);
    }

    #[test]
    fn forever_never_decrements() {
        let f = Iterations::FOREVER;
        assert!(f.is_forever());
        assert_eq!(f.decrement(), f);
        assert!(!f.is_last());
    }

    #[test]
    fn once_is_last_immediately() {
        assert!(Iterations::ONCE.is_last());
    }

    #[test]
    fn decrement_counts_down() {
        let mut it = Iterations(3);
        it = it.decrement();
        assert_eq!(it.0, 2);
        it = it.decrement();
        assert_eq!(it.0, 1);
        assert!(it.is_last());
        it = it.decrement();
        assert_eq!(it.0, 0);
    }
}
