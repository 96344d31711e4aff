//! [`Scheduler`]: owns a chain of tasks, runs dispatch passes, and
//! (optionally) delegates to a higher-priority layer.
//!
//! Tasks live in an arena owned by the `Scheduler` (Design Notes: chain
//! membership is represented "via indices into an arena owned by the
//! Scheduler"); callers address them through the small, `Copy`
//! [`TaskHandle`] that [`Scheduler::add_task`] returns rather than
//! holding the `Task` itself.

use crate::error::SchedulerError;
#[cfg(feature = "status-request")]
use crate::status::StatusRequest;
use crate::task::{Callback, Iterations, ScheduleOption, Task, TaskHandle, TaskInfo};
use crate::time::{is_due, wrapping_diff, Tick, IMMEDIATE};
#[cfg(feature = "timeout")]
use crate::time::NO_TIMEOUT;
#[cfg(feature = "overrun")]
use crate::time::SignedTick;

struct Slot {
    task: Task,
    prev: Option<u32>,
    next: Option<u32>,
}

/// Owner of a doubly-linked chain of [`Task`]s; drives dispatch via
/// [`Scheduler::execute`]. See spec §4.4.
pub struct Scheduler {
    slots: Vec<Option<Slot>>,
    generations: Vec<u32>,
    free_list: Vec<u32>,
    head: Option<u32>,
    tail: Option<u32>,
    len: usize,
    /// Valid only while `execute()` is on the stack.
    current: Option<u32>,
    #[cfg(feature = "priority-layers")]
    high_priority: Option<Box<Scheduler>>,
    #[cfg(feature = "idle-sleep")]
    sleep_fn: Option<Box<dyn FnMut(Tick)>>,
}

impl Scheduler {
    /// Creates an empty scheduler with no tasks and no higher-priority
    /// layer attached.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            generations: Vec::new(),
            free_list: Vec::new(),
            head: None,
            tail: None,
            len: 0,
            current: None,
            #[cfg(feature = "priority-layers")]
            high_priority: None,
            #[cfg(feature = "idle-sleep")]
            sleep_fn: None,
        }
    }

    /// Resets chain metadata, dropping every task currently owned by
    /// this scheduler (its higher-priority layer, if any, is left
    /// attached).
    pub fn init(&mut self) {
        self.slots.clear();
        self.generations.clear();
        self.free_list.clear();
        self.head = None;
        self.tail = None;
        self.len = 0;
        self.current = None;
    }

    /// Number of tasks currently in the chain.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends `task` (disabled, as returned by [`crate::TaskBuilder::build`])
    /// to the end of the chain and returns a handle to address it by.
    pub fn add_task(&mut self, task: Task) -> TaskHandle {
        let idx = match self.free_list.pop() {
            Some(idx) => idx,
            None => {
                let idx = self.slots.len() as u32;
                self.slots.push(None);
                self.generations.push(0);
                idx
            }
        };
        let slot = Slot {
            task,
            prev: self.tail,
            next: None,
        };
        self.slots[idx as usize] = Some(slot);
        if let Some(tail) = self.tail {
            self.slots[tail as usize].as_mut().unwrap().next = Some(idx);
        } else {
            self.head = Some(idx);
        }
        self.tail = Some(idx);
        self.len += 1;
        let handle = TaskHandle {
            index: idx,
            generation: self.generations[idx as usize],
        };
        tracing::debug!(index = idx, "scheduler.add_task");
        handle
    }

    /// Unlinks and returns the task at `handle`.
    ///
    /// A no-op (returns `None`) if `handle` does not name a task
    /// currently in this chain — matching the spec's "deleting an
    /// unchained task: silently no-op".
    pub fn remove_task(&mut self, handle: TaskHandle) -> Option<Task> {
        if !self.is_live(handle) {
            return None;
        }
        let idx = handle.index;
        let slot = self.slots[idx as usize].take()?;
        let (prev, next) = (slot.prev, slot.next);
        match prev {
            Some(p) => self.slots[p as usize].as_mut().unwrap().next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n as usize].as_mut().unwrap().prev = prev,
            None => self.tail = prev,
        }
        self.generations[idx as usize] = self.generations[idx as usize].wrapping_add(1);
        self.free_list.push(idx);
        self.len -= 1;
        tracing::debug!(index = idx, "scheduler.remove_task");
        Some(slot.task)
    }

    #[inline]
    fn is_live(&self, handle: TaskHandle) -> bool {
        (handle.index as usize) < self.generations.len()
            && self.generations[handle.index as usize] == handle.generation
            && self.slots[handle.index as usize].is_some()
    }

    pub(crate) fn task(&self, handle: TaskHandle) -> Option<&Task> {
        if self.is_live(handle) {
            self.slots[handle.index as usize].as_ref().map(|s| &s.task)
        } else {
            None
        }
    }

    pub(crate) fn task_mut(&mut self, handle: TaskHandle) -> Option<&mut Task> {
        if self.is_live(handle) {
            self.slots[handle.index as usize].as_mut().map(|s| &mut s.task)
        } else {
            None
        }
    }

    /// Snapshot of the chain's current order, oldest-inserted first
    /// (or reflecting whatever order tasks were added in).
    ///
    /// `execute()` takes this snapshot once per pass, *before* running
    /// any callback. A task removed mid-pass by an earlier callback is
    /// simply skipped when its turn in the snapshot comes up; a task
    /// added mid-pass does not run until the next pass. This is a
    /// stronger guarantee than spec §4.4's "deleting the cursor's task
    /// mid-pass is safe" — every deletion mid-pass is safe here, not
    /// only self-deletion.
    fn snapshot_order(&self) -> Vec<u32> {
        let mut v = Vec::with_capacity(self.len);
        let mut cur = self.head;
        while let Some(idx) = cur {
            v.push(idx);
            cur = self.slots[idx as usize].as_ref().and_then(|s| s.next);
        }
        v
    }

    /// Enables a disabled task: resets `run_counter`, anchors the first
    /// dispatch to fire on the very next due check, and (only on the
    /// disabled→enabled transition) runs `onEnable`. A false return from
    /// `onEnable` leaves the task disabled.
    pub fn enable(&mut self, handle: TaskHandle, now: Tick) -> Result<(), SchedulerError> {
        let interval = self
            .task(handle)
            .ok_or(SchedulerError::UnknownTask(handle))?
            .interval;
        let task = self.task_mut(handle).unwrap();
        // delay = interval (not IMMEDIATE): the SCHEDULE anchor-advance rule
        // (`previous += delay`) needs a full interval's worth in `delay` on
        // this very first dispatch, or the second dispatch fires at `now`
        // again instead of `now + interval`.
        task.enable_with_anchor(now, now.wrapping_sub(interval), interval, false);
        tracing::debug!(index = handle.index, "scheduler.enable");
        Ok(())
    }

    /// As [`Self::enable`], but the first dispatch is deferred by `d`
    /// (defaulting to the task's configured interval).
    pub fn enable_delayed(
        &mut self,
        handle: TaskHandle,
        now: Tick,
        d: Option<Tick>,
    ) -> Result<(), SchedulerError> {
        let interval = self
            .task(handle)
            .ok_or(SchedulerError::UnknownTask(handle))?
            .interval;
        let d = d.unwrap_or(interval);
        let task = self.task_mut(handle).unwrap();
        task.enable_with_anchor(now, now, d, false);
        Ok(())
    }

    /// Re-anchors the next dispatch to `now + d` (default: the task's
    /// interval) without touching `enabled`, `run_counter`, or
    /// `iterations`.
    pub fn delay(&mut self, handle: TaskHandle, now: Tick, d: Option<Tick>) -> Result<(), SchedulerError> {
        let interval = self
            .task(handle)
            .ok_or(SchedulerError::UnknownTask(handle))?
            .interval;
        let d = d.unwrap_or(interval);
        let task = self.task_mut(handle).unwrap();
        task.previous = now;
        task.delay = d;
        Ok(())
    }

    /// Like [`Self::enable`], but explicitly resets `iterations` back to
    /// the count the task was originally built with.
    pub fn restart(&mut self, handle: TaskHandle, now: Tick) -> Result<(), SchedulerError> {
        let interval = self
            .task(handle)
            .ok_or(SchedulerError::UnknownTask(handle))?
            .interval;
        let task = self.task_mut(handle).unwrap();
        task.enable_with_anchor(now, now.wrapping_sub(interval), interval, true);
        Ok(())
    }

    /// Like [`Self::enable_delayed`], but explicitly resets `iterations`.
    pub fn restart_delayed(
        &mut self,
        handle: TaskHandle,
        now: Tick,
        d: Option<Tick>,
    ) -> Result<(), SchedulerError> {
        let interval = self
            .task(handle)
            .ok_or(SchedulerError::UnknownTask(handle))?
            .interval;
        let d = d.unwrap_or(interval);
        let task = self.task_mut(handle).unwrap();
        task.enable_with_anchor(now, now, d, true);
        Ok(())
    }

    /// Disables a task, running `onDisable` exactly once. A no-op if
    /// the task is already disabled (the universal, idempotent
    /// cancellation primitive from spec §5).
    pub fn disable(&mut self, handle: TaskHandle) -> Result<(), SchedulerError> {
        let task = self.task_mut(handle).ok_or(SchedulerError::UnknownTask(handle))?;
        if task.enabled {
            task.enabled = false;
            task.run_on_disable();
            tracing::debug!(index = handle.index, "scheduler.disable");
        }
        Ok(())
    }

    pub fn is_enabled(&self, handle: TaskHandle) -> Option<bool> {
        self.task(handle).map(|t| t.enabled)
    }

    pub fn run_counter(&self, handle: TaskHandle) -> Option<u32> {
        self.task(handle).map(|t| t.run_counter)
    }

    pub fn is_first_iteration(&self, handle: TaskHandle) -> Option<bool> {
        self.task(handle).map(|t| t.is_first_iteration())
    }

    pub fn is_last_iteration(&self, handle: TaskHandle) -> Option<bool> {
        self.task(handle).map(|t| t.is_last_iteration())
    }

    /// Mutates interval/iteration-count/callback in place. Setting the
    /// interval on an enabled task does not re-anchor it (spec §4.1).
    pub fn set_interval(&mut self, handle: TaskHandle, interval: Tick) -> Result<(), SchedulerError> {
        let task = self.task_mut(handle).ok_or(SchedulerError::UnknownTask(handle))?;
        task.interval = interval;
        Ok(())
    }

    pub fn set_iterations(&mut self, handle: TaskHandle, iterations: Iterations) -> Result<(), SchedulerError> {
        let task = self.task_mut(handle).ok_or(SchedulerError::UnknownTask(handle))?;
        task.iterations = iterations;
        task.iterations_initial = iterations;
        Ok(())
    }

    pub fn set_callback(&mut self, handle: TaskHandle, callback: Callback) -> Result<(), SchedulerError> {
        let task = self.task_mut(handle).ok_or(SchedulerError::UnknownTask(handle))?;
        task.callback = callback;
        Ok(())
    }

    /// Reconfigures the `onEnable` veto hook. Per spec §4.1,
    /// `Task::set(...)` documents `onEnable`/`onDisable` as part of its
    /// optional reconfiguration surface; this (and
    /// [`Self::set_on_disable`]) is that surface's `Scheduler`-side
    /// entry point, alongside `set_interval`/`set_iterations`/
    /// `set_callback`. Takes effect from the next call to `enable`
    /// onward — it does not retroactively fire on a task that is
    /// already enabled.
    pub fn set_on_enable(
        &mut self,
        handle: TaskHandle,
        hook: impl FnMut(&TaskInfo<'_>) -> bool + 'static,
    ) -> Result<(), SchedulerError> {
        let task = self.task_mut(handle).ok_or(SchedulerError::UnknownTask(handle))?;
        task.on_enable = Some(Box::new(hook));
        Ok(())
    }

    /// Reconfigures the `onDisable` hook. See [`Self::set_on_enable`].
    pub fn set_on_disable(
        &mut self,
        handle: TaskHandle,
        hook: impl FnMut(&TaskInfo<'_>) + 'static,
    ) -> Result<(), SchedulerError> {
        let task = self.task_mut(handle).ok_or(SchedulerError::UnknownTask(handle))?;
        task.on_disable = Some(Box::new(hook));
        Ok(())
    }

    /// Reconfigures interval, iterations, and callback together. Per
    /// spec §4.1, intended for use while the task is disabled; calling
    /// it on an enabled task updates the fields without re-anchoring.
    pub fn set(
        &mut self,
        handle: TaskHandle,
        interval: Tick,
        iterations: Iterations,
        callback: Callback,
    ) -> Result<(), SchedulerError> {
        let task = self.task_mut(handle).ok_or(SchedulerError::UnknownTask(handle))?;
        task.interval = interval;
        task.iterations = iterations;
        task.iterations_initial = iterations;
        task.callback = callback;
        Ok(())
    }

    /// Clones the internal [`StatusRequest`] this task signals each time
    /// it completes a dispatch, for peer tasks to `wait_for`.
    #[cfg(feature = "status-request")]
    pub fn internal_status(&self, handle: TaskHandle) -> Option<StatusRequest> {
        self.task(handle).map(|t| t.internal_status.clone())
    }

    #[cfg(not(feature = "status-request"))]
    #[allow(dead_code)]
    pub(crate) fn internal_status_unused() {}

    /// Enables the task and additionally gates its first dispatch on
    /// `sr` becoming signaled; once that gated dispatch has run, later
    /// dispatches follow `interval`/`iterations` normally (spec §4.1).
    /// Defaults match the spec: `interval` 0 (immediate once signaled),
    /// `iterations` 1 (single-shot).
    #[cfg(feature = "status-request")]
    pub fn wait_for(
        &mut self,
        handle: TaskHandle,
        sr: StatusRequest,
        now: Tick,
        interval: Option<Tick>,
        iterations: Option<Iterations>,
    ) -> Result<(), SchedulerError> {
        if !self.is_live(handle) {
            return Err(SchedulerError::UnknownTask(handle));
        }
        let interval = interval.unwrap_or(IMMEDIATE);
        let iterations = iterations.unwrap_or(Iterations::ONCE);
        let task = self.task_mut(handle).unwrap();
        task.interval = interval;
        task.iterations = iterations;
        task.iterations_initial = iterations;
        task.status_request = Some(sr);
        task.enable_with_anchor(now, now.wrapping_sub(interval), interval, false);
        Ok(())
    }

    /// As [`Self::wait_for`], but the gated dispatch is additionally
    /// deferred by `interval` once `sr` signals.
    #[cfg(feature = "status-request")]
    pub fn wait_for_delayed(
        &mut self,
        handle: TaskHandle,
        sr: StatusRequest,
        now: Tick,
        interval: Option<Tick>,
        iterations: Option<Iterations>,
    ) -> Result<(), SchedulerError> {
        if !self.is_live(handle) {
            return Err(SchedulerError::UnknownTask(handle));
        }
        let interval = interval.unwrap_or(IMMEDIATE);
        let iterations = iterations.unwrap_or(Iterations::ONCE);
        let task = self.task_mut(handle).unwrap();
        task.interval = interval;
        task.iterations = iterations;
        task.iterations_initial = iterations;
        task.status_request = Some(sr);
        task.enable_with_anchor(now, now, interval, false);
        Ok(())
    }

    #[cfg(feature = "timeout")]
    pub fn set_timeout(&mut self, handle: TaskHandle, d: Tick) -> Result<(), SchedulerError> {
        let task = self.task_mut(handle).ok_or(SchedulerError::UnknownTask(handle))?;
        task.timeout = d;
        Ok(())
    }

    #[cfg(feature = "timeout")]
    pub fn reset_timeout(&mut self, handle: TaskHandle, now: Tick) -> Result<(), SchedulerError> {
        let task = self.task_mut(handle).ok_or(SchedulerError::UnknownTask(handle))?;
        task.enable_time = now;
        task.timed_out = false;
        Ok(())
    }

    /// Ticks remaining before the task's lifetime timeout expires, or
    /// `None` if no timeout is armed (`NO_TIMEOUT`).
    #[cfg(feature = "timeout")]
    pub fn until_timeout(&self, handle: TaskHandle, now: Tick) -> Option<Tick> {
        let task = self.task(handle)?;
        if task.timeout == NO_TIMEOUT {
            return None;
        }
        let elapsed = wrapping_diff(now, task.enable_time).max(0) as Tick;
        Some(task.timeout.saturating_sub(elapsed))
    }

    #[cfg(feature = "timeout")]
    pub fn timed_out(&self, handle: TaskHandle) -> Option<bool> {
        self.task(handle).map(|t| t.timed_out)
    }

    #[cfg(feature = "local-storage")]
    pub fn set_local_storage(&mut self, handle: TaskHandle, ptr: *mut ()) -> Result<(), SchedulerError> {
        let task = self.task_mut(handle).ok_or(SchedulerError::UnknownTask(handle))?;
        task.local_storage = Some(ptr);
        Ok(())
    }

    #[cfg(feature = "local-storage")]
    pub fn local_storage(&self, handle: TaskHandle) -> Option<*mut ()> {
        self.task(handle).and_then(|t| t.local_storage)
    }

    #[cfg(feature = "ids")]
    pub fn id(&self, handle: TaskHandle) -> Option<i32> {
        self.task(handle).map(|t| t.id)
    }

    #[cfg(feature = "ids")]
    pub fn set_id(&mut self, handle: TaskHandle, id: i32) -> Result<(), SchedulerError> {
        let task = self.task_mut(handle).ok_or(SchedulerError::UnknownTask(handle))?;
        task.id = id;
        Ok(())
    }

    #[cfg(feature = "ids")]
    pub fn control_point(&self, handle: TaskHandle) -> Option<i32> {
        self.task(handle).map(|t| t.control_point)
    }

    #[cfg(feature = "ids")]
    pub fn set_control_point(&mut self, handle: TaskHandle, control_point: i32) -> Result<(), SchedulerError> {
        let task = self.task_mut(handle).ok_or(SchedulerError::UnknownTask(handle))?;
        task.control_point = control_point;
        Ok(())
    }

    #[cfg(feature = "overrun")]
    pub fn overrun(&self, handle: TaskHandle) -> Option<SignedTick> {
        self.task(handle).map(|t| t.overrun)
    }

    #[cfg(feature = "overrun")]
    pub fn start_delay(&self, handle: TaskHandle) -> Option<SignedTick> {
        self.task(handle).map(|t| t.start_delay)
    }

    /// The task whose callback is currently executing. `None` outside
    /// `execute()` (spec §7: "calling currentTask() outside a pass is
    /// undefined; implementations should return a null reference").
    pub fn current_task(&self) -> Option<TaskHandle> {
        self.current
            .map(|idx| TaskHandle { index: idx, generation: self.generations[idx as usize] })
    }

    /// Re-anchors every currently-enabled task's schedule to fire
    /// relative to `now`, without changing `enabled` state.
    pub fn start_now(&mut self, now: Tick) {
        for idx in self.snapshot_order() {
            if let Some(slot) = self.slots[idx as usize].as_mut() {
                if slot.task.enabled {
                    slot.task.previous = now;
                }
            }
        }
        #[cfg(feature = "priority-layers")]
        if let Some(hp) = self.high_priority.as_mut() {
            hp.start_now(now);
        }
    }

    /// Enables every task in the chain (and, if `recursive`, every task
    /// in the attached higher-priority layer too).
    pub fn enable_all(&mut self, now: Tick, recursive: bool) {
        for idx in self.snapshot_order() {
            let handle = TaskHandle { index: idx, generation: self.generations[idx as usize] };
            let _ = self.enable(handle, now);
        }
        #[cfg(feature = "priority-layers")]
        if recursive {
            if let Some(hp) = self.high_priority.as_mut() {
                hp.enable_all(now, true);
            }
        }
        let _ = recursive;
    }

    /// Disables every task in the chain (and, if `recursive`, the
    /// higher-priority layer too).
    pub fn disable_all(&mut self, recursive: bool) {
        for idx in self.snapshot_order() {
            let handle = TaskHandle { index: idx, generation: self.generations[idx as usize] };
            let _ = self.disable(handle);
        }
        #[cfg(feature = "priority-layers")]
        if recursive {
            if let Some(hp) = self.high_priority.as_mut() {
                hp.disable_all(true);
            }
        }
        let _ = recursive;
    }

    /// Installs `scheduler` as this scheduler's higher-priority layer:
    /// one full pass of `scheduler` interleaves with each task visit of
    /// `self` (spec §4.5).
    #[cfg(feature = "priority-layers")]
    pub fn set_high_priority_scheduler(&mut self, scheduler: Scheduler) {
        self.high_priority = Some(Box::new(scheduler));
    }

    /// Installs the idle hook invoked whenever a pass dispatches
    /// nothing.
    #[cfg(feature = "idle-sleep")]
    pub fn set_sleep_method(&mut self, f: impl FnMut(Tick) + 'static) {
        self.sleep_fn = Some(Box::new(f));
    }

    /// Tickless query: ticks until the next due, enabled, non-gated
    /// task; `0` if one is already overdue. See spec §4.4/P9.
    #[cfg(feature = "tickless")]
    pub fn get_next_run(&self, now: Tick) -> Tick {
        let mut min_wait: Option<Tick> = None;
        for idx in self.snapshot_order() {
            if let Some(slot) = &self.slots[idx as usize] {
                let task = &slot.task;
                if !task.enabled || !task.status_gate_open() {
                    continue;
                }
                let diff = wrapping_diff(task.scheduled_at(), now);
                if diff <= 0 {
                    return 0;
                }
                let wait = diff as Tick;
                min_wait = Some(min_wait.map_or(wait, |m| m.min(wait)));
            }
        }
        #[cfg(feature = "priority-layers")]
        if let Some(hp) = &self.high_priority {
            let hp_wait = hp.get_next_run(now);
            if hp_wait == 0 {
                return 0;
            }
            min_wait = Some(min_wait.map_or(hp_wait, |m| m.min(hp_wait)));
        }
        min_wait.unwrap_or(Tick::MAX)
    }

    #[cfg(feature = "chain-introspection")]
    pub fn first_task(&self) -> Option<TaskHandle> {
        self.head.map(|idx| TaskHandle { index: idx, generation: self.generations[idx as usize] })
    }

    #[cfg(feature = "chain-introspection")]
    pub fn last_task(&self) -> Option<TaskHandle> {
        self.tail.map(|idx| TaskHandle { index: idx, generation: self.generations[idx as usize] })
    }

    #[cfg(feature = "chain-introspection")]
    pub fn next_task(&self, handle: TaskHandle) -> Option<TaskHandle> {
        if !self.is_live(handle) {
            return None;
        }
        self.slots[handle.index as usize]
            .as_ref()
            .and_then(|s| s.next)
            .map(|idx| TaskHandle { index: idx, generation: self.generations[idx as usize] })
    }

    /// Runs one dispatch pass: every higher-priority layer gets a full
    /// pass ahead of each base-chain task visit (spec §4.5), readiness
    /// is evaluated for each task in chain order, and due tasks are
    /// dispatched. Returns `true` if the pass was idle (nothing ran),
    /// in which case the sleep hook (if any) is invoked with the
    /// tickless delay hint.
    pub fn execute(&mut self, now: Tick) -> bool {
        tracing::trace!(now, "scheduler.execute");
        let mut dispatched_any = false;

        for idx in self.snapshot_order() {
            #[cfg(feature = "priority-layers")]
            {
                if let Some(hp) = self.high_priority.as_mut() {
                    let hp_idle = hp.execute(now);
                    dispatched_any |= !hp_idle;
                }
            }

            let ready = match self.slots[idx as usize].as_ref() {
                Some(slot) => {
                    let task = &slot.task;
                    task.enabled && task.status_gate_open() && is_due(now, task.scheduled_at())
                }
                None => false,
            };
            if ready {
                dispatched_any = true;
                self.dispatch(idx, now);
            }
        }

        if !dispatched_any {
            #[cfg(feature = "idle-sleep")]
            {
                if let Some(mut sleep) = self.sleep_fn.take() {
                    #[cfg(feature = "tickless")]
                    let hint = self.get_next_run(now);
                    #[cfg(not(feature = "tickless"))]
                    let hint = 0;
                    sleep(hint);
                    self.sleep_fn = Some(sleep);
                }
            }
        }

        !dispatched_any
    }

    /// Dispatches the task at arena index `idx`: bumps bookkeeping,
    /// invokes the callback with a [`TaskContext`], then applies the
    /// scheduling-option anchor update and checks for iteration/timeout
    /// termination.
    fn dispatch(&mut self, idx: u32, now: Tick) {
        let handle = TaskHandle { index: idx, generation: self.generations[idx as usize] };

        let prev_scheduled = {
            let task = &mut self.slots[idx as usize].as_mut().unwrap().task;
            task.run_counter += 1;
            task.scheduled_at()
        };

        #[cfg(feature = "overrun")]
        {
            let task = &mut self.slots[idx as usize].as_mut().unwrap().task;
            task.overrun = wrapping_diff(now, prev_scheduled);
            task.start_delay = task.overrun.max(0);
        }

        tracing::debug!(
            index = idx,
            run_counter = self.slots[idx as usize].as_ref().unwrap().task.run_counter,
            "scheduler.dispatch"
        );

        self.current = Some(idx);

        // Take the callback out of the slot so the closure can borrow
        // `self` mutably through `TaskContext` without aliasing the
        // slot it lives in.
        let mut callback = {
            let slot = self.slots[idx as usize].as_mut().unwrap();
            std::mem::replace(&mut slot.task.callback, Callback::None)
        };

        {
            let mut ctx = TaskContext { scheduler: self, handle, now };
            callback.invoke(&mut ctx);
        }

        if let Some(slot) = self.slots.get_mut(idx as usize).and_then(|s| s.as_mut()) {
            if matches!(slot.task.callback, Callback::None) {
                slot.task.callback = callback;
            }
        }

        self.current = None;

        if let Some(slot) = self.slots.get_mut(idx as usize).and_then(|s| s.as_mut()) {
            let task = &mut slot.task;

            match task.option {
                ScheduleOption::Schedule => {
                    task.previous = task.previous.wrapping_add(task.delay);
                    task.delay = task.interval;
                }
                #[cfg(feature = "schedule-options")]
                ScheduleOption::ScheduleNc => {
                    let overrun = wrapping_diff(now, prev_scheduled).max(0) as Tick;
                    task.previous = now.wrapping_sub(overrun);
                    task.delay = task.interval;
                }
                #[cfg(feature = "schedule-options")]
                ScheduleOption::Interval => {
                    task.previous = now;
                    task.delay = task.interval;
                }
            }

            #[cfg(feature = "status-request")]
            {
                task.status_gate_consumed = true;
            }

            task.internal_status.signal_complete(0);

            task.iterations = decrement(task.iterations);
            if !task.iterations.is_forever() && task.iterations.0 == 0 {
                task.enabled = false;
                task.run_on_disable();
            }

            #[cfg(feature = "timeout")]
            {
                if task.timeout != NO_TIMEOUT
                    && wrapping_diff(now, task.enable_time) >= task.timeout as crate::time::SignedTick
                {
                    task.timed_out = true;
                    task.enabled = false;
                    task.run_on_disable();
                }
            }
        }
    }
}

/// Mirrors `Iterations::decrement`, which is private to `task.rs`;
/// duplicated here rather than widened to `pub(crate)` across a type
/// boundary that otherwise stays an opaque newtype to callers.
fn decrement(iterations: Iterations) -> Iterations {
    if iterations.is_forever() || iterations.0 == 0 {
        iterations
    } else {
        Iterations(iterations.0 - 1)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-dispatch handle passed to a [`Task`]'s callback: read access to
/// this invocation's bookkeeping, plus the ability to reach into
/// sibling tasks (enable/disable/retune them) through the owning
/// [`Scheduler`].
pub struct TaskContext<'a> {
    scheduler: &'a mut Scheduler,
    handle: TaskHandle,
    now: Tick,
}

impl<'a> TaskContext<'a> {
    pub fn handle(&self) -> TaskHandle {
        self.handle
    }

    /// The `now` value passed to the `execute()` call driving this
    /// dispatch — convenient for enabling/retuning sibling tasks
    /// without the callback needing to thread its own clock through.
    pub fn now(&self) -> Tick {
        self.now
    }

    pub fn run_counter(&self) -> u32 {
        self.scheduler.task(self.handle).map(|t| t.run_counter).unwrap_or(0)
    }

    pub fn is_first_iteration(&self) -> bool {
        self.scheduler
            .task(self.handle)
            .map(|t| t.is_first_iteration())
            .unwrap_or(false)
    }

    pub fn is_last_iteration(&self) -> bool {
        self.scheduler
            .task(self.handle)
            .map(|t| t.is_last_iteration())
            .unwrap_or(false)
    }

    /// Status code of the `StatusRequest` this task is gated on, if any.
    #[cfg(feature = "status-request")]
    pub fn status(&self) -> Option<i32> {
        self.scheduler
            .task(self.handle)
            .and_then(|t| t.status_request.as_ref())
            .map(|sr| sr.status())
    }

    /// This task's own `StatusRequest`, signaled each time it completes
    /// a dispatch; clone it out to let a peer task `wait_for` it.
    #[cfg(feature = "status-request")]
    pub fn internal_status(&self) -> StatusRequest {
        self.scheduler
            .task(self.handle)
            .map(|t| t.internal_status.clone())
            .expect("current task is live for the duration of its own dispatch")
    }

    #[cfg(feature = "ids")]
    pub fn id(&self) -> i32 {
        self.scheduler.task(self.handle).map(|t| t.id).unwrap_or(0)
    }

    #[cfg(feature = "ids")]
    pub fn control_point(&self) -> i32 {
        self.scheduler.task(self.handle).map(|t| t.control_point).unwrap_or(0)
    }

    #[cfg(feature = "overrun")]
    pub fn overrun(&self) -> SignedTick {
        self.scheduler.task(self.handle).map(|t| t.overrun).unwrap_or(0)
    }

    #[cfg(feature = "overrun")]
    pub fn start_delay(&self) -> SignedTick {
        self.scheduler.task(self.handle).map(|t| t.start_delay).unwrap_or(0)
    }

    #[cfg(feature = "local-storage")]
    pub fn local_storage(&self) -> Option<*mut ()> {
        self.scheduler.task(self.handle).and_then(|t| t.local_storage)
    }

    #[cfg(feature = "local-storage")]
    pub fn set_local_storage(&mut self, ptr: *mut ()) {
        if let Some(task) = self.scheduler.task_mut(self.handle) {
            task.local_storage = Some(ptr);
        }
    }

    /// Escape hatch to the full `Scheduler` API, e.g. to inspect
    /// another task or attach a new one mid-callback.
    pub fn scheduler(&mut self) -> &mut Scheduler {
        self.scheduler
    }

    pub fn enable_task(&mut self, other: TaskHandle, now: Tick) {
        let _ = self.scheduler.enable(other, now);
    }

    pub fn disable_task(&mut self, other: TaskHandle) {
        let _ = self.scheduler.disable(other);
    }

    pub fn set_interval_of(&mut self, other: TaskHandle, interval: Tick) {
        let _ = self.scheduler.set_interval(other, interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskBuilder;

    #[test]
    fn add_then_enable_dispatches_immediately() {
        let mut sched = Scheduler::new();
        let handle = sched
            .add_task(TaskBuilder::new(100, Iterations::FOREVER, |_| {}).build().unwrap());
        sched.enable(handle, 1_000).unwrap();
        assert!(sched.is_enabled(handle).unwrap());
        let idle = sched.execute(1_000);
        assert!(!idle);
        assert_eq!(sched.run_counter(handle), Some(1));
    }

    #[test]
    fn not_due_before_interval_elapses() {
        let mut sched = Scheduler::new();
        let handle = sched
            .add_task(TaskBuilder::new(100, Iterations::FOREVER, |_| {}).build().unwrap());
        sched.enable(handle, 0).unwrap();
        sched.execute(0);
        let idle = sched.execute(50);
        assert!(idle);
        assert_eq!(sched.run_counter(handle), Some(1));
    }

    #[test]
    fn finite_iterations_auto_disable() {
        let mut sched = Scheduler::new();
        let handle = sched.add_task(TaskBuilder::new(10, Iterations(2), |_| {}).build().unwrap());
        sched.enable(handle, 0).unwrap();
        sched.execute(0);
        assert!(sched.is_enabled(handle).unwrap());
        sched.execute(10);
        assert!(!sched.is_enabled(handle).unwrap());
    }

    #[test]
    fn disable_is_idempotent() {
        let mut sched = Scheduler::new();
        let calls = std::rc::Rc::new(std::cell::Cell::new(0u32));
        let c = calls.clone();
        let handle = sched.add_task(
            TaskBuilder::new(10, Iterations::FOREVER, |_| {})
                .on_disable(move |_| c.set(c.get() + 1))
                .build()
                .unwrap(),
        );
        sched.enable(handle, 0).unwrap();
        sched.disable(handle).unwrap();
        sched.disable(handle).unwrap();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn remove_mid_pass_does_not_panic() {
        let mut sched = Scheduler::new();
        let a = sched.add_task(TaskBuilder::new(0, Iterations::FOREVER, |_| {}).build().unwrap());
        let b_callback = move |ctx: &mut TaskContext<'_>| {
            let handle = ctx.handle();
            ctx.scheduler().remove_task(handle);
        };
        let b = sched.add_task(
            TaskBuilder::with_closure(0, Iterations::FOREVER, b_callback)
                .build()
                .unwrap(),
        );
        sched.enable(a, 0).unwrap();
        sched.enable(b, 0).unwrap();
        sched.execute(0);
        assert!(sched.task(a).is_some());
        assert!(sched.task(b).is_none());
    }

    #[test]
    fn on_enable_veto_keeps_task_disabled() {
        let mut sched = Scheduler::new();
        let handle = sched.add_task(
            TaskBuilder::new(10, Iterations::FOREVER, |_| {})
                .on_enable(|_| false)
                .build()
                .unwrap(),
        );
        sched.enable(handle, 0).unwrap();
        assert_eq!(sched.is_enabled(handle), Some(false));
    }

    #[test]
    fn unknown_handle_is_reported() {
        let mut sched = Scheduler::new();
        let handle = sched.add_task(TaskBuilder::new(10, Iterations::ONCE, |_| {}).build().unwrap());
        sched.remove_task(handle);
        assert_eq!(sched.enable(handle, 0), Err(SchedulerError::UnknownTask(handle)));
    }

    #[test]
    fn current_task_only_valid_during_execute() {
        let mut sched = Scheduler::new();
        assert!(sched.current_task().is_none());
        let handle = sched.add_task(
            TaskBuilder::new(0, Iterations::ONCE, |ctx| {
                assert_eq!(ctx.handle(), ctx.scheduler().current_task().unwrap());
            })
            .build()
            .unwrap(),
        );
        sched.enable(handle, 0).unwrap();
        sched.execute(0);
        assert!(sched.current_task().is_none());
    }

    #[test]
    fn restart_while_enabled_resets_run_counter() {
        let mut sched = Scheduler::new();
        let handle = sched.add_task(TaskBuilder::new(10, Iterations(20), |_| {}).build().unwrap());
        sched.enable(handle, 0).unwrap();
        for t in (0..70).step_by(10) {
            sched.execute(t);
        }
        assert_eq!(sched.run_counter(handle), Some(7));
        assert!(sched.is_enabled(handle).unwrap());

        // restart() mid-run must behave like a fresh (re)enable: run_counter
        // starts over, so the next dispatch reports is_first_iteration again.
        sched.restart(handle, 70).unwrap();
        assert_eq!(sched.run_counter(handle), Some(0));
        sched.execute(70);
        assert_eq!(sched.run_counter(handle), Some(1));
        assert!(sched.is_first_iteration(handle).unwrap());
    }

    #[test]
    fn restart_delayed_while_enabled_also_resets_run_counter() {
        let mut sched = Scheduler::new();
        let handle = sched.add_task(TaskBuilder::new(10, Iterations::FOREVER, |_| {}).build().unwrap());
        sched.enable(handle, 0).unwrap();
        for t in (0..50).step_by(10) {
            sched.execute(t);
        }
        assert_eq!(sched.run_counter(handle), Some(5));

        sched.restart_delayed(handle, 50, Some(20)).unwrap();
        assert_eq!(sched.run_counter(handle), Some(0));
        sched.execute(70);
        assert_eq!(sched.run_counter(handle), Some(1));
        assert!(sched.is_first_iteration(handle).unwrap());
    }

    #[test]
    fn set_on_enable_and_set_on_disable_reach_a_built_task() {
        use std::cell::Cell;
        use std::rc::Rc;

        let enabled_calls = Rc::new(Cell::new(0u32));
        let disabled_calls = Rc::new(Cell::new(0u32));

        let mut sched = Scheduler::new();
        let handle = sched.add_task(TaskBuilder::new(10, Iterations::FOREVER, |_| {}).build().unwrap());

        let e = enabled_calls.clone();
        sched
            .set_on_enable(handle, move |_| {
                e.set(e.get() + 1);
                true
            })
            .unwrap();
        let d = disabled_calls.clone();
        sched.set_on_disable(handle, move |_| d.set(d.get() + 1)).unwrap();

        sched.enable(handle, 0).unwrap();
        assert_eq!(enabled_calls.get(), 1);
        sched.disable(handle).unwrap();
        assert_eq!(disabled_calls.get(), 1);
    }
}
