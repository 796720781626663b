//! # Kernel
//!
//! The task-facing API of CoopOS. A task gives up the CPU only by calling
//! one of the delay functions here; everything else in this module just
//! reports on the calling task.
//!
//! ## Suspension Path
//!
//! ```text
//! Scheduler::step()
//!   ├─► publish Dispatch { task, kernel, timebase, index }
//!   └─► arch::resume() ───────────► task runs
//!                                     └─► kernel::delay(ticks)
//!                                           ├─► next_run = now + ticks
//!                                           └─► arch::suspend()
//!   ◄── resume() returns ◄────────────────────────┘
//!   └─► retract Dispatch
//! ```
//!
//! The published `Dispatch` is the only way a task finds its own descriptor,
//! so every function here panics when called outside a dispatched task.

use crate::arch::{self, KernelContext};
use crate::error::{KernelError, Result};
use crate::sync::KernelCell;
use crate::task::TaskDescriptor;
use crate::time::{TickTime, Timebase};

// ---------------------------------------------------------------------------
// Dispatcher state
// ---------------------------------------------------------------------------

/// What the dispatcher publishes while a task runs.
#[derive(Clone, Copy)]
pub(crate) struct Dispatch {
    pub(crate) task: *mut TaskDescriptor,
    pub(crate) kernel: *mut KernelContext,
    pub(crate) timebase: *const Timebase,
    pub(crate) index: usize,
}

/// The task currently holding the CPU, if any.
///
/// Written only by the dispatcher, read only by the running task. The two
/// never run at the same time.
static CURRENT: KernelCell<Option<Dispatch>> = KernelCell::new(None);

/// Keeps a `Dispatch` published for as long as it lives.
pub(crate) struct Published(());

impl Published {
    /// Publish `dispatch` as the current task.
    ///
    /// # Safety
    /// Every pointer in `dispatch` must stay valid until the guard drops.
    pub(crate) unsafe fn new(dispatch: Dispatch) -> Self {
        unsafe {
            CURRENT.replace(Some(dispatch));
        }
        Self(())
    }
}

impl Drop for Published {
    fn drop(&mut self) {
        // Safety: the dispatcher holds the CPU again.
        unsafe {
            CURRENT.replace(None);
        }
    }
}

fn current(op: &str) -> Dispatch {
    let dispatch = if arch::in_task_context() {
        // Safety: only the running context reads CURRENT, and we are it.
        unsafe { CURRENT.get() }
    } else {
        None
    };
    match dispatch {
        Some(dispatch) => dispatch,
        None => panic!("`{}` called outside a task", op),
    }
}

// ---------------------------------------------------------------------------
// Delay primitive
// ---------------------------------------------------------------------------

/// Suspend the calling task for `ticks` timer ticks.
///
/// The wake time is computed from the clock at the call, so a task that
/// does a fixed amount of work between delays drifts by that amount. The
/// task runs again on the first dispatcher pass after the wake time has
/// passed, which is one tick later at the earliest.
///
/// `ticks` must not exceed [`Timebase::max_delay`]; longer delays wake at
/// the wrong time. This is only asserted in debug builds, see
/// [`checked_delay`] for a checked variant.
///
/// # Panics
/// If called outside a task.
pub fn delay(ticks: u32) {
    let current = current("delay");

    // Safety: the dispatcher is blocked inside `resume` for this task, so
    // the descriptor, kernel context and timebase are valid and ours.
    unsafe {
        let task = current.task;
        let wake = (*current.timebase).deadline_after(ticks);
        (*task).next_run = Some(wake);
        (*task).stats.suspends = (*task).stats.suspends.wrapping_add(1);
        log::trace!(
            "task {} '{}' delays {} ticks until {}",
            current.index,
            (*task).name(),
            ticks,
            wake.raw()
        );

        match (*task).context.as_mut() {
            Some(context) => arch::suspend(context, current.kernel),
            None => unreachable!("dispatched task has no context"),
        }
    }
}

/// Like [`delay`], but rejects delays longer than the timebase can tell
/// apart from a past time instead of misbehaving.
///
/// # Errors
/// `DelayTooLong` if `ticks` exceeds [`Timebase::max_delay`]. The task is
/// not suspended in that case.
pub fn checked_delay(ticks: u32) -> Result<()> {
    let current = current("checked_delay");
    // Safety: see `delay`.
    let max = unsafe { (*current.timebase).max_delay() };
    if ticks > max {
        log::warn!(
            "task {} rejected delay of {} ticks (max {})",
            current.index,
            ticks,
            max
        );
        return Err(KernelError::DelayTooLong {
            requested: ticks,
            max,
        });
    }
    delay(ticks);
    Ok(())
}

/// Suspend the calling task for about `ms` milliseconds, rounded to the
/// nearest tick.
pub fn delay_ms(ms: u32) {
    // Safety: see `delay`.
    let rate = unsafe { (*current("delay_ms").timebase).rate() };
    delay(rate.ticks_from_millis(ms));
}

/// Suspend the calling task for about `us` microseconds, rounded to the
/// nearest tick.
pub fn delay_us(us: u32) {
    // Safety: see `delay`.
    let rate = unsafe { (*current("delay_us").timebase).rate() };
    delay(rate.ticks_from_micros(us));
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// The current counter value, as seen by the calling task.
pub fn now() -> TickTime {
    // Safety: see `delay`.
    unsafe { (*current("now").timebase).now() }
}

/// Index of the calling task in its scheduler.
pub fn current_task() -> usize {
    current("current_task").index
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::scheduler::Scheduler;
    use crate::task::{TaskDescriptor, TaskEntry, TaskStack};
    use crate::time::{SimClock, TickRate};

    fn scheduler<const N: usize>(
        tasks: [(&'static str, TaskEntry); N],
    ) -> (&'static SimClock, Scheduler<N>) {
        let _ = env_logger::builder().is_test(true).try_init();
        let clock: &'static SimClock = Box::leak(Box::new(SimClock::new()));
        let timebase = Timebase::new(clock, 8, TickRate::new(8_000_000, 1024)).unwrap();
        let tasks = tasks.map(|(name, entry)| {
            let stack: &'static mut TaskStack<512> = Box::leak(Box::new(TaskStack::new()));
            TaskDescriptor::new(name, entry, stack)
        });
        (clock, Scheduler::new(timebase, tasks).unwrap())
    }

    #[test]
    #[should_panic(expected = "outside a task")]
    fn test_delay_outside_task_panics() {
        delay(1);
    }

    #[test]
    #[should_panic(expected = "outside a task")]
    fn test_now_outside_task_panics() {
        now();
    }

    static CHECKED: Mutex<Vec<Result<()>>> = Mutex::new(Vec::new());

    fn checked_task() -> ! {
        let rejected = checked_delay(200);
        CHECKED.lock().unwrap().push(rejected);
        let accepted = checked_delay(127);
        CHECKED.lock().unwrap().push(accepted);
        loop {
            delay(1);
        }
    }

    #[test]
    fn test_checked_delay_rejects_beyond_half_period() {
        let (clock, mut sched) = scheduler([("checked", checked_task as TaskEntry)]);
        clock.set(3);

        assert_eq!(sched.step(), Some(0));
        // The rejected call didn't suspend, the accepted one did
        assert_eq!(sched.task(0).stats().suspends, 1);
        assert_eq!(sched.task(0).next_run(), Some(TickTime::from_raw(130)));

        // The accepted result is recorded once the task wakes
        clock.set(131);
        assert_eq!(sched.step(), Some(0));
        assert_eq!(
            *CHECKED.lock().unwrap(),
            vec![
                Err(KernelError::DelayTooLong {
                    requested: 200,
                    max: 127
                }),
                Ok(())
            ]
        );
    }

    static SEEN_NOW: AtomicU32 = AtomicU32::new(u32::MAX);
    static SEEN_INDEX: AtomicUsize = AtomicUsize::new(usize::MAX);

    fn idle_task() -> ! {
        loop {
            delay(100);
        }
    }

    fn query_task() -> ! {
        loop {
            SEEN_NOW.store(now().raw(), Ordering::SeqCst);
            SEEN_INDEX.store(current_task(), Ordering::SeqCst);
            delay(10);
        }
    }

    #[test]
    fn test_queries_report_calling_task() {
        let (clock, mut sched) = scheduler([
            ("idle", idle_task as TaskEntry),
            ("query", query_task as TaskEntry),
        ]);
        // Wrapped raw value
        clock.set(256 + 42);
        sched.sweep();
        assert_eq!(SEEN_NOW.load(Ordering::SeqCst), 42);
        assert_eq!(SEEN_INDEX.load(Ordering::SeqCst), 1);
    }

    fn millis_task() -> ! {
        loop {
            // 1 ms is 7.8125 ticks at 128 µs per tick
            delay_ms(1);
            // 500 µs is 3.90625 ticks
            delay_us(500);
        }
    }

    #[test]
    fn test_real_time_delays_round_to_ticks() {
        let (clock, mut sched) = scheduler([("millis", millis_task as TaskEntry)]);
        assert_eq!(sched.step(), Some(0));
        assert_eq!(sched.task(0).next_run(), Some(TickTime::from_raw(8)));

        clock.set(9);
        assert_eq!(sched.step(), Some(0));
        assert_eq!(sched.task(0).next_run(), Some(TickTime::from_raw(13)));
    }
}
