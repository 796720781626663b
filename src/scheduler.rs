//! # Scheduler
//!
//! The dispatcher loop of CoopOS. Tasks are visited in a fixed round-robin
//! order; a task that is due gets the CPU until it next calls
//! `kernel::delay`. The dispatcher itself never blocks.
//!
//! ## Dispatch Algorithm
//!
//! On every step:
//! 1. **Check**: read the descriptor at `task_index`. It is due if it has
//!    never delayed, or if the timebase says its `next_run` has passed.
//! 2. **Resume**: if due, publish it as the current task and switch to it.
//!    The switch returns when the task delays again.
//! 3. **Advance**: `task_index = (task_index + 1) % N`, whether or not the
//!    task ran.
//!
//! ## Fairness
//!
//! Order is by index, not by earliest wake time. A task that becomes due
//! just after its turn waits for the rest of the sweep, so wakeups are late
//! by up to one sweep of the other tasks' run times. The largest observed
//! lateness is kept in each task's `TaskStats`.

use core::fmt;

use crate::arch::{self, KernelContext, TaskContext};
use crate::error::{KernelError, Result};
use crate::kernel::{Dispatch, Published};
use crate::task::TaskDescriptor;
use crate::time::Timebase;

// ---------------------------------------------------------------------------
// Scheduler struct
// ---------------------------------------------------------------------------

/// Round-robin dispatcher over a fixed set of `N` tasks.
///
/// ## Design Notes
///
/// - Tasks are stored inline in a fixed-size array (no heap) and keep their
///   index for the scheduler's whole life.
/// - `tasks` is declared before `kernel_context`, so on a host the task
///   threads are released before the simulated CPU is.
pub struct Scheduler<const N: usize> {
    tasks: [TaskDescriptor; N],
    /// Round-robin cursor, always in `0..N`.
    task_index: usize,
    kernel_context: KernelContext,
    timebase: Timebase,
}

impl<const N: usize> fmt::Debug for Scheduler<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("tasks", &self.tasks)
            .field("task_index", &self.task_index)
            .field("timebase", &self.timebase)
            .finish()
    }
}

impl<const N: usize> Scheduler<N> {
    /// Seed every task's context and build the dispatcher.
    ///
    /// Each task starts with no wake time, so the first sweep runs all of
    /// them in index order.
    ///
    /// On a host this blocks while a scheduler on another thread exists.
    ///
    /// # Errors
    /// - `NoTasks` if `N` is zero.
    /// - `SchedulerActive` on a host, if the calling thread already owns a
    ///   scheduler or is one of its tasks.
    /// - `StackTooSmall` if a task's stack can't hold its initial frame.
    pub fn new(timebase: Timebase, mut tasks: [TaskDescriptor; N]) -> Result<Self> {
        if N == 0 {
            return Err(KernelError::NoTasks);
        }

        let kernel_context = KernelContext::new()?;
        for task in tasks.iter_mut() {
            task.seed()?;
        }
        log::debug!("scheduler ready with {} tasks on {:?}", N, timebase);

        Ok(Self {
            tasks,
            task_index: 0,
            kernel_context,
            timebase,
        })
    }

    /// Run one dispatcher step: resume the task at the cursor if it is due,
    /// then advance the cursor.
    ///
    /// Returns the index of the task that ran, if any.
    ///
    /// # Panics
    /// On a host, re-raises a panic from the resumed task.
    pub fn step(&mut self) -> Option<usize> {
        let index = self.task_index;
        let resumed = self.dispatch(index);
        self.task_index = (index + 1) % N;
        resumed.then_some(index)
    }

    /// Run `N` steps, giving every task one chance to run. Returns how many
    /// tasks ran.
    pub fn sweep(&mut self) -> usize {
        (0..N).filter(|_| self.step().is_some()).count()
    }

    /// Dispatch forever.
    pub fn run(&mut self) -> ! {
        log::debug!("dispatcher loop started");
        loop {
            self.step();
        }
    }

    fn dispatch(&mut self, index: usize) -> bool {
        let now = self.timebase.now();
        let task = &mut self.tasks[index];

        let due = match task.next_run {
            None => true,
            Some(wake) => self.timebase.is_past_at(now, wake),
        };
        if !due {
            return false;
        }

        if let Some(wake) = task.next_run {
            let lateness = self.timebase.ticks_between(wake, now);
            task.stats.max_lateness = task.stats.max_lateness.max(lateness);
        }
        task.stats.resumes = task.stats.resumes.wrapping_add(1);
        task.stats.last_resumed_at = Some(now);
        log::trace!("resuming task {} '{}' at {}", index, task.name(), now.raw());

        let context: *mut TaskContext = match task.context.as_mut() {
            Some(context) => context,
            None => unreachable!("tasks are seeded by Scheduler::new"),
        };
        let task: *mut TaskDescriptor = task;
        let kernel: *mut KernelContext = &mut self.kernel_context;

        // Safety: all three live in `self`, which stays borrowed until the
        // task suspends and `resume` returns.
        unsafe {
            let _published = Published::new(Dispatch {
                task,
                kernel,
                timebase: &self.timebase,
                index,
            });
            arch::resume(kernel, context);
        }
        true
    }

    /// The descriptor at `index`.
    ///
    /// # Panics
    /// If `index >= N`.
    pub fn task(&self, index: usize) -> &TaskDescriptor {
        &self.tasks[index]
    }

    /// All task descriptors, in dispatch order.
    pub fn tasks(&self) -> &[TaskDescriptor] {
        &self.tasks
    }

    /// Index of the task the next step will look at.
    pub fn task_index(&self) -> usize {
        self.task_index
    }

    /// The timebase the scheduler dispatches against.
    pub fn timebase(&self) -> &Timebase {
        &self.timebase
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
