//! # Task Descriptor
//!
//! Defines the per-task record the dispatcher iterates over. Each task is a
//! function that never returns, running on its own private stack and giving
//! up the CPU only through `kernel::delay`.
//!
//! ## Lifecycle
//!
//! ```text
//!   TaskDescriptor::new()      Scheduler::new()       first dispatch
//!   ───────────────────► built ───────────────► seeded ─────────────► running
//!                                                                     │   ▲
//!                                                              delay  ▼   │ due
//!                                                                   suspended
//! ```
//!
//! Descriptors are created once at startup and live as long as the
//! scheduler. There is no way to stop or remove a task.

use core::fmt;
use core::mem::MaybeUninit;

use crate::arch::{ContextState, TaskContext};
use crate::error::Result;
use crate::time::TickTime;

/// A task's entry point. Written as an unbounded loop of "work, delay".
pub type TaskEntry = fn() -> !;

// ---------------------------------------------------------------------------
// Private stack regions
// ---------------------------------------------------------------------------

/// Statically allocated stack memory for one task. Aligned to 8 bytes as
/// required by ARM AAPCS.
///
/// Size it for the task's worst-case call depth plus
/// [`CONTEXT_FRAME_SIZE`](crate::arch::CONTEXT_FRAME_SIZE). Overflow corrupts
/// whatever sits below the region and is not detected.
#[repr(C, align(8))]
pub struct TaskStack<const SIZE: usize> {
    bytes: [MaybeUninit<u8>; SIZE],
}

impl<const SIZE: usize> TaskStack<SIZE> {
    /// Creates an uninitialized stack region.
    pub const fn new() -> Self {
        Self {
            bytes: [MaybeUninit::uninit(); SIZE],
        }
    }
}

impl<const SIZE: usize> Default for TaskStack<SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const SIZE: usize> fmt::Debug for TaskStack<SIZE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskStack<{}>", SIZE)
    }
}

/// A task's exclusively owned stack memory, with its size erased.
#[derive(Debug)]
pub struct StackRegion {
    base: *mut u8,
    len: usize,
}

impl StackRegion {
    /// Lowest address of the region.
    pub fn base(&self) -> *mut u8 {
        self.base
    }

    /// Size of the region in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the region has no room at all.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<const SIZE: usize> From<&'static mut TaskStack<SIZE>> for StackRegion {
    fn from(stack: &'static mut TaskStack<SIZE>) -> Self {
        Self {
            base: stack.bytes.as_mut_ptr().cast(),
            len: SIZE,
        }
    }
}

// ---------------------------------------------------------------------------
// Run statistics
// ---------------------------------------------------------------------------

/// Counters the dispatcher keeps for each task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskStats {
    /// Number of times the dispatcher resumed the task.
    pub resumes: u32,
    /// Number of times the task suspended through `delay`.
    pub suspends: u32,
    /// Counter value at the most recent resume.
    pub last_resumed_at: Option<TickTime>,
    /// Largest gap, in ticks, between a task's wake time and the resume
    /// that served it.
    pub max_lateness: u32,
}

// ---------------------------------------------------------------------------
// Task descriptor
// ---------------------------------------------------------------------------

/// Everything the kernel knows about one task.
///
/// The context is seeded by [`Scheduler::new`](crate::scheduler::Scheduler::new);
/// until then the descriptor only records the entry point and stack.
pub struct TaskDescriptor {
    name: &'static str,
    entry: TaskEntry,
    stack: Option<StackRegion>,
    pub(crate) context: Option<TaskContext>,
    /// Wake time requested by the last `delay`. `None` until the task first
    /// delays, which makes a fresh task immediately due.
    pub(crate) next_run: Option<TickTime>,
    pub(crate) stats: TaskStats,
}

impl fmt::Debug for TaskDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDescriptor")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("next_run", &self.next_run)
            .field("stats", &self.stats)
            .finish()
    }
}

impl TaskDescriptor {
    /// Describes a task that runs `entry` on `stack`.
    pub fn new(name: &'static str, entry: TaskEntry, stack: impl Into<StackRegion>) -> Self {
        Self {
            name,
            entry,
            stack: Some(stack.into()),
            context: None,
            next_run: None,
            stats: TaskStats::default(),
        }
    }

    /// Prepare the context so the first resume starts at the entry point on
    /// the task's stack. Does nothing if already seeded.
    pub(crate) fn seed(&mut self) -> Result<()> {
        if let Some(stack) = self.stack.take() {
            self.context = Some(TaskContext::seed(stack, self.entry)?);
            self.next_run = None;
            log::debug!("seeded task '{}'", self.name);
        }
        Ok(())
    }

    /// The task's label.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Wake time set by the task's last `delay`, if any.
    pub fn next_run(&self) -> Option<TickTime> {
        self.next_run
    }

    /// Resume/suspend counters.
    pub fn stats(&self) -> TaskStats {
        self.stats
    }

    /// Where the task is in the resume/suspend protocol. `None` before
    /// seeding.
    pub fn state(&self) -> Option<ContextState> {
        self.context.as_ref().map(TaskContext::state)
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn idle() -> ! {
        loop {
            crate::kernel::delay(1);
        }
    }

    #[test]
    fn test_descriptor_starts_unseeded() {
        let stack: &'static mut TaskStack<256> = Box::leak(Box::new(TaskStack::new()));
        let task = TaskDescriptor::new("idle", idle, stack);
        assert_eq!(task.name(), "idle");
        assert_eq!(task.state(), None);
        assert_eq!(task.next_run(), None);
        assert_eq!(task.stats(), TaskStats::default());
    }

    #[test]
    fn test_seeding_is_one_time() {
        let stack: &'static mut TaskStack<256> = Box::leak(Box::new(TaskStack::new()));
        let mut task = TaskDescriptor::new("idle", idle, stack);
        task.seed().unwrap();
        assert_eq!(task.state(), Some(ContextState::Seeded));
        task.next_run = Some(TickTime::from_raw(7));
        task.seed().unwrap();
        assert_eq!(task.next_run(), Some(TickTime::from_raw(7)));
    }

    /// Compiles only while `TaskDescriptor` is not `Send`: for a `Send`
    /// type both impls apply and `check` becomes ambiguous.
    #[test]
    fn test_descriptor_is_not_send() {
        trait AmbiguousIfSend<A> {
            fn check() {}
        }
        impl<T: ?Sized> AmbiguousIfSend<()> for T {}
        struct IsSend;
        impl<T: ?Sized + Send> AmbiguousIfSend<IsSend> for T {}

        <TaskDescriptor as AmbiguousIfSend<_>>::check();
    }

    #[test]
    fn test_stack_region_is_aligned() {
        let stack: &'static mut TaskStack<100> = Box::leak(Box::new(TaskStack::new()));
        let region = StackRegion::from(stack);
        assert_eq!(region.base() as usize % 8, 0);
        assert_eq!(region.len(), 100);
        assert!(!region.is_empty());
    }
}
