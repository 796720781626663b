//! # Architecture Abstraction Layer
//!
//! Provides the context-switch boundary for the kernel. Each port supplies
//! the same small surface:
//!
//! - `TaskContext::seed(stack, entry)`: prepare a context whose first resume
//!   starts `entry` on `stack`.
//! - `KernelContext::new()`: the dispatcher's save slot.
//! - `resume(kernel, task)` / `suspend(task, kernel)`: the two halves of the
//!   switch protocol.
//! - `in_task_context()`: whether the caller is running on a task context.
//! - `CONTEXT_FRAME_SIZE`: bytes a seeded context occupies on its stack.
//!
//! Ports:
//! - `cortex_m4`: Thumb-2 register save/restore with a stack swap. Its
//!   initial frame layout lives in `frame`, which host tests also build.
//! - `hosted`: one parked OS thread per task with a strict handoff, for
//!   tests and simulation on a `std` host.

#[cfg(any(test, all(target_arch = "arm", target_os = "none")))]
mod frame;

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod cortex_m4;
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub(crate) use cortex_m4::{in_task_context, resume, suspend, KernelContext, TaskContext};
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub use cortex_m4::{configure_systick, SysTickClock, CONTEXT_FRAME_SIZE};

#[cfg(not(target_os = "none"))]
mod hosted;
#[cfg(not(target_os = "none"))]
pub(crate) use hosted::{in_task_context, resume, suspend, KernelContext, TaskContext};
#[cfg(not(target_os = "none"))]
pub use hosted::CONTEXT_FRAME_SIZE;

#[cfg(all(target_os = "none", not(target_arch = "arm")))]
compile_error!("coopos has no context-switch port for this target");

/// Where a task's context is in the resume/suspend protocol.
///
/// ```text
///   ┌────────┐   resume   ┌─────────┐
///   │ Seeded │ ─────────► │ Running │
///   └────────┘            └─────────┘
///                 resume   ▲       │ suspend
///            ┌─────────────┘       ▼
///            │               ┌───────────┐
///            └────────────── │ Suspended │
///                            └───────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Prepared by seeding; the task has never run.
    Seeded,
    /// The task owns the CPU.
    Running,
    /// The task is parked at its last `delay`.
    Suspended,
}

impl ContextState {
    /// Transition taken by `resume`.
    #[inline]
    pub(crate) fn enter(&mut self) {
        debug_assert!(*self != ContextState::Running, "resumed a task that is already running");
        *self = ContextState::Running;
    }

    /// Transition taken by `suspend`.
    #[inline]
    pub(crate) fn leave(&mut self) {
        debug_assert!(*self == ContextState::Running, "suspended a task that is not running");
        *self = ContextState::Suspended;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_alternation() {
        let mut state = ContextState::Seeded;
        state.enter();
        assert_eq!(state, ContextState::Running);
        state.leave();
        assert_eq!(state, ContextState::Suspended);
        state.enter();
        assert_eq!(state, ContextState::Running);
    }

    #[test]
    #[should_panic(expected = "not running")]
    fn test_double_suspend_is_caught() {
        let mut state = ContextState::Seeded;
        state.enter();
        state.leave();
        state.leave();
    }

    #[test]
    #[should_panic(expected = "already running")]
    fn test_double_resume_is_caught() {
        let mut state = ContextState::Seeded;
        state.enter();
        state.enter();
    }
}
