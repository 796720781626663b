//! # Kernel Errors
//!
//! Failures the kernel can report as values. Everything here is detected at
//! configuration time (building the timebase, seeding tasks) or by the
//! checked variant of `delay`. Contract violations that can't be detected
//! cheaply are documented on the operations themselves instead.

use core::fmt;

/// Result type alias for kernel operations.
pub type Result<T> = core::result::Result<T, KernelError>;

/// Errors reported by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// A scheduler needs at least one task.
    NoTasks,
    /// A scheduler already runs on this thread (hosted builds only).
    SchedulerActive,
    /// The counter width must be between 2 and 32 bits.
    InvalidTimerWidth(u32),
    /// The tick rate has a zero clock frequency or prescaler.
    InvalidTickRate,
    /// A task's stack region can't hold the initial context frame.
    StackTooSmall {
        /// Bytes required by the port.
        needed: usize,
        /// Bytes provided.
        provided: usize,
    },
    /// The requested delay exceeds half the counter period, so its wakeup
    /// time would be ambiguous after a wrap.
    DelayTooLong {
        /// Ticks requested.
        requested: u32,
        /// Largest delay the timebase can represent.
        max: u32,
    },
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoTasks => write!(f, "scheduler has no tasks"),
            Self::SchedulerActive => write!(f, "a scheduler is already active on this thread"),
            Self::InvalidTimerWidth(bits) => {
                write!(f, "timer width of {} bits is outside 2..=32", bits)
            }
            Self::InvalidTickRate => write!(f, "tick rate needs a non-zero clock and prescaler"),
            Self::StackTooSmall { needed, provided } => write!(
                f,
                "stack region of {} bytes is smaller than the {}-byte context frame",
                provided, needed
            ),
            Self::DelayTooLong { requested, max } => write!(
                f,
                "delay of {} ticks exceeds the maximum of {} ticks",
                requested, max
            ),
        }
    }
}

#[cfg(not(target_os = "none"))]
impl std::error::Error for KernelError {}
