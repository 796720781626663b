//! # Cortex-M4 Port Layer
//!
//! Hardware-specific code for the ARM Cortex-M4 (Thumb-2) processor:
//! the free-running SysTick counter and the cooperative context switch.
//!
//! ## Context Switch Mechanism
//!
//! Everything runs in Thread mode on the main stack pointer; there are no
//! exceptions involved. A switch is an ordinary function call into
//! `coopos_switch(save, load)`, which:
//!
//! 1. pushes the callee-saved registers (R4–R11, plus S16–S31 on hard-float
//!    targets) and LR onto the current stack,
//! 2. stores SP through `save`,
//! 3. loads SP from `load`,
//! 4. pops the same set from the new stack and returns through the popped LR.
//!
//! Caller-saved registers need no saving: the compiler already treats them
//! as clobbered across the call. The dispatcher and each task use the same
//! routine in opposite directions, so a suspended context is always exactly
//! the frame `coopos_switch` pushed.

use core::arch::global_asm;
use core::ptr::{self, addr_of_mut};
use core::slice;

use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::SYST;

use super::frame::FrameLayout;
use super::ContextState;
use crate::error::Result;
use crate::task::{StackRegion, TaskEntry};
use crate::time::Clock;

// ---------------------------------------------------------------------------
// SysTick as a free-running counter
// ---------------------------------------------------------------------------

/// SysTick reload value. The full 24-bit range makes the counter wrap every
/// 2^24 ticks.
const SYST_RELOAD: u32 = 0x00FF_FFFF;

/// Configure SysTick to free-run over its full 24-bit range with its
/// interrupt disabled.
///
/// The counter is clocked from the external reference (HCLK/8 on STM32F4),
/// which is the `TIMER_PRESCALER` in `config`.
pub fn configure_systick(syst: &mut SYST) {
    syst.disable_interrupt();
    syst.set_clock_source(SystClkSource::External);
    syst.set_reload(SYST_RELOAD);
    syst.clear_current();
    syst.enable_counter();
}

/// Up-counting view of SysTick. The hardware counts down from the reload
/// value, so elapsed ticks are `reload - current`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SysTickClock;

impl Clock for SysTickClock {
    #[inline]
    fn read(&self) -> u32 {
        SYST_RELOAD - SYST::get_current()
    }
}

// ---------------------------------------------------------------------------
// Context frame
// ---------------------------------------------------------------------------

/// Words saved for the FPU's callee-saved registers (S16–S31).
#[cfg(target_abi = "eabihf")]
const FP_WORDS: usize = 16;
#[cfg(not(target_abi = "eabihf"))]
const FP_WORDS: usize = 0;

const LAYOUT: FrameLayout = FrameLayout::new(FP_WORDS);

/// Bytes a seeded context occupies at the top of its stack.
pub const CONTEXT_FRAME_SIZE: usize = LAYOUT.size();

#[cfg(target_abi = "eabihf")]
global_asm!(
    ".section .text.coopos_switch,\"ax\",%progbits",
    ".global coopos_switch",
    ".type coopos_switch,%function",
    ".thumb_func",
    "coopos_switch:",
    "    push {{r3-r11, lr}}",
    "    vpush {{s16-s31}}",
    "    mov r2, sp",
    "    str r2, [r0]",
    "    mov sp, r1",
    "    vpop {{s16-s31}}",
    "    pop {{r3-r11, pc}}",
    ".size coopos_switch, . - coopos_switch",
);

#[cfg(not(target_abi = "eabihf"))]
global_asm!(
    ".section .text.coopos_switch,\"ax\",%progbits",
    ".global coopos_switch",
    ".type coopos_switch,%function",
    ".thumb_func",
    "coopos_switch:",
    "    push {{r3-r11, lr}}",
    "    mov r2, sp",
    "    str r2, [r0]",
    "    mov sp, r1",
    "    pop {{r3-r11, pc}}",
    ".size coopos_switch, . - coopos_switch",
);

// First-resume landing pad. A seeded frame "returns" here with the task
// entry point in R4.
global_asm!(
    ".section .text.coopos_task_start,\"ax\",%progbits",
    ".global coopos_task_start",
    ".type coopos_task_start,%function",
    ".thumb_func",
    "coopos_task_start:",
    "    mov r0, r4",
    "    bl {start}",
    "    udf #0",
    ".size coopos_task_start, . - coopos_task_start",
    start = sym task_start,
);

extern "C" {
    fn coopos_switch(save: *mut *mut u32, load: *mut u32);
    fn coopos_task_start();
}

extern "C" fn task_start(entry: TaskEntry) -> ! {
    entry()
}

// ---------------------------------------------------------------------------
// Contexts
// ---------------------------------------------------------------------------

/// A task's saved stack pointer. Everything else lives on the task's stack
/// below it.
#[derive(Debug)]
pub(crate) struct TaskContext {
    sp: *mut u32,
    state: ContextState,
}

impl TaskContext {
    /// Build the initial frame on `stack` so that the first resume lands in
    /// `coopos_task_start`, which calls `entry`. See `arch::frame` for the
    /// layout.
    pub(crate) fn seed(stack: StackRegion, entry: TaskEntry) -> Result<Self> {
        let frame = LAYOUT.place(stack.base() as usize, stack.len())? as *mut u32;

        // Safety: `place` checked that the frame lies within the task's
        // exclusively owned stack, and it is 8-byte aligned. Zeroing first
        // makes the words initialized before a slice is formed over them.
        unsafe {
            ptr::write_bytes(frame, 0, LAYOUT.words());
            let words = slice::from_raw_parts_mut(frame, LAYOUT.words());
            LAYOUT.fill(words, entry as usize as u32, coopos_task_start as usize as u32);
        }

        Ok(Self {
            sp: frame,
            state: ContextState::Seeded,
        })
    }

    pub(crate) fn state(&self) -> ContextState {
        self.state
    }
}

/// The dispatcher's saved stack pointer, valid while a task runs.
#[derive(Debug)]
pub(crate) struct KernelContext {
    sp: *mut u32,
}

impl KernelContext {
    pub(crate) fn new() -> Result<Self> {
        Ok(Self {
            sp: ptr::null_mut(),
        })
    }
}

/// Switch from the dispatcher to `task`. Returns when the task suspends.
///
/// # Safety
/// Must be called from the dispatcher, with `task` seeded and not running.
/// Both pointers must stay valid until this returns.
pub(crate) unsafe fn resume(kernel: *mut KernelContext, task: *mut TaskContext) {
    unsafe {
        (*task).state.enter();
        coopos_switch(addr_of_mut!((*kernel).sp), (*task).sp);
    }
}

/// Switch from the running `task` back to the dispatcher.
///
/// # Safety
/// Must be called on `task`'s own stack while it is running, with `kernel`
/// holding the context saved by the matching `resume`.
pub(crate) unsafe fn suspend(task: *mut TaskContext, kernel: *mut KernelContext) {
    unsafe {
        (*task).state.leave();
        coopos_switch(addr_of_mut!((*task).sp), (*kernel).sp);
    }
}

/// On bare metal there's no cheaper marker for "on a task stack" than the
/// current task the dispatcher publishes, which the kernel checks itself.
#[inline]
pub(crate) fn in_task_context() -> bool {
    true
}
