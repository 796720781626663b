//! # CoopOS Configuration
//!
//! Compile-time constants governing the kernel and its timebase.
//! All limits are fixed at compile time; nothing is allocated dynamically.

/// Number of tasks in the demo firmware. The kernel itself takes the task
/// count as a const generic, so this only sizes the application's task array.
pub const NUM_TASKS: usize = 2;

/// Per-task stack size in bytes. Must cover the task's deepest call chain
/// plus the saved context frame (40 bytes, or 104 bytes on hard-float
/// targets). Overflow is not detected at runtime.
pub const STACK_SIZE: usize = 1024;

/// System clock frequency in Hz (default for STM32F4 at 16 MHz HSI).
pub const CLOCK_HZ: u32 = 16_000_000;

/// Divider between the core clock and the timer tick. SysTick's external
/// reference runs at HCLK/8 on STM32F4.
pub const TIMER_PRESCALER: u32 = 8;

/// Width of the free-running counter in bits. SysTick is a 24-bit counter.
pub const TIMER_BITS: u32 = 24;

/// Clock frequency used by the hosted simulation (an 8 MHz AVR-class part).
pub const SIM_CLOCK_HZ: u32 = 8_000_000;

/// Prescaler used by the hosted simulation. One tick is 128 µs.
pub const SIM_PRESCALER: u32 = 1024;

/// Counter width used by the hosted simulation. An 8-bit counter wraps every
/// 256 ticks, which exercises wraparound within a few milliseconds of
/// simulated time.
pub const SIM_TIMER_BITS: u32 = 8;
