//! # CoopOS: Cooperative Round-Robin Kernel
//!
//! A minimal cooperative multitasking kernel for single-core
//! microcontrollers, targeting ARM Cortex-M4.
//!
//! ## Overview
//!
//! A fixed set of tasks, each an endless loop with its own stack, share the
//! CPU by taking turns. A task runs until it calls `kernel::delay`, which
//! records when it wants to run again and switches back to the dispatcher.
//! The dispatcher visits the tasks in index order forever and resumes each
//! one whose wake time has passed. There are no interrupts, no
//! priorities and no preemption: a task that never delays starves the rest.
//!
//! Time comes from a free-running hardware counter that wraps (SysTick's 24
//! bits, or as few as 8 on small parts). Wake times are compared with a
//! half-range test so they stay correct across a wrap, which limits every
//! delay to half the counter period.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    Application Tasks                   │
//! │            fn() -> ! { loop { work; delay } }          │
//! ├────────────────────────────────────────────────────────┤
//! │                Delay Primitive (kernel.rs)             │
//! │   delay() · checked_delay() · delay_ms() · now()       │
//! ├───────────────────────────┬────────────────────────────┤
//! │  Dispatcher (scheduler.rs)│  Timebase (time.rs)        │
//! │  ─ new()   seed contexts  │  ─ now()                   │
//! │  ─ step()  resume if due  │  ─ is_past()               │
//! │  ─ run()   forever        │  ─ TickRate conversions    │
//! ├───────────────────────────┴────────────────────────────┤
//! │          Task Descriptor (task.rs)                     │
//! │    entry · stack · context · next_run · stats          │
//! ├────────────────────────────────────────────────────────┤
//! │      Context Switch (arch/cortex_m4.rs, arch/hosted.rs)│
//! │    seed · resume · suspend · SysTick clock             │
//! ├────────────────────────────────────────────────────────┤
//! │     ARM Cortex-M4 (Thumb-2)  or  std host threads      │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Memory Model
//!
//! - **No heap**: tasks live in a `[TaskDescriptor; N]` owned by the
//!   scheduler, stacks are `TaskStack<SIZE>` statics
//! - **No locks**: exactly one context runs at a time, so kernel state is
//!   only ever touched by whoever holds the CPU
//!
//! ## Hosted Builds
//!
//! On targets with an OS the crate links `std` and switches contexts by
//! handing the CPU between parked threads. This runs the same kernel
//! against a simulated clock for tests and the demo binary.

#![cfg_attr(target_os = "none", no_std)]

pub mod arch;
pub mod config;
pub mod error;
pub mod kernel;
pub mod scheduler;
mod sync;
pub mod task;
pub mod time;
