//! # Hosted Port
//!
//! Runs the kernel on a `std` host for tests and simulation. There is no
//! portable way to swap stacks on a host, so each task context is backed by
//! an OS thread and the switch becomes a handoff:
//!
//! - `resume` wakes the task's thread (spawning it on first resume), then
//!   blocks the dispatcher until the task reports back.
//! - `suspend` reports back to the dispatcher, then blocks the task's thread
//!   until the next wakeup.
//!
//! Exactly one side is ever unblocked, so the threads never run
//! concurrently and the single-CPU invariant holds. The channel operations
//! order every access to kernel state between the two sides.
//!
//! A panic in a task is carried to the dispatcher and re-raised there.
//! Dropping the scheduler disconnects every wakeup channel; parked task
//! threads then unwind quietly and exit.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::io;
use std::panic;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, MutexGuard};
use std::thread;

use super::ContextState;
use crate::error::{KernelError, Result};
use crate::task::{StackRegion, TaskEntry};

/// Seeded contexts don't occupy their stack region on a host.
pub const CONTEXT_FRAME_SIZE: usize = 0;

/// Smallest thread stack handed to the OS. Task stack regions are sized for
/// a microcontroller and are far too small for a hosted build.
const MIN_THREAD_STACK: usize = 256 * 1024;

/// The simulated CPU. A scheduler holds it for its whole life, so only one
/// scheduler can run per process at a time.
static CPU: Mutex<()> = Mutex::new(());

/// What a task thread tells the dispatcher when it hands the CPU back.
enum Handoff {
    Suspended,
    Panicked(Box<dyn Any + Send>),
}

/// Unwind payload used to retire a task thread whose scheduler is gone.
struct Shutdown;

thread_local! {
    /// Wakeup channel of the task running on this thread. Only set on task
    /// threads.
    static WAKEUP: RefCell<Option<Receiver<()>>> = RefCell::new(None);

    /// Whether a kernel context on this thread holds the CPU.
    static HOLDS_CPU: Cell<bool> = Cell::new(false);
}

// ---------------------------------------------------------------------------
// Contexts
// ---------------------------------------------------------------------------

pub(crate) struct TaskContext {
    entry: TaskEntry,
    stack_size: usize,
    /// Set once the backing thread exists.
    wakeup: Option<Sender<()>>,
    state: ContextState,
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("stack_size", &self.stack_size)
            .field("spawned", &self.wakeup.is_some())
            .field("state", &self.state)
            .finish()
    }
}

impl TaskContext {
    /// The thread is created lazily on first resume, so seeding only records
    /// what to start.
    pub(crate) fn seed(stack: StackRegion, entry: TaskEntry) -> Result<Self> {
        Ok(Self {
            entry,
            stack_size: stack.len().max(MIN_THREAD_STACK),
            wakeup: None,
            state: ContextState::Seeded,
        })
    }

    pub(crate) fn state(&self) -> ContextState {
        self.state
    }
}

pub(crate) struct KernelContext {
    report_tx: Sender<Handoff>,
    report_rx: Receiver<Handoff>,
    _cpu: MutexGuard<'static, ()>,
}

impl std::fmt::Debug for KernelContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelContext").finish_non_exhaustive()
    }
}

impl KernelContext {
    /// Claims the simulated CPU, blocking while a scheduler on another
    /// thread holds it.
    ///
    /// # Errors
    /// `SchedulerActive` if this thread already holds the CPU, or is a task
    /// thread. Waiting would never end in either case.
    pub(crate) fn new() -> Result<Self> {
        if HOLDS_CPU.with(Cell::get) || in_task_context() {
            return Err(KernelError::SchedulerActive);
        }

        // A scheduler that panicked (e.g. a failed test) poisons the lock
        // but leaves nothing behind that needs repair.
        let cpu = CPU.lock().unwrap_or_else(|e| e.into_inner());
        HOLDS_CPU.with(|held| held.set(true));
        let (report_tx, report_rx) = mpsc::channel();
        Ok(Self {
            report_tx,
            report_rx,
            _cpu: cpu,
        })
    }
}

impl Drop for KernelContext {
    fn drop(&mut self) {
        // The guard isn't `Send`, so this runs on the thread that locked.
        HOLDS_CPU.with(|held| held.set(false));
    }
}

// ---------------------------------------------------------------------------
// Switch protocol
// ---------------------------------------------------------------------------

/// Hand the CPU to `task` and wait for it to hand it back.
///
/// # Safety
/// Must be called from the dispatcher thread, with `task` seeded and not
/// running. Both pointers must stay valid until this returns.
pub(crate) unsafe fn resume(kernel: *mut KernelContext, task: *mut TaskContext) {
    // Safety: the task thread is parked (or doesn't exist yet), so nothing
    // else touches either context until we hand over.
    let (kernel, task) = unsafe { (&*kernel, &mut *task) };

    if task.wakeup.is_none() {
        match spawn_task_thread(task.entry, task.stack_size, kernel) {
            Ok(wakeup) => task.wakeup = Some(wakeup),
            Err(err) => panic!("failed to spawn task thread: {}", err),
        }
    }

    task.state.enter();
    let woken = task.wakeup.as_ref().map_or(false, |w| w.send(()).is_ok());
    if !woken {
        panic!("task thread exited while suspended");
    }

    // The kernel context owns a sender, so this can't disconnect.
    match kernel.report_rx.recv() {
        Ok(Handoff::Suspended) | Err(_) => {}
        Ok(Handoff::Panicked(payload)) => panic::resume_unwind(payload),
    }
}

/// Start a parked thread for a task. It runs `entry` once the returned
/// sender delivers the first wakeup, and exits quietly if the sender is
/// dropped first.
fn spawn_task_thread(
    entry: TaskEntry,
    stack_size: usize,
    kernel: &KernelContext,
) -> io::Result<Sender<()>> {
    let (wakeup_tx, wakeup_rx) = mpsc::channel::<()>();
    let report = kernel.report_tx.clone();

    log::trace!("spawning thread for task entry {:p}", entry as *const ());
    thread::Builder::new()
        .name("coopos-task".into())
        .stack_size(stack_size)
        .spawn(move || {
            if wakeup_rx.recv().is_err() {
                return;
            }
            WAKEUP.with(|w| *w.borrow_mut() = Some(wakeup_rx));
            if let Err(payload) = panic::catch_unwind(move || -> () { entry() }) {
                if !payload.is::<Shutdown>() {
                    let _ = report.send(Handoff::Panicked(payload));
                }
            }
        })?;
    Ok(wakeup_tx)
}

/// Hand the CPU from the running `task` back to the dispatcher and park
/// until the next resume.
///
/// # Safety
/// Must be called on `task`'s own thread while it is running, with the
/// dispatcher blocked in the matching `resume`.
pub(crate) unsafe fn suspend(task: *mut TaskContext, kernel: *mut KernelContext) {
    // Safety: the dispatcher is blocked in `resume` until the report below,
    // so both contexts are ours until then. Neither is touched afterwards,
    // since the dispatcher may drop them as soon as it has the CPU.
    unsafe {
        (*task).state.leave();
        if (*kernel).report_tx.send(Handoff::Suspended).is_err() {
            panic::resume_unwind(Box::new(Shutdown));
        }
    }

    let woken = WAKEUP.with(|w| w.borrow().as_ref().map(|rx| rx.recv()));
    match woken {
        Some(Ok(())) => {}
        // The scheduler was dropped while we were parked
        Some(Err(_)) => panic::resume_unwind(Box::new(Shutdown)),
        None => panic!("suspend called outside a task thread"),
    }
}

/// Whether the caller is running on a task thread.
pub(crate) fn in_task_context() -> bool {
    WAKEUP.with(|w| w.borrow().is_some())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use super::*;

    static STARTED: AtomicBool = AtomicBool::new(false);

    fn marks_start() -> ! {
        STARTED.store(true, Ordering::SeqCst);
        loop {
            thread::park();
        }
    }

    #[test]
    fn test_spawned_thread_waits_for_first_wakeup() {
        let kernel = KernelContext::new().unwrap();
        let wakeup = spawn_task_thread(marks_start, MIN_THREAD_STACK, &kernel).unwrap();

        thread::sleep(Duration::from_millis(50));
        assert!(!STARTED.load(Ordering::SeqCst));

        // Never woken: the thread exits without running the entry
        drop(wakeup);
        thread::sleep(Duration::from_millis(50));
        assert!(!STARTED.load(Ordering::SeqCst));
    }

    fn never_runs() -> ! {
        unreachable!()
    }

    #[test]
    fn test_seeding_leaves_thread_unspawned() {
        let stack: &'static mut crate::task::TaskStack<64> =
            Box::leak(Box::new(crate::task::TaskStack::new()));
        let context = TaskContext::seed(stack.into(), never_runs).unwrap();
        assert!(context.wakeup.is_none());
        assert_eq!(context.state(), ContextState::Seeded);
        assert_eq!(context.stack_size, MIN_THREAD_STACK);
    }

    #[test]
    fn test_cpu_is_claimed_once_per_thread() {
        let first = KernelContext::new().unwrap();
        assert!(matches!(
            KernelContext::new(),
            Err(KernelError::SchedulerActive)
        ));
        drop(first);

        let second = KernelContext::new();
        assert!(second.is_ok());
    }
}
