//! # Single-Core Shared State
//!
//! The kernel never runs two contexts at once: the dispatcher and the single
//! resumed task hand the CPU back and forth explicitly. Shared kernel state
//! therefore needs no locks and no interrupt masking, just a cell that may
//! live in a `static`.

use core::cell::UnsafeCell;

/// Interior-mutable storage for state that exactly one execution context
/// touches at a time.
///
/// # Safety
/// Callers of the accessors must guarantee that no other context is inside
/// an accessor for the same cell. In this kernel that holds because only the
/// running context (dispatcher or task) ever executes.
pub(crate) struct KernelCell<T>(UnsafeCell<T>);

// Safety: contexts never run concurrently; see the type docs. On hosted
// builds the context threads are serialized by a channel handoff, which
// also provides the happens-before edges.
unsafe impl<T> Sync for KernelCell<T> {}

impl<T: Copy> KernelCell<T> {
    pub(crate) const fn new(value: T) -> Self {
        Self(UnsafeCell::new(value))
    }

    /// Reads the current value.
    ///
    /// # Safety
    /// See the type-level requirements.
    #[inline]
    pub(crate) unsafe fn get(&self) -> T {
        unsafe { *self.0.get() }
    }

    /// Replaces the current value, returning the old one.
    ///
    /// # Safety
    /// See the type-level requirements.
    #[inline]
    pub(crate) unsafe fn replace(&self, value: T) -> T {
        unsafe { core::ptr::replace(self.0.get(), value) }
    }
}
