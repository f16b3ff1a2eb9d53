//! # Synchronization Primitives
//!
//! Interrupt-safe access to state shared between thread mode and the two
//! kernel handlers. Interrupts are masked for the duration of each access.
//!
//! On target the critical section comes from `cortex-m`'s single-core
//! implementation; host tests link the `std` implementation instead.

use core::cell::RefCell;

use critical_section::{CriticalSection, Mutex};

/// Execute a closure within a critical section (interrupts disabled).
///
/// Keep critical sections as short as possible to minimize interrupt latency.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(CriticalSection<'_>) -> R,
{
    critical_section::with(f)
}

/// A value only reachable inside a critical section.
pub struct Shared<T> {
    inner: Mutex<RefCell<T>>,
}

impl<T> Shared<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(value)),
        }
    }

    /// Run `f` with exclusive access to the value.
    ///
    /// # Panics
    /// If `f` re-enters `lock` on the same value.
    pub fn lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        critical_section(|cs| f(&mut self.inner.borrow_ref_mut(cs)))
    }
}
