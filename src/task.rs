//! # Task Control Record
//!
//! A task is an infinite-loop function with a private stack. Its record holds
//! the stack bounds, the stack pointer saved at its last suspension and the
//! entry point. Records are shared with the scheduler by reference, so they
//! must outlive it: declare them `static` (or leak them) on target.
//!
//! ```ignore
//! static BLINK: Task = Task::new();
//! static BLINK_STACK: Stack<64> = Stack::new();
//!
//! kernel::task_initialize(&BLINK, blink, BLINK_STACK.take().unwrap());
//! ```
//!
//! A record is only ever pointed at memory through the kernel's registration
//! path, which demands stacks that outlive the scheduler. Re-pointing a
//! record at a shorter-lived buffer does not compile:
//!
//! ```compile_fail
//! use miros::Task;
//!
//! extern "C" fn body() -> ! {
//!     loop {}
//! }
//!
//! static T: Task = Task::new();
//! let mut local = [0u32; 64];
//! let _ = T.prepare(body, &mut local);
//! ```

use core::cell::UnsafeCell;
use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};

use crate::config::STACK_PAINT;
use crate::context::{self, FrameSeed};
use crate::error::Result;

/// Task body. Runs forever; it is preempted, never returns.
pub type TaskEntry = extern "C" fn() -> !;

// ---------------------------------------------------------------------------
// Task Control Record
// ---------------------------------------------------------------------------

/// Task Control Record.
///
/// Every field is atomic so a `static` record needs no `unsafe impl Sync`.
/// Only the context builder and the context-switch routine write them.
pub struct Task {
    /// Lowest usable stack word, after alignment.
    stack_base: AtomicPtr<u32>,
    /// One past the highest usable stack word, after alignment.
    stack_limit: AtomicPtr<u32>,
    /// PSP at the instant the task was last suspended.
    saved_stack_pointer: AtomicPtr<u32>,
    /// Address of the task body, 0 until prepared.
    entry: AtomicUsize,
}

impl Task {
    /// An unprepared record, usable in `static` initializers.
    pub const fn new() -> Self {
        Self {
            stack_base: AtomicPtr::new(ptr::null_mut()),
            stack_limit: AtomicPtr::new(ptr::null_mut()),
            saved_stack_pointer: AtomicPtr::new(ptr::null_mut()),
            entry: AtomicUsize::new(0),
        }
    }

    /// Build the initial context for `entry` inside `stack` and record it.
    ///
    /// Fails with [`KernelError::DegenerateStack`](crate::error::KernelError)
    /// when `stack` cannot hold the initial frame.
    ///
    /// The record keeps raw pointers into `stack`, so the caller must keep it
    /// alive for as long as the record can be dispatched.
    pub(crate) fn prepare(&self, entry: TaskEntry, stack: &mut [u32]) -> Result<()> {
        let addr = entry as usize;
        let ctx = context::build(stack, addr as u32, &FrameSeed::DEFAULT)?;

        self.stack_base.store(ctx.stack_base, Ordering::Relaxed);
        self.stack_limit.store(ctx.stack_limit, Ordering::Relaxed);
        self.saved_stack_pointer.store(ctx.stack_pointer, Ordering::Relaxed);
        self.entry.store(addr, Ordering::Relaxed);
        Ok(())
    }

    /// Whether an initial context has been built for this record.
    #[inline]
    pub fn is_prepared(&self) -> bool {
        self.entry.load(Ordering::Relaxed) != 0
    }

    #[inline]
    pub fn entry(&self) -> usize {
        self.entry.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn stack_base(&self) -> *mut u32 {
        self.stack_base.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn stack_limit(&self) -> *mut u32 {
        self.stack_limit.load(Ordering::Relaxed)
    }

    /// Usable stack words after alignment.
    pub fn stack_words(&self) -> usize {
        (self.stack_limit() as usize - self.stack_base() as usize) / core::mem::size_of::<u32>()
    }

    #[inline]
    pub fn saved_stack_pointer(&self) -> *mut u32 {
        self.saved_stack_pointer.load(Ordering::Relaxed)
    }

    /// Record where the task's context was saved.
    ///
    /// # Safety
    /// `sp` must lie inside this task's stack and point at a complete saved
    /// frame, since the next resume pops from it.
    pub(crate) unsafe fn set_saved_stack_pointer(&self, sp: *mut u32) {
        self.saved_stack_pointer.store(sp, Ordering::Relaxed);
    }

    /// Words at the bottom of the stack still holding the paint pattern.
    ///
    /// A lower bound on how much stack the task has never touched.
    /// Meaningless if painting is disabled.
    ///
    /// # Safety
    /// Reads the task's stack while it may be live. Call it from a context
    /// the task cannot preempt, or accept a stale answer.
    pub unsafe fn unused_stack_words(&self) -> usize {
        let base = self.stack_base();
        let words = self.stack_words();
        (0..words)
            .take_while(|&i| ptr::read_volatile(base.add(i)) == STACK_PAINT)
            .count()
    }
}

impl Default for Task {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Stack memory
// ---------------------------------------------------------------------------

/// A `static`-friendly block of task stack memory.
///
/// Hands out its words exactly once, which keeps two tasks from sharing it.
/// The contents need not be 8-byte aligned; the context builder trims the
/// ends.
pub struct Stack<const WORDS: usize> {
    mem: UnsafeCell<[u32; WORDS]>,
    taken: AtomicBool,
}

// SAFETY: the memory is only reachable through the single `&mut` that
// `take` returns.
unsafe impl<const WORDS: usize> Sync for Stack<WORDS> {}

impl<const WORDS: usize> Stack<WORDS> {
    pub const fn new() -> Self {
        Self {
            mem: UnsafeCell::new([0; WORDS]),
            taken: AtomicBool::new(false),
        }
    }

    /// Claim the memory. Returns `None` if it was already claimed.
    pub fn take(&'static self) -> Option<&'static mut [u32]> {
        if self.taken.swap(true, Ordering::AcqRel) {
            return None;
        }
        // SAFETY: `taken` guarantees this is the only reference ever made.
        Some(unsafe { &mut *self.mem.get() })
    }
}

impl<const WORDS: usize> Default for Stack<WORDS> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
