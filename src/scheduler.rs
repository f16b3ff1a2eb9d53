//! # Round-Robin Scheduler
//!
//! A fixed-capacity FIFO registry of task records plus a rotating cursor.
//! Insertion order is dispatch order; every registered task gets exactly one
//! tick per rotation, forever. There are no priorities and no removal.
//!
//! ```text
//!   tasks:  [ A ][ B ][ C ][    ][    ] ...   count = 3
//!             ▲
//!           cursor ── get_task() → A, cursor = 1
//! ```

use core::ptr;

use crate::error::{KernelError, Result};
use crate::task::Task;

/// Task registry with `N` slots.
///
/// Holds borrowed records; they must outlive the scheduler.
pub struct Scheduler<'a, const N: usize> {
    tasks: [Option<&'a Task>; N],
    count: usize,
    cursor: usize,
}

impl<'a, const N: usize> Scheduler<'a, N> {
    pub const fn new() -> Self {
        Self {
            tasks: [None; N],
            count: 0,
            cursor: 0,
        }
    }

    /// Empty the registry and rewind the cursor.
    pub fn initialize(&mut self) {
        self.tasks = [None; N];
        self.count = 0;
        self.cursor = 0;
    }

    /// Append `task` behind every previously added task.
    ///
    /// Returns the task's dispatch index.
    pub fn add_task(&mut self, task: &'a Task) -> Result<usize> {
        if self.is_full() {
            return Err(KernelError::CapacityExceeded);
        }
        let index = self.count;
        self.tasks[index] = Some(task);
        self.count += 1;
        Ok(index)
    }

    /// Return the task at the cursor and advance the cursor, wrapping at
    /// `count`.
    pub fn get_task(&mut self) -> Result<&'a Task> {
        if self.count == 0 {
            return Err(KernelError::NoTasksRegistered);
        }
        let task = self.tasks[self.cursor].ok_or(KernelError::NoTasksRegistered)?;
        self.cursor += 1;
        if self.cursor == self.count {
            self.cursor = 0;
        }
        Ok(task)
    }

    /// Whether this exact record is registered.
    pub fn contains(&self, task: &Task) -> bool {
        self.tasks[..self.count]
            .iter()
            .flatten()
            .any(|&registered| ptr::eq(registered, task))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.count >= N
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Index of the task the next `get_task` returns.
    #[inline]
    pub fn cursor(&self) -> usize {
        self.cursor
    }
}

impl<const N: usize> Default for Scheduler<'_, N> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
