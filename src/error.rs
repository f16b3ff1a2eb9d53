//! # Kernel Errors
//!
//! Every error here is a precondition violation. The layered API
//! (`Scheduler`, `KernelState`, the context builder) returns them so they can
//! be tested; the global [`kernel`](crate::kernel) API treats them as fatal.

use core::fmt;

/// Precondition violations detected by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KernelError {
    /// The task registry already holds `MAX_TASKS` records.
    CapacityExceeded,
    /// A task was requested before any task was registered.
    NoTasksRegistered,
    /// The stack memory cannot hold the initial frame once aligned.
    DegenerateStack,
    /// A task was registered after the scheduler started.
    AlreadyStarted,
    /// The record is already in the registry, or is the idle task.
    DuplicateTask,
    /// The context-switch routine ran with neither a running nor a next task.
    NoRunnableTask,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::CapacityExceeded => write!(f, "task registry is full"),
            KernelError::NoTasksRegistered => write!(f, "no tasks registered"),
            KernelError::DegenerateStack => write!(f, "stack too small for the initial frame"),
            KernelError::AlreadyStarted => write!(f, "scheduler already started"),
            KernelError::DuplicateTask => write!(f, "task already registered"),
            KernelError::NoRunnableTask => write!(f, "no task to switch to"),
        }
    }
}

pub type Result<T> = core::result::Result<T, KernelError>;

/// Report a kernel error and halt.
///
/// Continuing with corrupted scheduler state could jump to an undefined
/// address, so there is no recovery path.
#[cold]
pub fn fatal(err: KernelError) -> ! {
    error!("kernel fatal: {}", err);
    panic!("kernel fatal: {}", err)
}
