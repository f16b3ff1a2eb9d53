//! # Kernel
//!
//! Kernel state, the context-switch trigger and executor, and the public
//! fail-fast API.
//!
//! All mutable kernel state lives in one [`KernelState`] value. Firmware uses
//! the global instance through the free functions below; tests build their
//! own and drive it with the host simulator.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset_handler (cortex-m-rt)
//!   └─► main()
//!         ├─► kernel::initialize()       ← Reset registry, prepare idle task
//!         ├─► kernel::task_initialize()  ← Build context + register (×N)
//!         └─► kernel::start()            ← No return
//!               ├─► Configure SysTick
//!               ├─► Set PendSV/SysTick priorities
//!               └─► Arm the first switch, then idle
//! ```
//!
//! ## Per-tick Pipeline
//!
//! ```text
//! SysTick ─► tick_hook() ─► KernelState::tick()  next = get_task()
//!                       └─► pend PendSV
//! PendSV  ─► suspend(sp) / resume() -> sp      running = next
//! ```

use core::ptr;

use crate::arch;
use crate::config::{IDLE_STACK_WORDS, MAX_TASKS};
use crate::context::ExecutionContext;
use crate::error::{fatal, KernelError, Result};
use crate::scheduler::Scheduler;
use crate::sync::Shared;
use crate::task::{Stack, Task, TaskEntry};

// ---------------------------------------------------------------------------
// Kernel state
// ---------------------------------------------------------------------------

/// Everything the kernel mutates.
///
/// ## Exclusive-access rules
///
/// - `next` is set only by [`tick`](Self::tick) and consumed only by
///   [`resume`](Self::resume)
/// - `running` is written only by [`resume`](Self::resume)
/// - the registry cursor advances only inside `tick`
/// - on target every access goes through one critical section, and the two
///   handlers share a priority so neither preempts the other
pub struct KernelState<'a> {
    scheduler: Scheduler<'a, MAX_TASKS>,
    idle: Option<&'a Task>,
    running: Option<&'a Task>,
    next: Option<&'a Task>,
    started: bool,
}

impl<'a> KernelState<'a> {
    pub const fn new() -> Self {
        Self {
            scheduler: Scheduler::new(),
            idle: None,
            running: None,
            next: None,
            started: false,
        }
    }

    /// Reset all kernel and scheduler state.
    ///
    /// `idle` is dispatched whenever no application task is registered; it
    /// must already be prepared.
    pub fn initialize(&mut self, idle: Option<&'a Task>) {
        debug_assert!(idle.is_none_or(Task::is_prepared));
        self.scheduler.initialize();
        self.idle = idle;
        self.running = None;
        self.next = None;
        self.started = false;
    }

    /// Build `task`'s initial context inside `stack` and append it to the
    /// registry. Returns its dispatch index.
    ///
    /// Each record is registered at most once per [`initialize`](Self::initialize);
    /// a second attempt is rejected before its context is touched.
    pub fn task_initialize(
        &mut self,
        task: &'a Task,
        entry: TaskEntry,
        stack: &'a mut [u32],
    ) -> Result<usize> {
        if self.started {
            return Err(KernelError::AlreadyStarted);
        }
        let is_idle = self.idle.is_some_and(|idle| ptr::eq(idle, task));
        if is_idle || self.scheduler.contains(task) {
            return Err(KernelError::DuplicateTask);
        }
        // Check before building so a rejected task leaves its memory alone.
        if self.scheduler.is_full() {
            return Err(KernelError::CapacityExceeded);
        }
        task.prepare(entry, stack)?;
        let index = self.scheduler.add_task(task)?;
        debug!("task {} registered, {} stack words", index, task.stack_words());
        Ok(index)
    }

    /// Begin scheduling: arm the first switch.
    ///
    /// The caller pends the context-switch routine afterwards.
    pub fn start(&mut self) -> Result<&'a Task> {
        self.started = true;
        info!("scheduler starting with {} tasks", self.scheduler.len());
        self.tick()
    }

    /// Context-switch trigger. Select the next task and stage it in `next`.
    ///
    /// Falls back to the idle task while the registry is empty. Never touches
    /// register state; the caller pends the executor.
    pub fn tick(&mut self) -> Result<&'a Task> {
        let task = match self.scheduler.get_task() {
            Ok(task) => task,
            Err(KernelError::NoTasksRegistered) => {
                let idle = self.idle.ok_or(KernelError::NoTasksRegistered)?;
                warn!("no tasks registered, dispatching idle");
                idle
            }
            Err(e) => return Err(e),
        };
        trace!("tick: next task at cursor {}", self.scheduler.cursor());
        self.next = Some(task);
        Ok(task)
    }

    /// Executor, first half: record where the running task's context was
    /// saved. No-op before the first switch.
    ///
    /// # Safety
    /// `sp` must be the running task's stack pointer right after its
    /// software register group was pushed.
    pub unsafe fn suspend(&mut self, sp: *mut u32) {
        if let Some(running) = self.running {
            running.set_saved_stack_pointer(sp);
        }
    }

    /// Executor, second half: make the staged task the running one and
    /// return the stack pointer to restore.
    ///
    /// Without a staged task the running task is resumed where it stopped.
    pub fn resume(&mut self) -> Result<*mut u32> {
        match self.next.take() {
            Some(next) => self.running = Some(next),
            None if self.started => error!("switch requested with no task staged"),
            None => {}
        }
        match self.running {
            Some(running) => Ok(running.saved_stack_pointer()),
            None => Err(KernelError::NoRunnableTask),
        }
    }

    /// Full context switch through a platform [`ExecutionContext`].
    ///
    /// # Safety
    /// `cpu`'s process stack must be the running task's stack (if one is
    /// running), with the hardware frame already stacked.
    pub unsafe fn switch_context<C: ExecutionContext>(&mut self, cpu: &mut C) -> Result<()> {
        if self.running.is_some() {
            let sp = cpu.capture();
            self.suspend(sp);
        }
        let sp = self.resume()?;
        cpu.restore(sp);
        Ok(())
    }

    /// Task currently executing, `None` before the first switch.
    #[inline]
    pub fn running(&self) -> Option<&'a Task> {
        self.running
    }

    /// Task staged by the last tick and not yet switched in.
    #[inline]
    pub fn next(&self) -> Option<&'a Task> {
        self.next
    }

    #[inline]
    pub fn scheduler(&self) -> &Scheduler<'a, MAX_TASKS> {
        &self.scheduler
    }

    #[inline]
    pub fn is_started(&self) -> bool {
        self.started
    }
}

impl Default for KernelState<'_> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Global kernel instance
// ---------------------------------------------------------------------------

/// The kernel instance used by the handlers.
static KERNEL: Shared<KernelState<'static>> = Shared::new(KernelState::new());

static IDLE_TASK: Task = Task::new();
static IDLE_STACK: Stack<IDLE_STACK_WORDS> = Stack::new();

/// Run `f` on the global kernel state inside a critical section.
pub(crate) fn with_kernel<R>(f: impl FnOnce(&mut KernelState<'static>) -> R) -> R {
    KERNEL.lock(f)
}

/// Idle task body.
extern "C" fn idle() -> ! {
    loop {
        arch::wait_for_interrupt();
    }
}

// ---------------------------------------------------------------------------
// Kernel API
// ---------------------------------------------------------------------------

/// Initialize the kernel.
///
/// Must be called before any other kernel function and before the tick
/// interrupt is enabled. Calling it again before [`start`] resets the
/// registry to the same empty state.
pub fn initialize() {
    // The idle stack is claimed once; later calls reuse the prepared record.
    if let Some(stack) = IDLE_STACK.take() {
        if let Err(e) = IDLE_TASK.prepare(idle, stack) {
            fatal(e);
        }
    }
    with_kernel(|k| k.initialize(Some(&IDLE_TASK)));
    info!("kernel initialized, {} task slots", MAX_TASKS);
}

/// Build a task's initial context and register it for dispatch.
///
/// Tasks are dispatched in the order they are registered.
///
/// # Panics
/// Fail-fast if the registry is full, the stack is too small, or the
/// scheduler has already started.
///
/// # Example
/// ```ignore
/// static BLINK: Task = Task::new();
/// static BLINK_STACK: Stack<64> = Stack::new();
///
/// kernel::task_initialize(&BLINK, blink, BLINK_STACK.take().unwrap());
/// ```
pub fn task_initialize(task: &'static Task, entry: TaskEntry, stack: &'static mut [u32]) {
    if let Err(e) = with_kernel(|k| k.task_initialize(task, entry, stack)) {
        fatal(e);
    }
}

/// Scheduler tick. Call once per timer period.
///
/// The kernel's own `SysTick` handler calls this on target.
pub fn tick_hook() {
    match with_kernel(|k| k.tick()) {
        Ok(_) => arch::request_context_switch(),
        Err(e) => fatal(e),
    }
}

fn arm_first_switch() {
    match with_kernel(|k| k.start()) {
        Ok(_) => arch::request_context_switch(),
        Err(e) => fatal(e),
    }
}

/// Start the scheduler. **Does not return.**
///
/// Configures SysTick and handler priorities, then pends the first switch.
/// PendSV fires as soon as interrupts are enabled and abandons the caller's
/// context for good.
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub fn start(mut core_peripherals: cortex_m::Peripherals) -> ! {
    arch::cortex_m3::configure_systick(&mut core_peripherals.SYST);
    arch::cortex_m3::set_interrupt_priorities(&mut core_peripherals.SCB);

    arm_first_switch();
    // SAFETY: kernel state is fully initialized; from here on the handlers
    // own the CPU.
    unsafe { cortex_m::interrupt::enable() };

    // Only reached if PendSV never runs.
    loop {
        arch::wait_for_interrupt();
    }
}

/// Host counterpart of `start`: arms the first switch and returns.
/// Drive it with [`service_pending_switch`].
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub fn start() {
    arm_first_switch();
}

/// Run the pended context switch on a simulated core, as PendSV would.
///
/// Returns `false` if no switch was pending.
///
/// # Safety
/// `cpu` must have been driven only by this function since [`start`], so its
/// process stack belongs to the running task.
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub unsafe fn service_pending_switch(cpu: &mut arch::sim::SimCpu) -> bool {
    if !arch::sim::take_pending_switch() {
        return false;
    }
    cpu.exception_entry();
    if let Err(e) = with_kernel(|k| k.switch_context(cpu)) {
        fatal(e);
    }
    cpu.exception_return();
    true
}

/// Task currently executing on the global kernel.
pub fn running_task() -> Option<&'static Task> {
    with_kernel(|k| k.running())
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::sim::SimCpu;
    use crate::context::slot;
    use serial_test::serial;

    extern "C" fn task_a() -> ! {
        loop {}
    }
    extern "C" fn task_b() -> ! {
        loop {}
    }
    extern "C" fn task_c() -> ! {
        loop {}
    }

    fn leak_stack(words: usize) -> &'static mut [u32] {
        Box::leak(vec![0u32; words].into_boxed_slice())
    }

    fn leak_task() -> &'static Task {
        Box::leak(Box::new(Task::new()))
    }

    #[test]
    fn test_tick_selects_in_registration_order() {
        let (a, b, c) = (leak_task(), leak_task(), leak_task());
        let mut k = KernelState::new();
        k.initialize(None);
        k.task_initialize(a, task_a, leak_stack(64)).unwrap();
        k.task_initialize(b, task_b, leak_stack(64)).unwrap();
        k.task_initialize(c, task_c, leak_stack(64)).unwrap();

        for want in [a, b, c, a, b, c] {
            let got = k.tick().unwrap();
            assert!(ptr::eq(got, want));
            assert!(ptr::eq(k.next().unwrap(), want));
        }
    }

    #[test]
    fn test_capacity_exceeded_leaves_stack_untouched() {
        let mut k = KernelState::new();
        k.initialize(None);
        for _ in 0..MAX_TASKS {
            k.task_initialize(leak_task(), task_a, leak_stack(16 + 2)).unwrap();
        }
        let spare = leak_stack(32);
        let spare_ptr = spare.as_ptr();
        assert_eq!(
            k.task_initialize(leak_task(), task_a, spare),
            Err(KernelError::CapacityExceeded)
        );
        let spare = unsafe { core::slice::from_raw_parts(spare_ptr, 32) };
        assert!(spare.iter().all(|&w| w == 0));
    }

    #[test]
    fn test_degenerate_stack_not_registered() {
        let mut k = KernelState::new();
        k.initialize(None);
        assert_eq!(
            k.task_initialize(leak_task(), task_a, leak_stack(4)),
            Err(KernelError::DegenerateStack)
        );
        assert!(k.scheduler().is_empty());
    }

    #[test]
    fn test_register_after_start_rejected() {
        let mut k = KernelState::new();
        k.initialize(None);
        k.task_initialize(leak_task(), task_a, leak_stack(32)).unwrap();
        k.start().unwrap();
        assert_eq!(
            k.task_initialize(leak_task(), task_b, leak_stack(32)),
            Err(KernelError::AlreadyStarted)
        );
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let a = leak_task();
        let mut k = KernelState::new();
        k.initialize(None);
        k.task_initialize(a, task_a, leak_stack(64)).unwrap();
        let sp = a.saved_stack_pointer();
        let limit = a.stack_limit();

        let other = leak_stack(64);
        let other_ptr = other.as_ptr();
        assert_eq!(
            k.task_initialize(a, task_b, other),
            Err(KernelError::DuplicateTask)
        );
        // The original context is left intact and the new stack untouched.
        assert_eq!(a.saved_stack_pointer(), sp);
        assert_eq!(a.stack_limit(), limit);
        assert_eq!(a.entry(), task_a as usize);
        let other = unsafe { core::slice::from_raw_parts(other_ptr, 64) };
        assert!(other.iter().all(|&w| w == 0));
        assert_eq!(k.scheduler().len(), 1);

        // A record still occupies one slot however often the cursor wraps.
        for _ in 0..3 {
            assert!(ptr::eq(k.tick().unwrap(), a));
        }
    }

    #[test]
    fn test_idle_task_cannot_be_registered() {
        let idle_task = leak_task();
        idle_task.prepare(idle, leak_stack(IDLE_STACK_WORDS)).unwrap();
        let mut k = KernelState::new();
        k.initialize(Some(idle_task));
        assert_eq!(
            k.task_initialize(idle_task, task_a, leak_stack(64)),
            Err(KernelError::DuplicateTask)
        );
        assert!(k.scheduler().is_empty());
    }

    #[test]
    fn test_reregistration_after_initialize_allowed() {
        let a = leak_task();
        let mut k = KernelState::new();
        k.initialize(None);
        k.task_initialize(a, task_a, leak_stack(64)).unwrap();
        k.initialize(None);
        assert_eq!(k.task_initialize(a, task_a, leak_stack(64)), Ok(0));
    }

    #[test]
    fn test_tick_without_tasks_or_idle_fails() {
        let mut k = KernelState::new();
        k.initialize(None);
        assert!(matches!(k.tick(), Err(KernelError::NoTasksRegistered)));
    }

    #[test]
    fn test_idle_dispatched_when_registry_empty() {
        let idle_task = leak_task();
        idle_task.prepare(idle, leak_stack(IDLE_STACK_WORDS)).unwrap();
        let mut k = KernelState::new();
        k.initialize(Some(idle_task));

        assert!(ptr::eq(k.start().unwrap(), idle_task));
        let mut cpu = SimCpu::new();
        unsafe {
            k.switch_context(&mut cpu).unwrap();
            cpu.exception_return();
        }
        assert!(ptr::eq(k.running().unwrap(), idle_task));
        assert_eq!(cpu.pc, idle as usize as u32);
    }

    #[test]
    fn test_resume_without_any_task_is_fatal_error() {
        let mut k = KernelState::new();
        assert_eq!(k.resume(), Err(KernelError::NoRunnableTask));
    }

    #[test]
    fn test_first_switch_only_resumes() {
        let a = leak_task();
        let mut k = KernelState::new();
        k.initialize(None);
        k.task_initialize(a, task_a, leak_stack(64)).unwrap();
        let initial_sp = a.saved_stack_pointer();

        // Tick before start: nothing running, so only the resume half runs.
        k.tick().unwrap();
        let mut cpu = SimCpu::new();
        unsafe {
            cpu.exception_entry();
            k.switch_context(&mut cpu).unwrap();
            cpu.exception_return();
        }
        assert_eq!(a.saved_stack_pointer(), initial_sp);
        assert_eq!(cpu.pc, task_a as usize as u32);
        assert_eq!(cpu.psp, a.stack_limit());
    }

    #[test]
    fn test_switch_without_next_resumes_running() {
        let a = leak_task();
        let b = leak_task();
        let mut k = KernelState::new();
        k.initialize(None);
        k.task_initialize(a, task_a, leak_stack(64)).unwrap();
        k.task_initialize(b, task_b, leak_stack(64)).unwrap();

        let mut cpu = SimCpu::new();
        k.start().unwrap();
        unsafe {
            k.switch_context(&mut cpu).unwrap();
            cpu.exception_return();
        }
        cpu.r[4] = 0x4444;
        cpu.pc = 0x0800_0AAA;

        // A spurious switch with nothing staged hands A back to itself.
        unsafe {
            cpu.exception_entry();
            k.switch_context(&mut cpu).unwrap();
            cpu.exception_return();
        }
        assert!(ptr::eq(k.running().unwrap(), a));
        assert_eq!(cpu.r[4], 0x4444);
        assert_eq!(cpu.pc, 0x0800_0AAA);
    }

    #[test]
    fn test_suspend_records_saved_pointer() {
        let a = leak_task();
        let mut k = KernelState::new();
        k.initialize(None);
        k.task_initialize(a, task_a, leak_stack(64)).unwrap();
        k.tick().unwrap();
        k.resume().unwrap();

        let frame_top = unsafe { a.stack_limit().sub(slot::XPSR + 1) };
        unsafe { k.suspend(frame_top) };
        assert_eq!(a.saved_stack_pointer(), frame_top);
    }

    fn snapshot(k: &KernelState<'_>) -> (usize, usize, bool, bool, bool) {
        (
            k.scheduler().len(),
            k.scheduler().cursor(),
            k.running().is_none(),
            k.next().is_none(),
            k.is_started(),
        )
    }

    #[test]
    fn test_initialize_twice_is_identical() {
        let mut k = KernelState::new();
        k.initialize(None);
        k.task_initialize(leak_task(), task_a, leak_stack(32)).unwrap();
        k.tick().unwrap();

        k.initialize(None);
        let first = snapshot(&k);
        k.initialize(None);
        let second = snapshot(&k);
        assert_eq!(first, (0, 0, true, true, false));
        assert_eq!(first, second);
    }

    // --- Global API ---

    #[test]
    #[serial]
    fn test_global_round_robin() {
        static A: Task = Task::new();
        static B: Task = Task::new();

        initialize();
        task_initialize(&A, task_a, leak_stack(64));
        task_initialize(&B, task_b, leak_stack(64));
        let _ = arch::sim::take_pending_switch();

        let mut cpu = SimCpu::new();
        start();
        assert!(unsafe { service_pending_switch(&mut cpu) });
        assert!(ptr::eq(running_task().unwrap(), &A));
        assert_eq!(cpu.pc, task_a as usize as u32);

        for want in [&B, &A, &B] {
            tick_hook();
            assert!(unsafe { service_pending_switch(&mut cpu) });
            assert!(ptr::eq(running_task().unwrap(), want));
        }
        assert!(!unsafe { service_pending_switch(&mut cpu) });
    }

    #[test]
    #[serial]
    fn test_global_idle_when_nothing_registered() {
        initialize();
        let _ = arch::sim::take_pending_switch();
        let mut cpu = SimCpu::new();
        start();
        assert!(unsafe { service_pending_switch(&mut cpu) });
        assert!(ptr::eq(running_task().unwrap(), &IDLE_TASK));
        assert_eq!(cpu.pc, idle as usize as u32);
    }

    #[test]
    #[serial]
    #[should_panic(expected = "kernel fatal: stack too small for the initial frame")]
    fn test_global_degenerate_stack_is_fatal() {
        static T: Task = Task::new();
        initialize();
        task_initialize(&T, task_a, leak_stack(3));
    }

    #[test]
    #[serial]
    #[should_panic(expected = "kernel fatal: task already registered")]
    fn test_global_duplicate_is_fatal() {
        static T: Task = Task::new();
        initialize();
        task_initialize(&T, task_a, leak_stack(64));
        task_initialize(&T, task_b, leak_stack(64));
    }

    #[test]
    #[serial]
    #[should_panic(expected = "kernel fatal: task registry is full")]
    fn test_global_capacity_is_fatal() {
        initialize();
        for _ in 0..=MAX_TASKS {
            task_initialize(leak_task(), task_a, leak_stack(18));
        }
    }
}
