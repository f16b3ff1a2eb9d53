//! # Cortex-M3 Port Layer
//!
//! Hardware-specific code for the ARMv7-M (Thumb-2) processor: the PendSV
//! context switch, the SysTick tick source, and handler priorities.
//!
//! ## Context Switch Mechanism
//!
//! Tasks run in Thread mode on PSP; handlers run on MSP. On exception entry
//! the hardware stacks R0–R3, R12, LR, PC and xPSR onto the task's PSP.
//! `PendSV` pushes the rest (R7, R4–R6, R8–R11, in that order) and hands the
//! resulting PSP to the kernel, then pops the same group from the next task
//! and returns with EXC_RETURN `0xFFFFFFFD`. The word order must match
//! [`crate::context::slot`].
//!
//! ## Interrupt Priorities
//!
//! SysTick and PendSV share the lowest priority (0xFF), so neither can
//! preempt the other and PendSV tail-chains after the tick that armed it.

use core::arch::naked_asm;

use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::{SCB, SYST};
use cortex_m_rt::exception;

use crate::config::SYSTICK_RELOAD;
use crate::error::fatal;
use crate::kernel;

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// Configure SysTick to fire at `TICK_HZ` from the core clock.
pub fn configure_systick(syst: &mut SYST) {
    syst.set_reload(SYSTICK_RELOAD);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

/// Put PendSV and SysTick at the lowest priority.
pub fn set_interrupt_priorities(scb: &mut SCB) {
    // SAFETY: lowering system handler priorities cannot break a priority
    // based critical section, the kernel's sections use PRIMASK.
    unsafe {
        scb.set_priority(SystemHandler::PendSV, 0xFF);
        scb.set_priority(SystemHandler::SysTick, 0xFF);
    }
}

/// Pend the context-switch routine (ICSR.PENDSVSET).
#[inline]
pub fn request_context_switch() {
    SCB::set_pendsv();
}

#[inline]
pub fn wait_for_interrupt() {
    cortex_m::asm::wfi();
}

// ---------------------------------------------------------------------------
// SysTick handler
// ---------------------------------------------------------------------------

#[exception]
fn SysTick() {
    kernel::tick_hook();
}

// ---------------------------------------------------------------------------
// PendSV handler (context switch)
// ---------------------------------------------------------------------------

/// PendSV exception handler: performs the context switch.
///
/// ## Sequence
/// 1. If a task is running, push its R7, R4–R6, R8–R11 onto its PSP and
///    record the new PSP in its record
/// 2. Ask the kernel for the stack pointer of the task to resume
/// 3. Pop R11–R8, R6–R4, R7 from it and load PSP
/// 4. Return to Thread mode on PSP; hardware unstacks the rest
///
/// The Rust helpers it calls follow the AAPCS and preserve R4–R11, so the
/// task's registers survive each `bl` untouched.
///
/// # Safety
/// Invoked only by the NVIC as the PendSV vector.
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        // --- Switch out the running task, if any ---
        "bl {is_running}",
        "cbz r0, 1f",
        "mrs r0, psp",
        "str r7, [r0, #-4]!",
        "str r4, [r0, #-4]!",
        "str r5, [r0, #-4]!",
        "str r6, [r0, #-4]!",
        "str r8, [r0, #-4]!",
        "str r9, [r0, #-4]!",
        "str r10, [r0, #-4]!",
        "str r11, [r0, #-4]!",
        "bl {suspend}",

        // --- Switch in the next task ---
        "1:",
        "bl {resume}",
        "ldr r11, [r0], #4",
        "ldr r10, [r0], #4",
        "ldr r9, [r0], #4",
        "ldr r8, [r0], #4",
        "ldr r6, [r0], #4",
        "ldr r5, [r0], #4",
        "ldr r4, [r0], #4",
        "ldr r7, [r0], #4",
        "msr psp, r0",

        // Return to Thread mode, process stack
        "ldr lr, ={exc_return}",
        "bx lr",

        is_running = sym is_running,
        suspend = sym suspend_running,
        resume = sym resume_next,
        exc_return = const crate::config::EXC_RETURN_THREAD_PSP,
    );
}

/// Returns 1 when a task was running before this switch.
extern "C" fn is_running() -> u32 {
    kernel::with_kernel(|k| k.running().is_some()) as u32
}

/// Records the running task's saved PSP. Called from PendSV.
///
/// # Safety
/// `sp` is the PSP after pushing the software frame of the running task.
unsafe extern "C" fn suspend_running(sp: *mut u32) {
    kernel::with_kernel(|k| unsafe { k.suspend(sp) });
}

/// Hands over to the next task and returns the PSP to restore.
/// Called from PendSV.
extern "C" fn resume_next() -> *mut u32 {
    match kernel::with_kernel(|k| k.resume()) {
        Ok(sp) => sp,
        Err(e) => fatal(e),
    }
}
