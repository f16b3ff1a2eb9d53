//! # Host Simulator Port
//!
//! Models just enough of an ARMv7-M core to run the context-switch protocol
//! on the host: a register file, the process stack pointer, hardware
//! stacking on exception entry and unstacking on exception return, and the
//! PendSV pending bit.
//!
//! Before the first switch the simulated thread runs on the main stack,
//! which is not modelled, so exception entry stacks nothing while `psp` is
//! null. Exception return always unstacks from `psp`, as EXC_RETURN
//! `0xFFFFFFFD` does on hardware.

use core::ptr;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::context::{slot, ExecutionContext, HW_FRAME_WORDS, SW_FRAME_WORDS};

/// Simulated PENDSVSET bit.
static SWITCH_PENDING: AtomicBool = AtomicBool::new(false);

/// Pend the context-switch routine.
#[inline]
pub fn request_context_switch() {
    SWITCH_PENDING.store(true, Ordering::Release);
}

/// Clear the pending bit, returning whether it was set.
#[inline]
pub fn take_pending_switch() -> bool {
    SWITCH_PENDING.swap(false, Ordering::AcqRel)
}

#[inline]
pub fn wait_for_interrupt() {
    core::hint::spin_loop();
}

/// Order the context-switch routine pushes the software group in.
const SW_PUSH_ORDER: [usize; SW_FRAME_WORDS] = [7, 4, 5, 6, 8, 9, 10, 11];

/// Offsets of R0–R3, R12, LR, PC, xPSR inside the hardware frame.
const HW_R0: usize = slot::R0 - SW_FRAME_WORDS;
const HW_R12: usize = slot::R12 - SW_FRAME_WORDS;
const HW_LR: usize = slot::LR - SW_FRAME_WORDS;
const HW_PC: usize = slot::PC - SW_FRAME_WORDS;
const HW_XPSR: usize = slot::XPSR - SW_FRAME_WORDS;

/// A simulated core.
#[derive(Debug)]
pub struct SimCpu {
    /// R0–R12.
    pub r: [u32; 13],
    pub lr: u32,
    pub pc: u32,
    pub xpsr: u32,
    /// Process stack pointer, null while thread mode is on the main stack.
    pub psp: *mut u32,
}

impl SimCpu {
    pub const fn new() -> Self {
        Self {
            r: [0; 13],
            lr: 0,
            pc: 0,
            xpsr: 0,
            psp: ptr::null_mut(),
        }
    }

    /// Hardware exception entry: push R0–R3, R12, LR, PC, xPSR.
    ///
    /// # Safety
    /// A non-null `psp` must have [`HW_FRAME_WORDS`] writable words below it.
    pub unsafe fn exception_entry(&mut self) {
        if self.psp.is_null() {
            return;
        }
        let sp = self.psp.sub(HW_FRAME_WORDS);
        for i in 0..4 {
            sp.add(HW_R0 + i).write(self.r[i]);
        }
        sp.add(HW_R12).write(self.r[12]);
        sp.add(HW_LR).write(self.lr);
        sp.add(HW_PC).write(self.pc);
        sp.add(HW_XPSR).write(self.xpsr);
        self.psp = sp;
    }

    /// Exception return to thread mode on the process stack.
    ///
    /// # Safety
    /// `psp` must point at a hardware frame.
    pub unsafe fn exception_return(&mut self) {
        let sp = self.psp;
        for i in 0..4 {
            self.r[i] = sp.add(HW_R0 + i).read();
        }
        self.r[12] = sp.add(HW_R12).read();
        self.lr = sp.add(HW_LR).read();
        self.pc = sp.add(HW_PC).read();
        self.xpsr = sp.add(HW_XPSR).read();
        self.psp = sp.add(HW_FRAME_WORDS);
    }
}

impl Default for SimCpu {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext for SimCpu {
    unsafe fn capture(&mut self) -> *mut u32 {
        let mut sp = self.psp;
        for reg in SW_PUSH_ORDER {
            sp = sp.sub(1);
            sp.write(self.r[reg]);
        }
        self.psp = sp;
        sp
    }

    unsafe fn restore(&mut self, sp: *mut u32) {
        let mut sp = sp;
        for reg in SW_PUSH_ORDER.iter().rev() {
            self.r[*reg] = sp.read();
            sp = sp.add(1);
        }
        self.psp = sp;
    }
}
