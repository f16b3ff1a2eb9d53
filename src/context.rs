//! # Execution Context
//!
//! Layout of a suspended task's saved context and the builder that fakes one
//! for a task that has never run, so the context-switch routine can enter a
//! fresh task exactly like a preempted one.
//!
//! ## Frame Layout (top = high address, stack grows down)
//!
//! ```text
//! [Hardware stacked frame]      popped by exception return
//!   xPSR  (DEFAULT_PSR)         +15
//!   PC    (task entry point)    +14
//!   LR                          +13
//!   R12                         +12
//!   R3                          +11
//!   R2                          +10
//!   R1                          +9
//!   R0                          +8
//! [Software saved frame]        popped by the context-switch routine
//!   R7    (&R7 + 1 word)        +7
//!   R4                          +6
//!   R5                          +5
//!   R6                          +4
//!   R8                          +3
//!   R9                          +2
//!   R10                         +1
//!   R11                         +0   <- saved_stack_pointer
//! [Painted with STACK_PAINT down to the aligned base]
//! ```
//!
//! Offsets are in words from the saved stack pointer. The hardware half is
//! the ARMv7-M exception frame; the software half must match the order the
//! `PendSV` handler pushes and pops.

use crate::config::{DEFAULT_PSR, PAINT_STACKS, STACK_ALIGNMENT, STACK_PAINT};
use crate::error::{KernelError, Result};

/// Word offsets inside a saved frame, relative to the saved stack pointer.
pub mod slot {
    pub const R11: usize = 0;
    pub const R10: usize = 1;
    pub const R9: usize = 2;
    pub const R8: usize = 3;
    pub const R6: usize = 4;
    pub const R5: usize = 5;
    pub const R4: usize = 6;
    pub const R7: usize = 7;
    pub const R0: usize = 8;
    pub const R1: usize = 9;
    pub const R2: usize = 10;
    pub const R3: usize = 11;
    pub const R12: usize = 12;
    pub const LR: usize = 13;
    pub const PC: usize = 14;
    pub const XPSR: usize = 15;
}

/// Words pushed by the hardware on exception entry.
pub const HW_FRAME_WORDS: usize = 8;

/// Words pushed by the context-switch routine.
pub const SW_FRAME_WORDS: usize = 8;

/// Size of a complete saved context.
pub const FRAME_WORDS: usize = HW_FRAME_WORDS + SW_FRAME_WORDS;

const WORD_BYTES: usize = core::mem::size_of::<u32>();

/// Register seed values for a context that has never run.
///
/// None of them matter to the task, which starts at its entry point with
/// no live registers. They are distinct so a stack dump is easy to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSeed {
    pub xpsr: u32,
    pub lr: u32,
    pub r12: u32,
    pub r3: u32,
    pub r2: u32,
    pub r1: u32,
    pub r0: u32,
    pub r4: u32,
    pub r5: u32,
    pub r6: u32,
    pub r8: u32,
    pub r9: u32,
    pub r10: u32,
    pub r11: u32,
    /// Pattern for the free words below the frame, `None` to leave them.
    pub paint: Option<u32>,
}

impl FrameSeed {
    pub const DEFAULT: Self = Self {
        xpsr: DEFAULT_PSR,
        lr: 0x1111_1111,
        r12: 0x1201_1012,
        r3: 0x0301_1030,
        r2: 0x0201_1020,
        r1: 0x0101_1010,
        r0: 0xDEAD_B00F,
        r4: 0xDEAD_B44F,
        r5: 0xDEAD_B55F,
        r6: 0xDEAD_B66F,
        r8: 0xDEAD_B88F,
        r9: 0xDEAD_B99F,
        r10: 0xDEAD_BAAF,
        r11: 0xDEAD_BBBF,
        paint: if PAINT_STACKS { Some(STACK_PAINT) } else { None },
    };
}

impl Default for FrameSeed {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Result of building an initial context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitialContext {
    /// Lowest usable address, aligned up.
    pub stack_base: *mut u32,
    /// One past the highest usable address, aligned down.
    pub stack_limit: *mut u32,
    /// Where the context-switch routine finds the saved frame.
    pub stack_pointer: *mut u32,
    /// Usable words between `stack_base` and `stack_limit`.
    pub words: usize,
}

/// Platform register save/restore.
///
/// Implemented per target. The kernel only composes these two halves; it
/// never names a register.
pub trait ExecutionContext {
    /// Push the software-saved register group of the task being suspended
    /// onto its own stack and return the resulting stack pointer.
    ///
    /// # Safety
    /// The current process stack must belong to the task being suspended and
    /// have room for [`SW_FRAME_WORDS`] more words.
    unsafe fn capture(&mut self) -> *mut u32;

    /// Make `sp` the process stack and pop the software-saved register group
    /// from it. The hardware group is restored on exception return.
    ///
    /// # Safety
    /// `sp` must point at a complete frame, either built by [`build`] or
    /// returned by [`capture`](Self::capture).
    unsafe fn restore(&mut self, sp: *mut u32);
}

/// Sub-slice of `stack` whose bounds are aligned to [`STACK_ALIGNMENT`].
fn aligned_region(stack: &mut [u32]) -> &mut [u32] {
    let start = stack.as_ptr() as usize;
    let end = start + stack.len() * WORD_BYTES;
    let aligned_start = (start + STACK_ALIGNMENT - 1) & !(STACK_ALIGNMENT - 1);
    let aligned_end = end & !(STACK_ALIGNMENT - 1);
    if aligned_end <= aligned_start {
        return &mut stack[..0];
    }
    let lo = (aligned_start - start) / WORD_BYTES;
    let hi = lo + (aligned_end - aligned_start) / WORD_BYTES;
    &mut stack[lo..hi]
}

/// Build the initial context for a task entered at address `pc`.
///
/// Returns [`KernelError::DegenerateStack`] if, after alignment, the stack
/// cannot hold [`FRAME_WORDS`] words.
pub fn build(stack: &mut [u32], pc: u32, seed: &FrameSeed) -> Result<InitialContext> {
    let region = aligned_region(stack);
    let words = region.len();
    if words < FRAME_WORDS {
        return Err(KernelError::DegenerateStack);
    }

    let bounds = region.as_mut_ptr_range();
    let sp_index = words - FRAME_WORDS;
    let (free, frame) = region.split_at_mut(sp_index);

    frame[slot::XPSR] = seed.xpsr;
    frame[slot::PC] = pc;
    frame[slot::LR] = seed.lr;
    frame[slot::R12] = seed.r12;
    frame[slot::R3] = seed.r3;
    frame[slot::R2] = seed.r2;
    frame[slot::R1] = seed.r1;
    frame[slot::R0] = seed.r0;

    // R7 mirrors the stack top for frame-pointer based prologues.
    let above_r7 = frame[slot::R7 + 1..].as_ptr() as usize;
    frame[slot::R7] = above_r7 as u32;
    frame[slot::R4] = seed.r4;
    frame[slot::R5] = seed.r5;
    frame[slot::R6] = seed.r6;
    frame[slot::R8] = seed.r8;
    frame[slot::R9] = seed.r9;
    frame[slot::R10] = seed.r10;
    frame[slot::R11] = seed.r11;

    if let Some(pattern) = seed.paint {
        free.fill(pattern);
    }

    Ok(InitialContext {
        stack_base: bounds.start,
        stack_limit: bounds.end,
        stack_pointer: frame.as_mut_ptr(),
        words,
    })
}
