//! # MiROS Configuration
//!
//! Compile-time constants governing the kernel.
//! All limits are fixed at compile time, with no dynamic allocation.

/// Capacity of the round-robin task registry.
pub const MAX_TASKS: usize = 32;

/// SysTick frequency in Hz. Each tick hands the CPU to the next task.
pub const TICK_HZ: u32 = 1000;

/// Core clock frequency in Hz.
///
/// STM32F103 out of reset: 8 MHz HSI, PLL off. Firmware that raises the
/// clock must change this to match, or ticks stretch by the same factor.
pub const SYSTEM_CLOCK_HZ: u32 = 8_000_000;

/// SysTick reload for one tick every `1 / TICK_HZ` seconds.
pub const SYSTICK_RELOAD: u32 = SYSTEM_CLOCK_HZ / TICK_HZ - 1;

/// Stack alignment in bytes required by the AAPCS at public interfaces.
pub const STACK_ALIGNMENT: usize = 8;

/// Words reserved for the kernel's idle task stack.
pub const IDLE_STACK_WORDS: usize = 64;

/// Initial xPSR for a task that has never run: Thumb state, carry set.
pub const DEFAULT_PSR: u32 = 0x2100_0000;

/// EXC_RETURN value for "return to Thread mode, use the process stack".
pub const EXC_RETURN_THREAD_PSP: u32 = 0xFFFF_FFFD;

/// Pattern painted over unused stack words. Diagnostic only.
pub const STACK_PAINT: u32 = 0xDEAD_BEEF;

/// Whether the context builder paints the free part of each stack.
/// Required for [`Task::unused_stack_words`](crate::task::Task::unused_stack_words)
/// to report anything useful.
pub const PAINT_STACKS: bool = true;
