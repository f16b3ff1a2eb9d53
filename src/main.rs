//! # MiROS Demo Firmware
//!
//! Three busy tasks on an STM32F103, each given one 1 ms tick in turn. The
//! core stays on its 8 MHz reset clock, matching `config::SYSTEM_CLOCK_HZ`.
//! Build with `cargo build --release --features demo --target thumbv7m-none-eabi`.
//!
//! | Task  | Stack     | Behavior                |
//! |-------|-----------|-------------------------|
//! | `foo` | 64 words  | Counts forever          |
//! | `bar` | 64 words  | Counts forever          |
//! | `ham` | 64 words  | Counts forever          |
//!
//! Attach a debugger and watch the three counters advance together.

#![no_std]
#![no_main]

use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m_rt::entry;
use panic_halt as _;

use miros::kernel;
use miros::{Stack, Task};

const STACK_WORDS: usize = 64;

static FOO: Task = Task::new();
static BAR: Task = Task::new();
static HAM: Task = Task::new();

static FOO_STACK: Stack<STACK_WORDS> = Stack::new();
static BAR_STACK: Stack<STACK_WORDS> = Stack::new();
static HAM_STACK: Stack<STACK_WORDS> = Stack::new();

static FOO_COUNT: AtomicU32 = AtomicU32::new(0);
static BAR_COUNT: AtomicU32 = AtomicU32::new(0);
static HAM_COUNT: AtomicU32 = AtomicU32::new(0);

fn count_forever(counter: &AtomicU32) -> ! {
    loop {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

extern "C" fn foo() -> ! {
    count_forever(&FOO_COUNT)
}

extern "C" fn bar() -> ! {
    count_forever(&BAR_COUNT)
}

extern "C" fn ham() -> ! {
    count_forever(&HAM_COUNT)
}

#[entry]
fn main() -> ! {
    let cp = cortex_m::Peripherals::take().unwrap();

    kernel::initialize();
    kernel::task_initialize(&FOO, foo, FOO_STACK.take().unwrap());
    kernel::task_initialize(&BAR, bar, BAR_STACK.take().unwrap());
    kernel::task_initialize(&HAM, ham, HAM_STACK.take().unwrap());

    // Start the scheduler, does not return
    kernel::start(cp)
}
