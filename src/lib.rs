//! # MiROS: Minimal Real-time Operating System
//!
//! A preemptive, single-core, round-robin kernel for ARM Cortex-M3
//! microcontrollers.
//!
//! ## Overview
//!
//! Tasks are infinite loops with private stacks. Every SysTick hands the CPU
//! to the next task in registration order; there are no priorities and no
//! blocking primitives. Control only leaves a task inside the PendSV
//! context-switch routine.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    Application Tasks                    │
//! ├────────────────────────────────────────────────────────┤
//! │                 Kernel API (kernel.rs)                  │
//! │  initialize() · task_initialize() · start() · tick_hook()│
//! ├──────────────┬────────────────────┬───────────────────┤
//! │  Scheduler   │   Context Builder  │  Sync             │
//! │  scheduler.rs│   context.rs       │  sync.rs          │
//! │  ─ add_task()│   ─ build()        │  ─ Shared<T>      │
//! │  ─ get_task()│   ─ frame slots    │                   │
//! ├──────────────┴────────────────────┴───────────────────┤
//! │              Task Model (task.rs)                       │
//! │        Task (control record) · Stack<N>                 │
//! ├────────────────────────────────────────────────────────┤
//! │   Arch Port (arch/cortex_m3.rs · arch/sim.rs on host)   │
//! │        PendSV · SysTick · priorities · simulator        │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Memory Model
//!
//! - **No heap**: the registry is a fixed `[Option<&Task>; MAX_TASKS]`
//! - **Caller-owned stacks**: `static` [`task::Stack`] blocks or leaked memory
//! - **One kernel instance**: a single [`kernel::KernelState`] behind a
//!   critical section

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod log;

pub mod arch;
pub mod config;
pub mod context;
pub mod error;
pub mod kernel;
pub mod scheduler;
pub mod sync;
pub mod task;

pub use error::KernelError;
pub use kernel::KernelState;
pub use task::{Stack, Task, TaskEntry};
