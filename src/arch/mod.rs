//! # Architecture Abstraction Layer
//!
//! Hardware boundary for the kernel. Bare-metal ARM builds get the
//! Cortex-M3 port; every other target gets a register-level simulator so the
//! kernel can be exercised on the host.

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod cortex_m3;
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub use cortex_m3::{request_context_switch, wait_for_interrupt};

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub mod sim;
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub use sim::{request_context_switch, wait_for_interrupt};
