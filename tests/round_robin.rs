//! End-to-end context switching on the host simulator: each simulated tick
//! stacks the running task, switches, and unstacks the next one.

use core::ptr;

use miros::arch::sim::SimCpu;
use miros::config::{DEFAULT_PSR, MAX_TASKS};
use miros::{KernelError, KernelState, Task};

extern "C" fn alpha() -> ! {
    loop {
        core::hint::spin_loop();
    }
}

extern "C" fn beta() -> ! {
    loop {
        core::hint::spin_loop();
    }
}

extern "C" fn gamma() -> ! {
    loop {
        core::hint::spin_loop();
    }
}

fn leak_stack(words: usize) -> &'static mut [u32] {
    Box::leak(vec![0u32; words].into_boxed_slice())
}

/// One timer tick followed by the pended switch.
fn tick(kernel: &mut KernelState<'_>, cpu: &mut SimCpu) {
    kernel.tick().unwrap();
    unsafe {
        cpu.exception_entry();
        kernel.switch_context(cpu).unwrap();
        cpu.exception_return();
    }
}

#[test]
fn three_tasks_rotate_and_keep_their_registers() {
    let tasks = [Task::new(), Task::new(), Task::new()];
    let entries = [alpha as extern "C" fn() -> !, beta, gamma];

    let mut kernel = KernelState::new();
    kernel.initialize(None);
    for (task, entry) in tasks.iter().zip(entries) {
        kernel.task_initialize(task, entry, leak_stack(64)).unwrap();
    }

    let mut cpu = SimCpu::new();
    kernel.start().unwrap();
    unsafe {
        kernel.switch_context(&mut cpu).unwrap();
        cpu.exception_return();
    }

    // First rotation: every task enters fresh at its entry point, and
    // scribbles a signature into its registers before being preempted.
    for (i, task) in tasks.iter().enumerate() {
        assert!(ptr::eq(kernel.running().unwrap(), task));
        assert_eq!(cpu.pc, entries[i] as usize as u32);
        assert_eq!(cpu.xpsr, DEFAULT_PSR);
        assert_eq!(cpu.psp, task.stack_limit());

        let sig = 0x1000 * (i as u32 + 1);
        for (n, r) in cpu.r.iter_mut().enumerate() {
            *r = sig + n as u32;
        }
        cpu.lr = sig + 14;
        cpu.pc = sig + 15;
        tick(&mut kernel, &mut cpu);
    }

    // Later rotations: every task resumes exactly where it was preempted.
    for _round in 0..3 {
        for (i, task) in tasks.iter().enumerate() {
            assert!(ptr::eq(kernel.running().unwrap(), task));
            let sig = 0x1000 * (i as u32 + 1);
            for (n, r) in cpu.r.iter().enumerate() {
                assert_eq!(*r, sig + n as u32);
            }
            assert_eq!(cpu.lr, sig + 14);
            assert_eq!(cpu.pc, sig + 15);
            assert_eq!(cpu.psp, task.stack_limit());
            tick(&mut kernel, &mut cpu);
        }
    }
}

#[test]
fn single_task_keeps_the_cpu() {
    let only = Task::new();
    let mut kernel = KernelState::new();
    kernel.initialize(None);
    kernel.task_initialize(&only, alpha, leak_stack(32)).unwrap();

    let mut cpu = SimCpu::new();
    kernel.start().unwrap();
    unsafe {
        kernel.switch_context(&mut cpu).unwrap();
        cpu.exception_return();
    }
    cpu.r[5] = 0x5555;

    for _ in 0..100 {
        tick(&mut kernel, &mut cpu);
        assert!(ptr::eq(kernel.running().unwrap(), &only));
        assert_eq!(cpu.r[5], 0x5555);
    }
}

#[test]
fn full_registry_rotates_through_every_slot() {
    let tasks: Vec<Task> = (0..MAX_TASKS).map(|_| Task::new()).collect();
    let mut kernel = KernelState::new();
    kernel.initialize(None);
    for task in &tasks {
        kernel.task_initialize(task, alpha, leak_stack(24)).unwrap();
    }
    let extra = Task::new();
    assert_eq!(
        kernel.task_initialize(&extra, beta, leak_stack(24)),
        Err(KernelError::CapacityExceeded)
    );

    for _ in 0..2 {
        for task in &tasks {
            assert!(ptr::eq(kernel.tick().unwrap(), task));
        }
    }
}
