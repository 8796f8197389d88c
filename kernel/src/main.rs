#![feature(allocator_api)]
#![feature(fn_align)]
#![feature(naked_functions)]
#![no_std]
#![no_main]

use core::arch::global_asm;

pub(crate) use rvos_kernel_params as param;

extern crate alloc;

mod console;
mod cpu;
mod error;
mod file;
mod fs;
mod interrupt;
mod klog;
mod memory;
mod proc;
mod start;
mod sync;
mod syscall;

global_asm!(
    r#"
        .section .text.entry
        .global _entry
    _entry:
        # set up a stack for machine-mode start().
        la sp, {stack0}
        li t0, {stack_size}
        add sp, sp, t0
        call {start}
    spin:
        j spin
    "#,
    stack0 = sym start::STACK0,
    stack_size = const start::STACK_SIZE,
    start = sym start::start,
);

/// start() jumps here in supervisor mode.
extern "C" fn main() -> ! {
    console::init();
    println!();
    println!("rvos kernel is booting");
    println!();
    klog::init();
    memory::page::init(); // physical frame allocator
    memory::vm_kernel::init(); // create the kernel page table
    memory::vm_kernel::init_hart(); // turn on paging
    interrupt::trap::init_hart(); // install the kernel trap vector
    interrupt::plic::init(); // set up the interrupt controller
    interrupt::plic::init_hart(); // ask the PLIC for device interrupts
    console::init_irq(); // console input interrupts
    interrupt::timer::init(); // timer handler + first tick
    fs::virtio_disk::init(); // disk driver
    fs::block_io::init(); // block cache
    file::init(); // file table and console device
    proc::init(); // process table
    proc::user_init(); // first user process
    kinfo!("boot: entering scheduler");

    proc::scheduler::schedule();
}
