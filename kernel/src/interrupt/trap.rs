use core::mem;

use riscv::{
    interrupt::{
        Trap,
        supervisor::{Exception, Interrupt},
    },
    register::{
        satp, scause, sepc,
        sstatus::{self, SPP},
        stval,
        stvec::{self, Stvec, TrapMode},
    },
};

use super::{TIMER_IRQ, kernel_vec, plic, trampoline};
use crate::{
    interrupt, kwarn,
    memory::{PAGE_SIZE, VirtAddr, layout::KSTACK_PAGES},
    println,
    proc::{self, Proc},
    syscall,
};

pub fn init_hart() {
    let mut stvec = Stvec::from_bits(0);
    stvec.set_address(kernel_vec::kernel_vec as usize);
    stvec.set_trap_mode(TrapMode::Direct);
    unsafe {
        stvec::write(stvec);
    }
}

/// Handles an interrupt, exception, or system call from user space.
///
/// Called from the trampoline.
extern "C" fn trap_user() {
    assert_eq!(sstatus::read().spp(), SPP::User, "from user mode");

    // we're in the kernel now; send interrupts and exceptions to
    // trap_kernel().
    init_hart();

    let p = Proc::current();
    let private = unsafe { p.private_mut() };

    // save the user program counter.
    private.trapframe_mut().epc = sepc::read() as u64;

    let scause: Trap<Interrupt, Exception> = scause::read().cause().try_into().unwrap();
    let mut which_dev = IntrKind::NotRecognized;
    match scause {
        Trap::Exception(Exception::UserEnvCall) => {
            // system call
            if p.shared().lock().killed() {
                proc::exit(p, private, -1);
            }

            // sepc points to the ecall instruction, but we want to
            // return to the next instruction.
            private.trapframe_mut().epc += 4;

            // an interrupt will change sepc, scause, and sstatus, so
            // enable only now that we're done with those registers.
            interrupt::enable();

            syscall::syscall(p, private);
        }
        Trap::Exception(e) => {
            handle_user_exception(p, e);
        }
        Trap::Interrupt(int) => {
            which_dev = handle_dev_interrupt(int);
            if which_dev == IntrKind::NotRecognized {
                let mut shared = p.shared().lock();
                println!(
                    "usertrap: unexpected interrupt {int:?} pid={} name={}",
                    shared.pid(),
                    shared.name()
                );
                shared.kill();
            }
        }
    }

    if p.shared().lock().killed() {
        proc::exit(p, unsafe { p.private_mut() }, -1);
    }

    // give up the CPU if this was a timer interrupt.
    if which_dev == IntrKind::Timer {
        proc::yield_(p);
    }

    trap_user_ret(unsafe { p.private_mut() });
}

/// Classifies an exception taken from user mode: store faults on
/// copy-on-write pages are resolved in place, everything else kills
/// the process.
fn handle_user_exception(p: &Proc, e: Exception) {
    let stval = stval::read();

    if e == Exception::StorePageFault {
        let private = unsafe { p.private_mut() };
        if let Ok(va) = VirtAddr::new(stval) {
            if va.addr() < private.size() && private.pagetable_mut().cow_resolve(va).is_ok() {
                return;
            }
        }
    }

    let mut shared = p.shared().lock();
    println!(
        "usertrap: exception {e:?} pid={} name={}",
        shared.pid(),
        shared.name()
    );
    println!("          sepc={:#x} stval={stval:#x}", sepc::read());
    kwarn!("killing pid {} after {e:?}", shared.pid());
    shared.kill();
}

/// Returns to user space.
pub fn trap_user_ret(private: &mut proc::ProcPrivateData) -> ! {
    // we're about to switch the destination of traps from
    // trap_kernel() to trap_user(), so turn off interrupts until we're
    // back in user space where trap_user() is correct.
    interrupt::disable();

    // send syscalls, interrupts, and exceptions to user_vec in the
    // trampoline.
    let trampoline_user_vec = trampoline::user_vec_addr();
    let mut stvec = Stvec::from_bits(0);
    stvec.set_address(trampoline_user_vec.addr());
    stvec.set_trap_mode(TrapMode::Direct);
    unsafe {
        stvec::write(stvec);
    }

    // set up trapframe values that user_vec will need when the process
    // next traps into the kernel.
    let kstack = private.kstack();
    let tf = private.trapframe_mut();
    tf.kernel_satp = satp::read().bits() as u64;
    tf.kernel_sp = (kstack.addr() + KSTACK_PAGES * PAGE_SIZE) as u64;
    tf.kernel_trap = trap_user as usize as u64;
    tf.kernel_hartid = 0;

    // set S Previous Privilege mode to User, with interrupts on after
    // sret.
    unsafe {
        sstatus::set_spp(SPP::User);
        sstatus::set_spie();
    }

    // set S Exception Program Counter to the saved user pc.
    unsafe {
        sepc::write(private.trapframe().epc as usize);
    }

    // tell the trampoline the user page table to switch to.
    let satp = private.pagetable().satp();

    // jump to user_ret in the trampoline, which switches to the user
    // page table, restores user registers, and sret's to user mode.
    let trampoline_user_ret = trampoline::user_ret_addr();
    unsafe {
        let f: extern "C" fn(usize) -> ! = mem::transmute(trampoline_user_ret.addr());
        f(satp);
    }
}

/// Interrupts and exceptions from kernel code come here via
/// kernel_vec, on whatever the current kernel stack is.
pub extern "C" fn trap_kernel() {
    let sepc = sepc::read();
    let sstatus_saved = sstatus::read();
    let scause: Trap<Interrupt, Exception> = scause::read().cause().try_into().unwrap();

    assert_eq!(sstatus_saved.spp(), SPP::Supervisor, "from supervisor mode");
    assert!(!interrupt::is_enabled());

    let (int, which_dev) = match scause {
        Trap::Exception(e) => {
            let stval = stval::read();
            println!("kernel trap: exception {e:?}");
            println!("             sepc={sepc:#x} stval={stval:#x}");
            panic!("unexpected trap (exception)");
        }
        Trap::Interrupt(int) => (int, handle_dev_interrupt(int)),
    };

    match which_dev {
        IntrKind::Timer => {
            // give up the CPU if a process was running.
            if let Some(p) = Proc::try_current() {
                proc::yield_(p);
            }
        }
        IntrKind::Other => {}
        IntrKind::NotRecognized => {
            let stval = stval::read();
            println!("kernel trap: interrupt {int:?}");
            println!("             sepc={sepc:#x} stval={stval:#x}");
            panic!("unexpected trap (interrupt)");
        }
    }

    // the yield_() may have caused some traps to occur, so restore
    // trap registers for use by kernel_vec's sret.
    unsafe {
        sepc::write(sepc);
    }
    unsafe {
        sstatus::write(sstatus_saved);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IntrKind {
    Timer,
    Other,
    NotRecognized,
}

/// Routes a supervisor interrupt through the IRQ handler table.
fn handle_dev_interrupt(int: Interrupt) -> IntrKind {
    match int {
        Interrupt::SupervisorSoft => IntrKind::NotRecognized,
        Interrupt::SupervisorTimer => {
            if !interrupt::dispatch(TIMER_IRQ) {
                return IntrKind::NotRecognized;
            }
            IntrKind::Timer
        }
        Interrupt::SupervisorExternal => {
            // irq tells us which device interrupted.
            let irq = plic::claim();

            if irq > 0 {
                if !interrupt::dispatch(irq) {
                    println!("unexpected interrupt irq={irq}");
                }

                // the PLIC allows each device to raise at most one
                // interrupt at a time; tell it the device may
                // interrupt again.
                plic::complete(irq);
            }
            IntrKind::Other
        }
    }
}
