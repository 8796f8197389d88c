//! Console input and output, to the UART.
//!
//! Reads are a line at a time. Special input characters:
//!
//! * `newline` -- end of line
//! * `control-h` -- backspace
//! * `control-u` -- kill line
//! * `control-d` -- end of file
//! * `control-p` -- print process list

use rvos_kernel_params::CONSOLE_MAJOR;

use crate::{
    error::KernelError,
    file::{self, DevSw},
    proc::{self, Proc},
    sync::{SpinLock, SpinLockCondVar},
};

pub mod print;
pub mod uart;

const fn ctrl(x: u8) -> u8 {
    x - b'@'
}

const CTRL_H: u8 = ctrl(b'H');
const CTRL_U: u8 = ctrl(b'U');
const CTRL_D: u8 = ctrl(b'D');
const CTRL_P: u8 = ctrl(b'P');

/// Sends one character to the UART.
///
/// Called by `println!()` and to echo input characters, but not from
/// `write()`.
pub fn put_char(c: u8) {
    uart::putc_sync(c);
}

fn put_backspace() {
    uart::putc_sync(0x08);
    uart::putc_sync(b' ');
    uart::putc_sync(0x08);
}

struct Cons {
    /// Input ring.
    buf: [u8; 128],
    /// Read index.
    r: usize,
    /// Write index.
    w: usize,
    /// Edit index.
    e: usize,
}

static CONSOLE_BUFFER: SpinLock<Cons> = SpinLock::new(Cons {
    buf: [0; 128],
    r: 0,
    w: 0,
    e: 0,
});
static CONSOLE_BUFFER_WRITTEN: SpinLockCondVar = SpinLockCondVar::new();

/// User write()s to the console go here.
fn console_write(user_src: bool, src: usize, n: usize) -> Result<usize, KernelError> {
    for i in 0..n {
        let mut c = [0];
        if proc::either_copy_in_bytes(&mut c, user_src, src + i).is_err() {
            if i > 0 {
                return Ok(i);
            }
            return Err(KernelError::InaccessibleMemory(
                crate::memory::VirtAddr::new(src + i)?,
            ));
        }
        uart::putc(c[0]);
    }
    Ok(n)
}

/// User read()s from the console go here: copies (up to) a whole input
/// line to `dst`.
fn console_read(user_dst: bool, dst: usize, n: usize) -> Result<usize, KernelError> {
    let p = Proc::current();
    let mut i = 0;
    let mut cons = CONSOLE_BUFFER.lock();
    while i < n {
        // wait until the interrupt handler has put some input into the
        // ring.
        while cons.r == cons.w {
            if p.shared().lock().killed() {
                drop(cons);
                return Err(KernelError::CallerKilled);
            }
            cons = CONSOLE_BUFFER_WRITTEN.wait(cons);
        }

        let c = cons.buf[cons.r % cons.buf.len()];
        cons.r += 1;

        // end-of-file
        if c == CTRL_D {
            if i > 0 && i < n {
                // Save ^D for next time, to make sure the caller gets
                // a 0-byte result.
                cons.r -= 1;
            }
            break;
        }

        // copy the input byte to the destination buffer.
        if proc::either_copy_out_bytes(user_dst, dst + i, &[c]).is_err() {
            if i > 0 {
                break;
            }
            drop(cons);
            return Err(KernelError::InaccessibleMemory(
                crate::memory::VirtAddr::new(dst + i)?,
            ));
        }

        i += 1;

        if c == b'\n' {
            // a whole line has arrived.
            break;
        }
    }
    Ok(i)
}

/// Handles console input interrupts: erase/kill processing, appending
/// to the ring, waking `console_read` when a whole line has arrived.
pub fn handle_input(c: u8) {
    let mut cons = CONSOLE_BUFFER.lock();

    match c {
        // Print process list.
        CTRL_P => proc::dump(),
        // Kill line.
        CTRL_U => {
            while cons.e != cons.w && cons.buf[(cons.e - 1) % cons.buf.len()] != b'\n' {
                cons.e -= 1;
                put_backspace();
            }
        }
        // Backspace or Delete key.
        CTRL_H | 0x7f => {
            if cons.e != cons.w {
                cons.e -= 1;
                put_backspace();
            }
        }
        _ => {
            if c != 0 && cons.e - cons.r < cons.buf.len() {
                let c = if c == b'\r' { b'\n' } else { c };

                // echo back to the user.
                put_char(c);

                // store for consumption by console_read().
                let idx = cons.e % cons.buf.len();
                cons.buf[idx] = c;
                cons.e += 1;

                if c == b'\n' || c == CTRL_D || cons.e - cons.r == cons.buf.len() {
                    cons.w = cons.e;
                    CONSOLE_BUFFER_WRITTEN.notify();
                }
            }
        }
    }
}

pub fn init() {
    uart::init();

    file::register_device(
        CONSOLE_MAJOR,
        DevSw {
            read: console_read,
            write: console_write,
        },
    );
}

/// Hooks up the UART interrupt; runs after the PLIC is initialized.
pub fn init_irq() {
    uart::init_irq();
}
