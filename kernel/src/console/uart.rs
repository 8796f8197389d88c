//! Low-level driver routines for the 16550a UART.

use core::{hint, ptr, sync::atomic::Ordering};

use crate::{
    console, interrupt,
    memory::layout::{UART0, UART0_IRQ},
    proc,
    sync::SpinLock,
};

use super::print::PANICKED;

const unsafe fn reg(offset: usize) -> *mut u8 {
    unsafe { ptr::without_provenance_mut::<u8>(UART0).byte_add(offset) }
}

// the UART control registers; some have different meanings for read vs
// write. see http://byterunner.com/16550.html

/// receive holding register (for input bytes)
const RHR: usize = 0;
/// transmit holding register (for output bytes)
const THR: usize = 0;
/// interrupt enable register
const IER: usize = 1;
const IER_RX_ENABLE: u8 = 1 << 0;
const IER_TX_ENABLE: u8 = 1 << 1;
/// FIFO control register
const FCR: usize = 2;
const FCR_FIFO_ENABLE: u8 = 1 << 0;
/// clear the content of the two FIFOs
const FCR_FIFO_CLEAR: u8 = 3 << 1;
/// interrupt status register
const ISR: usize = 2;
/// line control register
const LCR: usize = 3;
const LCR_EIGHT_BITS: u8 = 3;
/// special mode to set baud rate
const LCR_BAUD_LATCH: u8 = 1 << 7;
/// line status register
const LSR: usize = 5;
/// input is waiting to be read from RHR
const LSR_RX_READY: u8 = 1 << 0;
/// THR can accept another character to send
const LSR_TX_IDLE: u8 = 1 << 5;

unsafe fn read_reg(offset: usize) -> u8 {
    unsafe { reg(offset).read_volatile() }
}

unsafe fn write_reg(offset: usize, data: u8) {
    unsafe { reg(offset).write_volatile(data) }
}

/// The transmit output ring.
struct TxBuffer {
    buf: [u8; 32],
    /// Write next to buf[tx_w % buf.len()]
    tx_w: usize,
    /// Read next from buf[tx_r % buf.len()]
    tx_r: usize,
}

impl TxBuffer {
    fn is_full(&self) -> bool {
        self.tx_w == self.tx_r + self.buf.len()
    }

    fn is_empty(&self) -> bool {
        self.tx_w == self.tx_r
    }

    fn put(&mut self, c: u8) {
        assert!(!self.is_full());
        self.buf[self.tx_w % self.buf.len()] = c;
        self.tx_w += 1;
    }

    fn pop(&mut self) -> u8 {
        assert!(!self.is_empty());
        let c = self.buf[self.tx_r % self.buf.len()];
        self.tx_r += 1;
        c
    }
}

static TX_BUFFER: SpinLock<TxBuffer> = SpinLock::new(TxBuffer {
    buf: [0; 32],
    tx_w: 0,
    tx_r: 0,
});

pub fn init() {
    unsafe {
        // disable interrupts.
        write_reg(IER, 0x00);

        // special mode to set baud rate.
        write_reg(LCR, LCR_BAUD_LATCH);

        // LSB for baud rate of 38.4K.
        write_reg(0, 0x03);

        // MSB for baud rate of 38.4K.
        write_reg(1, 0x00);

        // leave set-baud mode, and set word length to 8 bits, no
        // parity.
        write_reg(LCR, LCR_EIGHT_BITS);

        // reset and enable FIFOs.
        write_reg(FCR, FCR_FIFO_ENABLE | FCR_FIFO_CLEAR);

        // enable transmit and receive interrupts.
        write_reg(IER, IER_TX_ENABLE | IER_RX_ENABLE);
    }
}

/// Routes the UART's IRQ to this driver; runs after the PLIC is set
/// up.
pub fn init_irq() {
    interrupt::register_interrupt(UART0_IRQ, handle_interrupt);
    interrupt::enable_interrupt(UART0_IRQ);
}

/// Adds a character to the output ring and starts sending if the UART
/// is idle.
///
/// Blocks while the ring is full, so it cannot be used from interrupt
/// context; `write()` is its caller.
pub fn putc(c: u8) {
    let mut buffer = TX_BUFFER.lock();

    if PANICKED.load(Ordering::Relaxed) {
        loop {
            hint::spin_loop();
        }
    }

    while buffer.is_full() {
        // wait for start() to open up space in the ring.
        buffer = proc::sleep((&raw const buffer.tx_r).cast(), buffer);
    }
    buffer.put(c);
    start(&mut buffer);
}

/// Sends a character synchronously, spinning until the transmit
/// register is empty; for kernel `print!` and input echo.
pub fn putc_sync(c: u8) {
    interrupt::with_push_disabled(|| {
        if PANICKED.load(Ordering::Relaxed) {
            loop {
                hint::spin_loop();
            }
        }

        // wait for Transmit Holding Empty to be set in LSR.
        while (unsafe { read_reg(LSR) } & LSR_TX_IDLE) == 0 {
            hint::spin_loop();
        }

        unsafe {
            write_reg(THR, c);
        }
    });
}

/// Drains the output ring into the UART while it accepts bytes.
///
/// Caller must hold the TX_BUFFER lock. Called from both the top and
/// bottom half.
fn start(buffer: &mut TxBuffer) {
    loop {
        if buffer.is_empty() {
            unsafe {
                read_reg(ISR);
            }
            return;
        }

        if unsafe { read_reg(LSR) } & LSR_TX_IDLE == 0 {
            // the transmit holding register is full; the UART will
            // interrupt when it's ready for a new byte.
            return;
        }

        let c = buffer.pop();

        // maybe putc() is waiting for space in the ring.
        proc::wakeup((&raw const buffer.tx_r).cast());

        unsafe {
            write_reg(THR, c);
        }
    }
}

/// Reads one input character, if any is waiting.
fn getc() -> Option<u8> {
    if (unsafe { read_reg(LSR) } & LSR_RX_READY) != 0 {
        Some(unsafe { read_reg(RHR) })
    } else {
        None
    }
}

/// Handles a uart interrupt: input has arrived, the uart is ready for
/// more output, or both.
fn handle_interrupt() {
    // read and process incoming characters.
    while let Some(c) = getc() {
        console::handle_input(c);
    }

    // send buffered characters.
    let mut buffer = TX_BUFFER.lock();
    start(&mut buffer);
    drop(buffer);
}
