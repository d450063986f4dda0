//! Keyboard subsystem: a registry of keyboard drivers plus the per-process
//! key buffer. Keystrokes land in the buffer of whichever process is
//! current at interrupt time; `getkey` drains the caller's own buffer.

use lazy_static::lazy_static;
use spin::Mutex;

use alloc::vec::Vec;

use core::sync::atomic::{AtomicBool, Ordering};

use crate::error::KernelError;
use crate::println;
use crate::scheduler::process;
use crate::x86::helpers::{inb, outb};

pub const KEYBOARD_BUFFER_SIZE: usize = 1024;

/// Circular per-process keystroke queue. Pushing into a full buffer drops
/// the key; popping an empty buffer yields 0.
#[derive(Clone, Copy)]
pub struct KeyBuffer {
    buffer: [u8; KEYBOARD_BUFFER_SIZE],
    head: usize,
    tail: usize,
}

impl KeyBuffer {
    pub const fn new() -> Self {
        KeyBuffer {
            buffer: [0; KEYBOARD_BUFFER_SIZE],
            head: 0,
            tail: 0,
        }
    }

    pub fn push(&mut self, character: u8) {
        if character == 0 {
            return;
        }

        if self.tail.wrapping_sub(self.head) >= KEYBOARD_BUFFER_SIZE {
            return;
        }

        self.buffer[self.tail % KEYBOARD_BUFFER_SIZE] = character;
        self.tail = self.tail.wrapping_add(1);
    }

    pub fn pop(&mut self) -> u8 {
        if self.head == self.tail {
            return 0;
        }

        let character = self.buffer[self.head % KEYBOARD_BUFFER_SIZE];
        self.head = self.head.wrapping_add(1);
        character
    }
}

pub trait KeyboardDriver: Send + Sync {
    fn name(&self) -> &'static str;
    fn init(&self) -> Result<(), KernelError>;
    fn handle_interrupt(&self);
}

lazy_static! {
    static ref KEYBOARDS: Mutex<Vec<&'static dyn KeyboardDriver>> = Mutex::new(Vec::new());
}

pub fn register_keyboard(driver: &'static dyn KeyboardDriver) {
    KEYBOARDS.lock().push(driver);
}

pub fn keyboard_init() {
    register_keyboard(&CLASSIC_KEYBOARD);

    for driver in KEYBOARDS.lock().iter() {
        if driver.init().is_err() {
            println!("[KERNEL] Keyboard '{}' failed to initialize", driver.name());
        }
    }
}

/// IRQ 0x21 entry: let every registered driver drain its device.
pub fn keyboard_interrupt() {
    for driver in KEYBOARDS.lock().iter() {
        driver.handle_interrupt();
    }
}

/* ************ Classic PS/2 driver ************ */

const PS2_DATA_PORT: u16 = 0x60;
const PS2_COMMAND_PORT: u16 = 0x64;
const PS2_ENABLE_FIRST_PORT: u8 = 0xAE;

const KEY_RELEASED: u8 = 0x80;
const KEY_CAPSLOCK: u8 = 0x3A;

/// Scancode set one, key-down codes up to the space bar. Unmapped codes
/// translate to 0 and are swallowed by the buffer.
#[rustfmt::skip]
static SCANCODE_SET_ONE: [u8; 58] = [
    0x00, 0x1B, b'1', b'2', b'3', b'4', b'5', b'6',
    b'7', b'8', b'9', b'0', b'-', b'=', 0x08, b'\t',
    b'Q', b'W', b'E', b'R', b'T', b'Y', b'U', b'I',
    b'O', b'P', b'[', b']', 0x0D, 0x00, b'A', b'S',
    b'D', b'F', b'G', b'H', b'J', b'K', b'L', b';',
    b'\'', b'`', 0x00, b'\\', b'Z', b'X', b'C', b'V',
    b'B', b'N', b'M', b',', b'.', b'/', 0x00, b'*',
    0x00, b' ',
];

pub struct ClassicKeyboard {
    capslock: AtomicBool,
}

static CLASSIC_KEYBOARD: ClassicKeyboard = ClassicKeyboard {
    capslock: AtomicBool::new(false),
};

/// Translate a key-down scancode, folding letters to lower case unless caps
/// lock is on.
pub fn scancode_to_char(scancode: u8, capslock: bool) -> u8 {
    if scancode as usize >= SCANCODE_SET_ONE.len() {
        return 0;
    }

    let mut character = SCANCODE_SET_ONE[scancode as usize];
    if !capslock && character.is_ascii_uppercase() {
        character = character.to_ascii_lowercase();
    }

    character
}

impl KeyboardDriver for ClassicKeyboard {
    fn name(&self) -> &'static str {
        "classic"
    }

    fn init(&self) -> Result<(), KernelError> {
        outb(PS2_COMMAND_PORT, PS2_ENABLE_FIRST_PORT);
        Ok(())
    }

    fn handle_interrupt(&self) {
        let scancode = inb(PS2_DATA_PORT);
        // Swallow a trailing rogue byte some controllers emit.
        inb(PS2_DATA_PORT);

        if scancode & KEY_RELEASED != 0 {
            return;
        }

        if scancode == KEY_CAPSLOCK {
            let capslock = self.capslock.load(Ordering::Relaxed);
            self.capslock.store(!capslock, Ordering::Relaxed);
            return;
        }

        let character = scancode_to_char(scancode, self.capslock.load(Ordering::Relaxed));
        if character != 0 {
            process::keyboard_push(character);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_is_first_in_first_out() {
        let mut buffer = KeyBuffer::new();
        buffer.push(b'a');
        buffer.push(b'b');
        buffer.push(b'c');

        assert_eq!(buffer.pop(), b'a');
        assert_eq!(buffer.pop(), b'b');
        assert_eq!(buffer.pop(), b'c');
        assert_eq!(buffer.pop(), 0);
    }

    #[test]
    fn empty_pop_and_nul_push_are_noops() {
        let mut buffer = KeyBuffer::new();
        assert_eq!(buffer.pop(), 0);

        buffer.push(0);
        assert_eq!(buffer.pop(), 0);
    }

    #[test]
    fn full_buffer_drops_new_keys() {
        let mut buffer = KeyBuffer::new();
        for _ in 0..KEYBOARD_BUFFER_SIZE {
            buffer.push(b'x');
        }
        buffer.push(b'y');

        for _ in 0..KEYBOARD_BUFFER_SIZE {
            assert_eq!(buffer.pop(), b'x');
        }
        assert_eq!(buffer.pop(), 0);
    }

    #[test]
    fn buffer_wraps_around() {
        let mut buffer = KeyBuffer::new();
        for round in 0..3 {
            for i in 0..KEYBOARD_BUFFER_SIZE {
                buffer.push(b'a' + ((round + i) % 26) as u8);
            }
            for i in 0..KEYBOARD_BUFFER_SIZE {
                assert_eq!(buffer.pop(), b'a' + ((round + i) % 26) as u8);
            }
        }
    }

    #[test]
    fn scancodes_translate_with_case_folding() {
        assert_eq!(scancode_to_char(0x10, false), b'q');
        assert_eq!(scancode_to_char(0x10, true), b'Q');
        assert_eq!(scancode_to_char(0x02, false), b'1');
        assert_eq!(scancode_to_char(0x39, false), b' ');
        assert_eq!(scancode_to_char(0x1C, false), 0x0D);
        assert_eq!(scancode_to_char(0xFF, false), 0);
    }
}
