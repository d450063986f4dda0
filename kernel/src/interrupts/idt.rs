//! The IDT and the C-level interrupt dispatcher. All 256 vectors point at
//! the generated stubs; 0x80 is overridden with the syscall wrapper behind a
//! DPL-3 trap gate. The default handler just names the vector on the
//! console.

use core::mem::size_of;
use core::sync::atomic::{AtomicU32, Ordering};

use spin::Mutex;

use crate::println;

use crate::devices::keyboard;
use crate::interrupts::defs::{
    IdtGate, InterruptFrame, GATE_INTERRUPT, GATE_TRAP_USER, IRQ_BASE, IRQ_LIMIT, ISR_KEYBOARD,
    ISR_SYSCALL, ISR_TIMER, TOTAL_INTERRUPTS,
};
use crate::interrupts::pic;
use crate::scheduler::task;
use crate::x86::defs::DescriptorTablePointer;
use crate::x86::helpers::lidt;

pub struct InterruptDescriptorTable {
    gates: [IdtGate; TOTAL_INTERRUPTS],
}

impl InterruptDescriptorTable {
    pub const fn new() -> Self {
        InterruptDescriptorTable {
            gates: [IdtGate::empty(); TOTAL_INTERRUPTS],
        }
    }

    pub fn set_gate(&mut self, vector: usize, handler: u32, flags: u8) {
        self.gates[vector].set_handler(handler, flags);
    }

    fn pointer(&self) -> DescriptorTablePointer {
        DescriptorTablePointer {
            base: self.gates.as_ptr() as u32,
            limit: (size_of::<Self>() - 1) as u16,
        }
    }

    fn load(&self) {
        lidt(&self.pointer());
    }
}

static GLOBAL_IDT: Mutex<InterruptDescriptorTable> =
    Mutex::new(InterruptDescriptorTable::new());

static TIMER_TICKS: AtomicU32 = AtomicU32::new(0);

pub fn timer_ticks() -> u32 {
    TIMER_TICKS.load(Ordering::Relaxed)
}

pub fn setup_idt() {
    #[cfg(all(target_arch = "x86", not(test)))]
    {
        extern "C" {
            static INTERRUPT_STUB_TABLE: [u32; TOTAL_INTERRUPTS];
            fn isr80h_wrapper();
        }

        let mut idt = GLOBAL_IDT.lock();

        for vector in 0..TOTAL_INTERRUPTS {
            let stub = unsafe { INTERRUPT_STUB_TABLE[vector] };
            idt.set_gate(vector, stub, GATE_INTERRUPT);
        }

        idt.set_gate(
            ISR_SYSCALL as usize,
            isr80h_wrapper as *const () as u32,
            GATE_TRAP_USER,
        );

        idt.load();
    }

    println!("[KERNEL] Interrupt Table Initialized");
}

/// Common entry for every vector except 0x80. Runs with the caller's CR3;
/// switches to kernel pages for the duration when the frame came from ring 3
/// and hands the CPU back through the task's directory on the way out.
#[no_mangle]
pub extern "C" fn interrupt_dispatch(vector: u32, frame: *mut InterruptFrame) {
    let frame = unsafe { &mut *frame };
    let from_user = frame.from_user_mode();

    if from_user {
        crate::kernel_page();
    }

    match vector {
        ISR_TIMER => {
            TIMER_TICKS.fetch_add(1, Ordering::Relaxed);
        }
        ISR_KEYBOARD => {
            keyboard::keyboard_interrupt();
        }
        _ => {
            println!("Interrupt {}", vector);
        }
    }

    if (IRQ_BASE..IRQ_LIMIT).contains(&vector) {
        pic::acknowledge();
    }

    if from_user {
        task::task_page();
    }
}

/// The 0x80 gate. Saves the caller's registers so the task is resumable,
/// runs the command under kernel pages, and leaves the result where POPAD
/// will restore it into EAX.
#[no_mangle]
pub extern "C" fn syscall_dispatch(frame: *mut InterruptFrame) {
    let frame = unsafe { &mut *frame };

    // The gate is a trap gate: the caller's IF is still set. Nothing below
    // may be preempted mid-update.
    let _guard = crate::sync::cli::InterruptGuard::enter();

    crate::kernel_page();
    task::save_current(frame);

    let command = frame.eax;
    let result = crate::interrupts::system_call::run_command(command, frame);
    frame.eax = result as u32;

    task::task_page();
}
