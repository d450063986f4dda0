//! SkyOS kernel entry. The boot sector drops us here at 0x100000 in
//! protected mode; the assembly prologue sets the kernel stack and remaps
//! the master PIC before any interrupt can fire, then `kernel_main` brings
//! the subsystems up in dependency order and IRETs into the first user
//! process.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), no_main)]

extern crate alloc;

#[macro_use]
pub mod devices;

pub mod error;
pub mod filesystem;
pub mod interrupts;
pub mod memory;
pub mod scheduler;
pub mod sync;
pub mod x86;

use alloc::string::String;

use crate::scheduler::{process, task};
use crate::x86::defs::KERNEL_DATA_SELECTOR;
use crate::x86::helpers::{hlt, load_data_segments};

#[cfg(all(target_arch = "x86", not(test)))]
core::arch::global_asm!(
    r#"
.section .text.boot
.global _start
_start:
    // The boot GDT is still live; selector 0x10 is its flat data segment.
    mov ax, 0x10
    mov ds, ax
    mov es, ax
    mov fs, ax
    mov gs, ax
    mov ss, ax
    mov ebp, 0x00200000
    mov esp, ebp

    // Remap the master PIC to vector base 0x20 before anything can fire.
    mov al, 0x11
    out 0x20, al
    mov al, 0x20
    out 0x21, al
    mov al, 0x01
    out 0x21, al

    call kernel_main
1:
    hlt
    jmp 1b
"#
);

/// Load kernel data selectors and the kernel page directory. Syscall and
/// interrupt paths call this before touching any cross-process state.
pub fn kernel_page() {
    load_data_segments(KERNEL_DATA_SELECTOR);
    memory::paging::switch_to_kernel_directory();
}

#[no_mangle]
pub extern "C" fn kernel_main() -> ! {
    devices::vga::terminal_initialize();

    memory::gdt::setup_gdt();
    memory::heap::setup_heap();

    println!("Welcome to SkyOS!");

    filesystem::vfs::fs_init();
    filesystem::disk::disk_search_and_init();

    interrupts::idt::setup_idt();
    memory::gdt::setup_tss();

    memory::paging::setup_paging();

    interrupts::system_call::register_commands();
    devices::keyboard::keyboard_init();

    // Two instances of the same program, each with its own argument block;
    // the task ring will alternate between them.
    let first = process::load_switch("0:/blank.elf")
        .unwrap_or_else(|error| panic!("Failed to load blank.elf: {:?}", error));
    process::inject_arguments(first, &[String::from("Testing!")])
        .unwrap_or_else(|error| panic!("Failed to inject arguments: {:?}", error));

    let second = process::load_switch("0:/blank.elf")
        .unwrap_or_else(|error| panic!("Failed to load blank.elf: {:?}", error));
    process::inject_arguments(second, &[String::from("Abc!")])
        .unwrap_or_else(|error| panic!("Failed to inject arguments: {:?}", error));

    task::run_first_ever_task()
}

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    println!("{}", info);
    loop {
        hlt();
    }
}
