//! Userland runtime for SkyOS programs: thin wrappers over the `int 0x80`
//! gate. Programs link this and provide `_start`.

#![no_std]

pub mod libs;

#[cfg(target_arch = "x86")]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    libs::system_call::exit()
}
