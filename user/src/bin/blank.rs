//! The first user program: prints the arguments injected at load time,
//! then echoes keystrokes.

#![no_std]
#![no_main]

use skyos_user::libs::system_call::{get_program_arguments, getkey, print, print_cstr, putchar};

#[no_mangle]
pub extern "C" fn _start() -> ! {
    let arguments = get_program_arguments();

    for index in 0..arguments.argc {
        unsafe { print_cstr(*arguments.argv.add(index as usize)) };
        print("\n");
    }

    loop {
        let key = getkey();
        if key != 0 {
            putchar(key);
        }
    }
}
