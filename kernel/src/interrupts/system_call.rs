//! The `int 0x80` command table. Command ids are assigned in declaration
//! order starting at 0; the caller puts the id in EAX and pushes arguments
//! on its own stack right to left, so handlers peek dwords through the
//! task's page tables. Results travel back in EAX; negative means error.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use spin::Mutex;

use crate::{print, println};

use crate::devices::vga::terminal_write_char;
use crate::error::KernelError;
use crate::interrupts::defs::InterruptFrame;
use crate::scheduler::defs::MAX_ARGUMENT_LENGTH;
use crate::scheduler::{process, task};

pub const MAX_SYSTEM_COMMANDS: usize = 1024;

/// Declaration order is the ABI.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemCommand {
    Sum = 0,
    Print = 1,
    GetKey = 2,
    PutChar = 3,
    Malloc = 4,
    Free = 5,
    ProcessLoadStart = 6,
    InvokeSystemCommand = 7,
    GetProgramArguments = 8,
    Exit = 9,
}

type CommandHandler = fn(&mut InterruptFrame) -> i32;

static COMMANDS: Mutex<[Option<CommandHandler>; MAX_SYSTEM_COMMANDS]> =
    Mutex::new([None; MAX_SYSTEM_COMMANDS]);

pub fn register_command(command: SystemCommand, handler: CommandHandler) {
    let mut commands = COMMANDS.lock();
    let slot = &mut commands[command as usize];

    if slot.is_some() {
        panic!("Attempting to overwrite system command {}", command as u32);
    }

    *slot = Some(handler);
}

/// The named boot step that populates the table.
pub fn register_commands() {
    register_command(SystemCommand::Sum, command_sum);
    register_command(SystemCommand::Print, command_print);
    register_command(SystemCommand::GetKey, command_getkey);
    register_command(SystemCommand::PutChar, command_putchar);
    register_command(SystemCommand::Malloc, command_malloc);
    register_command(SystemCommand::Free, command_free);
    register_command(SystemCommand::ProcessLoadStart, command_process_load_start);
    register_command(SystemCommand::InvokeSystemCommand, command_invoke_system_command);
    register_command(SystemCommand::GetProgramArguments, command_get_program_arguments);
    register_command(SystemCommand::Exit, command_exit);

    println!("[KERNEL] System Commands Registered");
}

/// Dispatch a command id. Unknown ids log and return 0 rather than killing
/// the caller.
pub fn run_command(command: u32, frame: &mut InterruptFrame) -> i32 {
    let handler = {
        let commands = COMMANDS.lock();
        match commands.get(command as usize).copied().flatten() {
            Some(handler) => handler,
            None => {
                println!("Unknown system command {}", command);
                return 0;
            }
        }
    };

    handler(frame)
}

fn result_code<T: Into<i32>>(result: Result<T, KernelError>) -> i32 {
    match result {
        Ok(value) => value.into(),
        Err(error) => error.code(),
    }
}

fn command_sum(_frame: &mut InterruptFrame) -> i32 {
    let a = task::stack_item(0).unwrap_or(0);
    let b = task::stack_item(1).unwrap_or(0);
    a.wrapping_add(b) as i32
}

fn command_print(_frame: &mut InterruptFrame) -> i32 {
    let pointer = match task::stack_item(0) {
        Ok(pointer) => pointer,
        Err(error) => return error.code(),
    };

    let mut buffer = [0u8; MAX_ARGUMENT_LENGTH];
    match task::copy_string_from_task(pointer, &mut buffer) {
        Ok(length) => {
            if let Ok(message) = core::str::from_utf8(&buffer[..length]) {
                print!("{}", message);
            }
            0
        }
        Err(error) => error.code(),
    }
}

fn command_getkey(_frame: &mut InterruptFrame) -> i32 {
    process::keyboard_pop() as i32
}

fn command_putchar(_frame: &mut InterruptFrame) -> i32 {
    match task::stack_item(0) {
        Ok(character) => {
            terminal_write_char(character as u8);
            0
        }
        Err(error) => error.code(),
    }
}

fn command_malloc(_frame: &mut InterruptFrame) -> i32 {
    let size = match task::stack_item(0) {
        Ok(size) => size as usize,
        Err(error) => return error.code(),
    };

    if size == 0 {
        return KernelError::NoMem.code();
    }

    match process::current_malloc(size) {
        Ok(address) => address as i32,
        Err(error) => error.code(),
    }
}

fn command_free(_frame: &mut InterruptFrame) -> i32 {
    let address = match task::stack_item(0) {
        Ok(address) => address as usize,
        Err(error) => return error.code(),
    };

    result_code(process::current_free(address).map(|_| 0))
}

fn command_process_load_start(_frame: &mut InterruptFrame) -> i32 {
    let pointer = match task::stack_item(0) {
        Ok(pointer) => pointer,
        Err(error) => return error.code(),
    };

    let mut buffer = [0u8; MAX_ARGUMENT_LENGTH];
    let length = match task::copy_string_from_task(pointer, &mut buffer) {
        Ok(length) => length,
        Err(error) => return error.code(),
    };

    let Ok(filename) = core::str::from_utf8(&buffer[..length]) else {
        return KernelError::InvalidArg.code();
    };

    let caller = task::current();

    match process::load_switch(filename) {
        // The new process is current now; resume through its entry. The
        // caller stays in the ring and will eventually be resumed from its
        // snapshot, so its saved EAX must already hold the success result.
        Ok(_) => {
            if let Some(caller) = caller {
                process::with_process(caller, |p| p.task.registers.eax = 0);
            }
            task::run_current()
        }
        Err(error) => error.code(),
    }
}

/// Walk the caller's forward list of `CommandArgument` nodes: a 512-byte
/// string field followed by a next pointer. Bounded by the argument count a
/// single block of user memory can plausibly hold.
fn copy_command_arguments(mut node: u32) -> Result<Vec<String>, KernelError> {
    const MAX_ARGUMENTS: usize = 32;

    let mut arguments = Vec::new();
    while node != 0 && arguments.len() < MAX_ARGUMENTS {
        let mut buffer = [0u8; MAX_ARGUMENT_LENGTH];
        let length = task::copy_string_from_task(node, &mut buffer)?;

        let argument = core::str::from_utf8(&buffer[..length])
            .map_err(|_| KernelError::InvalidArg)?;
        arguments.push(argument.to_string());

        node = task::read_user_u32(node + MAX_ARGUMENT_LENGTH as u32)?;
    }

    Ok(arguments)
}

fn command_invoke_system_command(_frame: &mut InterruptFrame) -> i32 {
    let head = match task::stack_item(0) {
        Ok(head) => head,
        Err(error) => return error.code(),
    };

    let arguments = match copy_command_arguments(head) {
        Ok(arguments) => arguments,
        Err(error) => return error.code(),
    };

    if arguments.is_empty() {
        return KernelError::InvalidArg.code();
    }

    let caller = task::current();

    let id = match process::load_switch(&arguments[0]) {
        Ok(id) => id,
        Err(error) => return error.code(),
    };

    if arguments.len() > 1 {
        if let Err(error) = process::inject_arguments(id, &arguments[1..]) {
            return error.code();
        }
    }

    if let Some(caller) = caller {
        process::with_process(caller, |p| p.task.registers.eax = 0);
    }

    task::run_current()
}

fn command_get_program_arguments(_frame: &mut InterruptFrame) -> i32 {
    let out = match task::stack_item(0) {
        Ok(out) => out,
        Err(error) => return error.code(),
    };

    let Some(id) = task::current() else {
        return KernelError::InvalidArg.code();
    };

    let (argc, argv) = process::get_arguments(id).unwrap_or((0, 0));

    if task::write_user_u32(out, argc).is_err()
        || task::write_user_u32(out + 4, argv).is_err()
    {
        return KernelError::InvalidArg.code();
    }

    0
}

fn command_exit(_frame: &mut InterruptFrame) -> i32 {
    let Some(id) = task::current() else {
        return KernelError::InvalidArg.code();
    };

    if let Err(error) = process::terminate(id) {
        return error.code();
    }

    task::task_next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_ids_follow_declaration_order() {
        assert_eq!(SystemCommand::Sum as u32, 0);
        assert_eq!(SystemCommand::Print as u32, 1);
        assert_eq!(SystemCommand::GetKey as u32, 2);
        assert_eq!(SystemCommand::PutChar as u32, 3);
        assert_eq!(SystemCommand::Malloc as u32, 4);
        assert_eq!(SystemCommand::Free as u32, 5);
        assert_eq!(SystemCommand::ProcessLoadStart as u32, 6);
        assert_eq!(SystemCommand::InvokeSystemCommand as u32, 7);
        assert_eq!(SystemCommand::GetProgramArguments as u32, 8);
        assert_eq!(SystemCommand::Exit as u32, 9);
    }

    #[test]
    fn unknown_commands_return_zero() {
        let mut frame = InterruptFrame::default();
        assert_eq!(run_command(999, &mut frame), 0);
        assert_eq!(run_command(MAX_SYSTEM_COMMANDS as u32 + 5, &mut frame), 0);
    }
}
