//! Process lifecycle. A process owns everything it touches: page directory,
//! physical image, user stack, injected arguments, the task, and every heap
//! block handed out through the syscall interface. Termination walks that
//! ownership and the heap returns to its pre-load occupancy.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use spin::Mutex;

use crate::devices::keyboard::KeyBuffer;
use crate::error::KernelError;
use crate::filesystem::vfs::{self, FileMode};
use crate::memory::defs::{
    PageFlags, PROGRAM_VIRTUAL_ADDRESS, USER_STACK_SIZE, USER_STACK_VIRTUAL_END,
    USER_STACK_VIRTUAL_START,
};
use crate::memory::heap::{kfree, kzalloc};
use crate::memory::paging::{align_up, Paging4Gb};
use crate::scheduler::defs::{
    Process, ProcessAllocation, ProcessImageFormat, ProgramArguments, Registers, Task,
    MAX_ARGUMENT_LENGTH, MAX_PROCESSES, MAX_PROGRAM_ALLOCATIONS,
};
use crate::scheduler::exec;
use crate::scheduler::task;
use crate::x86::defs::{USER_CODE_SELECTOR, USER_DATA_SELECTOR};

pub static PROCESS_TABLE: Mutex<Vec<Option<Process>>> = Mutex::new(Vec::new());

fn ensure_slots(table: &mut Vec<Option<Process>>) {
    if table.len() < MAX_PROCESSES {
        table.resize_with(MAX_PROCESSES, || None);
    }
}

/// Run `f` against the process in slot `id`, if it exists.
pub fn with_process<R>(id: usize, f: impl FnOnce(&mut Process) -> R) -> Option<R> {
    let mut table = PROCESS_TABLE.lock();
    ensure_slots(&mut table);
    table.get_mut(id)?.as_mut().map(f)
}

fn free_slot() -> Result<usize, KernelError> {
    let mut table = PROCESS_TABLE.lock();
    ensure_slots(&mut table);
    table
        .iter()
        .position(|slot| slot.is_none())
        .ok_or(KernelError::Busy)
}

/// Pull the whole file into a kernel buffer and decide its format: a valid
/// ELF is unpacked into a fresh image, anything else is taken as a raw
/// binary that runs at the fixed program address.
fn load_image(filename: &str) -> Result<(usize, usize, ProcessImageFormat, usize, u32), KernelError> {
    let fd = vfs::fopen(filename, FileMode::Read)?;

    let stat = match vfs::fstat(fd) {
        Ok(stat) => stat,
        Err(error) => {
            let _ = vfs::fclose(fd);
            return Err(error);
        }
    };

    let size = stat.size as usize;
    if size == 0 {
        let _ = vfs::fclose(fd);
        return Err(KernelError::InvalidArg);
    }

    let buffer = kzalloc(size);
    if buffer.is_null() {
        let _ = vfs::fclose(fd);
        return Err(KernelError::NoMem);
    }

    let data = unsafe { core::slice::from_raw_parts_mut(buffer, size) };
    let read = vfs::fread(fd, data, size, 1);
    let _ = vfs::fclose(fd);

    if let Err(error) = read {
        kfree(buffer);
        return Err(error);
    }

    match exec::load(data) {
        Ok(elf) => {
            kfree(buffer);
            Ok((
                elf.image as usize,
                elf.size,
                ProcessImageFormat::Elf,
                elf.virtual_base,
                elf.entry,
            ))
        }
        // Not an ELF at all: fall back to a flat binary image.
        Err(KernelError::InvalidArg) => Ok((
            buffer as usize,
            size,
            ProcessImageFormat::Raw,
            PROGRAM_VIRTUAL_ADDRESS,
            PROGRAM_VIRTUAL_ADDRESS as u32,
        )),
        Err(error) => {
            kfree(buffer);
            Err(error)
        }
    }
}

fn load_for_slot(filename: &str, id: usize) -> Result<usize, KernelError> {
    let (image, image_size, image_format, virtual_base, entry) = load_image(filename)?;

    let stack = kzalloc(USER_STACK_SIZE);
    if stack.is_null() {
        kfree(image as *mut u8);
        return Err(KernelError::NoMem);
    }

    let Some(mut page_directory) =
        Paging4Gb::new(PageFlags::PRESENT | PageFlags::ACCESS_FROM_ALL)
    else {
        kfree(image as *mut u8);
        kfree(stack);
        return Err(KernelError::NoMem);
    };

    let user_rw = PageFlags::PRESENT | PageFlags::ACCESS_FROM_ALL | PageFlags::WRITABLE;

    page_directory.map_to(virtual_base, image, align_up(image + image_size), user_rw)?;
    page_directory.map_to(
        USER_STACK_VIRTUAL_END,
        stack as usize,
        stack as usize + USER_STACK_SIZE,
        user_rw,
    )?;

    let task = Task {
        process_id: id,
        page_directory: page_directory.directory_address(),
        registers: Registers {
            ip: entry,
            esp: USER_STACK_VIRTUAL_START as u32,
            cs: USER_CODE_SELECTOR as u32,
            ss: USER_DATA_SELECTOR as u32,
            ..Default::default()
        },
    };

    let process = Process {
        id,
        filename: filename.to_string(),
        task,
        page_directory,
        image,
        image_size,
        image_format,
        virtual_base,
        stack: stack as usize,
        allocations: [None; MAX_PROGRAM_ALLOCATIONS],
        arguments: None,
        keyboard: KeyBuffer::new(),
    };

    {
        let mut table = PROCESS_TABLE.lock();
        ensure_slots(&mut table);
        table[id] = Some(process);
    }

    task::insert(id);
    Ok(id)
}

pub fn load(filename: &str) -> Result<usize, KernelError> {
    let slot = free_slot()?;
    load_for_slot(filename, slot)
}

/// Load and make current: the next return to user mode runs this process.
pub fn load_switch(filename: &str) -> Result<usize, KernelError> {
    let id = load(filename)?;
    task::set_current(id);
    Ok(id)
}

/// Re-pack the argument list into one heap block the process can read
/// through its linear mapping: an argv pointer array followed by the
/// NUL-terminated strings it points at.
pub fn inject_arguments(id: usize, arguments: &[String]) -> Result<(), KernelError> {
    if arguments.is_empty() {
        return Err(KernelError::InvalidArg);
    }

    let argc = arguments.len();
    let pointer_bytes = argc * core::mem::size_of::<u32>();
    let string_bytes: usize = arguments
        .iter()
        .map(|argument| argument.len().min(MAX_ARGUMENT_LENGTH - 1) + 1)
        .sum();

    let block = kzalloc(pointer_bytes + string_bytes);
    if block.is_null() {
        return Err(KernelError::NoMem);
    }

    let mut cursor = block as usize + pointer_bytes;
    for (index, argument) in arguments.iter().enumerate() {
        let bytes = argument.as_bytes();
        let length = bytes.len().min(MAX_ARGUMENT_LENGTH - 1);

        unsafe {
            *(block as *mut u32).add(index) = cursor as u32;
            core::ptr::copy_nonoverlapping(bytes.as_ptr(), cursor as *mut u8, length);
            *((cursor + length) as *mut u8) = 0;
        }

        cursor += length + 1;
    }

    let previous = with_process(id, |process| {
        let previous = process.arguments.take();
        process.arguments = Some(ProgramArguments {
            argc: argc as u32,
            argv: block as u32,
            block: block as usize,
        });
        previous
    })
    .ok_or(KernelError::InvalidArg)?;

    if let Some(previous) = previous {
        kfree(previous.block as *mut u8);
    }

    Ok(())
}

pub fn get_arguments(id: usize) -> Option<(u32, u32)> {
    with_process(id, |process| {
        process
            .arguments
            .map(|arguments| (arguments.argc, arguments.argv))
    })
    .flatten()
}

/// Allocate on the kernel heap for the current process, record the block in
/// its allocation table, and open the pages up for user writes. The memory
/// is zeroed before the process ever sees it.
pub fn current_malloc(size: usize) -> Result<usize, KernelError> {
    let id = task::current().ok_or(KernelError::InvalidArg)?;

    with_process(id, |process| {
        let slot = process
            .allocations
            .iter()
            .position(|allocation| allocation.is_none())
            .ok_or(KernelError::Busy)?;

        let pointer = kzalloc(size);
        if pointer.is_null() {
            return Err(KernelError::NoMem);
        }

        let address = pointer as usize;
        process.page_directory.map_to(
            address,
            address,
            align_up(address + size),
            PageFlags::PRESENT | PageFlags::ACCESS_FROM_ALL | PageFlags::WRITABLE,
        )?;

        process.allocations[slot] = Some(ProcessAllocation { address, size });
        Ok(address)
    })
    .ok_or(KernelError::InvalidArg)?
}

/// Release a tracked allocation. Pointers the process never got from
/// `malloc` are rejected outright.
pub fn current_free(address: usize) -> Result<(), KernelError> {
    let id = task::current().ok_or(KernelError::InvalidArg)?;

    with_process(id, |process| {
        let slot = process
            .allocations
            .iter()
            .position(|allocation| {
                matches!(allocation, Some(a) if a.address == address)
            })
            .ok_or(KernelError::InvalidArg)?;

        let size = process.allocations[slot].unwrap().size;

        // Drop the pages back to the directory's linear default.
        process.page_directory.map_to(
            address,
            address,
            align_up(address + size),
            PageFlags::PRESENT | PageFlags::ACCESS_FROM_ALL,
        )?;

        kfree(address as *mut u8);
        process.allocations[slot] = None;
        Ok(())
    })
    .ok_or(KernelError::InvalidArg)?
}

/// Tear the process down and return every resource it owns to the kernel.
pub fn terminate(id: usize) -> Result<(), KernelError> {
    let process = {
        let mut table = PROCESS_TABLE.lock();
        ensure_slots(&mut table);
        table
            .get_mut(id)
            .and_then(|slot| slot.take())
            .ok_or(KernelError::InvalidArg)?
    };

    task::remove(id);

    for allocation in process.allocations.iter().flatten() {
        kfree(allocation.address as *mut u8);
    }

    if let Some(arguments) = process.arguments {
        kfree(arguments.block as *mut u8);
    }

    kfree(process.image as *mut u8);
    kfree(process.stack as *mut u8);

    // Dropping the process releases the page directory and its tables.
    drop(process);
    Ok(())
}

pub fn keyboard_push(character: u8) {
    if let Some(id) = task::current() {
        with_process(id, |process| process.keyboard.push(character));
    }
}

pub fn keyboard_pop() -> u8 {
    task::current()
        .and_then(|id| with_process(id, |process| process.keyboard.pop()))
        .unwrap_or(0)
}
