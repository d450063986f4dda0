use alloc::string::String;

use crate::devices::keyboard::KeyBuffer;
use crate::memory::paging::Paging4Gb;

pub const MAX_PROCESSES: usize = 12;
pub const MAX_PROGRAM_ALLOCATIONS: usize = 1024;

/// Command arguments delivered into a process are short ASCII strings.
pub const MAX_ARGUMENT_LENGTH: usize = 512;

/// How many dwords a syscall handler may peek off the caller's stack.
pub const MAX_STACK_PEEK: usize = 32;

/// The register snapshot a task carries between a kernel entry and the next
/// return to user mode. Field order is the `task_return` IRET recipe; the
/// layout is load-bearing for the assembly in task.rs.
#[repr(C)]
#[derive(Default, Debug, Clone, Copy)]
pub struct Registers {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub ip: u32,
    pub cs: u32,
    pub flags: u32,
    pub esp: u32,
    pub ss: u32,
}

/// One schedulable unit, one-to-one with its process. The task holds a
/// non-owning view of the process: its id and the raw directory address;
/// the process table owns the truth.
#[derive(Debug, Clone, Copy)]
pub struct Task {
    pub process_id: usize,
    pub page_directory: usize,
    pub registers: Registers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessImageFormat {
    Elf,
    Raw,
}

/// A user-visible heap block handed out through the syscall interface.
#[derive(Debug, Clone, Copy)]
pub struct ProcessAllocation {
    pub address: usize,
    pub size: usize,
}

/// The `(argc, argv)` block injected into a process at load time. `block`
/// is the kernel-heap allocation backing both the pointer array and the
/// strings; the process reads it through its linear mapping.
#[derive(Debug, Clone, Copy)]
pub struct ProgramArguments {
    pub argc: u32,
    pub argv: u32,
    pub block: usize,
}

pub struct Process {
    pub id: usize,
    pub filename: String,
    pub task: Task,
    pub page_directory: Paging4Gb,

    // Physical placement of the loaded image and the user stack.
    pub image: usize,
    pub image_size: usize,
    pub image_format: ProcessImageFormat,
    pub virtual_base: usize,
    pub stack: usize,

    pub allocations: [Option<ProcessAllocation>; MAX_PROGRAM_ALLOCATIONS],
    pub arguments: Option<ProgramArguments>,
    pub keyboard: KeyBuffer,
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::size_of;

    #[test]
    fn registers_layout_matches_task_return_offsets() {
        assert_eq!(size_of::<Registers>(), 48);

        // The assembly reads ss at +44, esp at +40, flags at +36, cs at +32
        // and ip at +28; pin the field order with offset checks.
        let registers = Registers::default();
        let base = &registers as *const Registers as usize;
        assert_eq!(&registers.ip as *const u32 as usize - base, 28);
        assert_eq!(&registers.cs as *const u32 as usize - base, 32);
        assert_eq!(&registers.flags as *const u32 as usize - base, 36);
        assert_eq!(&registers.esp as *const u32 as usize - base, 40);
        assert_eq!(&registers.ss as *const u32 as usize - base, 44);
    }
}
