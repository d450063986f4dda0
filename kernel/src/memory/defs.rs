use bitflags::bitflags;

pub const PAGE_SIZE: usize = 4096;
pub const SECTOR_SIZE: usize = 512;

// Kernel heap: a fixed region of 4 KiB blocks with its block table in the
// low-memory scratch area left by the boot sector.
pub const HEAP_ADDRESS: usize = 0x01000000;
pub const HEAP_SIZE_BYTES: usize = 100 * 1024 * 1024;
pub const HEAP_BLOCK_SIZE: usize = PAGE_SIZE;
pub const HEAP_TABLE_ADDRESS: usize = 0x00007E00;
pub const HEAP_TOTAL_BLOCKS: usize = HEAP_SIZE_BYTES / HEAP_BLOCK_SIZE;

// The kernel stack handed to ring-0 entries through the TSS.
pub const KERNEL_STACK_TOP: u32 = 0x600000;

// User-mode address layout: the program image sits at 4 MiB, its stack in
// the fixed window just below (the stack grows down from START to END).
pub const PROGRAM_VIRTUAL_ADDRESS: usize = 0x400000;
pub const USER_STACK_SIZE: usize = 1024 * 16;
pub const USER_STACK_VIRTUAL_START: usize = 0x3FF000;
pub const USER_STACK_VIRTUAL_END: usize = USER_STACK_VIRTUAL_START - USER_STACK_SIZE;

pub const TOTAL_GDT_SEGMENTS: usize = 6;

bitflags! {
    /// Page directory / page table entry attribute bits.
    pub struct PageFlags: u32 {
        const PRESENT        = 1 << 0;
        const WRITABLE       = 1 << 1;
        const ACCESS_FROM_ALL = 1 << 2;
        const WRITE_THROUGH  = 1 << 3;
        const CACHE_DISABLE  = 1 << 4;
    }
}

pub const PAGE_DIR_SHIFT: usize = 22;
pub const PAGE_TABLE_SHIFT: usize = 12;
pub const PAGE_TABLE_ENTRIES: usize = 1024;

#[macro_export]
macro_rules! round_up {
    ($value:expr, $align:expr) => {
        ($value + $align - 1) / $align * $align
    };
}

#[macro_export]
macro_rules! round_down {
    ($value:expr, $align:expr) => {
        $value / $align * $align
    };
}
