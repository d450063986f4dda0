//! Flat-model segmentation. Six descriptors: null, kernel code/data at ring
//! 0, user code/data at ring 3, and the TSS. Segmentation does no isolation
//! work here; the TSS exists solely to supply ss0:esp0 on ring-3 to ring-0
//! traps.

use core::mem::size_of;

use lazy_static::lazy_static;
use spin::Mutex;

use crate::memory::defs::{KERNEL_STACK_TOP, TOTAL_GDT_SEGMENTS};
use crate::x86::defs::{DescriptorTablePointer, KERNEL_CODE_SELECTOR, KERNEL_DATA_SELECTOR, TSS_SELECTOR};
use crate::println;
use crate::x86::helpers::{lgdt, load_cs, load_data_segments, ltr};

// Access bytes for the five non-null descriptors.
pub const KERNEL_CODE_ACCESS: u8 = 0x9A;
pub const KERNEL_DATA_ACCESS: u8 = 0x92;
pub const USER_CODE_ACCESS: u8 = 0xF8;
pub const USER_DATA_ACCESS: u8 = 0xF2;
pub const TSS_ACCESS: u8 = 0xE9;

#[derive(Debug, Clone)]
pub struct GlobalDescriptorTable {
    table: [u64; TOTAL_GDT_SEGMENTS],
    len: usize,
}

/// The 32-bit TSS layout. Only `esp0`/`ss0` are ever written; the CPU reads
/// them on every privilege transition.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskStateSegment {
    pub link: u32,
    pub esp0: u32,
    pub ss0: u32,
    pub esp1: u32,
    pub ss1: u32,
    pub esp2: u32,
    pub ss2: u32,
    pub cr3: u32,
    pub eip: u32,
    pub eflags: u32,
    pub eax: u32,
    pub ecx: u32,
    pub edx: u32,
    pub ebx: u32,
    pub esp: u32,
    pub ebp: u32,
    pub esi: u32,
    pub edi: u32,
    pub es: u32,
    pub cs: u32,
    pub ss: u32,
    pub ds: u32,
    pub fs: u32,
    pub gs: u32,
    pub ldtr: u32,
    pub iopb: u32,
}

impl TaskStateSegment {
    pub const fn new() -> Self {
        TaskStateSegment {
            link: 0,
            esp0: 0,
            ss0: 0,
            esp1: 0,
            ss1: 0,
            esp2: 0,
            ss2: 0,
            cr3: 0,
            eip: 0,
            eflags: 0,
            eax: 0,
            ecx: 0,
            edx: 0,
            ebx: 0,
            esp: 0,
            ebp: 0,
            esi: 0,
            edi: 0,
            es: 0,
            cs: 0,
            ss: 0,
            ds: 0,
            fs: 0,
            gs: 0,
            ldtr: 0,
            iopb: 0,
        }
    }

    fn base_address(&self) -> u32 {
        self as *const TaskStateSegment as u32
    }
}

/// Encode a structured (base, limit, access) triple into a raw descriptor.
/// Limits above 64 KiB switch the descriptor to 4 KiB granularity; the low
/// twelve limit bits are then implied to be ones.
pub fn encode_segment(base: u32, limit: u32, access: u8) -> u64 {
    let (limit, flags) = if limit > 65536 {
        ((limit >> 12) as u64, 0xCu64)
    } else {
        (limit as u64, 0x4u64)
    };

    let base = base as u64;

    (base >> 24) << 56
        | flags << 52
        | ((limit >> 16) & 0xF) << 48
        | (access as u64) << 40
        | (base & 0xFFFFFF) << 16
        | (limit & 0xFFFF)
}

impl GlobalDescriptorTable {
    pub const fn new() -> Self {
        GlobalDescriptorTable {
            table: [0; TOTAL_GDT_SEGMENTS],
            len: 1,
        }
    }

    pub fn add_segment(&mut self, descriptor: u64) {
        if self.len >= self.table.len() {
            panic!("GDT is out of space");
        }

        self.table[self.len] = descriptor;
        self.len += 1;
    }

    pub fn descriptor(&self, index: usize) -> u64 {
        self.table[index]
    }

    fn pointer(&self) -> DescriptorTablePointer {
        DescriptorTablePointer {
            base: self.table.as_ptr() as u32,
            limit: (self.len * size_of::<u64>() - 1) as u16,
        }
    }

    pub fn refresh(&'static self) {
        lgdt(&self.pointer());
    }
}

pub static TSS: Mutex<TaskStateSegment> = Mutex::new(TaskStateSegment::new());

lazy_static! {
    static ref GLOBAL_GDT: GlobalDescriptorTable = {
        let mut gdt = GlobalDescriptorTable::new();

        gdt.add_segment(encode_segment(0, 0xFFFFFFFF, KERNEL_CODE_ACCESS));
        gdt.add_segment(encode_segment(0, 0xFFFFFFFF, KERNEL_DATA_ACCESS));
        gdt.add_segment(encode_segment(0, 0xFFFFFFFF, USER_CODE_ACCESS));
        gdt.add_segment(encode_segment(0, 0xFFFFFFFF, USER_DATA_ACCESS));

        let tss = TSS.lock();
        gdt.add_segment(encode_segment(
            tss.base_address(),
            (size_of::<TaskStateSegment>() - 1) as u32,
            TSS_ACCESS,
        ));

        gdt
    };
}

pub fn setup_gdt() {
    GLOBAL_GDT.refresh();
    load_cs(KERNEL_CODE_SELECTOR);
    load_data_segments(KERNEL_DATA_SELECTOR);

    println!("[KERNEL] Global Descriptor Table Initialized");
}

/// Point the TSS at the kernel stack and load the task register. Ordered
/// after `setup_gdt`; `ltr` faults if the TSS descriptor is not loaded yet.
pub fn setup_tss() {
    {
        let mut tss = TSS.lock();
        tss.esp0 = KERNEL_STACK_TOP;
        tss.ss0 = KERNEL_DATA_SELECTOR as u32;
    }

    ltr(TSS_SELECTOR);

    println!("[KERNEL] Task State Segment Loaded");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_segments_match_reference_encoding() {
        assert_eq!(encode_segment(0, 0xFFFFFFFF, KERNEL_CODE_ACCESS), 0x00CF9A000000FFFF);
        assert_eq!(encode_segment(0, 0xFFFFFFFF, KERNEL_DATA_ACCESS), 0x00CF92000000FFFF);
        assert_eq!(encode_segment(0, 0xFFFFFFFF, USER_CODE_ACCESS), 0x00CFF8000000FFFF);
        assert_eq!(encode_segment(0, 0xFFFFFFFF, USER_DATA_ACCESS), 0x00CFF2000000FFFF);
    }

    #[test]
    fn tss_descriptor_uses_byte_granularity() {
        // A TSS at 0x00108000 with the 104-byte limit.
        let descriptor = encode_segment(0x00108000, 103, TSS_ACCESS);
        assert_eq!(descriptor, 0x0040E91080000067);
    }

    #[test]
    fn tss_is_104_bytes() {
        assert_eq!(size_of::<TaskStateSegment>(), 104);
    }

    #[test]
    fn table_starts_after_null_descriptor() {
        let mut gdt = GlobalDescriptorTable::new();
        gdt.add_segment(encode_segment(0, 0xFFFFFFFF, KERNEL_CODE_ACCESS));
        assert_eq!(gdt.descriptor(0), 0);
        assert_eq!(gdt.descriptor(1), 0x00CF9A000000FFFF);
    }
}
