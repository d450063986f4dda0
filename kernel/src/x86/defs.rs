//! Selector numbering is fixed by the GDT layout: null, kernel code, kernel
//! data, user code, user data, TSS. User selectors carry RPL 3.

pub const KERNEL_CODE_SELECTOR: u16 = 0x08;
pub const KERNEL_DATA_SELECTOR: u16 = 0x10;
pub const USER_CODE_SELECTOR: u16 = 0x1B;
pub const USER_DATA_SELECTOR: u16 = 0x23;
pub const TSS_SELECTOR: u16 = 0x28;

pub const EFLAGS_INTERRUPTS_ENABLED: u32 = 0x200;

#[derive(Debug, Clone, Copy)]
#[repr(C, packed(2))]
pub struct DescriptorTablePointer {
    pub limit: u16,
    pub base: u32,
}
