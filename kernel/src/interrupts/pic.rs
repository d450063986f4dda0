//! 8259 PIC glue. The remap itself (master vector base to 0x20) happens in
//! the kernel's first assembly block before `kernel_main`; what remains here
//! is the end-of-interrupt acknowledgement every IRQ handler owes the PIC.

use crate::x86::helpers::outb;

const PIC1_COMMAND: u16 = 0x20;
const PIC_EOI: u8 = 0x20;

pub fn acknowledge() {
    outb(PIC1_COMMAND, PIC_EOI);
}
