//! The interrupt entry stubs. Every vector funnels through the same frame
//! shape: PUSHAD over the CPU-pushed return state, so the C-level dispatcher
//! sees a full `InterruptFrame` and anything it writes there is restored by
//! POPAD before IRET. The syscall wrapper relies on that for its return
//! value: the handler stores into `frame.eax` and POPAD carries it out.

#[cfg(all(target_arch = "x86", not(test)))]
core::arch::global_asm!(
    r#"
.section .text
.altmacro

.macro isr_stub number
isr_stub_\number:
    pushad
    push esp
    push \number
    call interrupt_dispatch
    add esp, 8
    popad
    iretd
.endm

.set vector, 0
.rept 256
    isr_stub %vector
    .set vector, vector + 1
.endr

.global isr80h_wrapper
isr80h_wrapper:
    pushad
    push esp
    call syscall_dispatch
    add esp, 4
    popad
    iretd

.macro stub_address number
    .long isr_stub_\number
.endm

.section .rodata
.global INTERRUPT_STUB_TABLE
INTERRUPT_STUB_TABLE:
.set vector, 0
.rept 256
    stub_address %vector
    .set vector, vector + 1
.endr
.section .text
"#
);
