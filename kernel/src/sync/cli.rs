//! Nested interrupt masking for the single-CPU kernel. Sections that touch
//! the task ring, the active page directory, or an open disk transaction
//! run inside a `push_cli`/`pop_cli` pair; the outermost pop restores the
//! interrupt flag to its state at the outermost push.

use core::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use crate::x86::helpers::{cli, interrupts_enabled, sti};

static CLI_DEPTH: AtomicI32 = AtomicI32::new(0);
static WERE_ENABLED: AtomicBool = AtomicBool::new(false);

pub fn push_cli() {
    let enabled = interrupts_enabled();
    cli();

    if CLI_DEPTH.load(Ordering::Relaxed) == 0 {
        WERE_ENABLED.store(enabled, Ordering::Relaxed);
    }

    CLI_DEPTH.fetch_add(1, Ordering::Relaxed);
}

pub fn pop_cli() {
    let depth = CLI_DEPTH.load(Ordering::Relaxed);
    if depth >= 1 {
        CLI_DEPTH.store(depth - 1, Ordering::Relaxed);
    }

    if depth - 1 <= 0 && WERE_ENABLED.load(Ordering::Relaxed) {
        sti();
    }
}

/// Forget any outstanding depth. Called on the return-to-user path, where
/// guards opened by a diverging syscall (exit, process switch) can never
/// unwind; IRET re-enables interrupts itself.
pub fn reset() {
    CLI_DEPTH.store(0, Ordering::Relaxed);
    WERE_ENABLED.store(false, Ordering::Relaxed);
}

/// Scope guard form of `push_cli`/`pop_cli`.
pub struct InterruptGuard;

impl InterruptGuard {
    pub fn enter() -> Self {
        push_cli();
        InterruptGuard
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        pop_cli();
    }
}
