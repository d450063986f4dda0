//! The task ring. Tasks sit in a circular order with a `current` pointer;
//! scheduling is cooperative, so the ring only advances through an explicit
//! `exit` or a resumed syscall. `task_return` rebuilds an IRET frame from a
//! task's register snapshot and drops the CPU back into ring 3.

use spin::Mutex;

use crate::error::KernelError;
use crate::interrupts::defs::InterruptFrame;
use crate::memory::paging::with_directory;
use crate::scheduler::defs::{Registers, MAX_STACK_PEEK};
use crate::scheduler::process;
use crate::x86::defs::USER_DATA_SELECTOR;
use crate::x86::helpers::{load_cr3, load_data_segments};

#[cfg(all(target_arch = "x86", not(test)))]
core::arch::global_asm!(
    r#"
.section .text
.global task_return
task_return:
    mov ebp, esp
    mov ebx, [ebp + 4]

    // Build the IRET frame: ss, esp, flags (with IF forced on), cs, ip.
    push dword ptr [ebx + 44]
    push dword ptr [ebx + 40]
    mov eax, [ebx + 36]
    or eax, 0x200
    push eax
    push dword ptr [ebx + 32]
    push dword ptr [ebx + 28]

    // Data segments come from the task's stack selector.
    mov ax, [ebx + 44]
    mov ds, ax
    mov es, ax
    mov fs, ax
    mov gs, ax

    // General-purpose state, ebx last since it is the base pointer here.
    mov edi, [ebx + 0]
    mov esi, [ebx + 4]
    mov ebp, [ebx + 8]
    mov edx, [ebx + 16]
    mov ecx, [ebx + 20]
    mov eax, [ebx + 24]
    mov ebx, [ebx + 12]

    iretd
"#
);

#[cfg(all(target_arch = "x86", not(test)))]
extern "C" {
    fn task_return(registers: *const Registers) -> !;
}

fn return_to(registers: &Registers) -> ! {
    crate::sync::cli::reset();

    #[cfg(all(target_arch = "x86", not(test)))]
    unsafe {
        task_return(registers)
    }
    #[cfg(not(all(target_arch = "x86", not(test))))]
    {
        let _ = registers;
        unreachable!("task_return is only reachable on the i686 target");
    }
}

pub struct TaskRing {
    order: alloc::vec::Vec<usize>,
    current: Option<usize>,
}

impl TaskRing {
    pub const fn new() -> Self {
        TaskRing {
            order: alloc::vec::Vec::new(),
            current: None,
        }
    }

    pub fn insert(&mut self, process_id: usize) {
        self.order.push(process_id);
    }

    pub fn remove(&mut self, process_id: usize) {
        self.order.retain(|&id| id != process_id);
        if self.current == Some(process_id) {
            self.current = None;
        }
    }

    pub fn set_current(&mut self, process_id: usize) {
        self.current = Some(process_id);
    }

    pub fn current(&self) -> Option<usize> {
        self.current
    }

    pub fn head(&self) -> Option<usize> {
        self.order.first().copied()
    }

    /// The ring member after `process_id`, wrapping at the tail. Falls back
    /// to the head when `process_id` is no longer a member.
    pub fn next_after(&self, process_id: usize) -> Option<usize> {
        if self.order.is_empty() {
            return None;
        }

        match self.order.iter().position(|&id| id == process_id) {
            Some(position) => Some(self.order[(position + 1) % self.order.len()]),
            None => self.head(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

pub static TASK_RING: Mutex<TaskRing> = Mutex::new(TaskRing::new());

pub fn current() -> Option<usize> {
    TASK_RING.lock().current()
}

pub fn set_current(process_id: usize) {
    TASK_RING.lock().set_current(process_id);
}

pub fn insert(process_id: usize) {
    TASK_RING.lock().insert(process_id);
}

pub fn remove(process_id: usize) {
    TASK_RING.lock().remove(process_id);
}

/// Snapshot the interrupt frame into the current task. After this the task
/// can be resumed from its registers alone, which is what makes the
/// process-switching syscalls safe to never return.
pub fn save_current(frame: &InterruptFrame) {
    let Some(id) = current() else {
        return;
    };

    process::with_process(id, |p| {
        p.task.registers = Registers {
            edi: frame.edi,
            esi: frame.esi,
            ebp: frame.ebp,
            ebx: frame.ebx,
            edx: frame.edx,
            ecx: frame.ecx,
            eax: frame.eax,
            ip: frame.ip,
            cs: frame.cs,
            flags: frame.flags,
            esp: frame.esp,
            ss: frame.ss,
        };
    });
}

/// Switch the CPU's data segments and CR3 to the current task's view.
pub fn task_page() {
    let Some(id) = current() else {
        return;
    };

    let directory = match process::with_process(id, |p| p.task.page_directory) {
        Some(directory) => directory,
        None => return,
    };

    load_data_segments(USER_DATA_SELECTOR);
    load_cr3(directory);
}

/// Enter user mode for the first time: the ring head becomes current and its
/// registers become the IRET frame.
pub fn run_first_ever_task() -> ! {
    let head = TASK_RING
        .lock()
        .head()
        .expect("[FATAL] No task to run");

    set_current(head);

    let registers = process::with_process(head, |p| p.task.registers)
        .expect("[FATAL] Ring references a dead process");

    task_page();
    return_to(&registers)
}

/// Resume whichever task is current, without advancing the ring. Used after
/// a process switch has already retargeted `current`.
pub fn run_current() -> ! {
    let id = current().expect("[FATAL] No current task to resume");

    let registers = process::with_process(id, |p| p.task.registers)
        .expect("[FATAL] Current task has no process");

    task_page();
    return_to(&registers)
}

/// Advance the ring and resume the next task. Panics when the ring drains
/// completely; with no user process left there is nothing to schedule.
pub fn task_next() -> ! {
    let next = {
        let ring = TASK_RING.lock();
        let from = ring.current().unwrap_or(0);
        ring.next_after(from)
    };

    let Some(next) = next else {
        panic!("No tasks left to schedule");
    };

    set_current(next);

    let registers = process::with_process(next, |p| p.task.registers)
        .expect("[FATAL] Ring references a dead process");

    task_page();
    return_to(&registers)
}

/// Bounded peek of one dword from the current task's user stack, read
/// through the task's own page tables.
pub fn stack_item(index: usize) -> Result<u32, KernelError> {
    if index >= MAX_STACK_PEEK {
        return Err(KernelError::InvalidArg);
    }

    let id = current().ok_or(KernelError::InvalidArg)?;
    let (directory, esp) = process::with_process(id, |p| {
        (p.task.page_directory, p.task.registers.esp)
    })
    .ok_or(KernelError::InvalidArg)?;

    let address = esp as usize + index * 4;
    Ok(with_directory(directory, || unsafe {
        core::ptr::read_volatile(address as *const u32)
    }))
}

/// Copy a NUL-terminated string out of the current task's address space into
/// `out`, truncating at `out.len() - 1`. The copy runs inside the
/// with-user-pages region and touches no kernel heap.
pub fn copy_string_from_task(virt: u32, out: &mut [u8]) -> Result<usize, KernelError> {
    if out.is_empty() {
        return Err(KernelError::InvalidArg);
    }

    let id = current().ok_or(KernelError::InvalidArg)?;
    let directory = process::with_process(id, |p| p.task.page_directory)
        .ok_or(KernelError::InvalidArg)?;

    let copied = with_directory(directory, || {
        let mut copied = 0;
        while copied < out.len() - 1 {
            let byte = unsafe { core::ptr::read_volatile((virt as usize + copied) as *const u8) };
            if byte == 0 {
                break;
            }
            out[copied] = byte;
            copied += 1;
        }
        out[copied] = 0;
        copied
    });

    Ok(copied)
}

/// Write one dword into the current task's address space.
pub fn write_user_u32(virt: u32, value: u32) -> Result<(), KernelError> {
    let id = current().ok_or(KernelError::InvalidArg)?;
    let directory = process::with_process(id, |p| p.task.page_directory)
        .ok_or(KernelError::InvalidArg)?;

    with_directory(directory, || unsafe {
        core::ptr::write_volatile(virt as *mut u32, value);
    });

    Ok(())
}

/// Read one raw user-space dword at `virt` from the current task.
pub fn read_user_u32(virt: u32) -> Result<u32, KernelError> {
    let id = current().ok_or(KernelError::InvalidArg)?;
    let directory = process::with_process(id, |p| p.task.page_directory)
        .ok_or(KernelError::InvalidArg)?;

    Ok(with_directory(directory, || unsafe {
        core::ptr::read_volatile(virt as *const u32)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_rotates_in_insertion_order() {
        let mut ring = TaskRing::new();
        ring.insert(3);
        ring.insert(7);
        ring.insert(9);

        assert_eq!(ring.head(), Some(3));
        assert_eq!(ring.next_after(3), Some(7));
        assert_eq!(ring.next_after(7), Some(9));
        assert_eq!(ring.next_after(9), Some(3));
    }

    #[test]
    fn removal_closes_the_ring() {
        let mut ring = TaskRing::new();
        ring.insert(1);
        ring.insert(2);
        ring.insert(3);
        ring.set_current(2);

        ring.remove(2);
        assert_eq!(ring.current(), None);
        assert_eq!(ring.next_after(1), Some(3));
        assert_eq!(ring.next_after(3), Some(1));

        // A stale id falls back to the head instead of dangling.
        assert_eq!(ring.next_after(2), Some(1));
    }

    #[test]
    fn empty_ring_has_no_next() {
        let ring = TaskRing::new();
        assert_eq!(ring.next_after(0), None);
        assert!(ring.is_empty());
    }

    #[test]
    fn single_task_wraps_to_itself() {
        let mut ring = TaskRing::new();
        ring.insert(5);
        assert_eq!(ring.next_after(5), Some(5));
    }
}
