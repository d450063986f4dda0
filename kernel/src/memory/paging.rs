//! Two-level 32-bit paging. Every address space is a `Paging4Gb` chunk: one
//! page directory plus 1024 page tables mapping the full 4 GiB linearly, so
//! kernel code and data stay addressable under any CR3. Per-process maps then
//! retarget individual pages (program image, user stack, tracked
//! allocations) on top of that linear base.

use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use crate::error::KernelError;
use crate::memory::defs::{PageFlags, PAGE_DIR_SHIFT, PAGE_SIZE, PAGE_TABLE_ENTRIES, PAGE_TABLE_SHIFT};
use crate::memory::heap::{kfree, kzalloc};
use crate::println;
use crate::x86::helpers::{self, load_cr3};

pub fn directory_index(virt: usize) -> usize {
    (virt >> PAGE_DIR_SHIFT) & 0x3FF
}

pub fn table_index(virt: usize) -> usize {
    (virt >> PAGE_TABLE_SHIFT) & 0x3FF
}

pub fn is_page_aligned(address: usize) -> bool {
    address % PAGE_SIZE == 0
}

pub fn align_up(address: usize) -> usize {
    crate::round_up!(address, PAGE_SIZE)
}

pub fn align_down(address: usize) -> usize {
    crate::round_down!(address, PAGE_SIZE)
}

/// Compose a page table entry from a physical frame and attribute bits.
pub fn entry(physical: u32, flags: PageFlags) -> u32 {
    (physical & 0xFFFFF000) | flags.bits()
}

/// A page directory owning its 1024 page tables, all heap-allocated.
pub struct Paging4Gb {
    directory: *mut u32,
}

unsafe impl Send for Paging4Gb {}

impl Paging4Gb {
    /// Build a fresh chunk with every 4 KiB page mapped to the identical
    /// physical address, tagged with `flags`. Directory entries always carry
    /// WRITABLE so per-page attributes alone decide access.
    pub fn new(flags: PageFlags) -> Option<Paging4Gb> {
        let directory = kzalloc(PAGE_SIZE) as *mut u32;
        if directory.is_null() {
            return None;
        }

        let chunk = Paging4Gb { directory };

        for dir_index in 0..PAGE_TABLE_ENTRIES {
            let table = kzalloc(PAGE_SIZE) as *mut u32;
            if table.is_null() {
                return None;
            }

            let base = dir_index * PAGE_TABLE_ENTRIES * PAGE_SIZE;
            for table_entry in 0..PAGE_TABLE_ENTRIES {
                unsafe {
                    *table.add(table_entry) =
                        entry((base + table_entry * PAGE_SIZE) as u32, flags);
                }
            }

            unsafe {
                *directory.add(dir_index) =
                    entry(table as u32, flags | PageFlags::WRITABLE);
            }
        }

        Some(chunk)
    }

    pub fn directory_address(&self) -> usize {
        self.directory as usize
    }

    /// Make this chunk the active address space.
    pub fn switch(&self) {
        load_cr3(self.directory as usize);
    }

    fn table_for(&self, virt: usize) -> *mut u32 {
        let directory_entry = unsafe { *self.directory.add(directory_index(virt)) };
        (directory_entry & 0xFFFF_F000) as *mut u32
    }

    /// Write a raw entry for one virtual page.
    pub fn set(&mut self, virt: usize, value: u32) -> Result<(), KernelError> {
        if !is_page_aligned(virt) {
            return Err(KernelError::InvalidArg);
        }

        let table = self.table_for(virt);
        unsafe { *table.add(table_index(virt)) = value };
        Ok(())
    }

    /// Read the raw entry for one virtual page.
    pub fn get(&self, virt: usize) -> u32 {
        let table = self.table_for(align_down(virt));
        unsafe { *table.add(table_index(virt)) }
    }

    pub fn map(&mut self, virt: usize, phys: usize, flags: PageFlags) -> Result<(), KernelError> {
        if !is_page_aligned(virt) || !is_page_aligned(phys) {
            return Err(KernelError::InvalidArg);
        }

        self.set(virt, entry(phys as u32, flags))
    }

    /// Install `count` contiguous page mappings starting at (virt, phys).
    pub fn map_range(
        &mut self,
        virt: usize,
        phys: usize,
        count: usize,
        flags: PageFlags,
    ) -> Result<(), KernelError> {
        for page in 0..count {
            self.map(virt + page * PAGE_SIZE, phys + page * PAGE_SIZE, flags)?;
        }
        Ok(())
    }

    /// Map the physical span `[phys, phys_end)` at `virt`.
    pub fn map_to(
        &mut self,
        virt: usize,
        phys: usize,
        phys_end: usize,
        flags: PageFlags,
    ) -> Result<(), KernelError> {
        if phys_end < phys || !is_page_aligned(phys_end) {
            return Err(KernelError::InvalidArg);
        }

        self.map_range(virt, phys, (phys_end - phys) / PAGE_SIZE, flags)
    }
}

impl Drop for Paging4Gb {
    fn drop(&mut self) {
        if self.directory.is_null() {
            return;
        }

        for dir_index in 0..PAGE_TABLE_ENTRIES {
            let directory_entry = unsafe { *self.directory.add(dir_index) };
            let table = (directory_entry & 0xFFFF_F000) as *mut u8;
            kfree(table);
        }

        kfree(self.directory as *mut u8);
    }
}

pub static KERNEL_CHUNK: Mutex<Option<Paging4Gb>> = Mutex::new(None);

static IN_USER_PAGES: AtomicBool = AtomicBool::new(false);

/// Build the kernel's own chunk, make it current, and turn on CR0.PG.
pub fn setup_paging() {
    let chunk = Paging4Gb::new(
        PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::ACCESS_FROM_ALL,
    )
    .expect("[FATAL] Could not allocate the kernel page directory");

    chunk.switch();
    *KERNEL_CHUNK.lock() = Some(chunk);

    helpers::enable_paging();

    println!("[KERNEL] Paging Enabled");
}

pub fn kernel_directory() -> usize {
    KERNEL_CHUNK
        .lock()
        .as_ref()
        .expect("[FATAL] Kernel page directory is not set up")
        .directory_address()
}

pub fn switch_to_kernel_directory() {
    load_cr3(kernel_directory());
}

/// True while a with-user-pages region is active. Kernel heap operations are
/// forbidden inside one; `kmalloc`/`kfree` assert on this in debug builds.
pub fn in_user_pages() -> bool {
    IN_USER_PAGES.load(Ordering::Relaxed)
}

/// Run `f` with `directory` loaded in CR3, restoring the kernel directory
/// afterwards. The closure must not touch the kernel heap.
pub fn with_directory<R>(directory: usize, f: impl FnOnce() -> R) -> R {
    let kernel = kernel_directory();

    IN_USER_PAGES.store(true, Ordering::Relaxed);
    load_cr3(directory);

    let result = f();

    load_cr3(kernel);
    IN_USER_PAGES.store(false, Ordering::Relaxed);

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_split_covers_the_address() {
        let virt = 0x00400000 + 5 * PAGE_SIZE + 123;
        assert_eq!(directory_index(virt), 1);
        assert_eq!(table_index(virt), 5);

        assert_eq!(directory_index(0), 0);
        assert_eq!(table_index(0), 0);
        assert_eq!(directory_index(0xFFFFF000), 1023);
        assert_eq!(table_index(0xFFFFF000), 1023);
    }

    #[test]
    fn entries_keep_frame_and_flags_separate() {
        let flags = PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::ACCESS_FROM_ALL;
        let e = entry(0x00800000, flags);
        assert_eq!(e & 0xFFFFF000, 0x00800000);
        assert_eq!(e & 0xFFF, flags.bits());

        // Unaligned frames are truncated to their page.
        assert_eq!(entry(0x00800FFF, PageFlags::PRESENT) & 0xFFFFF000, 0x00800000);
    }

    #[test]
    fn alignment_helpers() {
        assert!(is_page_aligned(0x400000));
        assert!(!is_page_aligned(0x400001));
        assert_eq!(align_up(0x400001), 0x401000);
        assert_eq!(align_up(0x400000), 0x400000);
        assert_eq!(align_down(0x400FFF), 0x400000);
    }
}
