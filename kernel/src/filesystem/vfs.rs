//! The virtual filesystem layer. Filesystems register as capability records
//! behind the `FileSystem` trait; disk resolution walks the registry and the
//! first implementation that recognizes a volume binds it. Open files live
//! in a fixed descriptor table — index 0 is reserved, indices from 1 up are
//! handed out densely and reused after close.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use core::any::Any;

use lazy_static::lazy_static;
use spin::Mutex;

use crate::println;

use crate::error::KernelError;
use crate::filesystem::disk::{self, Disk};
use crate::filesystem::fat16::FAT16;
use crate::filesystem::path;

pub const MAX_FILE_DESCRIPTORS: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    Read,
    Write,
    Append,
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    Set,
    Current,
    End,
}

#[derive(Debug, Clone, Copy)]
pub struct FileStat {
    pub size: u32,
    pub attributes: u8,
}

/// The capability record every filesystem implements. `resolve` inspects a
/// disk and returns the filesystem-private binding on recognition;
/// everything else operates on descriptors produced by `open`.
pub trait FileSystem: Send + Sync {
    fn name(&self) -> &'static str;
    fn resolve(&self, disk: &Disk) -> Result<Box<dyn Any + Send + Sync>, KernelError>;
    fn open(
        &self,
        disk: &Arc<Disk>,
        parts: &[String],
        mode: FileMode,
    ) -> Result<Box<dyn Any + Send>, KernelError>;
    fn read(
        &self,
        disk: &Arc<Disk>,
        descriptor: &mut (dyn Any + Send),
        out: &mut [u8],
    ) -> Result<usize, KernelError>;
    fn seek(
        &self,
        descriptor: &mut (dyn Any + Send),
        offset: i32,
        whence: SeekMode,
    ) -> Result<(), KernelError>;
    fn stat(&self, descriptor: &(dyn Any + Send)) -> Result<FileStat, KernelError>;
    fn close(&self, descriptor: Box<dyn Any + Send>) -> Result<(), KernelError>;
}

lazy_static! {
    static ref FILESYSTEMS: Mutex<Vec<&'static dyn FileSystem>> = Mutex::new(Vec::new());
}

struct FileDescriptor {
    disk: Arc<Disk>,
    private: Box<dyn Any + Send>,
    mode: FileMode,
}

lazy_static! {
    static ref FILE_DESCRIPTORS: Mutex<Vec<Option<FileDescriptor>>> =
        Mutex::new(Vec::new());
}

pub fn register_filesystem(filesystem: &'static dyn FileSystem) {
    FILESYSTEMS.lock().push(filesystem);
}

/// Install the built-in filesystems. FAT16 is the only one.
pub fn fs_init() {
    register_filesystem(&FAT16);

    println!("[KERNEL] Filesystems Registered");
}

/// Probe `disk` against every registered filesystem; the first match binds
/// its private data into the disk.
pub fn resolve_disk(disk: &mut Disk) -> Result<(), KernelError> {
    for filesystem in FILESYSTEMS.lock().iter() {
        match filesystem.resolve(disk) {
            Ok(private) => {
                disk.filesystem = Some(*filesystem);
                disk.fs_private = Some(private);
                return Ok(());
            }
            Err(_) => continue,
        }
    }

    Err(KernelError::NotOurs)
}

fn allocate_descriptor_slot(table: &mut Vec<Option<FileDescriptor>>) -> Result<usize, KernelError> {
    if table.is_empty() {
        // Slot 0 exists but is never handed out.
        table.push(None);
    }

    for index in 1..table.len() {
        if table[index].is_none() {
            return Ok(index);
        }
    }

    if table.len() <= MAX_FILE_DESCRIPTORS {
        table.push(None);
        return Ok(table.len() - 1);
    }

    Err(KernelError::Busy)
}

pub fn fopen(path_str: &str, mode: FileMode) -> Result<usize, KernelError> {
    if mode == FileMode::Invalid {
        return Err(KernelError::InvalidArg);
    }

    let parsed = path::parse(path_str)?;
    let disk = disk::get(parsed.disk_id).ok_or(KernelError::Io)?;
    let filesystem = disk.filesystem.ok_or(KernelError::Io)?;

    let private = filesystem.open(&disk, &parsed.parts, mode)?;

    let mut table = FILE_DESCRIPTORS.lock();
    let index = allocate_descriptor_slot(&mut table)?;
    table[index] = Some(FileDescriptor {
        disk,
        private,
        mode,
    });

    Ok(index)
}

/// Read `elem_size * elem_count` bytes into `out`. Returns the number of
/// whole elements read; a read past EOF truncates rather than erroring.
pub fn fread(
    fd: usize,
    out: &mut [u8],
    elem_size: usize,
    elem_count: usize,
) -> Result<usize, KernelError> {
    if elem_size == 0 {
        return Err(KernelError::InvalidArg);
    }

    let total = elem_size
        .checked_mul(elem_count)
        .ok_or(KernelError::InvalidArg)?;
    if out.len() < total {
        return Err(KernelError::InvalidArg);
    }

    let mut table = FILE_DESCRIPTORS.lock();
    let descriptor = table
        .get_mut(fd)
        .and_then(|slot| slot.as_mut())
        .ok_or(KernelError::InvalidArg)?;

    let filesystem = descriptor.disk.filesystem.ok_or(KernelError::Io)?;
    let bytes = filesystem.read(
        &descriptor.disk,
        descriptor.private.as_mut(),
        &mut out[..total],
    )?;

    Ok(bytes / elem_size)
}

pub fn fseek(fd: usize, offset: i32, whence: SeekMode) -> Result<(), KernelError> {
    let mut table = FILE_DESCRIPTORS.lock();
    let descriptor = table
        .get_mut(fd)
        .and_then(|slot| slot.as_mut())
        .ok_or(KernelError::InvalidArg)?;

    let filesystem = descriptor.disk.filesystem.ok_or(KernelError::Io)?;
    filesystem.seek(descriptor.private.as_mut(), offset, whence)
}

pub fn fstat(fd: usize) -> Result<FileStat, KernelError> {
    let table = FILE_DESCRIPTORS.lock();
    let descriptor = table
        .get(fd)
        .and_then(|slot| slot.as_ref())
        .ok_or(KernelError::InvalidArg)?;

    let filesystem = descriptor.disk.filesystem.ok_or(KernelError::Io)?;
    filesystem.stat(descriptor.private.as_ref())
}

/// Close the descriptor and clear the slot for reuse.
pub fn fclose(fd: usize) -> Result<(), KernelError> {
    let descriptor = {
        let mut table = FILE_DESCRIPTORS.lock();
        table
            .get_mut(fd)
            .and_then(|slot| slot.take())
            .ok_or(KernelError::InvalidArg)?
    };

    let filesystem = descriptor.disk.filesystem.ok_or(KernelError::Io)?;
    filesystem.close(descriptor.private)
}

#[allow(dead_code)]
fn mode_of(fd: usize) -> Option<FileMode> {
    FILE_DESCRIPTORS
        .lock()
        .get(fd)
        .and_then(|slot| slot.as_ref())
        .map(|descriptor| descriptor.mode)
}
