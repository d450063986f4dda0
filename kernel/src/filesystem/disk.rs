//! Disk registry. Each disk is a sector-granular block device plus the
//! filesystem that recognized it during the boot probe. The `BlockIo` seam
//! keeps the layers above independent of ATA; tests drive the whole stack
//! against an in-memory disk.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

use core::any::Any;

use lazy_static::lazy_static;
use spin::Mutex;

use crate::error::KernelError;
use crate::println;
use crate::filesystem::ata::AtaDisk;
use crate::filesystem::vfs::{self, FileSystem};
use crate::memory::defs::SECTOR_SIZE;

pub trait BlockIo: Send + Sync {
    fn read_sectors(&self, lba: u32, count: u32, buffer: &mut [u8]) -> Result<(), KernelError>;
    fn write_sectors(&self, lba: u32, count: u32, buffer: &[u8]) -> Result<(), KernelError>;
}

pub struct Disk {
    pub id: u32,
    pub sector_size: usize,
    pub io: Arc<dyn BlockIo>,
    pub filesystem: Option<&'static dyn FileSystem>,
    pub fs_private: Option<Box<dyn Any + Send + Sync>>,
}

impl Disk {
    pub fn new(id: u32, io: Arc<dyn BlockIo>) -> Self {
        Disk {
            id,
            sector_size: SECTOR_SIZE,
            io,
            filesystem: None,
            fs_private: None,
        }
    }
}

lazy_static! {
    static ref DISKS: Mutex<Vec<Arc<Disk>>> = Mutex::new(Vec::new());
}

/// Probe the disk against the registered filesystems and publish it. Disks
/// without a recognized filesystem are still registered; opening files on
/// them fails at the VFS layer.
pub fn register_disk(mut disk: Disk) {
    if let Err(KernelError::NotOurs) = vfs::resolve_disk(&mut disk) {
        println!("[KERNEL] Disk {} has no recognized filesystem", disk.id);
    }

    DISKS.lock().push(Arc::new(disk));
}

pub fn get(id: u32) -> Option<Arc<Disk>> {
    DISKS.lock().iter().find(|disk| disk.id == id).cloned()
}

/// Boot-time probe: the only supported disk is the ATA master on the
/// primary bus, registered as disk 0.
pub fn disk_search_and_init() {
    register_disk(Disk::new(0, Arc::new(AtaDisk::primary_master())));

    println!("[KERNEL] Disk Probe Complete");
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// Sector-addressed RAM disk for host tests.
    pub struct MemDisk {
        data: StdMutex<Vec<u8>>,
    }

    impl MemDisk {
        pub fn new(data: Vec<u8>) -> Self {
            MemDisk {
                data: StdMutex::new(data),
            }
        }
    }

    impl BlockIo for MemDisk {
        fn read_sectors(&self, lba: u32, count: u32, buffer: &mut [u8]) -> Result<(), KernelError> {
            let data = self.data.lock().unwrap();
            let start = lba as usize * SECTOR_SIZE;
            let length = count as usize * SECTOR_SIZE;

            if start + length > data.len() || buffer.len() < length {
                return Err(KernelError::Io);
            }

            buffer[..length].copy_from_slice(&data[start..start + length]);
            Ok(())
        }

        fn write_sectors(&self, lba: u32, count: u32, buffer: &[u8]) -> Result<(), KernelError> {
            let mut data = self.data.lock().unwrap();
            let start = lba as usize * SECTOR_SIZE;
            let length = count as usize * SECTOR_SIZE;

            if start + length > data.len() || buffer.len() < length {
                return Err(KernelError::Io);
            }

            data[start..start + length].copy_from_slice(&buffer[..length]);
            Ok(())
        }
    }
}
