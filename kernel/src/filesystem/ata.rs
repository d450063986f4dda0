//! ATA PIO driver for the master drive on the primary bus, LBA28 only.
//! Transfers poll the status register; there is no interrupt-driven path.

use crate::error::KernelError;
use crate::filesystem::disk::BlockIo;
use crate::memory::defs::SECTOR_SIZE;
use crate::sync::cli::InterruptGuard;
use crate::x86::helpers::{inb, insw, outb, outsw};

const ATA_DATA: u16 = 0x1F0;
const ATA_SECTOR_COUNT: u16 = 0x1F2;
const ATA_LBA_LOW: u16 = 0x1F3;
const ATA_LBA_MID: u16 = 0x1F4;
const ATA_LBA_HIGH: u16 = 0x1F5;
const ATA_DRIVE_HEAD: u16 = 0x1F6;
const ATA_STATUS: u16 = 0x1F7;
const ATA_COMMAND: u16 = 0x1F7;

const ATA_COMMAND_READ: u8 = 0x20;
const ATA_COMMAND_WRITE: u8 = 0x30;
const ATA_COMMAND_FLUSH: u8 = 0xE7;

const STATUS_ERR: u8 = 0x01;
const STATUS_DRQ: u8 = 0x08;
const STATUS_BSY: u8 = 0x80;

// LBA mode, master drive; the low nibble takes LBA bits 24..27.
const DRIVE_MASTER_LBA: u8 = 0xE0;

const MAX_LBA28: u32 = 0x0FFF_FFFF;
const POLL_LIMIT: usize = 1_000_000;

pub struct AtaDisk {
    drive: u8,
}

impl AtaDisk {
    pub fn primary_master() -> Self {
        AtaDisk { drive: 0 }
    }

    fn select(&self, lba: u32, count: u32) {
        outb(
            ATA_DRIVE_HEAD,
            DRIVE_MASTER_LBA | (self.drive << 4) | ((lba >> 24) & 0x0F) as u8,
        );
        outb(ATA_SECTOR_COUNT, count as u8);
        outb(ATA_LBA_LOW, lba as u8);
        outb(ATA_LBA_MID, (lba >> 8) as u8);
        outb(ATA_LBA_HIGH, (lba >> 16) as u8);
    }
}

fn wait_not_busy() -> Result<(), KernelError> {
    for _ in 0..POLL_LIMIT {
        if inb(ATA_STATUS) & STATUS_BSY == 0 {
            return Ok(());
        }
    }
    Err(KernelError::Io)
}

fn wait_data_request() -> Result<(), KernelError> {
    for _ in 0..POLL_LIMIT {
        let status = inb(ATA_STATUS);
        if status & STATUS_ERR != 0 {
            return Err(KernelError::Io);
        }
        if status & STATUS_DRQ != 0 {
            return Ok(());
        }
    }
    Err(KernelError::Io)
}

impl BlockIo for AtaDisk {
    fn read_sectors(&self, lba: u32, count: u32, buffer: &mut [u8]) -> Result<(), KernelError> {
        if lba > MAX_LBA28 || count == 0 || count > 256 {
            return Err(KernelError::Io);
        }
        if buffer.len() < count as usize * SECTOR_SIZE {
            return Err(KernelError::Io);
        }

        // One transaction per request; the disk registers are a singleton.
        let _guard = InterruptGuard::enter();

        wait_not_busy()?;
        self.select(lba, count);
        outb(ATA_COMMAND, ATA_COMMAND_READ);

        for sector in 0..count as usize {
            wait_data_request()?;
            insw(
                ATA_DATA,
                buffer[sector * SECTOR_SIZE..].as_mut_ptr(),
                SECTOR_SIZE / 2,
            );
        }

        Ok(())
    }

    fn write_sectors(&self, lba: u32, count: u32, buffer: &[u8]) -> Result<(), KernelError> {
        if lba > MAX_LBA28 || count == 0 || count > 256 {
            return Err(KernelError::Io);
        }
        if buffer.len() < count as usize * SECTOR_SIZE {
            return Err(KernelError::Io);
        }

        let _guard = InterruptGuard::enter();

        wait_not_busy()?;
        self.select(lba, count);
        outb(ATA_COMMAND, ATA_COMMAND_WRITE);

        for sector in 0..count as usize {
            wait_data_request()?;
            outsw(
                ATA_DATA,
                buffer[sector * SECTOR_SIZE..].as_ptr(),
                SECTOR_SIZE / 2,
            );
        }

        outb(ATA_COMMAND, ATA_COMMAND_FLUSH);
        wait_not_busy()?;

        Ok(())
    }
}
