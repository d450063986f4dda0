//! Byte-granular disk access over a sector-granular device. The streamer is
//! an owning cursor: reads and writes of arbitrary length are decomposed
//! into single-sector fetches through a private scratch buffer, so callers
//! never observe sector boundaries.

use alloc::sync::Arc;

use crate::error::KernelError;
use crate::filesystem::disk::{self, Disk};
use crate::memory::defs::SECTOR_SIZE;

pub struct DiskStreamer {
    disk: Arc<Disk>,
    position: usize,
}

/// Split the next step of a byte transfer at `position` into its sector,
/// the offset inside that sector, and how many bytes fit before the sector
/// boundary or the end of the request.
fn chunk(position: usize, remaining: usize) -> (u32, usize, usize) {
    let sector = position / SECTOR_SIZE;
    let offset = position % SECTOR_SIZE;
    let take = core::cmp::min(SECTOR_SIZE - offset, remaining);
    (sector as u32, offset, take)
}

impl DiskStreamer {
    pub fn new(disk: Arc<Disk>) -> Self {
        DiskStreamer { disk, position: 0 }
    }

    pub fn open(disk_id: u32) -> Result<Self, KernelError> {
        let disk = disk::get(disk_id).ok_or(KernelError::Io)?;
        Ok(DiskStreamer::new(disk))
    }

    pub fn seek(&mut self, position: usize) {
        self.position = position;
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Read `out.len()` bytes from the cursor, advancing it. A failed sector
    /// read is reported verbatim and leaves the cursor position unspecified.
    pub fn read(&mut self, out: &mut [u8]) -> Result<(), KernelError> {
        let mut scratch = [0u8; SECTOR_SIZE];
        let mut written = 0;

        while written < out.len() {
            let (sector, offset, take) = chunk(self.position, out.len() - written);

            self.disk.io.read_sectors(sector, 1, &mut scratch)?;
            out[written..written + take].copy_from_slice(&scratch[offset..offset + take]);

            written += take;
            self.position += take;
        }

        Ok(())
    }

    /// Write `data` at the cursor, advancing it. Partial sectors go through
    /// read-modify-write of the scratch buffer.
    pub fn write(&mut self, data: &[u8]) -> Result<(), KernelError> {
        let mut scratch = [0u8; SECTOR_SIZE];
        let mut consumed = 0;

        while consumed < data.len() {
            let (sector, offset, take) = chunk(self.position, data.len() - consumed);

            if take != SECTOR_SIZE {
                self.disk.io.read_sectors(sector, 1, &mut scratch)?;
            }
            scratch[offset..offset + take].copy_from_slice(&data[consumed..consumed + take]);
            self.disk.io.write_sectors(sector, 1, &scratch)?;

            consumed += take;
            self.position += take;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::disk::testing::MemDisk;

    fn streamer_over(data: Vec<u8>) -> DiskStreamer {
        let disk = Disk::new(99, Arc::new(MemDisk::new(data)));
        DiskStreamer::new(Arc::new(disk))
    }

    #[test]
    fn chunk_respects_sector_boundaries() {
        assert_eq!(chunk(0, 10), (0, 0, 10));
        assert_eq!(chunk(510, 10), (0, 510, 2));
        assert_eq!(chunk(512, 600), (1, 0, 512));
        assert_eq!(chunk(1000, 2000), (1, 488, 24));
    }

    #[test]
    fn reads_cross_sector_boundaries_transparently() {
        let mut image = vec![0u8; 4 * SECTOR_SIZE];
        for (i, byte) in image.iter_mut().enumerate() {
            *byte = (i % 251) as u8;
        }

        let mut streamer = streamer_over(image.clone());
        streamer.seek(500);

        let mut out = vec![0u8; 700];
        streamer.read(&mut out).unwrap();

        assert_eq!(&out[..], &image[500..1200]);
        assert_eq!(streamer.position(), 1200);
    }

    #[test]
    fn sequential_reads_continue_from_the_cursor() {
        let image: Vec<u8> = (0..2 * SECTOR_SIZE).map(|i| i as u8).collect();
        let mut streamer = streamer_over(image.clone());

        let mut first = [0u8; 3];
        let mut second = [0u8; 3];
        streamer.read(&mut first).unwrap();
        streamer.read(&mut second).unwrap();

        assert_eq!(&first, &image[0..3]);
        assert_eq!(&second, &image[3..6]);
    }

    #[test]
    fn writes_preserve_surrounding_bytes() {
        let image = vec![0xEEu8; 3 * SECTOR_SIZE];
        let disk = Arc::new(Disk::new(98, Arc::new(MemDisk::new(image))));
        let mut streamer = DiskStreamer::new(disk.clone());

        streamer.seek(510);
        streamer.write(&[1, 2, 3, 4]).unwrap();

        let mut check = DiskStreamer::new(disk);
        check.seek(508);
        let mut out = [0u8; 8];
        check.read(&mut out).unwrap();

        assert_eq!(out, [0xEE, 0xEE, 1, 2, 3, 4, 0xEE, 0xEE]);
    }

    #[test]
    fn read_past_device_end_reports_io_error() {
        let mut streamer = streamer_over(vec![0u8; SECTOR_SIZE]);
        streamer.seek(SECTOR_SIZE - 1);

        let mut out = [0u8; 2];
        assert_eq!(streamer.read(&mut out), Err(KernelError::Io));
    }
}
