//! Read-only FAT16. The resolver parses the BPB out of the volume's first
//! sector and precomputes the byte offsets of the FAT, the root directory
//! and the data region; everything after that is directory-entry matching
//! and cluster-chain walks through the disk streamer.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use core::any::Any;

use bitflags::bitflags;

use crate::error::KernelError;
use crate::filesystem::disk::Disk;
use crate::filesystem::streamer::DiskStreamer;
use crate::filesystem::vfs::{FileMode, FileStat, FileSystem, SeekMode};

pub const FAT16_SIGNATURE: u8 = 0x29;

const BOOT_SIGNATURE_OFFSET: usize = 510;
const EXTENDED_SIGNATURE_OFFSET: usize = 38;

const DIRECTORY_ENTRY_SIZE: usize = 32;
const ENTRY_FREE: u8 = 0x00;
const ENTRY_DELETED: u8 = 0xE5;

const FAT_ENTRY_SIZE: usize = 2;
const FAT_BAD_CLUSTER: u16 = 0xFFF7;
const FAT_END_OF_CHAIN: u16 = 0xFFF8;
const FIRST_DATA_CLUSTER: u16 = 2;

bitflags! {
    pub struct FatAttributes: u8 {
        const READ_ONLY    = 0x01;
        const HIDDEN       = 0x02;
        const SYSTEM       = 0x04;
        const VOLUME_LABEL = 0x08;
        const SUBDIRECTORY = 0x10;
        const ARCHIVE      = 0x20;
        const DEVICE       = 0x40;
    }
}

const ATTRIBUTE_LONG_NAME: u8 = 0x0F;

fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// The BPB fields FAT16 needs, plus the layout derived from them.
#[derive(Debug, Clone, Copy)]
pub struct Bpb {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub fat_copies: u8,
    pub root_dir_entries: u16,
    pub sectors_per_fat: u16,
}

impl Bpb {
    pub fn parse(sector: &[u8]) -> Result<Bpb, KernelError> {
        if sector.len() < 512 {
            return Err(KernelError::NotOurs);
        }

        if sector[BOOT_SIGNATURE_OFFSET] != 0x55 || sector[BOOT_SIGNATURE_OFFSET + 1] != 0xAA {
            return Err(KernelError::NotOurs);
        }

        if sector[EXTENDED_SIGNATURE_OFFSET] != FAT16_SIGNATURE {
            return Err(KernelError::NotOurs);
        }

        let bpb = Bpb {
            bytes_per_sector: read_u16(sector, 11),
            sectors_per_cluster: sector[13],
            reserved_sectors: read_u16(sector, 14),
            fat_copies: sector[16],
            root_dir_entries: read_u16(sector, 17),
            sectors_per_fat: read_u16(sector, 22),
        };

        if bpb.bytes_per_sector == 0
            || bpb.sectors_per_cluster == 0
            || bpb.fat_copies == 0
            || bpb.sectors_per_fat == 0
        {
            return Err(KernelError::NotOurs);
        }

        Ok(bpb)
    }

    pub fn fat_position(&self) -> usize {
        self.reserved_sectors as usize * self.bytes_per_sector as usize
    }

    pub fn root_dir_position(&self) -> usize {
        (self.reserved_sectors as usize
            + self.fat_copies as usize * self.sectors_per_fat as usize)
            * self.bytes_per_sector as usize
    }

    pub fn root_dir_size(&self) -> usize {
        self.root_dir_entries as usize * DIRECTORY_ENTRY_SIZE
    }

    pub fn data_position(&self) -> usize {
        self.root_dir_position() + self.root_dir_size()
    }

    pub fn cluster_size(&self) -> usize {
        self.sectors_per_cluster as usize * self.bytes_per_sector as usize
    }

    pub fn cluster_to_byte(&self, cluster: u16) -> usize {
        self.data_position() + (cluster - FIRST_DATA_CLUSTER) as usize * self.cluster_size()
    }
}

/// Per-disk private data bound by the resolver.
pub struct Fat16Private {
    pub bpb: Bpb,
}

/// One parsed 8.3 directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    pub name: [u8; 11],
    pub attributes: u8,
    pub first_cluster: u16,
    pub size: u32,
}

impl DirEntry {
    fn parse(data: &[u8]) -> DirEntry {
        let mut name = [0u8; 11];
        name.copy_from_slice(&data[0..11]);

        DirEntry {
            name,
            attributes: data[11],
            first_cluster: read_u16(data, 26),
            size: read_u32(data, 28),
        }
    }

    pub fn is_directory(&self) -> bool {
        self.attributes & FatAttributes::SUBDIRECTORY.bits() != 0
    }
}

/// A resolved path component: either a directory's parsed listing or a
/// plain file entry. Matching on the tag is how traversal decides whether
/// it can descend.
pub enum FatItem {
    Directory(Vec<DirEntry>),
    File(DirEntry),
}

/// Filesystem-private cursor behind a VFS file descriptor.
pub struct Fat16FileDescriptor {
    pub entry: DirEntry,
    pub position: u32,
}

/// Format a path component as the padded uppercase 8.3 name stored on disk.
pub fn to_8_3(component: &str) -> Option<[u8; 11]> {
    let (stem, extension) = match component.rsplit_once('.') {
        Some((stem, extension)) => (stem, extension),
        None => (component, ""),
    };

    if stem.is_empty() || stem.len() > 8 || extension.len() > 3 {
        return None;
    }
    if !stem.bytes().all(|b| b.is_ascii_graphic()) {
        return None;
    }
    if !extension.bytes().all(|b| b.is_ascii_graphic()) {
        return None;
    }

    let mut name = [b' '; 11];
    for (i, byte) in stem.bytes().enumerate() {
        name[i] = byte.to_ascii_uppercase();
    }
    for (i, byte) in extension.bytes().enumerate() {
        name[8 + i] = byte.to_ascii_uppercase();
    }

    Some(name)
}

fn find_entry(entries: &[DirEntry], component: &str) -> Option<DirEntry> {
    let wanted = to_8_3(component)?;
    entries.iter().copied().find(|entry| entry.name == wanted)
}

fn read_fat_entry(disk: &Arc<Disk>, bpb: &Bpb, cluster: u16) -> Result<u16, KernelError> {
    let mut streamer = DiskStreamer::new(disk.clone());
    streamer.seek(bpb.fat_position() + cluster as usize * FAT_ENTRY_SIZE);

    let mut raw = [0u8; FAT_ENTRY_SIZE];
    streamer.read(&mut raw)?;
    Ok(u16::from_le_bytes(raw))
}

/// Hop `offset / cluster_size` links down the chain from `start`.
fn cluster_for_offset(
    disk: &Arc<Disk>,
    bpb: &Bpb,
    start: u16,
    offset: usize,
) -> Result<u16, KernelError> {
    let mut cluster = start;

    for _ in 0..offset / bpb.cluster_size() {
        let next = read_fat_entry(disk, bpb, cluster)?;
        if next >= FAT_END_OF_CHAIN || next == FAT_BAD_CLUSTER || next < FIRST_DATA_CLUSTER {
            return Err(KernelError::Io);
        }
        cluster = next;
    }

    Ok(cluster)
}

/// Read file content bytes starting at `position`, clamped to the file
/// size. Returns how many bytes landed in `out`.
fn read_file_bytes(
    disk: &Arc<Disk>,
    bpb: &Bpb,
    entry: &DirEntry,
    position: u32,
    out: &mut [u8],
) -> Result<usize, KernelError> {
    let available = entry.size.saturating_sub(position) as usize;
    let total = core::cmp::min(out.len(), available);

    if total > 0 && entry.first_cluster < FIRST_DATA_CLUSTER {
        return Err(KernelError::Io);
    }

    let mut streamer = DiskStreamer::new(disk.clone());
    let mut done = 0;

    while done < total {
        let absolute = position as usize + done;
        let cluster = cluster_for_offset(disk, bpb, entry.first_cluster, absolute)?;
        let within = absolute % bpb.cluster_size();
        let take = core::cmp::min(bpb.cluster_size() - within, total - done);

        streamer.seek(bpb.cluster_to_byte(cluster) + within);
        streamer.read(&mut out[done..done + take])?;

        done += take;
    }

    Ok(total)
}

fn parse_directory_block(data: &[u8], entries: &mut Vec<DirEntry>) -> bool {
    for raw in data.chunks_exact(DIRECTORY_ENTRY_SIZE) {
        match raw[0] {
            ENTRY_FREE => return false,
            ENTRY_DELETED => continue,
            _ => {}
        }

        if raw[11] == ATTRIBUTE_LONG_NAME {
            continue;
        }
        if raw[11] & FatAttributes::VOLUME_LABEL.bits() != 0 {
            continue;
        }

        entries.push(DirEntry::parse(raw));
    }

    true
}

fn read_root_directory(disk: &Arc<Disk>, bpb: &Bpb) -> Result<Vec<DirEntry>, KernelError> {
    let mut streamer = DiskStreamer::new(disk.clone());
    streamer.seek(bpb.root_dir_position());

    let mut data = alloc::vec![0u8; bpb.root_dir_size()];
    streamer.read(&mut data)?;

    let mut entries = Vec::new();
    parse_directory_block(&data, &mut entries);
    Ok(entries)
}

fn read_subdirectory(
    disk: &Arc<Disk>,
    bpb: &Bpb,
    entry: &DirEntry,
) -> Result<Vec<DirEntry>, KernelError> {
    if entry.first_cluster < FIRST_DATA_CLUSTER {
        return Err(KernelError::Io);
    }

    let mut entries = Vec::new();
    let mut cluster = entry.first_cluster;
    let mut streamer = DiskStreamer::new(disk.clone());
    let mut data = alloc::vec![0u8; bpb.cluster_size()];

    loop {
        streamer.seek(bpb.cluster_to_byte(cluster));
        streamer.read(&mut data)?;

        if !parse_directory_block(&data, &mut entries) {
            break;
        }

        let next = read_fat_entry(disk, bpb, cluster)?;
        if next >= FAT_END_OF_CHAIN {
            break;
        }
        if next == FAT_BAD_CLUSTER || next < FIRST_DATA_CLUSTER {
            return Err(KernelError::Io);
        }
        cluster = next;
    }

    Ok(entries)
}

fn resolve_item(
    disk: &Arc<Disk>,
    bpb: &Bpb,
    entry: DirEntry,
) -> Result<FatItem, KernelError> {
    if entry.is_directory() {
        Ok(FatItem::Directory(read_subdirectory(disk, bpb, &entry)?))
    } else {
        Ok(FatItem::File(entry))
    }
}

pub struct Fat16;

pub static FAT16: Fat16 = Fat16;

impl FileSystem for Fat16 {
    fn name(&self) -> &'static str {
        "FAT16"
    }

    fn resolve(&self, disk: &Disk) -> Result<Box<dyn Any + Send + Sync>, KernelError> {
        let mut sector = [0u8; 512];
        disk.io
            .read_sectors(0, 1, &mut sector)
            .map_err(|_| KernelError::NotOurs)?;

        let bpb = Bpb::parse(&sector)?;
        Ok(Box::new(Fat16Private { bpb }))
    }

    fn open(
        &self,
        disk: &Arc<Disk>,
        parts: &[String],
        mode: FileMode,
    ) -> Result<Box<dyn Any + Send>, KernelError> {
        if mode != FileMode::Read {
            return Err(KernelError::ReadOnly);
        }

        let private = disk
            .fs_private
            .as_ref()
            .and_then(|p| p.downcast_ref::<Fat16Private>())
            .ok_or(KernelError::InvalidArg)?;
        let bpb = &private.bpb;

        let mut item = FatItem::Directory(read_root_directory(disk, bpb)?);

        for part in parts {
            let entries = match &item {
                FatItem::Directory(entries) => entries,
                // A file in the middle of the path cannot be descended into.
                FatItem::File(_) => return Err(KernelError::InvalidArg),
            };

            let entry = find_entry(entries, part).ok_or(KernelError::NotFound)?;
            item = resolve_item(disk, bpb, entry)?;
        }

        match item {
            FatItem::File(entry) => Ok(Box::new(Fat16FileDescriptor { entry, position: 0 })),
            FatItem::Directory(_) => Err(KernelError::InvalidArg),
        }
    }

    fn read(
        &self,
        disk: &Arc<Disk>,
        descriptor: &mut (dyn Any + Send),
        out: &mut [u8],
    ) -> Result<usize, KernelError> {
        let private = disk
            .fs_private
            .as_ref()
            .and_then(|p| p.downcast_ref::<Fat16Private>())
            .ok_or(KernelError::InvalidArg)?;

        let descriptor = descriptor
            .downcast_mut::<Fat16FileDescriptor>()
            .ok_or(KernelError::InvalidArg)?;

        let read = read_file_bytes(
            disk,
            &private.bpb,
            &descriptor.entry,
            descriptor.position,
            out,
        )?;

        descriptor.position += read as u32;
        Ok(read)
    }

    fn seek(
        &self,
        descriptor: &mut (dyn Any + Send),
        offset: i32,
        whence: SeekMode,
    ) -> Result<(), KernelError> {
        let descriptor = descriptor
            .downcast_mut::<Fat16FileDescriptor>()
            .ok_or(KernelError::InvalidArg)?;

        match whence {
            SeekMode::Set => {
                if offset < 0 {
                    return Err(KernelError::InvalidArg);
                }
                descriptor.position = offset as u32;
            }
            SeekMode::Current => {
                let position = descriptor.position as i64 + offset as i64;
                if position < 0 {
                    return Err(KernelError::InvalidArg);
                }
                descriptor.position = position as u32;
            }
            SeekMode::End => return Err(KernelError::Unsupported),
        }

        Ok(())
    }

    fn stat(&self, descriptor: &(dyn Any + Send)) -> Result<FileStat, KernelError> {
        let descriptor = descriptor
            .downcast_ref::<Fat16FileDescriptor>()
            .ok_or(KernelError::InvalidArg)?;

        Ok(FileStat {
            size: descriptor.entry.size,
            attributes: descriptor.entry.attributes,
        })
    }

    fn close(&self, descriptor: Box<dyn Any + Send>) -> Result<(), KernelError> {
        drop(descriptor);
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::filesystem::disk::testing::MemDisk;
    use alloc::string::ToString;

    fn disk_with(image: Vec<u8>) -> Arc<Disk> {
        let mut disk = Disk::new(90, Arc::new(MemDisk::new(image)));
        let private = FAT16.resolve(&disk).unwrap();
        disk.filesystem = Some(&FAT16);
        disk.fs_private = Some(private);
        Arc::new(disk)
    }

    fn parts(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn eight_three_formatting() {
        assert_eq!(to_8_3("hello.txt").unwrap(), *b"HELLO   TXT");
        assert_eq!(to_8_3("BLANK.ELF").unwrap(), *b"BLANK   ELF");
        assert_eq!(to_8_3("sub").unwrap(), *b"SUB        ");
        assert_eq!(to_8_3("12345678.abc").unwrap(), *b"12345678ABC");

        assert!(to_8_3("").is_none());
        assert!(to_8_3("toolongname.txt").is_none());
        assert!(to_8_3("file.text").is_none());
    }

    #[test]
    fn bpb_layout_math() {
        let image = ImageBuilder::new().build();
        let bpb = Bpb::parse(&image[..512]).unwrap();

        assert_eq!(bpb.fat_position(), 512);
        assert_eq!(bpb.root_dir_position(), (1 + 2 * 4) * 512);
        assert_eq!(bpb.root_dir_size(), 64 * 32);
        assert_eq!(bpb.data_position(), bpb.root_dir_position() + 64 * 32);
        assert_eq!(bpb.cluster_size(), 512);
        assert_eq!(bpb.cluster_to_byte(2), bpb.data_position());
        assert_eq!(bpb.cluster_to_byte(4), bpb.data_position() + 2 * 512);
    }

    #[test]
    fn resolve_rejects_foreign_volumes() {
        let blank = vec![0u8; 4 * 512];
        let disk = Disk::new(91, Arc::new(MemDisk::new(blank)));
        assert!(matches!(FAT16.resolve(&disk), Err(KernelError::NotOurs)));

        // Boot signature alone is not enough without the FAT16 marker.
        let mut image = vec![0u8; 4 * 512];
        image[510] = 0x55;
        image[511] = 0xAA;
        let disk = Disk::new(92, Arc::new(MemDisk::new(image)));
        assert!(matches!(FAT16.resolve(&disk), Err(KernelError::NotOurs)));
    }

    #[test]
    fn open_and_read_returns_exact_file_bytes() {
        let content: Vec<u8> = (0..1300).map(|i| (i % 255) as u8).collect();
        let image = ImageBuilder::new().add_file("data.bin", &content).build();
        let disk = disk_with(image);

        let mut descriptor = FAT16
            .open(&disk, &parts(&["data.bin"]), FileMode::Read)
            .unwrap();

        let mut out = vec![0u8; 1300];
        let read = FAT16.read(&disk, descriptor.as_mut(), &mut out).unwrap();

        assert_eq!(read, 1300);
        assert_eq!(out, content);
    }

    #[test]
    fn sequential_reads_advance_the_cursor() {
        let image = ImageBuilder::new().add_file("hello.txt", b"hello\n").build();
        let disk = disk_with(image);

        let mut descriptor = FAT16
            .open(&disk, &parts(&["HELLO.TXT"]), FileMode::Read)
            .unwrap();

        let mut first = [0u8; 3];
        let mut second = [0u8; 3];
        assert_eq!(FAT16.read(&disk, descriptor.as_mut(), &mut first).unwrap(), 3);
        assert_eq!(FAT16.read(&disk, descriptor.as_mut(), &mut second).unwrap(), 3);

        assert_eq!(&first, b"hel");
        assert_eq!(&second, b"lo\n");
    }

    #[test]
    fn read_past_eof_truncates_instead_of_failing() {
        let image = ImageBuilder::new().add_file("small.txt", b"abc").build();
        let disk = disk_with(image);

        let mut descriptor = FAT16
            .open(&disk, &parts(&["small.txt"]), FileMode::Read)
            .unwrap();

        let mut out = [0u8; 16];
        assert_eq!(FAT16.read(&disk, descriptor.as_mut(), &mut out).unwrap(), 3);
        assert_eq!(&out[..3], b"abc");

        // Fully past EOF now.
        assert_eq!(FAT16.read(&disk, descriptor.as_mut(), &mut out).unwrap(), 0);
    }

    #[test]
    fn matching_is_case_insensitive() {
        let image = ImageBuilder::new().add_file("HELLO.TXT", b"x").build();
        let disk = disk_with(image);

        assert!(FAT16.open(&disk, &parts(&["hello.txt"]), FileMode::Read).is_ok());
        assert!(FAT16.open(&disk, &parts(&["Hello.Txt"]), FileMode::Read).is_ok());
    }

    #[test]
    fn traverses_subdirectories() {
        let image = ImageBuilder::new()
            .add_directory_with_file("sub", "inner.txt", b"nested")
            .build();
        let disk = disk_with(image);

        let mut descriptor = FAT16
            .open(&disk, &parts(&["sub", "inner.txt"]), FileMode::Read)
            .unwrap();

        let mut out = [0u8; 6];
        assert_eq!(FAT16.read(&disk, descriptor.as_mut(), &mut out).unwrap(), 6);
        assert_eq!(&out, b"nested");
    }

    #[test]
    fn opening_a_directory_is_invalid() {
        let image = ImageBuilder::new()
            .add_directory_with_file("sub", "inner.txt", b"x")
            .build();
        let disk = disk_with(image);

        assert_eq!(
            FAT16.open(&disk, &parts(&["sub"]), FileMode::Read).err(),
            Some(KernelError::InvalidArg)
        );
    }

    #[test]
    fn missing_components_are_not_found() {
        let image = ImageBuilder::new().add_file("a.txt", b"x").build();
        let disk = disk_with(image);

        assert_eq!(
            FAT16.open(&disk, &parts(&["b.txt"]), FileMode::Read).err(),
            Some(KernelError::NotFound)
        );
        assert_eq!(
            FAT16
                .open(&disk, &parts(&["nodir", "b.txt"]), FileMode::Read)
                .err(),
            Some(KernelError::NotFound)
        );
    }

    #[test]
    fn file_in_the_middle_of_a_path_is_invalid() {
        let image = ImageBuilder::new().add_file("a.txt", b"x").build();
        let disk = disk_with(image);

        assert_eq!(
            FAT16
                .open(&disk, &parts(&["a.txt", "b.txt"]), FileMode::Read)
                .err(),
            Some(KernelError::InvalidArg)
        );
    }

    #[test]
    fn write_modes_are_read_only() {
        let image = ImageBuilder::new().add_file("a.txt", b"x").build();
        let disk = disk_with(image);

        for mode in [FileMode::Write, FileMode::Append] {
            assert_eq!(
                FAT16.open(&disk, &parts(&["a.txt"]), mode).err(),
                Some(KernelError::ReadOnly)
            );
        }
    }

    #[test]
    fn seek_moves_the_cursor() {
        let image = ImageBuilder::new().add_file("a.txt", b"abcdef").build();
        let disk = disk_with(image);

        let mut descriptor = FAT16
            .open(&disk, &parts(&["a.txt"]), FileMode::Read)
            .unwrap();

        FAT16.seek(descriptor.as_mut(), 2, SeekMode::Set).unwrap();
        let mut out = [0u8; 2];
        FAT16.read(&disk, descriptor.as_mut(), &mut out).unwrap();
        assert_eq!(&out, b"cd");

        FAT16.seek(descriptor.as_mut(), -2, SeekMode::Current).unwrap();
        FAT16.read(&disk, descriptor.as_mut(), &mut out).unwrap();
        assert_eq!(&out, b"cd");

        assert_eq!(
            FAT16.seek(descriptor.as_mut(), 0, SeekMode::End).err(),
            Some(KernelError::Unsupported)
        );
        assert_eq!(
            FAT16.seek(descriptor.as_mut(), -1, SeekMode::Set).err(),
            Some(KernelError::InvalidArg)
        );
    }

    #[test]
    fn stat_reports_size_and_attributes() {
        let image = ImageBuilder::new().add_file("a.txt", b"abcdef").build();
        let disk = disk_with(image);

        let descriptor = FAT16
            .open(&disk, &parts(&["a.txt"]), FileMode::Read)
            .unwrap();

        let stat = FAT16.stat(descriptor.as_ref()).unwrap();
        assert_eq!(stat.size, 6);
        assert_eq!(stat.attributes, FatAttributes::ARCHIVE.bits());
    }
}
