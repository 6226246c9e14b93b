//! The signature-probe battery: bounded-cost recognizers, each given a
//! small buffer at a candidate offset, each returning a verdict.
//!
//! These are deliberately "thin wrappers over external recognizers"
//! (spec §2): per-filesystem superblock parsing is assumed available as
//! a pure predicate elsewhere in a full TestDisk-equivalent system, so
//! what lives here is the minimal, bounded check each probe needs to
//! accept or reject a candidate offset and populate a descriptor. The
//! scan driver (`driver.rs`) owns trigger-condition evaluation and
//! probe ordering; this module owns only "does this buffer look like
//! filesystem X, and if so, what partition does it describe".

use partscan_core::{FsKind, Partition};

/// Outcome of a single probe invocation, matching the tri-state return
/// convention of spec §4.4: positive (match), zero (no match), negative
/// (read error at this location).
#[derive(Debug)]
pub enum ProbeOutcome {
    Match(Partition),
    NoMatch,
    ReadError,
}

pub const DEFAULT_SECTOR_SIZE: u64 = 512;

// ---- MD-RAID (software RAID 0.9 / 1.x) ------------------------------

pub const MD_SB_MAGIC: u32 = 0xa92b_4efc;
pub const MD_RESERVED_BYTES: u64 = 64 * 1024;
pub const MD_RESERVED_SECTORS: u64 = MD_RESERVED_BYTES / DEFAULT_SECTOR_SIZE;
pub const MD_MAX_CHUNK_SIZE: u64 = 4096 * 1024;

/// `MD_NEW_SIZE_SECTORS`: rounds a sector count down to a
/// `MD_RESERVED_SECTORS` boundary and backs off one more reserved-area
/// width. Historical mdadm/TestDisk constant — preserved exactly, not a
/// tunable (spec §9).
pub fn md_new_size_sectors(sectors: u64) -> u64 {
    (sectors & !(MD_RESERVED_SECTORS - 1)).saturating_sub(MD_RESERVED_SECTORS)
}

/// Probe #0. Expects an 8-sector buffer. Recognizes both the 0.9
/// superblock (magic at the trailing end of the buffer, as mdadm
/// historically wrote it) and the 1.x superblock (magic at the front),
/// and back-computes the partition's real start offset from the
/// embedded size/offset field, since the superblock itself sits past
/// the partition's front.
pub fn recover_md(buf: &[u8], probe_offset: u64) -> ProbeOutcome {
    if buf.len() < 8 * DEFAULT_SECTOR_SIZE as usize {
        return ProbeOutcome::ReadError;
    }
    // 1.x superblock: magic as the first four bytes, little-endian.
    if let Some(magic) = read_u32_le(buf, 0) {
        if magic == MD_SB_MAGIC {
            let super_offset = read_u64_le(buf, 8 * 4).unwrap_or(0);
            let start = probe_offset.saturating_sub(super_offset * DEFAULT_SECTOR_SIZE);
            // `size` (array size in KB) sits at byte 48 of the 1.x superblock.
            let size_kb = read_u64_le(buf, 48).unwrap_or(0);
            let mut part = Partition::new(start, FsKind::MdRaid1x);
            part.size = size_kb.saturating_mul(1024);
            return ProbeOutcome::Match(part);
        }
    }
    // 0.9 superblock: magic is the fourth little-endian u32 in the sector.
    if let Some(magic) = read_u32_le(buf, 4 * 4) {
        if magic == MD_SB_MAGIC {
            let part_size_sectors = read_u32_le(buf, 5 * 4).unwrap_or(0) as u64;
            let back_off = md_new_size_sectors(part_size_sectors) * DEFAULT_SECTOR_SIZE;
            let start = probe_offset.saturating_sub(back_off);
            let mut part = Partition::new(start, FsKind::MdRaid09);
            part.size = part_size_sectors * DEFAULT_SECTOR_SIZE;
            return ProbeOutcome::Match(part);
        }
    }
    ProbeOutcome::NoMatch
}

// ---- FAT / exFAT backup boot sectors ---------------------------------

/// Probes #1/#2: a FAT or exFAT boot sector replicated at a fixed
/// sector offset from the partition front (sector 7 for FAT, sector 13
/// for exFAT). Both share the 0x55AA trailer and an 8-byte OEM name at
/// offset 3.
fn oem_name(buf: &[u8]) -> Option<&[u8]> {
    buf.get(3..11)
}

fn has_boot_signature(buf: &[u8]) -> bool {
    buf.len() >= 512 && buf[510] == 0x55 && buf[511] == 0xAA
}

pub fn recover_fat_backup(buf: &[u8]) -> ProbeOutcome {
    if buf.len() < 512 {
        return ProbeOutcome::ReadError;
    }
    if !has_boot_signature(buf) {
        return ProbeOutcome::NoMatch;
    }
    let kind = match oem_name(buf) {
        Some(name) if &name[0..5] == b"MSDOS" || &name[0..5] == b"MSWIN" || &name[0..5] == b"FRDOS" => {
            match buf.get(0x36..0x36 + 5) {
                Some(b"FAT12") => FsKind::Fat12,
                Some(b"FAT16") => FsKind::Fat16,
                _ => match buf.get(0x52..0x52 + 5) {
                    Some(b"FAT32") => FsKind::Fat32,
                    _ => return ProbeOutcome::NoMatch,
                },
            }
        }
        _ => return ProbeOutcome::NoMatch,
    };
    let bytes_per_sector = read_u16_le(buf, 11).unwrap_or(0) as u64;
    if bytes_per_sector == 0 || !bytes_per_sector.is_power_of_two() {
        return ProbeOutcome::NoMatch;
    }
    let mut part = Partition::new(0, kind);
    part.sb_offset = 6 * bytes_per_sector;
    ProbeOutcome::Match(part)
}

pub fn recover_exfat_backup(buf: &[u8]) -> ProbeOutcome {
    if buf.len() < 512 {
        return ProbeOutcome::ReadError;
    }
    if !has_boot_signature(buf) {
        return ProbeOutcome::NoMatch;
    }
    match oem_name(buf) {
        Some(name) if name == b"EXFAT   " => {
            let mut part = Partition::new(0, FsKind::ExFat);
            part.sb_offset = 13 * DEFAULT_SECTOR_SIZE;
            ProbeOutcome::Match(part)
        }
        _ => ProbeOutcome::NoMatch,
    }
}

// ---- NTFS / HFS backup boot sectors -----------------------------------

pub fn recover_ntfs_backup(buf: &[u8]) -> ProbeOutcome {
    if buf.len() < 512 {
        return ProbeOutcome::ReadError;
    }
    if !has_boot_signature(buf) {
        return ProbeOutcome::NoMatch;
    }
    match oem_name(buf) {
        Some(name) if name == b"NTFS    " => {
            let total_sectors = read_u64_le(buf, 0x28).unwrap_or(0);
            let bytes_per_sector = read_u16_le(buf, 11).unwrap_or(0) as u64;
            let mut part = Partition::new(0, FsKind::Ntfs);
            part.size = total_sectors.saturating_mul(bytes_per_sector.max(1));
            ProbeOutcome::Match(part)
        }
        _ => ProbeOutcome::NoMatch,
    }
}

pub fn recover_hfs_backup(buf: &[u8]) -> ProbeOutcome {
    if buf.len() < 512 {
        return ProbeOutcome::ReadError;
    }
    let signature = read_u16_be(buf, 0).unwrap_or(0);
    let kind = match signature {
        0x4244 => FsKind::Hfs,   // "BD", HFS Master Directory Block
        0x482B => FsKind::HfsPlus, // "H+"
        0x4858 => FsKind::HfsX,    // "HX"
        _ => return ProbeOutcome::NoMatch,
    };
    ProbeOutcome::Match(Partition::new(0, kind))
}

// ---- ext2/3/4 backup superblock ---------------------------------------

pub const EXT2_SUPER_MAGIC: u16 = 0xEF53;
pub const EXT2_MIN_BLOCK_SIZE: u64 = 1024;

/// Probe #5. Reads one kilobyte at the candidate offset and checks the
/// ext2/3/4 superblock magic plus a non-zero block-group number — the
/// group-0 superblock never has this set, so this rejects the common
/// false-positive of re-detecting the filesystem's front superblock as
/// if it were a backup.
pub fn recover_ext_backup(buf: &[u8]) -> ProbeOutcome {
    if buf.len() < 1024 {
        return ProbeOutcome::ReadError;
    }
    let magic = read_u16_le(buf, 0x38).unwrap_or(0);
    if magic != EXT2_SUPER_MAGIC {
        return ProbeOutcome::NoMatch;
    }
    let block_group_nr = read_u16_le(buf, 0x5A).unwrap_or(0);
    if block_group_nr == 0 {
        return ProbeOutcome::NoMatch;
    }
    let log_block_size = read_u32_le(buf, 0x18).unwrap_or(0);
    let block_size = EXT2_MIN_BLOCK_SIZE << log_block_size.min(2);
    let blocks_count = read_u32_le(buf, 0x04).unwrap_or(0) as u64;
    let feature_incompat = read_u32_le(buf, 0x60).unwrap_or(0);
    let kind = if feature_incompat & 0x0040 != 0 {
        FsKind::Ext4 // EXTENTS
    } else {
        let feature_compat = read_u32_le(buf, 0x5C).unwrap_or(0);
        if feature_compat & 0x0004 != 0 {
            FsKind::Ext3 // HAS_JOURNAL
        } else {
            FsKind::Ext2
        }
    };
    let mut part = Partition::new(0, kind);
    part.size = blocks_count.saturating_mul(block_size);
    ProbeOutcome::Match(part)
}

// ---- MBR partition-table probes (#6-#8), three strictness levels ------

#[derive(Debug, Clone, Copy)]
pub enum MbrStrictness {
    /// Probe #6: require CHS/LBA agreement on every nonzero entry and
    /// no overlaps between entries.
    Strict,
    /// Probe #7: require no overlaps, but allow CHS/LBA disagreement
    /// (common on disks that were partitioned under a different
    /// declared geometry).
    Normal,
    /// Probe #8: only require the 0x55AA trailer and at least one
    /// nonzero entry.
    Loose,
}

struct RawMbrEntry {
    boot_flag: u8,
    partition_type: u8,
    start_chs: (u32, u32, u32),
    start_lba: u32,
    size_sectors: u32,
}

fn parse_mbr_entries(buf: &[u8]) -> Option<Vec<RawMbrEntry>> {
    if !has_boot_signature(buf) {
        return None;
    }
    let mut entries = Vec::with_capacity(4);
    for i in 0..4 {
        let off = 446 + i * 16;
        let entry = buf.get(off..off + 16)?;
        if entry[4] == 0 {
            continue;
        }
        let start_head = entry[1] as u32;
        let start_sector = (entry[2] & 0x3F) as u32;
        let start_cyl = (((entry[2] & 0xC0) as u32) << 2) | entry[3] as u32;
        entries.push(RawMbrEntry {
            boot_flag: entry[0],
            partition_type: entry[4],
            start_chs: (start_cyl, start_head, start_sector),
            start_lba: u32::from_le_bytes([entry[8], entry[9], entry[10], entry[11]]),
            size_sectors: u32::from_le_bytes([entry[12], entry[13], entry[14], entry[15]]),
        });
    }
    Some(entries)
}

fn entries_overlap(entries: &[RawMbrEntry]) -> bool {
    for i in 0..entries.len() {
        for j in i + 1..entries.len() {
            let a = entries[i].start_lba as u64..(entries[i].start_lba as u64 + entries[i].size_sectors as u64);
            let b = entries[j].start_lba as u64..(entries[j].start_lba as u64 + entries[j].size_sectors as u64);
            if a.start < b.end && b.start < a.end {
                return true;
            }
        }
    }
    false
}

fn chs_lba_agrees(entry: &RawMbrEntry, heads: u32, sectors: u32) -> bool {
    let (cyl, head, sector) = entry.start_chs;
    if cyl >= 1024 || sector == 0 {
        return true; // Geometry can't express this CHS; skip the check.
    }
    let calculated = cyl * heads * sectors + head * sectors + (sector - 1);
    calculated == entry.start_lba
}

/// Recognizes a partition-table sector (an MBR or a nested extended
/// boot record) at the buffer's own offset — this is evidence that the
/// probed position starts *another* partition-table structure, not a
/// parse of that table's own entries. The returned descriptor's
/// `start` is left at zero for the caller to fill in with the probed
/// offset; `size` is the table's own apparent footprint (the span of
/// its entries), used only to satisfy the `size >= 2` admission gate.
pub fn recover_mbr_table(buf: &[u8], sector_size: u64, heads: u32, sectors: u32, strictness: MbrStrictness) -> ProbeOutcome {
    if buf.len() < 512 {
        return ProbeOutcome::ReadError;
    }
    let entries = match parse_mbr_entries(buf) {
        Some(e) if !e.is_empty() => e,
        _ => return ProbeOutcome::NoMatch,
    };
    match strictness {
        MbrStrictness::Strict => {
            if entries_overlap(&entries) || !entries.iter().all(|e| chs_lba_agrees(e, heads, sectors)) {
                return ProbeOutcome::NoMatch;
            }
        }
        MbrStrictness::Normal => {
            if entries_overlap(&entries) {
                return ProbeOutcome::NoMatch;
            }
        }
        MbrStrictness::Loose => {}
    }
    let first = &entries[0];
    let span_sectors = entries
        .iter()
        .map(|e| e.start_lba as u64 + e.size_sectors as u64)
        .max()
        .unwrap_or(1)
        .max(1);
    let mut part = Partition::new(0, FsKind::Extended);
    part.size = span_sectors * sector_size;
    part.type_codes.i386 = Some(first.partition_type);
    part.status = if first.boot_flag == 0x80 {
        partscan_core::PartitionStatus::PrimaryBoot
    } else {
        partscan_core::PartitionStatus::Primary
    };
    ProbeOutcome::Match(part)
}

// ---- BSD disklabel / GPT protective MBR / GPT header -------------------

pub const BSD_DISKLABEL_MAGIC: u32 = 0x8256_4557;

/// Probes #9, #10, #12: a BSD disklabel, optionally preceded by a dummy
/// boot sector (`sector_offset_bytes` selects which).
pub fn recover_bsd_disklabel(buf: &[u8], sector_offset_bytes: usize) -> ProbeOutcome {
    let window = match buf.get(sector_offset_bytes..) {
        Some(w) if w.len() >= 512 => w,
        _ => return ProbeOutcome::ReadError,
    };
    let magic = read_u32_le(window, 0).unwrap_or(0);
    if magic != BSD_DISKLABEL_MAGIC {
        return ProbeOutcome::NoMatch;
    }
    let npartitions = read_u16_le(window, 138).unwrap_or(0);
    if npartitions == 0 || npartitions > 16 {
        return ProbeOutcome::NoMatch;
    }
    ProbeOutcome::Match(Partition::new(0, FsKind::FreeBsd))
}

/// Probe #11: a protective MBR, i.e. exactly one entry of type 0xEE
/// spanning (almost) the whole addressable LBA32 range.
pub fn recover_gpt_protective(buf: &[u8]) -> ProbeOutcome {
    if buf.len() < 512 {
        return ProbeOutcome::ReadError;
    }
    let entries = match parse_mbr_entries(buf) {
        Some(e) => e,
        None => return ProbeOutcome::NoMatch,
    };
    if entries.len() == 1 && entries[0].partition_type == 0xEE && entries[0].start_lba == 1 {
        return ProbeOutcome::Match(Partition::new(0, FsKind::Extended));
    }
    ProbeOutcome::NoMatch
}

/// Probe #13: the GPT header itself, one sector past the candidate
/// offset (LBA 1 relative to the probed location).
pub fn recover_gpt_header(buf: &[u8]) -> ProbeOutcome {
    let window = match buf.get(512..) {
        Some(w) if w.len() >= 92 => w,
        _ => return ProbeOutcome::ReadError,
    };
    if &window[0..8] != b"EFI PART" {
        return ProbeOutcome::NoMatch;
    }
    ProbeOutcome::Match(Partition::new(0, FsKind::Extended))
}

// ---- little-endian/big-endian byte readers -----------------------------

fn read_u16_le(buf: &[u8], offset: usize) -> Option<u16> {
    buf.get(offset..offset + 2).map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn read_u16_be(buf: &[u8], offset: usize) -> Option<u16> {
    buf.get(offset..offset + 2).map(|b| u16::from_be_bytes([b[0], b[1]]))
}

fn read_u32_le(buf: &[u8], offset: usize) -> Option<u32> {
    buf.get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn read_u64_le(buf: &[u8], offset: usize) -> Option<u64> {
    buf.get(offset..offset + 8).map(|b| {
        u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
    })
}
