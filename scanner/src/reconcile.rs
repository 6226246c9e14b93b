//! Post-scan reconciliation: the NTFS-backup-anchored retry, i386
//! extended-partition synthesis, and the off-disk / geometry
//! diagnostics (spec §4.6-§4.8).

use partscan_core::{
    geometry::{offset_to_cylinder, ONE_MIB},
    Disk, FsKind, Partition, PartitionStatus,
};

use crate::error::ScanError;
use crate::list::PartitionList;
use crate::probes::{self, ProbeOutcome};

/// Re-probes the 32 sectors preceding each admitted NTFS partition
/// whose match came from a backup boot sector, in case the primary
/// boot sector itself is readable and yields a tighter `start` (spec
/// §4.6). A hit is admitted through the same gates the main scan uses.
pub fn retry_ntfs_from_backup(disk: &Disk, good_list: &mut PartitionList) -> Result<(), ScanError> {
    let candidates: Vec<Partition> = good_list
        .iter()
        .filter(|p| p.kind == FsKind::Ntfs && p.sb_offset != 0)
        .cloned()
        .collect();

    let min_location = disk.arch.min_location(&disk.geometry, disk.sector_size);

    for candidate in candidates {
        for i in (1..=32u64).rev() {
            let probe_offset = candidate.start.saturating_sub(i * disk.sector_size);
            if probe_offset < min_location {
                continue;
            }
            let mut buf = vec![0u8; 512];
            let n = disk.read(&mut buf, probe_offset)?;
            if n < 512 {
                continue;
            }
            if let ProbeOutcome::Match(mut part) = probes::recover_ntfs_backup(&buf) {
                part.start = probe_offset;
                part.status = PartitionStatus::Deleted;
                if part.size > 1 && part.start >= min_location && part.end_exclusive() <= disk.declared_size.max(disk.real_size) {
                    good_list.insert_unique(part);
                }
                break;
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendedMode {
    Min,
    Max,
}

/// Synthesizes an i386 extended-partition entry enclosing every
/// `logical` partition in `list`, replacing any existing `extended`
/// entries (spec §4.7). No-op if there are no logicals left once the
/// stale entries are dropped.
pub fn synthesize_extended_partition(disk: &Disk, list: &mut PartitionList, mode: ExtendedMode) {
    list.retain(|p| p.status != PartitionStatus::Extended && p.status != PartitionStatus::ExtendedInExtended);

    let mut logicals: Vec<&Partition> = list.iter().filter(|p| p.status == PartitionStatus::Logical).collect();
    if logicals.is_empty() {
        return;
    }
    logicals.sort_by_key(|p| p.start);

    let first_logical = logicals[0];
    let last_logical = *logicals.last().unwrap();

    let sector_size = disk.sector_size;
    let head_size = disk.geometry.head_size(sector_size);

    let non_logical_count = list.iter().filter(|p| p.status != PartitionStatus::Logical).count();
    let force_max = non_logical_count == 4;
    let mode = if force_max { ExtendedMode::Max } else { mode };

    let prior_primary_end = list
        .iter()
        .filter(|p| p.status == PartitionStatus::Primary || p.status == PartitionStatus::PrimaryBoot)
        .filter(|p| p.end_exclusive() <= first_logical.start)
        .map(|p| p.end_exclusive())
        .max();

    let next_primary_start = list
        .iter()
        .filter(|p| p.status == PartitionStatus::Primary || p.status == PartitionStatus::PrimaryBoot)
        .filter(|p| p.start >= last_logical.end_exclusive())
        .map(|p| p.start)
        .min();

    let mut start = match mode {
        ExtendedMode::Min => first_logical.start.saturating_sub(sector_size),
        ExtendedMode::Max => match prior_primary_end {
            Some(end) => end,
            None => {
                let pulled_back = first_logical.start.saturating_sub(sector_size);
                let mib_back = first_logical.start.saturating_sub(ONE_MIB.min(first_logical.start));
                let head_back = first_logical.start.saturating_sub(head_size.min(first_logical.start));
                pulled_back.min(mib_back.max(head_back))
            }
        },
    };

    let mut end = match mode {
        ExtendedMode::Min => last_logical.end_exclusive().saturating_sub(sector_size).max(last_logical.start),
        ExtendedMode::Max => next_primary_start.unwrap_or(disk.declared_size.max(disk.real_size)),
    };

    let all_mib_aligned = logicals.iter().all(|p| p.start % ONE_MIB == 0);
    if all_mib_aligned {
        start -= start % ONE_MIB;
        if end % ONE_MIB != 0 {
            end += ONE_MIB - (end % ONE_MIB);
        }
    } else {
        let cylinder_size = disk.geometry.cylinder_size(sector_size);
        if cylinder_size > 0 {
            start -= start % cylinder_size;
            if end % cylinder_size != 0 {
                end += cylinder_size - (end % cylinder_size);
            }
        }
    }

    if start >= end {
        return;
    }

    let end_cylinder = offset_to_cylinder(&disk.geometry, sector_size, end.saturating_sub(sector_size));
    let kind = if end_cylinder > 1023 { FsKind::ExtendedLba } else { FsKind::Extended };

    let mut extended = Partition::new(start, kind);
    extended.size = end - start;
    extended.status = PartitionStatus::Extended;
    list.insert_unique(extended);
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GeometryWarning {
    pub inferred_heads_per_cylinder: u32,
    pub configured_heads_per_cylinder: u32,
}

/// Infers `heads_per_cylinder` from the discovered partitions' start
/// offsets (the head component of their CHS projection under the
/// disk's own sector count) and compares it with the configured
/// geometry. Only meaningful for i386/Sun (spec §4.8); returns `None`
/// for any other architecture or when there isn't enough data.
pub fn check_geometry(disk: &Disk, list: &PartitionList) -> Option<GeometryWarning> {
    use partscan_core::Architecture;
    if !matches!(disk.arch, Architecture::I386 | Architecture::Sun) {
        return None;
    }
    let sectors_per_head = disk.geometry.sectors_per_head as u64;
    if sectors_per_head == 0 {
        return None;
    }

    let samples: Vec<u64> = list
        .iter()
        .filter(|p| p.start % disk.sector_size == 0 && p.start > 0)
        .map(|p| (p.start / disk.sector_size) / sectors_per_head)
        .filter(|&heads| heads > 0)
        .collect();
    if samples.is_empty() {
        return None;
    }

    let inferred = samples.iter().copied().min()? as u32;
    if inferred == 0 || inferred == disk.geometry.heads_per_cylinder {
        return None;
    }
    Some(GeometryWarning {
        inferred_heads_per_cylinder: inferred,
        configured_heads_per_cylinder: disk.geometry.heads_per_cylinder,
    })
}
