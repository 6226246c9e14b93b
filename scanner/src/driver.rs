//! The scan driver: the main loop described in spec §4.5. Walks the
//! address space from `min_location` to `search_max`, consulting hints,
//! running the probe battery in priority order, and responding to
//! operator signals.
//!
//! Grounded in `godmode.c`'s `search_part`: that function is one long
//! loop body with the probes inlined; here the probes live in
//! `probes.rs` and the loop keeps only trigger evaluation, buffer
//! management, and admission/reconciliation bookkeeping.

use partscan_core::{
    geometry::{offset_to_chs, ONE_MIB},
    Architecture, Disk, FsKind, Partition, PartitionStatus,
};

use crate::error::ScanError;
use crate::hints::HintSet;
use crate::list::PartitionList;
use crate::probes::{
    self, MbrStrictness, ProbeOutcome, DEFAULT_SECTOR_SIZE, MD_MAX_CHUNK_SIZE, MD_RESERVED_BYTES,
};

/// Operator-driven transitions into the driver's cooperative loop
/// (spec §4.5, §5 "Cancellation").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorSignal {
    Continue,
    Stop,
    Skip,
    Quit,
    Plus,
}

/// Source of operator signals, polled once per iteration at a
/// progress checkpoint. Implementations are free to rate-limit their
/// own polling (e.g. only check every Nth call); the driver always
/// calls this once per iteration regardless.
pub trait OperatorSignalSource {
    fn poll(&mut self) -> OperatorSignal;
}

/// Never interrupts a scan — the default for tests and batch runs.
pub struct NeverStop;

impl OperatorSignalSource for NeverStop {
    fn poll(&mut self) -> OperatorSignal {
        OperatorSignal::Continue
    }
}

/// `search_location_update`: an externally injected monotone stepper
/// that may skip large known-uninteresting regions (spec §9). Mirrors
/// `godmode.c`'s "Optimized `search_location += sector_size`": the
/// returned value must be at least `cursor + sector_size`, never just
/// `cursor` — the driver only probes offsets this function (or a
/// pending hint earlier than it) actually returns.
pub trait LocationStepper {
    fn step(&mut self, cursor: u64, sector_size: u64) -> u64;
}

/// The stepper that performs no optimistic skipping beyond one sector,
/// used by tests that need to exercise every sector (spec §9: "tests
/// substitute the identity stepper to exercise exhaustive scanning").
pub struct IdentityStepper;

impl LocationStepper for IdentityStepper {
    fn step(&mut self, cursor: u64, sector_size: u64) -> u64 {
        cursor + sector_size
    }
}

/// `fast_mode`: 0 exhaustive, 1 normal, 2 aggressive (spec glossary).
pub type FastMode = u8;

#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct ScanReport {
    pub good: Vec<Partition>,
    pub bad: Vec<Partition>,
}

pub struct ScanDriver {
    cursor: u64,
    probe_index: u8,
    hints: HintSet,
    raid_hints: HintSet,
    good_list: PartitionList,
    bad_list: PartitionList,
    fast_mode: FastMode,
    min_location: u64,
    search_max: u64,
}

fn search_max(disk: &Disk) -> u64 {
    let cylinder_size = disk.geometry.cylinder_size(disk.sector_size);
    let rounded_declared = if cylinder_size == 0 {
        disk.declared_size
    } else {
        ((disk.declared_size + cylinder_size - 1) / cylinder_size) * cylinder_size
    };
    rounded_declared.max(disk.real_size)
}

impl ScanDriver {
    pub fn new(disk: &Disk, fast_mode: FastMode) -> Self {
        let min_location = disk.arch.min_location(&disk.geometry, disk.sector_size);
        let mut driver = ScanDriver {
            cursor: min_location,
            probe_index: 0,
            hints: HintSet::new(),
            raid_hints: HintSet::new(),
            good_list: PartitionList::new(),
            bad_list: PartitionList::new(),
            fast_mode,
            min_location,
            search_max: search_max(disk),
        };
        driver.seed_hints(disk);
        driver
    }

    /// `search_add_hints`: seeds the hint set with the fixed offsets
    /// the original always probes regardless of what's been found so
    /// far (SPEC_FULL §C.1). These exist to work around common
    /// incorrect-geometry setups, not to encode a belief about this
    /// particular disk.
    fn seed_hints(&mut self, disk: &Disk) {
        let sector_size = disk.sector_size;
        let sectors_per_head = disk.geometry.sectors_per_head as u64;
        let fixed = [
            2 * sector_size + 16384,
            2048 * 512,
            32 * sector_size,
            63 * sector_size,
            16 * 63 * sector_size,
            17 * 63 * sector_size,
            16 * sectors_per_head * sector_size,
            17 * sectors_per_head * sector_size,
            240 * 63 * sector_size,
            241 * 63 * sector_size,
            240 * sectors_per_head * sector_size,
            241 * sectors_per_head * sector_size,
        ];
        for offset in fixed {
            if offset >= self.min_location {
                self.hints.insert(offset);
            }
        }
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn good_list(&self) -> &PartitionList {
        &self.good_list
    }

    pub fn bad_list(&self) -> &PartitionList {
        &self.bad_list
    }

    fn next_pending_hint_after_cursor(&self) -> Option<u64> {
        let regular = self.hints.iter().find(|&h| h > self.cursor);
        let raid = self.raid_hints.iter().find(|&h| h > self.cursor);
        match (regular, raid) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    fn apply_skip(&mut self) {
        if let Some(next) = self.next_pending_hint_after_cursor() {
            self.cursor = next;
        }
    }

    /// `plus`: jumps forward by roughly 5% of `search_max`, preserving
    /// the original's integer-truncation chain verbatim —
    /// `search_location_max / 20 / (1024*1024) * (1024*1014)` — which
    /// rounds down to a whole-megabyte count and then multiplies back
    /// by `1024*1014` rather than `1024*1024`, landing just under a
    /// clean multiple of a mebibyte. This is a historical quirk of the
    /// original, not a heuristic (spec §9 "magic numeric constants...
    /// preserve exactly"; SPEC_FULL §C.6).
    fn apply_plus(&mut self) {
        let step = self.search_max / 20 / (1024 * 1024) * (1024 * 1014);
        self.cursor = self.cursor.saturating_add(step);
    }

    fn natural_probe_point(&self, disk: &Disk, cursor: u64) -> bool {
        let chs = offset_to_chs(&disk.geometry, disk.sector_size, cursor);
        if disk.arch.is_i386() {
            (chs.sector == 1 && chs.head <= 2)
                || cursor % ONE_MIB == 0
                || (self.fast_mode > 1 && chs.sector == 1)
        } else {
            let boundary = partscan_core::geometry::location_boundary(disk.arch, &disk.geometry, disk.sector_size);
            boundary != 0 && cursor % boundary == 0
        }
    }

    /// Runs the full probe battery for the current cursor position.
    /// Returns the first positive hit, if any (spec §4.4: probes run in
    /// a fixed priority order and the first match wins this iteration).
    fn run_probes(&mut self, disk: &Disk, search_now_raid: bool, search_now_hint: bool) -> Result<Option<Partition>, ScanError> {
        let cursor = self.cursor;
        let sector_size = disk.sector_size;

        // Probe #0: MD-RAID.
        if search_now_raid {
            let mut buf = vec![0u8; 8 * DEFAULT_SECTOR_SIZE as usize];
            let n = disk.read(&mut buf, cursor)?;
            if n == buf.len() {
                if let ProbeOutcome::Match(part) = probes::recover_md(&buf, cursor) {
                    return Ok(Some(part));
                }
            }
        }

        // Probes #1/#2: FAT / exFAT backup boot sectors.
        if self.fat_or_exfat_trigger(disk, cursor, 7, 6) {
            let mut buf = vec![0u8; sector_size.max(512) as usize];
            let n = disk.read(&mut buf, cursor)?;
            if n as u64 >= 512 {
                if let ProbeOutcome::Match(mut part) = probes::recover_fat_backup(&buf) {
                    part.start = cursor.saturating_sub(part.sb_offset);
                    return Ok(Some(part));
                }
            }
        }
        if self.fat_or_exfat_trigger(disk, cursor, 13, 12) {
            let mut buf = vec![0u8; sector_size.max(512) as usize];
            let n = disk.read(&mut buf, cursor)?;
            if n as u64 >= 512 {
                if let ProbeOutcome::Match(mut part) = probes::recover_exfat_backup(&buf) {
                    part.start = cursor.saturating_sub(part.sb_offset);
                    return Ok(Some(part));
                }
            }
        }

        // Probe #3: NTFS backup.
        if self.end_of_head_trigger(disk, cursor) {
            let mut buf = vec![0u8; sector_size.max(512) as usize];
            let n = disk.read(&mut buf, cursor)?;
            if n as u64 >= 512 {
                if let ProbeOutcome::Match(mut part) = probes::recover_ntfs_backup(&buf) {
                    part.sb_offset = self.backup_offset_within_boundary(disk, cursor);
                    part.start = cursor.saturating_sub(part.sb_offset);
                    return Ok(Some(part));
                }
            }
        }

        // Probe #4: HFS backup — same trigger family, no GPT branch.
        if disk.arch != Architecture::Gpt && self.end_of_head_trigger(disk, cursor) {
            let mut buf = vec![0u8; sector_size.max(512) as usize];
            let n = disk.read(&mut buf, cursor)?;
            if n as u64 >= 512 {
                if let ProbeOutcome::Match(mut part) = probes::recover_hfs_backup(&buf) {
                    part.sb_offset = self.backup_offset_within_boundary(disk, cursor);
                    part.start = cursor.saturating_sub(part.sb_offset);
                    return Ok(Some(part));
                }
            }
        }

        // Probe #5: ext2/3/4 backup superblock.
        if let Some(hd_offset) = self.ext_backup_trigger(disk, cursor) {
            let mut buf = vec![0u8; 1024];
            let n = disk.read(&mut buf, cursor)?;
            if n >= 1024 {
                if let ProbeOutcome::Match(mut part) = probes::recover_ext_backup(&buf) {
                    part.sb_offset = hd_offset;
                    part.start = cursor.saturating_sub(hd_offset);
                    return Ok(Some(part));
                }
            }
        }

        // Probes #6-#13 share one 16-sector buffer, populated once.
        let buf16_len = 16 * sector_size as usize;
        let mut buf16 = vec![0u8; buf16_len];
        let n16 = disk.read(&mut buf16, cursor)?;
        if n16 < buf16_len {
            buf16.truncate(n16);
        }

        let search_now = search_now_hint || self.natural_probe_point(disk, cursor);
        if search_now && buf16.len() >= 512 {
            let heads = disk.geometry.heads_per_cylinder;
            let sectors = disk.geometry.sectors_per_head;
            for strictness in [MbrStrictness::Strict, MbrStrictness::Normal, MbrStrictness::Loose] {
                if let ProbeOutcome::Match(mut part) =
                    probes::recover_mbr_table(&buf16[..512.min(buf16.len())], sector_size, heads, sectors, strictness)
                {
                    part.start += cursor;
                    return Ok(Some(part));
                }
            }
        }

        // Probe #9: Type 8, bare BSD disklabel.
        if let ProbeOutcome::Match(mut part) = probes::recover_bsd_disklabel(&buf16, 0) {
            part.start = cursor;
            return Ok(Some(part));
        }
        // Probe #10: Type 16, disklabel preceded by a dummy boot sector.
        if buf16.len() >= 512 + 512 {
            if let ProbeOutcome::Match(mut part) = probes::recover_bsd_disklabel(&buf16, 512) {
                part.start = cursor;
                return Ok(Some(part));
            }
        }
        // Probe #11: Type 64, GPT protective MBR.
        if buf16.len() >= 512 {
            if let ProbeOutcome::Match(mut part) = probes::recover_gpt_protective(&buf16) {
                part.start = cursor;
                return Ok(Some(part));
            }
        }
        // Probe #12: Type 128, BSD disklabel; warms the cache with a
        // throwaway read first (read-path concern only, spec §9).
        {
            let mut warm = vec![0u8; 8 * sector_size as usize];
            let _ = disk.read(&mut warm, cursor + (63 + 16) * sector_size);
            if let ProbeOutcome::Match(mut part) = probes::recover_bsd_disklabel(&buf16, 0) {
                part.start = cursor;
                return Ok(Some(part));
            }
        }
        // Probe #13: Type 2048, GPT header.
        if buf16.len() >= 512 + 92 {
            if let ProbeOutcome::Match(mut part) = probes::recover_gpt_header(&buf16) {
                part.start = cursor;
                return Ok(Some(part));
            }
        }

        Ok(None)
    }

    /// Shared trigger shape for probes #1/#2 (SPEC_FULL §C.2). `chs_sector`
    /// is the literal 1-based CHS sector value the original compares
    /// `start.sector` against (7 for FAT, 13 for exFAT); `offset_sectors`
    /// is the sector count from the partition's front the backup
    /// actually sits at (`chs_sector - 1`), used for both the
    /// "incorrect geometry" 2048-sector-block modulus and the `none`
    /// architecture's exact check. These two numbers coincide for
    /// neither probe, so they are threaded through separately rather
    /// than derived from one another.
    fn fat_or_exfat_trigger(&self, disk: &Disk, cursor: u64, chs_sector: u32, offset_sectors: u64) -> bool {
        let sector_size = disk.sector_size;
        match disk.arch {
            Architecture::I386 => {
                let chs = offset_to_chs(&disk.geometry, sector_size, cursor);
                (chs.sector == chs_sector && (chs.head <= 2 || self.fast_mode > 1))
                    || cursor % (2048 * 512) == offset_sectors * 512
            }
            Architecture::Gpt => cursor % (2048 * 512) == offset_sectors * 512,
            Architecture::None => cursor == offset_sectors * sector_size,
            _ => {
                let boundary = partscan_core::geometry::location_boundary(disk.arch, &disk.geometry, sector_size);
                boundary != 0 && cursor % boundary == offset_sectors * sector_size
            }
        }
    }

    fn end_of_head_trigger(&self, disk: &Disk, cursor: u64) -> bool {
        let sector_size = disk.sector_size;
        match disk.arch {
            Architecture::I386 => {
                let chs = offset_to_chs(&disk.geometry, sector_size, cursor);
                (chs.sector == disk.geometry.sectors_per_head
                    && (chs.head == disk.geometry.heads_per_cylinder.saturating_sub(1) || self.fast_mode > 1))
                    || cursor % (2048 * 512) == 2047 * 512
            }
            Architecture::Gpt => cursor % (2048 * 512) == 2047 * 512,
            _ => {
                let boundary = partscan_core::geometry::location_boundary(disk.arch, &disk.geometry, sector_size);
                cursor > 0 && boundary > sector_size && cursor % boundary == boundary - sector_size
            }
        }
    }

    /// Distance from a matched NTFS/HFS backup sector back to the
    /// partition's real start, recomputed per-architecture since the
    /// modular "incorrect geometry" trigger branch (2048-sector blocks)
    /// implies a different offset than the natural head-end branch.
    fn backup_offset_within_boundary(&self, disk: &Disk, cursor: u64) -> u64 {
        let sector_size = disk.sector_size;
        match disk.arch {
            Architecture::I386 => {
                let chs = offset_to_chs(&disk.geometry, sector_size, cursor);
                if chs.sector == disk.geometry.sectors_per_head
                    && (chs.head == disk.geometry.heads_per_cylinder.saturating_sub(1) || self.fast_mode > 1)
                {
                    disk.geometry.head_size(sector_size).saturating_sub(sector_size)
                } else {
                    2047 * 512
                }
            }
            Architecture::Gpt => 2047 * 512,
            _ => {
                let boundary = partscan_core::geometry::location_boundary(disk.arch, &disk.geometry, sector_size);
                boundary.saturating_sub(sector_size)
            }
        }
    }

    fn ext_backup_trigger(&self, disk: &Disk, cursor: u64) -> Option<u64> {
        let sector_size = disk.sector_size;
        for log_block_size in 0..=2u32 {
            let block_size: u64 = 1024 << log_block_size;
            let hd_offset = 3 * block_size * 8 * block_size
                + if log_block_size == 0 { 2 * sector_size } else { 0 };
            if cursor < hd_offset {
                continue;
            }
            let candidate = cursor - hd_offset;
            let triggered = if disk.arch.is_i386() {
                let chs = offset_to_chs(&disk.geometry, sector_size, candidate);
                (chs.sector == 1 && (chs.head <= 2 || self.fast_mode > 1)) || candidate % (2048 * 512) == 0
            } else {
                let boundary = partscan_core::geometry::location_boundary(disk.arch, &disk.geometry, sector_size);
                boundary != 0 && candidate % boundary == 0
            };
            if triggered {
                return Some(hd_offset);
            }
        }
        None
    }

    /// One iteration: trigger evaluation, probing, admission, cursor
    /// advance. Returns `false` when the driver should stop (cursor
    /// past `search_max`, or the operator quit).
    fn step(
        &mut self,
        disk: &Disk,
        stepper: &mut dyn LocationStepper,
        signals: &mut dyn OperatorSignalSource,
    ) -> Result<bool, ScanError> {
        if self.cursor >= self.search_max {
            return Ok(false);
        }

        // spec §7: once the cursor runs past the disk's real size there is
        // nothing left to read but zeros/EOF; jump straight to `search_max`
        // instead of sector-stepping through the remainder (scenario 4:
        // "driver terminates promptly after crossing real_size").
        if self.cursor >= disk.real_size {
            tracing::debug!(cursor = self.cursor, real_size = disk.real_size, "cursor past real disk size, fast-forwarding to search_max");
            self.cursor = self.search_max;
            return Ok(true);
        }

        match signals.poll() {
            OperatorSignal::Quit => return Ok(false),
            OperatorSignal::Stop => {
                if self.next_pending_hint_after_cursor().is_none() {
                    return Ok(false);
                }
                self.apply_skip();
                return Ok(true);
            }
            OperatorSignal::Skip => {
                self.apply_skip();
                return Ok(true);
            }
            OperatorSignal::Plus => {
                self.apply_plus();
                return Ok(true);
            }
            OperatorSignal::Continue => {}
        }

        let search_now_raid_hint = self.raid_hints.drain_leq(self.cursor);
        let search_now_hint = self.hints.drain_leq(self.cursor);
        let search_now_raid = search_now_raid_hint || self.fast_mode > 1;

        self.probe_index = 0;
        let hit = self.run_probes(disk, search_now_raid, search_now_hint)?;
        self.probe_index = 14;

        if let Some(mut part) = hit {
            part.status = PartitionStatus::Deleted;
            tracing::debug!(start = part.start, size = part.size, kind = ?part.kind, "probe hit");
            self.admit_or_route(disk, part);
        }

        self.advance(disk, stepper);
        Ok(true)
    }

    fn admit_or_route(&mut self, disk: &Disk, part: Partition) {
        let end = part.end_exclusive();
        if end > self.search_max {
            tracing::warn!(start = part.start, size = part.size, "partition extends past disk, routing to bad list");
            self.bad_list.insert_unique(part);
            return;
        }

        let known = disk.arch.is_known_part(&part) && part.size > 1 && part.start >= self.min_location;
        if !known {
            return;
        }

        let is_md = matches!(part.kind, FsKind::MdRaid09 | FsKind::MdRaid1x);
        let start = part.start;
        let size = part.size;
        if !self.good_list.insert_unique(part) {
            return;
        }

        self.generate_followup_hints(disk, start, size);
        if !is_md {
            self.generate_raid_hints(disk, start, size);
        }

        if self.fast_mode == 0 && start + size > self.cursor {
            self.cursor = self.cursor.max((start + size).saturating_sub(disk.sector_size));
        }
    }

    fn generate_followup_hints(&mut self, disk: &Disk, start: u64, size: u64) {
        let next = start + size;
        self.hints.insert(next);
        let head_size = disk.geometry.head_size(disk.sector_size);
        if head_size > 0 {
            let aligned = ((next + head_size - 1) / head_size) * head_size;
            self.hints.insert(aligned);
        }
    }

    /// RAID-hint expansion after a non-MD admission (SPEC_FULL §C.3):
    /// runs only against the admitted size, which is guaranteed
    /// non-zero by the admission gate above.
    fn generate_raid_hints(&mut self, disk: &Disk, start: u64, size: u64) {
        let size_sectors = size / disk.sector_size.max(1);
        let k_bound = MD_MAX_CHUNK_SIZE / MD_RESERVED_BYTES + 3;
        for disk_factor in 1..=5u64 {
            for k in 0..k_bound {
                let candidate_sectors = size_sectors / disk_factor + k * (MD_RESERVED_BYTES / 512);
                let hint = start + probes::md_new_size_sectors(candidate_sectors) * 512;
                self.raid_hints.insert(hint);
            }
        }
    }

    /// `godmode.c:1180-1189`: `min = search_location_update(search_location)`
    /// always advances by at least a sector; a pending hint only pulls
    /// `min` *down*, and only when it falls strictly between the cursor
    /// and the stepped value. A hint at or beyond the stepped value is
    /// left pending for a later iteration rather than used here.
    fn advance(&mut self, disk: &Disk, stepper: &mut dyn LocationStepper) {
        let stepped = stepper.step(self.cursor, disk.sector_size).max(self.cursor + disk.sector_size);
        let mut min = stepped;
        if let Some(h) = self.hints.peek_next() {
            if h > self.cursor && h < min {
                min = h;
            }
        }
        if let Some(h) = self.raid_hints.peek_next() {
            if h > self.cursor && h < min {
                min = h;
            }
        }
        self.cursor = min;
    }
}

/// Runs a full scan to completion (or operator quit), returning the
/// good and bad lists as discovered (unsorted; callers that want
/// ascending-`start` order call `sort_by_start` on the report's lists,
/// typically as part of reconciliation).
pub fn run_scan(
    disk: &Disk,
    fast_mode: FastMode,
    stepper: &mut dyn LocationStepper,
    signals: &mut dyn OperatorSignalSource,
) -> Result<ScanReport, ScanError> {
    let mut driver = ScanDriver::new(disk, fast_mode);
    tracing::info!(disk = %disk.description(), min_location = driver.min_location, search_max = driver.search_max, "starting scan");
    while driver.step(disk, stepper, signals)? {}
    tracing::info!(good = driver.good_list.len(), bad = driver.bad_list.len(), "scan complete");
    Ok(ScanReport {
        good: driver.good_list.into_vec(),
        bad: driver.bad_list.into_vec(),
    })
}
