//! Disk-architecture policy: the capability set described in spec §4.3.
//!
//! Modeled as an enum rather than a function-pointer struct (the
//! original's `arch_fnct_t`): the variant set is closed and small, so a
//! `match` over `Architecture` reads more plainly in Rust than a vtable
//! of trait objects, while still letting callers dispatch through one
//! named operation per capability instead of comparing identities.

use crate::geometry::Geometry;
use crate::partition::{FsKind, Partition, PartitionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Architecture {
    None,
    I386,
    Gpt,
    Mac,
    Sun,
    Xbox,
    Humax,
}

impl Architecture {
    /// `min_location`: the smallest byte offset a partition may start at.
    pub fn min_location(&self, geometry: &Geometry, sector_size: u64) -> u64 {
        use Architecture::*;
        match self {
            Gpt => 2 * sector_size + 16384,
            I386 | Humax => sector_size,
            Mac => 4096,
            Sun => geometry.cylinder_size(sector_size),
            Xbox => 0x800,
            None => 0,
        }
    }

    /// `is_known_part`: whether this architecture's partition table can
    /// represent the given filesystem kind at all. Unknown kinds are
    /// always rejected; Xbox additionally restricts to the kinds its
    /// table format actually carries.
    pub fn is_known_part(&self, part: &Partition) -> bool {
        if part.kind == FsKind::Unknown {
            return false;
        }
        match self {
            Architecture::Xbox => {
                matches!(part.kind, FsKind::FatX | FsKind::Extended | FsKind::ExtendedLba)
            }
            _ => true,
        }
    }

    pub fn is_i386(&self) -> bool {
        matches!(self, Architecture::I386)
    }

    /// `init_part_order`: assigns the `order` field described in spec §3
    /// ("1..4 for MBR primaries, otherwise sequential"). `partitions`
    /// must already be sorted ascending by `start` (the caller's
    /// post-scan sort order); i386/Humax primaries, primary-boot, and
    /// extended entries take slots 1..4 in start order, and any
    /// logicals (or overflow beyond four primary-level entries) are
    /// numbered sequentially starting at 5. Every other architecture
    /// just numbers every entry sequentially from 1.
    pub fn init_part_order(&self, partitions: &mut [Partition]) {
        match self {
            Architecture::I386 | Architecture::Humax => {
                let mut next_primary = 1u32;
                let mut next_logical = 5u32;
                for p in partitions.iter_mut() {
                    if p.status == PartitionStatus::Logical && next_primary <= 4 {
                        p.order = next_logical;
                        next_logical += 1;
                    } else if next_primary <= 4 {
                        p.order = next_primary;
                        next_primary += 1;
                    } else {
                        p.order = next_logical;
                        next_logical += 1;
                    }
                }
            }
            _ => {
                for (i, p) in partitions.iter_mut().enumerate() {
                    p.order = i as u32 + 1;
                }
            }
        }
    }

    /// `init_structure`: architecture-specific post-processing hook run
    /// once over the admitted list before the order/validity pass. A
    /// no-op for every architecture modeled here: the one case the
    /// original gives this hook real work (`arch_mac`'s
    /// `apple_partition_map` bootstrapping) only matters when a
    /// partition table is about to be written back out, which is a
    /// Non-goal (spec §1) this scanner never reaches.
    pub fn init_structure(&self, _partitions: &mut [Partition]) {}

    /// `test_structure`: the validity gate the original runs before
    /// offering to write a partition table. i386/Humax reject a
    /// reconstruction with more than four primary-level entries (the
    /// MBR's fixed table size) or more than one `extended` entry; every
    /// other architecture has no such constraint here.
    pub fn test_structure(&self, partitions: &[Partition]) -> bool {
        match self {
            Architecture::I386 | Architecture::Humax => {
                let primary_level =
                    partitions.iter().filter(|p| p.status != PartitionStatus::Logical).count();
                if primary_level > 4 {
                    return false;
                }
                let extended_count =
                    partitions.iter().filter(|p| p.status == PartitionStatus::Extended).count();
                extended_count <= 1
            }
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geom() -> Geometry {
        Geometry { cylinders: 1024, heads_per_cylinder: 255, sectors_per_head: 63 }
    }

    #[test]
    fn min_location_matches_policy_table() {
        let g = geom();
        assert_eq!(Architecture::Gpt.min_location(&g, 512), 2 * 512 + 16384);
        assert_eq!(Architecture::I386.min_location(&g, 512), 512);
        assert_eq!(Architecture::Humax.min_location(&g, 512), 512);
        assert_eq!(Architecture::Mac.min_location(&g, 512), 4096);
        assert_eq!(Architecture::Xbox.min_location(&g, 512), 0x800);
        assert_eq!(Architecture::None.min_location(&g, 512), 0);
        assert_eq!(Architecture::Sun.min_location(&g, 512), g.cylinder_size(512));
    }

    #[test]
    fn unknown_kind_never_known() {
        let p = Partition::new(0, FsKind::Unknown);
        assert!(!Architecture::I386.is_known_part(&p));
    }

    fn part(start: u64, status: PartitionStatus) -> Partition {
        let mut p = Partition::new(start, FsKind::Fat32);
        p.size = 1024;
        p.status = status;
        p
    }

    #[test]
    fn i386_order_numbers_primaries_1_to_4_then_logicals_from_5() {
        let mut list = vec![
            part(0, PartitionStatus::Primary),
            part(1024, PartitionStatus::Extended),
            part(2048, PartitionStatus::Logical),
            part(3072, PartitionStatus::Logical),
        ];
        Architecture::I386.init_part_order(&mut list);
        assert_eq!(list[0].order, 1);
        assert_eq!(list[1].order, 2);
        assert_eq!(list[2].order, 5);
        assert_eq!(list[3].order, 6);
    }

    #[test]
    fn non_i386_order_is_plain_sequential() {
        let mut list = vec![part(0, PartitionStatus::Primary), part(1024, PartitionStatus::Primary)];
        Architecture::Gpt.init_part_order(&mut list);
        assert_eq!(list[0].order, 1);
        assert_eq!(list[1].order, 2);
    }

    #[test]
    fn test_structure_rejects_more_than_four_primary_level_entries() {
        let list = vec![
            part(0, PartitionStatus::Primary),
            part(1, PartitionStatus::Primary),
            part(2, PartitionStatus::Primary),
            part(3, PartitionStatus::Primary),
            part(4, PartitionStatus::Primary),
        ];
        assert!(!Architecture::I386.test_structure(&list));
    }

    #[test]
    fn test_structure_rejects_two_extended_entries() {
        let list = vec![part(0, PartitionStatus::Extended), part(1, PartitionStatus::Extended)];
        assert!(!Architecture::I386.test_structure(&list));
    }

    #[test]
    fn test_structure_accepts_normal_layout() {
        let list = vec![
            part(0, PartitionStatus::Primary),
            part(1024, PartitionStatus::Extended),
            part(2048, PartitionStatus::Logical),
        ];
        assert!(Architecture::I386.test_structure(&list));
    }
}
