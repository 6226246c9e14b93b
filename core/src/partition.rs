//! The partition descriptor and the closed filesystem-kind tag set.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed set of filesystem/container kinds a probe can tag a partition
/// with. Mirrors upstream TestDisk's `upart_type` enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FsKind {
    Unknown,
    Apfs,
    BeOs,
    Btrfs,
    Cramfs,
    ExFat,
    Ext2,
    Ext3,
    Ext4,
    Extended,
    ExtendedLba,
    Fat12,
    Fat16,
    Fat32,
    FatX,
    FreeBsd,
    F2Fs,
    Gfs2,
    Hfs,
    HfsPlus,
    HfsX,
    Hpfs,
    Iso,
    Jfs,
    LinSwap,
    LinSwap2,
    LinSwapNewStyle,
    LinSwapNewStyle2,
    LinSwapByteSwapped,
    Luks,
    Lvm1,
    Lvm2,
    NetWare,
    Ntfs,
    OpenBsd,
    Os2Mb,
    ReFs,
    ReiserFs2,
    ReiserFs3,
    ReiserFs4,
    Sun,
    SysV4,
    Ufs,
    UfsLe,
    Ufs2,
    Ufs2Le,
    Vmfs,
    Wbfs,
    XfsV1,
    XfsV2,
    XfsV3,
    XfsV4,
    XfsV5,
    Zfs,
    MdRaid09,
    MdRaid1x,
}

/// Partition status within the reconstructed table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionStatus {
    Primary,
    PrimaryBoot,
    Logical,
    Extended,
    ExtendedInExtended,
    Deleted,
}

/// Architecture-specific type codes, populated only for the matching
/// architecture; all others stay `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeCodes {
    pub i386: Option<u8>,
    pub mac: Option<u32>,
    pub sun: Option<u8>,
    pub xbox: Option<u8>,
    pub humax: Option<u8>,
}

/// A GPT-style UUID pair: the partition-type UUID and the per-partition
/// unique UUID. Zeroed when not applicable (non-GPT architectures).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GptIds {
    pub type_uuid: Uuid,
    pub unique_uuid: Uuid,
}

impl Default for GptIds {
    fn default() -> Self {
        GptIds { type_uuid: Uuid::nil(), unique_uuid: Uuid::nil() }
    }
}

/// A read error a probe encountered while validating the extent or
/// superblock it was examining, retained for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionReadError {
    None,
    SuperblockRead,
    ExtentRead,
}

/// Candidate or admitted partition descriptor.
///
/// `sb_offset` is the distance from `start` to the backup structure that
/// actually matched (zero when the match was at the front of the
/// partition, e.g. a primary boot sector rather than a backup).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    pub start: u64,
    pub size: u64,
    pub kind: FsKind,
    pub status: PartitionStatus,
    pub type_codes: TypeCodes,
    pub gpt: GptIds,
    pub read_error: PartitionReadError,
    pub sb_offset: u64,
    pub order: u32,
}

impl Partition {
    pub fn new(start: u64, kind: FsKind) -> Self {
        Partition {
            start,
            size: 0,
            kind,
            status: PartitionStatus::Deleted,
            type_codes: TypeCodes::default(),
            gpt: GptIds::default(),
            read_error: PartitionReadError::None,
            sb_offset: 0,
            order: 0,
        }
    }

    pub fn end_exclusive(&self) -> u64 {
        self.start + self.size
    }

    pub fn end_inclusive(&self) -> u64 {
        self.start + self.size - 1
    }

    pub fn overlaps(&self, other: &Partition) -> bool {
        self.start < other.end_exclusive() && other.start < self.end_exclusive()
    }

    /// Exact `(start, size, kind)` identity used to reject duplicates.
    pub fn identity(&self) -> (u64, u64, FsKind) {
        (self.start, self.size, self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_ignores_status() {
        let mut a = Partition::new(2048, FsKind::Ntfs);
        a.size = 4096;
        let mut b = a.clone();
        b.status = PartitionStatus::Primary;
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn overlap_detection() {
        let mut a = Partition::new(0, FsKind::Fat32);
        a.size = 100;
        let mut b = Partition::new(50, FsKind::Fat32);
        b.size = 100;
        let mut c = Partition::new(100, FsKind::Fat32);
        c.size = 100;
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }
}
