pub mod arch;
pub mod disk;
pub mod error;
pub mod geometry;
pub mod partition;

pub use arch::Architecture;
pub use disk::{BlockDevice, Disk, FileBlockDevice};
pub use error::PartScanError;
pub use geometry::{chs_to_offset, offset_to_chs, offset_to_cylinder, Chs, Geometry};
pub use partition::{FsKind, GptIds, Partition, PartitionReadError, PartitionStatus, TypeCodes};
