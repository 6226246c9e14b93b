//! The `Disk` abstraction: an immutable-during-scan view over a block
//! device or image file, plus the `BlockDevice` read contract it wraps.

use std::sync::{Arc, Mutex};

use crate::arch::Architecture;
use crate::error::PartScanError;
use crate::geometry::{validate_sector_size, Geometry};

/// The read contract a scanner depends on. Reentrant-safe for
/// sequential callers only (spec §5) — a single `Disk` is never read
/// from two threads concurrently during a scan.
pub trait BlockDevice: Send + Sync {
    /// Reads up to `buf.len()` bytes starting at `offset`, returning the
    /// number of bytes actually read (short reads near EOF are not an
    /// error; a genuine I/O failure is).
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize>;

    fn description(&self) -> String;
}

/// A `BlockDevice` backed by a regular file or block device node.
pub struct FileBlockDevice {
    file: Mutex<std::fs::File>,
    path: std::path::PathBuf,
}

impl FileBlockDevice {
    pub fn open(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = std::fs::File::open(&path)?;
        Ok(FileBlockDevice { file: Mutex::new(file), path })
    }

    pub fn len(&self) -> std::io::Result<u64> {
        self.file.lock().expect("file lock poisoned").metadata().map(|m| m.len())
    }
}

impl BlockDevice for FileBlockDevice {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        use std::io::{Read, Seek, SeekFrom};
        let mut file = self.file.lock().expect("file lock poisoned");
        file.seek(SeekFrom::Start(offset))?;
        let mut total = 0;
        while total < buf.len() {
            match file.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }

    fn description(&self) -> String {
        self.path.display().to_string()
    }
}

/// An immutable disk under scan. Built once at scan start; nothing in
/// `partscan-scanner` mutates it.
pub struct Disk {
    pub id: String,
    /// The disk's real size in bytes (what the underlying device
    /// actually contains).
    pub real_size: u64,
    /// The declared size, which may differ from `real_size` after a
    /// geometry override (spec §3, Disk attributes).
    pub declared_size: u64,
    pub sector_size: u64,
    pub geometry: Geometry,
    pub arch: Architecture,
    device: Arc<dyn BlockDevice>,
}

impl Disk {
    pub fn new(
        id: impl Into<String>,
        real_size: u64,
        declared_size: u64,
        sector_size: u64,
        geometry: Geometry,
        arch: Architecture,
        device: Arc<dyn BlockDevice>,
    ) -> Result<Self, PartScanError> {
        validate_sector_size(sector_size)?;
        Ok(Disk {
            id: id.into(),
            real_size,
            declared_size,
            sector_size,
            geometry,
            arch,
            device,
        })
    }

    /// Reads `buf.len()` bytes at `offset`, returning the number of
    /// bytes read. A probe must treat anything short of `buf.len()` as
    /// "not enough data to decide" rather than an error in its own
    /// right; only a genuine I/O failure is a read error (spec §7).
    pub fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize, PartScanError> {
        self.device
            .read_at(buf, offset)
            .map_err(|source| PartScanError::Read { offset, source })
    }

    pub fn description(&self) -> String {
        format!("{} ({})", self.id, self.device.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn geom() -> Geometry {
        Geometry { cylinders: 16, heads_per_cylinder: 4, sectors_per_head: 32 }
    }

    #[test]
    fn reads_back_written_bytes() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[0xAAu8; 4096]).unwrap();
        tmp.flush().unwrap();

        let dev = Arc::new(FileBlockDevice::open(tmp.path()).unwrap());
        let disk = Disk::new("test", 4096, 4096, 512, geom(), Architecture::None, dev).unwrap();

        let mut buf = [0u8; 512];
        let n = disk.read(&mut buf, 512).unwrap();
        assert_eq!(n, 512);
        assert!(buf.iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn short_read_near_eof_is_not_an_error() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[1u8; 100]).unwrap();
        tmp.flush().unwrap();

        let dev = Arc::new(FileBlockDevice::open(tmp.path()).unwrap());
        let disk = Disk::new("test", 100, 100, 512, geom(), Architecture::None, dev).unwrap();

        let mut buf = [0u8; 512];
        let n = disk.read(&mut buf, 0).unwrap();
        assert_eq!(n, 100);
    }

    #[test]
    fn rejects_bad_sector_size() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let dev = Arc::new(FileBlockDevice::open(tmp.path()).unwrap());
        let err = Disk::new("test", 0, 0, 511, geom(), Architecture::None, dev).unwrap_err();
        assert!(matches!(err, PartScanError::InvalidSectorSize(511)));
    }
}
