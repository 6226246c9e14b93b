use thiserror::Error;

/// Errors surfaced by the disk/geometry/partition layer.
///
/// The scan driver (in `partscan-scanner`) wraps this in its own
/// `ScanError` rather than re-exporting it directly, so that scan-level
/// conditions (operator cancellation, hint overflow) stay distinct from
/// disk-level ones (read failures, bad geometry).
#[derive(Debug, Error)]
pub enum PartScanError {
    #[error("read error at offset {offset}: {source}")]
    Read {
        offset: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("sector size {0} is not a power of two >= 512")]
    InvalidSectorSize(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("other error: {0}")]
    Other(String),
}
