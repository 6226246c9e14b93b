use thiserror::Error;

/// Scan-level failures, layered over the disk-level [`partscan_core::PartScanError`].
#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Disk(#[from] partscan_core::PartScanError),

    #[error("operator cancelled the scan")]
    Cancelled,

    #[error("invalid scan configuration: {0}")]
    InvalidConfig(String),
}
