//! The scan engine: hint tracking, the signature-probe battery, the
//! scan driver loop, and post-scan reconciliation over a
//! `partscan_core::Disk`.

pub mod driver;
pub mod error;
pub mod hints;
pub mod list;
pub mod probes;
pub mod reconcile;

pub use driver::{run_scan, FastMode, IdentityStepper, LocationStepper, NeverStop, OperatorSignal, OperatorSignalSource, ScanDriver, ScanReport};
pub use error::ScanError;
pub use hints::{HintSet, HINT_CAPACITY};
pub use list::PartitionList;
pub use reconcile::{check_geometry, retry_ntfs_from_backup, synthesize_extended_partition, ExtendedMode, GeometryWarning};

use partscan_core::Disk;

/// Runs a scan to completion and applies the standard reconciliation
/// pipeline: NTFS-backup retry, extended-partition synthesis, and a
/// geometry check. This is the entry point most callers want; `run_scan`
/// and the `reconcile` functions remain available individually for
/// callers that need finer control (e.g. an interactive UI that wants
/// to offer min/max toggling after the fact).
pub fn scan_and_reconcile(
    disk: &Disk,
    fast_mode: FastMode,
    extended_mode: ExtendedMode,
    stepper: &mut dyn LocationStepper,
    signals: &mut dyn OperatorSignalSource,
) -> Result<FullReport, ScanError> {
    let mut report = run_scan(disk, fast_mode, stepper, signals)?;

    let mut good_list: PartitionList = report.good.drain(..).collect();
    retry_ntfs_from_backup(disk, &mut good_list)?;
    good_list.sort_by_start();

    if disk.arch.is_i386() {
        synthesize_extended_partition(disk, &mut good_list, extended_mode);
        good_list.sort_by_start();
    }

    let geometry_warning = check_geometry(disk, &good_list);

    let mut good = good_list.into_vec();
    disk.arch.init_structure(&mut good);
    disk.arch.init_part_order(&mut good);
    let structure_valid = disk.arch.test_structure(&good);

    Ok(FullReport {
        good,
        bad: report.bad,
        geometry_warning,
        structure_valid,
    })
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct FullReport {
    pub good: Vec<partscan_core::Partition>,
    pub bad: Vec<partscan_core::Partition>,
    pub geometry_warning: Option<GeometryWarning>,
    /// `test_structure`'s verdict on the final, ordered `good` list
    /// (spec §4.3) — whether this architecture's fixed-size partition
    /// table could actually represent the reconstruction, independent
    /// of whether anything is ever written back out.
    pub structure_valid: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use partscan_core::{Architecture, FileBlockDevice, Geometry};
    use std::sync::Arc;

    #[test]
    fn scan_and_reconcile_on_empty_image_yields_empty_report() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.as_file().set_len(4 * 1024 * 1024).unwrap();
        let dev = Arc::new(FileBlockDevice::open(tmp.path()).unwrap());
        let geometry = Geometry { cylinders: 8, heads_per_cylinder: 16, sectors_per_head: 63 };
        let disk = Disk::new("test", 4 * 1024 * 1024, 4 * 1024 * 1024, 512, geometry, Architecture::I386, dev).unwrap();

        let mut stepper = IdentityStepper;
        let mut signals = NeverStop;
        let report = scan_and_reconcile(&disk, 2, ExtendedMode::Max, &mut stepper, &mut signals).unwrap();

        assert!(report.good.is_empty());
        assert!(report.bad.is_empty());
        assert!(report.geometry_warning.is_none());
    }
}
