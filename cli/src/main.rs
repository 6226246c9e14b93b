use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use partscan_core::{Architecture, Disk, FileBlockDevice, Geometry};
use partscan_scanner::{scan_and_reconcile, ExtendedMode as ScanExtendedMode, IdentityStepper, NeverStop};

#[derive(Parser)]
#[command(name = "partscan")]
#[command(about = "Partition-discovery scanner for raw disk images and block devices", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a disk image or block device for partitions.
    Scan {
        /// Path to the image file or block device.
        path: PathBuf,
        #[arg(long, default_value_t = 512)]
        sector_size: u64,
        #[arg(long, default_value_t = 1024)]
        cylinders: u64,
        #[arg(long, default_value_t = 255)]
        heads: u32,
        #[arg(long, default_value_t = 63)]
        sectors_per_head: u32,
        #[arg(long, value_enum, default_value_t = ArchArg::I386)]
        arch: ArchArg,
        /// 0 = exhaustive, 1 = normal, 2 = aggressive.
        #[arg(long, default_value_t = 1)]
        fast_mode: u8,
        #[arg(long, value_enum, default_value_t = ExtModeArg::Max)]
        extended_mode: ExtModeArg,
        /// Treat the image as if it declared this many bytes, even if
        /// the underlying file is a different size.
        #[arg(long)]
        declared_size: Option<u64>,
        /// Print the report as JSON instead of a human-readable summary.
        #[arg(long)]
        json: bool,
    },
    /// Print CHS/offset conversions and the alignment boundary for a
    /// described geometry, without reading any disk.
    Geometry {
        #[arg(long, default_value_t = 512)]
        sector_size: u64,
        #[arg(long, default_value_t = 1024)]
        cylinders: u64,
        #[arg(long, default_value_t = 255)]
        heads: u32,
        #[arg(long, default_value_t = 63)]
        sectors_per_head: u32,
        /// Byte offset to convert to CHS.
        #[arg(long)]
        offset: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ArchArg {
    None,
    I386,
    Gpt,
    Mac,
    Sun,
    Xbox,
    Humax,
}

impl From<ArchArg> for Architecture {
    fn from(a: ArchArg) -> Self {
        match a {
            ArchArg::None => Architecture::None,
            ArchArg::I386 => Architecture::I386,
            ArchArg::Gpt => Architecture::Gpt,
            ArchArg::Mac => Architecture::Mac,
            ArchArg::Sun => Architecture::Sun,
            ArchArg::Xbox => Architecture::Xbox,
            ArchArg::Humax => Architecture::Humax,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ExtModeArg {
    Min,
    Max,
}

impl From<ExtModeArg> for ScanExtendedMode {
    fn from(m: ExtModeArg) -> Self {
        match m {
            ExtModeArg::Min => ScanExtendedMode::Min,
            ExtModeArg::Max => ScanExtendedMode::Max,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Scan {
            path,
            sector_size,
            cylinders,
            heads,
            sectors_per_head,
            arch,
            fast_mode,
            extended_mode,
            declared_size,
            json,
        } => {
            let report = tokio::task::spawn_blocking(move || {
                run_scan_command(path, sector_size, cylinders, heads, sectors_per_head, arch.into(), fast_mode, extended_mode.into(), declared_size)
            })
            .await??;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
        Commands::Geometry { sector_size, cylinders, heads, sectors_per_head, offset } => {
            let geometry = Geometry { cylinders, heads_per_cylinder: heads, sectors_per_head };
            let chs = partscan_core::offset_to_chs(&geometry, sector_size, offset);
            let back = partscan_core::chs_to_offset(&geometry, sector_size, &chs);
            let boundary = partscan_core::geometry::align_boundary_i386(&geometry, sector_size, offset);
            println!("offset {offset} -> CHS (cylinder={}, head={}, sector={})", chs.cylinder, chs.head, chs.sector);
            println!("CHS -> offset roundtrip: {back}");
            println!("i386 alignment boundary at this offset: {boundary} bytes");
        }
    }

    Ok(())
}

fn run_scan_command(
    path: PathBuf,
    sector_size: u64,
    cylinders: u64,
    heads: u32,
    sectors_per_head: u32,
    arch: Architecture,
    fast_mode: u8,
    extended_mode: ScanExtendedMode,
    declared_size: Option<u64>,
) -> anyhow::Result<partscan_scanner::FullReport> {
    let device = FileBlockDevice::open(&path)?;
    let real_size = device.len()?;
    let declared_size = declared_size.unwrap_or(real_size);
    let geometry = Geometry { cylinders, heads_per_cylinder: heads, sectors_per_head };

    let disk = Disk::new(path.display().to_string(), real_size, declared_size, sector_size, geometry, arch, Arc::new(device))?;

    let mut stepper = IdentityStepper;
    let mut signals = NeverStop;
    let report = scan_and_reconcile(&disk, fast_mode, extended_mode, &mut stepper, &mut signals)?;
    Ok(report)
}

fn print_report(report: &partscan_scanner::FullReport) {
    println!("Good partitions ({}):", report.good.len());
    for part in &report.good {
        println!(
            "  start={:<12} size={:<12} kind={:?} status={:?}",
            part.start, part.size, part.kind, part.status
        );
    }
    if !report.bad.is_empty() {
        println!("\nBad partitions (extend past the disk, {}):", report.bad.len());
        for part in &report.bad {
            println!("  start={:<12} size={:<12} kind={:?}", part.start, part.size, part.kind);
        }
    }
    if let Some(warning) = &report.geometry_warning {
        println!(
            "\nGeometry warning: configured heads_per_cylinder={} but discovered partitions suggest {}",
            warning.configured_heads_per_cylinder, warning.inferred_heads_per_cylinder
        );
    }
    if !report.structure_valid {
        println!("\nWarning: reconstructed layout does not fit this architecture's partition table (too many entries).");
    }
}
