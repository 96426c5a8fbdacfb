//! landseg: segment a satellite GeoTIFF into land-region polygons.
//!
//! Reads `temp/imagery/temp_satellite.tif` under the base directory, runs
//! the segmentation model on it and writes the label mask, the colour
//! overlay and a filtered shapefile to `temp/segmentation/`.
//!
//! # Usage
//!
//! ```text
//! landseg [OPTIONS]
//! landseg masks-to-shp [OPTIONS] <MASK> <OUTPUT>
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use flexi_logger::{Logger, LoggerHandle};
use landseg_io::command::{DEFAULT_PROGRAM, resolve_program};
use landseg_io::{CommandMaskGenerator, SegmentConfig, SegmentationReport};
use landseg_pipeline::{Device, ModelType, VectorizeConfig, VectorizeOutcome};

/// Segment a satellite image into land-region polygons.
///
/// Runs with no arguments using the default layout under the current
/// directory.
#[derive(Parser)]
#[command(name = "landseg", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Directory containing the `temp/` layout.
    #[arg(long, default_value = ".")]
    base_dir: PathBuf,

    /// Program that runs the segmentation model (see `tools/landseg-sam`).
    ///
    /// Looked up on `PATH` and next to this executable.
    #[arg(long, default_value = DEFAULT_PROGRAM)]
    generator: PathBuf,

    /// Model checkpoint (default: torch hub cache).
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Never download a missing checkpoint.
    #[arg(long)]
    offline: bool,

    /// Model backbone.
    #[arg(long, value_enum, default_value_t = Backbone::VitH)]
    model_type: Backbone,

    /// Execution device: cpu, cuda or cuda:<n>.
    #[arg(long, default_value = "cpu")]
    device: Device,

    /// Labels below this percentile of the distinct labels are dropped.
    #[arg(long, default_value_t = VectorizeConfig::DEFAULT_THRESHOLD_PERCENTILE)]
    threshold_percentile: f64,

    /// Also save an original | segmentation | overlay comparison PNG.
    #[arg(long)]
    plot: bool,

    /// Full run config as a JSON string.
    ///
    /// When provided, all other run flags are ignored.
    /// The JSON must be a valid `SegmentConfig` serialization.
    #[arg(long)]
    config_json: Option<String>,

    /// Log at debug level.
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Convert an existing label mask GeoTIFF to a shapefile.
    MasksToShp {
        /// Single-band label raster.
        mask: PathBuf,

        /// Output `.shp` path.
        output: PathBuf,

        /// Labels below this percentile of the distinct labels are dropped.
        #[arg(long, default_value_t = VectorizeConfig::DEFAULT_THRESHOLD_PERCENTILE)]
        threshold_percentile: f64,
    },
}

/// Model backbone selection.
#[derive(Clone, Copy, ValueEnum)]
enum Backbone {
    /// ViT-H, the largest and most accurate.
    VitH,
    /// ViT-L.
    VitL,
    /// ViT-B, the smallest.
    VitB,
}

impl From<Backbone> for ModelType {
    fn from(b: Backbone) -> Self {
        match b {
            Backbone::VitH => Self::VitH,
            Backbone::VitL => Self::VitL,
            Backbone::VitB => Self::VitB,
        }
    }
}

/// Build a [`SegmentConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and the
/// individual run flags are ignored.
fn config_from_cli(cli: &Cli) -> Result<SegmentConfig, String> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    Ok(SegmentConfig {
        base_dir: cli.base_dir.clone(),
        model_type: cli.model_type.into(),
        device: cli.device,
        checkpoint: cli.checkpoint.clone(),
        offline: cli.offline,
        vectorize: VectorizeConfig {
            threshold_percentile: cli.threshold_percentile,
        },
        plot: cli.plot,
        ..SegmentConfig::default()
    })
}

fn init_logging(verbose: bool) -> Result<LoggerHandle, flexi_logger::FlexiLoggerError> {
    let level = if verbose { "debug" } else { "info" };
    Logger::try_with_env_or_str(level)?.start()
}

fn print_report(report: &SegmentationReport) {
    println!("masks:       {}", report.masks_path.display());
    println!("annotations: {}", report.annotations_path.display());
    match &report.shapefile_path {
        Some(path) => println!(
            "polygons:    {} ({} polygons)",
            path.display(),
            report.polygon_count()
        ),
        None => println!("polygons:    none written ({})", describe(&report.outcome)),
    }
    if let Some(path) = &report.visualization_path {
        println!("plot:        {}", path.display());
    }
}

fn describe(outcome: &VectorizeOutcome) -> String {
    match outcome {
        VectorizeOutcome::NoSegments => "no segments found".to_string(),
        VectorizeOutcome::AllFiltered { threshold } => {
            format!("all segments below threshold {threshold}")
        }
        VectorizeOutcome::Polygons { records, threshold } => {
            format!("{} polygons at threshold {threshold}", records.len())
        }
    }
}

fn run_masks_to_shp(mask: &Path, output: &Path, threshold_percentile: f64) -> ExitCode {
    let config = VectorizeConfig {
        threshold_percentile,
    };
    match landseg_io::masks_to_shapefile(mask, output, &config) {
        Ok(outcome) => {
            println!("{}", describe(&outcome));
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _logger = match init_logging(cli.verbose) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Error initializing logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(Command::MasksToShp {
        ref mask,
        ref output,
        threshold_percentile,
    }) = cli.command
    {
        return run_masks_to_shp(mask, output, threshold_percentile);
    }

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };
    log::debug!("config: {config:#?}");

    // Resolve before the checkpoint is provisioned.
    let program = match resolve_program(&cli.generator) {
        Ok(program) => program,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    log::debug!("generator program: {}", program.display());

    let result = landseg_io::segment_satellite_image(&config, |checkpoint| {
        CommandMaskGenerator::new(program, checkpoint, config.model_type, config.device)
    });

    match result {
        Ok(report) => {
            print_report(&report);
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("segmentation failed: {e}");
            ExitCode::FAILURE
        }
    }
}
