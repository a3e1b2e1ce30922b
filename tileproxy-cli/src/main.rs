//! Tileproxy CLI - prepare resources and render their files from the shell.
//!
//! ```text
//! tileproxy prepare resources.json
//! tileproxy serve-file resources.json webmerc/imagery/ortho 5-16-10.jpg -o tile.jpg
//! tileproxy warp ortho.tif --extents 0 0 1000 1000 --size 256 256 -o out.png
//! tileproxy tiling dem.tif --reference-frame webmerc
//! tileproxy config show
//! ```

mod commands;
mod error;
mod runner;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use commands::common::OperationArg;
use commands::config::ConfigCommands;
use error::CliError;
use runner::CliRunner;

#[derive(Debug, Parser)]
#[command(name = "tileproxy", version, about = "On-demand map tile, metatile and geodata generation")]
struct Cli {
    /// Configuration file (default: ~/.tileproxy/config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is not set (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Load a resources file and prepare every resource that is not ready
    Prepare {
        /// Resources file (JSON array of resource definitions)
        resources: PathBuf,

        /// Root for dataset paths in definitions (default: the resources file's directory)
        #[arg(long)]
        data_root: Option<PathBuf>,

        /// Warp inside this process instead of worker processes
        #[arg(long)]
        in_process: bool,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Render one file of one resource
    ServeFile {
        /// Resources file (JSON array of resource definitions)
        resources: PathBuf,

        /// Resource as referenceFrame/group/id
        resource: String,

        /// File name, e.g. 5-16-10.png, mapConfig.json, 3-0-0.meta
        file: String,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Root for dataset paths in definitions (default: the resources file's directory)
        #[arg(long)]
        data_root: Option<PathBuf>,

        /// Warp inside this process instead of worker processes
        #[arg(long)]
        in_process: bool,
    },

    /// Run a single raster request through the warper
    Warp {
        /// Source dataset
        dataset: PathBuf,

        /// Raster to produce
        #[arg(long, value_enum, default_value = "image")]
        operation: OperationArg,

        /// Mask dataset applied to the source
        #[arg(long)]
        mask: Option<PathBuf>,

        /// Output SRS
        #[arg(long, default_value = "EPSG:3857")]
        srs: String,

        /// Output extents in the output SRS: llx lly urx ury
        #[arg(long, num_args = 4, required = true, allow_negative_numbers = true)]
        extents: Vec<f64>,

        /// Output size in pixels: width height
        #[arg(long, num_args = 2, default_values_t = [256, 256])]
        size: Vec<u32>,

        /// Resampling (nearest, bilinear, average)
        #[arg(long)]
        resampling: Option<String>,

        /// Output file; images for 8-bit rasters, raw f64 samples otherwise
        #[arg(short, long)]
        output: PathBuf,

        /// Warp inside this process instead of worker processes
        #[arg(long)]
        in_process: bool,
    },

    /// Generate a tile index for a dataset
    Tiling {
        /// Source dataset
        dataset: PathBuf,

        /// Reference frame
        #[arg(long, default_value = "webmerc")]
        reference_frame: String,

        /// Deepest LOD to index (default: derived from the dataset resolution)
        #[arg(long)]
        max_lod: Option<u8>,

        /// Output index (default: next to the dataset as <dataset>.tiling.<referenceFrame>)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn run(cli: Cli) -> Result<(), CliError> {
    // config commands run without logging or a loaded configuration
    let runner = || CliRunner::new(cli.config.as_deref(), cli.log_level.as_deref());
    match cli.command {
        Commands::Prepare {
            resources,
            data_root,
            in_process,
            json,
        } => commands::prepare::run(
            &runner()?,
            commands::prepare::PrepareArgs {
                resources,
                data_root,
                in_process,
                json,
            },
        ),
        Commands::ServeFile {
            resources,
            resource,
            file,
            output,
            data_root,
            in_process,
        } => commands::serve_file::run(
            &runner()?,
            commands::serve_file::ServeFileArgs {
                resources,
                resource,
                file,
                output,
                data_root,
                in_process,
            },
        ),
        Commands::Warp {
            dataset,
            operation,
            mask,
            srs,
            extents,
            size,
            resampling,
            output,
            in_process,
        } => commands::warp::run(
            &runner()?,
            commands::warp::WarpArgs {
                dataset,
                operation,
                mask,
                srs,
                extents,
                width: size[0],
                height: size[1],
                resampling,
                output,
                in_process,
            },
        ),
        Commands::Tiling {
            dataset,
            reference_frame,
            max_lod,
            output,
        } => commands::tiling::run(
            &runner()?,
            commands::tiling::TilingArgs {
                dataset,
                reference_frame,
                max_lod,
                output,
            },
        ),
        Commands::Config { command } => commands::config::run(command, cli.config.clone()),
    }
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
