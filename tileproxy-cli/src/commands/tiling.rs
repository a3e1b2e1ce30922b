//! Tiling command - generate a tile index for a dataset.
//!
//! By default the index is written next to the dataset where
//! `geodata-semantic-tiled` resources pick it up instead of computing one.

use std::path::PathBuf;
use std::time::Instant;

use tileproxy::generator::{precomputed_tiling, TILE_SIZE};
use tileproxy::geo::GeoDataset;
use tileproxy::tiling::{self, LodRange, ReferenceFrames};

use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the tiling command.
pub struct TilingArgs {
    pub dataset: PathBuf,
    pub reference_frame: String,
    pub max_lod: Option<u8>,
    pub output: Option<PathBuf>,
}

/// Run the tiling command.
pub fn run(runner: &CliRunner, args: TilingArgs) -> Result<(), CliError> {
    runner.log_startup("tiling");
    let frames = ReferenceFrames::builtin();
    let rf = frames
        .get(&args.reference_frame)
        .map_err(|e| CliError::Config(e.to_string()))?;
    let dataset = GeoDataset::open(&args.dataset).map_err(CliError::Warper)?;

    let (derived, tile_range) = tiling::lod_range_for(&dataset, rf, TILE_SIZE)
        .map_err(CliError::Warper)?
        .ok_or_else(|| {
            CliError::Config(format!(
                "{} lies outside reference frame {}",
                args.dataset.display(),
                rf.id()
            ))
        })?;
    let max = args.max_lod.unwrap_or(derived.max);
    if max < derived.min {
        return Err(CliError::Config(format!(
            "--max-lod {} is above the dataset's top LOD {}",
            max, derived.min
        )));
    }
    let lod_range = LodRange::new(derived.min, max);

    println!("Dataset:         {}", args.dataset.display());
    println!("Reference frame: {}", rf.id());
    println!("LOD range:       {}", lod_range);
    println!("Tile range:      {}", tile_range);
    println!();

    let started = Instant::now();
    let config = runner.config().tiling_config();
    let index = tiling::generate(&dataset, rf, lod_range, &[tile_range], &config)
        .map_err(CliError::Warper)?;

    for lod in lod_range.iter() {
        println!("  LOD {:>2}: {} tiles", lod, index.count_at(lod));
    }

    let output = args
        .output
        .unwrap_or_else(|| precomputed_tiling(&args.dataset, rf));
    index.save(&output).map_err(CliError::Warper)?;
    println!();
    println!(
        "Wrote {} tiles to {} in {:.1?}",
        index.count(),
        output.display(),
        started.elapsed()
    );
    Ok(())
}
