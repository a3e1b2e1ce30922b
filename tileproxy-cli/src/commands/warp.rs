//! Warp command - run one raster request through the warper.

use std::path::{Path, PathBuf};
use std::time::Instant;

use tileproxy::geo::{Extents2, Raster, Resampling, Size2, SrsDefinition};
use tileproxy::warper::RasterRequest;

use super::common::OperationArg;
use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the warp command.
pub struct WarpArgs {
    pub dataset: PathBuf,
    pub operation: OperationArg,
    pub mask: Option<PathBuf>,
    pub srs: String,
    pub extents: Vec<f64>,
    pub width: u32,
    pub height: u32,
    pub resampling: Option<String>,
    pub output: PathBuf,
    pub in_process: bool,
}

/// Run the warp command.
pub fn run(runner: &CliRunner, args: WarpArgs) -> Result<(), CliError> {
    runner.log_startup("warp");
    let request = build_request(&args)?;
    let warper = runner.warper(args.in_process)?;

    println!("Warping {}", request);
    let started = Instant::now();
    let result = warper.as_raster_warper().warp(&request);
    warper.shutdown();
    let raster = result.map_err(CliError::Warper)?;

    write_raster(&raster, &args.output)?;
    println!(
        "Wrote {}x{} ({} channels) to {} in {:.1?}",
        raster.size().width,
        raster.size().height,
        raster.channels(),
        args.output.display(),
        started.elapsed()
    );
    Ok(())
}

fn build_request(args: &WarpArgs) -> Result<RasterRequest, CliError> {
    let [llx, lly, urx, ury] = args.extents[..] else {
        return Err(CliError::Config(
            "--extents takes exactly four values: llx lly urx ury".to_string(),
        ));
    };
    if urx <= llx || ury <= lly {
        return Err(CliError::Config(format!(
            "Empty extents {} {} {} {}",
            llx, lly, urx, ury
        )));
    }
    if args.width == 0 || args.height == 0 {
        return Err(CliError::Config("Output size must not be zero".to_string()));
    }

    let mut request = RasterRequest::new(
        args.operation.into(),
        args.dataset.clone(),
        SrsDefinition::new(args.srs.clone()),
        Extents2::new(llx, lly, urx, ury),
        Size2::new(args.width, args.height),
    )
    .with_mask_opt(args.mask.clone());
    if let Some(resampling) = &args.resampling {
        let resampling: Resampling = resampling.parse().map_err(CliError::Config)?;
        request = request.with_resampling(resampling);
    }
    Ok(request)
}

/// Writes 8-bit rasters as images, floating point ones as raw little-endian
/// samples.
fn write_raster(raster: &Raster, output: &Path) -> Result<(), CliError> {
    if let Some(values) = raster.as_f64() {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        std::fs::write(output, bytes)?;
        return Ok(());
    }
    let image = raster.to_image().map_err(CliError::Warper)?;
    image
        .save(output)
        .map_err(|e| CliError::Io(std::io::Error::other(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tileproxy::warper::Operation;

    fn args(extents: Vec<f64>) -> WarpArgs {
        WarpArgs {
            dataset: PathBuf::from("ortho.png"),
            operation: OperationArg::Mask,
            mask: None,
            srs: "EPSG:3857".to_string(),
            extents,
            width: 64,
            height: 32,
            resampling: Some("nearest".to_string()),
            output: PathBuf::from("out.png"),
            in_process: true,
        }
    }

    #[test]
    fn test_build_request() {
        let request = build_request(&args(vec![0.0, 0.0, 100.0, 50.0])).unwrap();
        assert_eq!(request.operation, Operation::Mask);
        assert_eq!(request.extents, Extents2::new(0.0, 0.0, 100.0, 50.0));
        assert_eq!(request.size, Size2::new(64, 32));
        assert_eq!(request.resampling, Resampling::Nearest);
    }

    #[test]
    fn test_build_request_rejects_bad_extents() {
        assert!(build_request(&args(vec![0.0, 0.0, 100.0])).is_err());
        assert!(build_request(&args(vec![10.0, 0.0, 0.0, 50.0])).is_err());
    }
}
