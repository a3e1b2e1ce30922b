//! The three canned raster operations.
//!
//! Every operation derives an in-memory destination grid from the request,
//! warps the source into it and, when the request names a mask dataset,
//! warps the mask onto the same grid and intersects the validity masks. An
//! empty validity mask, before or after masking, is reported as
//! `NotFound("No valid data.")`: that is how "no tile here" travels up the
//! stack.
//!
//! Results are written straight into the worker's arena.

use std::path::Path;

use tracing::trace;

use crate::error::{Error, Result};
use crate::geo::{GeoDataset, Resampling};

use super::arena::{Allocation, Arena};
use super::cache::DatasetCache;
use super::request::{Operation, RasterRequest};

fn no_valid_data() -> Error {
    Error::not_found("No valid data.")
}

/// Warps the request's dataset onto the destination grid.
fn warp_dataset(cache: &mut DatasetCache, request: &RasterRequest) -> Result<GeoDataset> {
    let src = cache.dataset(&request.dataset)?;
    let mut dst = src.derive_in_memory(request.srs.clone(), request.extents, request.size);
    src.warp_into(&mut dst, request.resampling)?;
    Ok(dst)
}

/// Warps a mask dataset onto the destination grid.
fn warp_mask_dataset(
    cache: &mut DatasetCache,
    path: &Path,
    request: &RasterRequest,
    resampling: Resampling,
) -> Result<GeoDataset> {
    let src = cache.mask(path)?;
    let mut dst = GeoDataset::blank(request.srs.clone(), request.extents, request.size, 1);
    src.warp_into(&mut dst, resampling)?;
    Ok(dst)
}

/// Warps the dataset and applies the optional mask dataset.
fn warp_masked(cache: &mut DatasetCache, request: &RasterRequest) -> Result<GeoDataset> {
    let mut dst = warp_dataset(cache, request)?;
    if dst.mask_is_empty() {
        return Err(no_valid_data());
    }

    if let Some(mask_path) = &request.mask {
        let mask = warp_mask_dataset(cache, mask_path, request, request.resampling)?;
        dst.apply_mask(&mask)?;
        if dst.mask_is_empty() {
            return Err(no_valid_data());
        }
    }
    Ok(dst)
}

/// Data channels converted to 8 bits per channel.
pub fn warp_image(
    cache: &mut DatasetCache,
    arena: &mut Arena<'_>,
    request: &RasterRequest,
) -> Result<Allocation> {
    let dst = warp_masked(cache, request)?;
    arena.store_raster(&dst.to_u8_raster()?)
}

/// Validity mask re-encoded as a single channel raster.
pub fn warp_mask(
    cache: &mut DatasetCache,
    arena: &mut Arena<'_>,
    request: &RasterRequest,
) -> Result<Allocation> {
    let dst = warp_masked(cache, request)?;
    arena.store_raster(&dst.validity_raster()?)
}

/// Coverage of the mask dataset with average resampling.
///
/// Requires a mask dataset; deriving detail from image data is not supported.
pub fn warp_detail_mask(
    cache: &mut DatasetCache,
    arena: &mut Arena<'_>,
    request: &RasterRequest,
) -> Result<Allocation> {
    let Some(mask_path) = &request.mask else {
        return Err(Error::internal(
            "Unimplemented: detail mask without a mask dataset.",
        ));
    };

    let dst = warp_mask_dataset(cache, mask_path, request, Resampling::Average)?;
    if dst.mask_is_empty() {
        return Err(no_valid_data());
    }
    arena.store_raster(&dst.coverage_raster()?)
}

/// Dispatches a request to its operation.
pub fn warp(
    cache: &mut DatasetCache,
    arena: &mut Arena<'_>,
    request: &RasterRequest,
) -> Result<Allocation> {
    trace!(request = %request, "Warping");
    match request.operation {
        Operation::Image => warp_image(cache, arena, request),
        Operation::Mask => warp_mask(cache, arena, request),
        Operation::DetailMask => warp_detail_mask(cache, arena, request),
    }
}
