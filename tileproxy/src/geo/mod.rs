//! Geometry, spatial reference systems and raster data.
//!
//! This module holds the raster primitives the warper operates on:
//!
//! - [`SrsDefinition`] / [`CsConvertor`] - SRS lookup and point conversion
//! - [`GeoDataset`] - an opened, georeferenced raster with a validity mask
//! - [`Raster`] - a plain pixel matrix that crosses the process boundary

mod dataset;
mod extents;
mod raster;
mod srs;

pub use dataset::{GeoDataset, GeoReference, Resampling};
pub use extents::{Extents2, Extents3, Size2};
pub use raster::{Depth, Raster, RasterData, RASTER_HEADER_SIZE};
pub use srs::{CsConvertor, SrsDefinition};
