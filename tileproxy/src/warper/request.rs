//! Raster requests handled by the warper.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::geo::{Extents2, Resampling, Size2, SrsDefinition};

/// Kind of raster produced by a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Data channels as 8-bit pixels.
    Image,
    /// Validity mask as a single 8-bit channel.
    Mask,
    /// Coverage of the mask dataset, averaged, as floating point.
    DetailMask,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Image => "image",
            Operation::Mask => "mask",
            Operation::DetailMask => "detailMask",
        })
    }
}

/// Request to warp a dataset into a destination grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterRequest {
    pub operation: Operation,
    pub dataset: PathBuf,
    pub mask: Option<PathBuf>,
    pub srs: SrsDefinition,
    pub extents: Extents2,
    pub size: Size2,
    pub resampling: Resampling,
}

impl RasterRequest {
    pub fn new(
        operation: Operation,
        dataset: impl Into<PathBuf>,
        srs: SrsDefinition,
        extents: Extents2,
        size: Size2,
    ) -> Self {
        Self {
            operation,
            dataset: dataset.into(),
            mask: None,
            srs,
            extents,
            size,
            resampling: Resampling::Bilinear,
        }
    }

    pub fn with_mask(mut self, mask: impl Into<PathBuf>) -> Self {
        self.mask = Some(mask.into());
        self
    }

    pub fn with_mask_opt(mut self, mask: Option<PathBuf>) -> Self {
        self.mask = mask;
        self
    }

    pub fn with_resampling(mut self, resampling: Resampling) -> Self {
        self.resampling = resampling;
        self
    }
}

impl fmt::Display for RasterRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} <{}> {}x{} @ {}",
            self.operation,
            self.dataset.display(),
            self.size.width,
            self.size.height,
            self.srs
        )
    }
}
