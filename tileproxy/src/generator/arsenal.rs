//! Shared executors handed to generator tasks.

use std::sync::Arc;

use crate::error::Result;
use crate::geo::Raster;
use crate::tiling::TilingConfig;
use crate::warper::{self, CustomRequest, RasterRequest, RasterWarper};

use super::sink::Sink;

/// Warper and tiling configuration shared by every generator.
#[derive(Clone)]
pub struct Arsenal {
    pub warper: Arc<dyn RasterWarper>,
    pub tiling: TilingConfig,
}

impl Arsenal {
    pub fn new(warper: Arc<dyn RasterWarper>, tiling: TilingConfig) -> Self {
        Self { warper, tiling }
    }

    /// Warps with abort checks before and after the call.
    ///
    /// A warp already running in a worker is never interrupted; an abort
    /// only drops its result.
    pub fn warp(&self, request: &RasterRequest, sink: &dyn Sink) -> Result<Raster> {
        sink.check_aborted()?;
        let raster = self.warper.warp(request)?;
        sink.check_aborted()?;
        Ok(raster)
    }

    /// Runs a custom request with the same abort checks as [`Arsenal::warp`].
    pub fn custom<R: CustomRequest>(&self, request: &R, sink: &dyn Sink) -> Result<R::Response> {
        sink.check_aborted()?;
        let response = warper::custom(self.warper.as_ref(), request)?;
        sink.check_aborted()?;
        Ok(response)
    }
}
