//! Out-of-process raster warping.
//!
//! The raster code is not trusted to stay up, so it runs in separate worker
//! processes. The serving process talks to them through [`GdalWarper`]:
//!
//! ```text
//! ┌───────────────────────────┐        ┌──────────────────────────────┐
//! │ serving process           │ frames │ tileproxy-warper (xN)        │
//! │  GdalWarper ── idle queue ├───────►│  DatasetCache                │
//! │      ▲                    │◄───────┤  operations / custom handlers│
//! │      └── reads + releases │        │        │ writes result       │
//! └──────────────┬────────────┘        └────────┼─────────────────────┘
//!                └──────── arena file (mmap) ◄──┘
//! ```
//!
//! Both the pool and [`InProcessWarper`] implement [`RasterWarper`], the
//! interface generators are written against.

mod arena;
mod cache;
mod config;
mod custom;
mod in_process;
pub mod operations;
mod pool;
mod protocol;
mod request;
pub mod worker;

pub use arena::{Allocation, Arena, ArenaError};
pub use cache::DatasetCache;
pub use config::{WarperConfig, WORKER_BINARY_NAME};
pub use custom::{CustomRegistry, CustomRequest, DemGrid, DemSampleRequest};
pub use in_process::InProcessWarper;
pub use pool::{GdalWarper, WarperStats};
pub use protocol::{read_frame, write_frame, WorkerRequest, WorkerResponse};
pub use request::{Operation, RasterRequest};

use crate::error::Result;
use crate::geo::Raster;

/// Interface of a raster warper.
pub trait RasterWarper: Send + Sync {
    /// Runs one of the canned raster operations.
    fn warp(&self, request: &RasterRequest) -> Result<Raster>;

    /// Runs a custom request by kind with encoded parameters.
    fn custom_raw(&self, kind: &str, params: &[u8]) -> Result<Vec<u8>>;
}

/// Runs a typed custom request on any warper.
pub fn custom<R: CustomRequest>(
    warper: &(impl RasterWarper + ?Sized),
    request: &R,
) -> Result<R::Response> {
    let bytes = warper.custom_raw(R::KIND, &custom::encode(request)?)?;
    custom::decode(&bytes)
}
