//! Warper running the operations inside the calling process.
//!
//! Offers the same [`RasterWarper`] interface as the process pool without
//! its isolation: a crash in the raster code takes the caller down. Used for
//! debugging (`--in-process` on the CLI) and for tests of code built on top
//! of the warper.

use parking_lot::Mutex;

use crate::error::Result;
use crate::geo::Raster;

use super::arena::Arena;
use super::cache::DatasetCache;
use super::custom::CustomRegistry;
use super::operations;
use super::request::RasterRequest;
use super::RasterWarper;

struct State {
    cache: DatasetCache,
    arena: Vec<u8>,
}

/// Single-threaded, in-process warper.
pub struct InProcessWarper {
    state: Mutex<State>,
    registry: CustomRegistry,
}

impl InProcessWarper {
    /// Creates a warper with an arena of `arena_size` bytes.
    pub fn new(arena_size: usize) -> Result<Self> {
        let mut arena = vec![0u8; arena_size];
        Arena::format(&mut arena)?;
        Ok(Self {
            state: Mutex::new(State {
                cache: DatasetCache::new(),
                arena,
            }),
            registry: CustomRegistry::builtin(),
        })
    }

    /// Number of datasets opened so far.
    pub fn open_datasets(&self) -> usize {
        self.state.lock().cache.len()
    }
}

impl RasterWarper for InProcessWarper {
    fn warp(&self, request: &RasterRequest) -> Result<Raster> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let mut arena = Arena::attach(&mut state.arena)?;

        let alloc = operations::warp(&mut state.cache, &mut arena, request)?;
        let raster = arena.load_raster(alloc);
        arena.release(alloc)?;
        raster
    }

    fn custom_raw(&self, kind: &str, params: &[u8]) -> Result<Vec<u8>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let mut arena = Arena::attach(&mut state.arena)?;

        let alloc = self
            .registry
            .process(kind, params, &mut state.cache, &mut arena)?;
        let bytes = arena.bytes(alloc).map(<[u8]>::to_vec);
        arena.release(alloc)?;
        Ok(bytes?)
    }
}
