//! Custom requests: resource-specific work executed inside a worker.
//!
//! A custom request is a serializable value with a stable `KIND`. The
//! requester sends the encoded parameters, the worker looks the kind up in
//! its [`CustomRegistry`], runs the handler against its dataset cache and
//! stores the encoded response in the arena. Handlers are registered
//! explicitly when the registry is built; there is no global registration.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::geo::{Extents2, GeoDataset, Resampling, Size2, SrsDefinition};

use super::arena::{Allocation, Arena};
use super::cache::DatasetCache;

/// A request processed by a worker-side handler.
pub trait CustomRequest: Serialize + DeserializeOwned {
    /// Stable name used to find the handler.
    const KIND: &'static str;

    type Response: Serialize + DeserializeOwned;

    fn process(&self, cache: &mut DatasetCache) -> Result<Self::Response>;
}

type Handler =
    Box<dyn Fn(&[u8], &mut DatasetCache, &mut Arena<'_>) -> Result<Allocation> + Send + Sync>;

/// Table of custom request handlers known to a worker.
pub struct CustomRegistry {
    handlers: HashMap<&'static str, Handler>,
}

impl CustomRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry with every request type shipped with tileproxy.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register::<DemSampleRequest>();
        registry.register::<crate::generator::SemanticTileRequest>();
        registry
    }

    /// Registers the handler for `R`.
    pub fn register<R: CustomRequest + 'static>(&mut self) {
        self.handlers.insert(R::KIND, Box::new(handle::<R>));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Runs the handler for `kind`, leaving the encoded response in the arena.
    pub fn process(
        &self,
        kind: &str,
        params: &[u8],
        cache: &mut DatasetCache,
        arena: &mut Arena<'_>,
    ) -> Result<Allocation> {
        let handler = self
            .handlers
            .get(kind)
            .ok_or_else(|| Error::internal(format!("Unknown custom request <{}>.", kind)))?;
        handler(params, cache, arena)
    }
}

fn handle<R: CustomRequest>(
    params: &[u8],
    cache: &mut DatasetCache,
    arena: &mut Arena<'_>,
) -> Result<Allocation> {
    let request: R = decode(params)?;
    let response = request.process(cache)?;
    Ok(arena.store_bytes(&encode(&response)?)?)
}

impl Default for CustomRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Encodes custom request parameters or responses.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value)
        .map_err(|e| Error::internal(format!("Cannot encode custom payload: {}", e)))
}

/// Decodes custom request parameters or responses.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes)
        .map_err(|e| Error::internal(format!("Cannot decode custom payload: {}", e)))
}

// =============================================================================
// DEM sampling
// =============================================================================

/// Samples a height dataset on a regular grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemSampleRequest {
    pub dataset: PathBuf,
    pub srs: SrsDefinition,
    pub extents: Extents2,
    pub size: Size2,
}

/// Heights sampled by a [`DemSampleRequest`], row-major from the top.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemGrid {
    pub size: Size2,
    pub heights: Vec<f64>,
    pub valid: Vec<bool>,
}

impl DemGrid {
    /// Height at a grid position, if valid.
    pub fn height(&self, col: u32, row: u32) -> Option<f64> {
        if col >= self.size.width || row >= self.size.height {
            return None;
        }
        let idx = (row * self.size.width + col) as usize;
        self.valid[idx].then(|| self.heights[idx])
    }

    /// Minimum and maximum over valid samples.
    pub fn min_max(&self) -> Option<(f64, f64)> {
        self.heights
            .iter()
            .zip(&self.valid)
            .filter(|(_, v)| **v)
            .map(|(h, _)| *h)
            .fold(None, |acc, h| match acc {
                None => Some((h, h)),
                Some((lo, hi)) => Some((lo.min(h), hi.max(h))),
            })
    }
}

impl CustomRequest for DemSampleRequest {
    const KIND: &'static str = "dem-sample";
    type Response = DemGrid;

    fn process(&self, cache: &mut DatasetCache) -> Result<DemGrid> {
        let src = cache.dataset(&self.dataset)?;
        let mut dst = src.derive_in_memory(self.srs.clone(), self.extents, self.size);
        src.warp_into(&mut dst, Resampling::Bilinear)?;
        if dst.mask_is_empty() {
            return Err(Error::not_found("No valid data."));
        }
        Ok(DemGrid::from_dataset(&dst))
    }
}

impl DemGrid {
    fn from_dataset(ds: &GeoDataset) -> Self {
        let ch = ds.channels() as usize;
        Self {
            size: ds.size(),
            heights: ds.data().iter().step_by(ch).copied().collect(),
            valid: ds.validity().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoReference;
    use image::{ImageBuffer, Luma};
    use tempfile::TempDir;

    fn dem(dir: &std::path::Path) -> PathBuf {
        let path = dir.join("dem.png");
        let img: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_fn(4, 4, |x, y| Luma([1000 + (x + y * 4) as u16]));
        img.save(&path).unwrap();
        let mut georef =
            GeoReference::new(SrsDefinition::epsg(3857), Extents2::new(0.0, 0.0, 4.0, 4.0));
        georef.offset = -1000.0;
        georef.save(&path).unwrap();
        path
    }

    #[test]
    fn test_unknown_kind_is_internal() {
        let registry = CustomRegistry::new();
        let mut mem = vec![0u8; 1024];
        let mut arena = Arena::format(&mut mem).unwrap();
        let err = registry
            .process("nope", &[], &mut DatasetCache::new(), &mut arena)
            .unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn test_dem_sample_through_registry() {
        let dir = TempDir::new().unwrap();
        let request = DemSampleRequest {
            dataset: dem(dir.path()),
            srs: SrsDefinition::epsg(3857),
            extents: Extents2::new(0.0, 0.0, 4.0, 4.0),
            size: Size2::new(4, 4),
        };

        let registry = CustomRegistry::builtin();
        assert!(registry.contains(DemSampleRequest::KIND));

        let mut mem = vec![0u8; 8192];
        let mut arena = Arena::format(&mut mem).unwrap();
        let alloc = registry
            .process(
                DemSampleRequest::KIND,
                &encode(&request).unwrap(),
                &mut DatasetCache::new(),
                &mut arena,
            )
            .unwrap();
        let grid: DemGrid = decode(arena.bytes(alloc).unwrap()).unwrap();

        assert_eq!(grid.height(0, 0), Some(0.0));
        assert_eq!(grid.height(3, 3), Some(15.0));
        assert_eq!(grid.min_max(), Some((0.0, 15.0)));
        assert_eq!(grid.height(4, 0), None);
    }

    #[test]
    fn test_min_max_ignores_invalid() {
        let grid = DemGrid {
            size: Size2::new(3, 1),
            heights: vec![5.0, -100.0, 7.0],
            valid: vec![true, false, true],
        };
        assert_eq!(grid.min_max(), Some((5.0, 7.0)));

        let empty = DemGrid {
            size: Size2::new(1, 1),
            heights: vec![1.0],
            valid: vec![false],
        };
        assert_eq!(empty.min_max(), None);
    }
}
