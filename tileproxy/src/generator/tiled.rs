//! Artifacts shared by the tile-index backed generators.
//!
//! ```text
//! <root>/tileset.index    bincode TileIndex, kept for tooling
//! <root>/delivery.index   mmapped DeliveryIndex, answers existence checks
//! <root>/metadata.json    TiledMetadata, written last
//! ```

use std::fs;
use std::path::Path;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::geo::GeoDataset;
use crate::resource::Resource;
use crate::tiling::{self, DeliveryIndex, LodRange, ReferenceFrame, TileId, TileIndex, TileRange};

use super::metadata::{self, TiledMetadata, METADATA_FILE};

pub const TILESET_INDEX: &str = "tileset.index";
pub const DELIVERY_INDEX: &str = "delivery.index";

/// Tile size used when deriving LODs from dataset resolution.
pub const TILE_SIZE: u32 = 256;

/// Prepared state of a tiled generator.
pub struct Prepared {
    pub index: DeliveryIndex,
    pub metadata: TiledMetadata,
}

impl Prepared {
    /// Returns true if `tile` has data.
    pub fn has_tile(&self, tile: TileId) -> bool {
        self.metadata.lod_range.contains(tile.lod) && self.index.get(tile)
    }
}

/// Holder for the prepared state, filled by `load` or `prepare`.
#[derive(Default)]
pub struct PreparedSlot {
    slot: RwLock<Option<Prepared>>,
}

impl PreparedSlot {
    pub fn set(&self, prepared: Prepared) {
        *self.slot.write() = Some(prepared);
    }

    /// Runs `f` with the prepared state.
    ///
    /// # Errors
    ///
    /// `Internal` if nothing has been prepared yet.
    pub fn with<T>(&self, f: impl FnOnce(&Prepared) -> Result<T>) -> Result<T> {
        match &*self.slot.read() {
            Some(prepared) => f(prepared),
            None => Err(Error::internal("Generator has no prepared tile index.")),
        }
    }
}

/// Restores prepared state if the metadata matches the delivery index.
pub fn load(root: &Path) -> Result<Option<Prepared>> {
    let metadata: TiledMetadata = metadata::load(&root.join(METADATA_FILE))?;
    let path = root.join(DELIVERY_INDEX);
    if !metadata::artifact_matches(&path, metadata.file_size) {
        return Ok(None);
    }
    let index = DeliveryIndex::open(&path)?;
    Ok(Some(Prepared { index, metadata }))
}

/// Ranges of a resource: configured ones win, otherwise derived from data.
pub fn ranges(
    resource: &Resource,
    dataset: &GeoDataset,
    rf: &ReferenceFrame,
) -> Result<(LodRange, TileRange)> {
    if let (Some(lods), Some(tiles)) = (resource.lod_range, resource.tile_range) {
        return Ok((lods, tiles));
    }
    let (lods, tiles) = tiling::lod_range_for(dataset, rf, TILE_SIZE)?.ok_or_else(|| {
        Error::internal(format!(
            "Dataset of <{}> lies outside reference frame <{}>.",
            resource.id,
            rf.id()
        ))
    })?;
    debug!(resource = %resource.id, lods = %lods, tiles = %tiles, "Using derived ranges");
    Ok((
        resource.lod_range.unwrap_or(lods),
        resource.tile_range.unwrap_or(tiles),
    ))
}

/// Writes every artifact of a tile index, metadata last.
pub fn save(root: &Path, index: &TileIndex, tile_range: TileRange) -> Result<Prepared> {
    fs::create_dir_all(root)?;
    index.save(&root.join(TILESET_INDEX))?;

    let path = root.join(DELIVERY_INDEX);
    DeliveryIndex::write(index, &path)?;
    let metadata = TiledMetadata {
        file_size: fs::metadata(&path)?.len(),
        lod_range: index.lod_range(),
        tile_range,
    };
    metadata::save(&root.join(METADATA_FILE), &metadata)?;
    info!(
        root = %root.display(),
        tiles = index.count(),
        size = metadata.file_size,
        "Tile index saved"
    );

    Ok(Prepared {
        index: DeliveryIndex::open(&path)?,
        metadata,
    })
}
