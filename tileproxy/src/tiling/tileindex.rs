//! Sparse tile occupancy index.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::{Lod, LodRange, TileId, TileRange};

/// Set of occupied tiles over a LOD range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileIndex {
    lod_range: LodRange,
    tiles: BTreeMap<Lod, BTreeSet<(u32, u32)>>,
}

impl TileIndex {
    pub fn new(lod_range: LodRange) -> Self {
        Self {
            lod_range,
            tiles: BTreeMap::new(),
        }
    }

    pub fn lod_range(&self) -> LodRange {
        self.lod_range
    }

    /// Marks a tile as occupied. Tiles outside the LOD range are ignored.
    pub fn set(&mut self, tile: TileId) {
        if self.lod_range.contains(tile.lod) {
            self.tiles.entry(tile.lod).or_default().insert((tile.x, tile.y));
        }
    }

    pub fn get(&self, tile: TileId) -> bool {
        self.tiles
            .get(&tile.lod)
            .is_some_and(|set| set.contains(&(tile.x, tile.y)))
    }

    /// Total number of occupied tiles.
    pub fn count(&self) -> usize {
        self.tiles.values().map(BTreeSet::len).sum()
    }

    pub fn count_at(&self, lod: Lod) -> usize {
        self.tiles.get(&lod).map_or(0, BTreeSet::len)
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Occupied tiles at `lod` in row-major order.
    pub fn tiles_at(&self, lod: Lod) -> impl Iterator<Item = TileId> + '_ {
        self.tiles
            .get(&lod)
            .into_iter()
            .flat_map(move |set| set.iter().map(move |&(x, y)| TileId::new(lod, x, y)))
    }

    /// Bounding range of occupied tiles at `lod`.
    pub fn range_at(&self, lod: Lod) -> Option<TileRange> {
        let mut tiles = self.tiles_at(lod);
        let first = tiles.next()?;
        let mut range = TileRange::tile(first.x, first.y);
        for t in tiles {
            range.update(t.x, t.y);
        }
        Some(range)
    }

    /// Marks every ancestor (within the LOD range) of every occupied tile.
    pub fn make_watertight(&mut self) {
        for lod in (self.lod_range.min + 1..=self.lod_range.max).rev() {
            let parents: Vec<TileId> = self.tiles_at(lod).filter_map(|t| t.parent()).collect();
            for parent in parents {
                self.set(parent);
            }
        }
    }

    /// Returns true if every occupied tile's parent within the range is occupied.
    pub fn is_watertight(&self) -> bool {
        (self.lod_range.min + 1..=self.lod_range.max).all(|lod| {
            self.tiles_at(lod)
                .filter_map(|t| t.parent())
                .all(|p| self.get(p))
        })
    }

    /// Loads an index written by [`TileIndex::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::not_found(format!("No tile index at {}.", path.display()))
            } else {
                Error::from(e)
            }
        })?;
        bincode::deserialize_from(BufReader::new(file)).map_err(|e| {
            Error::internal(format!(
                "Failed to deserialize tile index {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Saves the index, replacing any previous file atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let temp_path = path.with_extension("tmp");
        let writer = BufWriter::new(File::create(&temp_path)?);
        bincode::serialize_into(writer, self)
            .map_err(|e| Error::internal(format!("Failed to serialize tile index: {}", e)))?;

        std::fs::rename(&temp_path, path)?;
        Ok(())
    }
}
