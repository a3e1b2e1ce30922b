//! Reference frames: the global tiling schemes resources are generated in.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::geo::{Extents2, SrsDefinition};

use super::{Lod, TileId, TileRange};

/// Half of the web mercator world width in meters.
const WEBMERC_HALF_WORLD: f64 = 20_037_508.342_789_244;

/// A quadtree tiling over the extents of one SRS.
#[derive(Debug, Clone)]
pub struct ReferenceFrame {
    id: String,
    description: String,
    srs: SrsDefinition,
    extents: Extents2,
    max_lod: Lod,
    meta_binary_order: u8,
}

impl ReferenceFrame {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        srs: SrsDefinition,
        extents: Extents2,
        max_lod: Lod,
        meta_binary_order: u8,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            srs,
            extents,
            max_lod,
            meta_binary_order,
        }
    }

    /// Spherical web mercator, EPSG:3857.
    pub fn webmerc() -> Self {
        Self::new(
            "webmerc",
            "Web Mercator",
            SrsDefinition::epsg(3857),
            Extents2::new(
                -WEBMERC_HALF_WORLD,
                -WEBMERC_HALF_WORLD,
                WEBMERC_HALF_WORLD,
                WEBMERC_HALF_WORLD,
            ),
            22,
            5,
        )
    }

    /// Plate carrée over WGS84, EPSG:4326.
    pub fn geographic() -> Self {
        Self::new(
            "geographic",
            "Geographic WGS84",
            SrsDefinition::epsg(4326),
            Extents2::new(-180.0, -90.0, 180.0, 90.0),
            20,
            5,
        )
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn srs(&self) -> &SrsDefinition {
        &self.srs
    }

    pub fn extents(&self) -> &Extents2 {
        &self.extents
    }

    pub fn max_lod(&self) -> Lod {
        self.max_lod
    }

    /// Metatiles cover `2^meta_binary_order` tiles per side.
    pub fn meta_binary_order(&self) -> u8 {
        self.meta_binary_order
    }

    /// Number of tiles along one side at `lod`.
    pub fn tiles_per_side(lod: Lod) -> u32 {
        1u32 << lod
    }

    /// Extents of a tile; `y` grows downwards from the top edge.
    pub fn tile_extents(&self, tile: TileId) -> Extents2 {
        let n = Self::tiles_per_side(tile.lod) as f64;
        let tw = self.extents.width() / n;
        let th = self.extents.height() / n;
        let llx = self.extents.ll[0] + tile.x as f64 * tw;
        let ury = self.extents.ur[1] - tile.y as f64 * th;
        Extents2::new(llx, ury - th, llx + tw, ury)
    }

    /// Returns true if the tile lies inside the frame's quadtree.
    pub fn is_valid_tile(&self, tile: TileId) -> bool {
        let n = Self::tiles_per_side(tile.lod);
        tile.lod <= self.max_lod && tile.x < n && tile.y < n
    }

    /// Tiles at `lod` intersecting `extents`, `None` if outside the frame.
    pub fn tile_range_for(&self, lod: Lod, extents: &Extents2) -> Option<TileRange> {
        if !self.extents.overlaps(extents) {
            return None;
        }
        let n = Self::tiles_per_side(lod);
        let tw = self.extents.width() / n as f64;
        let th = self.extents.height() / n as f64;
        let clamp = |v: f64| (v.floor().max(0.0) as u32).min(n - 1);

        let llx = clamp((extents.ll[0] - self.extents.ll[0]) / tw);
        let urx = clamp((extents.ur[0] - self.extents.ll[0]) / tw);
        let lly = clamp((self.extents.ur[1] - extents.ur[1]) / th);
        let ury = clamp((self.extents.ur[1] - extents.ll[1]) / th);
        Some(TileRange::new(llx, lly, urx, ury))
    }

    /// Origin of the metatile containing `tile`.
    pub fn metatile_origin(&self, tile: TileId) -> TileId {
        let order = self.meta_binary_order;
        TileId::new(tile.lod, (tile.x >> order) << order, (tile.y >> order) << order)
    }
}

/// Reference frames known to this process, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct ReferenceFrames {
    frames: HashMap<String, ReferenceFrame>,
}

impl ReferenceFrames {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the frames shipped with tileproxy.
    pub fn builtin() -> Self {
        let mut frames = Self::new();
        frames.add(ReferenceFrame::webmerc());
        frames.add(ReferenceFrame::geographic());
        frames
    }

    pub fn add(&mut self, rf: ReferenceFrame) {
        self.frames.insert(rf.id.clone(), rf);
    }

    /// Looks a frame up by id.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` for unknown ids.
    pub fn get(&self, id: &str) -> Result<&ReferenceFrame> {
        self.frames
            .get(id)
            .ok_or_else(|| Error::not_found(format!("Unknown reference frame <{}>.", id)))
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.frames.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_extents_subdivide_frame() {
        let rf = ReferenceFrame::geographic();
        assert_eq!(rf.tile_extents(TileId::new(0, 0, 0)), *rf.extents());

        let nw = rf.tile_extents(TileId::new(1, 0, 0));
        assert_eq!(nw, Extents2::new(-180.0, 0.0, 0.0, 90.0));
        let se = rf.tile_extents(TileId::new(1, 1, 1));
        assert_eq!(se, Extents2::new(0.0, -90.0, 180.0, 0.0));
    }

    #[test]
    fn test_tile_range_for_extents() {
        let rf = ReferenceFrame::geographic();
        let range = rf
            .tile_range_for(2, &Extents2::new(-10.0, 10.0, 10.0, 20.0))
            .unwrap();
        assert_eq!(range, TileRange::new(1, 1, 2, 1));

        assert!(rf
            .tile_range_for(2, &Extents2::new(200.0, 0.0, 210.0, 10.0))
            .is_none());
    }

    #[test]
    fn test_metatile_origin() {
        let rf = ReferenceFrame::webmerc();
        let origin = rf.metatile_origin(TileId::new(8, 37, 70));
        assert_eq!(origin, TileId::new(8, 32, 64));
    }

    #[test]
    fn test_registry_lookup() {
        let rfs = ReferenceFrames::builtin();
        assert_eq!(rfs.ids(), vec!["geographic", "webmerc"]);
        assert_eq!(rfs.get("webmerc").unwrap().srs().epsg_code(), Some(3857));
        assert!(rfs.get("mars").unwrap_err().is_not_found());
    }
}
