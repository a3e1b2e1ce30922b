//! Tile occupancy of a dataset in a reference frame.
//!
//! [`generate`] samples a dataset tile by tile and records which tiles of a
//! LOD range contain valid data:
//!
//! ```text
//!   dataset ──► per LOD: candidate tiles ──► sample tile_sampling² points
//!                                                   │
//!                                     TileIndex ◄───┘ (optional watertight pass)
//!                                         │
//!                                         └──► DeliveryIndex (mmap, tmp + rename)
//! ```
//!
//! The [`TileIndex`] is the mutable, serializable form used while
//! preparing; the [`DeliveryIndex`] is its compact read-only form answering
//! existence checks straight from a memory mapping at request time.

mod delivery;
mod reference_frame;
mod tileindex;

pub use delivery::DeliveryIndex;
pub use reference_frame::{ReferenceFrame, ReferenceFrames};
pub use tileindex::TileIndex;

use std::fmt;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::defaults::DEFAULT_TILE_SAMPLING;
use crate::error::{Error, Result};
use crate::geo::{CsConvertor, Extents2, GeoDataset};

/// Level of detail.
pub type Lod = u8;

// =============================================================================
// Tile addressing
// =============================================================================

/// Tile address within a reference frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileId {
    pub lod: Lod,
    pub x: u32,
    pub y: u32,
}

impl TileId {
    pub fn new(lod: Lod, x: u32, y: u32) -> Self {
        Self { lod, x, y }
    }

    /// Parent tile; `None` for the root.
    pub fn parent(&self) -> Option<TileId> {
        (self.lod > 0).then(|| TileId::new(self.lod - 1, self.x >> 1, self.y >> 1))
    }

    /// Ancestor at a coarser LOD.
    pub fn ancestor(&self, lod: Lod) -> Option<TileId> {
        let shift = self.lod.checked_sub(lod)?;
        Some(TileId::new(lod, self.x >> shift, self.y >> shift))
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.lod, self.x, self.y)
    }
}

/// Inclusive range of LODs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LodRange {
    pub min: Lod,
    pub max: Lod,
}

impl LodRange {
    pub fn new(min: Lod, max: Lod) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, lod: Lod) -> bool {
        (self.min..=self.max).contains(&lod)
    }

    pub fn is_empty(&self) -> bool {
        self.min > self.max
    }

    pub fn iter(&self) -> impl Iterator<Item = Lod> {
        self.min..=self.max
    }
}

impl fmt::Display for LodRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.min, self.max)
    }
}

/// Inclusive rectangle of tile coordinates at one LOD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileRange {
    pub ll: [u32; 2],
    pub ur: [u32; 2],
}

impl TileRange {
    pub fn new(llx: u32, lly: u32, urx: u32, ury: u32) -> Self {
        Self {
            ll: [llx, lly],
            ur: [urx, ury],
        }
    }

    /// Range covering a single tile.
    pub fn tile(x: u32, y: u32) -> Self {
        Self::new(x, y, x, y)
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        (self.ll[0]..=self.ur[0]).contains(&x) && (self.ll[1]..=self.ur[1]).contains(&y)
    }

    pub fn width(&self) -> u32 {
        self.ur[0] - self.ll[0] + 1
    }

    pub fn height(&self) -> u32 {
        self.ur[1] - self.ll[1] + 1
    }

    /// Grows the range to include a tile.
    pub fn update(&mut self, x: u32, y: u32) {
        self.ll = [self.ll[0].min(x), self.ll[1].min(y)];
        self.ur = [self.ur[0].max(x), self.ur[1].max(y)];
    }

    /// Same area expressed at another LOD.
    pub fn at_lod(&self, from: Lod, to: Lod) -> TileRange {
        if to >= from {
            let shift = to - from;
            TileRange::new(
                self.ll[0] << shift,
                self.ll[1] << shift,
                ((self.ur[0] + 1) << shift) - 1,
                ((self.ur[1] + 1) << shift) - 1,
            )
        } else {
            let shift = from - to;
            TileRange::new(
                self.ll[0] >> shift,
                self.ll[1] >> shift,
                self.ur[0] >> shift,
                self.ur[1] >> shift,
            )
        }
    }

    /// Overlap of two ranges, `None` if disjoint.
    pub fn intersect(&self, other: &TileRange) -> Option<TileRange> {
        let r = TileRange::new(
            self.ll[0].max(other.ll[0]),
            self.ll[1].max(other.ll[1]),
            self.ur[0].min(other.ur[0]),
            self.ur[1].min(other.ur[1]),
        );
        (r.ll[0] <= r.ur[0] && r.ll[1] <= r.ur[1]).then_some(r)
    }
}

impl fmt::Display for TileRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{}:{},{}",
            self.ll[0], self.ll[1], self.ur[0], self.ur[1]
        )
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Tiling parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TilingConfig {
    /// Samples per tile side.
    pub tile_sampling: u32,
    /// Sample the tiles of a LOD concurrently.
    pub parallel: bool,
    /// Mark every ancestor of an occupied tile as occupied.
    pub force_watertight: bool,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            tile_sampling: DEFAULT_TILE_SAMPLING,
            parallel: true,
            force_watertight: false,
        }
    }
}

impl TilingConfig {
    pub fn with_tile_sampling(mut self, tile_sampling: u32) -> Self {
        self.tile_sampling = tile_sampling.max(1);
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_force_watertight(mut self, force_watertight: bool) -> Self {
        self.force_watertight = force_watertight;
        self
    }
}

// =============================================================================
// Generation
// =============================================================================

/// Points sampled along each edge when estimating the dataset footprint.
const FOOTPRINT_SAMPLES: u32 = 32;

/// Builds the tile index of `dataset` in `rf`.
///
/// Every tile of every LOD is sampled independently at
/// `config.tile_sampling`² points. Tiles are restricted to `tile_ranges`
/// (given at `lod_range.min`) when non-empty and to the dataset footprint.
///
/// # Errors
///
/// Returns `Error::Internal` if the SRS of the frame or dataset cannot be
/// resolved, `Error::Parse` for an empty LOD range.
pub fn generate(
    dataset: &GeoDataset,
    rf: &ReferenceFrame,
    lod_range: LodRange,
    tile_ranges: &[TileRange],
    config: &TilingConfig,
) -> Result<TileIndex> {
    if lod_range.is_empty() {
        return Err(Error::parse("lodRange", format!("empty range {}", lod_range)));
    }
    if lod_range.max > rf.max_lod() {
        return Err(Error::parse(
            "lodRange",
            format!("{} exceeds max LOD {} of <{}>", lod_range, rf.max_lod(), rf.id()),
        ));
    }

    let footprint = footprint(dataset, rf)?;
    let mut index = TileIndex::new(lod_range);
    let Some(footprint) = footprint else {
        info!(rf = rf.id(), "Dataset does not project into the reference frame");
        return Ok(index);
    };

    for lod in lod_range.iter() {
        for candidates in candidate_ranges(rf, lod, lod_range.min, tile_ranges, &footprint) {
            let tiles: Vec<(u32, u32)> = (candidates.ll[1]..=candidates.ur[1])
                .flat_map(|y| (candidates.ll[0]..=candidates.ur[0]).map(move |x| (x, y)))
                .collect();

            let occupied: Vec<(u32, u32)> = if config.parallel {
                tiles
                    .into_par_iter()
                    .map_init(
                        || CsConvertor::new(rf.srs(), dataset.srs()),
                        |conv, (x, y)| match conv {
                            Ok(conv) => Ok(sample_tile(dataset, rf, conv, TileId::new(lod, x, y), config)
                                .then_some((x, y))),
                            Err(e) => Err(Error::internal(e.to_string())),
                        },
                    )
                    .filter_map(|r| r.transpose())
                    .collect::<Result<_>>()?
            } else {
                let conv = CsConvertor::new(rf.srs(), dataset.srs())?;
                tiles
                    .into_iter()
                    .filter(|(x, y)| {
                        sample_tile(dataset, rf, &conv, TileId::new(lod, *x, *y), config)
                    })
                    .collect()
            };

            for (x, y) in occupied {
                index.set(TileId::new(lod, x, y));
            }
        }
        debug!(lod, tiles = index.count_at(lod), "Sampled LOD");
    }

    if config.force_watertight {
        index.make_watertight();
    }
    info!(
        rf = rf.id(),
        lods = %lod_range,
        tiles = index.count(),
        watertight = config.force_watertight,
        "Tile index generated"
    );
    Ok(index)
}

/// Derives LOD and tile ranges from a dataset's footprint and resolution.
///
/// The bottom LOD is the first whose pixels (at `tile_size` pixels per tile)
/// are no coarser than the dataset's; the top LOD is the deepest one at which
/// the footprint still fits a single tile. The tile range is given at the
/// top LOD. Returns `None` if the dataset lies outside the frame.
pub fn lod_range_for(
    dataset: &GeoDataset,
    rf: &ReferenceFrame,
    tile_size: u32,
) -> Result<Option<(LodRange, TileRange)>> {
    let Some(footprint) = footprint(dataset, rf)? else {
        return Ok(None);
    };
    let frame_width = rf.extents().width();
    let size = dataset.size();
    let pixel = (footprint.width() / size.width.max(1) as f64)
        .min(footprint.height() / size.height.max(1) as f64);

    let to_lod = |v: f64| -> Lod {
        if v.is_finite() && v > 0.0 {
            v.min(rf.max_lod() as f64) as Lod
        } else {
            0
        }
    };
    let max = to_lod((frame_width / (tile_size.max(1) as f64 * pixel)).log2().ceil());
    let min = to_lod((frame_width / footprint.width().max(footprint.height())).log2().floor())
        .min(max);

    let lod_range = LodRange::new(min, max);
    let Some(tile_range) = rf.tile_range_for(min, &footprint) else {
        return Ok(None);
    };
    debug!(rf = rf.id(), lods = %lod_range, tiles = %tile_range, "Derived ranges");
    Ok(Some((lod_range, tile_range)))
}

/// Candidate tile rectangles at `lod`.
fn candidate_ranges(
    rf: &ReferenceFrame,
    lod: Lod,
    base_lod: Lod,
    tile_ranges: &[TileRange],
    footprint: &Extents2,
) -> Vec<TileRange> {
    let Some(covered) = rf.tile_range_for(lod, footprint) else {
        return Vec::new();
    };
    if tile_ranges.is_empty() {
        return vec![covered];
    }
    tile_ranges
        .iter()
        .filter_map(|r| r.at_lod(base_lod, lod).intersect(&covered))
        .collect()
}

/// Dataset extents expressed in the frame's SRS.
fn footprint(dataset: &GeoDataset, rf: &ReferenceFrame) -> Result<Option<Extents2>> {
    let conv = CsConvertor::new(dataset.srs(), rf.srs())?;
    let e = dataset.extents();
    let mut out: Option<Extents2> = None;

    let n = FOOTPRINT_SAMPLES;
    for i in 0..=n {
        let t = i as f64 / n as f64;
        let x = e.ll[0] + t * e.width();
        let y = e.ll[1] + t * e.height();
        for (px, py) in [(x, e.ll[1]), (x, e.ur[1]), (e.ll[0], y), (e.ur[0], y)] {
            let Some((fx, fy)) = conv.convert(px, py) else {
                continue;
            };
            if !fx.is_finite() || !fy.is_finite() {
                continue;
            }
            match &mut out {
                Some(ext) => {
                    ext.ll = [ext.ll[0].min(fx), ext.ll[1].min(fy)];
                    ext.ur = [ext.ur[0].max(fx), ext.ur[1].max(fy)];
                }
                None => out = Some(Extents2::new(fx, fy, fx, fy)),
            }
        }
    }
    Ok(out.filter(|ext| ext.overlaps(rf.extents())))
}

/// Returns true if any sample point of `tile` hits valid data.
fn sample_tile(
    dataset: &GeoDataset,
    rf: &ReferenceFrame,
    conv: &CsConvertor,
    tile: TileId,
    config: &TilingConfig,
) -> bool {
    let ext = rf.tile_extents(tile);
    let n = config.tile_sampling.max(1);
    let (sx, sy) = (ext.width() / n as f64, ext.height() / n as f64);

    (0..n).any(|j| {
        (0..n).any(|i| {
            let x = ext.ll[0] + (i as f64 + 0.5) * sx;
            let y = ext.ur[1] - (j as f64 + 0.5) * sy;
            conv.convert(x, y)
                .is_some_and(|(dx, dy)| dataset.value_at(dx, dy).is_some())
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{Size2, SrsDefinition};

    /// 256x256 dataset covering the whole web mercator frame with a single
    /// valid pixel.
    fn sparse_dataset() -> GeoDataset {
        let rfs = ReferenceFrames::builtin();
        let rf = rfs.get("webmerc").unwrap();
        let size = Size2::new(256, 256);
        let mut valid = vec![false; size.area()];
        valid[37 * 256 + 101] = true;
        GeoDataset::from_parts(
            SrsDefinition::epsg(3857),
            *rf.extents(),
            size,
            1,
            vec![1.0; size.area()],
            valid,
        )
        .unwrap()
    }

    fn config(watertight: bool) -> TilingConfig {
        TilingConfig::default()
            .with_tile_sampling(4)
            .with_force_watertight(watertight)
    }

    #[test]
    fn test_tile_id_ancestry() {
        let tile = TileId::new(3, 5, 6);
        assert_eq!(tile.parent(), Some(TileId::new(2, 2, 3)));
        assert_eq!(tile.ancestor(0), Some(TileId::new(0, 0, 0)));
        assert_eq!(tile.ancestor(4), None);
        assert_eq!(TileId::new(0, 0, 0).parent(), None);
        assert_eq!(tile.to_string(), "3-5-6");
    }

    #[test]
    fn test_tile_range_at_lod() {
        let r = TileRange::new(1, 2, 1, 2);
        assert_eq!(r.at_lod(3, 5), TileRange::new(4, 8, 7, 11));
        assert_eq!(TileRange::new(4, 8, 7, 11).at_lod(5, 3), r);
        assert!(r.intersect(&TileRange::new(3, 3, 4, 4)).is_none());
    }

    #[test]
    fn test_sparse_fixture_has_holes_without_watertight() {
        let rfs = ReferenceFrames::builtin();
        let rf = rfs.get("webmerc").unwrap();
        let index = generate(&sparse_dataset(), rf, LodRange::new(0, 6), &[], &config(false))
            .unwrap();

        let leaf = TileId::new(6, 101 / 4, 37 / 4);
        assert!(index.get(leaf));
        assert!(!index.get(TileId::new(0, 0, 0)));
        assert!(!index.is_watertight());
    }

    #[test]
    fn test_watertight_marks_all_ancestors() {
        let rfs = ReferenceFrames::builtin();
        let rf = rfs.get("webmerc").unwrap();
        for parallel in [true, false] {
            let cfg = config(true).with_parallel(parallel);
            let index = generate(&sparse_dataset(), rf, LodRange::new(0, 6), &[], &cfg).unwrap();

            assert!(index.is_watertight());
            let leaf = TileId::new(6, 101 / 4, 37 / 4);
            for lod in 0..=6 {
                assert!(index.get(leaf.ancestor(lod).unwrap()), "lod {lod}");
            }
            assert_eq!(index.count_at(0), 1);
        }
    }

    #[test]
    fn test_tile_ranges_restrict_candidates() {
        let rfs = ReferenceFrames::builtin();
        let rf = rfs.get("webmerc").unwrap();
        // quadrant 1-1-0 does not contain the valid pixel (it is in 1-0-0)
        let index = generate(
            &sparse_dataset(),
            rf,
            LodRange::new(1, 6),
            &[TileRange::tile(1, 0)],
            &config(false),
        )
        .unwrap();
        assert_eq!(index.count(), 0);
    }

    #[test]
    fn test_full_dataset_occupies_everything() {
        let rfs = ReferenceFrames::builtin();
        let rf = rfs.get("webmerc").unwrap();
        let size = Size2::new(16, 16);
        let ds = GeoDataset::from_parts(
            SrsDefinition::epsg(3857),
            *rf.extents(),
            size,
            1,
            vec![0.0; size.area()],
            vec![true; size.area()],
        )
        .unwrap();

        let index = generate(&ds, rf, LodRange::new(0, 2), &[], &config(false)).unwrap();
        assert_eq!(index.count(), 1 + 4 + 16);
        assert!(index.is_watertight());
    }

    #[test]
    fn test_lod_range_for_full_frame_dataset() {
        let rfs = ReferenceFrames::builtin();
        let rf = rfs.get("webmerc").unwrap();
        let (lods, tiles) = lod_range_for(&sparse_dataset(), rf, 256).unwrap().unwrap();
        assert_eq!(lods, LodRange::new(0, 0));
        assert_eq!(tiles, TileRange::tile(0, 0));
    }

    #[test]
    fn test_lod_range_for_quarter_dataset() {
        let rfs = ReferenceFrames::builtin();
        let rf = rfs.get("webmerc").unwrap();
        let e = rf.extents();
        // south-west quadrant, twice the resolution of LOD 0
        let extents = Extents2::new(e.ll[0], e.ll[1], 0.0, 0.0);
        let size = Size2::new(256, 256);
        let dataset = GeoDataset::from_parts(
            SrsDefinition::epsg(3857),
            extents,
            size,
            1,
            vec![1.0; size.area()],
            vec![true; size.area()],
        )
        .unwrap();

        let (lods, tiles) = lod_range_for(&dataset, rf, 256).unwrap().unwrap();
        assert_eq!(lods, LodRange::new(1, 1));
        assert!(tiles.contains(0, 1));
        assert!(!tiles.contains(0, 0));
    }

    #[test]
    fn test_lod_range_beyond_frame_is_rejected() {
        let rfs = ReferenceFrames::builtin();
        let rf = rfs.get("webmerc").unwrap();
        let err = generate(
            &sparse_dataset(),
            rf,
            LodRange::new(0, rf.max_lod() + 1),
            &[],
            &config(false),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }
}
