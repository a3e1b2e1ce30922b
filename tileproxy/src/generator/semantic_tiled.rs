//! `geodata-semantic-tiled`: free layer tiled from a semantic world.
//!
//! Prepare builds the tile index over the DEM. A precomputed index stored
//! next to the DEM as `<dem>.tiling.<reference frame>` is used as is.
//! Tiles are produced on demand inside a warper worker:
//!
//! ```text
//!   {lod}-{x}-{y}.geo ──► index check ──► SemanticTileRequest ──► geodata
//!   {lod}-{x}-{y}.meta ─► metatile flags ──► DemSampleRequest per tile
//!                                               └──► height ranges (JSON)
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::geo::{GeoDataset, Size2};
use crate::resource::definition::GeodataSemanticTiled;
use crate::resource::Definition;
use crate::tiling::{self, LodRange, ReferenceFrame, TileId, TileIndex, TileRange, TilingConfig};
use crate::warper::DemSampleRequest;

use super::arsenal::Arsenal;
use super::file_info::{FileInfo, FileKind};
use super::geodata_mesh::GEODATA_CONTENT_TYPE;
use super::map_config::{self, MapConfig};
use super::semantic::{SemanticTileRequest, SemanticWorld};
use super::sink::{FileClass, Sink, SinkFileInfo};
use super::support::{with_revision, StyleSource};
use super::tiled::{self, PreparedSlot};
use super::{GeneratorDriver, GeneratorParams, Task};

/// DEM samples per tile side when computing height ranges.
const HEIGHT_SAMPLES: u32 = 8;

pub fn create(params: &GeneratorParams) -> Result<Box<dyn GeneratorDriver>> {
    let Definition::GeodataSemanticTiled(definition) = &params.resource.definition else {
        return Err(Error::internal(
            "geodata-semantic-tiled driver given a foreign definition",
        ));
    };
    Ok(Box::new(SemanticTiledDriver {
        inner: Arc::new(Inner {
            world: params.absolute_dataset(&definition.dataset),
            dem: params.absolute_dataset(&definition.dem),
            style: StyleSource::resolve(&definition.presentation.style_url, &params.data_root),
            definition: definition.clone(),
            params: params.clone(),
            prepared: PreparedSlot::default(),
        }),
    }))
}

/// Path of a precomputed tile index for `dem` in `rf`.
pub fn precomputed_tiling(dem: &Path, rf: &ReferenceFrame) -> PathBuf {
    let mut name = dem.as_os_str().to_os_string();
    name.push(format!(".tiling.{}", rf.id()));
    PathBuf::from(name)
}

struct SemanticTiledDriver {
    inner: Arc<Inner>,
}

struct Inner {
    params: GeneratorParams,
    definition: GeodataSemanticTiled,
    world: PathBuf,
    dem: PathBuf,
    style: StyleSource,
    prepared: PreparedSlot,
}

/// `freelayer.json` of a tiled layer.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TiledFreeLayer {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    meta_url: String,
    geodata_url: String,
    style: String,
    display_size: u32,
    lod_range: LodRange,
    tile_range: TileRange,
    #[serde(skip_serializing_if = "String::is_empty")]
    label: String,
}

/// Geodata metatile: occupied tiles of a block with their height ranges.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeodataMetatile {
    /// lod, x, y
    origin: [u32; 3],
    order: u8,
    tiles: Vec<MetatileEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MetatileEntry {
    x: u32,
    y: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    height_range: Option<[f64; 2]>,
}

/// Height ranges are published in centimetres; resampling noise below that
/// is dropped.
fn centimetres(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl Inner {
    fn check_tile(&self, tile: TileId) -> Result<()> {
        if self.prepared.with(|p| Ok(p.has_tile(tile)))? {
            Ok(())
        } else {
            Err(Error::not_found(format!("No data in tile {}.", tile)))
        }
    }

    fn tile_index(
        &self,
        dem: &GeoDataset,
        config: &TilingConfig,
    ) -> Result<(TileIndex, TileRange)> {
        let resource = &self.params.resource;
        let rf = &self.params.reference_frame;

        let precomputed = precomputed_tiling(&self.dem, rf);
        if precomputed.exists() {
            info!(path = %precomputed.display(), "Using precomputed tiling");
            let index = TileIndex::load(&precomputed)?;
            let tile_range = match resource.tile_range {
                Some(range) => range,
                None => index.range_at(index.lod_range().min).ok_or_else(|| {
                    Error::internal(format!("Tiling {} is empty.", precomputed.display()))
                })?,
            };
            return Ok((index, tile_range));
        }

        let (lod_range, tile_range) = tiled::ranges(resource, dem, rf)?;
        debug!(resource = %resource.id, lods = %lod_range, "Generating tile index");
        Ok((
            tiling::generate(dem, rf, lod_range, &[tile_range], config)?,
            tile_range,
        ))
    }

    fn generate_geodata(
        &self,
        tile: TileId,
        sink: &mut dyn Sink,
        arsenal: &Arsenal,
    ) -> Result<()> {
        self.check_tile(tile)?;
        let rf = &self.params.reference_frame;
        let request = SemanticTileRequest {
            world: self.world.clone(),
            dem: self.dem.clone(),
            srs: rf.srs().clone(),
            extents: rf.tile_extents(tile),
            resolution: self.definition.resolution,
        };
        let response = arsenal.custom(&request, sink)?;
        debug!(tile = %tile, features = response.features, "Geodata tile generated");
        sink.content(
            response.geodata.as_bytes(),
            &SinkFileInfo::new(GEODATA_CONTENT_TYPE, FileClass::Data),
        )
    }

    fn height_range(
        &self,
        tile: TileId,
        sink: &dyn Sink,
        arsenal: &Arsenal,
    ) -> Result<Option<[f64; 2]>> {
        let rf = &self.params.reference_frame;
        let request = DemSampleRequest {
            dataset: self.dem.clone(),
            srs: rf.srs().clone(),
            extents: rf.tile_extents(tile),
            size: Size2::new(HEIGHT_SAMPLES, HEIGHT_SAMPLES),
        };
        match arsenal.custom(&request, sink) {
            Ok(grid) => Ok(grid
                .min_max()
                .map(|(lo, hi)| [centimetres(lo), centimetres(hi)])),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn generate_metatile(
        &self,
        tile: TileId,
        sink: &mut dyn Sink,
        arsenal: &Arsenal,
    ) -> Result<()> {
        let order = self.params.reference_frame.meta_binary_order();
        let flags = self.prepared.with(|p| p.index.metatile(tile, order))?;
        let side = 1u32 << order;

        let mut tiles = Vec::new();
        for (i, flag) in flags.iter().enumerate() {
            if *flag == 0 {
                continue;
            }
            let x = tile.x + i as u32 % side;
            let y = tile.y + i as u32 / side;
            let height_range = self.height_range(TileId::new(tile.lod, x, y), sink, arsenal)?;
            tiles.push(MetatileEntry { x, y, height_range });
        }

        let metatile = GeodataMetatile {
            origin: [u32::from(tile.lod), tile.x, tile.y],
            order,
            tiles,
        };
        sink.content(
            &map_config::to_json(&metatile)?,
            &SinkFileInfo::new(GEODATA_CONTENT_TYPE, FileClass::Data),
        )
    }

    fn free_layer(&self) -> Result<TiledFreeLayer> {
        let resource = &self.params.resource;
        let revision = resource.revision;
        self.prepared.with(|p| {
            Ok(TiledFreeLayer {
                id: resource.id.full_id(),
                kind: "geodataTiles",
                meta_url: with_revision("{lod}-{x}-{y}.meta?gr=1", revision, '&'),
                geodata_url: with_revision("{lod}-{x}-{y}.geo", revision, '?'),
                style: self.style.url().to_string(),
                display_size: self.definition.presentation.display_size,
                lod_range: p.metadata.lod_range,
                tile_range: p.metadata.tile_range,
                label: resource.comment.clone(),
            })
        })
    }
}

impl GeneratorDriver for SemanticTiledDriver {
    fn load_prepared(&self) -> Result<bool> {
        match tiled::load(&self.inner.params.root)? {
            Some(prepared) => {
                self.inner.prepared.set(prepared);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn prepare(&self, arsenal: &Arsenal) -> Result<()> {
        let inner = &self.inner;
        let world = SemanticWorld::load(&inner.world)?;
        let dem = GeoDataset::open(&inner.dem)?;
        debug!(
            resource = %inner.params.resource.id,
            entities = world.entities.len(),
            "Semantic world loaded"
        );

        let (index, tile_range) = inner.tile_index(&dem, &arsenal.tiling)?;
        let prepared = tiled::save(&inner.params.root, &index, tile_range)?;
        inner.prepared.set(prepared);
        Ok(())
    }

    fn generate_file(&self, file: &FileInfo, sink: &mut dyn Sink) -> Result<Option<Task>> {
        let inner = &self.inner;
        match &file.kind {
            FileKind::Geodata(Some(tile)) => {
                let (inner, tile) = (Arc::clone(inner), *tile);
                Ok(Some(Box::new(move |sink: &mut dyn Sink, arsenal: &Arsenal| {
                    inner.generate_geodata(tile, sink, arsenal)
                })))
            }
            FileKind::Metatile(tile) => {
                let (inner, tile) = (Arc::clone(inner), *tile);
                Ok(Some(Box::new(move |sink: &mut dyn Sink, arsenal: &Arsenal| {
                    inner.generate_metatile(tile, sink, arsenal)
                })))
            }
            FileKind::Config => {
                MapConfig::new(&inner.params.reference_frame)
                    .with_free_layer(inner.params.resource.id.full_id(), "freelayer.json")
                    .serve(sink)?;
                Ok(None)
            }
            FileKind::Definition => {
                map_config::serve_json(&inner.free_layer()?, sink)?;
                Ok(None)
            }
            FileKind::Style => {
                inner.style.serve(sink)?;
                Ok(None)
            }
            _ => Err(Error::not_found(format!("{} not found.", file.name))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::semantic::tests::{flat_dem, world};
    use crate::generator::sink::MemorySink;
    use crate::generator::testing::arsenal;
    use crate::generator::{Generator, GeneratorState};
    use crate::resource::Resource;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    // At LOD 16 the DEM over [0, 0, 1000, 1000] spans four tiles:
    // x 32768..=32769, y 32766..=32767.
    const TILE_A: &str = "16-32768-32767.geo";
    const TILE_B: &str = "16-32769-32766.geo";
    const METATILE: &str = "16-32768-32736.meta?gr=1&4";

    fn params(dir: &Path) -> GeneratorParams {
        world(dir);
        flat_dem(dir);
        let resource = Resource::parse(&json!({
            "referenceFrame": "webmerc",
            "group": "city",
            "id": "semantic",
            "type": "geodata",
            "driver": "geodata-semantic-tiled",
            "revision": 4,
            "lodRange": [16, 16],
            "tileRange": [32768, 32766, 32769, 32767],
            "comment": "Buildings and trees",
            "definition": {
                "dataset": "world.json",
                "dem": "dem.png",
                "resolution": 1024
            }
        }))
        .unwrap();
        GeneratorParams {
            root: resource.id.root(&dir.join("store")),
            resource,
            reference_frame: ReferenceFrame::webmerc(),
            data_root: dir.to_path_buf(),
            change_enforced: false,
            registry_root: None,
        }
    }

    fn prepared(dir: &Path) -> Generator {
        let p = params(dir);
        let generator = Generator::new(p.clone(), create(&p).unwrap());
        generator.ensure_ready(&arsenal()).unwrap();
        generator
    }

    fn serve(generator: &Generator, name: &str) -> MemorySink {
        let mut sink = MemorySink::new();
        generator.serve(name, &mut sink, &arsenal());
        sink
    }

    fn serve_json(generator: &Generator, name: &str) -> Value {
        serde_json::from_slice(serve(generator, name).data().unwrap()).unwrap()
    }

    #[test]
    fn test_geodata_tiles() {
        let dir = TempDir::new().unwrap();
        let generator = prepared(dir.path());

        let doc = serve_json(&generator, TILE_A);
        let classes: Vec<_> = doc["groups"]
            .as_array()
            .unwrap()
            .iter()
            .map(|g| g["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(classes, vec!["building", "tree"]);

        let doc = serve_json(&generator, TILE_B);
        assert_eq!(doc["groups"][0]["lines"][0]["id"], 3);

        // indexed but without entities
        let sink = serve(&generator, "16-32769-32767.geo");
        assert!(sink.error_value().unwrap().is_not_found());
        // outside the index
        let sink = serve(&generator, "16-0-0.geo");
        assert!(sink.error_value().unwrap().is_not_found());
    }

    #[test]
    fn test_metatile_lists_tiles_with_heights() {
        let dir = TempDir::new().unwrap();
        let generator = prepared(dir.path());

        let doc = serve_json(&generator, METATILE);
        assert_eq!(doc["origin"], json!([16, 32768, 32736]));
        let tiles = doc["tiles"].as_array().unwrap();
        assert_eq!(tiles.len(), 4);
        let first = tiles
            .iter()
            .find(|t| t["x"] == 32768 && t["y"] == 32767)
            .unwrap();
        assert_eq!(first["heightRange"], json!([100.0, 100.0]));

        let sink = serve(&generator, "16-32768-32767.meta");
        assert!(sink.error_value().unwrap().is_not_found());
    }

    #[test]
    fn test_height_range_rounds_to_centimetres() {
        assert_eq!(centimetres(100.00000000000004), 100.0);
        assert_eq!(centimetres(99.99999999999997), 100.0);
        assert_eq!(centimetres(-12.3449), -12.34);
        assert_eq!(centimetres(7.0), 7.0);
    }

    #[test]
    fn test_freelayer_urls() {
        let dir = TempDir::new().unwrap();
        let generator = prepared(dir.path());

        let doc = serve_json(&generator, "freelayer.json");
        assert_eq!(doc["type"], "geodataTiles");
        assert_eq!(doc["metaUrl"], "{lod}-{x}-{y}.meta?gr=1&4");
        assert_eq!(doc["geodataUrl"], "{lod}-{x}-{y}.geo?4");
        assert_eq!(doc["lodRange"], json!({ "min": 16, "max": 16 }));
        assert_eq!(doc["label"], "Buildings and trees");
        assert_eq!(doc["style"], "style.json");

        let doc = serve_json(&generator, "mapConfig.json");
        assert_eq!(doc["freeLayers"]["city-semantic"], "freelayer.json");
    }

    #[test]
    fn test_precomputed_tiling_wins() {
        let dir = TempDir::new().unwrap();
        let p = params(dir.path());
        let mut index = TileIndex::new(LodRange::new(16, 16));
        index.set(TileId::new(16, 32768, 32767));
        index
            .save(&precomputed_tiling(&dir.path().join("dem.png"), &p.reference_frame))
            .unwrap();

        let generator = Generator::new(p.clone(), create(&p).unwrap());
        generator.ensure_ready(&arsenal()).unwrap();
        assert!(serve(&generator, TILE_A).data().is_some());
        assert!(serve(&generator, TILE_B).error_value().unwrap().is_not_found());
    }

    #[test]
    fn test_fast_path_and_missing_world() {
        let dir = TempDir::new().unwrap();
        prepared(dir.path());
        let p = params(dir.path());
        assert_eq!(
            Generator::new(p.clone(), create(&p).unwrap()).state(),
            GeneratorState::Ready
        );

        let dir = TempDir::new().unwrap();
        let p = params(dir.path());
        std::fs::remove_file(dir.path().join("world.json")).unwrap();
        let generator = Generator::new(p.clone(), create(&p).unwrap());
        assert!(generator.ensure_ready(&arsenal()).is_err());
        assert_eq!(generator.state(), GeneratorState::Failed);
    }
}
