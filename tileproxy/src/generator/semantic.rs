//! Semantic world model and its conversion to geodata tiles.
//!
//! A world is a JSON document of classified entities with planar footprints:
//!
//! ```text
//! { "srs": "EPSG:3857",
//!   "entities": [{ "id": 1, "class": "building",
//!                  "footprint": [[x, y], ...], "height": 12.5 }] }
//! ```
//!
//! A [`SemanticTileRequest`] runs inside a warper worker: it selects the
//! entities whose footprint centroid falls into the tile, drapes their
//! outlines over the DEM and returns the tile as geodata, one layer per
//! entity class.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use tracing::debug;

use crate::error::{Error, Result};
use crate::geo::{CsConvertor, Extents2, GeoDataset, SrsDefinition};
use crate::warper::{CustomRequest, DatasetCache};

use super::geodata::{layers_by_name, Feature, Geometry};

/// One classified object of the world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticEntity {
    pub id: u64,
    pub class: String,
    /// Outline in the world's SRS, not closed.
    pub footprint: Vec<[f64; 2]>,
    /// Height above ground.
    #[serde(default)]
    pub height: f64,
}

impl SemanticEntity {
    fn centroid(&self) -> Option<[f64; 2]> {
        if self.footprint.is_empty() {
            return None;
        }
        let n = self.footprint.len() as f64;
        let (sx, sy) = self
            .footprint
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p[0], sy + p[1]));
        Some([sx / n, sy / n])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticWorld {
    pub srs: SrsDefinition,
    pub entities: Vec<SemanticEntity>,
}

impl SemanticWorld {
    /// Loads a world document; a missing file is `NotFound`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                Error::not_found(format!("{} not found.", path.display()))
            } else {
                Error::from(e)
            }
        })?;
        serde_json::from_str(&content)
            .map_err(|e| Error::internal(format!("Malformed world {}: {}", path.display(), e)))
    }

    /// Extents of all footprints in the world's SRS.
    pub fn extents(&self) -> Option<Extents2> {
        let mut points = self.entities.iter().flat_map(|e| e.footprint.iter());
        let first = points.next()?;
        let mut out = Extents2::new(first[0], first[1], first[0], first[1]);
        for p in points {
            out.ll[0] = out.ll[0].min(p[0]);
            out.ll[1] = out.ll[1].min(p[1]);
            out.ur[0] = out.ur[0].max(p[0]);
            out.ur[1] = out.ur[1].max(p[1]);
        }
        Some(out)
    }
}

/// Geodata of one tile produced from a semantic world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticTileRequest {
    pub world: PathBuf,
    pub dem: PathBuf,
    /// Output SRS, also the SRS of `extents`.
    pub srs: SrsDefinition,
    pub extents: Extents2,
    pub resolution: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticTile {
    /// Geodata JSON document.
    pub geodata: String,
    pub features: usize,
}

/// Terrain height at a world point, if the DEM covers it.
fn ground(dem: &GeoDataset, to_dem: &CsConvertor, p: [f64; 2]) -> Option<f64> {
    let (x, y) = to_dem.convert(p[0], p[1])?;
    dem.value_at(x, y).and_then(|v| v.first().copied())
}

fn inside(extents: &Extents2, p: (f64, f64)) -> bool {
    p.0 >= extents.ll[0] && p.0 < extents.ur[0] && p.1 >= extents.ll[1] && p.1 < extents.ur[1]
}

impl CustomRequest for SemanticTileRequest {
    const KIND: &'static str = "semantic-tile";
    type Response = SemanticTile;

    fn process(&self, cache: &mut DatasetCache) -> Result<SemanticTile> {
        let world = SemanticWorld::load(&self.world)?;
        let dem = cache.dataset(&self.dem)?;
        let to_output = CsConvertor::new(&world.srs, &self.srs)?;
        let to_dem = CsConvertor::new(&world.srs, dem.srs())?;

        let mut features = Vec::new();
        for entity in &world.entities {
            let Some(centroid) = entity.centroid() else {
                continue;
            };
            let Some(c) = to_output.convert(centroid[0], centroid[1]) else {
                continue;
            };
            if !inside(&self.extents, c) {
                continue;
            }
            // entities off the terrain are dropped
            let Some(base) = ground(dem, &to_dem, centroid) else {
                continue;
            };

            let mut ring = Vec::with_capacity(entity.footprint.len());
            for p in &entity.footprint {
                let z = ground(dem, &to_dem, *p).unwrap_or(base);
                let (x, y) = to_output.convert(p[0], p[1]).ok_or_else(|| {
                    Error::internal(format!("Cannot convert footprint of entity {}.", entity.id))
                })?;
                ring.push([x, y, z]);
            }

            let mut properties = Map::new();
            properties.insert("class".into(), json!(entity.class));
            properties.insert("height".into(), json!(entity.height));
            features.push((
                entity.class.clone(),
                Feature {
                    id: entity.id,
                    properties,
                    geometry: Geometry::Ring(ring),
                },
            ));
        }

        if features.is_empty() {
            return Err(Error::not_found("No entities in tile."));
        }
        let count = features.len();
        let layers = layers_by_name(features);
        let geodata = String::from_utf8(layers.to_geodata_json(self.resolution)?)
            .map_err(|e| Error::internal(format!("Geodata is not UTF-8: {}", e)))?;
        debug!(world = %self.world.display(), features = count, "Semantic tile built");
        Ok(SemanticTile {
            geodata,
            features: count,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::geo::GeoReference;
    use image::{ImageBuffer, Luma};
    use serde_json::Value;
    use tempfile::TempDir;

    /// Flat DEM 100 m high over `[0, 0, 1000, 1000]` in web mercator.
    pub fn flat_dem(dir: &Path) -> PathBuf {
        let path = dir.join("dem.png");
        let img: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_fn(8, 8, |_, _| Luma([1100]));
        img.save(&path).unwrap();
        let mut georef = GeoReference::new(
            SrsDefinition::epsg(3857),
            Extents2::new(0.0, 0.0, 1000.0, 1000.0),
        );
        georef.offset = -1000.0;
        georef.save(&path).unwrap();
        path
    }

    fn square(id: u64, class: &str, x: f64, y: f64) -> SemanticEntity {
        SemanticEntity {
            id,
            class: class.into(),
            footprint: vec![[x, y], [x + 10.0, y], [x + 10.0, y + 10.0], [x, y + 10.0]],
            height: 12.0,
        }
    }

    pub fn world(dir: &Path) -> PathBuf {
        let world = SemanticWorld {
            srs: SrsDefinition::epsg(3857),
            entities: vec![
                square(1, "building", 100.0, 100.0),
                square(2, "tree", 120.0, 100.0),
                square(3, "building", 700.0, 700.0),
                // off the DEM
                square(4, "building", 5000.0, 5000.0),
            ],
        };
        let path = dir.join("world.json");
        fs::write(&path, serde_json::to_vec(&world).unwrap()).unwrap();
        path
    }

    fn request(dir: &Path, extents: Extents2) -> SemanticTileRequest {
        SemanticTileRequest {
            world: world(dir),
            dem: flat_dem(dir),
            srs: SrsDefinition::epsg(3857),
            extents,
            resolution: 1024,
        }
    }

    #[test]
    fn test_tile_selects_by_centroid_and_groups_by_class() {
        let dir = TempDir::new().unwrap();
        let req = request(dir.path(), Extents2::new(0.0, 0.0, 500.0, 500.0));
        let tile = req.process(&mut DatasetCache::new()).unwrap();
        assert_eq!(tile.features, 2);

        let doc: Value = serde_json::from_str(&tile.geodata).unwrap();
        let groups = doc["groups"].as_array().unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0]["id"], "building");
        assert_eq!(groups[1]["id"], "tree");
        let line = &groups[0]["lines"][0];
        assert_eq!(line["id"], 1);
        assert_eq!(line["properties"]["height"], json!(12.0));
        // closed ring of a 4-point footprint
        assert_eq!(line["lines"][0].as_array().unwrap().len(), 5);
        // draped at 100 m
        assert_eq!(groups[0]["bbox"][0][2], json!(100.0));
    }

    #[test]
    fn test_empty_tile_is_not_found() {
        let dir = TempDir::new().unwrap();
        let req = request(dir.path(), Extents2::new(300.0, 300.0, 400.0, 400.0));
        assert!(req
            .process(&mut DatasetCache::new())
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_entities_off_terrain_are_dropped() {
        let dir = TempDir::new().unwrap();
        let req = request(dir.path(), Extents2::new(4000.0, 4000.0, 6000.0, 6000.0));
        assert!(req
            .process(&mut DatasetCache::new())
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_world_extents_and_missing_file() {
        let dir = TempDir::new().unwrap();
        let world = SemanticWorld::load(&world(dir.path())).unwrap();
        assert_eq!(
            world.extents(),
            Some(Extents2::new(100.0, 100.0, 5010.0, 5010.0))
        );
        assert!(SemanticWorld::load(&dir.path().join("none.json"))
            .unwrap_err()
            .is_not_found());
    }
}
