//! End-to-end generator lifecycle against real warper workers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{ImageBuffer, Luma, Rgb, RgbImage};
use serde_json::{json, Value};
use tempfile::TempDir;
use tileproxy::generator::{
    Arsenal, FactoryRegistry, GeneratorState, Generators, GeneratorsConfig, MemorySink,
    SemanticEntity, SemanticWorld,
};
use tileproxy::geo::{Extents2, GeoReference, SrsDefinition};
use tileproxy::resource::{Resource, ResourceId};
use tileproxy::tiling::{ReferenceFrame, ReferenceFrames, TilingConfig};
use tileproxy::warper::{GdalWarper, WarperConfig};

struct Fixture {
    dir: TempDir,
    warper: GdalWarper,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config = WarperConfig::default()
            .with_workers(2)
            .with_arena_size(16 << 20)
            .with_worker_binary(PathBuf::from(env!("CARGO_BIN_EXE_tileproxy-warper")))
            .with_arena_dir(dir.path().to_path_buf())
            .with_log_level("warn");
        let warper = GdalWarper::spawn(config).unwrap();
        write_ortho(dir.path(), "ortho.png");
        write_ortho(dir.path(), "ortho-2024.png");
        Self { dir, warper }
    }

    /// A fresh set of generators over the same store, as after a restart.
    fn generators(&self) -> Generators {
        Generators::new(
            GeneratorsConfig::new(self.dir.path().join("store"), self.dir.path()),
            FactoryRegistry::builtin(),
            ReferenceFrames::builtin(),
            Arsenal::new(Arc::new(self.warper.clone()), TilingConfig::default()),
        )
    }
}

/// 256x256 dataset covering the north-west quadrant of web mercator.
fn write_ortho(dir: &Path, name: &str) {
    let rf = ReferenceFrame::webmerc();
    let e = rf.extents();
    let path = dir.join(name);
    RgbImage::from_fn(256, 256, |x, y| Rgb([x as u8, y as u8, 50]))
        .save(&path)
        .unwrap();
    GeoReference::new(
        SrsDefinition::epsg(3857),
        Extents2::new(e.ll[0], 0.0, 0.0, e.ur[1]),
    )
    .save(&path)
    .unwrap();
}

fn ortho(definition: Value) -> Resource {
    Resource::parse(&json!({
        "referenceFrame": "webmerc",
        "group": "imagery",
        "id": "ortho",
        "type": "tms",
        "driver": "tms-raster",
        "revision": 3,
        "definition": definition,
    }))
    .unwrap()
}

fn ortho_id() -> ResourceId {
    ResourceId::new("webmerc", "imagery", "ortho")
}

fn serve(gens: &Generators, id: &ResourceId, name: &str) -> MemorySink {
    let mut sink = MemorySink::new();
    gens.serve(id, name, &mut sink);
    sink
}

#[test]
fn test_prepare_and_serve_through_worker_pool() {
    let fx = Fixture::new();
    let gens = fx.generators();
    let report = gens.load(vec![ortho(json!({ "dataset": "ortho.png" }))]);
    assert_eq!(report.added, vec![ortho_id()]);
    assert_eq!(gens.prepare_all(), 0);

    let sink = serve(&gens, &ortho_id(), "1-0-0.png");
    let tile = image::load_from_memory(sink.data().unwrap()).unwrap();
    assert_eq!(tile.width(), 256);

    // outside the derived tile range
    let sink = serve(&gens, &ortho_id(), "1-1-1.png");
    assert!(sink.error_value().unwrap().is_not_found());

    assert!(fx.warper.stats().requests >= 1);
}

#[test]
fn test_restart_classifies_definition_changes() {
    let fx = Fixture::new();
    {
        let gens = fx.generators();
        gens.load(vec![ortho(json!({ "dataset": "ortho.png" }))]);
        assert_eq!(gens.prepare_all(), 0);
    }

    // unchanged: ready straight from the store
    let gens = fx.generators();
    gens.load(vec![ortho(json!({ "dataset": "ortho.png" }))]);
    let generator = gens.get(&ortho_id()).unwrap();
    assert_eq!(generator.state(), GeneratorState::Ready);
    assert_eq!(generator.resource().revision, 3);

    // presentation only: still ready, served in the new format
    let gens = fx.generators();
    gens.load(vec![ortho(json!({ "dataset": "ortho.png", "format": "jpg" }))]);
    let generator = gens.get(&ortho_id()).unwrap();
    assert_eq!(generator.state(), GeneratorState::Ready);
    let sink = serve(&gens, &ortho_id(), "1-0-0.jpg");
    assert!(sink.data().is_some());

    // new source data: prepared again under a bumped revision
    let gens = fx.generators();
    gens.load(vec![ortho(json!({ "dataset": "ortho-2024.png", "format": "jpg" }))]);
    let generator = gens.get(&ortho_id()).unwrap();
    assert_eq!(generator.state(), GeneratorState::Unprepared);
    assert_eq!(generator.resource().revision, 4);
    assert_eq!(gens.prepare_all(), 0);

    let sink = serve(&gens, &ortho_id(), "boundlayer.json");
    let doc: Value = serde_json::from_slice(sink.data().unwrap()).unwrap();
    assert_eq!(doc["url"], "{lod}-{x}-{y}.jpg?4");
}

// =============================================================================
// Semantic geodata
// =============================================================================

fn write_semantic(dir: &Path) {
    let dem = dir.join("dem.png");
    let img: ImageBuffer<Luma<u16>, Vec<u16>> = ImageBuffer::from_fn(8, 8, |_, _| Luma([1100]));
    img.save(&dem).unwrap();
    let mut georef = GeoReference::new(
        SrsDefinition::epsg(3857),
        Extents2::new(0.0, 0.0, 1000.0, 1000.0),
    );
    georef.offset = -1000.0;
    georef.save(&dem).unwrap();

    let world = SemanticWorld {
        srs: SrsDefinition::epsg(3857),
        entities: vec![SemanticEntity {
            id: 7,
            class: "building".into(),
            footprint: vec![[100.0, 100.0], [110.0, 100.0], [110.0, 110.0], [100.0, 110.0]],
            height: 15.0,
        }],
    };
    std::fs::write(dir.join("world.json"), serde_json::to_vec(&world).unwrap()).unwrap();
}

#[test]
fn test_semantic_tile_built_in_worker() {
    let fx = Fixture::new();
    write_semantic(fx.dir.path());
    let resource = Resource::parse(&json!({
        "referenceFrame": "webmerc",
        "group": "city",
        "id": "semantic",
        "type": "geodata",
        "driver": "geodata-semantic-tiled",
        "lodRange": [16, 16],
        "tileRange": [32768, 32766, 32769, 32767],
        "definition": { "dataset": "world.json", "dem": "dem.png" }
    }))
    .unwrap();
    let id = resource.id.clone();

    let gens = fx.generators();
    gens.load(vec![resource]);
    assert_eq!(gens.prepare_all(), 0);

    let sink = serve(&gens, &id, "16-32768-32767.geo");
    let doc: Value = serde_json::from_slice(sink.data().unwrap()).unwrap();
    assert_eq!(doc["groups"][0]["id"], "building");
    assert_eq!(doc["groups"][0]["lines"][0]["id"], 7);

    let sink = serve(&gens, &id, "16-32769-32766.geo");
    assert!(sink.error_value().unwrap().is_not_found());
}
