//! `geodata-mesh`: free layer converted from one OBJ mesh.
//!
//! Prepare reads the mesh, splits it by material, shifts it by the
//! configured center, converts it into the reference frame's SRS and writes
//! the whole layer as one geodata document:
//!
//! ```text
//! <root>/geodata         quantized geodata JSON
//! <root>/metadata.json   { extents[6], fileSize, position }
//! ```

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::geo::{CsConvertor, SrsDefinition};
use crate::resource::definition::GeodataMesh;
use crate::resource::Definition;

use super::arsenal::Arsenal;
use super::file_info::{FileInfo, FileKind};
use super::geodata::{Feature, FeatureLayers, Geometry, Layer};
use super::map_config::{self, MapConfig, Position};
use super::metadata::{self, METADATA_FILE};
use super::obj::{self, DEFAULT_MESH_NAME};
use super::sink::{FileClass, Sink};
use super::support::{self, with_revision, StyleSource};
use super::{GeneratorDriver, GeneratorParams, Task};

/// File name of the generated geodata.
pub const GEODATA_FILE: &str = "geodata";

/// Content type of geodata documents.
pub const GEODATA_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Persisted state of a prepared mesh layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeshMetadata {
    /// Bounding box in the reference frame's SRS: ll xyz, ur xyz.
    pub extents: [f64; 6],
    pub file_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

/// `freelayer.json` of a single-document layer.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FreeLayer {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    extents: [f64; 6],
    display_size: u32,
    #[serde(skip_serializing_if = "String::is_empty")]
    label: String,
    geodata: String,
    style: String,
}

pub fn create(params: &GeneratorParams) -> Result<Box<dyn GeneratorDriver>> {
    let Definition::GeodataMesh(definition) = &params.resource.definition else {
        return Err(Error::internal("geodata-mesh driver given a foreign definition"));
    };
    Ok(Box::new(GeodataMeshDriver {
        inner: Arc::new(Inner {
            dataset: params.absolute_dataset(&definition.dataset),
            style: StyleSource::resolve(&definition.presentation.style_url, &params.data_root),
            data_path: params.root.join(GEODATA_FILE),
            definition: definition.clone(),
            params: params.clone(),
            metadata: RwLock::new(None),
        }),
    }))
}

struct GeodataMeshDriver {
    inner: Arc<Inner>,
}

struct Inner {
    params: GeneratorParams,
    definition: GeodataMesh,
    dataset: PathBuf,
    style: StyleSource,
    data_path: PathBuf,
    metadata: RwLock<Option<MeshMetadata>>,
}

/// Mesh split by material as one "mesh" layer, shifted by `center`.
fn mesh_layers(meshes: Vec<obj::NamedMesh>, center: [f64; 3]) -> FeatureLayers {
    let mut layer = Layer::new(DEFAULT_MESH_NAME);
    for (i, mesh) in meshes.into_iter().enumerate() {
        let mut properties = Map::new();
        properties.insert("name".into(), json!(mesh.name));
        let vertices = mesh
            .vertices
            .iter()
            .map(|p| [p[0] + center[0], p[1] + center[1], p[2] + center[2]])
            .collect();
        layer.features.push(Feature {
            id: i as u64 + 1,
            properties,
            geometry: Geometry::Surface {
                vertices,
                faces: mesh.faces,
            },
        });
    }
    FeatureLayers {
        layers: vec![layer],
    }
}

impl Inner {
    fn metadata(&self) -> Result<MeshMetadata> {
        self.metadata
            .read()
            .clone()
            .ok_or_else(|| Error::internal("Mesh layer is not prepared."))
    }

    fn free_layer(&self) -> Result<FreeLayer> {
        let resource = &self.params.resource;
        Ok(FreeLayer {
            id: resource.id.full_id(),
            kind: "geodata",
            extents: self.metadata()?.extents,
            display_size: self.definition.presentation.display_size,
            label: resource.comment.clone(),
            geodata: with_revision(GEODATA_FILE, resource.revision, '?'),
            style: self.style.url().to_string(),
        })
    }

    /// Camera position above the mesh center, in WGS84.
    fn position(&self, fl: &FeatureLayers) -> Result<Option<Position>> {
        let Some(bbox) = fl.bounding_box() else {
            return Ok(None);
        };
        let c = bbox.center();
        let conv = CsConvertor::new(&self.definition.srs, &SrsDefinition::epsg(4326))?;
        let Some((lon, lat)) = conv.convert(c[0], c[1]) else {
            return Ok(None);
        };
        let vertical_extent = (bbox.ur[0] - bbox.ll[0]).max(bbox.ur[1] - bbox.ll[1]);
        Ok(Some(Position::looking_down([lon, lat], vertical_extent)))
    }
}

impl GeneratorDriver for GeodataMeshDriver {
    fn load_prepared(&self) -> Result<bool> {
        let inner = &self.inner;
        let metadata: MeshMetadata =
            metadata::load(&inner.params.root.join(METADATA_FILE))?;
        if !metadata::artifact_matches(&inner.data_path, metadata.file_size) {
            return Ok(false);
        }
        *inner.metadata.write() = Some(metadata);
        Ok(true)
    }

    fn prepare(&self, _arsenal: &Arsenal) -> Result<()> {
        let inner = &self.inner;
        let definition = &inner.definition;
        let rf = &inner.params.reference_frame;

        let meshes = obj::load(&inner.dataset)?.into_meshes();
        let mut fl = mesh_layers(meshes, definition.center);
        if fl.feature_count() == 0 {
            return Err(Error::internal(format!(
                "Mesh {} has no faces.",
                inner.dataset.display()
            )));
        }
        let position = inner.position(&fl)?;

        if definition.adjust_vertical && !rf.srs().is_geographic()? {
            fl.adjust_vertical(&CsConvertor::new(&definition.srs, &SrsDefinition::epsg(4326))?)?;
        }
        fl.transform(&CsConvertor::new(&definition.srs, rf.srs())?)?;
        let extents = fl
            .bounding_box()
            .map(|b| b.as_array())
            .unwrap_or_default();

        let data = fl.to_geodata_json(definition.resolution)?;
        fs::create_dir_all(&inner.params.root)?;
        let temp_path = inner.data_path.with_extension("tmp");
        fs::write(&temp_path, &data)?;
        fs::rename(&temp_path, &inner.data_path)?;

        let metadata = MeshMetadata {
            extents,
            file_size: fs::metadata(&inner.data_path)?.len(),
            position,
        };
        metadata::save(&inner.params.root.join(METADATA_FILE), &metadata)?;
        info!(
            resource = %inner.params.resource.id,
            features = fl.feature_count(),
            size = metadata.file_size,
            "Mesh geodata written"
        );
        *inner.metadata.write() = Some(metadata);
        Ok(())
    }

    fn generate_file(&self, file: &FileInfo, sink: &mut dyn Sink) -> Result<Option<Task>> {
        let inner = &self.inner;
        match &file.kind {
            FileKind::Geodata(None) => {
                let inner = Arc::clone(inner);
                Ok(Some(Box::new(move |sink: &mut dyn Sink, _: &Arsenal| {
                    debug!(path = %inner.data_path.display(), "Streaming geodata");
                    sink.check_aborted()?;
                    support::serve_path(&inner.data_path, GEODATA_CONTENT_TYPE, FileClass::Data, sink)
                })))
            }
            FileKind::Config => {
                let resource = &inner.params.resource;
                MapConfig::new(&inner.params.reference_frame)
                    .with_free_layer(resource.id.full_id(), "freelayer.json")
                    .with_position(inner.metadata()?.position)
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
    use crate::generator::sink::MemorySink;
    use crate::generator::testing::{arsenal, params};
    use crate::generator::{Generator, GeneratorState};
    use crate::resource::Resource;
    use serde_json::Value;
    use std::path::Path;
    use tempfile::TempDir;

    const HOUSE: &str = "\
mtllib house.mtl
v 0 0 0
v 10 0 0
v 10 10 0
v 0 10 0
v 5 5 8
usemtl wall
f 1 2 3 4
usemtl roof
f 1 2 5
";

    fn mesh_params(dir: &Path, style_url: &str) -> GeneratorParams {
        fs::write(dir.join("house.obj"), HOUSE).unwrap();
        let resource = Resource::parse(&json!({
            "referenceFrame": "webmerc",
            "group": "city",
            "id": "house",
            "type": "geodata",
            "driver": "geodata-mesh",
            "revision": 2,
            "lodRange": [10, 18],
            "tileRange": [0, 0, 1023, 1023],
            "definition": {
                "dataset": "house.obj",
                "srs": "EPSG:3857",
                "center": [1000.0, 2000.0, 0.0],
                "resolution": 100,
                "styleUrl": style_url
            }
        }))
        .unwrap();
        let mut p = params(dir, false);
        p.root = resource.id.root(&dir.join("store"));
        p.resource = resource;
        p
    }

    fn prepared(dir: &Path, style_url: &str) -> Generator {
        let p = mesh_params(dir, style_url);
        let generator = Generator::new(p.clone(), create(&p).unwrap());
        generator.ensure_ready(&arsenal()).unwrap();
        generator
    }

    fn serve(generator: &Generator, name: &str) -> MemorySink {
        let mut sink = MemorySink::new();
        generator.serve(name, &mut sink, &arsenal());
        sink
    }

    #[test]
    fn test_prepare_writes_geodata_and_metadata() {
        let dir = TempDir::new().unwrap();
        let generator = prepared(dir.path(), "");

        let meta: MeshMetadata = metadata::load(&generator.root().join(METADATA_FILE)).unwrap();
        assert_eq!(meta.extents, [1000.0, 2000.0, 0.0, 1010.0, 2010.0, 8.0]);
        assert_eq!(
            meta.file_size,
            fs::metadata(generator.root().join(GEODATA_FILE)).unwrap().len()
        );
        assert!(meta.position.is_some());

        let sink = serve(&generator, "geo?2");
        let doc: Value = serde_json::from_slice(sink.data().unwrap()).unwrap();
        let group = &doc["groups"][0];
        assert_eq!(group["id"], "mesh");
        assert_eq!(group["resolution"], 100);
        let names: Vec<_> = group["polygons"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["properties"]["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["wall", "roof"]);
    }

    #[test]
    fn test_fast_path_and_size_mismatch() {
        let dir = TempDir::new().unwrap();
        let root = prepared(dir.path(), "").root().to_path_buf();

        let p = mesh_params(dir.path(), "");
        let restarted = Generator::new(p.clone(), create(&p).unwrap());
        assert_eq!(restarted.state(), GeneratorState::Ready);

        fs::write(root.join(GEODATA_FILE), b"{}").unwrap();
        let restarted = Generator::new(p.clone(), create(&p).unwrap());
        assert_eq!(restarted.state(), GeneratorState::Unprepared);
    }

    #[test]
    fn test_freelayer_and_internal_style() {
        let dir = TempDir::new().unwrap();
        let generator = prepared(dir.path(), "");

        let sink = serve(&generator, "freelayer.json");
        let doc: Value = serde_json::from_slice(sink.data().unwrap()).unwrap();
        assert_eq!(doc["type"], "geodata");
        assert_eq!(doc["geodata"], "geodata?2");
        assert_eq!(doc["style"], "style.json");

        let sink = serve(&generator, "style.json");
        assert_eq!(sink.data(), Some(support::DEFAULT_STYLE.data));

        let sink = serve(&generator, "mapConfig.json");
        let doc: Value = serde_json::from_slice(sink.data().unwrap()).unwrap();
        assert_eq!(doc["freeLayers"]["city-house"], "freelayer.json");
        assert_eq!(doc["position"]["type"], "objective");
    }

    #[test]
    fn test_file_and_external_styles() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("custom.json"), b"{\"layers\":{}}").unwrap();
        let generator = prepared(dir.path(), "file:custom.json");
        assert_eq!(
            serve(&generator, "style.json").data(),
            Some(&b"{\"layers\":{}}"[..])
        );

        let dir = TempDir::new().unwrap();
        let generator = prepared(dir.path(), "https://styles.example/mesh.json");
        let sink = serve(&generator, "freelayer.json");
        let doc: Value = serde_json::from_slice(sink.data().unwrap()).unwrap();
        assert_eq!(doc["style"], "https://styles.example/mesh.json");
        assert!(serve(&generator, "style.json").error_value().unwrap().is_not_found());
    }

    #[test]
    fn test_tiles_are_not_served() {
        let dir = TempDir::new().unwrap();
        let generator = prepared(dir.path(), "");
        assert!(serve(&generator, "3-1-1.geo")
            .error_value()
            .unwrap()
            .is_not_found());
    }
}
